//! ISP 返回码（UM10398 "ISP Return Codes"）

use crate::{Error, Result};
use strum::{Display, EnumString, FromRepr, IntoStaticStr};

/// 设备返回的状态码
///
/// `ADDR_ERROR` 和 `ADDR_NOT_MAPPED` 在线上都是 14，这里只保留一个变体，
/// 两个名字都解析到 [`StatusCode::AddrError`]。
#[derive(Display, EnumString, IntoStaticStr, FromRepr, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum StatusCode {
    #[strum(serialize = "CMD_SUCCESS")]
    CmdSuccess = 0,
    #[strum(serialize = "INVALID_COMMAND")]
    InvalidCommand = 1,
    #[strum(serialize = "SRC_ADDR_ERROR")]
    SrcAddrError = 2,
    #[strum(serialize = "DST_ADDR_ERROR")]
    DstAddrError = 3,
    #[strum(serialize = "SRC_ADDR_NOT_MAPPED")]
    SrcAddrNotMapped = 4,
    #[strum(serialize = "DST_ADDR_NOT_MAPPED")]
    DstAddrNotMapped = 5,
    #[strum(serialize = "COUNT_ERROR")]
    CountError = 6,
    #[strum(serialize = "INVALID_SECTOR")]
    InvalidSector = 7,
    #[strum(serialize = "SECTOR_NOT_BLANK")]
    SectorNotBlank = 8,
    #[strum(serialize = "SECTOR_NOT_PREPARED_FOR_WRITE_OPERATION")]
    SectorNotPreparedForWrite = 9,
    #[strum(serialize = "COMPARE_ERROR")]
    CompareError = 10,
    #[strum(serialize = "BUSY")]
    Busy = 11,
    #[strum(serialize = "PARAM_ERROR")]
    ParamError = 12,
    #[strum(to_string = "ADDR_ERROR", serialize = "ADDR_NOT_MAPPED")]
    AddrError = 14,
    #[strum(serialize = "CMD_LOCKED")]
    CmdLocked = 15,
    #[strum(serialize = "INVALID_CODE")]
    InvalidCode = 16,
    #[strum(serialize = "INVALID_BAUD_RATE")]
    InvalidBaudRate = 17,
    #[strum(serialize = "INVALID_STOP_BIT")]
    InvalidStopBit = 18,
    #[strum(serialize = "CODE_READ_PROTECTION_ENABLED")]
    CodeReadProtectionEnabled = 19,
}

impl StatusCode {
    pub const ADDR_ERROR: StatusCode = StatusCode::AddrError;
    pub const ADDR_NOT_MAPPED: StatusCode = StatusCode::AddrError;

    /// 将线上的数字解码为状态码，未文档化的值返回 `UnknownStatus`
    pub fn decode(code: u32) -> Result<Self> {
        Self::from_repr(code).ok_or(Error::UnknownStatus(code))
    }

    /// 解析设备返回的状态行
    pub fn parse_line(line: &str) -> Result<Self> {
        let code = line
            .trim()
            .parse::<u32>()
            .map_err(|_| Error::protocol(format!("expected a status code, got {:?}", line)))?;
        Self::decode(code)
    }

    pub fn code(self) -> u32 {
        self as u32
    }

    pub fn is_success(self) -> bool {
        self == StatusCode::CmdSuccess
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn decodes_documented_range() {
        assert_eq!(StatusCode::decode(0).unwrap(), StatusCode::CmdSuccess);
        assert_eq!(StatusCode::decode(9).unwrap(), StatusCode::SectorNotPreparedForWrite);
        assert_eq!(StatusCode::decode(19).unwrap(), StatusCode::CodeReadProtectionEnabled);
        for code in (0..=12).chain(14..=19) {
            assert_eq!(StatusCode::decode(code).unwrap().code(), code);
        }
    }

    #[test]
    fn rejects_undocumented_codes() {
        assert!(matches!(StatusCode::decode(13), Err(Error::UnknownStatus(13))));
        assert!(matches!(StatusCode::decode(20), Err(Error::UnknownStatus(20))));
    }

    #[test]
    fn address_aliases_share_one_code() {
        let decoded = StatusCode::decode(14).unwrap();
        assert_eq!(decoded, StatusCode::ADDR_ERROR);
        assert_eq!(decoded, StatusCode::ADDR_NOT_MAPPED);
        assert_eq!(StatusCode::from_str("ADDR_ERROR").unwrap(), decoded);
        assert_eq!(StatusCode::from_str("ADDR_NOT_MAPPED").unwrap(), decoded);
        assert_eq!(decoded.to_string(), "ADDR_ERROR");
    }

    #[test]
    fn status_line_must_be_numeric() {
        assert_eq!(StatusCode::parse_line("0").unwrap(), StatusCode::CmdSuccess);
        assert!(matches!(StatusCode::parse_line("OK"), Err(Error::Protocol(_))));
    }
}

use crate::layout::SectorRange;
use crate::status::StatusCode;
use crate::sync::SyncFailure;
use thiserror::Error;

/// Convenient result type for `lpcisp-lib`.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serial(#[from] serialport::Error),

    #[error("timeout while {0}")]
    Timeout(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("connection failed: {0}")]
    Sync(SyncFailure),

    #[error("`{command}` failed with {status} ({})", .status.code())]
    Device {
        command: String,
        status: StatusCode,
        response: Vec<String>,
    },

    #[error("unknown status code {0}")]
    UnknownStatus(u32),

    #[error("compare mismatch at offset {offset:#010X}{}", format_compare_values(.values))]
    CompareMismatch {
        offset: u32,
        values: Option<(u32, u32)>,
    },

    #[error("refused before sending: {0}")]
    Sequencing(#[from] SequencingError),

    #[error("checksum mismatch in block {block}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        block: usize,
        expected: u32,
        actual: u32,
    },

    #[error("corrupt transfer block {block}: {reason}")]
    CorruptBlock { block: usize, reason: String },

    #[error("block {block} rejected after {attempts} resend attempts")]
    ResendLimit { block: usize, attempts: u8 },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("Intel HEX parse error: {0}")]
    IntelHex(#[from] ihex::ReaderError),

    #[error("integer parse error: {0}")]
    ParseInt(#[from] std::num::ParseIntError),
}

/// Local pre-flight refusals. Raised before any byte reaches the transport.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SequencingError {
    #[error("session is not synchronized")]
    NotSynchronized,

    #[error("flash is locked, unlock first")]
    NotUnlocked,

    #[error("sectors {requested} not prepared for write (prepared: {})", format_prepared(.prepared))]
    SectorNotPreparedForWrite {
        requested: SectorRange,
        prepared: Option<SectorRange>,
    },

    #[error("sectors {0} include sector 0 or the boot block")]
    BootSectorProtected(SectorRange),

    #[error("sector {sector} is outside the flash ({count} sectors)")]
    SectorOutOfRange { sector: u32, count: u32 },

    #[error("address {address:#010X} is outside the flash")]
    AddressOutOfRange { address: u32 },

    #[error("address {address:#010X} is not {alignment}-byte aligned")]
    MisalignedAddress { address: u32, alignment: u32 },

    #[error("block size {0} is not one of 256, 512, 1024, 4096")]
    InvalidBlockSize(u32),

    #[error("byte count {0} is not a multiple of 4")]
    InvalidCount(u32),

    #[error("unsupported baud rate {0}")]
    InvalidBaudRate(u32),

    #[error("unsupported stop bit count {0}")]
    InvalidStopBits(u8),

    #[error("code read protection is enabled")]
    CodeReadProtected,

    #[error("execute target {0:#010X} is below 0x00000200")]
    ExecuteAddressTooLow(u32),

    #[error("program is running, the session is no longer synchronized")]
    ProgramRunning,
}

/// Coarse error categories, used by callers to choose retry, abort or escalation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Transport,
    Protocol,
    DeviceStatus,
    Sequencing,
    Checksum,
    Input,
}

impl Error {
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Io(_) | Error::Serial(_) | Error::Timeout(_) | Error::Cancelled => {
                ErrorCategory::Transport
            }
            Error::Protocol(_) | Error::Sync(_) => ErrorCategory::Protocol,
            Error::Device { .. } | Error::UnknownStatus(_) | Error::CompareMismatch { .. } => {
                ErrorCategory::DeviceStatus
            }
            Error::Sequencing(_) => ErrorCategory::Sequencing,
            Error::ChecksumMismatch { .. } | Error::CorruptBlock { .. } | Error::ResendLimit { .. } => {
                ErrorCategory::Checksum
            }
            Error::InvalidInput(_) | Error::IntelHex(_) | Error::ParseInt(_) => {
                ErrorCategory::Input
            }
        }
    }

    pub fn is_timeout(&self) -> bool {
        match self {
            Error::Timeout(_) => true,
            Error::Io(e) => e.kind() == std::io::ErrorKind::TimedOut,
            _ => false,
        }
    }

    /// 设备返回的状态码（仅 `Device` 错误有）
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Error::Device { status, .. } => Some(*status),
            Error::CompareMismatch { .. } => Some(StatusCode::CompareError),
            _ => None,
        }
    }
}

fn format_compare_values(values: &Option<(u32, u32)>) -> String {
    match values {
        Some((a, b)) => format!(" ({:#010X} != {:#010X})", a, b),
        None => String::new(),
    }
}

fn format_prepared(prepared: &Option<SectorRange>) -> String {
    match prepared {
        Some(range) => range.to_string(),
        None => "none".to_string(),
    }
}

use crate::layout::SectorRange;
use crate::{Error, Result};
use std::num::ParseIntError;
use std::path::Path;

/// 待写入 Flash 的一段连续数据
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteFlashFile {
    pub address: u32,
    pub data: Vec<u8>,
}

/// 读取 Flash 的目标文件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadFlashFile {
    pub file_path: String,
    pub address: u32,
    pub size: u32,
}

/// HEX 记录之间小于此间隔的空洞用 0xFF 填充并合并为一段
const HEX_MERGE_GAP: u32 = 0x1000;

pub struct Utils;
impl Utils {
    pub fn str_to_u32(s: &str) -> std::result::Result<u32, ParseIntError> {
        let s = s.trim();

        let (num_str, multiplier) = match s.chars().last() {
            Some('k') | Some('K') => (&s[..s.len() - 1], 1_024u32),
            Some('m') | Some('M') => (&s[..s.len() - 1], 1_024 * 1_024u32),
            _ => (s, 1),
        };

        let unsigned: u32 = if let Some(hex) = num_str
            .strip_prefix("0x")
            .or_else(|| num_str.strip_prefix("0X"))
        {
            u32::from_str_radix(hex, 16)?
        } else if let Some(bin) = num_str.strip_prefix("0b") {
            u32::from_str_radix(bin, 2)?
        } else if let Some(oct) = num_str.strip_prefix("0o") {
            u32::from_str_radix(oct, 8)?
        } else {
            num_str.parse()?
        };

        Ok(unsigned.wrapping_mul(multiplier))
    }

    pub fn parse_address(address_str: &str) -> Result<u32> {
        Utils::str_to_u32(address_str)
            .map_err(|e| Error::invalid_input(format!("Invalid address '{}': {}", address_str, e)))
    }

    /// 解析写入参数 (filename[@address])
    pub fn parse_file_info(file_spec: &str) -> Result<(String, Option<u32>)> {
        match file_spec.rsplit_once('@') {
            Some((path, addr)) => Ok((path.to_string(), Some(Utils::parse_address(addr)?))),
            None => Ok((file_spec.to_string(), None)),
        }
    }

    /// 解析读取参数 (filename@address:size)
    pub fn parse_read_file_info(file_spec: &str) -> Result<ReadFlashFile> {
        let invalid = || {
            Error::invalid_input(format!(
                "Invalid format: {}. Expected: filename@address:size",
                file_spec
            ))
        };
        let (file_path, addr_size) = file_spec.rsplit_once('@').ok_or_else(invalid)?;
        let (addr, size) = addr_size.split_once(':').ok_or_else(invalid)?;

        let address = Utils::parse_address(addr)?;
        let size = Utils::str_to_u32(size)
            .map_err(|e| Error::invalid_input(format!("Invalid size '{}': {}", size, e)))?;

        Ok(ReadFlashFile {
            file_path: file_path.to_string(),
            address,
            size,
        })
    }

    /// 解析扇区范围 (start[:end])
    pub fn parse_sector_range(range_spec: &str) -> Result<SectorRange> {
        let parse = |s: &str| {
            Utils::str_to_u32(s)
                .map_err(|e| Error::invalid_input(format!("Invalid sector '{}': {}", s, e)))
        };
        match range_spec.split_once(':') {
            Some((start, end)) => SectorRange::new(parse(start)?, parse(end)?),
            None => Ok(SectorRange::single(parse(range_spec)?)),
        }
    }

    /// 加载写入镜像。`.hex`/`.ihex` 文件的地址取自记录，其余按原始二进制处理，必须给出地址
    pub fn load_image(path: &Path, address: Option<u32>) -> Result<Vec<WriteFlashFile>> {
        let is_hex = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("hex") || ext.eq_ignore_ascii_case("ihex"));

        if is_hex {
            if address.is_some() {
                tracing::warn!(
                    "Ignoring address for Intel HEX file {}, using record addresses",
                    path.display()
                );
            }
            return Utils::hex_to_write_flash_files(path);
        }

        let address = address.ok_or_else(|| {
            Error::invalid_input(format!(
                "Binary file {} needs an address (file@address)",
                path.display()
            ))
        })?;
        let data = std::fs::read(path)?;
        Ok(vec![WriteFlashFile { address, data }])
    }

    /// 把 Intel HEX 文件转换为连续的数据段
    pub fn hex_to_write_flash_files(path: &Path) -> Result<Vec<WriteFlashFile>> {
        let content = std::fs::read_to_string(path)?;
        Utils::parse_hex(&content)
    }

    pub fn parse_hex(content: &str) -> Result<Vec<WriteFlashFile>> {
        let mut segments: Vec<WriteFlashFile> = Vec::new();
        let mut base: u32 = 0;

        for record in ihex::Reader::new(content) {
            match record? {
                ihex::Record::Data { offset, value } => {
                    let address = base.wrapping_add(offset as u32);
                    Self::push_data(&mut segments, address, &value);
                }
                ihex::Record::ExtendedSegmentAddress(segment) => base = (segment as u32) << 4,
                ihex::Record::ExtendedLinearAddress(upper) => base = (upper as u32) << 16,
                ihex::Record::EndOfFile => break,
                ihex::Record::StartSegmentAddress { .. } | ihex::Record::StartLinearAddress(_) => {}
            }
        }

        Ok(segments)
    }

    fn push_data(segments: &mut Vec<WriteFlashFile>, address: u32, value: &[u8]) {
        if let Some(last) = segments.last_mut() {
            let end = last.address.wrapping_add(last.data.len() as u32);
            if address >= end && address - end < HEX_MERGE_GAP {
                last.data.resize((address - last.address) as usize, 0xFF);
                last.data.extend_from_slice(value);
                return;
            }
        }
        segments.push(WriteFlashFile {
            address,
            data: value.to_vec(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_numbers_with_prefixes_and_suffixes() {
        assert_eq!(Utils::str_to_u32("0x1000").unwrap(), 0x1000);
        assert_eq!(Utils::str_to_u32("0b101").unwrap(), 5);
        assert_eq!(Utils::str_to_u32("0o17").unwrap(), 15);
        assert_eq!(Utils::str_to_u32(" 512 ").unwrap(), 512);
        assert_eq!(Utils::str_to_u32("32k").unwrap(), 32 * 1024);
        assert_eq!(Utils::str_to_u32("1M").unwrap(), 1024 * 1024);
        assert!(Utils::str_to_u32("0xZZ").is_err());
    }

    #[test]
    fn parses_sector_ranges() {
        let range = Utils::parse_sector_range("1:3").unwrap();
        assert_eq!((range.start(), range.end()), (1, 3));
        let range = Utils::parse_sector_range("7").unwrap();
        assert_eq!((range.start(), range.end()), (7, 7));
        assert!(Utils::parse_sector_range("3:1").is_err());
        assert!(Utils::parse_sector_range("x").is_err());
    }

    #[test]
    fn parses_file_specs() {
        assert_eq!(
            Utils::parse_file_info("app.bin@0x1000").unwrap(),
            ("app.bin".to_string(), Some(0x1000))
        );
        assert_eq!(
            Utils::parse_file_info("app.hex").unwrap(),
            ("app.hex".to_string(), None)
        );

        let read = Utils::parse_read_file_info("dump.bin@0x0:0x800").unwrap();
        assert_eq!(read.file_path, "dump.bin");
        assert_eq!(read.address, 0);
        assert_eq!(read.size, 0x800);
        assert!(Utils::parse_read_file_info("dump.bin@0x0").is_err());
        assert!(Utils::parse_read_file_info("dump.bin").is_err());
    }
}

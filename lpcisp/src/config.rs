use lpcisp_lib::{AfterOperation, BeforeOperation, ChipType};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// 应用程序的默认配置值
pub struct Defaults;

impl Defaults {
    pub const CHIP: &'static str = "lpc11xx";
    pub const BAUD: u32 = 115200;
    pub const CRYSTAL_KHZ: u32 = 12000;
    pub const BEFORE: &'static str = "default_reset";
    pub const AFTER: &'static str = "no_reset";
    pub const CONNECT_ATTEMPTS: i8 = 3;
    pub const RAM_BUFFER: &'static str = "0x10000400";
    pub const ECHO: bool = true;
}

/// 十六进制字符串，例如 "0x10000400"
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HexString(pub String);

impl HexString {
    pub fn to_u32(&self) -> Result<u32, String> {
        let hex_part = self
            .0
            .strip_prefix("0x")
            .or_else(|| self.0.strip_prefix("0X"))
            .ok_or_else(|| format!("Invalid hex string format: {}", self.0))?;

        u32::from_str_radix(hex_part, 16)
            .map_err(|e| format!("Failed to parse hex string '{}': {}", self.0, e))
    }
}

/// 写入文件配置，HEX 文件可省略地址
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteFlashFileConfig {
    pub path: String,
    pub address: Option<HexString>,
}

/// 读取文件配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadFlashFileConfig {
    pub path: String,
    pub address: HexString,
    pub size: HexString,
}

/// 扇区范围，`end` 省略时只包含 `start`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SectorRangeConfig {
    pub start: u32,
    pub end: Option<u32>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteFlashCommandConfig {
    #[serde(default = "default_true")]
    pub verify: bool,
    #[serde(default = "default_true")]
    pub erase: bool,
    pub files: Vec<WriteFlashFileConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadFlashCommandConfig {
    pub files: Vec<ReadFlashFileConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EraseCommandConfig {
    pub sectors: Vec<SectorRangeConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlankCheckCommandConfig {
    pub sectors: Vec<SectorRangeConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InfoCommandConfig {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoCommandConfig {
    pub address: HexString,
    #[serde(default)]
    pub arm: bool,
}

/// JSON 配置文件的根结构
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LpcIspConfig {
    #[serde(default = "default_chip")]
    pub chip: String,
    pub flash_kib: Option<u32>,
    #[serde(default)]
    pub port: String,
    #[serde(default = "default_baud")]
    pub baud: u32,
    #[serde(default = "default_crystal_khz")]
    pub crystal_khz: u32,
    #[serde(default = "default_before")]
    pub before: String,
    #[serde(default = "default_after")]
    pub after: String,
    #[serde(default = "default_connect_attempts")]
    pub connect_attempts: i8,
    #[serde(default = "default_ram_buffer")]
    pub ram_buffer: HexString,
    #[serde(default = "default_true")]
    pub echo: bool,
    #[serde(default)]
    pub quiet: bool,

    // 命令 - 只能存在其中一个
    pub write_flash: Option<WriteFlashCommandConfig>,
    pub read_flash: Option<ReadFlashCommandConfig>,
    pub erase: Option<EraseCommandConfig>,
    pub blank_check: Option<BlankCheckCommandConfig>,
    pub info: Option<InfoCommandConfig>,
    pub go: Option<GoCommandConfig>,
}

fn default_chip() -> String {
    Defaults::CHIP.to_string()
}
fn default_baud() -> u32 {
    Defaults::BAUD
}
fn default_crystal_khz() -> u32 {
    Defaults::CRYSTAL_KHZ
}
fn default_before() -> String {
    Defaults::BEFORE.to_string()
}
fn default_after() -> String {
    Defaults::AFTER.to_string()
}
fn default_connect_attempts() -> i8 {
    Defaults::CONNECT_ATTEMPTS
}
fn default_ram_buffer() -> HexString {
    HexString(Defaults::RAM_BUFFER.to_string())
}

impl LpcIspConfig {
    /// 从 JSON 文件加载配置
    pub fn from_file(path: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)?;
        let config: LpcIspConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// 创建一个具有所有默认值的配置
    pub fn with_defaults() -> Self {
        Self {
            chip: Defaults::CHIP.to_string(),
            flash_kib: None,
            port: String::new(), // 这将被要求用户提供
            baud: Defaults::BAUD,
            crystal_khz: Defaults::CRYSTAL_KHZ,
            before: Defaults::BEFORE.to_string(),
            after: Defaults::AFTER.to_string(),
            connect_attempts: Defaults::CONNECT_ATTEMPTS,
            ram_buffer: default_ram_buffer(),
            echo: Defaults::ECHO,
            quiet: false,
            write_flash: None,
            read_flash: None,
            erase: None,
            blank_check: None,
            info: None,
            go: None,
        }
    }

    pub fn parse_chip_type(&self) -> Result<ChipType, String> {
        ChipType::from_str(&self.chip).map_err(|_| format!("Invalid chip type: {}", self.chip))
    }

    pub fn parse_before(&self) -> Result<BeforeOperation, String> {
        BeforeOperation::from_str(&self.before)
            .map_err(|_| format!("Invalid before operation: {}", self.before))
    }

    pub fn parse_after(&self) -> Result<AfterOperation, String> {
        AfterOperation::from_str(&self.after)
            .map_err(|_| format!("Invalid after operation: {}", self.after))
    }

    /// 验证配置的有效性
    pub fn validate(&self) -> Result<(), String> {
        let command_count = [
            self.write_flash.is_some(),
            self.read_flash.is_some(),
            self.erase.is_some(),
            self.blank_check.is_some(),
            self.info.is_some(),
            self.go.is_some(),
        ]
        .iter()
        .filter(|&&x| x)
        .count();

        if command_count != 1 {
            return Err("Configuration must contain exactly one command (write_flash, read_flash, erase, blank_check, info, or go)".to_string());
        }

        self.parse_chip_type()?;
        self.parse_before()?;
        self.parse_after()?;
        self.ram_buffer
            .to_u32()
            .map_err(|e| format!("Invalid ram_buffer: {}", e))?;

        if let Some(ref write_flash) = self.write_flash {
            for file in &write_flash.files {
                if let Some(ref addr) = file.address {
                    addr.to_u32().map_err(|e| {
                        format!("Invalid address in write_flash file '{}': {}", file.path, e)
                    })?;
                }
            }
        }

        if let Some(ref read_flash) = self.read_flash {
            for file in &read_flash.files {
                file.address.to_u32().map_err(|e| {
                    format!("Invalid address in read_flash file '{}': {}", file.path, e)
                })?;
                file.size.to_u32().map_err(|e| {
                    format!("Invalid size in read_flash file '{}': {}", file.path, e)
                })?;
            }
        }

        let ranges = self
            .erase
            .as_ref()
            .map(|c| &c.sectors)
            .or(self.blank_check.as_ref().map(|c| &c.sectors));
        if let Some(ranges) = ranges {
            for range in ranges {
                if range.end.is_some_and(|end| end < range.start) {
                    return Err(format!(
                        "Invalid sector range {}:{}",
                        range.start,
                        range.end.unwrap_or(range.start)
                    ));
                }
            }
        }

        if let Some(ref go) = self.go {
            go.address
                .to_u32()
                .map_err(|e| format!("Invalid go address: {}", e))?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_config_with_defaults() {
        let config: LpcIspConfig = serde_json::from_str(
            r#"{
                "port": "/dev/ttyUSB0",
                "write_flash": { "files": [ { "path": "app.bin", "address": "0x1000" } ] }
            }"#,
        )
        .unwrap();

        assert!(config.validate().is_ok());
        assert_eq!(config.parse_chip_type().unwrap(), ChipType::Lpc11xx);
        assert_eq!(config.parse_before().unwrap(), BeforeOperation::DefaultReset);
        assert_eq!(config.parse_after().unwrap(), AfterOperation::NoReset);
        assert_eq!(config.crystal_khz, 12000);
        assert_eq!(config.ram_buffer.to_u32().unwrap(), 0x1000_0400);

        let write = config.write_flash.unwrap();
        assert!(write.verify);
        assert!(write.erase);
    }

    #[test]
    fn loads_config_file() {
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "chip": "LPC17XX",
                "port": "COM4",
                "flash_kib": 256,
                "after": "hard_reset",
                "blank_check": {{ "sectors": [ {{ "start": 1, "end": 21 }} ] }}
            }}"#
        )
        .unwrap();

        let config = LpcIspConfig::from_file(file.path().to_str().unwrap()).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.parse_chip_type().unwrap(), ChipType::Lpc17xx);
        assert_eq!(config.parse_after().unwrap(), AfterOperation::HardReset);
        assert_eq!(config.flash_kib, Some(256));
        assert_eq!(config.blank_check.unwrap().sectors[0].end, Some(21));
    }

    #[test]
    fn rejects_zero_or_multiple_commands() {
        let mut config = LpcIspConfig::with_defaults();
        assert!(config.validate().is_err());

        config.info = Some(InfoCommandConfig {});
        assert!(config.validate().is_ok());

        config.go = Some(GoCommandConfig {
            address: HexString("0x200".to_string()),
            arm: false,
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_bad_values() {
        let mut config = LpcIspConfig::with_defaults();
        config.erase = Some(EraseCommandConfig {
            sectors: vec![SectorRangeConfig {
                start: 4,
                end: Some(2),
            }],
        });
        assert!(config.validate().is_err());

        let mut config = LpcIspConfig::with_defaults();
        config.info = Some(InfoCommandConfig {});
        config.after = "soft_reset".to_string();
        assert!(config.validate().is_err());

        assert!(HexString("1000".to_string()).to_u32().is_err());
        assert_eq!(HexString("0X20".to_string()).to_u32().unwrap(), 0x20);
    }
}

use anyhow::{Result, anyhow, bail};
use clap::{Parser, Subcommand};
use lpcisp_lib::{AfterOperation, BeforeOperation, ChipType};

use crate::config::LpcIspConfig;

/// 合并 CLI 参数与配置文件之后的全局设置
#[derive(Debug, Clone)]
pub struct MergedConfig {
    pub chip: ChipType,
    pub flash_kib: Option<u32>,
    pub port: String,
    pub baud: u32,
    pub crystal_khz: u32,
    pub before: BeforeOperation,
    pub after: AfterOperation,
    pub connect_attempts: i8,
    pub ram_buffer: u32,
    pub echo: bool,
    pub quiet: bool,
}

#[derive(Parser, Debug)]
#[command(author, version, about = "NXP LPC UART ISP tool", long_about = None)]
pub struct Cli {
    /// JSON configuration file path
    #[arg(long = "config", short = 'f')]
    pub config: Option<String>,

    /// Target chip family (default: lpc11xx)
    #[arg(short = 'c', long = "chip", value_enum)]
    pub chip: Option<ChipType>,

    /// Flash size in KiB (default depends on the chip family)
    #[arg(long = "flash-kib")]
    pub flash_kib: Option<u32>,

    /// Serial port device
    #[arg(short = 'p', long = "port")]
    pub port: Option<String>,

    /// Serial port baud rate, the bootloader detects it from the sync character (default: 115200)
    #[arg(short = 'b', long = "baud")]
    pub baud: Option<u32>,

    /// Crystal frequency in kHz (default: 12000)
    #[arg(short = 'x', long = "crystal")]
    pub crystal: Option<u32>,

    /// What to do before connecting to the chip, `default_reset` holds ISP select on RTS
    /// and pulses reset on DTR (default: default_reset)
    #[arg(long = "before", value_enum)]
    pub before: Option<BeforeOperation>,

    /// What to do after lpcisp is finished (default: no_reset)
    #[arg(long = "after", value_enum)]
    pub after: Option<AfterOperation>,

    /// Number of attempts to connect, negative or 0 for infinite (default: 3)
    #[arg(long = "connect-attempts")]
    pub connect_attempts: Option<i8>,

    /// RAM address used to stage data before it is copied to flash (default: 0x10000400)
    #[arg(long = "ram-buffer")]
    pub ram_buffer: Option<String>,

    /// Turn off command echo after synchronizing
    #[arg(long = "no-echo")]
    pub no_echo: bool,

    /// Suppress progress bar output (default: false)
    #[arg(short = 'q', long = "quiet")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Write binary or Intel HEX images to flash
    #[command(name = "write_flash")]
    WriteFlash(WriteFlash),

    /// Read a binary blob from flash
    #[command(name = "read_flash")]
    ReadFlash(ReadFlash),

    /// Erase flash sectors
    #[command(name = "erase")]
    Erase(Erase),

    /// Check whether flash sectors are blank
    #[command(name = "blank_check")]
    BlankCheck(BlankCheck),

    /// Print part ID, boot code version and UID
    #[command(name = "info")]
    Info,

    /// Start executing code at an address
    #[command(name = "go")]
    Go(Go),
}

#[derive(Parser, Debug, Clone)]
#[command(about = "Write binary or Intel HEX images to flash")]
pub struct WriteFlash {
    /// Skip comparing flash with the staged RAM copy after each block
    #[arg(long = "no-verify")]
    pub no_verify: bool,

    /// Do not erase the covered sectors before programming
    #[arg(long = "no-erase")]
    pub no_erase: bool,

    /// Image file (format: <filename@address>, Intel HEX files carry their own addresses)
    #[arg(required = true)]
    pub files: Vec<String>,
}

#[derive(Parser, Debug, Clone)]
#[command(about = "Read a binary blob from flash")]
pub struct ReadFlash {
    /// Binary file (format: <filename@address:size>)
    #[arg(required = true)]
    pub files: Vec<String>,
}

#[derive(Parser, Debug, Clone)]
#[command(about = "Erase flash sectors")]
pub struct Erase {
    /// Sector range (format: <start[:end]>)
    #[arg(required = true)]
    pub sectors: Vec<String>,
}

#[derive(Parser, Debug, Clone)]
#[command(about = "Check whether flash sectors are blank")]
pub struct BlankCheck {
    /// Sector range (format: <start[:end]>)
    #[arg(required = true)]
    pub sectors: Vec<String>,
}

#[derive(Parser, Debug, Clone)]
#[command(about = "Start executing code at an address")]
pub struct Go {
    /// Start address (at least 0x200)
    pub address: String,

    /// Execute in ARM mode instead of Thumb
    #[arg(long = "arm")]
    pub arm: bool,
}

/// Merge CLI arguments with configuration file, CLI args take precedence
pub fn merge_config(args: &Cli, config: Option<LpcIspConfig>) -> Result<MergedConfig> {
    let base_config = config.unwrap_or_else(LpcIspConfig::with_defaults);

    let chip = match args.chip {
        Some(chip) => chip,
        None => base_config
            .parse_chip_type()
            .map_err(|e| anyhow!("Invalid chip type in config: {}", e))?,
    };

    let before = match args.before {
        Some(before) => before,
        None => base_config
            .parse_before()
            .map_err(|e| anyhow!("Invalid before operation in config: {}", e))?,
    };

    let after = match args.after {
        Some(after) => after,
        None => base_config
            .parse_after()
            .map_err(|e| anyhow!("Invalid after operation in config: {}", e))?,
    };

    let ram_buffer = match &args.ram_buffer {
        Some(addr) => lpcisp_lib::utils::Utils::parse_address(addr)?,
        None => base_config
            .ram_buffer
            .to_u32()
            .map_err(|e| anyhow!("Invalid ram_buffer in config: {}", e))?,
    };

    let port = args
        .port
        .clone()
        .unwrap_or_else(|| base_config.port.clone());
    if port.is_empty() {
        bail!("Port must be specified either via --port or in config file");
    }

    Ok(MergedConfig {
        chip,
        flash_kib: args.flash_kib.or(base_config.flash_kib),
        port,
        baud: args.baud.unwrap_or(base_config.baud),
        crystal_khz: args.crystal.unwrap_or(base_config.crystal_khz),
        before,
        after,
        connect_attempts: args
            .connect_attempts
            .unwrap_or(base_config.connect_attempts),
        ram_buffer,
        echo: !args.no_echo && base_config.echo,
        quiet: args.quiet || base_config.quiet,
    })
}

/// Determine which command to execute from CLI args or config file
#[derive(Debug)]
#[allow(clippy::large_enum_variant)]
pub enum CommandSource {
    Cli(Commands),
    Config(LpcIspConfig),
}

pub fn get_command_source(args: &Cli, config: Option<LpcIspConfig>) -> Result<CommandSource> {
    match (&args.command, &config) {
        (Some(cmd), _) => Ok(CommandSource::Cli(cmd.clone())),
        (None, Some(cfg)) => Ok(CommandSource::Config(cfg.clone())),
        (None, None) => {
            bail!("No command specified. Use a subcommand or provide a config file with a command.")
        }
    }
}

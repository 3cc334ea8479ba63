mod cli;
mod config;
mod config_exec;
mod progress;
mod report;
mod serial;

use anyhow::{Context, Result, anyhow, bail};
use clap::Parser;
use lpcisp_lib::transport::DEFAULT_READ_TIMEOUT;
use lpcisp_lib::utils::Utils;
use lpcisp_lib::{CancelHandle, ExecMode, LpcIspTool, LpcIspToolBase};
use std::path::Path;
use std::process;

use crate::cli::{Cli, CommandSource, Commands, MergedConfig, get_command_source, merge_config};
use crate::config::LpcIspConfig;

fn main() {
    // RUST_LOG=debug, RUST_LOG=lpcisp_lib=trace
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("off"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    if let Err(e) = run() {
        eprintln!("Error: {:?}", e);
        process::exit(1);
    }
}

fn run() -> Result<()> {
    let args = Cli::parse();

    let config = match &args.config {
        Some(path) => {
            let config = LpcIspConfig::from_file(path)
                .map_err(|e| anyhow!("Failed to load config file {}: {}", path, e))?;
            config
                .validate()
                .map_err(|e| anyhow!("Invalid config file {}: {}", path, e))?;
            Some(config)
        }
        None => None,
    };

    let command = get_command_source(&args, config.clone())?;
    let mut merged = merge_config(&args, config)?;
    merged.port = serial::normalize_port_name(&merged.port);
    serial::check_port_available(&merged.port)?;

    let mut tool = connect(&merged)?;

    let res = match command {
        CommandSource::Cli(cmd) => execute_cli_command(cmd, &mut tool),
        CommandSource::Config(cfg) => config_exec::execute_config_command(&cfg, &mut tool),
    };

    let finished = tool.finish().context("Failed to run after operation");
    res?;
    finished
}

/// 按 connect_attempts 重试连接，<= 0 表示无限重试
fn connect(merged: &MergedConfig) -> Result<LpcIspTool> {
    let base = LpcIspToolBase {
        port_name: merged.port.clone(),
        chip: merged.chip,
        flash_kib: merged.flash_kib,
        crystal_khz: merged.crystal_khz,
        baud: merged.baud,
        before: merged.before,
        after: merged.after,
        connect_attempts: merged.connect_attempts,
        ram_buffer: merged.ram_buffer,
        echo: merged.echo,
        quiet: merged.quiet,
        read_timeout: DEFAULT_READ_TIMEOUT,
        progress_callback: progress::create_progress_callback(merged.quiet),
    };
    let cancel = CancelHandle::new();

    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        match LpcIspTool::connect(base.clone(), cancel.clone(), attempt) {
            Ok(tool) => return Ok(tool),
            Err(lpcisp_lib::Error::Cancelled) => bail!("Connection cancelled"),
            Err(e) => {
                if merged.connect_attempts > 0 && attempt >= merged.connect_attempts as u32 {
                    return Err(e).with_context(|| {
                        format!("Failed to connect to {} after {} attempts", merged.port, attempt)
                    });
                }
                tracing::warn!("connect attempt {} failed: {}", attempt, e);
            }
        }
    }
}

fn execute_cli_command(command: Commands, tool: &mut LpcIspTool) -> Result<()> {
    match command {
        Commands::WriteFlash(params) => {
            let mut files = Vec::new();
            for file_str in params.files.iter() {
                let (path, address) = Utils::parse_file_info(file_str)
                    .with_context(|| format!("Failed to parse file {}", file_str))?;
                let mut parsed = Utils::load_image(Path::new(&path), address)
                    .with_context(|| format!("Failed to load image {}", path))?;
                files.append(&mut parsed);
            }

            let write_params = lpcisp_lib::WriteFlashParams {
                files,
                verify: !params.no_verify,
                erase: !params.no_erase,
            };
            tool.write_flash(&write_params)
                .context("Failed to execute write_flash command")
        }
        Commands::ReadFlash(params) => {
            let files = params
                .files
                .iter()
                .map(|file_str| {
                    Utils::parse_read_file_info(file_str)
                        .with_context(|| format!("Failed to parse read file {}", file_str))
                })
                .collect::<Result<Vec<_>>>()?;

            tool.read_flash(&lpcisp_lib::ReadFlashParams { files })
                .context("Failed to execute read_flash command")
        }
        Commands::Erase(params) => {
            let ranges = parse_ranges(&params.sectors)?;
            tool.erase_sectors(&lpcisp_lib::EraseParams { ranges })
                .context("Failed to execute erase command")
        }
        Commands::BlankCheck(params) => {
            let ranges = parse_ranges(&params.sectors)?;
            let results = tool
                .blank_check(&lpcisp_lib::BlankCheckParams { ranges })
                .context("Failed to execute blank_check command")?;
            report::print_blank_check(&results);
            Ok(())
        }
        Commands::Info => {
            let info = tool.info().context("Failed to execute info command")?;
            report::print_device_info(&info);
            Ok(())
        }
        Commands::Go(params) => {
            let address = Utils::parse_address(&params.address)
                .with_context(|| format!("Failed to parse go address {}", params.address))?;
            let mode = if params.arm {
                ExecMode::Arm
            } else {
                ExecMode::Thumb
            };
            tool.go(address, mode).context("Failed to execute go command")
        }
    }
}

fn parse_ranges(specs: &[String]) -> Result<Vec<lpcisp_lib::SectorRange>> {
    specs
        .iter()
        .map(|spec| {
            Utils::parse_sector_range(spec)
                .with_context(|| format!("Failed to parse sector range {}", spec))
        })
        .collect()
}

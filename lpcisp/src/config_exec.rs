use anyhow::{Context, Result, anyhow, bail};
use lpcisp_lib::{ExecMode, LpcIspTool, SectorRange};
use std::path::Path;

use crate::config::{LpcIspConfig, SectorRangeConfig};

fn sector_ranges(ranges: &[SectorRangeConfig]) -> Result<Vec<SectorRange>> {
    ranges
        .iter()
        .map(|range| {
            SectorRange::new(range.start, range.end.unwrap_or(range.start))
                .with_context(|| format!("Invalid sector range starting at {}", range.start))
        })
        .collect()
}

/// Execute command from config file
pub fn execute_config_command(config: &LpcIspConfig, tool: &mut LpcIspTool) -> Result<()> {
    if let Some(ref write_flash) = config.write_flash {
        let mut parsed_files = Vec::new();
        for file in write_flash.files.iter() {
            let address = match &file.address {
                Some(addr) => Some(addr.to_u32().map_err(|e| {
                    anyhow!("Invalid write_flash address '{}': {}", addr.0, e)
                })?),
                None => None,
            };
            let mut parsed = lpcisp_lib::utils::Utils::load_image(Path::new(&file.path), address)
                .with_context(|| format!("Failed to parse file {}", file.path))?;
            parsed_files.append(&mut parsed);
        }

        let write_params = lpcisp_lib::WriteFlashParams {
            files: parsed_files,
            verify: write_flash.verify,
            erase: write_flash.erase,
        };
        tool.write_flash(&write_params)
            .context("Failed to execute write_flash command")
    } else if let Some(ref read_flash) = config.read_flash {
        let mut parsed_files = Vec::new();
        for file in read_flash.files.iter() {
            let address = file
                .address
                .to_u32()
                .map_err(|e| anyhow!("Invalid read_flash address '{}': {}", file.address.0, e))?;
            let size = file
                .size
                .to_u32()
                .map_err(|e| anyhow!("Invalid read_flash size '{}': {}", file.size.0, e))?;
            parsed_files.push(lpcisp_lib::ReadFlashFile {
                file_path: file.path.clone(),
                address,
                size,
            });
        }

        let read_params = lpcisp_lib::ReadFlashParams {
            files: parsed_files,
        };
        tool.read_flash(&read_params)
            .context("Failed to execute read_flash command")
    } else if let Some(ref erase) = config.erase {
        let erase_params = lpcisp_lib::EraseParams {
            ranges: sector_ranges(&erase.sectors)?,
        };
        tool.erase_sectors(&erase_params)
            .context("Failed to execute erase command")
    } else if let Some(ref blank_check) = config.blank_check {
        let params = lpcisp_lib::BlankCheckParams {
            ranges: sector_ranges(&blank_check.sectors)?,
        };
        let results = tool
            .blank_check(&params)
            .context("Failed to execute blank_check command")?;
        crate::report::print_blank_check(&results);
        Ok(())
    } else if config.info.is_some() {
        let info = tool.info().context("Failed to execute info command")?;
        crate::report::print_device_info(&info);
        Ok(())
    } else if let Some(ref go) = config.go {
        let address = go
            .address
            .to_u32()
            .map_err(|e| anyhow!("Invalid go address '{}': {}", go.address.0, e))?;
        let mode = if go.arm { ExecMode::Arm } else { ExecMode::Thumb };
        tool.go(address, mode).context("Failed to execute go command")
    } else {
        bail!("No valid command found in config file.")
    }
}

use crate::progress::{ProgressHelper, ProgressOperation, ProgressStatus};
use crate::error::SequencingError;
use crate::layout::SectorRange;
use crate::session::{ALLOWED_BLOCK_SIZES, FLASH_WRITE_ALIGNMENT, IspSession};
use crate::transport::LineTransport;
use crate::utils::WriteFlashFile;
use crate::{Error, Result};

/// 写入流程的参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteOptions {
    /// RAM 暂存区地址
    pub ram_buffer: u32,
    /// 每次 `C` 命令写入的字节数
    pub block_size: u32,
    pub erase: bool,
    pub verify: bool,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            ram_buffer: crate::DEFAULT_RAM_BUFFER,
            block_size: 1024,
            erase: true,
            verify: true,
        }
    }
}

/// Flash 写入：RAM 暂存 → prepare → copy → compare
pub struct FlashWriter;

impl FlashWriter {
    /// 能容纳 `remaining` 字节且不超过 `room` 的最小合法块；
    /// 放不下时取 `room` 内最大的合法块，剩余部分留给下一块
    fn block_for(remaining: usize, block_size: u32, room: u64) -> Option<u32> {
        let fits = |size: u32| size <= block_size && size as u64 <= room;
        ALLOWED_BLOCK_SIZES
            .iter()
            .copied()
            .find(|&size| size as usize >= remaining && fits(size))
            .or_else(|| ALLOWED_BLOCK_SIZES.iter().rev().copied().find(|&size| fits(size)))
    }

    /// 镜像覆盖的扇区，以及这些扇区结束处的地址。块的 0xFF 填充不能越过该地址
    fn covered<T: LineTransport>(
        session: &IspSession<T>,
        file: &WriteFlashFile,
    ) -> Result<(SectorRange, u64)> {
        let layout = session.layout();
        let range = layout.sectors_for(file.address, file.data.len() as u32)?;
        let end = layout
            .range_end(&range)
            .ok_or(SequencingError::SectorOutOfRange {
                sector: range.end(),
                count: layout.sector_count(),
            })?;
        Ok((range, end))
    }

    /// 写入前的本地检查，不产生任何设备交互
    pub fn check_file<T: LineTransport>(
        session: &IspSession<T>,
        file: &WriteFlashFile,
        options: &WriteOptions,
    ) -> Result<()> {
        if !ALLOWED_BLOCK_SIZES.contains(&options.block_size) {
            return Err(Error::invalid_input(format!(
                "block size {} is not one of {:?}",
                options.block_size, ALLOWED_BLOCK_SIZES
            )));
        }
        if file.address % FLASH_WRITE_ALIGNMENT != 0 {
            return Err(Error::invalid_input(format!(
                "image address 0x{:08X} is not {}-byte aligned",
                file.address, FLASH_WRITE_ALIGNMENT
            )));
        }
        if file.data.is_empty() {
            return Err(Error::invalid_input(format!(
                "image at 0x{:08X} is empty",
                file.address
            )));
        }
        let len = u32::try_from(file.data.len()).map_err(|_| {
            Error::invalid_input(format!("image at 0x{:08X} is too large", file.address))
        })?;
        let layout = session.layout();
        let range = layout.sectors_for(file.address, len)?;
        layout.check_mutable(&range)?;
        Ok(())
    }

    /// 擦除镜像覆盖的全部扇区
    pub fn erase_covered<T: LineTransport>(
        session: &mut IspSession<T>,
        progress: &ProgressHelper,
        file: &WriteFlashFile,
    ) -> Result<()> {
        let (range, _) = Self::covered(session, file)?;
        let spinner = progress.create_spinner(ProgressOperation::Erase {
            start: range.start(),
            end: range.end(),
        });
        session.prepare_for_write(range)?;
        session.erase(range)?;
        spinner.finish(ProgressStatus::Success);
        Ok(())
    }

    /// 写入单个镜像
    pub fn write_file<T: LineTransport>(
        session: &mut IspSession<T>,
        progress: &ProgressHelper,
        file: &WriteFlashFile,
        options: &WriteOptions,
    ) -> Result<()> {
        Self::check_file(session, file, options)?;
        session.unlock()?;

        if options.erase {
            Self::erase_covered(session, progress, file)?;
        }

        let bar = progress.create_bar(
            file.data.len() as u64,
            ProgressOperation::WriteFlash {
                address: file.address,
                size: file.data.len() as u64,
            },
        );

        let (_, covered_end) = Self::covered(session, file)?;
        let mut offset = 0usize;
        while offset < file.data.len() {
            let remaining = file.data.len() - offset;
            let flash_address = file.address + offset as u32;
            let room = covered_end - flash_address as u64;
            let block = Self::block_for(remaining, options.block_size, room).ok_or_else(|| {
                Error::invalid_input(format!(
                    "no allowed block size fits the 0x{:X} bytes left at 0x{:08X}",
                    room, flash_address
                ))
            })?;
            let take = remaining.min(block as usize);
            let range = session.layout().sectors_for(flash_address, block)?;

            let mut staged = file.data[offset..offset + take].to_vec();
            staged.resize(block as usize, 0xFF);

            tracing::debug!(
                "Writing {} bytes at 0x{:08X} via RAM 0x{:08X}",
                block,
                flash_address,
                options.ram_buffer
            );

            session.write_to_ram(options.ram_buffer, &staged)?;
            session.prepare_for_write(range)?;
            session.write_to_flash(flash_address, options.ram_buffer, block)?;
            if options.verify {
                session.compare(flash_address, options.ram_buffer, block)?;
            }

            offset += take;
            bar.inc(take as u64);
        }

        bar.finish(ProgressStatus::Success);
        Ok(())
    }

    /// 写入全部镜像。所有镜像先做本地检查，任何一个不合法都不会触碰设备
    pub fn write_image<T: LineTransport>(
        session: &mut IspSession<T>,
        progress: &ProgressHelper,
        files: &[WriteFlashFile],
        options: &WriteOptions,
    ) -> Result<()> {
        for file in files {
            Self::check_file(session, file, options)?;
        }
        for file in files {
            Self::write_file(session, progress, file, options)?;
        }
        Ok(())
    }
}

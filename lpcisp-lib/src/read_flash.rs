use crate::progress::{ProgressHelper, ProgressOperation, ProgressStatus};
use crate::session::IspSession;
use crate::transport::LineTransport;
use crate::utils::ReadFlashFile;
use crate::{Error, Result};
use std::fs::File;
use std::io::Write;

/// 通用的Flash读取操作实现
pub struct FlashReader;

impl FlashReader {
    /// 单次 `R` 命令读取的字节数
    pub const READ_CHUNK_SIZE: u32 = 4096;

    /// 读取到内存
    pub fn read_to_vec<T: LineTransport>(
        session: &mut IspSession<T>,
        progress: &ProgressHelper,
        address: u32,
        size: u32,
    ) -> Result<Vec<u8>> {
        if size % 4 != 0 || address % 4 != 0 {
            return Err(Error::invalid_input(format!(
                "read of 0x{:X} bytes at 0x{:08X} must be word aligned",
                size, address
            )));
        }
        if address as u64 + size as u64 > 1 << 32 {
            return Err(Error::invalid_input(format!(
                "read of 0x{:X} bytes at 0x{:08X} runs past the end of the address space",
                size, address
            )));
        }

        let bar = progress.create_bar(size as u64, ProgressOperation::ReadFlash { address, size });
        let mut data = Vec::with_capacity(size as usize);
        let mut offset = 0u32;
        while offset < size {
            let chunk = (size - offset).min(Self::READ_CHUNK_SIZE);
            let bytes = session.read_memory(address + offset, chunk)?;
            data.extend_from_slice(&bytes);
            offset += chunk;
            bar.inc(chunk as u64);
        }
        bar.finish(ProgressStatus::Success);
        Ok(data)
    }

    /// 读取并写入文件。读取完成前不会创建输出文件
    pub fn read_image<T: LineTransport>(
        session: &mut IspSession<T>,
        progress: &ProgressHelper,
        file: &ReadFlashFile,
    ) -> Result<()> {
        let data = Self::read_to_vec(session, progress, file.address, file.size)?;
        let mut output_file = File::create(&file.file_path)?;
        output_file.write_all(&data)?;
        tracing::info!(
            "Saved 0x{:X} bytes from 0x{:08X} to {}",
            data.len(),
            file.address,
            file.file_path
        );
        Ok(())
    }
}

pub mod codec;
pub mod command;
pub mod erase_flash;
pub mod error;
pub mod layout;
pub mod progress;
pub mod read_flash;
pub mod session;
pub mod status;
pub mod sync;
pub mod transport;
pub mod utils;
pub mod write_flash;

pub use crate::command::ExecMode;
pub use crate::error::{Error, ErrorCategory, Result, SequencingError};
pub use crate::layout::{FlashLayout, SectorRange};
pub use crate::session::{
    BlankCheck, BootCodeVersion, CancelHandle, IspConfig, IspSession, SessionState,
};
pub use crate::status::StatusCode;
pub use crate::transport::{LineTransport, SerialTransport};
pub use crate::utils::{ReadFlashFile, WriteFlashFile};

use crate::erase_flash::EraseOps;
use crate::progress::{ProgressCallbackArc, ProgressHelper, ProgressOperation, ProgressStatus};
use crate::read_flash::FlashReader;
use crate::write_flash::{FlashWriter, WriteOptions};
use std::time::Duration;
use strum::{Display, EnumString};

/// 默认的 RAM 暂存区，位于 ISP 使用的 RAM 区域之后
pub const DEFAULT_RAM_BUFFER: u32 = 0x1000_0400;

#[derive(Display, EnumString, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
#[strum(ascii_case_insensitive)]
pub enum ChipType {
    /// LPC111x / LPC11Cxx
    #[strum(to_string = "LPC11XX")]
    #[cfg_attr(feature = "cli", clap(name = "lpc11xx"))]
    Lpc11xx,
    #[strum(to_string = "LPC13XX")]
    #[cfg_attr(feature = "cli", clap(name = "lpc13xx"))]
    Lpc13xx,
    #[strum(to_string = "LPC17XX")]
    #[cfg_attr(feature = "cli", clap(name = "lpc17xx"))]
    Lpc17xx,
}

impl ChipType {
    pub fn default_flash_kib(&self) -> u32 {
        match self {
            ChipType::Lpc11xx | ChipType::Lpc13xx => 32,
            ChipType::Lpc17xx => 512,
        }
    }

    pub fn layout(&self, flash_kib: Option<u32>) -> FlashLayout {
        let flash_kib = flash_kib.unwrap_or_else(|| self.default_flash_kib());
        match self {
            ChipType::Lpc11xx | ChipType::Lpc13xx => FlashLayout::lpc11xx(flash_kib),
            ChipType::Lpc17xx => FlashLayout::lpc17xx(flash_kib),
        }
    }
}

#[derive(Display, EnumString, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
pub enum BeforeOperation {
    #[strum(serialize = "no_reset")]
    #[cfg_attr(feature = "cli", clap(name = "no_reset"))]
    NoReset,
    /// 通过 RTS（ISP 选择）和 DTR（复位）进入 ISP
    #[strum(serialize = "default_reset")]
    #[cfg_attr(feature = "cli", clap(name = "default_reset"))]
    DefaultReset,
}

#[derive(Display, EnumString, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
pub enum AfterOperation {
    #[strum(serialize = "no_reset")]
    #[cfg_attr(feature = "cli", clap(name = "no_reset"))]
    NoReset,
    /// 释放 ISP 选择脚后复位，运行用户程序
    #[strum(serialize = "hard_reset")]
    #[cfg_attr(feature = "cli", clap(name = "hard_reset"))]
    HardReset,
}

#[derive(Clone)]
pub struct LpcIspToolBase {
    pub port_name: String,
    pub chip: ChipType,
    pub flash_kib: Option<u32>,
    pub crystal_khz: u32,
    pub baud: u32,
    pub before: BeforeOperation,
    pub after: AfterOperation,
    /// 由调用方负责重试，库只做单次连接
    pub connect_attempts: i8,
    pub ram_buffer: u32,
    pub echo: bool,
    pub quiet: bool,
    pub read_timeout: Duration,
    pub progress_callback: ProgressCallbackArc,
}

impl LpcIspToolBase {
    pub fn isp_config(&self, cancel: CancelHandle) -> IspConfig {
        IspConfig {
            crystal_khz: self.crystal_khz,
            echo: self.echo,
            layout: self.chip.layout(self.flash_kib),
            cancel,
            ..IspConfig::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct WriteFlashParams {
    pub files: Vec<WriteFlashFile>,
    pub verify: bool,
    pub erase: bool,
}

#[derive(Debug, Clone)]
pub struct ReadFlashParams {
    pub files: Vec<ReadFlashFile>,
}

#[derive(Debug, Clone)]
pub struct EraseParams {
    pub ranges: Vec<SectorRange>,
}

#[derive(Debug, Clone)]
pub struct BlankCheckParams {
    pub ranges: Vec<SectorRange>,
}

/// `info` 命令读到的设备信息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub part_id: u32,
    pub boot_code_version: BootCodeVersion,
    pub uid: [u32; 4],
}

/// 串口上的一次完整 ISP 操作：打开串口、进入 ISP、同步，然后执行命令
pub struct LpcIspTool {
    session: IspSession<SerialTransport>,
    base: LpcIspToolBase,
    progress: ProgressHelper,
}

impl LpcIspTool {
    /// 单次连接尝试。失败时串口随之关闭
    pub fn connect(base: LpcIspToolBase, cancel: CancelHandle, attempt: u32) -> Result<Self> {
        let progress = ProgressHelper::new(base.progress_callback.clone(), 0);
        let spinner = progress.create_spinner(ProgressOperation::Connect { attempt });

        let mut transport = SerialTransport::open(&base.port_name, base.baud, base.read_timeout)?;
        if base.before == BeforeOperation::DefaultReset {
            transport.enter_isp()?;
        }

        let session = match IspSession::connect(transport, base.isp_config(cancel)) {
            Ok(session) => session,
            Err(e) => {
                spinner.finish(ProgressStatus::Failed(e.to_string()));
                return Err(e);
            }
        };
        spinner.finish_with_message("Connected");

        Ok(Self {
            session,
            base,
            progress,
        })
    }

    pub fn session(&mut self) -> &mut IspSession<SerialTransport> {
        &mut self.session
    }

    pub fn progress(&self) -> &ProgressHelper {
        &self.progress
    }

    pub fn base(&self) -> &LpcIspToolBase {
        &self.base
    }

    pub fn write_flash(&mut self, params: &WriteFlashParams) -> Result<()> {
        let options = WriteOptions {
            ram_buffer: self.base.ram_buffer,
            erase: params.erase,
            verify: params.verify,
            ..WriteOptions::default()
        };
        FlashWriter::write_image(&mut self.session, &self.progress, &params.files, &options)
    }

    pub fn read_flash(&mut self, params: &ReadFlashParams) -> Result<()> {
        for file in &params.files {
            FlashReader::read_image(&mut self.session, &self.progress, file)?;
        }
        Ok(())
    }

    pub fn erase_sectors(&mut self, params: &EraseParams) -> Result<()> {
        for range in &params.ranges {
            EraseOps::erase_sectors(&mut self.session, &self.progress, *range)?;
        }
        Ok(())
    }

    pub fn blank_check(&mut self, params: &BlankCheckParams) -> Result<Vec<(SectorRange, BlankCheck)>> {
        let mut results = Vec::with_capacity(params.ranges.len());
        for range in &params.ranges {
            let result = EraseOps::blank_check(&mut self.session, &self.progress, *range)?;
            results.push((*range, result));
        }
        Ok(results)
    }

    pub fn info(&mut self) -> Result<DeviceInfo> {
        let spinner = self.progress.create_spinner(ProgressOperation::ReadInfo);
        let info = DeviceInfo {
            part_id: self.session.read_part_id()?,
            boot_code_version: self.session.read_boot_code_version()?,
            uid: self.session.read_uid()?,
        };
        spinner.finish(ProgressStatus::Success);
        Ok(info)
    }

    pub fn go(&mut self, address: u32, mode: ExecMode) -> Result<()> {
        let spinner = self
            .progress
            .create_spinner(ProgressOperation::Execute { address });
        self.session.unlock()?;
        self.session.execute(address, mode)?;
        spinner.finish(ProgressStatus::Success);
        Ok(())
    }

    /// 执行 after 操作并关闭串口
    pub fn finish(self) -> Result<()> {
        let after = self.base.after;
        let mut transport = self.session.into_transport();
        if after == AfterOperation::HardReset {
            transport.reset_to_user()?;
        }
        Ok(())
    }
}

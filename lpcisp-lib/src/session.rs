//! ISP 会话
//!
//! [`IspSession`] 独占一个 [`LineTransport`]，按设备要求的顺序组合命令：
//! unlock → prepare → erase/copy → compare → go。所有本地可判定的错误
//! （未 prepare、扇区 0、对齐、块大小等）都在写出任何字节之前返回。

use crate::codec::{BlockDecoder, TransferCodec, UU_LINE_BYTES};
use crate::command::{Command, CommandChannel, ExecMode, Reply};
use crate::error::{ErrorCategory, SequencingError};
use crate::layout::{FlashLayout, SectorRange};
use crate::status::StatusCode;
use crate::sync::SyncNegotiator;
use crate::transport::LineTransport;
use crate::{Error, Result};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// `C` 命令允许的字节数
pub const ALLOWED_BLOCK_SIZES: [u32; 4] = [256, 512, 1024, 4096];

/// `B` 命令允许的波特率
pub const VALID_BAUD_RATES: [u32; 5] = [9600, 19200, 38400, 57600, 115200];

/// `G` 命令允许的最低地址
pub const MIN_EXECUTE_ADDRESS: u32 = 0x200;

pub const FLASH_WRITE_ALIGNMENT: u32 = 256;
pub const WORD_ALIGNMENT: u32 = 4;

/// 取消标志。只在写出命令之前检查，已发出的命令会等到响应或超时
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct IspConfig {
    /// 晶振频率 (kHz)
    pub crystal_khz: u32,
    /// 为 false 时同步后发送 `A 0` 关闭回显
    pub echo: bool,
    pub lines_per_block: usize,
    pub max_resends: u8,
    pub layout: FlashLayout,
    pub cancel: CancelHandle,
}

impl Default for IspConfig {
    fn default() -> Self {
        Self {
            crystal_khz: 12000,
            echo: true,
            lines_per_block: crate::codec::UU_LINES_PER_BLOCK,
            max_resends: 3,
            layout: FlashLayout::default(),
            cancel: CancelHandle::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Unsynchronized,
    Synchronized,
    Unlocked,
    Prepared(SectorRange),
    Idle,
    /// `G` 成功后设备不再处于 ISP 命令处理器中
    ProgramRunning,
}

impl SessionState {
    fn is_unlocked(&self) -> bool {
        matches!(
            self,
            SessionState::Unlocked | SessionState::Prepared(_) | SessionState::Idle
        )
    }
}

/// 查空结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlankCheck {
    Blank,
    /// 扇区 0 的前 64 字节被映射到 boot block，总是报告非空，这是正常的
    BootRemapped { offset: u32, value: u32 },
    NotBlank { sector: u32, offset: u32, value: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootCodeVersion {
    pub major: u32,
    pub minor: u32,
}

impl fmt::Display for BootCodeVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

pub struct IspSession<T: LineTransport> {
    channel: CommandChannel<T>,
    config: IspConfig,
    codec: TransferCodec,
    state: SessionState,
    crp_enabled: bool,
}

impl<T: LineTransport> IspSession<T> {
    /// 创建未同步的会话
    pub fn new(transport: T, config: IspConfig) -> Self {
        Self {
            channel: CommandChannel::new(transport),
            codec: TransferCodec::new(config.lines_per_block),
            config,
            state: SessionState::Unsynchronized,
            crp_enabled: false,
        }
    }

    /// 创建会话并完成握手。失败时传输层随会话一起释放
    pub fn connect(transport: T, config: IspConfig) -> Result<Self> {
        let mut session = Self::new(transport, config);
        session.synchronize()?;
        Ok(session)
    }

    pub fn synchronize(&mut self) -> Result<()> {
        if self.config.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        self.state = SessionState::Unsynchronized;
        SyncNegotiator::new(self.config.crystal_khz).run(self.channel.transport_mut())?;
        self.channel.set_echo(true);
        self.state = SessionState::Synchronized;
        if !self.config.echo {
            self.set_echo(false)?;
        }
        Ok(())
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn config(&self) -> &IspConfig {
        &self.config
    }

    pub fn layout(&self) -> &FlashLayout {
        &self.config.layout
    }

    pub fn crp_enabled(&self) -> bool {
        self.crp_enabled
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.config.cancel.clone()
    }

    pub fn transport_mut(&mut self) -> &mut T {
        self.channel.transport_mut()
    }

    /// 结束会话并释放传输层
    pub fn close(self) {
        tracing::debug!("Closing ISP session in state {:?}", self.state);
    }

    pub fn into_transport(self) -> T {
        self.channel.into_transport()
    }

    fn preflight(&self) -> Result<()> {
        match self.state {
            SessionState::Unsynchronized => return Err(SequencingError::NotSynchronized.into()),
            SessionState::ProgramRunning => return Err(SequencingError::ProgramRunning.into()),
            _ => (),
        }
        if self.config.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(())
    }

    fn require_unlocked(&self) -> Result<()> {
        if self.state.is_unlocked() {
            Ok(())
        } else {
            Err(SequencingError::NotUnlocked.into())
        }
    }

    fn require_prepared(&self, requested: SectorRange) -> Result<()> {
        match &self.state {
            SessionState::Prepared(prepared) if prepared.contains(&requested) => Ok(()),
            SessionState::Prepared(prepared) => Err(SequencingError::SectorNotPreparedForWrite {
                requested,
                prepared: Some(*prepared),
            }
            .into()),
            _ => Err(SequencingError::SectorNotPreparedForWrite {
                requested,
                prepared: None,
            }
            .into()),
        }
    }

    fn require_crp_disabled(&self) -> Result<()> {
        if self.crp_enabled {
            return Err(SequencingError::CodeReadProtected.into());
        }
        Ok(())
    }

    fn check_aligned(address: u32, alignment: u32) -> Result<()> {
        if address % alignment != 0 {
            return Err(SequencingError::MisalignedAddress { address, alignment }.into());
        }
        Ok(())
    }

    fn check_count(count: u32) -> Result<()> {
        if count % 4 != 0 {
            return Err(SequencingError::InvalidCount(count).into());
        }
        Ok(())
    }

    /// 记录 CRP 状态，协议错误后要求重新同步
    fn observe<R>(&mut self, result: Result<R>) -> Result<R> {
        match &result {
            Err(e) if e.status() == Some(StatusCode::CodeReadProtectionEnabled) => {
                tracing::warn!("Device reports code read protection enabled");
                self.crp_enabled = true;
            }
            Err(e) if matches!(e.category(), ErrorCategory::Protocol | ErrorCategory::Checksum) => {
                tracing::warn!("Session desynchronized: {}", e);
                self.state = SessionState::Unsynchronized;
            }
            _ => (),
        }
        result
    }

    fn exchange(&mut self, cmd: &Command) -> Result<Reply> {
        let result = self.channel.exchange(cmd);
        if let Ok(reply) = &result
            && reply.status == StatusCode::CodeReadProtectionEnabled
        {
            self.crp_enabled = true;
        }
        self.observe(result)
    }

    fn send(&mut self, cmd: &Command) -> Result<Vec<String>> {
        let result = self.channel.send(cmd);
        self.observe(result)
    }

    /// 解锁 Flash 写、擦除和 `G` 命令。重复调用不改变状态
    pub fn unlock(&mut self) -> Result<()> {
        self.preflight()?;
        if self.state.is_unlocked() {
            tracing::debug!("Already unlocked");
            return Ok(());
        }
        self.send(&Command::Unlock)?;
        self.state = SessionState::Unlocked;
        Ok(())
    }

    pub fn set_baud_rate(&mut self, baud: u32, stop_bits: u8) -> Result<()> {
        self.preflight()?;
        if !VALID_BAUD_RATES.contains(&baud) {
            return Err(SequencingError::InvalidBaudRate(baud).into());
        }
        if !(1..=2).contains(&stop_bits) {
            return Err(SequencingError::InvalidStopBits(stop_bits).into());
        }
        self.send(&Command::SetBaudRate { baud, stop_bits })?;
        self.channel.transport_mut().set_baud_rate(baud)?;
        tracing::info!("Baud rate switched to {}", baud);
        Ok(())
    }

    /// `A` 命令本身的回显仍按旧设置处理
    pub fn set_echo(&mut self, on: bool) -> Result<()> {
        self.preflight()?;
        self.send(&Command::Echo { flag: on as u8 })?;
        self.channel.set_echo(on);
        Ok(())
    }

    /// 下载数据到 RAM
    pub fn write_to_ram(&mut self, address: u32, data: &[u8]) -> Result<()> {
        self.preflight()?;
        self.require_crp_disabled()?;
        let len = u32::try_from(data.len()).map_err(|_| {
            Error::invalid_input(format!("0x{:X} bytes do not fit one W command", data.len()))
        })?;
        Self::check_aligned(address, WORD_ALIGNMENT)?;
        Self::check_count(len)?;

        self.send(&Command::WriteToRam { address, len })?;
        let result = self.send_blocks(data);
        self.observe(result)
    }

    fn send_blocks(&mut self, data: &[u8]) -> Result<()> {
        for (index, block) in self.codec.encode_blocks(data).iter().enumerate() {
            let mut attempts = 0u8;
            loop {
                for line in &block.lines {
                    self.channel.write_line(line)?;
                }
                self.channel.write_line(&block.checksum.to_string())?;

                let answer = self.channel.read_line()?;
                match answer.as_str() {
                    "OK" => break,
                    "RESEND" => {
                        attempts += 1;
                        tracing::warn!("Device requested resend of block {}", index);
                        if attempts > self.config.max_resends {
                            return Err(Error::ResendLimit {
                                block: index,
                                attempts,
                            });
                        }
                    }
                    other => {
                        return Err(Error::protocol(format!(
                            "expected OK or RESEND after block {}, got {:?}",
                            index, other
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// 读取 RAM 或 Flash
    pub fn read_memory(&mut self, address: u32, count: u32) -> Result<Vec<u8>> {
        self.preflight()?;
        self.require_crp_disabled()?;
        Self::check_aligned(address, WORD_ALIGNMENT)?;
        Self::check_count(count)?;

        self.send(&Command::ReadMemory {
            address,
            len: count,
        })?;
        let result = self.receive_blocks(count as usize);
        self.observe(result)
    }

    fn receive_blocks(&mut self, count: usize) -> Result<Vec<u8>> {
        let mut decoder = BlockDecoder::new();
        for block_bytes in self.codec.block_sizes(count) {
            let line_count = block_bytes.div_ceil(UU_LINE_BYTES);
            let mut attempts = 0u8;
            loop {
                let lines = (0..line_count)
                    .map(|_| self.channel.read_line())
                    .collect::<Result<Vec<_>>>()?;
                let checksum_line = self.channel.read_line()?;
                match decoder.push_block(&lines, &checksum_line, Some(block_bytes)) {
                    Ok(()) => {
                        self.channel.write_line("OK")?;
                        break;
                    }
                    Err(e @ (Error::ChecksumMismatch { .. } | Error::CorruptBlock { .. })) => {
                        attempts += 1;
                        if attempts > self.config.max_resends {
                            return Err(e);
                        }
                        tracing::warn!("{}, requesting resend", e);
                        self.channel.write_line("RESEND")?;
                    }
                    Err(e) => return Err(e),
                }
            }
        }
        Ok(decoder.into_data())
    }

    /// 准备扇区，必须紧接在擦除或写入之前
    pub fn prepare_for_write(&mut self, range: SectorRange) -> Result<()> {
        self.preflight()?;
        self.require_unlocked()?;
        self.config.layout.check_mutable(&range)?;

        let result = self.send(&Command::Prepare {
            start: range.start(),
            end: range.end(),
        });
        self.state = match result {
            Ok(_) => SessionState::Prepared(range),
            Err(_) if self.state == SessionState::Unsynchronized => SessionState::Unsynchronized,
            Err(_) => SessionState::Idle,
        };
        result.map(|_| ())
    }

    /// 擦除扇区。成功后设备自动重新保护，需要再次 prepare
    pub fn erase(&mut self, range: SectorRange) -> Result<()> {
        self.preflight()?;
        self.config.layout.check_mutable(&range)?;
        self.require_prepared(range)?;

        let result = self.send(&Command::Erase {
            start: range.start(),
            end: range.end(),
        });
        self.after_mutation();
        result.map(|_| ())
    }

    /// 从 RAM 复制到 Flash
    pub fn write_to_flash(&mut self, flash_address: u32, ram_address: u32, len: u32) -> Result<()> {
        self.preflight()?;
        if !ALLOWED_BLOCK_SIZES.contains(&len) {
            return Err(SequencingError::InvalidBlockSize(len).into());
        }
        Self::check_aligned(flash_address, FLASH_WRITE_ALIGNMENT)?;
        Self::check_aligned(ram_address, WORD_ALIGNMENT)?;
        let range = self.config.layout.sectors_for(flash_address, len)?;
        self.config.layout.check_mutable(&range)?;
        self.require_prepared(range)?;

        let result = self.send(&Command::CopyRamToFlash {
            flash_address,
            ram_address,
            len,
        });
        self.after_mutation();
        result.map(|_| ())
    }

    fn after_mutation(&mut self) {
        if self.state != SessionState::Unsynchronized {
            self.state = SessionState::Idle;
        }
    }

    /// 比较两段内存。不一致时返回第一个不同字的偏移，CRP 未开启时附带两边的值
    pub fn compare(&mut self, address1: u32, address2: u32, size: u32) -> Result<()> {
        self.preflight()?;
        Self::check_aligned(address1, WORD_ALIGNMENT)?;
        Self::check_aligned(address2, WORD_ALIGNMENT)?;
        Self::check_count(size)?;

        let cmd = Command::Compare {
            address1,
            address2,
            len: size,
        };
        let reply = self.exchange(&cmd)?;
        match reply.status {
            StatusCode::CmdSuccess => Ok(()),
            StatusCode::CompareError => {
                let offset = reply.parse_u32(0)?;
                let offset = offset - offset % WORD_ALIGNMENT;
                let values = match self.peek_word(address1.wrapping_add(offset))? {
                    Some(a) => self
                        .peek_word(address2.wrapping_add(offset))?
                        .map(|b| (a, b)),
                    None => None,
                };
                Err(Error::CompareMismatch { offset, values })
            }
            status => Err(Error::Device {
                command: cmd.to_string(),
                status,
                response: reply.lines,
            }),
        }
    }

    fn peek_word(&mut self, address: u32) -> Result<Option<u32>> {
        if self.crp_enabled {
            return Ok(None);
        }
        match self.read_memory(address, 4) {
            Ok(bytes) => Ok(bytes.try_into().ok().map(u32::from_le_bytes)),
            Err(Error::Device { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// 跳转执行。成功后会话进入 `ProgramRunning`，不能再发送命令
    pub fn execute(&mut self, address: u32, mode: ExecMode) -> Result<()> {
        self.preflight()?;
        self.require_crp_disabled()?;
        if address < MIN_EXECUTE_ADDRESS {
            return Err(SequencingError::ExecuteAddressTooLow(address).into());
        }
        Self::check_aligned(address, WORD_ALIGNMENT)?;
        self.require_unlocked()?;

        self.send(&Command::Go { address, mode })?;
        tracing::info!("Executing from {:#010X} ({:?})", address, mode);
        self.state = SessionState::ProgramRunning;
        Ok(())
    }

    /// 查空。扇区 0 单独检查，其非空结果按 boot block 重映射处理
    pub fn blank_check(&mut self, range: SectorRange) -> Result<BlankCheck> {
        self.preflight()?;
        let count = self.config.layout.sector_count();
        if range.end() >= count {
            return Err(SequencingError::SectorOutOfRange {
                sector: range.end(),
                count,
            }
            .into());
        }

        let mut remapped = None;
        let mut rest = Some(range);
        if range.start() == 0 {
            remapped = self
                .blank_check_once(SectorRange::single(0))?
                .map(|(_, offset, value)| (offset, value));
            rest = if range.end() > 0 {
                Some(SectorRange::new(1, range.end())?)
            } else {
                None
            };
        }

        if let Some(rest) = rest
            && let Some((sector, offset, value)) = self.blank_check_once(rest)?
        {
            return Ok(BlankCheck::NotBlank {
                sector,
                offset,
                value,
            });
        }

        Ok(match remapped {
            Some((offset, value)) => BlankCheck::BootRemapped { offset, value },
            None => BlankCheck::Blank,
        })
    }

    /// 返回第一个非空字所在扇区、偏移（相对起始扇区）和值
    fn blank_check_once(&mut self, range: SectorRange) -> Result<Option<(u32, u32, u32)>> {
        let cmd = Command::BlankCheck {
            start: range.start(),
            end: range.end(),
        };
        let reply = self.exchange(&cmd)?;
        match reply.status {
            StatusCode::CmdSuccess => Ok(None),
            StatusCode::SectorNotBlank => {
                let offset = reply.parse_u32(0)?;
                let value = reply.parse_u32(1)?;
                let layout = &self.config.layout;
                let sector = layout
                    .sector_address(range.start())
                    .and_then(|base| layout.sector_of(base.wrapping_add(offset)))
                    .unwrap_or(range.start());
                Ok(Some((sector, offset, value)))
            }
            status => Err(Error::Device {
                command: cmd.to_string(),
                status,
                response: reply.lines,
            }),
        }
    }

    pub fn read_part_id(&mut self) -> Result<u32> {
        self.preflight()?;
        let lines = self.send(&Command::ReadPartId)?;
        let part_id = parse_number(&lines, 0)?;
        tracing::debug!("Part ID: {:#010X}", part_id);
        Ok(part_id)
    }

    pub fn read_boot_code_version(&mut self) -> Result<BootCodeVersion> {
        self.preflight()?;
        let lines = self.send(&Command::ReadBootCodeVersion)?;
        Ok(BootCodeVersion {
            major: parse_number(&lines, 0)?,
            minor: parse_number(&lines, 1)?,
        })
    }

    pub fn read_uid(&mut self) -> Result<[u32; 4]> {
        self.preflight()?;
        let lines = self.send(&Command::ReadUid)?;
        let mut uid = [0u32; 4];
        for (index, word) in uid.iter_mut().enumerate() {
            *word = parse_number(&lines, index)?;
        }
        Ok(uid)
    }
}

fn parse_number(lines: &[String], index: usize) -> Result<u32> {
    Reply {
        status: StatusCode::CmdSuccess,
        lines: lines.to_vec(),
    }
    .parse_u32(index)
}

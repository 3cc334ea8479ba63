use crate::status::StatusCode;
use crate::transport::{ISP_EOL, LineTransport};
use crate::{Error, Result};
use strum::Display;

/// `G` 命令的执行模式
#[derive(Display, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
pub enum ExecMode {
    #[default]
    #[strum(to_string = "T")]
    #[cfg_attr(feature = "cli", clap(name = "thumb"))]
    Thumb,
    #[strum(to_string = "A")]
    #[cfg_attr(feature = "cli", clap(name = "arm"))]
    Arm,
}

/// ISP 命令行
#[derive(Display, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    #[strum(to_string = "U 23130")]
    Unlock,

    #[strum(to_string = "B {baud} {stop_bits}")]
    SetBaudRate { baud: u32, stop_bits: u8 },

    #[strum(to_string = "A {flag}")]
    Echo { flag: u8 },

    #[strum(to_string = "W {address} {len}")]
    WriteToRam { address: u32, len: u32 },

    #[strum(to_string = "R {address} {len}")]
    ReadMemory { address: u32, len: u32 },

    #[strum(to_string = "P {start} {end}")]
    Prepare { start: u32, end: u32 },

    #[strum(to_string = "C {flash_address} {ram_address} {len}")]
    CopyRamToFlash {
        flash_address: u32,
        ram_address: u32,
        len: u32,
    },

    #[strum(to_string = "G {address} {mode}")]
    Go { address: u32, mode: ExecMode },

    #[strum(to_string = "E {start} {end}")]
    Erase { start: u32, end: u32 },

    #[strum(to_string = "I {start} {end}")]
    BlankCheck { start: u32, end: u32 },

    #[strum(to_string = "J")]
    ReadPartId,

    #[strum(to_string = "K")]
    ReadBootCodeVersion,

    #[strum(to_string = "M {address1} {address2} {len}")]
    Compare {
        address1: u32,
        address2: u32,
        len: u32,
    },

    #[strum(to_string = "N")]
    ReadUid,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Unlock => "unlock",
            Command::SetBaudRate { .. } => "set baud rate",
            Command::Echo { .. } => "echo",
            Command::WriteToRam { .. } => "write to RAM",
            Command::ReadMemory { .. } => "read memory",
            Command::Prepare { .. } => "prepare sectors",
            Command::CopyRamToFlash { .. } => "copy RAM to flash",
            Command::Go { .. } => "go",
            Command::Erase { .. } => "erase sectors",
            Command::BlankCheck { .. } => "blank check",
            Command::ReadPartId => "read part ID",
            Command::ReadBootCodeVersion => "read boot code version",
            Command::Compare { .. } => "compare",
            Command::ReadUid => "read UID",
        }
    }

    /// 状态行之后还要读取的行数
    pub fn payload_lines(&self, status: StatusCode) -> usize {
        match (self, status) {
            (Command::ReadPartId, StatusCode::CmdSuccess) => 1,
            (Command::ReadBootCodeVersion, StatusCode::CmdSuccess) => 2,
            (Command::ReadUid, StatusCode::CmdSuccess) => 4,
            (Command::Compare { .. }, StatusCode::CompareError) => 1,
            (Command::BlankCheck { .. }, StatusCode::SectorNotBlank) => 2,
            _ => 0,
        }
    }
}

/// 一次命令交互的结果：状态码和附带的数据行
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub status: StatusCode,
    pub lines: Vec<String>,
}

impl Reply {
    pub fn parse_u32(&self, index: usize) -> Result<u32> {
        let line = self
            .lines
            .get(index)
            .ok_or_else(|| Error::protocol(format!("missing payload line {}", index)))?;
        line.trim()
            .parse::<u32>()
            .map_err(|_| Error::protocol(format!("expected a number, got {:?}", line)))
    }
}

/// 命令通道：写命令行、吞掉回显、读状态行和数据行
pub struct CommandChannel<T> {
    transport: T,
    eol: &'static str,
    echo: bool,
}

impl<T: LineTransport> CommandChannel<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            eol: ISP_EOL,
            // 同步完成后设备默认开启回显
            echo: true,
        }
    }

    pub fn echo(&self) -> bool {
        self.echo
    }

    pub fn set_echo(&mut self, echo: bool) {
        self.echo = echo;
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn into_transport(self) -> T {
        self.transport
    }

    /// 写一行。回显开启时读回并校验
    pub fn write_line(&mut self, line: &str) -> Result<()> {
        tracing::trace!(">> {:?}", line);
        self.transport
            .write_raw(format!("{}{}", line, self.eol).as_bytes())?;
        if self.echo {
            let echoed = self.transport.read_line()?;
            if echoed != line {
                return Err(Error::protocol(format!(
                    "echo mismatch: sent {:?}, got {:?}",
                    line, echoed
                )));
            }
        }
        Ok(())
    }

    pub fn read_line(&mut self) -> Result<String> {
        self.transport.read_line()
    }

    /// 发送命令并读取状态码与数据行，不把非零状态当作错误
    pub fn exchange(&mut self, cmd: &Command) -> Result<Reply> {
        let text = cmd.to_string();
        tracing::debug!("command: {}", text);
        self.write_line(&text)?;

        let status_line = self.transport.read_line()?;
        let status = StatusCode::parse_line(&status_line)?;
        tracing::debug!("status: {} ({})", status, status.code());

        let mut lines = Vec::new();
        for _ in 0..cmd.payload_lines(status) {
            lines.push(self.transport.read_line()?);
        }
        Ok(Reply { status, lines })
    }

    /// 发送命令，非零状态转换为 [`Error::Device`]
    pub fn send(&mut self, cmd: &Command) -> Result<Vec<String>> {
        let reply = self.exchange(cmd)?;
        if !reply.status.is_success() {
            return Err(Error::Device {
                command: cmd.to_string(),
                status: reply.status,
                response: reply.lines,
            });
        }
        Ok(reply.lines)
    }
}

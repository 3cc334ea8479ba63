//! 同步握手
//!
//! 握手被拆成纯状态转换 [`SyncNegotiator::advance`]，I/O 由 [`SyncNegotiator::run`]
//! 驱动，方便脱离真实串口做单元测试。
//!
//! 流程：
//! 1. 发送不带行尾的 `?`
//! 2. 期望收到 `Synchronized`
//! 3. 回送 `Synchronized`
//! 4. 期望收到 `Synchronized\rOK`
//! 5. 发送晶振频率（kHz）
//! 6. 期望收到 `{freq}\rOK`，不匹配即失败

use crate::transport::{ISP_EOL, LineTransport};
use crate::{Error, Result};
use std::fmt;

pub const SYNC_CHAR: &[u8] = b"?";
pub const SYNCHRONIZED: &str = "Synchronized";
pub const SYNCHRONIZED_OK: &str = "Synchronized\rOK";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncFailure {
    NoResponse,
    SyncFailed,
    ClockRejected { expected: String, got: Option<String> },
}

impl fmt::Display for SyncFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncFailure::NoResponse => write!(f, "no response from device"),
            SyncFailure::SyncFailed => write!(f, "synchronized failed"),
            SyncFailure::ClockRejected { expected, got } => write!(
                f,
                "failed to set clock frequency (expected {:?}, got {:?})",
                expected, got
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    SentSync,
    AwaitEcho,
    AwaitAck,
    SentClock,
    AwaitClockAck,
    Ready,
    Failed(SyncFailure),
}

/// 驱动方反馈给状态机的事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    Start,
    Written,
    Line(String),
    Timeout,
}

/// 状态机要求驱动方执行的动作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncAction {
    WriteRaw(Vec<u8>),
    ReadLine,
    Complete,
    Abort(SyncFailure),
}

pub struct SyncNegotiator {
    state: SyncState,
    crystal_khz: u32,
    /// 已经回送过 `Synchronized`，正在等待 `Synchronized\rOK`
    echo_sent: bool,
}

impl SyncNegotiator {
    pub fn new(crystal_khz: u32) -> Self {
        Self {
            state: SyncState::Idle,
            crystal_khz,
            echo_sent: false,
        }
    }

    pub fn state(&self) -> &SyncState {
        &self.state
    }

    fn line(text: &str) -> Vec<u8> {
        format!("{}{}", text, ISP_EOL).into_bytes()
    }

    fn fail(&mut self, failure: SyncFailure) -> SyncAction {
        self.state = SyncState::Failed(failure.clone());
        SyncAction::Abort(failure)
    }

    /// 纯状态转换：(当前状态, 事件) -> (新状态, 动作)
    pub fn advance(&mut self, event: SyncEvent) -> SyncAction {
        let clock = self.crystal_khz.to_string();
        match (self.state.clone(), event) {
            (SyncState::Idle, SyncEvent::Start) => {
                self.state = SyncState::SentSync;
                SyncAction::WriteRaw(SYNC_CHAR.to_vec())
            }
            (SyncState::SentSync, SyncEvent::Written) => {
                self.state = SyncState::AwaitEcho;
                SyncAction::ReadLine
            }
            (SyncState::AwaitEcho, SyncEvent::Line(line)) if line == SYNCHRONIZED => {
                self.state = SyncState::AwaitAck;
                self.echo_sent = false;
                SyncAction::WriteRaw(Self::line(SYNCHRONIZED))
            }
            (SyncState::AwaitEcho, _) => self.fail(SyncFailure::NoResponse),
            (SyncState::AwaitAck, SyncEvent::Written) if !self.echo_sent => {
                self.echo_sent = true;
                SyncAction::ReadLine
            }
            (SyncState::AwaitAck, SyncEvent::Line(line))
                if self.echo_sent && line == SYNCHRONIZED_OK =>
            {
                self.state = SyncState::SentClock;
                SyncAction::WriteRaw(Self::line(&clock))
            }
            (SyncState::AwaitAck, _) => self.fail(SyncFailure::SyncFailed),
            (SyncState::SentClock, SyncEvent::Written) => {
                self.state = SyncState::AwaitClockAck;
                SyncAction::ReadLine
            }
            (SyncState::AwaitClockAck, SyncEvent::Line(line))
                if line == format!("{}\rOK", clock) =>
            {
                self.state = SyncState::Ready;
                SyncAction::Complete
            }
            (SyncState::AwaitClockAck, SyncEvent::Line(line)) => {
                self.fail(SyncFailure::ClockRejected {
                    expected: format!("{}\rOK", clock),
                    got: Some(line),
                })
            }
            (SyncState::AwaitClockAck, _) => self.fail(SyncFailure::ClockRejected {
                expected: format!("{}\rOK", clock),
                got: None,
            }),
            (SyncState::Ready, _) => SyncAction::Complete,
            (SyncState::Failed(failure), _) => SyncAction::Abort(failure),
            (state, event) => {
                tracing::warn!("Unexpected sync event {:?} in state {:?}", event, state);
                self.fail(SyncFailure::SyncFailed)
            }
        }
    }

    /// 在传输层上执行完整握手。超时转成状态机事件，其余传输错误直接返回
    pub fn run<T: LineTransport + ?Sized>(&mut self, transport: &mut T) -> Result<()> {
        let mut action = self.advance(SyncEvent::Start);
        loop {
            action = match action {
                SyncAction::WriteRaw(bytes) => {
                    tracing::debug!(">> {:?}", String::from_utf8_lossy(&bytes));
                    transport.write_raw(&bytes)?;
                    self.advance(SyncEvent::Written)
                }
                SyncAction::ReadLine => match transport.read_line() {
                    Ok(line) => {
                        tracing::debug!("<< {:?}", line);
                        self.advance(SyncEvent::Line(line))
                    }
                    Err(e) if e.is_timeout() => self.advance(SyncEvent::Timeout),
                    Err(e) => return Err(e),
                },
                SyncAction::Complete => {
                    tracing::info!("Synchronized at {} kHz", self.crystal_khz);
                    return Ok(());
                }
                SyncAction::Abort(failure) => {
                    tracing::error!("Synchronization failed: {}", failure);
                    return Err(Error::Sync(failure));
                }
            };
        }
    }
}

//! 进度条回调系统
//!
//! 库只描述“正在做什么”（[`ProgressOperation`]）和“结果如何”（[`ProgressStatus`]），
//! 具体显示方式由调用方实现 [`ProgressCallback`] 决定。

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicI32, Ordering};

#[derive(Debug, Clone)]
pub enum ProgressType {
    /// 旋转进度条，用于不确定时长的操作
    Spinner,
    /// 条形进度条，用于有明确进度的操作
    Bar { total: u64 },
}

#[derive(Debug, Clone)]
pub struct ProgressInfo {
    pub progress_type: ProgressType,
    /// 步骤前缀（十六进制步骤号）
    pub prefix: String,
    pub message: String,
    /// 当前进度（仅对 Bar 类型有效）
    pub current: Option<u64>,
}

/// 进度条对应的操作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressOperation {
    Connect { attempt: u32 },
    ReadInfo,
    Erase { start: u32, end: u32 },
    BlankCheck { start: u32, end: u32 },
    WriteFlash { address: u32, size: u64 },
    Verify { address: u32, len: u32 },
    ReadFlash { address: u32, size: u32 },
    Execute { address: u32 },
}

impl fmt::Display for ProgressOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProgressOperation::Connect { attempt } => {
                write!(f, "Connecting to chip (attempt {})...", attempt)
            }
            ProgressOperation::ReadInfo => write!(f, "Reading device information..."),
            ProgressOperation::Erase { start, end } if start == end => {
                write!(f, "Erasing sector {}...", start)
            }
            ProgressOperation::Erase { start, end } => {
                write!(f, "Erasing sectors {}..{}...", start, end)
            }
            ProgressOperation::BlankCheck { start, end } => {
                write!(f, "Blank checking sectors {}..{}...", start, end)
            }
            ProgressOperation::WriteFlash { address, size } => {
                write!(f, "Writing 0x{:X} bytes at 0x{:08X}...", size, address)
            }
            ProgressOperation::Verify { address, len } => {
                write!(f, "Verifying 0x{:08X}..0x{:08X}...", address, address + len.saturating_sub(1))
            }
            ProgressOperation::ReadFlash { address, size } => {
                write!(f, "Reading 0x{:X} bytes from 0x{:08X}...", size, address)
            }
            ProgressOperation::Execute { address } => write!(f, "Jumping to 0x{:08X}...", address),
        }
    }
}

/// 进度条结束时的状态
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressStatus {
    Success,
    Skipped,
    Failed(String),
    Aborted,
}

impl fmt::Display for ProgressStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProgressStatus::Success => write!(f, "Done"),
            ProgressStatus::Skipped => write!(f, "Skipped"),
            ProgressStatus::Failed(reason) => write!(f, "Failed: {}", reason),
            ProgressStatus::Aborted => write!(f, "Aborted"),
        }
    }
}

/// 进度回调 trait
///
/// 实现此 trait 以自定义进度条的显示方式
pub trait ProgressCallback: Send + Sync {
    /// 开始一个新的进度条，返回用于后续更新的 ID
    fn start(&self, info: ProgressInfo) -> ProgressId;

    fn update_message(&self, id: ProgressId, message: String);

    /// 增加进度（仅对 Bar 类型有效）
    fn increment(&self, id: ProgressId, delta: u64);

    fn finish(&self, id: ProgressId, final_message: String);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProgressId(pub u64);

/// 不产生任何输出的回调
#[derive(Debug, Default)]
pub struct NoOpProgressCallback;

impl ProgressCallback for NoOpProgressCallback {
    fn start(&self, _info: ProgressInfo) -> ProgressId {
        ProgressId(0)
    }

    fn update_message(&self, _id: ProgressId, _message: String) {}

    fn increment(&self, _id: ProgressId, _delta: u64) {}

    fn finish(&self, _id: ProgressId, _final_message: String) {}
}

pub type ProgressCallbackArc = Arc<dyn ProgressCallback>;

pub fn no_op_progress_callback() -> ProgressCallbackArc {
    Arc::new(NoOpProgressCallback)
}

/// 进度条助手，负责分配步骤号
#[derive(Clone)]
pub struct ProgressHelper {
    callback: ProgressCallbackArc,
    step_counter: Arc<AtomicI32>,
}

impl ProgressHelper {
    pub fn new(callback: ProgressCallbackArc, initial_step: i32) -> Self {
        Self {
            callback,
            step_counter: Arc::new(AtomicI32::new(initial_step)),
        }
    }

    fn next_step(&self) -> i32 {
        self.step_counter.fetch_add(1, Ordering::SeqCst)
    }

    fn start(&self, progress_type: ProgressType, operation: ProgressOperation) -> ProgressHandler {
        let current = match progress_type {
            ProgressType::Spinner => None,
            ProgressType::Bar { .. } => Some(0),
        };
        let info = ProgressInfo {
            progress_type,
            prefix: format!("0x{:02X}", self.next_step()),
            message: operation.to_string(),
            current,
        };
        let id = self.callback.start(info);
        ProgressHandler {
            callback: Arc::clone(&self.callback),
            id,
            finished: false,
        }
    }

    pub fn create_spinner(&self, operation: ProgressOperation) -> ProgressHandler {
        self.start(ProgressType::Spinner, operation)
    }

    pub fn create_bar(&self, total: u64, operation: ProgressOperation) -> ProgressHandler {
        self.start(ProgressType::Bar { total }, operation)
    }

    /// 当前步骤号（不递增）
    pub fn current_step(&self) -> i32 {
        self.step_counter.load(Ordering::SeqCst)
    }
}

/// 单个进度条。未显式结束就被 drop 时报告 `Aborted`
pub struct ProgressHandler {
    callback: ProgressCallbackArc,
    id: ProgressId,
    finished: bool,
}

impl ProgressHandler {
    pub fn set_message(&self, message: impl Into<String>) {
        self.callback.update_message(self.id, message.into());
    }

    pub fn inc(&self, delta: u64) {
        self.callback.increment(self.id, delta);
    }

    pub fn finish(mut self, status: ProgressStatus) {
        self.finished = true;
        self.callback.finish(self.id, status.to_string());
    }

    pub fn finish_with_message(mut self, message: impl Into<String>) {
        self.finished = true;
        self.callback.finish(self.id, message.into());
    }
}

impl Drop for ProgressHandler {
    fn drop(&mut self) {
        if !self.finished {
            self.callback.finish(self.id, ProgressStatus::Aborted.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl ProgressCallback for Recorder {
        fn start(&self, info: ProgressInfo) -> ProgressId {
            self.events
                .lock()
                .unwrap()
                .push(format!("start {} {}", info.prefix, info.message));
            ProgressId(1)
        }

        fn update_message(&self, _id: ProgressId, message: String) {
            self.events.lock().unwrap().push(format!("msg {}", message));
        }

        fn increment(&self, _id: ProgressId, delta: u64) {
            self.events.lock().unwrap().push(format!("inc {}", delta));
        }

        fn finish(&self, _id: ProgressId, final_message: String) {
            self.events
                .lock()
                .unwrap()
                .push(format!("finish {}", final_message));
        }
    }

    #[test]
    fn steps_are_numbered_and_dropped_bars_abort() {
        let recorder = Arc::new(Recorder::default());
        let helper = ProgressHelper::new(recorder.clone(), 0);

        let bar = helper.create_bar(
            512,
            ProgressOperation::WriteFlash {
                address: 0x1000,
                size: 512,
            },
        );
        bar.inc(256);
        bar.finish(ProgressStatus::Success);

        {
            let _spinner = helper.create_spinner(ProgressOperation::Erase { start: 1, end: 1 });
        }

        assert_eq!(helper.current_step(), 2);
        let events = recorder.events.lock().unwrap();
        assert_eq!(
            *events,
            vec![
                "start 0x00 Writing 0x200 bytes at 0x00001000...",
                "inc 256",
                "finish Done",
                "start 0x01 Erasing sector 1...",
                "finish Aborted",
            ]
        );
    }
}

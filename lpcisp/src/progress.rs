//! CLI 进度条实现
//!
//! 终端下使用 indicatif 绘制进度条，输出被重定向时按行打印百分比

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use lpcisp_lib::progress::{
    ProgressCallback, ProgressCallbackArc, ProgressId, ProgressInfo, ProgressType,
    no_op_progress_callback,
};
use std::collections::HashMap;
use std::io::{self, IsTerminal, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

struct PercentState {
    prefix: String,
    message: String,
    /// Spinner 没有总量
    total: Option<u64>,
    current: u64,
    last_percent: Option<u64>,
}

/// 基于标准输出的百分比进度回调实现
#[derive(Default)]
pub struct PercentProgressCallback {
    states: Mutex<HashMap<u64, PercentState>>,
    next_id: AtomicU64,
}

impl PercentProgressCallback {
    pub fn new() -> Self {
        Self::default()
    }

    fn print_line(state: &PercentState, percent: u64) {
        let mut stdout = io::stdout().lock();
        let _ = writeln!(stdout, "[{}] {} {}%", state.prefix, state.message, percent);
        let _ = stdout.flush();
    }

    pub(crate) fn calculate_percent(current: u64, total: u64) -> u64 {
        if total == 0 {
            return 100;
        }
        (current.saturating_mul(100) / total).min(100)
    }
}

impl ProgressCallback for PercentProgressCallback {
    fn start(&self, info: ProgressInfo) -> ProgressId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let total = match info.progress_type {
            ProgressType::Spinner => None,
            ProgressType::Bar { total } => Some(total),
        };
        let current = info.current.unwrap_or(0);
        let percent = total.map_or(0, |t| Self::calculate_percent(current, t));
        let state = PercentState {
            prefix: info.prefix,
            message: info.message,
            total,
            current,
            last_percent: Some(percent),
        };
        Self::print_line(&state, percent);

        if let Ok(mut states) = self.states.lock() {
            states.insert(id, state);
        }
        ProgressId(id)
    }

    fn update_message(&self, id: ProgressId, message: String) {
        if let Ok(mut states) = self.states.lock()
            && let Some(state) = states.get_mut(&id.0)
        {
            state.message = message;
        }
    }

    fn increment(&self, id: ProgressId, delta: u64) {
        if let Ok(mut states) = self.states.lock()
            && let Some(state) = states.get_mut(&id.0)
            && let Some(total) = state.total
        {
            state.current = state.current.saturating_add(delta);
            let percent = Self::calculate_percent(state.current, total);
            if state.last_percent != Some(percent) {
                state.last_percent = Some(percent);
                Self::print_line(state, percent);
            }
        }
    }

    fn finish(&self, id: ProgressId, final_message: String) {
        let Some(mut state) = self
            .states
            .lock()
            .ok()
            .and_then(|mut states| states.remove(&id.0))
        else {
            return;
        };

        state.message = final_message;
        let mut stdout = io::stdout().lock();
        let _ = writeln!(stdout, "[{}] {}", state.prefix, state.message);
        let _ = stdout.flush();
    }
}

/// 基于 indicatif 的进度回调实现
pub struct IndicatifProgressCallback {
    multi_progress: MultiProgress,
    progress_bars: Mutex<HashMap<u64, ProgressBar>>,
    next_id: AtomicU64,
}

impl IndicatifProgressCallback {
    pub fn new() -> Self {
        Self {
            multi_progress: MultiProgress::new(),
            progress_bars: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }
}

impl Default for IndicatifProgressCallback {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressCallback for IndicatifProgressCallback {
    fn start(&self, info: ProgressInfo) -> ProgressId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let progress_bar = match info.progress_type {
            ProgressType::Spinner => {
                let spinner = self.multi_progress.add(ProgressBar::new_spinner());
                spinner.enable_steady_tick(Duration::from_millis(100));
                spinner.set_style(
                    ProgressStyle::with_template(&format!("[{}] {{spinner}} {{msg}}", info.prefix))
                        .unwrap_or_else(|_| ProgressStyle::default_spinner()),
                );
                spinner.set_message(info.message);
                spinner
            }
            ProgressType::Bar { total } => {
                let bar = self.multi_progress.add(ProgressBar::new(total));
                bar.set_style(
                    ProgressStyle::with_template(&format!(
                        "[{}] {{msg}} {{wide_bar}} {{bytes}}/{{total_bytes}} {{bytes_per_sec}}",
                        info.prefix
                    ))
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("=>-"),
                );
                bar.set_message(info.message);
                if let Some(current) = info.current {
                    bar.set_position(current);
                }
                bar
            }
        };

        if let Ok(mut bars) = self.progress_bars.lock() {
            bars.insert(id, progress_bar);
        }
        ProgressId(id)
    }

    fn update_message(&self, id: ProgressId, message: String) {
        if let Ok(bars) = self.progress_bars.lock()
            && let Some(bar) = bars.get(&id.0)
        {
            bar.set_message(message);
        }
    }

    fn increment(&self, id: ProgressId, delta: u64) {
        if let Ok(bars) = self.progress_bars.lock()
            && let Some(bar) = bars.get(&id.0)
        {
            bar.inc(delta);
        }
    }

    fn finish(&self, id: ProgressId, final_message: String) {
        if let Ok(mut bars) = self.progress_bars.lock()
            && let Some(bar) = bars.remove(&id.0)
        {
            bar.finish_with_message(final_message);
        }
    }
}

/// 按输出环境选择进度回调，`quiet` 时不输出任何进度
pub fn create_progress_callback(quiet: bool) -> ProgressCallbackArc {
    if quiet {
        no_op_progress_callback()
    } else if io::stdout().is_terminal() {
        Arc::new(IndicatifProgressCallback::new())
    } else {
        Arc::new(PercentProgressCallback::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_is_clamped() {
        assert_eq!(PercentProgressCallback::calculate_percent(0, 0), 100);
        assert_eq!(PercentProgressCallback::calculate_percent(50, 200), 25);
        assert_eq!(PercentProgressCallback::calculate_percent(300, 200), 100);
    }

    #[test]
    fn percent_callback_tracks_bars() {
        let callback = PercentProgressCallback::new();
        let id = callback.start(ProgressInfo {
            progress_type: ProgressType::Bar { total: 10 },
            prefix: "0x01".to_string(),
            message: "Writing".to_string(),
            current: None,
        });
        callback.increment(id, 5);
        assert_eq!(
            callback.states.lock().unwrap().get(&id.0).map(|s| s.current),
            Some(5)
        );
        callback.finish(id, "Done".to_string());
        assert!(callback.states.lock().unwrap().is_empty());
    }
}

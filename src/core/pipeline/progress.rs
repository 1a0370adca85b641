//! 进度回调与取消标志

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use log::info;

/// Observational only; implementations must not block for long.
pub trait ProgressSink: Send + Sync {
    fn on_progress(&self, frames_done: u64, frames_total: u64, current_file: &str);
}

/// 每推进 10% 输出一条日志
pub struct LogProgress {
    last_decile: AtomicU64,
}

impl LogProgress {
    pub fn new() -> Self {
        Self {
            last_decile: AtomicU64::new(u64::MAX),
        }
    }
}

impl Default for LogProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressSink for LogProgress {
    fn on_progress(&self, frames_done: u64, frames_total: u64, current_file: &str) {
        if frames_total == 0 {
            return;
        }
        let decile = (frames_done.min(frames_total) * 10 / frames_total).min(10);
        if self.last_decile.swap(decile, Ordering::Relaxed) != decile {
            info!(
                "📍 {}: {}% ({}/{})",
                current_file,
                decile * 10,
                frames_done,
                frames_total
            );
        }
    }
}

/// 协作式取消标志，帧与帧之间检查
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// 下一个任务开始前清除
    pub fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_token_shared() {
        let token = CancelToken::new();
        let other = token.clone();
        assert!(!other.is_cancelled());
        token.cancel();
        assert!(other.is_cancelled());
        other.clear();
        assert!(!token.is_cancelled());
    }

    #[test]
    fn test_log_progress_deciles() {
        let progress = LogProgress::new();
        progress.on_progress(0, 100, "a.mp4");
        assert_eq!(progress.last_decile.load(Ordering::Relaxed), 0);
        progress.on_progress(55, 100, "a.mp4");
        assert_eq!(progress.last_decile.load(Ordering::Relaxed), 5);
        progress.on_progress(200, 100, "a.mp4");
        assert_eq!(progress.last_decile.load(Ordering::Relaxed), 10);
        progress.on_progress(1, 0, "a.mp4");
        assert_eq!(progress.last_decile.load(Ordering::Relaxed), 10);
    }
}

use crate::errors::{SessionError, SessionResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const SLEEP_TICK: Duration = Duration::from_millis(100);

/// 协作式取消标志，克隆后共享同一个状态
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn reset(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// 已取消时返回停止信号
    pub fn check(&self, reason: &str) -> SessionResult<()> {
        if self.is_cancelled() {
            return Err(SessionError::stopped(reason));
        }
        Ok(())
    }

    /// 分段睡眠，每一段之前调用 `on_tick`，`on_tick` 返回错误时立即结束
    pub fn sleep_with<F>(&self, duration: Duration, mut on_tick: F) -> SessionResult<()>
    where
        F: FnMut() -> SessionResult<()>,
    {
        let deadline = Instant::now() + duration;
        loop {
            on_tick()?;
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            std::thread::sleep(SLEEP_TICK.min(deadline - now));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_state() {
        let token = CancellationToken::new();
        let other = token.clone();
        assert!(token.check("stop").is_ok());
        other.cancel();
        assert!(token.check("stop").unwrap_err().is_stop_signal());
        token.reset();
        assert!(!other.is_cancelled());
    }

    #[test]
    fn test_sleep_interrupted_by_cancel() {
        let token = CancellationToken::new();
        let canceller = token.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(150));
            canceller.cancel();
        });
        let started = Instant::now();
        let result = token.sleep_with(Duration::from_secs(10), || token.check("sleep stopped"));
        assert!(result.unwrap_err().is_stop_signal());
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}

use crate::errors::{SessionError, SessionResult};
use crate::utils::lock_unpoisoned;
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::warn;

/// 支持限时获取的互斥锁。持有期间恰好覆盖一次设备操作。
pub struct CommandLock {
    identity: String,
    held: Mutex<bool>,
    released: Condvar,
}

impl CommandLock {
    pub fn new(identity: &str) -> Self {
        Self {
            identity: identity.to_string(),
            held: Mutex::new(false),
            released: Condvar::new(),
        }
    }

    /// 在 `timeout` 内获取锁，否则返回 `LockTimeout`
    pub fn acquire(&self, operation: &str, timeout: Duration) -> SessionResult<CommandGuard<'_>> {
        let deadline = Instant::now() + timeout;
        let mut held = lock_unpoisoned(&self.held);
        while *held {
            let now = Instant::now();
            if now >= deadline {
                warn!(device = %self.identity, operation, "Could not acquire ADB lock");
                return Err(SessionError::lock_timeout(operation, timeout));
            }
            let (guard, _) = self
                .released
                .wait_timeout(held, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            held = guard;
        }
        *held = true;
        Ok(CommandGuard { lock: self })
    }

    pub fn is_held(&self) -> bool {
        *lock_unpoisoned(&self.held)
    }

    fn release(&self) {
        *lock_unpoisoned(&self.held) = false;
        self.released.notify_one();
    }
}

/// 离开作用域时释放命令锁
pub struct CommandGuard<'a> {
    lock: &'a CommandLock,
}

impl Drop for CommandGuard<'_> {
    fn drop(&mut self) {
        self.lock.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_guard_releases_on_drop() {
        let lock = CommandLock::new("emulator-5554");
        {
            let _guard = lock.acquire("tap", Duration::from_secs(1)).unwrap();
            assert!(lock.is_held());
        }
        assert!(!lock.is_held());
    }

    #[test]
    fn test_acquire_times_out_while_held() {
        let lock = CommandLock::new("emulator-5554");
        let _guard = lock.acquire("screencap", Duration::from_secs(1)).unwrap();
        let started = Instant::now();
        let err = lock.acquire("tap", Duration::from_millis(100)).err().unwrap();
        assert!(matches!(err, SessionError::LockTimeout { .. }));
        assert!(started.elapsed() >= Duration::from_millis(100));
    }

    #[test]
    fn test_waiter_gets_lock_after_release() {
        let lock = Arc::new(CommandLock::new("emulator-5554"));
        let guard = lock.acquire("screencap", Duration::from_secs(1)).unwrap();
        let waiter = {
            let lock = Arc::clone(&lock);
            thread::spawn(move || lock.acquire("tap", Duration::from_secs(5)).map(|_| ()).is_ok())
        };
        thread::sleep(Duration::from_millis(50));
        drop(guard);
        assert!(waiter.join().unwrap());
    }
}

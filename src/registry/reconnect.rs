//! 协作式重连。
//!
//! 同一设备上多个调用方同时失败时，只有一个线程真正执行重连，
//! 其余线程阻塞在同一把锁上，拿到锁后发现连接已经被修好，直接重试一次。

use crate::errors::{SessionError, SessionResult};
use crate::utils::lock_unpoisoned;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectFlags {
    /// 刚由某个线程重连成功。只有 epoch 也已变化的等待者才会跳过重连，
    /// epoch 未变时它是上一次故障留下的旧标志，清除后照常重连。
    pub just_reconnected: bool,
    /// 粘滞标志，设置后所有操作立即失败
    pub permanent_failure: bool,
}

/// 调用方拿到重连锁之后走的是哪条路径
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// 本线程执行了重连
    Reconnected,
    /// 其他线程已经重连，本线程只需要重试
    AlreadyReconnected,
}

#[derive(Debug, Default)]
pub struct ReconnectState {
    flags: Mutex<ReconnectFlags>,
    epoch: AtomicU64,
}

impl ReconnectState {
    /// 成功重连的次数，调用方在发起设备调用前记录它
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    pub fn flags(&self) -> ReconnectFlags {
        *lock_unpoisoned(&self.flags)
    }

    pub fn is_permanently_failed(&self) -> bool {
        lock_unpoisoned(&self.flags).permanent_failure
    }

    /// 一次显式连接成功后清除两个标志，之前的永久失败不再拒绝操作
    pub fn mark_connected(&self) {
        let mut flags = lock_unpoisoned(&self.flags);
        flags.permanent_failure = false;
        flags.just_reconnected = false;
    }

    /// 获取重连锁（阻塞等待）并决定由谁重连。
    ///
    /// # 参数
    /// - `observed_epoch`: 调用方在失败的那次调用之前读到的 epoch
    /// - `reconnect`: 真正的重连过程，只在本线程负责重连时执行
    ///
    /// # 返回值
    /// 成功时调用方应当重试原调用一次；失败时总是停止信号，并且永久失败标志已设置。
    pub fn coordinate<F>(&self, observed_epoch: u64, reconnect: F) -> SessionResult<Recovery>
    where
        F: FnOnce() -> SessionResult<()>,
    {
        let mut flags = lock_unpoisoned(&self.flags);

        if flags.permanent_failure {
            return Err(SessionError::stopped("Device connection permanently failed"));
        }

        let already_repaired = self.epoch() != observed_epoch;
        flags.just_reconnected = false;
        if already_repaired {
            return Ok(Recovery::AlreadyReconnected);
        }

        match reconnect() {
            Ok(()) => {
                flags.just_reconnected = true;
                flags.permanent_failure = false;
                self.epoch.fetch_add(1, Ordering::SeqCst);
                Ok(Recovery::Reconnected)
            }
            Err(e) => {
                flags.permanent_failure = true;
                if e.is_stop_signal() {
                    Err(e)
                } else {
                    Err(SessionError::stopped(format!("Reconnection failed: {}", e)))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::{Arc, Barrier};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_concurrent_failures_collapse_to_one_reconnect() {
        let state = Arc::new(ReconnectState::default());
        let reconnects = Arc::new(AtomicUsize::new(0));
        let threads = 6;
        let barrier = Arc::new(Barrier::new(threads));

        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let state = Arc::clone(&state);
                let reconnects = Arc::clone(&reconnects);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    let observed = state.epoch();
                    barrier.wait();
                    state.coordinate(observed, || {
                        reconnects.fetch_add(1, Ordering::SeqCst);
                        thread::sleep(Duration::from_millis(50));
                        Ok(())
                    })
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap().unwrap()).collect();
        assert_eq!(reconnects.load(Ordering::SeqCst), 1);
        assert_eq!(
            results.iter().filter(|r| **r == Recovery::Reconnected).count(),
            1
        );
        assert_eq!(state.epoch(), 1);
    }

    #[test]
    fn test_failed_reconnect_is_sticky() {
        let state = ReconnectState::default();
        let err = state
            .coordinate(0, || Err(SessionError::protocol("no devices")))
            .unwrap_err();
        assert!(err.is_stop_signal());
        assert!(state.is_permanently_failed());

        let mut called = false;
        let err = state
            .coordinate(0, || {
                called = true;
                Ok(())
            })
            .unwrap_err();
        assert!(err.is_stop_signal());
        assert!(!called);
    }

    #[test]
    fn test_stale_flag_does_not_skip_next_reconnect() {
        let state = ReconnectState::default();
        assert_eq!(state.coordinate(0, || Ok(())).unwrap(), Recovery::Reconnected);
        assert!(state.flags().just_reconnected);

        // 没有其他等待者消费标志，之后的新故障仍然需要真正重连
        let observed = state.epoch();
        let mut called = false;
        let recovery = state
            .coordinate(observed, || {
                called = true;
                Ok(())
            })
            .unwrap();
        assert_eq!(recovery, Recovery::Reconnected);
        assert!(called);
        assert_eq!(state.epoch(), 2);
    }

    #[test]
    fn test_waiter_with_old_epoch_consumes_flag() {
        let state = ReconnectState::default();
        state.coordinate(0, || Ok(())).unwrap();
        assert_eq!(
            state.coordinate(0, || Ok(())).unwrap(),
            Recovery::AlreadyReconnected
        );
        assert!(!state.flags().just_reconnected);
        assert_eq!(state.epoch(), 1);
    }

    #[test]
    fn test_mark_connected_clears_permanent_failure() {
        let state = ReconnectState::default();
        assert!(state
            .coordinate(0, || Err(SessionError::protocol("no devices")))
            .is_err());
        assert!(state.is_permanently_failed());

        state.mark_connected();
        assert_eq!(state.flags(), ReconnectFlags::default());
        assert_eq!(state.coordinate(0, || Ok(())).unwrap(), Recovery::Reconnected);
    }
}

//! 带截止时间的设备调用执行器。
//!
//! 调用被提交到固定大小的工作线程池，调用方最多等待 `deadline`。
//! 超时后只是放弃等待，底层的传输调用并不会被取消（ADB 没有取消原语），
//! 它可能稍后仍然完成并生效，结果被丢弃。因此同一个 tap 在超时后重试，
//! 设备上可能执行两次：语义是至少一次，而不是恰好一次。

use crate::errors::{SessionError, SessionResult};
use crate::utils::lock_unpoisoned;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

type Job = Box<dyn FnOnce() + Send + 'static>;

pub struct TimeoutExecutor {
    sender: Mutex<Sender<Job>>,
    workers: usize,
}

impl TimeoutExecutor {
    /// 创建执行器，`workers` 为线程池大小（至少 1）
    pub fn new(workers: usize) -> SessionResult<Self> {
        let workers = workers.max(1);
        let (sender, receiver) = mpsc::channel::<Job>();
        let receiver = Arc::new(Mutex::new(receiver));
        for index in 0..workers {
            let receiver = Arc::clone(&receiver);
            thread::Builder::new()
                .name(format!("adb-timeout-{}", index))
                .spawn(move || worker_loop(receiver))?;
        }
        Ok(Self {
            sender: Mutex::new(sender),
            workers,
        })
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// 在线程池中执行 `call`，超过 `deadline` 返回 `SessionError::Timeout`。
    ///
    /// # 参数
    /// - `operation`: 操作名，用于错误信息
    /// - `deadline`: 最长等待时间
    /// - `call`: 实际的阻塞调用，它自身的错误原样返回
    pub fn run_with_timeout<T, F>(
        &self,
        operation: &str,
        deadline: Duration,
        call: F,
    ) -> SessionResult<T>
    where
        T: Send + 'static,
        F: FnOnce() -> SessionResult<T> + Send + 'static,
    {
        let (result_tx, result_rx) = mpsc::sync_channel(1);
        let job: Job = Box::new(move || {
            let _ = result_tx.send(call());
        });
        lock_unpoisoned(&self.sender)
            .send(job)
            .map_err(|_| SessionError::connection_fault(operation, "executor is shut down"))?;

        match result_rx.recv_timeout(deadline) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                warn!(operation, ?deadline, "[Warning] {} timed out", operation);
                Err(SessionError::timeout(operation, deadline))
            }
            Err(RecvTimeoutError::Disconnected) => Err(SessionError::connection_fault(
                operation,
                "worker dropped the call",
            )),
        }
    }
}

fn worker_loop(receiver: Arc<Mutex<Receiver<Job>>>) {
    loop {
        let job = { lock_unpoisoned(&receiver).recv() };
        match job {
            Ok(job) => {
                if catch_unwind(AssertUnwindSafe(job)).is_err() {
                    warn!("device call panicked inside the timeout executor");
                }
            }
            Err(_) => {
                debug!("timeout executor channel closed, worker exiting");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_returns_call_result() {
        let executor = TimeoutExecutor::new(2).unwrap();
        let value = executor
            .run_with_timeout("sum", Duration::from_secs(1), || Ok(40 + 2))
            .unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn test_call_error_propagates_unchanged() {
        let executor = TimeoutExecutor::new(1).unwrap();
        let err = executor
            .run_with_timeout::<(), _>("tap", Duration::from_secs(1), || {
                Err(SessionError::protocol("closed"))
            })
            .unwrap_err();
        assert!(matches!(err, SessionError::Protocol { .. }));
    }

    #[test]
    fn test_hung_call_times_out() {
        let executor = TimeoutExecutor::new(1).unwrap();
        let started = Instant::now();
        let err = executor
            .run_with_timeout("screencap", Duration::from_millis(200), || {
                thread::sleep(Duration::from_secs(2));
                Ok(())
            })
            .unwrap_err();
        assert!(matches!(err, SessionError::Timeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_panicking_call_keeps_worker_alive() {
        let executor = TimeoutExecutor::new(1).unwrap();
        let err = executor
            .run_with_timeout::<(), _>("boom", Duration::from_secs(1), || panic!("boom"))
            .unwrap_err();
        assert!(matches!(err, SessionError::ConnectionFault { .. }));
        let value = executor
            .run_with_timeout("after", Duration::from_secs(1), || Ok(1))
            .unwrap();
        assert_eq!(value, 1);
    }
}

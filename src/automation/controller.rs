use super::{AutomationLoop, LoopStatus};
use crate::errors::SessionResult;
use crate::utils::lock_unpoisoned;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// 在独立线程上运行一个自动化循环
pub struct AutomationController {
    automation: Arc<AutomationLoop>,
    worker: Mutex<Option<JoinHandle<LoopStatus>>>,
    running: Arc<AtomicBool>,
}

/// 循环线程退出（包括 panic）时清除运行标志
struct RunningGuard(Arc<AtomicBool>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl AutomationController {
    pub fn new(automation: AutomationLoop) -> Self {
        Self {
            automation: Arc::new(automation),
            worker: Mutex::new(None),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn automation(&self) -> &Arc<AutomationLoop> {
        &self.automation
    }

    pub fn start(&self) -> SessionResult<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.automation.session().cancellation().reset();

        let automation = Arc::clone(&self.automation);
        let guard = RunningGuard(Arc::clone(&self.running));
        let spawned = thread::Builder::new()
            .name(format!("bot-loop-{}", self.automation.name()))
            .spawn(move || {
                let _guard = guard;
                let status = automation.run();
                info!(device = automation.name(), %status, "automation loop finished");
                status
            });
        match spawned {
            Ok(handle) => {
                *lock_unpoisoned(&self.worker) = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                Err(e.into())
            }
        }
    }

    /// 请求停止。循环在下一次停止检查时退出，正在进行的连接或重连也会放弃。
    pub fn stop(&self) {
        self.automation.session().stop();
    }

    /// 循环线程退出前一直为 true
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// 等待循环线程结束。超时或从未启动时返回 `None`。
    pub fn wait(&self, timeout: Option<Duration>) -> Option<LoopStatus> {
        let handle = lock_unpoisoned(&self.worker).take()?;
        if let Some(timeout) = timeout {
            let deadline = Instant::now() + timeout;
            while !handle.is_finished() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(10));
            }
            if !handle.is_finished() {
                *lock_unpoisoned(&self.worker) = Some(handle);
                return None;
            }
        }
        match handle.join() {
            Ok(status) => Some(status),
            Err(_) => {
                warn!(device = self.automation.name(), "automation loop panicked");
                Some(LoopStatus::Error("automation loop panicked".to_string()))
            }
        }
    }
}

impl Drop for AutomationController {
    fn drop(&mut self) {
        if self.is_running() {
            self.stop();
        }
    }
}

//! 外部注入命令的串行队列。
//!
//! 两种消费方式：
//! - 后台工作线程，`queue_command` 首次调用时自动启动；
//! - 自动化循环在每次停止检查时调用 `drain_now`，在调用线程上立即执行所有待处理命令。
//!
//! 开启内联模式（`set_inline_drain(true)`）后不会再启动工作线程。

use crate::errors::{SessionError, SessionResult};
use crate::sink::LogSink;
use crate::utils::lock_unpoisoned;
use chrono::{DateTime, Local};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const HISTORY_LIMIT: usize = 50;
const POLL_INTERVAL: Duration = Duration::from_millis(500);
const JOIN_TIMEOUT: Duration = Duration::from_secs(2);

pub type CommandAction = Box<dyn FnOnce() -> SessionResult<()> + Send + 'static>;

pub struct QueuedCommand {
    pub action: CommandAction,
    pub description: String,
    pub queued_at: DateTime<Local>,
}

/// 队列中的一项；`None` 是让工作线程退出的哨兵
type Slot = Option<QueuedCommand>;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct QueuedCommandInfo {
    pub description: String,
    pub queued_at: String,
    pub delay_seconds: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct QueueInfo {
    pub queue_size: usize,
    pub commands: Vec<QueuedCommandInfo>,
}

struct QueueShared {
    items: Mutex<VecDeque<Slot>>,
    available: Condvar,
    history: Mutex<VecDeque<(String, DateTime<Local>)>>,
    running: AtomicBool,
    inline_drain: AtomicBool,
    sink: Arc<dyn LogSink>,
}

impl QueueShared {
    fn push(&self, slot: Slot) {
        lock_unpoisoned(&self.items).push_back(slot);
        self.available.notify_one();
    }

    fn pop_timeout(&self, timeout: Duration) -> Option<Slot> {
        let items = lock_unpoisoned(&self.items);
        let (mut items, _) = self
            .available
            .wait_timeout_while(items, timeout, |items| items.is_empty())
            .unwrap_or_else(PoisonError::into_inner);
        items.pop_front()
    }

    fn finish_one(&self) {
        lock_unpoisoned(&self.history).pop_front();
    }
}

pub struct CommandQueue {
    name: String,
    shared: Arc<QueueShared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl CommandQueue {
    pub fn new<S: Into<String>>(name: S, sink: Arc<dyn LogSink>) -> Self {
        Self {
            name: name.into(),
            shared: Arc::new(QueueShared {
                items: Mutex::new(VecDeque::new()),
                available: Condvar::new(),
                history: Mutex::new(VecDeque::new()),
                running: AtomicBool::new(false),
                inline_drain: AtomicBool::new(false),
                sink,
            }),
            worker: Mutex::new(None),
        }
    }

    /// 加入一条命令，按提交顺序执行
    pub fn queue_command<F, S>(&self, action: F, description: S)
    where
        F: FnOnce() -> SessionResult<()> + Send + 'static,
        S: Into<String>,
    {
        if !self.is_worker_running() && !self.is_inline_drain() {
            self.start();
        }

        let mut description = description.into();
        if description.is_empty() {
            description = "Unknown command".to_string();
        }
        let queued_at = Local::now();
        {
            let mut history = lock_unpoisoned(&self.shared.history);
            history.push_back((description.clone(), queued_at));
            while history.len() > HISTORY_LIMIT {
                history.pop_front();
            }
        }
        self.shared.push(Some(QueuedCommand {
            action: Box::new(action),
            description,
            queued_at,
        }));
    }

    /// 启动后台工作线程，已在运行时什么都不做
    pub fn start(&self) {
        if self.shared.running.swap(true, Ordering::SeqCst) {
            return;
        }
        // 上一次 stop 留下的哨兵不能让新线程立刻退出
        lock_unpoisoned(&self.shared.items).retain(Option::is_some);

        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name(format!("command-queue-{}", self.name))
            .spawn(move || worker_loop(shared));
        match spawned {
            Ok(handle) => *lock_unpoisoned(&self.worker) = Some(handle),
            Err(e) => {
                warn!("failed to spawn command queue worker: {}", e);
                self.shared.running.store(false, Ordering::SeqCst);
            }
        }
    }

    /// 停止工作线程，最多等待两秒
    pub fn stop(&self) {
        self.shared.running.store(false, Ordering::SeqCst);
        let Some(handle) = lock_unpoisoned(&self.worker).take() else {
            return;
        };
        self.shared.push(None);
        let deadline = Instant::now() + JOIN_TIMEOUT;
        while !handle.is_finished() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        if handle.is_finished() {
            let _ = handle.join();
        } else {
            warn!(queue = %self.name, "command queue worker did not stop in time, detaching");
        }
    }

    /// 在调用线程上执行当前所有待处理命令。
    ///
    /// 命令自身的错误只记录日志；停止信号向上传播。遇到工作线程的哨兵时放回队列并结束。
    pub fn drain_now(&self) -> SessionResult<usize> {
        let mut executed = 0;
        loop {
            let slot = lock_unpoisoned(&self.shared.items).pop_front();
            let command = match slot {
                None => break,
                // 哨兵属于工作线程；没有工作线程时是上次 stop 的残留
                Some(None) if self.is_worker_running() => {
                    self.shared.push(None);
                    break;
                }
                Some(None) => continue,
                Some(Some(command)) => command,
            };
            executed += 1;
            execute(&self.shared, command, "[CMD] ")?;
        }
        Ok(executed)
    }

    /// 由自动化循环处理命令时打开
    pub fn set_inline_drain(&self, enabled: bool) {
        self.shared.inline_drain.store(enabled, Ordering::SeqCst);
    }

    pub fn is_inline_drain(&self) -> bool {
        self.shared.inline_drain.load(Ordering::SeqCst)
    }

    pub fn is_worker_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        lock_unpoisoned(&self.shared.items)
            .iter()
            .filter(|slot| slot.is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn info(&self) -> QueueInfo {
        let now = Local::now();
        let commands = lock_unpoisoned(&self.shared.history)
            .iter()
            .map(|(description, queued_at)| QueuedCommandInfo {
                description: description.clone(),
                queued_at: queued_at.format("%H:%M:%S").to_string(),
                delay_seconds: (now - *queued_at).num_milliseconds() as f64 / 1000.0,
            })
            .collect();
        QueueInfo {
            queue_size: self.len(),
            commands,
        }
    }
}

impl Drop for CommandQueue {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_loop(shared: Arc<QueueShared>) {
    while shared.running.load(Ordering::SeqCst) {
        match shared.pop_timeout(POLL_INTERVAL) {
            None => continue,
            Some(None) => break,
            Some(Some(command)) => {
                if let Err(e) = execute(&shared, command, "") {
                    debug!("stop signal inside queued command ignored by worker: {}", e);
                }
            }
        }
    }
    debug!("command queue worker exiting");
}

/// 执行一条命令。只有停止信号会作为错误返回。
fn execute(shared: &QueueShared, command: QueuedCommand, prefix: &str) -> SessionResult<()> {
    let QueuedCommand {
        action,
        description,
        ..
    } = command;
    let result = action();
    shared.finish_one();
    match result {
        Ok(()) => {
            shared.sink.log(&format!("{}{}", prefix, description), None);
            Ok(())
        }
        Err(e) if e.is_stop_signal() => Err(e),
        Err(e) => {
            shared
                .sink
                .log(&format!("{}Command error: {}", prefix, e), None);
            let failure = SessionError::command_failed(description, e.to_string());
            warn!(code = failure.error_code(), "{}", failure);
            Ok(())
        }
    }
}

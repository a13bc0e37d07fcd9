//! 一台设备的逻辑连接。
//!
//! 每个公开操作都按同一个套路执行：限时获取设备命令锁，经超时执行器调用传输层，
//! 离开作用域时释放锁；除停止信号和锁超时以外的任何失败都交给协作式重连，
//! 之后原调用重试一次。

pub mod gesture;
pub mod screen;

pub use gesture::{swipe_deadline, Gesture, DEFAULT_SWIPE_DURATION_MS, UNSET};

use crate::beans::AdbCommand;
use crate::cancel::CancellationToken;
use crate::config::SessionConfig;
use crate::context::SessionContext;
use crate::errors::{SessionError, SessionResult};
use crate::registry::{CommandLock, ReconnectState, Recovery};
use crate::sink::{LogSink, TracingSink};
use crate::transport::{DeviceHandle, Transport};
use crate::utils::{read_unpoisoned, write_unpoisoned};
use image::RgbaImage;
use std::fmt;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tracing::{debug, info};

const KEYCODE_ENTER: u32 = 66;
const KEYCODE_DEL: u32 = 67;

/// 设备序列号，所有共享状态都以它为键
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceIdentity(String);

impl DeviceIdentity {
    pub fn new<S: Into<String>>(serial: S) -> Self {
        Self(serial.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for DeviceIdentity {
    fn from(serial: &str) -> Self {
        Self::new(serial)
    }
}

impl From<String> for DeviceIdentity {
    fn from(serial: String) -> Self {
        Self(serial)
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub struct DeviceSession {
    identity: DeviceIdentity,
    device_name: String,
    ctx: Arc<SessionContext>,
    transport: Arc<dyn Transport>,
    sink: Arc<dyn LogSink>,
    should_stop: CancellationToken,
    command_lock: Arc<CommandLock>,
    reconnect_state: Arc<ReconnectState>,
    devices: RwLock<Vec<Arc<dyn DeviceHandle>>>,
    handle: RwLock<Option<Arc<dyn DeviceHandle>>>,
}

impl DeviceSession {
    /// 创建会话，不会连接设备，需要再调用 `connect`
    pub fn new<I: Into<DeviceIdentity>>(
        ctx: Arc<SessionContext>,
        transport: Arc<dyn Transport>,
        identity: I,
    ) -> Self {
        let identity = identity.into();
        let command_lock = ctx.command_locks().get_lock(&identity);
        let reconnect_state = ctx.reconnects().get_state(&identity);
        Self {
            device_name: identity.to_string(),
            sink: Arc::new(TracingSink::new(identity.as_str())),
            identity,
            ctx,
            transport,
            should_stop: CancellationToken::new(),
            command_lock,
            reconnect_state,
            devices: RwLock::new(Vec::new()),
            handle: RwLock::new(None),
        }
    }

    /// 创建并立即连接
    pub fn open<I: Into<DeviceIdentity>>(
        ctx: Arc<SessionContext>,
        transport: Arc<dyn Transport>,
        identity: I,
    ) -> SessionResult<Self> {
        let session = Self::new(ctx, transport, identity);
        session.connect()?;
        Ok(session)
    }

    /// 日志中使用的友好名称，默认等于序列号
    pub fn with_device_name<S: Into<String>>(mut self, name: S) -> Self {
        self.device_name = name.into();
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.sink = sink;
        self
    }

    /// 与自动化循环共享同一个取消标志
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.should_stop = token;
        self
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.should_stop
    }

    pub fn reconnect_state(&self) -> &Arc<ReconnectState> {
        &self.reconnect_state
    }

    pub fn context(&self) -> &Arc<SessionContext> {
        &self.ctx
    }

    pub fn is_connected(&self) -> bool {
        read_unpoisoned(&self.handle).is_some()
    }

    /// 让正在进行的连接/重连尽快放弃
    pub fn stop(&self) {
        self.should_stop.cancel();
    }

    pub fn log(&self, message: &str) {
        self.sink.log(message, None);
    }

    pub fn log_image(&self, message: &str, image: &RgbaImage) {
        self.sink.log(message, Some(image));
    }

    pub fn sink(&self) -> Arc<dyn LogSink> {
        Arc::clone(&self.sink)
    }

    // ========================================================================
    // 连接管理
    // ========================================================================

    /// 向 adb server 查询设备并找到序列号匹配的那一台。
    ///
    /// server 不可达或没有任何设备时立即失败，不重试；
    /// 否则最多探测 `max_reconnect_attempts` 轮，每轮之后检查停止标志。
    /// 成功后清除该设备的永久失败标志。
    pub fn connect(&self) -> SessionResult<()> {
        let devices = self.transport.list_devices().map_err(|e| {
            self.log(&format!("ADB ERROR: ADB server not running - {}", e));
            SessionError::stopped(format!("ADB server not running: {}", e))
        })?;
        if devices.is_empty() {
            self.log("ADB ERROR: No devices attached");
            return Err(SessionError::stopped("No devices attached"));
        }
        *write_unpoisoned(&self.devices) = devices;
        self.probe_until_matched("Connection")?;
        self.reconnect_state.mark_connected();
        Ok(())
    }

    fn reconnect(&self) -> SessionResult<()> {
        let devices = self
            .transport
            .list_devices()
            .map_err(|e| SessionError::stopped(format!("ADB error during reconnection: {}", e)))?;
        if devices.is_empty() {
            return Err(SessionError::stopped(
                "No devices attached during reconnection",
            ));
        }
        *write_unpoisoned(&self.devices) = devices;
        self.probe_until_matched("Reconnection")
    }

    fn probe_until_matched(&self, phase: &str) -> SessionResult<()> {
        let max_attempts = self.ctx.config().max_reconnect_attempts;
        let mut attempts = 0;
        while !self.connect_to_device() {
            attempts += 1;
            if self.should_stop.is_cancelled() {
                self.log(&format!("{} stopped by user", phase));
                return Err(SessionError::stopped(format!("{} stopped by user", phase)));
            }
            if attempts >= max_attempts {
                self.log(&format!("{} failed after {} attempts", phase, max_attempts));
                return Err(SessionError::stopped(format!(
                    "{} failed after {} attempts",
                    phase, max_attempts
                )));
            }
            self.log(&format!(
                "{} failed, retrying... ({}/{})",
                phase, attempts, max_attempts
            ));
        }
        Ok(())
    }

    /// 对每台设备读取身份属性，匹配则重新绑定句柄。一轮都不匹配时短暂休眠并返回 false。
    fn connect_to_device(&self) -> bool {
        let config = self.ctx.config();
        let devices = read_unpoisoned(&self.devices).clone();
        for device in devices {
            let key = config.identity_property.clone();
            let probe = Arc::clone(&device);
            let detected = self.ctx.executor().run_with_timeout(
                "getprop",
                config.adb_timeout(),
                move || probe.get_property(&key),
            );
            let detected = match detected {
                Ok(value) => value.trim().to_string(),
                Err(e) => {
                    self.log(&format!("Device connection error: {}", e));
                    continue;
                }
            };
            if detected.is_empty() {
                continue;
            }
            debug!(device = %self.identity, "Detected serial: {}", detected);
            if detected.contains(self.identity.as_str()) {
                self.log(&format!(
                    "Connected to device: {} (serial: {})",
                    self.device_name, detected
                ));
                *write_unpoisoned(&self.handle) = Some(device);
                return true;
            }
        }
        std::thread::sleep(config.reconnect_backoff());
        false
    }

    // ========================================================================
    // 设备操作
    // ========================================================================

    /// 截图并解码为 RGBA 像素缓冲
    pub fn capture_screen(&self) -> SessionResult<RgbaImage> {
        self.with_retry("screencap", || {
            let bytes = self.with_command_lock("screencap", |handle, config| {
                self.ctx
                    .executor()
                    .run_with_timeout("screencap", config.adb_timeout(), move || {
                        handle.capture_screen_raw()
                    })
            })?;
            screen::decode_capture(&bytes).map_err(|e| {
                self.log(&format!("[Warning] {}", e));
                e
            })
        })
    }

    /// 点击或滑动。
    ///
    /// # 参数
    /// - `x1`, `y1`: 起点（点击位置）
    /// - `x2`, `y2`: 终点，`UNSET` 表示与起点相同，此时退化为点击
    /// - `duration_ms`: 滑动时长
    /// - `suppress_log`: 为 true 时不记录这次操作
    pub fn touch(
        &self,
        x1: i32,
        y1: i32,
        x2: i32,
        y2: i32,
        duration_ms: u32,
        suppress_log: bool,
    ) -> SessionResult<()> {
        let gesture = Gesture::resolve(x1, y1, x2, y2, duration_ms);
        let operation = gesture.operation();
        self.with_retry(operation, || {
            self.with_command_lock(operation, |handle, config| {
                if !suppress_log {
                    self.log(&gesture.describe());
                }
                let deadline = gesture.deadline(config.adb_timeout());
                self.run_shell(handle, operation, &gesture.command(), deadline)
                    .map(|_| ())
            })
        })
    }

    pub fn tap(&self, x: i32, y: i32) -> SessionResult<()> {
        self.touch(x, y, UNSET, UNSET, DEFAULT_SWIPE_DURATION_MS, false)
    }

    pub fn swipe(&self, x1: i32, y1: i32, x2: i32, y2: i32, duration_ms: u32) -> SessionResult<()> {
        self.touch(x1, y1, x2, y2, duration_ms, false)
    }

    /// 输入文本，然后按回车
    pub fn send_text(&self, text: &str) -> SessionResult<()> {
        self.log(&format!("Text input: \"{}\"", text));
        let command = AdbCommand::from(["input", "text"]).quoted_arg(text);
        self.with_retry("send_text", || {
            self.with_command_lock("send_text", |handle, config| {
                self.run_shell(handle, "send_text", &command, config.adb_timeout())
                    .map(|_| ())
            })
        })?;
        self.press_enter()
    }

    pub fn press_enter(&self) -> SessionResult<()> {
        let command = AdbCommand::from(["input", "keyevent"]).arg(KEYCODE_ENTER);
        self.with_retry("press_enter", || {
            self.with_command_lock("press_enter", |handle, config| {
                self.run_shell(handle, "press_enter", &command, config.adb_timeout())
                    .map(|_| ())
            })
        })
    }

    /// 连续按 `count` 次退格，整个过程只持有一次命令锁
    pub fn press_backspace(&self, count: u32) -> SessionResult<()> {
        let command = AdbCommand::from(["input", "keyevent"]).arg(KEYCODE_DEL);
        self.with_retry("press_backspace", || {
            self.with_command_lock("press_backspace", |handle, config| {
                for _ in 0..count {
                    self.run_shell(
                        Arc::clone(&handle),
                        "press_backspace",
                        &command,
                        config.adb_timeout(),
                    )?;
                }
                Ok(())
            })
        })
    }

    // ========================================================================
    // 内部组合
    // ========================================================================

    /// 执行一次调用，失败时协作重连后再重试一次
    fn with_retry<R, F>(&self, operation: &str, call: F) -> SessionResult<R>
    where
        F: Fn() -> SessionResult<R>,
    {
        if self.reconnect_state.is_permanently_failed() {
            return Err(SessionError::stopped(format!(
                "{} refused: device connection permanently failed",
                operation
            )));
        }
        let observed_epoch = self.reconnect_state.epoch();
        let error = match call() {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_retryable() => return Err(e),
            Err(e) => e,
        };

        let started = Instant::now();
        let recovery = self.reconnect_state.coordinate(observed_epoch, || {
            self.log(&format!("{} failed: {} - Reconnecting...", operation, error));
            self.reconnect()
        });
        match recovery {
            Ok(Recovery::Reconnected) => info!(
                device = %self.identity,
                operation,
                elapsed = ?started.elapsed(),
                "reconnected, retrying"
            ),
            Ok(Recovery::AlreadyReconnected) => debug!(
                device = %self.identity,
                operation,
                elapsed = ?started.elapsed(),
                "connection restored by another caller, retrying"
            ),
            Err(e) => {
                self.log(&format!("{} aborted: {}", operation, e));
                return Err(e);
            }
        }
        call()
    }

    /// 持有设备命令锁执行 `f`，锁在返回时释放
    fn with_command_lock<R, F>(&self, operation: &str, f: F) -> SessionResult<R>
    where
        F: FnOnce(Arc<dyn DeviceHandle>, &SessionConfig) -> SessionResult<R>,
    {
        let config = self.ctx.config();
        let _guard = self.command_lock.acquire(operation, config.lock_timeout())?;
        let handle = read_unpoisoned(&self.handle)
            .clone()
            .ok_or_else(|| SessionError::connection_fault(operation, "Device not connected"))?;
        f(handle, &config)
    }

    fn run_shell(
        &self,
        handle: Arc<dyn DeviceHandle>,
        operation: &str,
        command: &AdbCommand,
        deadline: Duration,
    ) -> SessionResult<String> {
        let command = command.get_command();
        self.ctx
            .executor()
            .run_with_timeout(operation, deadline, move || handle.shell(&command))
    }
}

impl fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceSession")
            .field("identity", &self.identity)
            .field("device_name", &self.device_name)
            .field("connected", &self.is_connected())
            .field("should_stop", &self.should_stop.is_cancelled())
            .finish()
    }
}

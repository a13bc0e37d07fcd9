#![allow(dead_code)]

use adbpilot::{
    DeviceHandle, LogSink, SessionConfig, SessionContext, SessionError, SessionResult, Transport,
};
use image::{DynamicImage, ImageOutputFormat, Rgba, RgbaImage};
use std::collections::VecDeque;
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

pub const SERIAL: &str = "emulator-5554";

/// 模拟设备与 adb server 的共享状态，测试通过它注入故障并检查调用
#[derive(Default)]
pub struct MockState {
    /// 为 true 时 shell 和截图都返回连接故障，直到下一次探测修复
    pub broken: AtomicBool,
    /// 为 true 时探测不会修复连接，并且读到的序列号不匹配
    pub unreachable: AtomicBool,
    pub fail_list: AtomicBool,
    pub empty_list: AtomicBool,
    pub probe_delay_ms: AtomicU64,
    pub op_delay_ms: AtomicU64,
    /// 接下来这么多次 shell 调用会卡住
    pub hang_next: AtomicUsize,
    pub hang_ms: AtomicU64,

    pub list_calls: AtomicUsize,
    pub probes: AtomicUsize,
    pub attempts: AtomicUsize,
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    /// 成功执行的 shell 命令
    pub shell_log: Mutex<Vec<String>>,
    /// 截图依次返回这些字节，用完后返回一张正常的截图
    pub captures: Mutex<VecDeque<Vec<u8>>>,
}

impl MockState {
    pub fn executed(&self) -> Vec<String> {
        self.shell_log.lock().unwrap().clone()
    }

    pub fn reset_counters(&self) {
        self.list_calls.store(0, Ordering::SeqCst);
        self.probes.store(0, Ordering::SeqCst);
        self.attempts.store(0, Ordering::SeqCst);
    }

    fn enter(&self) -> InFlight<'_> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        InFlight(self)
    }
}

struct InFlight<'a>(&'a MockState);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct MockDevice {
    serial: String,
    state: Arc<MockState>,
}

impl DeviceHandle for MockDevice {
    fn serial(&self) -> &str {
        &self.serial
    }

    fn get_property(&self, _key: &str) -> SessionResult<String> {
        self.state.probes.fetch_add(1, Ordering::SeqCst);
        sleep_ms(self.state.probe_delay_ms.load(Ordering::SeqCst));
        if self.state.unreachable.load(Ordering::SeqCst) {
            return Ok("some-other-device\n".to_string());
        }
        self.state.broken.store(false, Ordering::SeqCst);
        Ok(format!("{}\n", self.serial))
    }

    fn capture_screen_raw(&self) -> SessionResult<Vec<u8>> {
        let _guard = self.state.enter();
        self.state.attempts.fetch_add(1, Ordering::SeqCst);
        sleep_ms(self.state.op_delay_ms.load(Ordering::SeqCst));
        if self.state.broken.load(Ordering::SeqCst) {
            return Err(SessionError::connection_fault("screencap", "connection reset"));
        }
        let queued = self.state.captures.lock().unwrap().pop_front();
        Ok(queued.unwrap_or_else(|| png_bytes(32, 24)))
    }

    fn shell(&self, command: &str) -> SessionResult<String> {
        let _guard = self.state.enter();
        self.state.attempts.fetch_add(1, Ordering::SeqCst);
        let hang = self
            .state
            .hang_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if hang {
            sleep_ms(self.state.hang_ms.load(Ordering::SeqCst));
        }
        sleep_ms(self.state.op_delay_ms.load(Ordering::SeqCst));
        if self.state.broken.load(Ordering::SeqCst) {
            return Err(SessionError::connection_fault("shell", "device offline"));
        }
        self.state.shell_log.lock().unwrap().push(command.to_string());
        Ok(String::new())
    }
}

pub struct MockTransport {
    pub state: Arc<MockState>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Arc::new(MockState::default()),
        })
    }
}

impl Transport for MockTransport {
    fn list_devices(&self) -> SessionResult<Vec<Arc<dyn DeviceHandle>>> {
        self.state.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.state.fail_list.load(Ordering::SeqCst) {
            return Err(SessionError::protocol("Connection refused"));
        }
        if self.state.empty_list.load(Ordering::SeqCst) {
            return Ok(Vec::new());
        }
        let device: Arc<dyn DeviceHandle> = Arc::new(MockDevice {
            serial: SERIAL.to_string(),
            state: Arc::clone(&self.state),
        });
        Ok(vec![device])
    }
}

/// 记录所有日志，供断言使用
#[derive(Default)]
pub struct MemorySink {
    messages: Mutex<Vec<String>>,
}

impl MemorySink {
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .any(|message| message.contains(needle))
    }
}

impl LogSink for MemorySink {
    fn log(&self, message: &str, _image: Option<&RgbaImage>) {
        self.messages.lock().unwrap().push(message.to_string());
    }
}

/// 测试用的短超时配置
pub fn fast_config() -> SessionConfig {
    SessionConfig {
        max_reconnect_attempts: 3,
        adb_timeout: 1.0,
        adb_lock_timeout: 2.0,
        reconnect_backoff_ms: 10,
        executor_workers: 8,
        ..SessionConfig::default()
    }
}

pub fn context(config: SessionConfig) -> Arc<SessionContext> {
    SessionContext::new(config).unwrap()
}

pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    encode_png(&RgbaImage::from_fn(width, height, |x, y| {
        Rgba([(x * 8 % 256) as u8, (y * 8 % 256) as u8, 128, 255])
    }))
}

pub fn encode_png(image: &RgbaImage) -> Vec<u8> {
    let mut bytes = Vec::new();
    DynamicImage::ImageRgba8(image.clone())
        .write_to(&mut Cursor::new(&mut bytes), ImageOutputFormat::Png)
        .unwrap();
    bytes
}

/// 轮询直到条件成立或超时
pub fn wait_until<F: Fn() -> bool>(timeout: Duration, condition: F) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}

fn sleep_ms(ms: u64) {
    if ms > 0 {
        thread::sleep(Duration::from_millis(ms));
    }
}

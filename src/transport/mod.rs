//! 设备会话依赖的传输层抽象，只要求四种能力。

pub mod adb;

pub use adb::{AdbDeviceHandle, AdbTransport};

use crate::errors::SessionResult;
use std::sync::Arc;

/// 一台已挂载设备的句柄
pub trait DeviceHandle: Send + Sync {
    /// 传输层报告的序列号
    fn serial(&self) -> &str;

    fn get_property(&self, key: &str) -> SessionResult<String>;

    /// 原始截图字节（PNG 编码）
    fn capture_screen_raw(&self) -> SessionResult<Vec<u8>>;

    fn shell(&self, command: &str) -> SessionResult<String>;
}

pub trait Transport: Send + Sync {
    fn list_devices(&self) -> SessionResult<Vec<Arc<dyn DeviceHandle>>>;
}

use crate::beans::{parse_device_list, AdbCommand};
use crate::config::SessionConfig;
use crate::connections::{AdbProtocol, AdbSocketConfig};
use crate::errors::{SessionError, SessionResult};
use crate::transport::{DeviceHandle, Transport};
use std::net::TcpStream;
use std::sync::Arc;
use tracing::debug;

/// 通过本地 adb server 的 smart socket 协议访问设备
#[derive(Debug, Clone, Default)]
pub struct AdbTransport {
    config: AdbSocketConfig,
}

impl AdbTransport {
    pub fn new(config: AdbSocketConfig) -> Self {
        Self { config }
    }

    pub fn from_session_config(config: &SessionConfig) -> SessionResult<Self> {
        Ok(Self::new(AdbSocketConfig::new(
            config.adb_addr()?,
            Some(config.adb_timeout()),
        )))
    }

    /// 获取 ADB 服务器的版本号。
    pub fn server_version(&self) -> SessionResult<usize> {
        let mut stream = self.config.safe_connect()?;
        stream.send_cmd_then_check_okay("host:version")?;
        let version = stream.read_string_block()?;
        usize::from_str_radix(&version, 16)
            .map_err(|_| SessionError::protocol(format!("bad version {:?}", version)))
    }
}

impl Transport for AdbTransport {
    fn list_devices(&self) -> SessionResult<Vec<Arc<dyn DeviceHandle>>> {
        let mut stream = self.config.safe_connect()?;
        stream.send_cmd_then_check_okay("host:devices")?;
        let resp = stream.read_string_block()?;
        Ok(parse_device_list(&resp)
            .into_iter()
            .filter(|info| info.is_online())
            .map(|info| {
                Arc::new(AdbDeviceHandle::new(&info.serial, self.config.clone())) as Arc<dyn DeviceHandle>
            })
            .collect())
    }
}

/// AdbDeviceHandle 每个请求都新建一条连接并切换到目标设备
#[derive(Debug, Clone)]
pub struct AdbDeviceHandle {
    serial: String,
    config: AdbSocketConfig,
}

impl AdbDeviceHandle {
    pub fn new(serial: &str, config: AdbSocketConfig) -> Self {
        Self {
            serial: serial.to_string(),
            config,
        }
    }

    /// 打开到设备的传输通道，然后发送 `service`
    fn open_service(&self, service: &str) -> SessionResult<TcpStream> {
        let mut stream = self.config.safe_connect()?;
        stream.send_cmd_then_check_okay(&format!("host:transport:{}", self.serial))?;
        stream.send_cmd_then_check_okay(service)?;
        Ok(stream)
    }
}

impl DeviceHandle for AdbDeviceHandle {
    fn serial(&self) -> &str {
        &self.serial
    }

    fn get_property(&self, key: &str) -> SessionResult<String> {
        let output = self.shell(&AdbCommand::from(["getprop"]).arg(key).get_command())?;
        Ok(output.trim().to_string())
    }

    fn capture_screen_raw(&self) -> SessionResult<Vec<u8>> {
        // exec: 不经过 pty，二进制数据不会被换行转换破坏
        let mut stream = self.open_service("exec:screencap -p")?;
        let data = stream.read_until_close()?;
        debug!(serial = %self.serial, size = data.len(), "screencap received");
        Ok(data)
    }

    fn shell(&self, command: &str) -> SessionResult<String> {
        let mut stream = self.open_service(&format!("shell:{}", command))?;
        let output = stream.read_until_close()?;
        Ok(String::from_utf8_lossy(&output).to_string())
    }
}

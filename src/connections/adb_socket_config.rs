use crate::errors::SessionResult;
use crate::utils::start_adb_server;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpStream};
use std::time::Duration;
use tracing::{error, warn};

const DEFAULT_ADB_PORT: u16 = 5037;
const DEFAULT_ADB_TIMEOUT: Duration = Duration::from_secs(30);

const DEFAULT_ADB_HOST: Ipv4Addr = Ipv4Addr::new(127, 0, 0, 1);

///
/// Adb Socket相关配置
/// addr: adb server 地址, 默认值 127.0.0.1:5037
/// timeout: socket 读超时, 默认值 30s
/// auto_start_server: 连接被拒绝时是否尝试启动 adb server
#[derive(Clone, Debug)]
pub struct AdbSocketConfig {
    pub addr: SocketAddr,
    pub timeout: Duration,
    pub auto_start_server: bool,
}

impl Default for AdbSocketConfig {
    fn default() -> Self {
        AdbSocketConfig {
            addr: SocketAddr::new(IpAddr::V4(DEFAULT_ADB_HOST), DEFAULT_ADB_PORT),
            timeout: DEFAULT_ADB_TIMEOUT,
            auto_start_server: true,
        }
    }
}

impl AdbSocketConfig {
    /// 创建一个新的 socket 配置。
    ///
    /// # 参数
    /// - `socket_addr`: ADB服务器的Socket地址
    /// - `timeout`: 读超时，未指定时使用默认值
    pub fn new<T: Into<SocketAddr>>(socket_addr: T, timeout: Option<Duration>) -> Self {
        Self {
            addr: socket_addr.into(),
            timeout: timeout.unwrap_or(DEFAULT_ADB_TIMEOUT),
            auto_start_server: true,
        }
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    ///
    /// 使用配置连接到Adb Server
    /// 本方法不会尝试启动 adb server, 请使用safe_connect
    pub fn create_socket(&self) -> SessionResult<TcpStream> {
        let stream = TcpStream::connect_timeout(&self.addr, self.timeout)?;
        Ok(stream)
    }

    /// 安全尝试连接到ADB服务器，第一次失败时尝试启动 adb server 后重连一次。
    pub fn safe_connect(&self) -> SessionResult<TcpStream> {
        let stream = match self.create_socket() {
            Ok(stream) => stream,
            Err(e) if self.auto_start_server => {
                error!("Connect To Adb Failed, Try To Start Adb Server >>> {:#?}", e);
                if let Err(start_err) = start_adb_server() {
                    warn!("Start Adb Server Failed >>> {}", start_err);
                    return Err(e);
                }
                self.create_socket()?
            }
            Err(e) => return Err(e),
        };
        stream.set_read_timeout(Some(self.timeout))?;
        Ok(stream)
    }
}

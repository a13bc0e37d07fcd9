use crate::errors::{SessionError, SessionResult};
use crate::utils::{read_unpoisoned, write_unpoisoned};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{info, warn};

pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 10;
pub const DEFAULT_ADB_TIMEOUT: f64 = 30.0;
pub const DEFAULT_ADB_LOCK_TIMEOUT: f64 = 10.0;

const CONFIG_PATH_ENV: &str = "ADBPILOT_CONFIG";
const DEFAULT_CONFIG_FILE: &str = "master.conf";

/// master.conf 中一台设备的条目
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct DeviceEntry {
    pub serial: String,
}

/// 设备会话层的全局配置，对应 master.conf（JSON），未知字段忽略
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    pub max_reconnect_attempts: u32,
    /// 秒
    pub adb_timeout: f64,
    /// 秒
    pub adb_lock_timeout: f64,
    pub reconnect_backoff_ms: u64,
    pub executor_workers: usize,
    pub identity_property: String,
    pub adb_host: String,
    pub adb_port: u16,
    pub devices: HashMap<String, DeviceEntry>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            adb_timeout: DEFAULT_ADB_TIMEOUT,
            adb_lock_timeout: DEFAULT_ADB_LOCK_TIMEOUT,
            reconnect_backoff_ms: 1000,
            executor_workers: 4,
            identity_property: "ro.boot.serialno".to_string(),
            adb_host: "127.0.0.1".to_string(),
            adb_port: 5037,
            devices: HashMap::new(),
        }
    }
}

impl SessionConfig {
    pub fn adb_timeout(&self) -> Duration {
        secs(self.adb_timeout, DEFAULT_ADB_TIMEOUT)
    }

    pub fn lock_timeout(&self) -> Duration {
        secs(self.adb_lock_timeout, DEFAULT_ADB_LOCK_TIMEOUT)
    }

    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_millis(self.reconnect_backoff_ms)
    }

    pub fn adb_addr(&self) -> SessionResult<SocketAddr> {
        let ip: IpAddr = self
            .adb_host
            .parse()
            .map_err(|_| SessionError::config(format!("invalid adb_host {:?}", self.adb_host)))?;
        Ok(SocketAddr::new(ip, self.adb_port))
    }

    /// 根据设备名获取序列号
    pub fn serial_for(&self, name: &str) -> SessionResult<String> {
        self.devices
            .get(name)
            .map(|entry| entry.serial.clone())
            .ok_or_else(|| SessionError::device_not_found(name))
    }

    pub fn from_json(text: &str) -> SessionResult<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// 严格读取：文件不存在或格式错误都返回错误
    pub fn load_from(path: &Path) -> SessionResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }
}

fn secs(value: f64, fallback: f64) -> Duration {
    if value.is_finite() && value > 0.0 {
        Duration::from_secs_f64(value)
    } else {
        Duration::from_secs_f64(fallback)
    }
}

static CACHED_CONFIG: Lazy<RwLock<Option<Arc<SessionConfig>>>> = Lazy::new(|| RwLock::new(None));

pub fn config_path() -> PathBuf {
    std::env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
}

/// 读取并缓存配置。文件缺失或损坏时使用默认值。
pub fn load_config() -> Arc<SessionConfig> {
    if let Some(config) = read_unpoisoned(&CACHED_CONFIG).as_ref() {
        return config.clone();
    }
    let mut cached = write_unpoisoned(&CACHED_CONFIG);
    if let Some(config) = cached.as_ref() {
        return config.clone();
    }
    let path = config_path();
    let config = match SessionConfig::load_from(&path) {
        Ok(config) => {
            info!("Loaded config from {:?}", path);
            config
        }
        Err(e) => {
            warn!("Using default config, could not read {:?}: {}", path, e);
            SessionConfig::default()
        }
    };
    let config = Arc::new(config);
    *cached = Some(config.clone());
    config
}

/// 丢弃缓存并重新读取
pub fn reload_config() -> Arc<SessionConfig> {
    write_unpoisoned(&CACHED_CONFIG).take();
    load_config()
}

pub fn get_serial(name: &str) -> SessionResult<String> {
    load_config().serial_for(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_fill_missing_keys() {
        let config = SessionConfig::from_json(r#"{"adb_timeout": 5, "LDPlayerPath": "C:/x"}"#).unwrap();
        assert_eq!(config.adb_timeout(), Duration::from_secs(5));
        assert_eq!(config.max_reconnect_attempts, 10);
        assert_eq!(config.lock_timeout(), Duration::from_secs(10));
        assert_eq!(config.identity_property, "ro.boot.serialno");
    }

    #[test]
    fn test_device_serial_lookup() {
        let config = SessionConfig::from_json(
            r#"{"devices": {"Gelvil": {"serial": "emulator-5554", "window": "LDPlayer"}}}"#,
        )
        .unwrap();
        assert_eq!(config.serial_for("Gelvil").unwrap(), "emulator-5554");
        assert!(matches!(
            config.serial_for("Nobody"),
            Err(SessionError::DeviceNotFound { .. })
        ));
    }

    #[test]
    fn test_non_positive_timeout_falls_back() {
        let config = SessionConfig {
            adb_timeout: 0.0,
            ..SessionConfig::default()
        };
        assert_eq!(config.adb_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(br#"{"max_reconnect_attempts": 3}"#).unwrap();
        let config = SessionConfig::load_from(file.path()).unwrap();
        assert_eq!(config.max_reconnect_attempts, 3);
        assert_eq!(config.adb_addr().unwrap().port(), 5037);
    }
}

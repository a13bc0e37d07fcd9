use crate::errors::{SessionError, SessionResult};
use std::path::PathBuf;
use std::process::Command;
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::info;
use tracing_subscriber::EnvFilter;
use which::which;

#[cfg(windows)]
const ADB_EXECUTE_FILE_NAME: &str = "adb.exe";
#[cfg(not(windows))]
const ADB_EXECUTE_FILE_NAME: &str = "adb";

const ADBUTILS_ADB_PATH: &str = "ADBUTILS_ADB_PATH";

/// 查找 adb 可执行文件，优先使用环境变量 ADBUTILS_ADB_PATH
pub fn adb_path() -> SessionResult<PathBuf> {
    if let Ok(path) = std::env::var(ADBUTILS_ADB_PATH) {
        return Ok(PathBuf::from(path));
    }
    which(ADB_EXECUTE_FILE_NAME).map_err(|_| SessionError::config("adb not found"))
}

/// 启动本地 adb server
pub fn start_adb_server() -> SessionResult<()> {
    let path = adb_path()?;
    info!("Starting Adb Server >>> {:#?}", &path);
    let output = Command::new(path).arg("start-server").output()?;
    if !output.status.success() {
        return Err(SessionError::protocol(format!(
            "adb start-server failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(())
}

/// 初始化 tracing 日志，重复调用无副作用
pub fn init_logger() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_names(true)
        .try_init();
}

pub(crate) fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn read_unpoisoned<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn write_unpoisoned<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

use crate::config::{self, SessionConfig};
use crate::errors::SessionResult;
use crate::executor::TimeoutExecutor;
use crate::needles::NeedleCache;
use crate::registry::{CommandLockRegistry, ReconnectRegistry};
use crate::utils::{read_unpoisoned, write_unpoisoned};
use std::sync::{Arc, RwLock};

/// 进程级共享状态：命令锁、重连状态、超时线程池、模板缓存与配置。
///
/// 每个 `DeviceSession` 在构造时拿到同一个 `Arc<SessionContext>`，
/// 测试中每次新建一个即可得到干净的状态。
pub struct SessionContext {
    config: RwLock<Arc<SessionConfig>>,
    command_locks: CommandLockRegistry,
    reconnects: ReconnectRegistry,
    executor: TimeoutExecutor,
    needles: NeedleCache,
}

impl SessionContext {
    pub fn new(config: SessionConfig) -> SessionResult<Arc<Self>> {
        let executor = TimeoutExecutor::new(config.executor_workers)?;
        Ok(Arc::new(Self {
            config: RwLock::new(Arc::new(config)),
            command_locks: CommandLockRegistry::default(),
            reconnects: ReconnectRegistry::default(),
            executor,
            needles: NeedleCache::default(),
        }))
    }

    /// 使用 master.conf 的缓存配置
    pub fn from_config_file() -> SessionResult<Arc<Self>> {
        Self::new(config::load_config().as_ref().clone())
    }

    pub fn config(&self) -> Arc<SessionConfig> {
        Arc::clone(&read_unpoisoned(&self.config))
    }

    pub fn set_config(&self, config: SessionConfig) {
        *write_unpoisoned(&self.config) = Arc::new(config);
    }

    /// 重新读取 master.conf。线程池大小在创建时确定，不受影响。
    pub fn reload_config(&self) -> Arc<SessionConfig> {
        let fresh = config::reload_config();
        *write_unpoisoned(&self.config) = Arc::clone(&fresh);
        fresh
    }

    pub fn command_locks(&self) -> &CommandLockRegistry {
        &self.command_locks
    }

    pub fn reconnects(&self) -> &ReconnectRegistry {
        &self.reconnects
    }

    pub fn executor(&self) -> &TimeoutExecutor {
        &self.executor
    }

    pub fn needles(&self) -> &NeedleCache {
        &self.needles
    }
}

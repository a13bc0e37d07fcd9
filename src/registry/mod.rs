//! 以设备序列号为键的进程级共享状态。条目创建后永不删除。

pub mod command_lock;
pub mod reconnect;

pub use command_lock::{CommandGuard, CommandLock};
pub use reconnect::{ReconnectFlags, ReconnectState, Recovery};

use crate::session::DeviceIdentity;
use crate::utils::{read_unpoisoned, write_unpoisoned};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// 每个设备一个共享对象，双重检查加锁保证同一序列号只创建一次
pub struct IdentityRegistry<T> {
    entries: RwLock<HashMap<DeviceIdentity, Arc<T>>>,
}

impl<T> Default for IdentityRegistry<T> {
    fn default() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl<T> IdentityRegistry<T> {
    pub fn get_or_create<F>(&self, identity: &DeviceIdentity, create: F) -> Arc<T>
    where
        F: FnOnce() -> T,
    {
        if let Some(entry) = read_unpoisoned(&self.entries).get(identity) {
            return Arc::clone(entry);
        }
        let mut entries = write_unpoisoned(&self.entries);
        Arc::clone(
            entries
                .entry(identity.clone())
                .or_insert_with(|| Arc::new(create())),
        )
    }

    pub fn len(&self) -> usize {
        read_unpoisoned(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// 每个设备一把命令锁，保证同一设备同时只有一个 ADB 命令在执行
#[derive(Default)]
pub struct CommandLockRegistry {
    locks: IdentityRegistry<CommandLock>,
}

impl CommandLockRegistry {
    pub fn get_lock(&self, identity: &DeviceIdentity) -> Arc<CommandLock> {
        self.locks
            .get_or_create(identity, || CommandLock::new(identity.as_str()))
    }
}

/// 每个设备一份共享的重连状态
#[derive(Default)]
pub struct ReconnectRegistry {
    states: IdentityRegistry<ReconnectState>,
}

impl ReconnectRegistry {
    pub fn get_state(&self, identity: &DeviceIdentity) -> Arc<ReconnectState> {
        self.states.get_or_create(identity, ReconnectState::default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_same_identity_same_lock() {
        let registry = CommandLockRegistry::default();
        let a = registry.get_lock(&DeviceIdentity::from("emulator-5554"));
        let b = registry.get_lock(&DeviceIdentity::from("emulator-5554"));
        let c = registry.get_lock(&DeviceIdentity::from("emulator-5556"));
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
    }

    #[test]
    fn test_concurrent_creation_yields_one_entry() {
        let registry = Arc::new(ReconnectRegistry::default());
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || registry.get_state(&DeviceIdentity::from("R58M123")))
            })
            .collect();
        let states: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(states.iter().all(|s| Arc::ptr_eq(s, &states[0])));
        assert_eq!(registry.states.len(), 1);
    }
}

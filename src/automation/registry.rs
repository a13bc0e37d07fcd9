use super::{ActionOutcome, BotContext};
use crate::errors::{SessionError, SessionResult};
use std::fmt;
use std::sync::Arc;

pub type ActionHandler = Arc<dyn Fn(&BotContext<'_>) -> SessionResult<ActionOutcome> + Send + Sync>;
pub type CommandHandler = Arc<dyn Fn(&BotContext<'_>) -> SessionResult<()> + Send + Sync>;

pub type ActionTable = HandlerTable<ActionHandler>;
pub type CommandTable = HandlerTable<CommandHandler>;

/// 启动时构建的静态 `{标识: 处理函数}` 表
pub struct HandlerTable<H> {
    entries: Vec<(String, H)>,
}

impl<H> Default for HandlerTable<H> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<H: Clone> HandlerTable<H> {
    pub fn new() -> Self {
        Self::default()
    }

    /// 同名注册覆盖旧的处理函数
    pub fn register<S: Into<String>>(mut self, id: S, handler: H) -> Self {
        let id = id.into();
        match self.entries.iter_mut().find(|(existing, _)| *existing == id) {
            Some(entry) => entry.1 = handler,
            None => self.entries.push((id, handler)),
        }
        self
    }

    pub fn get(&self, id: &str) -> Option<&H> {
        self.entries
            .iter()
            .find(|(existing, _)| existing == id)
            .map(|(_, handler)| handler)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(id, _)| id.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 按配置中的顺序取出处理函数，任何一个标识没有注册都直接报错
    pub fn bind(&self, ids: &[String], kind: &str) -> SessionResult<Vec<(String, H)>> {
        ids.iter()
            .map(|id| {
                self.get(id)
                    .map(|handler| (id.clone(), handler.clone()))
                    .ok_or_else(|| {
                        SessionError::config(format!("no handler registered for {} '{}'", kind, id))
                    })
            })
            .collect()
    }
}

impl HandlerTable<ActionHandler> {
    pub fn action<S, F>(self, id: S, handler: F) -> Self
    where
        S: Into<String>,
        F: Fn(&BotContext<'_>) -> SessionResult<ActionOutcome> + Send + Sync + 'static,
    {
        self.register(id, Arc::new(handler))
    }
}

impl HandlerTable<CommandHandler> {
    pub fn command<S, F>(self, id: S, handler: F) -> Self
    where
        S: Into<String>,
        F: Fn(&BotContext<'_>) -> SessionResult<()> + Send + Sync + 'static,
    {
        self.register(id, Arc::new(handler))
    }
}

impl<H> fmt::Debug for HandlerTable<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|(id, _)| id))
            .finish()
    }
}

use std::time::Duration;
use thiserror::Error;

/// 设备会话层可能出现的错误类型
#[derive(Error, Debug)]
pub enum SessionError {
    /// 设备操作超过了截止时间
    #[error("{operation} timed out after {deadline:?}")]
    Timeout { operation: String, deadline: Duration },

    /// 传输层在设备调用过程中出错（包括截图数据不完整）
    #[error("{operation} failed: {message}")]
    ConnectionFault { operation: String, message: String },

    /// 停止信号：用户停止、重连永久失败或重连次数耗尽。永远不会被重试
    #[error("Stopped: {reason}")]
    Stopped { reason: String },

    /// 在限定时间内没有拿到设备命令锁
    #[error("Could not acquire ADB lock for {operation} within {waited:?}")]
    LockTimeout { operation: String, waited: Duration },

    /// 命令队列中的命令执行失败
    #[error("Command `{description}` failed: {message}")]
    CommandFailed {
        description: String,
        message: String,
    },

    /// ADB 协议错误
    #[error("Protocol error: {message}")]
    Protocol { message: String },

    /// 设备未找到
    #[error("Device not found: {serial}")]
    DeviceNotFound { serial: String },

    /// 配置错误
    #[error("Config error: {message}")]
    Config { message: String },

    /// IO错误的包装
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// 图片解码错误
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// JSON解析错误
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Anyhow错误的包装，动作代码可以直接返回 anyhow::Error
    #[error("{0}")]
    Anyhow(#[from] anyhow::Error),
}

/// 专门用于结果类型的别名
pub type SessionResult<T> = Result<T, SessionError>;

impl SessionError {
    /// 创建超时错误
    pub fn timeout<S: Into<String>>(operation: S, deadline: Duration) -> Self {
        SessionError::Timeout {
            operation: operation.into(),
            deadline,
        }
    }

    /// 创建连接故障错误
    pub fn connection_fault<S1: Into<String>, S2: Into<String>>(operation: S1, message: S2) -> Self {
        SessionError::ConnectionFault {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// 创建停止信号
    pub fn stopped<S: Into<String>>(reason: S) -> Self {
        SessionError::Stopped {
            reason: reason.into(),
        }
    }

    pub fn lock_timeout<S: Into<String>>(operation: S, waited: Duration) -> Self {
        SessionError::LockTimeout {
            operation: operation.into(),
            waited,
        }
    }

    pub fn command_failed<S1: Into<String>, S2: Into<String>>(description: S1, message: S2) -> Self {
        SessionError::CommandFailed {
            description: description.into(),
            message: message.into(),
        }
    }

    pub fn protocol<S: Into<String>>(message: S) -> Self {
        SessionError::Protocol {
            message: message.into(),
        }
    }

    pub fn device_not_found<S: Into<String>>(serial: S) -> Self {
        SessionError::DeviceNotFound {
            serial: serial.into(),
        }
    }

    pub fn config<S: Into<String>>(message: S) -> Self {
        SessionError::Config {
            message: message.into(),
        }
    }

    /// 是否为停止信号（致命，向上传播直到结束所属循环）
    pub fn is_stop_signal(&self) -> bool {
        matches!(self, SessionError::Stopped { .. })
    }

    /// 检查是否可以走重连并重试的路径
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            SessionError::Stopped { .. }
                | SessionError::LockTimeout { .. }
                | SessionError::Config { .. }
        )
    }

    /// 获取错误的简短描述
    pub fn error_code(&self) -> &'static str {
        match self {
            SessionError::Timeout { .. } => "TIMEOUT",
            SessionError::ConnectionFault { .. } => "CONNECTION_FAULT",
            SessionError::Stopped { .. } => "STOPPED",
            SessionError::LockTimeout { .. } => "LOCK_TIMEOUT",
            SessionError::CommandFailed { .. } => "COMMAND_FAILED",
            SessionError::Protocol { .. } => "PROTOCOL_ERROR",
            SessionError::DeviceNotFound { .. } => "DEVICE_NOT_FOUND",
            SessionError::Config { .. } => "CONFIG_ERROR",
            SessionError::Io(_) => "IO_ERROR",
            SessionError::Image(_) => "IMAGE_ERROR",
            SessionError::Json(_) => "JSON_ERROR",
            SessionError::Anyhow(_) => "ANYHOW_ERROR",
        }
    }
}

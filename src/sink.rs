use image::RgbaImage;
use tracing::info;

/// 面向用户的日志出口：终端、界面或持久化存储都实现这一个接口
pub trait LogSink: Send + Sync {
    fn log(&self, message: &str, image: Option<&RgbaImage>);
}

/// 默认实现，转发到 tracing
#[derive(Debug, Clone, Default)]
pub struct TracingSink {
    device: String,
}

impl TracingSink {
    pub fn new<S: Into<String>>(device: S) -> Self {
        Self {
            device: device.into(),
        }
    }
}

impl LogSink for TracingSink {
    fn log(&self, message: &str, image: Option<&RgbaImage>) {
        match image {
            Some(image) => info!(
                device = %self.device,
                width = image.width(),
                height = image.height(),
                "{}",
                message
            ),
            None => info!(device = %self.device, "{}", message),
        }
    }
}

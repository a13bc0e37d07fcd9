use crate::errors::{SessionError, SessionResult};
use image::{ImageFormat, RgbaImage};

pub const PNG_SIGNATURE: &[u8; 8] = b"\x89PNG\r\n\x1a\n";
/// IEND 块类型加上它的 CRC
pub const PNG_TRAILER: &[u8; 8] = b"IEND\xaeB`\x82";

const MIN_CAPTURE_BYTES: usize = 100;
/// 允许 IEND 之后有少量尾随数据
const TRAILER_SEARCH_WINDOW: usize = 20;

const OPERATION: &str = "screencap";

/// 检查截图字节是否是一张完整的 PNG。
/// 传输层读到一半的数据在这里变成可重试的连接故障，而不是解码出一张坏图。
pub fn validate_capture(bytes: &[u8]) -> SessionResult<()> {
    if bytes.len() < MIN_CAPTURE_BYTES {
        return Err(SessionError::connection_fault(
            OPERATION,
            format!("Screenshot data incomplete ({} bytes)", bytes.len()),
        ));
    }
    if !bytes.starts_with(PNG_SIGNATURE) {
        return Err(SessionError::connection_fault(
            OPERATION,
            "Screenshot data is not valid PNG format",
        ));
    }
    if !bytes.ends_with(PNG_TRAILER) {
        let tail = &bytes[bytes.len().saturating_sub(TRAILER_SEARCH_WINDOW)..];
        if !tail.windows(PNG_TRAILER.len()).any(|w| w == PNG_TRAILER) {
            return Err(SessionError::connection_fault(
                OPERATION,
                "PNG data truncated (missing IEND)",
            ));
        }
    }
    Ok(())
}

/// 校验并解码为 RGBA 像素缓冲
pub fn decode_capture(bytes: &[u8]) -> SessionResult<RgbaImage> {
    validate_capture(bytes)?;
    let image = image::load_from_memory_with_format(bytes, ImageFormat::Png).map_err(|e| {
        SessionError::connection_fault(OPERATION, format!("PNG decode failed: {}", e))
    })?;
    Ok(image.into_rgba8())
}

use crate::errors::{SessionError, SessionResult};
use std::io::{Read, Write};
use tracing::debug;

// AdbProtocolRespDataType 定义了ADB协议响应数据类型的枚举
#[derive(Debug)]
pub enum AdbProtocolRespDataType {
    OKAY, // 操作成功
    FAIL, // 操作失败
}

impl AdbProtocolRespDataType {
    pub fn as_bytes(&self) -> &'static [u8; 4] {
        match self {
            AdbProtocolRespDataType::OKAY => b"OKAY",
            AdbProtocolRespDataType::FAIL => b"FAIL",
        }
    }
}

/// 构造带 4 位十六进制长度前缀的请求包
pub fn build_command_packet(command: &str) -> Vec<u8> {
    let cmd_bytes = command.as_bytes();
    let length = format!("{:04x}", cmd_bytes.len());
    let mut packet = Vec::with_capacity(4 + cmd_bytes.len());
    packet.extend_from_slice(length.as_bytes());
    packet.extend_from_slice(cmd_bytes);
    packet
}

pub fn parse_length_prefix(data: &[u8]) -> SessionResult<usize> {
    if data.len() < 4 {
        return Err(SessionError::protocol("Invalid length prefix"));
    }
    let length_str = String::from_utf8_lossy(&data[..4]);
    usize::from_str_radix(&length_str, 16)
        .map_err(|_| SessionError::protocol(format!("Invalid length {:?}", length_str)))
}

/// AdbProtocol 在任何 Read + Write 流上实现 ADB smart socket 协议。
pub trait AdbProtocol: Read + Write {
    /// 发送命令到 adb server。
    fn send_command(&mut self, command: &str) -> SessionResult<()> {
        debug!("Send COMMAND: <{:#?}>", command);
        let packet = build_command_packet(command);
        self.write_all(&packet)?;
        self.flush()?;
        Ok(())
    }

    /// 读取一个字符串块，以 4 位十六进制长度开始。
    fn read_string_block(&mut self) -> SessionResult<String> {
        let mut length_buf = [0; 4];
        self.read_exact(&mut length_buf)?;
        let length = parse_length_prefix(&length_buf)?;
        let mut data_buf = vec![0; length];
        self.read_exact(&mut data_buf)?;
        Ok(String::from_utf8_lossy(&data_buf).to_string())
    }

    /// 读取直到对端关闭连接的全部字节。
    fn read_until_close(&mut self) -> SessionResult<Vec<u8>> {
        let mut content = Vec::new();
        self.read_to_end(&mut content)?;
        debug!("<<<<<<< Recv Size: {:#?} <<<<<<<", content.len());
        Ok(content)
    }

    /// 检查返回是否为"OKAY"，"FAIL" 时读取错误信息。
    fn check_okay(&mut self) -> SessionResult<()> {
        let mut response = [0; 4];
        self.read_exact(&mut response)?;
        if &response == AdbProtocolRespDataType::OKAY.as_bytes() {
            Ok(())
        } else if &response == AdbProtocolRespDataType::FAIL.as_bytes() {
            let message = self.read_string_block()?;
            Err(SessionError::protocol(message))
        } else {
            Err(SessionError::protocol(format!(
                "Unexpected response {:?}",
                String::from_utf8_lossy(&response)
            )))
        }
    }

    fn send_cmd_then_check_okay(&mut self, command: &str) -> SessionResult<()> {
        self.send_command(command)?;
        self.check_okay()
    }
}

impl<T: Read + Write> AdbProtocol for T {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// 读写分离的内存流：读来自预置的响应，写入记录到 sent
    struct Duplex {
        incoming: Cursor<Vec<u8>>,
        sent: Vec<u8>,
    }

    impl Duplex {
        fn new(incoming: &[u8]) -> Self {
            Self {
                incoming: Cursor::new(incoming.to_vec()),
                sent: vec![],
            }
        }
    }

    impl Read for Duplex {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.incoming.read(buf)
        }
    }

    impl Write for Duplex {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.sent.write(buf)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_build_command_packet() {
        assert_eq!(build_command_packet("host:devices"), b"000chost:devices".to_vec());
    }

    #[test]
    fn test_parse_length_prefix() {
        assert_eq!(parse_length_prefix(b"001a").unwrap(), 26);
        assert!(parse_length_prefix(b"00").is_err());
        assert!(parse_length_prefix(b"zzzz").is_err());
    }

    #[test]
    fn test_send_cmd_then_check_okay() {
        let mut stream = Duplex::new(b"OKAY0005hello");
        stream.send_cmd_then_check_okay("host:version").unwrap();
        assert_eq!(stream.sent, b"000chost:version".to_vec());
        assert_eq!(stream.read_string_block().unwrap(), "hello");
    }

    #[test]
    fn test_fail_response_carries_message() {
        let mut stream = Duplex::new(b"FAIL0010device not found");
        let err = stream.send_cmd_then_check_okay("host:transport:x").unwrap_err();
        assert!(err.to_string().contains("device not found"));
    }

    #[test]
    fn test_read_until_close_keeps_binary() {
        let payload = [0x89u8, b'P', b'N', b'G', 0x00, 0xff];
        let mut stream = Duplex::new(&payload);
        assert_eq!(stream.read_until_close().unwrap(), payload.to_vec());
    }
}

/// `host:devices` 返回的一行：序列号与状态
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdbDeviceInfo {
    pub serial: String,
    pub state: String,
}

impl AdbDeviceInfo {
    pub fn new(serial: &str, state: &str) -> AdbDeviceInfo {
        AdbDeviceInfo {
            serial: serial.to_string(),
            state: state.to_string(),
        }
    }

    /// 只有 `device` 状态的设备可以接收命令
    pub fn is_online(&self) -> bool {
        self.state == "device"
    }
}

/// 解析 `host:devices` 的返回，格式为每行 `serial\tstate`
pub fn parse_device_list(resp: &str) -> Vec<AdbDeviceInfo> {
    resp.lines()
        .filter_map(|line| {
            let mut parts = line.split('\t');
            let serial = parts.next()?.trim();
            let state = parts.next()?.trim();
            if serial.is_empty() {
                return None;
            }
            Some(AdbDeviceInfo::new(serial, state))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_device_list() {
        let resp = "emulator-5554\tdevice\n127.0.0.1:5555\toffline\n\n";
        let devices = parse_device_list(resp);
        assert_eq!(
            devices,
            vec![
                AdbDeviceInfo::new("emulator-5554", "device"),
                AdbDeviceInfo::new("127.0.0.1:5555", "offline"),
            ]
        );
        assert!(devices[0].is_online());
        assert!(!devices[1].is_online());
    }

    #[test]
    fn test_parse_empty_list() {
        assert!(parse_device_list("").is_empty());
    }
}

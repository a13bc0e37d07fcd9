pub mod command;
pub(crate) mod device_info;

pub use command::AdbCommand;
pub use device_info::{parse_device_list, AdbDeviceInfo};

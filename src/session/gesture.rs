use crate::beans::AdbCommand;
use std::time::Duration;

/// 未指定终点坐标
pub const UNSET: i32 = -1;
pub const DEFAULT_SWIPE_DURATION_MS: u32 = 500;
/// 滑动超时在滑动时长之外额外留出的余量
pub const SWIPE_DEADLINE_MARGIN: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gesture {
    Tap {
        x: i32,
        y: i32,
    },
    Swipe {
        x1: i32,
        y1: i32,
        x2: i32,
        y2: i32,
        duration_ms: u32,
    },
}

impl Gesture {
    /// `x2`/`y2` 为 `UNSET` 时取起点坐标；起点终点相同则是点击
    pub fn resolve(x1: i32, y1: i32, x2: i32, y2: i32, duration_ms: u32) -> Self {
        let x2 = if x2 == UNSET { x1 } else { x2 };
        let y2 = if y2 == UNSET { y1 } else { y2 };
        if x1 == x2 && y1 == y2 {
            Gesture::Tap { x: x1, y: y1 }
        } else {
            Gesture::Swipe {
                x1,
                y1,
                x2,
                y2,
                duration_ms,
            }
        }
    }

    pub fn operation(&self) -> &'static str {
        match self {
            Gesture::Tap { .. } => "tap",
            Gesture::Swipe { .. } => "swipe",
        }
    }

    pub fn command(&self) -> AdbCommand {
        match *self {
            Gesture::Tap { x, y } => AdbCommand::from(["input", "tap"]).arg(x).arg(y),
            Gesture::Swipe {
                x1,
                y1,
                x2,
                y2,
                duration_ms,
            } => AdbCommand::from(["input", "swipe"])
                .arg(x1)
                .arg(y1)
                .arg(x2)
                .arg(y2)
                .arg(duration_ms),
        }
    }

    pub fn describe(&self) -> String {
        match *self {
            Gesture::Tap { x, y } => format!("Touch: ({}, {})", x, y),
            Gesture::Swipe {
                x1,
                y1,
                x2,
                y2,
                duration_ms,
            } => format!("Swipe: ({}, {}) -> ({}, {}) [{}ms]", x1, y1, x2, y2, duration_ms),
        }
    }

    pub fn deadline(&self, default: Duration) -> Duration {
        match *self {
            Gesture::Tap { .. } => default,
            Gesture::Swipe { duration_ms, .. } => swipe_deadline(default, duration_ms),
        }
    }
}

/// 刻意放慢的滑动不应被误报为超时
pub fn swipe_deadline(default: Duration, duration_ms: u32) -> Duration {
    default.max(Duration::from_millis(u64::from(duration_ms)) + SWIPE_DEADLINE_MARGIN)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unset_end_collapses_to_tap() {
        let gesture = Gesture::resolve(100, 200, UNSET, UNSET, DEFAULT_SWIPE_DURATION_MS);
        assert_eq!(gesture, Gesture::Tap { x: 100, y: 200 });
        assert_eq!(gesture.command().get_command(), "input tap 100 200");
    }

    #[test]
    fn test_partial_end_is_swipe() {
        let gesture = Gesture::resolve(100, 200, UNSET, 400, 250);
        assert_eq!(
            gesture.command().get_command(),
            "input swipe 100 200 100 400 250"
        );
    }

    #[test]
    fn test_same_point_is_tap() {
        assert_eq!(Gesture::resolve(5, 5, 5, 5, 900).operation(), "tap");
    }

    #[test]
    fn test_swipe_deadline() {
        let default = Duration::from_secs(30);
        assert_eq!(swipe_deadline(default, 500), default);
        assert_eq!(swipe_deadline(default, 20_000), Duration::from_secs(30));
        assert_eq!(swipe_deadline(default, 25_000), Duration::from_secs(35));
        assert_eq!(
            swipe_deadline(Duration::from_secs(5), 20_000),
            Duration::from_secs(30)
        );
    }
}

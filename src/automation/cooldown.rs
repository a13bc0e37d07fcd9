use std::collections::HashMap;
use std::time::{Duration, Instant};

/// 每个动作的冷却时间与上次运行时刻。从未运行过的动作总是就绪。
#[derive(Debug, Clone, Default)]
pub struct Cooldowns {
    periods: HashMap<String, Duration>,
    last_run: HashMap<String, Instant>,
}

impl Cooldowns {
    pub fn new(periods: HashMap<String, Duration>) -> Self {
        Self {
            periods,
            last_run: HashMap::new(),
        }
    }

    pub fn from_secs(periods: &HashMap<String, u64>) -> Self {
        Self::new(
            periods
                .iter()
                .map(|(id, secs)| (id.clone(), Duration::from_secs(*secs)))
                .collect(),
        )
    }

    pub fn period(&self, id: &str) -> Duration {
        self.periods.get(id).copied().unwrap_or_default()
    }

    pub fn remaining_at(&self, id: &str, now: Instant) -> Duration {
        let period = self.period(id);
        match self.last_run.get(id) {
            Some(last) if !period.is_zero() => {
                period.saturating_sub(now.saturating_duration_since(*last))
            }
            _ => Duration::ZERO,
        }
    }

    pub fn is_ready_at(&self, id: &str, now: Instant) -> bool {
        self.remaining_at(id, now).is_zero()
    }

    pub fn mark_ran_at(&mut self, id: &str, now: Instant) {
        self.last_run.insert(id.to_string(), now);
    }

    pub fn remaining(&self, id: &str) -> Duration {
        self.remaining_at(id, Instant::now())
    }

    pub fn is_ready(&self, id: &str) -> bool {
        self.is_ready_at(id, Instant::now())
    }

    pub fn mark_ran(&mut self, id: &str) {
        self.mark_ran_at(id, Instant::now());
    }
}

/// 剩余冷却的简短显示：一分钟以内显示秒，否则四舍五入到分钟
pub fn format_cooldown(remaining: Duration) -> String {
    let secs = remaining.as_secs();
    if secs < 60 {
        format!("{}s", secs)
    } else {
        format!("{}m", (remaining.as_secs_f64() / 60.0).round() as u64)
    }
}

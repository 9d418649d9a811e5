use std::collections::VecDeque;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::domain::tenant::RateLimitPolicy;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RateCeiling {
    PerSecond,
    PerMinute,
    PerHour,
}

impl RateCeiling {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PerSecond => "per_second",
            Self::PerMinute => "per_minute",
            Self::PerHour => "per_hour",
        }
    }

    pub fn span(&self) -> Duration {
        match self {
            Self::PerSecond => Duration::from_secs(1),
            Self::PerMinute => Duration::from_secs(60),
            Self::PerHour => Duration::from_secs(3_600),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct CeilingHeadroom {
    pub ceiling: RateCeiling,
    pub limit: u32,
    pub remaining: u32,
}

#[derive(Debug)]
struct Window {
    ceiling: RateCeiling,
    limit: u32,
    sent: VecDeque<Instant>,
}

impl Window {
    fn new(ceiling: RateCeiling, limit: u32) -> Self {
        Self { ceiling, limit, sent: VecDeque::new() }
    }

    fn evict(&mut self, now: Instant) {
        let span = self.ceiling.span();
        while self.sent.front().is_some_and(|sent_at| now.saturating_duration_since(*sent_at) >= span)
        {
            self.sent.pop_front();
        }
    }

    fn remaining(&self) -> u32 {
        let used = u32::try_from(self.sent.len()).unwrap_or(u32::MAX);
        self.limit.saturating_sub(used)
    }

    /// Time until the oldest send in the window ages out.
    fn wait(&self, now: Instant) -> Duration {
        self.sent
            .front()
            .map(|oldest| (*oldest + self.ceiling.span()).saturating_duration_since(now))
            .unwrap_or(Duration::ZERO)
    }
}

/// Three independent sliding windows (second, minute, hour). A send is
/// admitted only when every window has headroom; admitted sends are recorded
/// in all three.
#[derive(Debug)]
pub struct SlidingWindowLimiter {
    windows: [Window; 3],
}

impl SlidingWindowLimiter {
    pub fn new(policy: RateLimitPolicy) -> Self {
        Self {
            windows: [
                Window::new(RateCeiling::PerSecond, policy.per_second),
                Window::new(RateCeiling::PerMinute, policy.per_minute),
                Window::new(RateCeiling::PerHour, policy.per_hour),
            ],
        }
    }

    /// Records a send at `now` if all ceilings allow it. Otherwise returns how
    /// long until every exhausted ceiling has freed capacity again.
    pub fn try_acquire(&mut self, now: Instant) -> Result<(), Duration> {
        let wait = self.wait(now);
        if !wait.is_zero() {
            return Err(wait);
        }
        for window in &mut self.windows {
            window.sent.push_back(now);
        }
        Ok(())
    }

    pub fn wait(&mut self, now: Instant) -> Duration {
        self.windows
            .iter_mut()
            .map(|window| {
                window.evict(now);
                if window.remaining() > 0 {
                    Duration::ZERO
                } else {
                    window.wait(now).max(Duration::from_millis(1))
                }
            })
            .max()
            .unwrap_or(Duration::ZERO)
    }

    pub fn policy(&self) -> RateLimitPolicy {
        let [second, minute, hour] = &self.windows;
        RateLimitPolicy {
            per_second: second.limit,
            per_minute: minute.limit,
            per_hour: hour.limit,
        }
    }

    /// Replaces the ceilings. Sends already recorded keep counting against the
    /// new limits until they age out.
    pub fn set_policy(&mut self, policy: RateLimitPolicy) {
        let [second, minute, hour] = &mut self.windows;
        second.limit = policy.per_second;
        minute.limit = policy.per_minute;
        hour.limit = policy.per_hour;
    }

    pub fn has_headroom(&mut self, now: Instant) -> bool {
        self.wait(now).is_zero()
    }

    pub fn headroom(&mut self, now: Instant) -> Vec<CeilingHeadroom> {
        self.windows
            .iter_mut()
            .map(|window| {
                window.evict(now);
                CeilingHeadroom {
                    ceiling: window.ceiling,
                    limit: window.limit,
                    remaining: window.remaining(),
                }
            })
            .collect()
    }
}

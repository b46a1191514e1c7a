use chrono::{DateTime, NaiveTime, Utc};
use chrono_tz::Tz;

/// Daily recurring quiet period, evaluated in a fixed named timezone.
///
/// The interval is closed-open: `start` is muted, `end` is not. A window with
/// `start > end` wraps past midnight; `start == end` never mutes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MuteWindow {
    start: NaiveTime,
    end: NaiveTime,
    timezone: Tz,
}

impl MuteWindow {
    pub fn new(start: NaiveTime, end: NaiveTime, timezone: Tz) -> Self {
        Self {
            start,
            end,
            timezone,
        }
    }

    pub fn is_muted_at(&self, now: DateTime<Utc>) -> bool {
        let local = now.with_timezone(&self.timezone).time();
        if self.start <= self.end {
            self.start <= local && local < self.end
        } else {
            local >= self.start || local < self.end
        }
    }

    /// Human-readable description for the startup log.
    pub fn describe(&self) -> String {
        format!(
            "{} - {} {}",
            self.start.format("%I:%M %p"),
            self.end.format("%I:%M %p"),
            self.timezone.name()
        )
    }
}

//! Fixed-window counter implementation.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Time window for rate limiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeWindow {
    /// Per-minute rate limiting
    Minute,
    /// Per-day rate limiting
    Day,
}

impl TimeWindow {
    /// Every window, in the order they are evaluated on admission.
    pub const ALL: [TimeWindow; 2] = [TimeWindow::Minute, TimeWindow::Day];

    /// Get the duration of this time window.
    pub fn duration(&self) -> Duration {
        match self {
            TimeWindow::Minute => Duration::from_secs(60),
            TimeWindow::Day => Duration::from_secs(86400),
        }
    }

    /// The window length as a calendar offset.
    pub fn span(&self) -> TimeDelta {
        TimeDelta::seconds(self.duration().as_secs() as i64)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TimeWindow::Minute => "minute",
            TimeWindow::Day => "day",
        }
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A counter that tracks admitted requests within one fixed window.
///
/// The limit is captured when the window opens and stays fixed until the
/// window is replaced, so a limit change never applies retroactively.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterWindow {
    /// Which window this counter tracks
    window: TimeWindow,
    /// When the current window started
    window_start: DateTime<Utc>,
    /// Requests admitted in this window
    count: u64,
    /// The limit for this window
    max: u64,
}

impl CounterWindow {
    /// Open a fresh, empty window starting at `now`.
    pub fn open(window: TimeWindow, now: DateTime<Utc>, max: u64) -> Self {
        Self {
            window,
            window_start: now,
            count: 0,
            max,
        }
    }

    /// Get the time window for this counter.
    pub fn window(&self) -> TimeWindow {
        self.window
    }

    pub fn window_start(&self) -> DateTime<Utc> {
        self.window_start
    }

    /// The instant at which this window stops counting.
    pub fn window_end(&self) -> DateTime<Utc> {
        self.window_start + self.window.span()
    }

    /// Whether the window has elapsed and may be replaced.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.window_end()
    }

    /// Whether one more request fits under the limit.
    pub fn has_capacity(&self) -> bool {
        self.count < self.max
    }

    /// Record one admitted request.
    ///
    /// Callers check [`has_capacity`](Self::has_capacity) first under the
    /// same lock; the count saturates at `max` regardless.
    pub fn increment(&mut self) {
        if self.count < self.max {
            self.count += 1;
        }
    }

    /// Get the current count.
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Get the limit for this counter.
    pub fn max(&self) -> u64 {
        self.max
    }

    /// Get the remaining quota.
    pub fn remaining(&self) -> u64 {
        self.max.saturating_sub(self.count)
    }

    /// Get the duration until the current window resets.
    pub fn duration_until_reset(&self, now: DateTime<Utc>) -> Duration {
        (self.window_end() - now).to_std().unwrap_or(Duration::ZERO)
    }
}

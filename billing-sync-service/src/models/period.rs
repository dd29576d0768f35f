//! Time spans used by the period generator and the invoice lines.

use chrono::{DateTime, DurationRound, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

/// Granularity of the metering system. Every generated period boundary is
/// truncated to a multiple of this.
pub const METER_RESOLUTION_SECS: i64 = 1;

/// Meter resolution as a [`TimeDelta`].
pub fn meter_resolution() -> TimeDelta {
    TimeDelta::seconds(METER_RESOLUTION_SECS)
}

/// Truncate a timestamp down to the given resolution.
pub fn truncate_timestamp(ts: DateTime<Utc>, resolution: TimeDelta) -> DateTime<Utc> {
    ts.duration_trunc(resolution).unwrap_or(ts)
}

/// Half-open span `[from, to)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Period {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl Period {
    pub fn new(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self { from, to }
    }

    /// Zero-length period at `at`.
    pub fn instant(at: DateTime<Utc>) -> Self {
        Self { from: at, to: at }
    }

    pub fn duration(&self) -> TimeDelta {
        self.to - self.from
    }

    pub fn is_empty(&self) -> bool {
        self.to <= self.from
    }

    /// Overlap of two periods. Touching periods do not overlap, but a
    /// zero-length period lying inside (or on the start of) `self` is kept.
    pub fn intersection(&self, other: &Period) -> Option<Period> {
        let from = self.from.max(other.from);
        let to = self.to.min(other.to);

        if from < to {
            return Some(Period { from, to });
        }

        if from == to && (self.is_empty() || other.is_empty()) {
            let instant = if self.is_empty() { self } else { other };
            let host = if self.is_empty() { other } else { self };
            if host.from <= instant.from && (instant.from < host.to || host.is_empty()) {
                return Some(Period::instant(from));
            }
        }

        None
    }

    pub fn truncate(&self, resolution: TimeDelta) -> Period {
        Period {
            from: truncate_timestamp(self.from, resolution),
            to: truncate_timestamp(self.to, resolution),
        }
    }

    /// Clip this period into an activation window.
    pub fn clip_to(&self, window: &ActiveWindow) -> Period {
        let from = self.from.max(window.from);
        let to = match window.to {
            Some(end) => self.to.min(end),
            None => self.to,
        };
        Period { from, to: to.max(from) }
    }
}

/// Activation window whose end may not be known yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveWindow {
    pub from: DateTime<Utc>,
    pub to: Option<DateTime<Utc>>,
}

impl ActiveWindow {
    pub fn new(from: DateTime<Utc>, to: Option<DateTime<Utc>>) -> Self {
        Self { from, to }
    }

    pub fn open_ended(from: DateTime<Utc>) -> Self {
        Self { from, to: None }
    }

    pub fn is_active_at(&self, at: DateTime<Utc>) -> bool {
        self.from <= at && self.to.map_or(true, |end| at < end)
    }

    /// A window with `from == to` describes a single instant.
    pub fn is_instant(&self) -> bool {
        self.to == Some(self.from)
    }

    /// Overlap of two windows. An instantaneous window inside the other one
    /// survives as an instant.
    pub fn intersection(&self, other: &ActiveWindow) -> Option<ActiveWindow> {
        let from = self.from.max(other.from);
        let to = match (self.to, other.to) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (Some(a), None) => Some(a),
            (None, Some(b)) => Some(b),
            (None, None) => None,
        };

        match to {
            Some(end) if end < from => None,
            Some(end) if end == from => {
                if self.is_instant() || other.is_instant() {
                    Some(ActiveWindow::new(from, Some(end)))
                } else {
                    None
                }
            }
            _ => Some(ActiveWindow::new(from, to)),
        }
    }
}

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::task::Priority;

/// Traffic-light assessment of time remaining against policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlaStatus {
    /// On track.
    Green,
    /// At risk: 80% (configurable) of the allowance has elapsed.
    Yellow,
    /// Overdue.
    Red,
}

impl SlaStatus {
    /// Short lowercase label for event payloads.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Green => "green",
            Self::Yellow => "yellow",
            Self::Red => "red",
        }
    }
}

impl std::fmt::Display for SlaStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-priority response-time policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlaPolicy {
    pub critical_hours: u32,
    pub high_hours: u32,
    pub medium_hours: u32,
    pub low_hours: u32,
    /// Fraction of the allowance after which a task turns yellow.
    pub at_risk_fraction: f64,
}

impl Default for SlaPolicy {
    fn default() -> Self {
        Self {
            critical_hours: 4,
            high_hours: 24,
            medium_hours: 72,
            low_hours: 168,
            at_risk_fraction: 0.8,
        }
    }
}

impl SlaPolicy {
    /// The response allowance for a priority, in hours.
    #[must_use]
    pub fn hours_for(&self, priority: Priority) -> u32 {
        match priority {
            Priority::Critical => self.critical_hours,
            Priority::High => self.high_hours,
            Priority::Medium => self.medium_hours,
            Priority::Low => self.low_hours,
        }
    }

    /// The deadline for an email received at `received_at`.
    #[must_use]
    pub fn deadline(&self, received_at: DateTime<Utc>, priority: Priority) -> DateTime<Utc> {
        received_at + Duration::hours(i64::from(self.hours_for(priority)))
    }
}

/// Compute the SLA status for a task.
///
/// Pure: the result depends only on the arguments, so callers can
/// evaluate it against any clock.
#[must_use]
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
pub fn sla_status(
    received_at: DateTime<Utc>,
    priority: Priority,
    now: DateTime<Utc>,
    policy: &SlaPolicy,
) -> SlaStatus {
    let allowance = Duration::hours(i64::from(policy.hours_for(priority)));
    let elapsed = now - received_at;
    if elapsed >= allowance {
        return SlaStatus::Red;
    }
    // Threshold computed in seconds to keep the fraction exact for
    // whole-hour policies.
    let at_risk_secs = (allowance.num_seconds() as f64 * policy.at_risk_fraction) as i64;
    if elapsed.num_seconds() >= at_risk_secs {
        SlaStatus::Yellow
    } else {
        SlaStatus::Green
    }
}

/// Compute the SLA status against an explicit deadline.
///
/// Equivalent to [`sla_status`] when the deadline came straight from
/// policy; also correct for deadlines the analyst narrowed.
#[must_use]
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
pub fn sla_status_for_deadline(
    received_at: DateTime<Utc>,
    sla_deadline: DateTime<Utc>,
    now: DateTime<Utc>,
    at_risk_fraction: f64,
) -> SlaStatus {
    if now >= sla_deadline {
        return SlaStatus::Red;
    }
    let allowance = (sla_deadline - received_at).num_seconds();
    let elapsed = (now - received_at).num_seconds();
    let at_risk_secs = (allowance as f64 * at_risk_fraction) as i64;
    if allowance > 0 && elapsed >= at_risk_secs {
        SlaStatus::Yellow
    } else {
        SlaStatus::Green
    }
}

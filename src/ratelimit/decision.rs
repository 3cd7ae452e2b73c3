//! Admission decisions returned to the request-handling layer.

use serde::{Serialize, Serializer};
use std::time::Duration;

use super::counter::TimeWindow;

/// Outcome of a single admission check.
///
/// Serializes as `{"decision":"allowed"}` or
/// `{"decision":"denied","retry_after_secs":N,"limit_kind":"minute"}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "lowercase")]
pub enum AdmissionDecision {
    /// The request was admitted and counted
    Allowed,
    /// The request was rejected; nothing was counted
    Denied {
        #[serde(rename = "retry_after_secs", serialize_with = "serialize_retry_after")]
        retry_after: Duration,
        limit_kind: TimeWindow,
    },
}

impl AdmissionDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, AdmissionDecision::Allowed)
    }

    pub fn is_denied(&self) -> bool {
        !self.is_allowed()
    }

    /// The window that caused a denial.
    pub fn limit_kind(&self) -> Option<TimeWindow> {
        match self {
            AdmissionDecision::Allowed => None,
            AdmissionDecision::Denied { limit_kind, .. } => Some(*limit_kind),
        }
    }

    /// Time until the exhausted window resets.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            AdmissionDecision::Allowed => None,
            AdmissionDecision::Denied { retry_after, .. } => Some(*retry_after),
        }
    }

    /// Whole seconds suitable for a `Retry-After` header.
    ///
    /// Rounds up and never reports zero for a denial.
    pub fn retry_after_secs(&self) -> Option<u64> {
        self.retry_after().map(|d| ceil_secs(&d))
    }
}

pub(crate) fn ceil_secs(duration: &Duration) -> u64 {
    let secs = duration.as_secs();
    let secs = if duration.subsec_nanos() > 0 { secs + 1 } else { secs };
    secs.max(1)
}

fn serialize_retry_after<S: Serializer>(
    retry_after: &Duration,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_u64(ceil_secs(retry_after))
}

//! Read-only usage reports for a client identity.

use serde::Serialize;

use super::identity::ClientIdentity;

/// Usage of one window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WindowUsage {
    /// Requests admitted in the open window, zero if none is open
    pub count: u64,
    /// Limit of the open window, or the limit a new window would get
    pub max: u64,
    /// Whole seconds until the open window resets
    pub resets_in_secs: Option<u64>,
}

impl WindowUsage {
    pub fn remaining(&self) -> u64 {
        self.max.saturating_sub(self.count)
    }
}

/// Usage report for an identity, as served by a key-info endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UsageSnapshot {
    pub identity: ClientIdentity,
    /// Name of the tier new windows are opened under
    pub tier: &'static str,
    pub minute: WindowUsage,
    pub day: WindowUsage,
}

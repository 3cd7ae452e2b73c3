//! Rate tiers and their limits.

use serde::{Deserialize, Serialize};

use super::counter::TimeWindow;
use crate::error::{GatekeeperError, Result};

/// A pair of limits applied to one class of clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierLimits {
    /// Requests allowed per minute window
    pub per_minute: u64,
    /// Requests allowed per day window
    pub per_day: u64,
}

impl TierLimits {
    /// Limits for clients without an API key.
    pub const ANONYMOUS: TierLimits = TierLimits {
        per_minute: 60,
        per_day: 5000,
    };

    /// Limits for clients with a registered API key.
    pub const AUTHENTICATED: TierLimits = TierLimits {
        per_minute: 100,
        per_day: 10000,
    };

    /// Create validated limits.
    pub fn new(per_minute: u64, per_day: u64) -> Result<Self> {
        let limits = Self {
            per_minute,
            per_day,
        };
        limits.validate()?;
        Ok(limits)
    }

    /// Both limits must be positive.
    pub fn validate(&self) -> Result<()> {
        if self.per_minute == 0 {
            return Err(GatekeeperError::InvalidConfiguration(
                "per-minute limit must be a positive integer".to_string(),
            ));
        }
        if self.per_day == 0 {
            return Err(GatekeeperError::InvalidConfiguration(
                "per-day limit must be a positive integer".to_string(),
            ));
        }
        Ok(())
    }

    /// The limit for the given window.
    pub fn max_for(&self, window: TimeWindow) -> u64 {
        match window {
            TimeWindow::Minute => self.per_minute,
            TimeWindow::Day => self.per_day,
        }
    }
}

/// The tier an identity is limited under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateTier {
    Anonymous,
    Authenticated,
    /// Per-key override granted administratively
    Custom(TierLimits),
}

impl RateTier {
    pub fn name(&self) -> &'static str {
        match self {
            RateTier::Anonymous => "anonymous",
            RateTier::Authenticated => "authenticated",
            RateTier::Custom(_) => "custom",
        }
    }
}

/// Process-wide default limits, fixed at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierDefaults {
    #[serde(default = "default_anonymous")]
    pub anonymous: TierLimits,

    #[serde(default = "default_authenticated")]
    pub authenticated: TierLimits,
}

impl Default for TierDefaults {
    fn default() -> Self {
        Self {
            anonymous: default_anonymous(),
            authenticated: default_authenticated(),
        }
    }
}

fn default_anonymous() -> TierLimits {
    TierLimits::ANONYMOUS
}

fn default_authenticated() -> TierLimits {
    TierLimits::AUTHENTICATED
}

impl TierDefaults {
    pub fn validate(&self) -> Result<()> {
        self.anonymous.validate()?;
        self.authenticated.validate()
    }

    /// Resolve the limits carried by a tier.
    pub fn limits(&self, tier: &RateTier) -> TierLimits {
        match tier {
            RateTier::Anonymous => self.anonymous,
            RateTier::Authenticated => self.authenticated,
            RateTier::Custom(limits) => *limits,
        }
    }
}

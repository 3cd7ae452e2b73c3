//! Rate limiting logic and state management.

mod clock;
mod counter;
mod decision;
mod identity;
mod limiter;
mod store;
mod sweeper;
mod tier;
mod usage;

pub use clock::{Clock, ManualClock, SystemClock};
pub use counter::{CounterWindow, TimeWindow};
pub use decision::AdmissionDecision;
pub use identity::ClientIdentity;
pub use limiter::RateLimiter;
pub use store::{IdentityWindows, WindowStore};
pub use sweeper::{spawn_sweeper, SweeperHandle};
pub use tier::{RateTier, TierDefaults, TierLimits};
pub use usage::{UsageSnapshot, WindowUsage};

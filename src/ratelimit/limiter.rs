//! Core admission controller.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::{debug, info, trace, warn};

use super::counter::TimeWindow;
use super::decision::{ceil_secs, AdmissionDecision};
use super::identity::ClientIdentity;
use super::store::WindowStore;
use super::tier::{RateTier, TierDefaults, TierLimits};
use super::usage::{UsageSnapshot, WindowUsage};
use crate::config::GatekeeperConfig;
use crate::error::Result;

/// The admission controller that enforces per-minute and per-day limits.
///
/// This struct is thread-safe and can be shared across multiple tasks.
/// Callers supply `now` on every call; the limiter never reads a clock.
pub struct RateLimiter {
    /// Counter windows indexed by identity
    store: Arc<WindowStore>,
    /// Default limits for anonymous and authenticated clients
    defaults: TierDefaults,
    /// Per-key overrides for authenticated clients
    custom_limits: DashMap<String, TierLimits>,
}

impl RateLimiter {
    /// Create a rate limiter with the documented default tiers.
    pub fn new() -> Self {
        Self {
            store: Arc::new(WindowStore::new()),
            defaults: TierDefaults::default(),
            custom_limits: DashMap::new(),
        }
    }

    /// Create a rate limiter over an existing store.
    pub fn with_store(store: Arc<WindowStore>, defaults: TierDefaults) -> Result<Self> {
        defaults.validate()?;
        Ok(Self {
            store,
            defaults,
            custom_limits: DashMap::new(),
        })
    }

    /// Build a rate limiter from configuration, seeding custom limits.
    pub fn from_config(config: &GatekeeperConfig) -> Result<Self> {
        config.validate()?;
        let store = Arc::new(WindowStore::with_shards(config.store.shards)?);
        let limiter = Self::with_store(store, config.tiers)?;
        for custom in &config.custom_limits {
            limiter.set_custom_limit(&custom.api_key, custom.per_minute, custom.per_day)?;
        }
        Ok(limiter)
    }

    /// Decide whether a request from `identity` at `now` is admitted.
    ///
    /// The minute window is checked before the day window and the first
    /// exhausted one is reported. A denied request is not counted in any
    /// window; an admitted one is counted in both.
    pub fn check_and_increment(
        &self,
        identity: &ClientIdentity,
        now: DateTime<Utc>,
    ) -> AdmissionDecision {
        let limits = self.limits_for(identity);

        trace!(identity = %identity, "Checking admission");

        let decision = self.store.with_identity(identity, |windows| {
            for window in TimeWindow::ALL {
                let counter = windows.refresh(window, now, limits.max_for(window));
                if !counter.has_capacity() {
                    return AdmissionDecision::Denied {
                        retry_after: counter.duration_until_reset(now),
                        limit_kind: window,
                    };
                }
            }
            windows.increment_all();
            AdmissionDecision::Allowed
        });

        if let AdmissionDecision::Denied {
            retry_after,
            limit_kind,
        } = decision
        {
            debug!(
                identity = %identity,
                limit_kind = %limit_kind,
                retry_after_secs = ceil_secs(&retry_after),
                "Rate limit exceeded"
            );
        }

        decision
    }

    /// Grant an authenticated key its own limits.
    ///
    /// Replaces any previous override. Windows already open for the key keep
    /// their limit until they reset.
    pub fn set_custom_limit(&self, api_key: &str, per_minute: u64, per_day: u64) -> Result<()> {
        let limits = TierLimits::new(per_minute, per_day).map_err(|e| {
            warn!(api_key = %api_key, per_minute, per_day, error = %e, "Rejected custom limit");
            e
        })?;

        if limits.per_minute > limits.per_day {
            warn!(
                api_key = %api_key,
                per_minute,
                per_day,
                "Custom per-minute limit exceeds per-day limit"
            );
        }

        let previous = self.custom_limits.insert(api_key.to_string(), limits);
        info!(
            api_key = %api_key,
            per_minute,
            per_day,
            replaced = previous.is_some(),
            "Custom limit set"
        );
        Ok(())
    }

    /// Remove an override; the key falls back to the authenticated tier at
    /// its next window.
    pub fn clear_custom_limit(&self, api_key: &str) -> Option<TierLimits> {
        let removed = self.custom_limits.remove(api_key).map(|(_, limits)| limits);
        if removed.is_some() {
            info!(api_key = %api_key, "Custom limit cleared");
        }
        removed
    }

    /// The override registered for a key, if any.
    pub fn custom_limit(&self, api_key: &str) -> Option<TierLimits> {
        self.custom_limits.get(api_key).map(|entry| *entry.value())
    }

    /// The tier new windows for `identity` are opened under.
    pub fn tier_for(&self, identity: &ClientIdentity) -> RateTier {
        match identity {
            ClientIdentity::Anonymous(_) => RateTier::Anonymous,
            ClientIdentity::Authenticated(key) => match self.custom_limit(key) {
                Some(limits) => RateTier::Custom(limits),
                None => RateTier::Authenticated,
            },
        }
    }

    /// The limits new windows for `identity` are opened with.
    pub fn limits_for(&self, identity: &ClientIdentity) -> TierLimits {
        self.defaults.limits(&self.tier_for(identity))
    }

    /// Report an identity's usage without counting a request.
    pub fn usage(&self, identity: &ClientIdentity, now: DateTime<Utc>) -> UsageSnapshot {
        let tier = self.tier_for(identity);
        let limits = self.defaults.limits(&tier);
        let windows = self.store.snapshot(identity);

        let report = |window: TimeWindow| {
            match windows.as_ref().and_then(|w| w.active(window, now)) {
                Some(counter) => WindowUsage {
                    count: counter.count(),
                    max: counter.max(),
                    resets_in_secs: Some(ceil_secs(&counter.duration_until_reset(now))),
                },
                None => WindowUsage {
                    count: 0,
                    max: limits.max_for(window),
                    resets_in_secs: None,
                },
            }
        };

        UsageSnapshot {
            identity: identity.clone(),
            tier: tier.name(),
            minute: report(TimeWindow::Minute),
            day: report(TimeWindow::Day),
        }
    }

    /// Evict identities whose windows have all elapsed at least one minute
    /// before `now`.
    ///
    /// The margin covers callers whose `now` lags the sweeper's clock, so a
    /// window still open for an in-flight request is never dropped.
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        let evicted = self.store.evict_idle(now - TimeWindow::Minute.span());
        if evicted > 0 {
            info!(
                evicted,
                remaining = self.store.len(),
                "Evicted idle identities"
            );
        }
        evicted
    }

    /// Get the number of tracked identities.
    pub fn tracked_identities(&self) -> usize {
        self.store.len()
    }

    /// Clear all counters.
    ///
    /// This is primarily useful for testing.
    pub fn clear(&self) {
        self.store.clear();
    }

    pub fn defaults(&self) -> &TierDefaults {
        &self.defaults
    }

    pub fn store(&self) -> &Arc<WindowStore> {
        &self.store
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GatekeeperError;
    use chrono::{TimeDelta, TimeZone};
    use std::time::Duration;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn count_allowed(
        limiter: &RateLimiter,
        identity: &ClientIdentity,
        calls: usize,
        now: DateTime<Utc>,
    ) -> usize {
        (0..calls)
            .filter(|_| limiter.check_and_increment(identity, now).is_allowed())
            .count()
    }

    #[test]
    fn test_rate_limiter_creation() {
        let limiter = RateLimiter::new();
        assert_eq!(limiter.tracked_identities(), 0);
        assert_eq!(limiter.defaults(), &TierDefaults::default());
    }

    #[test]
    fn test_anonymous_minute_limit() {
        let limiter = RateLimiter::new();
        let identity = ClientIdentity::anonymous("203.0.113.7");

        for i in 0..60 {
            let now = t0() + TimeDelta::milliseconds(i * 500);
            assert!(
                limiter.check_and_increment(&identity, now).is_allowed(),
                "Request {} should be allowed",
                i + 1
            );
        }

        let now = t0() + TimeDelta::seconds(40);
        let decision = limiter.check_and_increment(&identity, now);
        assert_eq!(
            decision,
            AdmissionDecision::Denied {
                retry_after: Duration::from_secs(20),
                limit_kind: TimeWindow::Minute,
            }
        );
    }

    #[test]
    fn test_denial_does_not_consume_quota() {
        let limiter = RateLimiter::new();
        let identity = ClientIdentity::anonymous("10.0.0.1");

        assert_eq!(count_allowed(&limiter, &identity, 100, t0()), 60);

        let usage = limiter.usage(&identity, t0());
        assert_eq!(usage.minute.count, 60);
        assert_eq!(usage.day.count, 60);
    }

    #[test]
    fn test_window_resets_after_elapsing() {
        let limiter = RateLimiter::new();
        let identity = ClientIdentity::anonymous("10.0.0.2");

        assert_eq!(count_allowed(&limiter, &identity, 61, t0()), 60);
        assert!(limiter
            .check_and_increment(&identity, t0() + TimeDelta::seconds(59))
            .is_denied());

        let later = t0() + TimeDelta::seconds(60);
        assert!(limiter.check_and_increment(&identity, later).is_allowed());
        assert_eq!(limiter.usage(&identity, later).minute.count, 1);
    }

    #[test]
    fn test_authenticated_tier_limits() {
        let limiter = RateLimiter::new();
        let identity = ClientIdentity::authenticated("registered-key");

        assert_eq!(limiter.tier_for(&identity), RateTier::Authenticated);
        assert_eq!(count_allowed(&limiter, &identity, 150, t0()), 100);
    }

    #[test]
    fn test_custom_limit_scenario() {
        let limiter = RateLimiter::new();
        let identity = ClientIdentity::authenticated("abc");
        limiter.set_custom_limit("abc", 5, 50).unwrap();

        for i in 0..5 {
            let now = t0() + TimeDelta::seconds(i);
            assert!(limiter.check_and_increment(&identity, now).is_allowed());
        }

        let decision = limiter.check_and_increment(&identity, t0() + TimeDelta::seconds(5));
        assert_eq!(decision.limit_kind(), Some(TimeWindow::Minute));

        let later = t0() + TimeDelta::seconds(61);
        assert!(limiter.check_and_increment(&identity, later).is_allowed());
    }

    #[test]
    fn test_custom_limit_rejects_non_positive() {
        let limiter = RateLimiter::new();

        let result = limiter.set_custom_limit("abc", 0, 50);
        assert!(matches!(result, Err(GatekeeperError::InvalidConfiguration(_))));
        assert_eq!(limiter.custom_limit("abc"), None);

        limiter.set_custom_limit("abc", 5, 50).unwrap();
        assert!(limiter.set_custom_limit("abc", 5, 0).is_err());
        assert_eq!(limiter.custom_limit("abc"), Some(TierLimits::new(5, 50).unwrap()));
    }

    #[test]
    fn test_custom_limit_overwrites_previous() {
        let limiter = RateLimiter::new();
        limiter.set_custom_limit("abc", 5, 50).unwrap();
        limiter.set_custom_limit("abc", 7, 70).unwrap();

        assert_eq!(
            limiter.tier_for(&ClientIdentity::authenticated("abc")),
            RateTier::Custom(TierLimits::new(7, 70).unwrap())
        );
    }

    #[test]
    fn test_custom_limit_only_affects_its_key() {
        let limiter = RateLimiter::new();
        let other = ClientIdentity::authenticated("other");
        let anon_same_key = ClientIdentity::anonymous("abc");

        assert_eq!(count_allowed(&limiter, &other, 10, t0()), 10);
        limiter.set_custom_limit("abc", 1, 1).unwrap();

        assert_eq!(limiter.tier_for(&other), RateTier::Authenticated);
        assert_eq!(limiter.tier_for(&anon_same_key), RateTier::Anonymous);
        assert_eq!(count_allowed(&limiter, &other, 200, t0()), 90);
        assert_eq!(count_allowed(&limiter, &anon_same_key, 100, t0()), 60);
    }

    #[test]
    fn test_custom_limit_defers_to_next_window() {
        let limiter = RateLimiter::new();
        let identity = ClientIdentity::authenticated("abc");

        assert_eq!(count_allowed(&limiter, &identity, 10, t0()), 10);

        // Lowered below the accumulated count; the open window keeps max 100
        limiter.set_custom_limit("abc", 5, 50).unwrap();
        let now = t0() + TimeDelta::seconds(10);
        assert_eq!(count_allowed(&limiter, &identity, 100, now), 90);
        assert_eq!(limiter.usage(&identity, now).minute.max, 100);

        // Next minute window opens under the custom limit
        let next = t0() + TimeDelta::seconds(60);
        assert_eq!(count_allowed(&limiter, &identity, 10, next), 5);
        assert_eq!(limiter.usage(&identity, next).minute.max, 5);
    }

    #[test]
    fn test_clear_custom_limit() {
        let limiter = RateLimiter::new();
        limiter.set_custom_limit("abc", 5, 50).unwrap();

        assert_eq!(
            limiter.clear_custom_limit("abc"),
            Some(TierLimits::new(5, 50).unwrap())
        );
        assert_eq!(limiter.clear_custom_limit("abc"), None);
        assert_eq!(
            limiter.tier_for(&ClientIdentity::authenticated("abc")),
            RateTier::Authenticated
        );
    }

    #[test]
    fn test_day_limit_scenario() {
        let limiter = RateLimiter::new();
        let identity = ClientIdentity::anonymous("198.51.100.1");

        let mut allowed = 0;
        let mut first_day_denial = None;
        let mut call = 0;
        for minute in 0..84i64 {
            for i in 0..60i64 {
                call += 1;
                let now = t0() + TimeDelta::minutes(minute) + TimeDelta::milliseconds(i * 100);
                match limiter.check_and_increment(&identity, now) {
                    AdmissionDecision::Allowed => allowed += 1,
                    AdmissionDecision::Denied { limit_kind, .. } => {
                        assert_eq!(limit_kind, TimeWindow::Day);
                        if first_day_denial.is_none() {
                            first_day_denial = Some(call);
                        }
                    }
                }
            }
        }

        assert_eq!(call, 5040);
        assert_eq!(allowed, 5000);
        assert_eq!(first_day_denial, Some(5001));
    }

    #[test]
    fn test_day_denial_reports_day_retry_after() {
        let limiter = RateLimiter::new();
        let identity = ClientIdentity::authenticated("tiny");
        limiter.set_custom_limit("tiny", 10, 3).unwrap();

        assert_eq!(count_allowed(&limiter, &identity, 3, t0()), 3);

        let now = t0() + TimeDelta::hours(1);
        let decision = limiter.check_and_increment(&identity, now);
        assert_eq!(
            decision,
            AdmissionDecision::Denied {
                retry_after: Duration::from_secs(23 * 3600),
                limit_kind: TimeWindow::Day,
            }
        );
        // The fresh minute window was not charged for the denied request
        assert_eq!(limiter.usage(&identity, now).minute.count, 0);
    }

    #[test]
    fn test_usage_is_read_only() {
        let limiter = RateLimiter::new();
        let identity = ClientIdentity::anonymous("10.0.0.3");

        let usage = limiter.usage(&identity, t0());
        assert_eq!(usage.tier, "anonymous");
        assert_eq!(usage.minute.count, 0);
        assert_eq!(usage.minute.max, 60);
        assert_eq!(usage.minute.resets_in_secs, None);
        assert_eq!(limiter.tracked_identities(), 0);

        limiter.check_and_increment(&identity, t0());
        let usage = limiter.usage(&identity, t0() + TimeDelta::seconds(30));
        assert_eq!(usage.minute.count, 1);
        assert_eq!(usage.minute.remaining(), 59);
        assert_eq!(usage.minute.resets_in_secs, Some(30));
        assert_eq!(usage.day.count, 1);
        assert_eq!(usage.day.max, 5000);

        let usage = limiter.usage(&identity, t0() + TimeDelta::seconds(90));
        assert_eq!(usage.minute.count, 0);
        assert_eq!(usage.day.count, 1);
    }

    #[test]
    fn test_sweep_evicts_idle_identities() {
        let limiter = RateLimiter::new();
        limiter.check_and_increment(&ClientIdentity::anonymous("a"), t0());
        limiter.check_and_increment(&ClientIdentity::anonymous("b"), t0() + TimeDelta::hours(12));

        assert_eq!(limiter.sweep(t0() + TimeDelta::hours(23)), 0);
        assert_eq!(limiter.sweep(t0() + TimeDelta::hours(24)), 0);
        assert_eq!(limiter.sweep(t0() + TimeDelta::hours(24) + TimeDelta::minutes(1)), 1);
        assert_eq!(limiter.tracked_identities(), 1);
    }

    #[test]
    fn test_sweep_ahead_of_request_clock_keeps_open_window() {
        let limiter = RateLimiter::new();
        let identity = ClientIdentity::authenticated("tiny");
        limiter.set_custom_limit("tiny", 10, 3).unwrap();
        assert_eq!(count_allowed(&limiter, &identity, 3, t0()), 3);

        // Sweeper clock has just passed the day boundary, a request's has not
        let day_end = t0() + TimeDelta::days(1);
        assert_eq!(limiter.sweep(day_end + TimeDelta::seconds(5)), 0);

        let decision = limiter.check_and_increment(&identity, day_end - TimeDelta::seconds(1));
        assert_eq!(decision.limit_kind(), Some(TimeWindow::Day));
        assert_eq!(decision.retry_after(), Some(Duration::from_secs(1)));
    }

    #[test]
    fn test_concurrent_requests_never_over_admit() {
        let limiter = Arc::new(RateLimiter::new());
        let identity = ClientIdentity::authenticated("shared");
        limiter.set_custom_limit("shared", 250, 10_000).unwrap();

        let allowed: usize = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let limiter = &limiter;
                    let identity = &identity;
                    scope.spawn(move || count_allowed(limiter, identity, 100, t0()))
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).sum()
        });

        assert_eq!(allowed, 250);
        assert_eq!(limiter.usage(&identity, t0()).minute.count, 250);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_tasks_never_over_admit() {
        let limiter = Arc::new(RateLimiter::new());
        let identity = ClientIdentity::anonymous("192.0.2.10");

        let tasks: Vec<_> = (0..200)
            .map(|_| {
                let limiter = limiter.clone();
                let identity = identity.clone();
                tokio::spawn(async move { limiter.check_and_increment(&identity, t0()) })
            })
            .collect();

        let decisions = futures::future::join_all(tasks).await;
        let allowed = decisions
            .into_iter()
            .map(|d| d.unwrap())
            .filter(AdmissionDecision::is_allowed)
            .count();

        assert_eq!(allowed, 60);
    }

    #[test]
    fn test_from_config_seeds_custom_limits() {
        let yaml = r#"
tiers:
  anonymous:
    per_minute: 2
    per_day: 10
custom_limits:
  - api_key: partner
    per_minute: 1000
    per_day: 100000
store:
  shards: 8
"#;
        let config = GatekeeperConfig::from_yaml(yaml).unwrap();
        let limiter = RateLimiter::from_config(&config).unwrap();

        assert_eq!(
            limiter.custom_limit("partner"),
            Some(TierLimits::new(1000, 100000).unwrap())
        );
        let anon = ClientIdentity::anonymous("10.1.1.1");
        assert_eq!(count_allowed(&limiter, &anon, 5, t0()), 2);
    }

    #[test]
    fn test_with_store_rejects_invalid_defaults() {
        let defaults = TierDefaults {
            anonymous: TierLimits {
                per_minute: 0,
                per_day: 10,
            },
            authenticated: TierLimits::AUTHENTICATED,
        };
        let result = RateLimiter::with_store(Arc::new(WindowStore::new()), defaults);
        assert!(result.is_err());
    }
}

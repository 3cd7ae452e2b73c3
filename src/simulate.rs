//! Concurrent load simulation against a limiter.
//!
//! Spawns a number of clients that issue requests as fast as the runtime
//! lets them, each picking a random identity from a shared pool.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{GatekeeperError, Result};
use crate::ratelimit::{AdmissionDecision, ClientIdentity, Clock, RateLimiter, TimeWindow};

/// Parameters of a simulation run.
#[derive(Debug, Clone)]
pub struct SimulationOptions {
    /// Concurrent clients
    pub clients: usize,
    /// Distinct identities shared by all clients
    pub identities: usize,
    /// Fraction of identities holding an API key, between 0 and 1
    pub authenticated_ratio: f64,
    /// How long clients keep sending
    pub duration: Duration,
}

impl Default for SimulationOptions {
    fn default() -> Self {
        Self {
            clients: 8,
            identities: 16,
            authenticated_ratio: 0.5,
            duration: Duration::from_secs(5),
        }
    }
}

impl SimulationOptions {
    pub fn validate(&self) -> Result<()> {
        if self.clients == 0 || self.identities == 0 {
            return Err(GatekeeperError::InvalidConfiguration(
                "simulation needs at least one client and one identity".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.authenticated_ratio) {
            return Err(GatekeeperError::InvalidConfiguration(format!(
                "authenticated ratio must be between 0 and 1, got {}",
                self.authenticated_ratio
            )));
        }
        Ok(())
    }
}

/// Outcome of a simulation run.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub requests: u64,
    pub allowed: u64,
    pub denied_minute: u64,
    pub denied_day: u64,
    pub tracked_identities: usize,
    pub elapsed_ms: u64,
}

#[derive(Default)]
struct Tally {
    allowed: AtomicU64,
    denied_minute: AtomicU64,
    denied_day: AtomicU64,
}

impl Tally {
    fn record(&self, decision: &AdmissionDecision) {
        let counter = match decision.limit_kind() {
            None => &self.allowed,
            Some(TimeWindow::Minute) => &self.denied_minute,
            Some(TimeWindow::Day) => &self.denied_day,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Build a pool of random identities.
pub fn identity_pool<R: Rng>(rng: &mut R, size: usize, authenticated_ratio: f64) -> Vec<ClientIdentity> {
    (0..size)
        .map(|_| {
            if rng.gen_bool(authenticated_ratio) {
                ClientIdentity::authenticated(Uuid::new_v4().simple().to_string())
            } else {
                let addr = Ipv4Addr::new(10, rng.gen(), rng.gen(), rng.gen());
                ClientIdentity::from_ip(IpAddr::V4(addr))
            }
        })
        .collect()
}

/// Run the simulation to completion.
pub async fn simulate<C>(
    limiter: Arc<RateLimiter>,
    clock: Arc<C>,
    options: SimulationOptions,
) -> Result<SimulationReport>
where
    C: Clock + ?Sized + 'static,
{
    options.validate()?;

    let pool = Arc::new(identity_pool(
        &mut StdRng::from_entropy(),
        options.identities,
        options.authenticated_ratio,
    ));
    let tally = Arc::new(Tally::default());

    info!(
        clients = options.clients,
        identities = options.identities,
        duration_ms = options.duration.as_millis() as u64,
        "Starting simulation"
    );

    let started = tokio::time::Instant::now();
    let deadline = started + options.duration;

    let clients: Vec<_> = (0..options.clients)
        .map(|client| {
            let limiter = limiter.clone();
            let clock = clock.clone();
            let pool = pool.clone();
            let tally = tally.clone();
            tokio::spawn(async move {
                let mut rng = StdRng::from_entropy();
                let mut sent = 0u64;
                while tokio::time::Instant::now() < deadline {
                    let identity = &pool[rng.gen_range(0..pool.len())];
                    let decision = limiter.check_and_increment(identity, clock.now());
                    tally.record(&decision);
                    sent += 1;
                    tokio::task::yield_now().await;
                }
                debug!(client, sent, "Client finished");
            })
        })
        .collect();

    for result in join_all(clients).await {
        if let Err(e) = result {
            warn!(error = %e, "Simulated client failed");
        }
    }

    let allowed = tally.allowed.load(Ordering::Relaxed);
    let denied_minute = tally.denied_minute.load(Ordering::Relaxed);
    let denied_day = tally.denied_day.load(Ordering::Relaxed);

    Ok(SimulationReport {
        requests: allowed + denied_minute + denied_day,
        allowed,
        denied_minute,
        denied_day,
        tracked_identities: limiter.tracked_identities(),
        elapsed_ms: started.elapsed().as_millis() as u64,
    })
}

//! Lease-based leader election over `coordination.k8s.io/v1`.
//!
//! Only the replica holding the lease runs leader-gated runnables. Holding is proven by renewing
//! `renewTime` every retry period; a replica that cannot renew within the renew deadline gives up
//! and the manager exits so the pod restarts.
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{MicroTime, ObjectMeta};
use kube::api::{Api, PostParams};
use tokio::sync::watch;
use tokio::time::{interval, timeout, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::metrics;

pub const DEFAULT_LEASE_DURATION: Duration = Duration::from_secs(15);
pub const DEFAULT_RENEW_DEADLINE: Duration = Duration::from_secs(10);
pub const DEFAULT_RETRY_PERIOD: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct LeaderElectionConfig {
    pub lease_name: String,
    pub namespace: String,
    pub identity: String,
    pub lease_duration: Duration,
    pub renew_deadline: Duration,
    pub retry_period: Duration,
}

/// `<hostname>_<uuid>`, unique per process.
pub fn default_identity() -> String {
    let host = hostname::get().map(|h| h.to_string_lossy().into_owned()).unwrap_or_else(|_| "unknown".to_string());
    format!("{host}_{}", uuid::Uuid::new_v4())
}

/// Shared view of whether this process currently leads.
#[derive(Clone)]
pub struct LeaderStatus {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for LeaderStatus {
    fn default() -> Self { Self::new() }
}

impl LeaderStatus {
    pub fn new() -> Self { Self { tx: Arc::new(watch::channel(false).0) } }

    pub fn is_leader(&self) -> bool { *self.tx.borrow() }

    pub fn set(&self, leader: bool) { self.tx.send_replace(leader); }

    pub async fn wait_for_leader(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|leader| *leader).await;
    }
}

fn is_expired(spec: &LeaseSpec, now: DateTime<Utc>) -> bool {
    let Some(MicroTime(renewed)) = spec.renew_time.as_ref().or(spec.acquire_time.as_ref()) else { return true };
    let secs = i64::from(spec.lease_duration_seconds.unwrap_or(0));
    *renewed + chrono::Duration::seconds(secs) < now
}

/// Lease spec `identity` should write at `now`, or `None` while another holder's lease is live.
pub fn next_lease_spec(current: Option<&LeaseSpec>, identity: &str, lease_duration: Duration, now: DateTime<Utc>) -> Option<LeaseSpec> {
    let duration_secs = i32::try_from(lease_duration.as_secs()).unwrap_or(i32::MAX);
    let Some(spec) = current else {
        return Some(LeaseSpec {
            holder_identity: Some(identity.to_string()),
            lease_duration_seconds: Some(duration_secs),
            acquire_time: Some(MicroTime(now)),
            renew_time: Some(MicroTime(now)),
            lease_transitions: Some(0),
            ..LeaseSpec::default()
        });
    };
    let holder = spec.holder_identity.as_deref().filter(|h| !h.is_empty());
    let ours = holder == Some(identity);
    if holder.is_some() && !ours && !is_expired(spec, now) {
        return None;
    }
    let mut next = spec.clone();
    next.holder_identity = Some(identity.to_string());
    next.lease_duration_seconds = Some(duration_secs);
    next.renew_time = Some(MicroTime(now));
    if !ours {
        next.acquire_time = Some(MicroTime(now));
        next.lease_transitions = Some(spec.lease_transitions.unwrap_or(0) + 1);
    }
    Some(next)
}

/// Outcome of one acquire-or-renew round.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Attempt {
    Held,
    /// Another write landed first; the next round re-reads the lease.
    Conflict,
    /// Another candidate holds a live lease.
    HeldBy(String),
}

pub struct LeaderElector {
    api: Api<Lease>,
    config: LeaderElectionConfig,
    status: LeaderStatus,
}

impl LeaderElector {
    pub fn new(api: Api<Lease>, config: LeaderElectionConfig) -> Self { Self { api, config, status: LeaderStatus::new() } }

    pub fn status(&self) -> LeaderStatus { self.status.clone() }

    async fn try_acquire_or_renew(&self) -> Result<Attempt> {
        let name = &self.config.lease_name;
        let now = Utc::now();
        let written = match self.api.get_opt(name).await? {
            None => {
                let lease = Lease {
                    metadata: ObjectMeta { name: Some(name.clone()), namespace: Some(self.config.namespace.clone()), ..ObjectMeta::default() },
                    spec: next_lease_spec(None, &self.config.identity, self.config.lease_duration, now),
                };
                self.api.create(&PostParams::default(), &lease).await
            }
            Some(mut lease) => match next_lease_spec(lease.spec.as_ref(), &self.config.identity, self.config.lease_duration, now) {
                None => {
                    let holder = lease.spec.and_then(|s| s.holder_identity).unwrap_or_default();
                    return Ok(Attempt::HeldBy(holder));
                }
                Some(spec) => {
                    lease.spec = Some(spec);
                    self.api.replace(name, &PostParams::default(), &lease).await
                }
            },
        };
        match written {
            Ok(_) => Ok(Attempt::Held),
            Err(kube::Error::Api(ae)) if ae.code == 409 => Ok(Attempt::Conflict),
            Err(e) => Err(e.into()),
        }
    }

    /// Runs one round bounded by `limit`; `None` when `stop` fired first.
    async fn attempt(&self, limit: Duration, stop: &CancellationToken) -> Option<Result<Attempt, String>> {
        tokio::select! {
            _ = stop.cancelled() => None,
            res = timeout(limit, self.try_acquire_or_renew()) => Some(match res {
                Ok(Ok(attempt)) => Ok(attempt),
                Ok(Err(e)) => Err(e.to_string()),
                Err(_) => Err(format!("timed out after {limit:?}")),
            }),
        }
    }

    /// Acquires the lease, then keeps renewing it until `stop` fires. Returns
    /// [`Error::LeaderElectionLost`] once another candidate holds a live lease, or when no renewal
    /// succeeds within the renew deadline. Every round is bounded by the time left before that
    /// deadline.
    pub async fn run(self, stop: CancellationToken) -> Result<()> {
        let lease = format!("{}/{}", self.config.namespace, self.config.lease_name);
        let mut ticker = interval(self.config.retry_period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(%lease, identity = %self.config.identity, "attempting to acquire leader lease");
        loop {
            tokio::select! {
                _ = stop.cancelled() => return Ok(()),
                _ = ticker.tick() => {}
            }
            match self.attempt(self.config.renew_deadline, &stop).await {
                None => return Ok(()),
                Some(Ok(Attempt::Held)) => break,
                Some(Ok(Attempt::Conflict)) => debug!(%lease, "conflict acquiring lease"),
                Some(Ok(Attempt::HeldBy(holder))) => debug!(%lease, %holder, "lease held by another candidate"),
                Some(Err(error)) => warn!(%lease, %error, "failed to acquire lease"),
            }
        }
        info!(%lease, "successfully acquired lease");
        self.status.set(true);
        metrics::set_leader(&self.config.lease_name, true);

        let mut last_renew = Instant::now();
        loop {
            tokio::select! {
                _ = stop.cancelled() => return Ok(()),
                _ = ticker.tick() => {}
            }
            let remaining = self.config.renew_deadline.saturating_sub(last_renew.elapsed());
            match self.attempt(remaining, &stop).await {
                None => return Ok(()),
                Some(Ok(Attempt::Held)) => last_renew = Instant::now(),
                Some(Ok(Attempt::HeldBy(holder))) => {
                    self.lost(&lease, &format!("lease taken by {holder}"));
                    return Err(Error::LeaderElectionLost);
                }
                Some(Ok(Attempt::Conflict)) => warn!(%lease, "conflict renewing lease"),
                Some(Err(error)) => warn!(%lease, %error, "failed to renew lease"),
            }
            if last_renew.elapsed() >= self.config.renew_deadline {
                self.lost(&lease, "renew deadline exceeded");
                return Err(Error::LeaderElectionLost);
            }
        }
    }

    fn lost(&self, lease: &str, reason: &str) {
        error!(%lease, reason, "leader election lost");
        self.status.set(false);
        metrics::set_leader(&self.config.lease_name, false);
    }
}

//! Long-running control-loop host.
//!
//! The manager owns the probe and metrics servers, optional leader election, and every registered
//! [`Runnable`]. [`Manager::start`] blocks until the shutdown token fires or something fails.
use std::io::ErrorKind;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use kube::{Api, Client};
use tokio::net::TcpListener;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::{Error, Result};
use crate::healthz::{self, CheckSet, Checker};
use crate::leader::{self, LeaderElectionConfig, LeaderElector};
use crate::metrics;
use crate::scheme::Scheme;

pub const DEFAULT_LEADER_ELECTION_ID: &str = "a9ba9dc1.wzy.com";
pub const DEFAULT_GRACEFUL_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct Options {
    /// `None` disables the metrics server.
    pub metrics_bind_address: Option<SocketAddr>,
    /// `None` disables the probe server.
    pub health_probe_bind_address: Option<SocketAddr>,
    pub leader_election: bool,
    pub leader_election_id: String,
    /// Defaults to the client's namespace.
    pub leader_election_namespace: Option<String>,
    pub lease_duration: Duration,
    pub renew_deadline: Duration,
    pub retry_period: Duration,
    pub graceful_shutdown_timeout: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            metrics_bind_address: Some(SocketAddr::from((Ipv6Addr::UNSPECIFIED, 8080))),
            health_probe_bind_address: Some(SocketAddr::from((Ipv6Addr::UNSPECIFIED, 8081))),
            leader_election: false,
            leader_election_id: DEFAULT_LEADER_ELECTION_ID.to_string(),
            leader_election_namespace: None,
            lease_duration: leader::DEFAULT_LEASE_DURATION,
            renew_deadline: leader::DEFAULT_RENEW_DEADLINE,
            retry_period: leader::DEFAULT_RETRY_PERIOD,
            graceful_shutdown_timeout: DEFAULT_GRACEFUL_SHUTDOWN_TIMEOUT,
        }
    }
}

impl Options {
    pub fn validate(&self) -> Result<()> {
        if self.leader_election && self.leader_election_id.trim().is_empty() {
            return Err(Error::Config("leader election id is required when leader election is enabled".into()));
        }
        if self.retry_period.is_zero() {
            return Err(Error::Config("retry period must be positive".into()));
        }
        if self.lease_duration <= self.renew_deadline {
            return Err(Error::Config(format!(
                "lease duration ({:?}) must be greater than renew deadline ({:?})",
                self.lease_duration, self.renew_deadline
            )));
        }
        if self.renew_deadline <= self.retry_period {
            return Err(Error::Config(format!(
                "renew deadline ({:?}) must be greater than retry period ({:?})",
                self.renew_deadline, self.retry_period
            )));
        }
        if let (Some(m), Some(p)) = (self.metrics_bind_address, self.health_probe_bind_address) {
            let overlap = m.ip() == p.ip() || m.ip().is_unspecified() || p.ip().is_unspecified();
            if overlap && m.port() == p.port() && m.port() != 0 {
                return Err(Error::Config(format!("metrics and health probe servers cannot share {m}")));
            }
        }
        Ok(())
    }
}

/// A unit of work started by the manager.
#[async_trait]
pub trait Runnable: Send {
    fn name(&self) -> &str;

    /// Leader-gated runnables start only once this replica holds the lease.
    fn needs_leader_election(&self) -> bool { true }

    /// Runs until `stop` is cancelled; returning early with `Err` stops the manager.
    async fn start(self: Box<Self>, stop: CancellationToken) -> Result<()>;
}

type TaskSet = JoinSet<(String, Result<()>)>;

pub struct Manager {
    client: Client,
    scheme: Arc<Scheme>,
    options: Options,
    healthz: CheckSet,
    readyz: CheckSet,
    runnables: Vec<Box<dyn Runnable>>,
}

impl Manager {
    pub fn new(client: Client, scheme: Arc<Scheme>, options: Options) -> Result<Self> {
        options.validate()?;
        Ok(Self {
            client,
            scheme,
            options,
            healthz: CheckSet::new("healthz"),
            readyz: CheckSet::new("readyz"),
            runnables: Vec::new(),
        })
    }

    pub fn client(&self) -> Client { self.client.clone() }

    pub fn scheme(&self) -> Arc<Scheme> { Arc::clone(&self.scheme) }

    pub fn options(&self) -> &Options { &self.options }

    pub fn add_healthz_check(&mut self, name: impl Into<String>, check: Checker) -> Result<()> { self.healthz.add(name, check) }

    pub fn add_readyz_check(&mut self, name: impl Into<String>, check: Checker) -> Result<()> { self.readyz.add(name, check) }

    pub fn add_runnable(&mut self, runnable: Box<dyn Runnable>) {
        info!(runnable = runnable.name(), "registered runnable");
        self.runnables.push(runnable);
    }

    pub fn runnable_names(&self) -> Vec<&str> { self.runnables.iter().map(|r| r.name()).collect() }

    fn leader_election_config(&self) -> LeaderElectionConfig {
        LeaderElectionConfig {
            lease_name: self.options.leader_election_id.clone(),
            namespace: self.options.leader_election_namespace.clone().unwrap_or_else(|| self.client.default_namespace().to_string()),
            identity: leader::default_identity(),
            lease_duration: self.options.lease_duration,
            renew_deadline: self.options.renew_deadline,
            retry_period: self.options.retry_period,
        }
    }

    pub async fn start(self, shutdown: CancellationToken) -> Result<()> {
        let stop = shutdown.child_token();
        let grace = self.options.graceful_shutdown_timeout;
        let mut tasks = TaskSet::new();

        if let Some(addr) = self.options.health_probe_bind_address {
            let listener = bind("health probe", addr).await?;
            info!(addr = %local_addr(&listener, addr), "starting health probe server");
            spawn_server(&mut tasks, "health probe", listener, healthz::router(self.healthz.clone(), self.readyz.clone()), stop.clone());
        }
        if let Some(addr) = self.options.metrics_bind_address {
            let listener = bind("metrics", addr).await?;
            info!(addr = %local_addr(&listener, addr), "starting metrics server");
            spawn_server(&mut tasks, "metrics", listener, metrics::router(), stop.clone());
        }

        let election = self.options.leader_election.then(|| self.leader_election_config());
        let (gated, free): (Vec<_>, Vec<_>) = self.runnables.into_iter().partition(|r| r.needs_leader_election());
        for runnable in free {
            spawn_runnable(&mut tasks, runnable, stop.clone());
        }

        if let Some(config) = election {
            let api = Api::namespaced(self.client.clone(), &config.namespace);
            let elector = LeaderElector::new(api, config);
            let status = elector.status();
            let token = stop.clone();
            tasks.spawn(async move { ("leader election".to_string(), elector.run(token).await) });
            info!(lease = %self.options.leader_election_id, "waiting for leadership");
            let acquired = loop {
                tokio::select! {
                    _ = stop.cancelled() => break false,
                    _ = status.wait_for_leader() => break true,
                    Some(joined) = tasks.join_next() => {
                        if let Some(e) = failure(joined) { return finish(tasks, stop, grace, Err(e)).await; }
                    }
                }
            };
            if !acquired {
                return finish(tasks, stop, grace, Ok(())).await;
            }
        }

        for runnable in gated {
            spawn_runnable(&mut tasks, runnable, stop.clone());
        }
        info!("manager started");

        let outcome = loop {
            tokio::select! {
                _ = stop.cancelled() => break Ok(()),
                Some(joined) = tasks.join_next() => {
                    if let Some(e) = failure(joined) { break Err(e); }
                }
            }
        };
        finish(tasks, stop, grace, outcome).await
    }
}

/// Binds `addr`. The IPv6 wildcard falls back to `0.0.0.0` on hosts without IPv6.
async fn bind(kind: &'static str, addr: SocketAddr) -> Result<TcpListener> {
    match TcpListener::bind(addr).await {
        Ok(listener) => Ok(listener),
        Err(e) if addr.ip() == IpAddr::V6(Ipv6Addr::UNSPECIFIED) && e.kind() != ErrorKind::AddrInUse => {
            let v4 = SocketAddr::from((Ipv4Addr::UNSPECIFIED, addr.port()));
            warn!(%addr, error = %e, fallback = %v4, "IPv6 wildcard unavailable");
            TcpListener::bind(v4).await.map_err(|source| Error::Bind { kind, addr: v4, source })
        }
        Err(source) => Err(Error::Bind { kind, addr, source }),
    }
}

fn local_addr(listener: &TcpListener, requested: SocketAddr) -> SocketAddr { listener.local_addr().unwrap_or(requested) }

fn spawn_server(tasks: &mut TaskSet, kind: &'static str, listener: TcpListener, app: Router, stop: CancellationToken) {
    tasks.spawn(async move {
        let res = axum::serve(listener, app)
            .with_graceful_shutdown(async move { stop.cancelled().await })
            .await
            .map_err(|source| Error::Serve { kind, source });
        (format!("{kind} server"), res)
    });
}

fn spawn_runnable(tasks: &mut TaskSet, runnable: Box<dyn Runnable>, stop: CancellationToken) {
    let name = runnable.name().to_string();
    info!(runnable = %name, "starting runnable");
    tasks.spawn(async move {
        let res = runnable.start(stop).await;
        (name, res)
    });
}

fn failure(joined: Result<(String, Result<()>), JoinError>) -> Option<Error> {
    match joined {
        Ok((name, Ok(()))) => {
            info!(runnable = %name, "runnable exited");
            None
        }
        Ok((name, Err(e))) => {
            error!(runnable = %name, error = %e, "runnable failed");
            Some(Error::Runnable { name, source: Box::new(e) })
        }
        Err(e) => Some(Error::Join(e)),
    }
}

async fn finish(mut tasks: TaskSet, stop: CancellationToken, grace: Duration, outcome: Result<()>) -> Result<()> {
    stop.cancel();
    info!("stopping runnables");
    let drained = tokio::time::timeout(grace, async {
        while let Some(joined) = tasks.join_next().await {
            if let Some(e) = failure(joined) {
                warn!(error = %e, "error while stopping");
            }
        }
    })
    .await;
    match (outcome, drained) {
        (Err(e), _) => Err(e),
        (Ok(()), Err(_)) => {
            tasks.abort_all();
            Err(Error::ShutdownTimeout(grace))
        }
        (Ok(()), Ok(())) => {
            info!("all runnables stopped");
            Ok(())
        }
    }
}

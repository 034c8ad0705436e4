use std::net::{SocketAddr, TcpListener as StdListener};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use onedemo_operator::api::v1;
use onedemo_operator::healthz;
use onedemo_operator::manager::{Manager, Options, Runnable};
use onedemo_operator::scheme::Scheme;
use onedemo_operator::test_support::offline_client;
use onedemo_operator::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

fn free_addr() -> SocketAddr {
    let l = StdListener::bind("127.0.0.1:0").unwrap();
    l.local_addr().unwrap()
}

fn scheme() -> Arc<Scheme> {
    let mut s = Scheme::new();
    v1::add_to_scheme(&mut s).unwrap();
    Arc::new(s)
}

fn options(probe: Option<SocketAddr>) -> Options {
    Options { metrics_bind_address: None, health_probe_bind_address: probe, graceful_shutdown_timeout: Duration::from_secs(5), ..Options::default() }
}

async fn get(addr: SocketAddr, path: &str) -> (u16, String) {
    let mut stream = None;
    for _ in 0..50 {
        match TcpStream::connect(addr).await {
            Ok(s) => {
                stream = Some(s);
                break;
            }
            Err(_) => tokio::time::sleep(Duration::from_millis(20)).await,
        }
    }
    let mut stream = stream.expect("probe server never came up");
    stream.write_all(format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n").as_bytes()).await.unwrap();
    let mut raw = String::new();
    stream.read_to_string(&mut raw).await.unwrap();
    let status = raw.split_whitespace().nth(1).unwrap().parse().unwrap();
    let body = raw.split_once("\r\n\r\n").map(|(_, b)| b.to_string()).unwrap_or_default();
    (status, body)
}

struct UntilStopped;

#[async_trait]
impl Runnable for UntilStopped {
    fn name(&self) -> &str { "until-stopped" }

    async fn start(self: Box<Self>, stop: CancellationToken) -> onedemo_operator::Result<()> {
        stop.cancelled().await;
        Ok(())
    }
}

struct FailsImmediately;

#[async_trait]
impl Runnable for FailsImmediately {
    fn name(&self) -> &str { "fails" }

    async fn start(self: Box<Self>, _stop: CancellationToken) -> onedemo_operator::Result<()> { Err(Error::Config("boom".into())) }
}

struct IgnoresStop;

#[async_trait]
impl Runnable for IgnoresStop {
    fn name(&self) -> &str { "stubborn" }

    fn needs_leader_election(&self) -> bool { false }

    async fn start(self: Box<Self>, _stop: CancellationToken) -> onedemo_operator::Result<()> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(())
    }
}

#[tokio::test]
async fn probes_are_healthy_until_shutdown() {
    let probe = free_addr();
    let mut mgr = Manager::new(offline_client(), scheme(), options(Some(probe))).unwrap();
    mgr.add_healthz_check("ping", healthz::ping()).unwrap();
    mgr.add_readyz_check("ping", healthz::ping()).unwrap();
    mgr.add_runnable(Box::new(UntilStopped));
    let shutdown = CancellationToken::new();
    let running = tokio::spawn(mgr.start(shutdown.clone()));

    assert_eq!(get(probe, "/healthz").await, (200, "ok".to_string()));
    let (status, body) = get(probe, "/readyz?verbose").await;
    assert_eq!(status, 200);
    assert!(body.contains("[+]ping ok"), "{body}");
    assert_eq!(get(probe, "/healthz/ping").await.0, 200);
    assert_eq!(get(probe, "/healthz/nope").await.0, 404);

    shutdown.cancel();
    running.await.unwrap().unwrap();
}

#[tokio::test]
async fn duplicate_checks_are_rejected() {
    let mut mgr = Manager::new(offline_client(), scheme(), options(None)).unwrap();
    mgr.add_healthz_check("ping", healthz::ping()).unwrap();
    assert!(matches!(mgr.add_healthz_check("ping", healthz::ping()), Err(Error::DuplicateCheck { .. })));
    assert!(mgr.add_readyz_check("", healthz::ping()).is_err());
}

#[tokio::test]
async fn runnable_failure_stops_the_manager() {
    let mut mgr = Manager::new(offline_client(), scheme(), options(None)).unwrap();
    mgr.add_runnable(Box::new(UntilStopped));
    mgr.add_runnable(Box::new(FailsImmediately));
    let err = tokio::time::timeout(Duration::from_secs(5), mgr.start(CancellationToken::new())).await.unwrap().unwrap_err();
    assert!(matches!(err, Error::Runnable { ref name, .. } if name == "fails"), "{err}");
}

#[tokio::test]
async fn occupied_probe_port_is_a_startup_error() {
    let held = StdListener::bind("127.0.0.1:0").unwrap();
    let addr = held.local_addr().unwrap();
    let mgr = Manager::new(offline_client(), scheme(), options(Some(addr))).unwrap();
    let err = mgr.start(CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, Error::Bind { kind: "health probe", .. }), "{err}");
}

#[tokio::test]
async fn stuck_runnable_hits_the_grace_period() {
    let opts = Options { graceful_shutdown_timeout: Duration::from_millis(100), ..options(None) };
    let mut mgr = Manager::new(offline_client(), scheme(), opts).unwrap();
    mgr.add_runnable(Box::new(IgnoresStop));
    let shutdown = CancellationToken::new();
    shutdown.cancel();
    let err = mgr.start(shutdown).await.unwrap_err();
    assert!(matches!(err, Error::ShutdownTimeout(d) if d == Duration::from_millis(100)));
}

use std::fmt::Display;
use std::process;
use std::sync::Arc;

use clap::Parser;
use kube::Client;
use tracing::{error, info};

use onedemo_operator::api::v1;
use onedemo_operator::client::KubeObjectClient;
use onedemo_operator::config::{EffectiveConfig, Flags};
use onedemo_operator::controller::{AppReconciler, FIELD_MANAGER};
use onedemo_operator::healthz;
use onedemo_operator::logging::init_logging;
use onedemo_operator::manager::Manager;
use onedemo_operator::scheme::Scheme;
use onedemo_operator::signals;

#[tokio::main]
async fn main() {
    let flags = Flags::parse();
    let cfg = match EffectiveConfig::resolve(flags) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    };
    if let Err(e) = init_logging(&cfg.log_level, cfg.log_format) {
        eprintln!("Error: {e}");
        process::exit(1);
    }
    process::exit(run(cfg).await);
}

fn setup_failed(stage: &str, e: impl Display) -> i32 {
    error!(error = %e, "{stage}");
    1
}

async fn run(cfg: EffectiveConfig) -> i32 {
    let mut scheme = Scheme::new();
    if let Err(e) = v1::add_to_scheme(&mut scheme) {
        return setup_failed("unable to build scheme", e);
    }
    let client = match Client::try_default().await {
        Ok(c) => c,
        Err(e) => return setup_failed("unable to start manager", e),
    };
    let mut mgr = match Manager::new(client, Arc::new(scheme), cfg.options) {
        Ok(m) => m,
        Err(e) => return setup_failed("unable to start manager", e),
    };

    let reconciler = AppReconciler::new(Arc::new(KubeObjectClient::new(mgr.client(), FIELD_MANAGER)), mgr.scheme());
    if let Err(e) = reconciler.setup_with_manager(&mut mgr) {
        error!(error = %e, controller = "App", "unable to create controller");
        return 1;
    }
    if let Err(e) = mgr.add_healthz_check("healthz", healthz::ping()) {
        return setup_failed("unable to set up health check", e);
    }
    if let Err(e) = mgr.add_readyz_check("readyz", healthz::ping()) {
        return setup_failed("unable to set up ready check", e);
    }

    info!("starting manager");
    match mgr.start(signals::shutdown_on_signals()).await {
        Ok(()) => 0,
        Err(e) => setup_failed("problem running manager", e),
    }
}

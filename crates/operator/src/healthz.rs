//! Liveness and readiness probe endpoints.
//!
//! Each probe path (`/healthz`, `/readyz`) serves a [`CheckSet`]. The aggregate endpoint runs every
//! check; `/<path>/<name>` runs a single one.
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;

use crate::error::{Error, Result};

/// A named probe; `Err` carries the failure reason.
pub type Checker = Arc<dyn Fn() -> Result<(), String> + Send + Sync>;

/// Always healthy.
pub fn ping() -> Checker { Arc::new(|| Ok(())) }

#[derive(Clone)]
pub struct CheckSet {
    kind: &'static str,
    checks: BTreeMap<String, Checker>,
}

impl CheckSet {
    pub fn new(kind: &'static str) -> Self { Self { kind, checks: BTreeMap::new() } }

    pub fn kind(&self) -> &'static str { self.kind }

    pub fn add(&mut self, name: impl Into<String>, check: Checker) -> Result<()> {
        let name = name.into();
        if name.is_empty() { return Err(Error::EmptyCheckName { kind: self.kind }); }
        if self.checks.contains_key(&name) { return Err(Error::DuplicateCheck { kind: self.kind, name }); }
        self.checks.insert(name, check);
        Ok(())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> { self.checks.keys().map(String::as_str) }

    pub fn len(&self) -> usize { self.checks.len() }

    pub fn is_empty(&self) -> bool { self.checks.is_empty() }

    fn run_one(&self, name: &str) -> Option<Result<(), String>> { self.checks.get(name).map(|c| c()) }

    fn render(&self, params: &[(String, String)]) -> (StatusCode, String) {
        let verbose = params.iter().any(|(k, _)| k == "verbose");
        let mut excluded: BTreeSet<&str> = params.iter().filter(|(k, _)| k == "exclude").map(|(_, v)| v.as_str()).collect();
        let mut body = String::new();
        let mut failed = false;
        for (name, check) in &self.checks {
            if excluded.remove(name.as_str()) {
                let _ = writeln!(body, "[+]{name} excluded: ok");
                continue;
            }
            match check() {
                Ok(()) => { let _ = writeln!(body, "[+]{name} ok"); }
                Err(reason) => {
                    tracing::debug!(check = %name, %reason, "{} check failed", self.kind);
                    let _ = writeln!(body, "[-]{name} failed: reason withheld");
                    failed = true;
                }
            }
        }
        if !excluded.is_empty() {
            let names: Vec<String> = excluded.iter().map(|n| format!("{n:?}")).collect();
            let _ = writeln!(body, "warn: some health checks cannot be excluded: no matches for {}", names.join(","));
        }
        if failed {
            let _ = writeln!(body, "{} check failed", self.kind);
            return (StatusCode::INTERNAL_SERVER_ERROR, body);
        }
        if !verbose { return (StatusCode::OK, "ok".into()); }
        let _ = writeln!(body, "{} check passed", self.kind);
        (StatusCode::OK, body)
    }
}

async fn aggregate(State(set): State<CheckSet>, Query(params): Query<Vec<(String, String)>>) -> (StatusCode, String) {
    set.render(&params)
}

async fn single(State(set): State<CheckSet>, Path(name): Path<String>) -> (StatusCode, String) {
    match set.run_one(&name) {
        None => (StatusCode::NOT_FOUND, format!("{} check {name:?} not found", set.kind)),
        Some(Ok(())) => (StatusCode::OK, "ok".into()),
        Some(Err(reason)) => (StatusCode::INTERNAL_SERVER_ERROR, format!("internal server error: {reason}")),
    }
}

fn probe_routes(set: CheckSet) -> Router {
    let base = format!("/{}", set.kind);
    let one = format!("/{}/:name", set.kind);
    Router::new().route(&base, get(aggregate)).route(&one, get(single)).with_state(set)
}

/// Router serving both probe paths.
pub fn router(healthz: CheckSet, readyz: CheckSet) -> Router { probe_routes(healthz).merge(probe_routes(readyz)) }

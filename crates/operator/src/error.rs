use std::net::SocketAddr;

use kube::core::GroupVersionKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("kubernetes api error: {0}")]
    Kube(#[from] kube::Error),
    #[error("config error: {0}")]
    Config(String),
    #[error("invalid bind address {address:?}: {reason}")]
    InvalidBindAddress { address: String, reason: String },
    #[error("failed to bind {kind} server on {addr}: {source}")]
    Bind { kind: &'static str, addr: SocketAddr, #[source] source: std::io::Error },
    #[error("{kind} server failed: {source}")]
    Serve { kind: &'static str, #[source] source: std::io::Error },
    #[error("{kind} check name must not be empty")]
    EmptyCheckName { kind: &'static str },
    #[error("{kind} check {name:?} already registered")]
    DuplicateCheck { kind: &'static str, name: String },
    #[error("kind {} already registered in {}/{} with a different shape", .0.kind, .0.group, .0.version)]
    SchemeConflict(GroupVersionKind),
    #[error("no kind {} registered for {}/{} in scheme", .0.kind, .0.group, .0.version)]
    NotRegistered(GroupVersionKind),
    #[error("missing object key: {0}")]
    MissingObjectKey(&'static str),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("leader election: {0}")]
    LeaderElection(String),
    #[error("leader election lost")]
    LeaderElectionLost,
    #[error("runnables did not stop within the {0:?} graceful shutdown period")]
    ShutdownTimeout(std::time::Duration),
    #[error("task panicked or was aborted: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("runnable {name} failed: {source}")]
    Runnable { name: String, #[source] source: Box<Error> },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

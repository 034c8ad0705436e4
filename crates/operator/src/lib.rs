//! Operator for the `apps.wzy.com/v1` `App` custom resource.
pub mod api;
pub mod backoff;
pub mod client;
pub mod config;
pub mod controller;
pub mod error;
pub mod healthz;
pub mod leader;
pub mod logging;
pub mod manager;
pub mod metrics;
pub mod rbac;
pub mod scheme;
pub mod signals;
#[doc(hidden)]
pub mod test_support;

pub use api::v1::{App, AppSpec, AppStatus};
pub use error::{Error, Result};

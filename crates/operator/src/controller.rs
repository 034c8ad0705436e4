//! Reconciler for `App` objects.
//!
//! [`AppReconciler::reconcile`] is the extension point invoked for every observed change to an
//! `App`. A complete implementation must:
//!
//! - fetch the current object; if it is gone, release anything created on its behalf, tolerating
//!   repeated calls;
//! - otherwise converge the cluster toward `spec` with the minimal set of operations and persist
//!   the observed state in `status`;
//! - stay idempotent, since delivery is at-least-once and unordered across overlapping changes;
//! - return `Err` (or a requeue) for transient failures and record permanent ones as status
//!   conditions instead of retrying forever.
//!
//! The framework never runs two reconciles for the same object concurrently, but does run them in
//! parallel for different objects.
use std::fmt::{self, Display};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::StreamExt;
use kube::{Api, Resource};
use kube_runtime::controller::{Action, Controller};
use kube_runtime::watcher;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::v1::{self, App};
use crate::backoff::{self, RequeueBackoff};
use crate::client::{NamespacedName, ObjectClient};
use crate::error::{Error, Result};
use crate::manager::{Manager, Runnable};
use crate::metrics::{self, labels};

pub const CONTROLLER_NAME: &str = "app";
pub const FIELD_MANAGER: &str = "onedemo-operator";

/// Identifies the object whose change triggered a reconcile.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Request {
    pub namespaced_name: NamespacedName,
}

impl Request {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self { namespaced_name: NamespacedName::new(namespace, name) }
    }

    pub fn for_object<K: Resource>(obj: &K) -> Self { Self { namespaced_name: NamespacedName::of(obj) } }

    pub fn name(&self) -> &str { &self.namespaced_name.name }

    pub fn namespace(&self) -> Option<&str> { self.namespaced_name.namespace.as_deref() }
}

impl Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { self.namespaced_name.fmt(f) }
}

/// What the framework should do after a successful reconcile. The zero value means "done".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileResult {
    pub requeue: bool,
    pub requeue_after: Option<Duration>,
}

impl ReconcileResult {
    pub fn requeue() -> Self { Self { requeue: true, requeue_after: None } }

    pub fn requeue_after(delay: Duration) -> Self { Self { requeue: false, requeue_after: Some(delay) } }

    pub fn is_zero(&self) -> bool { *self == Self::default() }

    pub fn metric_label(&self) -> &'static str {
        match (self.requeue, self.requeue_after) {
            (_, Some(_)) => labels::REQUEUE_AFTER,
            (true, None) => labels::REQUEUE,
            (false, None) => labels::SUCCESS,
        }
    }

    pub fn into_action(self) -> Action {
        match (self.requeue, self.requeue_after) {
            (_, Some(delay)) => Action::requeue(delay),
            (true, None) => Action::requeue(backoff::BASE_DELAY),
            (false, None) => Action::await_change(),
        }
    }
}

pub struct AppReconciler {
    pub client: Arc<dyn ObjectClient<App>>,
    pub scheme: Arc<crate::scheme::Scheme>,
}

impl AppReconciler {
    pub fn new(client: Arc<dyn ObjectClient<App>>, scheme: Arc<crate::scheme::Scheme>) -> Self { Self { client, scheme } }

    /// Moves the cluster toward the state declared by the `App` named in `req`.
    pub async fn reconcile(&self, req: &Request) -> Result<ReconcileResult> {
        debug!(app = %req, "reconciling");
        // Convergence logic goes here: fetch via self.client, diff spec against status, act, update status.
        Ok(ReconcileResult::default())
    }

    /// Registers a controller watching every `App` in the cluster.
    pub fn setup_with_manager(self, mgr: &mut Manager) -> Result<()> {
        let gvk = v1::app_gvk();
        if !mgr.scheme().recognizes(&gvk) {
            return Err(Error::NotRegistered(gvk));
        }
        metrics::init(CONTROLLER_NAME);
        mgr.add_runnable(Box::new(AppController { api: Api::all(mgr.client()), ctx: Arc::new(Context::new(self)) }));
        Ok(())
    }
}

/// Shared state handed to every reconcile and error-policy call.
pub struct Context {
    reconciler: AppReconciler,
    backoff: RequeueBackoff,
}

impl Context {
    pub fn new(reconciler: AppReconciler) -> Self { Self { reconciler, backoff: RequeueBackoff::default() } }

    pub fn backoff(&self) -> &RequeueBackoff { &self.backoff }
}

pub async fn reconcile_app(app: Arc<App>, ctx: Arc<Context>) -> Result<Action> {
    let req = Request::for_object(app.as_ref());
    let workers = metrics::ACTIVE_WORKERS.with_label_values(&[CONTROLLER_NAME]);
    workers.inc();
    let started = Instant::now();
    let res = ctx.reconciler.reconcile(&req).await;
    metrics::RECONCILE_TIME.with_label_values(&[CONTROLLER_NAME]).observe(started.elapsed().as_secs_f64());
    workers.dec();
    match res {
        Ok(result) => {
            ctx.backoff.forget(&req.namespaced_name);
            metrics::RECONCILE_TOTAL.with_label_values(&[CONTROLLER_NAME, result.metric_label()]).inc();
            Ok(result.into_action())
        }
        Err(e) => {
            metrics::RECONCILE_TOTAL.with_label_values(&[CONTROLLER_NAME, labels::ERROR]).inc();
            metrics::RECONCILE_ERRORS.with_label_values(&[CONTROLLER_NAME]).inc();
            Err(e)
        }
    }
}

pub fn error_policy(app: Arc<App>, error: &Error, ctx: Arc<Context>) -> Action {
    let key = NamespacedName::of(app.as_ref());
    let delay = ctx.backoff.next_delay(&key);
    warn!(app = %key, %error, ?delay, "reconcile failed, requeueing");
    Action::requeue(delay)
}

struct AppController {
    api: Api<App>,
    ctx: Arc<Context>,
}

#[async_trait]
impl Runnable for AppController {
    fn name(&self) -> &str { CONTROLLER_NAME }

    async fn start(self: Box<Self>, stop: CancellationToken) -> Result<()> {
        let AppController { api, ctx } = *self;
        info!(controller = CONTROLLER_NAME, "starting controller");
        Controller::new(api, watcher::Config::default())
            .graceful_shutdown_on(async move { stop.cancelled().await })
            .run(reconcile_app, error_policy, ctx)
            .for_each(|res| async move {
                match res {
                    Ok((obj, _)) => debug!(app = %obj, "reconciled"),
                    Err(e) => warn!(error = %e, "reconcile failed"),
                }
            })
            .await;
        info!(controller = CONTROLLER_NAME, "controller stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::v1::AppSpec;
    use crate::manager::Options;
    use crate::scheme::Scheme;
    use crate::test_support::{offline_client, FakeObjectClient};

    fn reconciler(fake: Arc<FakeObjectClient<App>>) -> AppReconciler {
        let mut scheme = Scheme::new();
        v1::add_to_scheme(&mut scheme).unwrap();
        AppReconciler::new(fake, Arc::new(scheme))
    }

    fn app(ns: &str, name: &str) -> App {
        let mut a = App::new(name, AppSpec { foo: Some("bar".into()) });
        a.metadata.namespace = Some(ns.into());
        a
    }

    #[tokio::test]
    async fn reconcile_is_a_successful_noop_for_any_request() {
        let fake = Arc::new(FakeObjectClient::with_objects([app("default", "present")]));
        let r = reconciler(Arc::clone(&fake));
        for req in [Request::new("default", "present"), Request::new("default", "missing"), Request::new("", "")] {
            let res = r.reconcile(&req).await.unwrap();
            assert!(res.is_zero(), "{req}");
            assert!(!res.requeue);
            assert_eq!(res.requeue_after, None);
        }
        assert!(fake.calls().is_empty(), "reconcile must not touch the cluster");
    }

    #[tokio::test]
    async fn framework_adapter_awaits_change() {
        metrics::init(CONTROLLER_NAME);
        let ctx = Arc::new(Context::new(reconciler(Arc::new(FakeObjectClient::new()))));
        let before = metrics::RECONCILE_TOTAL.with_label_values(&[CONTROLLER_NAME, labels::SUCCESS]).get();
        let action = reconcile_app(Arc::new(app("default", "demo")), ctx).await.unwrap();
        assert_eq!(action, Action::await_change());
        assert!(metrics::RECONCILE_TOTAL.with_label_values(&[CONTROLLER_NAME, labels::SUCCESS]).get() > before);
    }

    #[tokio::test]
    async fn error_policy_backs_off_per_object() {
        let ctx = Arc::new(Context::new(reconciler(Arc::new(FakeObjectClient::new()))));
        let obj = Arc::new(app("default", "flaky"));
        let err = Error::Config("boom".into());
        assert_eq!(error_policy(Arc::clone(&obj), &err, Arc::clone(&ctx)), Action::requeue(Duration::from_millis(5)));
        assert_eq!(error_policy(Arc::clone(&obj), &err, Arc::clone(&ctx)), Action::requeue(Duration::from_millis(10)));
        assert_eq!(ctx.backoff().failures(&NamespacedName::new("default", "flaky")), 2);
        reconcile_app(obj, Arc::clone(&ctx)).await.unwrap();
        assert_eq!(ctx.backoff().failures(&NamespacedName::new("default", "flaky")), 0);
    }

    #[test]
    fn result_mapping() {
        assert_eq!(ReconcileResult::default().into_action(), Action::await_change());
        assert_eq!(ReconcileResult::default().metric_label(), "success");
        let after = ReconcileResult::requeue_after(Duration::from_secs(30));
        assert_eq!(after.into_action(), Action::requeue(Duration::from_secs(30)));
        assert_eq!(after.metric_label(), "requeue_after");
        assert_eq!(ReconcileResult::requeue().metric_label(), "requeue");
        assert!(!ReconcileResult::requeue().is_zero());
    }

    #[tokio::test]
    async fn setup_requires_registered_kind() {
        let fake: Arc<FakeObjectClient<App>> = Arc::new(FakeObjectClient::new());
        let mut mgr = Manager::new(offline_client(), Arc::new(Scheme::new()), Options::default()).unwrap();
        let err = AppReconciler::new(fake.clone(), mgr.scheme()).setup_with_manager(&mut mgr).unwrap_err();
        assert!(matches!(err, Error::NotRegistered(ref gvk) if gvk.kind == "App"));
        assert!(mgr.runnable_names().is_empty());

        let mut scheme = Scheme::new();
        v1::add_to_scheme(&mut scheme).unwrap();
        let mut mgr = Manager::new(offline_client(), Arc::new(scheme), Options::default()).unwrap();
        AppReconciler::new(fake, mgr.scheme()).setup_with_manager(&mut mgr).unwrap();
        assert_eq!(mgr.runnable_names(), vec![CONTROLLER_NAME]);
    }

    #[test]
    fn request_display() {
        assert_eq!(Request::new("default", "demo").to_string(), "default/demo");
        let r = Request::for_object(&app("ns1", "x"));
        assert_eq!(r.name(), "x");
        assert_eq!(r.namespace(), Some("ns1"));
    }
}

//! `apps.wzy.com/v1`: the `App` custom resource and its group/version registration.
use kube::core::{GroupVersion, GroupVersionKind};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::scheme::{Scheme, SchemeBuilder};

pub const GROUP: &str = "apps.wzy.com";
pub const VERSION: &str = "v1";

/// Desired state of an `App`.
#[derive(CustomResource, Serialize, Deserialize, Debug, Clone, Default, JsonSchema, PartialEq)]
#[kube(group = "apps.wzy.com", version = "v1", kind = "App", plural = "apps", namespaced, status = "AppStatus")]
pub struct AppSpec {
    /// Example field; replace with the real desired-state fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub foo: Option<String>,
}

/// Observed state of an `App`. Intentionally empty until the reconciler reports status.
#[derive(Serialize, Deserialize, Debug, Clone, Default, JsonSchema, PartialEq)]
pub struct AppStatus {}

pub fn group_version() -> GroupVersion { GroupVersion::gv(GROUP, VERSION) }

pub fn app_gvk() -> GroupVersionKind { GroupVersionKind::gvk(GROUP, VERSION, "App") }

/// Builder holding every kind of this group/version.
pub fn scheme_builder() -> SchemeBuilder {
    SchemeBuilder::new(group_version()).register::<App>()
}

/// Adds the kinds of this group/version to `scheme`.
pub fn add_to_scheme(scheme: &mut Scheme) -> Result<()> {
    scheme_builder().add_to_scheme(scheme)
}

//! Registry mapping group/version/kind to the structural shape of each custom type.
//!
//! The registry is built once during startup and handed to the [`Manager`](crate::manager::Manager)
//! by `Arc`; nothing mutates it after the control loop starts.
use std::collections::BTreeMap;

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::core::{ApiResource, GroupVersion, GroupVersionKind};
use kube::{CustomResourceExt, Resource};

use crate::error::{Error, Result};

type Key = (String, String, String);

fn key(gvk: &GroupVersionKind) -> Key { (gvk.group.clone(), gvk.version.clone(), gvk.kind.clone()) }

#[derive(Debug, Clone, PartialEq)]
struct Registration {
    resource: ApiResource,
    list_kind: String,
    crd: CustomResourceDefinition,
}

impl Registration {
    fn of<K>() -> Self
    where
        K: Resource<DynamicType = ()> + CustomResourceExt,
    {
        let resource = ApiResource::erase::<K>(&());
        let list_kind = format!("{}List", resource.kind);
        Self { resource, list_kind, crd: K::crd() }
    }

    fn gvk(&self) -> GroupVersionKind {
        GroupVersionKind::gvk(&self.resource.group, &self.resource.version, &self.resource.kind)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Scheme {
    kinds: BTreeMap<Key, Registration>,
}

impl Scheme {
    pub fn new() -> Self { Self::default() }

    pub fn recognizes(&self, gvk: &GroupVersionKind) -> bool { self.kinds.contains_key(&key(gvk)) }

    pub fn kinds(&self) -> Vec<GroupVersionKind> { self.kinds.values().map(Registration::gvk).collect() }

    pub fn len(&self) -> usize { self.kinds.len() }

    pub fn is_empty(&self) -> bool { self.kinds.is_empty() }

    pub fn api_resource(&self, gvk: &GroupVersionKind) -> Option<&ApiResource> {
        self.kinds.get(&key(gvk)).map(|r| &r.resource)
    }

    pub fn list_kind(&self, gvk: &GroupVersionKind) -> Option<&str> {
        self.kinds.get(&key(gvk)).map(|r| r.list_kind.as_str())
    }

    pub fn crds(&self) -> Vec<&CustomResourceDefinition> { self.kinds.values().map(|r| &r.crd).collect() }

    /// Distinct group/versions, in sorted order.
    pub fn group_versions(&self) -> Vec<GroupVersion> {
        let mut out: Vec<GroupVersion> = Vec::new();
        for (group, version, _) in self.kinds.keys() {
            if !out.iter().any(|gv| &gv.group == group && &gv.version == version) {
                out.push(GroupVersion::gv(group, version));
            }
        }
        out
    }

    fn insert(&mut self, reg: Registration) -> Result<()> {
        let gvk = reg.gvk();
        match self.kinds.get(&key(&gvk)) {
            Some(existing) if existing == &reg => Ok(()),
            Some(_) => Err(Error::SchemeConflict(gvk)),
            None => {
                self.kinds.insert(key(&gvk), reg);
                Ok(())
            }
        }
    }
}

/// Collects the kinds of one group/version before they are added to a [`Scheme`].
#[derive(Debug, Clone)]
pub struct SchemeBuilder {
    group_version: GroupVersion,
    registrations: Vec<Registration>,
}

impl SchemeBuilder {
    pub fn new(group_version: GroupVersion) -> Self { Self { group_version, registrations: Vec::new() } }

    pub fn group_version(&self) -> &GroupVersion { &self.group_version }

    pub fn register<K>(mut self) -> Self
    where
        K: Resource<DynamicType = ()> + CustomResourceExt,
    {
        self.registrations.push(Registration::of::<K>());
        self
    }

    pub fn add_to_scheme(&self, scheme: &mut Scheme) -> Result<()> {
        for reg in &self.registrations {
            if reg.resource.group != self.group_version.group || reg.resource.version != self.group_version.version {
                return Err(Error::Config(format!(
                    "kind {} belongs to {}, not {}/{}",
                    reg.resource.kind, reg.resource.api_version, self.group_version.group, self.group_version.version
                )));
            }
            scheme.insert(reg.clone())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::v1::{self, App};
    use kube::CustomResource;
    use schemars::JsonSchema;
    use serde::{Deserialize, Serialize};

    #[test]
    fn v1_registers_exactly_app() {
        let mut scheme = Scheme::new();
        v1::add_to_scheme(&mut scheme).unwrap();
        assert_eq!(scheme.len(), 1);
        let gvk = v1::app_gvk();
        assert!(scheme.recognizes(&gvk));
        assert_eq!(scheme.kinds(), vec![GroupVersionKind::gvk("apps.wzy.com", "v1", "App")]);
        assert_eq!(scheme.list_kind(&gvk), Some("AppList"));
        assert_eq!(scheme.api_resource(&gvk).map(|r| r.plural.as_str()), Some("apps"));
        let gvs = scheme.group_versions();
        assert_eq!(gvs.len(), 1);
        assert_eq!(gvs[0].api_version(), "apps.wzy.com/v1");
    }

    #[test]
    fn re_adding_same_kind_is_idempotent() {
        let mut scheme = Scheme::new();
        v1::add_to_scheme(&mut scheme).unwrap();
        v1::add_to_scheme(&mut scheme).unwrap();
        assert_eq!(scheme.len(), 1);
        assert_eq!(scheme.crds().len(), 1);
    }

    #[test]
    fn unknown_kind_not_recognized() {
        let mut scheme = Scheme::new();
        assert!(scheme.is_empty());
        v1::add_to_scheme(&mut scheme).unwrap();
        assert!(!scheme.recognizes(&GroupVersionKind::gvk("apps.wzy.com", "v2", "App")));
        assert!(!scheme.recognizes(&GroupVersionKind::gvk("apps", "v1", "Deployment")));
    }

    mod shadow {
        use super::*;
        // Same group/version/kind as `App`, different schema.
        #[derive(CustomResource, Serialize, Deserialize, Debug, Clone, JsonSchema)]
        #[kube(group = "apps.wzy.com", version = "v1", kind = "App", plural = "apps", namespaced)]
        pub struct AppSpec {
            pub replicas: i32,
        }
    }

    #[test]
    fn conflicting_shape_is_rejected() {
        let mut scheme = Scheme::new();
        v1::add_to_scheme(&mut scheme).unwrap();
        let err = SchemeBuilder::new(v1::group_version()).register::<shadow::App>().add_to_scheme(&mut scheme).unwrap_err();
        assert!(matches!(err, Error::SchemeConflict(ref gvk) if gvk.kind == "App"));
    }

    #[test]
    fn builder_rejects_foreign_group_version() {
        let mut scheme = Scheme::new();
        let err = SchemeBuilder::new(GroupVersion::gv("other.io", "v1")).register::<App>().add_to_scheme(&mut scheme).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(scheme.is_empty());
    }
}

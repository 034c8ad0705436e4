//! Typed cluster access injected into reconcilers.
use std::fmt::{self, Debug, Display};

use async_trait::async_trait;
use futures_util::stream::{BoxStream, StreamExt};
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::{Client, Resource, ResourceExt};
use kube_runtime::watcher;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Error, Result};

/// Namespace + name of one object. `namespace` is `None` for cluster-scoped objects.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NamespacedName {
    pub namespace: Option<String>,
    pub name: String,
}

impl NamespacedName {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self { namespace: Some(namespace.into()), name: name.into() }
    }

    pub fn cluster(name: impl Into<String>) -> Self { Self { namespace: None, name: name.into() } }

    pub fn of<K: Resource>(obj: &K) -> Self {
        Self { namespace: obj.namespace(), name: obj.name_any() }
    }
}

impl Display for NamespacedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{ns}/{}", self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// Generic CRUD + watch over one namespaced resource type.
#[async_trait]
pub trait ObjectClient<K>: Send + Sync
where
    K: Clone + Send + Sync + 'static,
{
    async fn get(&self, key: &NamespacedName) -> Result<Option<K>>;
    /// Lists objects in `namespace`, or in all namespaces when `None`.
    async fn list(&self, namespace: Option<&str>, params: &ListParams) -> Result<Vec<K>>;
    fn watch(&self, namespace: Option<&str>) -> BoxStream<'static, Result<watcher::Event<K>, watcher::Error>>;
    async fn create(&self, obj: &K) -> Result<K>;
    async fn update(&self, obj: &K) -> Result<K>;
    async fn update_status(&self, obj: &K) -> Result<K>;
    /// JSON merge patch.
    async fn patch(&self, key: &NamespacedName, patch: &serde_json::Value) -> Result<K>;
    /// Deleting an object that is already gone succeeds.
    async fn delete(&self, key: &NamespacedName) -> Result<()>;
}

/// [`ObjectClient`] backed by the API server.
#[derive(Clone)]
pub struct KubeObjectClient {
    client: Client,
    field_manager: String,
}

impl KubeObjectClient {
    pub fn new(client: Client, field_manager: impl Into<String>) -> Self {
        Self { client, field_manager: field_manager.into() }
    }

    fn api<K>(&self, namespace: Option<&str>) -> Api<K>
    where
        K: Resource<DynamicType = (), Scope = NamespaceResourceScope>,
    {
        match namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        }
    }

    fn namespaced_api<K>(&self, namespace: Option<&str>) -> Result<Api<K>>
    where
        K: Resource<DynamicType = (), Scope = NamespaceResourceScope>,
    {
        let ns = namespace.ok_or(Error::MissingObjectKey(".metadata.namespace"))?;
        Ok(Api::namespaced(self.client.clone(), ns))
    }

    fn post_params(&self) -> PostParams {
        PostParams { field_manager: Some(self.field_manager.clone()), ..PostParams::default() }
    }
}

fn object_name<K: Resource>(obj: &K) -> Result<String> {
    obj.meta().name.clone().ok_or(Error::MissingObjectKey(".metadata.name"))
}

#[async_trait]
impl<K> ObjectClient<K> for KubeObjectClient
where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope> + Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn get(&self, key: &NamespacedName) -> Result<Option<K>> {
        let api: Api<K> = self.namespaced_api(key.namespace.as_deref())?;
        Ok(api.get_opt(&key.name).await?)
    }

    async fn list(&self, namespace: Option<&str>, params: &ListParams) -> Result<Vec<K>> {
        let api: Api<K> = self.api(namespace);
        Ok(api.list(params).await?.items)
    }

    fn watch(&self, namespace: Option<&str>) -> BoxStream<'static, Result<watcher::Event<K>, watcher::Error>> {
        let api: Api<K> = self.api(namespace);
        watcher(api, watcher::Config::default()).boxed()
    }

    async fn create(&self, obj: &K) -> Result<K> {
        let api: Api<K> = self.namespaced_api(obj.meta().namespace.as_deref())?;
        Ok(api.create(&self.post_params(), obj).await?)
    }

    async fn update(&self, obj: &K) -> Result<K> {
        let api: Api<K> = self.namespaced_api(obj.meta().namespace.as_deref())?;
        let name = object_name(obj)?;
        Ok(api.replace(&name, &self.post_params(), obj).await?)
    }

    async fn update_status(&self, obj: &K) -> Result<K> {
        let api: Api<K> = self.namespaced_api(obj.meta().namespace.as_deref())?;
        let name = object_name(obj)?;
        let body = serde_json::to_vec(obj)?;
        Ok(api.replace_status(&name, &self.post_params(), body).await?)
    }

    async fn patch(&self, key: &NamespacedName, patch: &serde_json::Value) -> Result<K> {
        let api: Api<K> = self.namespaced_api(key.namespace.as_deref())?;
        let params = PatchParams { field_manager: Some(self.field_manager.clone()), ..PatchParams::default() };
        Ok(api.patch(&key.name, &params, &Patch::Merge(patch)).await?)
    }

    async fn delete(&self, key: &NamespacedName) -> Result<()> {
        let api: Api<K> = self.namespaced_api(key.namespace.as_deref())?;
        match api.delete(&key.name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

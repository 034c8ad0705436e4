//! Test harness utilities: an in-memory [`ObjectClient`] that records every call.
use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use futures_util::stream::{self, BoxStream, StreamExt};
use kube::api::ListParams;
use kube::Resource;
use kube_runtime::watcher;

use crate::client::{NamespacedName, ObjectClient};
use crate::error::{Error, Result};

/// Client pointed at an address nothing listens on; usable wherever a [`kube::Client`] is
/// required but no request is expected to be sent.
pub fn offline_client() -> kube::Client {
    let config = kube::Config::new("http://127.0.0.1:9".parse().expect("static cluster url"));
    kube::Client::try_from(config).expect("client from static config")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Get(NamespacedName),
    List(Option<String>),
    Watch(Option<String>),
    Create(NamespacedName),
    Update(NamespacedName),
    UpdateStatus(NamespacedName),
    Patch(NamespacedName),
    Delete(NamespacedName),
}

/// Stores objects in a map keyed by [`NamespacedName`].
pub struct FakeObjectClient<K> {
    objects: Mutex<BTreeMap<NamespacedName, K>>,
    calls: Mutex<Vec<Call>>,
}

impl<K> Default for FakeObjectClient<K> {
    fn default() -> Self { Self { objects: Mutex::new(BTreeMap::new()), calls: Mutex::new(Vec::new()) } }
}

impl<K: Resource + Clone> FakeObjectClient<K> {
    pub fn new() -> Self { Self::default() }

    pub fn with_objects(objs: impl IntoIterator<Item = K>) -> Self {
        let me = Self::default();
        {
            let mut guard = me.objects.lock().unwrap();
            for o in objs { guard.insert(NamespacedName::of(&o), o); }
        }
        me
    }

    pub fn calls(&self) -> Vec<Call> { self.calls.lock().unwrap().clone() }

    pub fn len(&self) -> usize { self.objects.lock().unwrap().len() }

    pub fn is_empty(&self) -> bool { self.len() == 0 }

    fn record(&self, call: Call) { self.calls.lock().unwrap().push(call); }

    fn key_of(obj: &K) -> Result<NamespacedName> {
        if obj.meta().name.is_none() { return Err(Error::MissingObjectKey(".metadata.name")); }
        Ok(NamespacedName::of(obj))
    }
}

#[async_trait]
impl<K> ObjectClient<K> for FakeObjectClient<K>
where
    K: Resource + Clone + Send + Sync + 'static,
{
    async fn get(&self, key: &NamespacedName) -> Result<Option<K>> {
        self.record(Call::Get(key.clone()));
        Ok(self.objects.lock().unwrap().get(key).cloned())
    }

    async fn list(&self, namespace: Option<&str>, _params: &ListParams) -> Result<Vec<K>> {
        self.record(Call::List(namespace.map(str::to_string)));
        let guard = self.objects.lock().unwrap();
        Ok(guard
            .iter()
            .filter(|(k, _)| namespace.is_none() || k.namespace.as_deref() == namespace)
            .map(|(_, v)| v.clone())
            .collect())
    }

    fn watch(&self, namespace: Option<&str>) -> BoxStream<'static, Result<watcher::Event<K>, watcher::Error>> {
        self.record(Call::Watch(namespace.map(str::to_string)));
        let snapshot: Vec<K> = self
            .objects
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, _)| namespace.is_none() || k.namespace.as_deref() == namespace)
            .map(|(_, v)| v.clone())
            .collect();
        stream::once(async move { Ok(watcher::Event::Restarted(snapshot)) }).boxed()
    }

    async fn create(&self, obj: &K) -> Result<K> {
        let key = Self::key_of(obj)?;
        self.record(Call::Create(key.clone()));
        let mut guard = self.objects.lock().unwrap();
        if guard.contains_key(&key) {
            return Err(Error::Config(format!("{key} already exists")));
        }
        guard.insert(key, obj.clone());
        Ok(obj.clone())
    }

    async fn update(&self, obj: &K) -> Result<K> {
        let key = Self::key_of(obj)?;
        self.record(Call::Update(key.clone()));
        let mut guard = self.objects.lock().unwrap();
        match guard.get_mut(&key) {
            Some(slot) => { *slot = obj.clone(); Ok(obj.clone()) }
            None => Err(Error::Config(format!("{key} not found"))),
        }
    }

    async fn update_status(&self, obj: &K) -> Result<K> {
        let key = Self::key_of(obj)?;
        self.record(Call::UpdateStatus(key.clone()));
        let mut guard = self.objects.lock().unwrap();
        match guard.get_mut(&key) {
            Some(slot) => { *slot = obj.clone(); Ok(obj.clone()) }
            None => Err(Error::Config(format!("{key} not found"))),
        }
    }

    async fn patch(&self, key: &NamespacedName, _patch: &serde_json::Value) -> Result<K> {
        self.record(Call::Patch(key.clone()));
        self.objects.lock().unwrap().get(key).cloned().ok_or_else(|| Error::Config(format!("{key} not found")))
    }

    async fn delete(&self, key: &NamespacedName) -> Result<()> {
        self.record(Call::Delete(key.clone()));
        self.objects.lock().unwrap().remove(key);
        Ok(())
    }
}

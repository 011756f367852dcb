#![allow(dead_code)]

//! In-memory stand-in for a remote service and a child resource backed by it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, bail};
use futures::future::{BoxFuture, FutureExt};
use taskgraph::dag::{TaskItem, Wiring};
use taskgraph::errors::Result;
use taskgraph::resource::ChildResource;

/// Server-side representation of a fake child.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeInner {
    pub name: String,
    pub value: String,
    pub version: u32,
}

/// Fake remote service: a keyed store plus a call log.
#[derive(Default)]
pub struct FakeRemote {
    store: Mutex<HashMap<String, FakeInner>>,
    calls: Mutex<Vec<String>>,
    fail_ops: Mutex<Vec<String>>,
}

impl FakeRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Calls as `"<op>:<name>"`, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, op: &str) -> usize {
        let prefix = format!("{op}:");
        self.calls()
            .iter()
            .filter(|c| c.starts_with(&prefix))
            .count()
    }

    pub fn stored(&self, name: &str) -> Option<FakeInner> {
        self.store.lock().unwrap().get(name).cloned()
    }

    /// Change the stored value as if someone else edited it.
    pub fn edit_remotely(&self, name: &str, value: &str) {
        if let Some(inner) = self.store.lock().unwrap().get_mut(name) {
            inner.value = value.to_string();
            inner.version += 1;
        }
    }

    /// Make every future call of `op` fail.
    pub fn fail_on(&self, op: &str) {
        self.fail_ops.lock().unwrap().push(op.to_string());
    }

    fn record(&self, op: &str, name: &str) -> anyhow::Result<()> {
        self.calls.lock().unwrap().push(format!("{op}:{name}"));
        if self.fail_ops.lock().unwrap().iter().any(|o| o == op) {
            bail!("remote {op} of '{name}' rejected");
        }
        Ok(())
    }

    fn create(&self, name: &str, value: &str) -> anyhow::Result<FakeInner> {
        self.record("create", name)?;
        let inner = FakeInner {
            name: name.to_string(),
            value: value.to_string(),
            version: 1,
        };
        self.store
            .lock()
            .unwrap()
            .insert(name.to_string(), inner.clone());
        Ok(inner)
    }

    fn update(&self, name: &str, value: &str) -> anyhow::Result<FakeInner> {
        self.record("update", name)?;
        let mut store = self.store.lock().unwrap();
        let inner = store
            .get_mut(name)
            .ok_or_else(|| anyhow!("'{name}' not found"))?;
        inner.value = value.to_string();
        inner.version += 1;
        Ok(inner.clone())
    }

    fn delete(&self, name: &str) -> anyhow::Result<()> {
        self.record("delete", name)?;
        self.store
            .lock()
            .unwrap()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| anyhow!("'{name}' not found"))
    }

    fn get(&self, name: &str) -> anyhow::Result<FakeInner> {
        self.record("get", name)?;
        self.stored(name).ok_or_else(|| anyhow!("'{name}' not found"))
    }

    fn after_post_run(&self, name: &str, faulted: bool) {
        self.calls
            .lock()
            .unwrap()
            .push(format!("after_post_run:{name}:{faulted}"));
    }
}

/// Child resource whose remote operations go to a [`FakeRemote`].
pub struct FakeChildResource {
    name: String,
    desired: String,
    inner: Option<FakeInner>,
    remote: Arc<FakeRemote>,
    late_dependency: Option<Arc<dyn TaskItem>>,
}

impl FakeChildResource {
    pub fn new(name: &str, desired: &str, remote: &Arc<FakeRemote>) -> Self {
        Self {
            name: name.to_string(),
            desired: desired.to_string(),
            inner: None,
            remote: Arc::clone(remote),
            late_dependency: None,
        }
    }

    /// Add `item` as a dependency from `before_group_invoke`.
    pub fn with_late_dependency(mut self, item: Arc<dyn TaskItem>) -> Self {
        self.late_dependency = Some(item);
        self
    }

    pub fn set_desired(&mut self, value: &str) {
        self.desired = value.to_string();
    }

    pub fn inner(&self) -> Option<&FakeInner> {
        self.inner.as_ref()
    }
}

impl ChildResource for FakeChildResource {
    type Inner = FakeInner;

    fn create_resource(&self) -> BoxFuture<'static, anyhow::Result<FakeInner>> {
        let remote = Arc::clone(&self.remote);
        let name = self.name.clone();
        let desired = self.desired.clone();
        async move {
            tokio::task::yield_now().await;
            remote.create(&name, &desired)
        }
        .boxed()
    }

    fn update_resource(&self) -> BoxFuture<'static, anyhow::Result<FakeInner>> {
        let remote = Arc::clone(&self.remote);
        let name = self.name.clone();
        let desired = self.desired.clone();
        async move {
            tokio::task::yield_now().await;
            remote.update(&name, &desired)
        }
        .boxed()
    }

    fn delete_resource(&self) -> BoxFuture<'static, anyhow::Result<()>> {
        let remote = Arc::clone(&self.remote);
        let name = self.name.clone();
        async move {
            tokio::task::yield_now().await;
            remote.delete(&name)
        }
        .boxed()
    }

    fn get_inner(&self) -> BoxFuture<'static, anyhow::Result<FakeInner>> {
        let remote = Arc::clone(&self.remote);
        let name = self.name.clone();
        async move { remote.get(&name) }.boxed()
    }

    fn set_inner(&mut self, inner: FakeInner) {
        self.inner = Some(inner);
    }

    fn before_group_invoke(&self, wiring: &mut Wiring<'_>) -> Result<()> {
        if let Some(item) = &self.late_dependency {
            wiring.add_dependency(Arc::clone(item))?;
        }
        Ok(())
    }

    fn after_post_run(&self, faulted: bool) -> BoxFuture<'static, anyhow::Result<()>> {
        let remote = Arc::clone(&self.remote);
        let name = self.name.clone();
        async move {
            remote.after_post_run(&name, faulted);
            Ok(())
        }
        .boxed()
    }
}

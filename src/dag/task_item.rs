// src/dag/task_item.rs

//! The node contract of a task group.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::{self, BoxFuture, FutureExt};

use crate::dag::context::InvocationContext;
use crate::dag::task_group::Wiring;
use crate::errors::Result;
use crate::types::TaskKey;

/// Opaque value a task item yields on success.
///
/// Cloning shares the same allocation, so two clones are the same value
/// (see [`Produced::ptr_eq`]). [`Produced::void`] is the "no value" marker a
/// node returns when it has nothing to hand to its dependents (e.g. after a
/// delete).
#[derive(Clone)]
pub struct Produced(Option<Arc<dyn Any + Send + Sync>>);

impl Produced {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Produced(Some(Arc::new(value)))
    }

    pub fn void() -> Self {
        Produced(None)
    }

    pub fn is_void(&self) -> bool {
        self.0.is_none()
    }

    /// Shared handle to the value if it is a `T`.
    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        let value = self.0.clone()?;
        value.downcast::<T>().ok()
    }

    pub fn downcast_ref<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.0.as_deref()?.downcast_ref::<T>()
    }

    /// Identity comparison. Two void markers are equal.
    pub fn ptr_eq(&self, other: &Produced) -> bool {
        match (&self.0, &other.0) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        }
    }
}

impl fmt::Debug for Produced {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            None => f.write_str("Produced(void)"),
            Some(value) => write!(f, "Produced({:p})", Arc::as_ptr(value)),
        }
    }
}

/// A single schedulable unit of asynchronous work.
///
/// Items are shared through `Arc` and identified by [`TaskItem::key`]; adding
/// a second item with a key already present in a group reuses the first one.
pub trait TaskItem: Send + Sync {
    fn key(&self) -> &str;

    /// Called once per invocation, before the primary phase starts.
    ///
    /// Lets the item register dependencies or post-run dependents that were
    /// not known when it was constructed. Must not block and must not invoke
    /// other items.
    fn before_invoke(&self, _wiring: &mut Wiring<'_>) -> Result<()> {
        Ok(())
    }

    /// Perform the work. Results of declared dependencies are readable from
    /// `ctx`.
    fn invoke<'a>(&'a self, ctx: &'a InvocationContext) -> BoxFuture<'a, anyhow::Result<Produced>>;

    /// Called exactly once per invocation after the group has settled,
    /// whether or not this item ran. `faulted` reports the primary outcome.
    fn after_settlement(&self, _faulted: bool) -> BoxFuture<'_, anyhow::Result<()>> {
        future::ready(Ok(())).boxed()
    }
}

/// Task item backed by an async closure.
///
/// The closure receives a clone of the invocation context.
///
/// ```ignore
/// let item = FnTaskItem::shared("network", |_ctx| async move {
///     Ok(Produced::new("10.0.0.0/16".to_string()))
/// });
/// ```
pub struct FnTaskItem<F> {
    key: TaskKey,
    func: F,
}

impl<F, Fut> FnTaskItem<F>
where
    F: Fn(InvocationContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Produced>> + Send + 'static,
{
    pub fn new(key: impl Into<TaskKey>, func: F) -> Self {
        Self {
            key: key.into(),
            func,
        }
    }

    /// Same as [`FnTaskItem::new`], already wrapped for insertion in a group.
    pub fn shared(key: impl Into<TaskKey>, func: F) -> Arc<dyn TaskItem> {
        Arc::new(Self::new(key, func))
    }
}

impl<F, Fut> TaskItem for FnTaskItem<F>
where
    F: Fn(InvocationContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Produced>> + Send + 'static,
{
    fn key(&self) -> &str {
        &self.key
    }

    fn invoke<'a>(&'a self, ctx: &'a InvocationContext) -> BoxFuture<'a, anyhow::Result<Produced>> {
        (self.func)(ctx.clone()).boxed()
    }
}

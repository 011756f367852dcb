// src/resource/external_child.rs

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use futures::future::{self, BoxFuture, FutureExt};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::GraphOptions;
use crate::dag::{HasTaskGroup, InvocationContext, Produced, TaskGroup, TaskItem, Wiring};
use crate::errors::{Result, TaskGraphError};
use crate::resource::pending::{AtomicPendingOperation, PendingOperation};
use crate::types::TaskKey;

/// A remote entity owned by a parent, created, updated or removed as one
/// node of a task group.
///
/// The async operations return `'static` futures: implementations clone
/// whatever handle they need (client, desired state) before returning, so the
/// entity is never borrowed across a remote call.
pub trait ChildResource: Send + Sync + 'static {
    /// Server-side representation of the entity.
    type Inner: Clone + Send + Sync + 'static;

    fn create_resource(&self) -> BoxFuture<'static, anyhow::Result<Self::Inner>>;

    fn update_resource(&self) -> BoxFuture<'static, anyhow::Result<Self::Inner>>;

    fn delete_resource(&self) -> BoxFuture<'static, anyhow::Result<()>>;

    /// Fetch the current server-side representation.
    fn get_inner(&self) -> BoxFuture<'static, anyhow::Result<Self::Inner>>;

    fn set_inner(&mut self, inner: Self::Inner);

    /// Register dependencies that are only known right before the group runs.
    fn before_group_invoke(&self, _wiring: &mut Wiring<'_>) -> Result<()> {
        Ok(())
    }

    /// Runs once the owning group has settled, whatever the outcome.
    fn after_post_run(&self, _faulted: bool) -> BoxFuture<'static, anyhow::Result<()>> {
        future::ready(Ok(())).boxed()
    }
}

/// State shared between an [`ExternalChild`] and its action node.
struct ChildShared<R> {
    name: String,
    resource: RwLock<R>,
    pending: AtomicPendingOperation,
    last_result: Mutex<Option<Produced>>,
}

impl<R> ChildShared<R> {
    fn read_resource(&self) -> RwLockReadGuard<'_, R> {
        self.resource.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_resource(&self) -> RwLockWriteGuard<'_, R> {
        self.resource.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_last_result(&self, value: Option<Produced>) {
        *self.last_result.lock().unwrap_or_else(PoisonError::into_inner) = value;
    }

    fn last_result(&self) -> Option<Produced> {
        self.last_result
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Root node of an external child's task group.
struct ChildActionTask<R> {
    key: TaskKey,
    shared: Arc<ChildShared<R>>,
}

impl<R: ChildResource> ChildActionTask<R> {
    async fn perform(&self, op: PendingOperation) -> anyhow::Result<Produced> {
        match op {
            PendingOperation::ToBeCreated => {
                let call = self.shared.read_resource().create_resource();
                let inner = call.await?;
                self.shared.write_resource().set_inner(inner.clone());
                Ok(Produced::new(inner))
            }
            PendingOperation::ToBeUpdated => {
                let call = self.shared.read_resource().update_resource();
                let inner = call.await?;
                self.shared.write_resource().set_inner(inner.clone());
                Ok(Produced::new(inner))
            }
            PendingOperation::ToBeRemoved => {
                let call = self.shared.read_resource().delete_resource();
                call.await?;
                Ok(Produced::void())
            }
            PendingOperation::None => {
                Err(TaskGraphError::NoActionPending(self.shared.name.clone()).into())
            }
        }
    }
}

impl<R: ChildResource> TaskItem for ChildActionTask<R> {
    fn key(&self) -> &str {
        &self.key
    }

    fn before_invoke(&self, wiring: &mut Wiring<'_>) -> Result<()> {
        self.shared.read_resource().before_group_invoke(wiring)
    }

    fn invoke<'a>(&'a self, _ctx: &'a InvocationContext) -> BoxFuture<'a, anyhow::Result<Produced>> {
        async move {
            let op = self.shared.pending.load();
            debug!(child = %self.shared.name, task = %self.key, op = %op, "child action started");

            let produced = self.perform(op).await?;

            self.shared.pending.store(PendingOperation::None);
            self.shared.set_last_result(Some(produced.clone()));
            debug!(child = %self.shared.name, task = %self.key, op = %op, "child action finished");
            Ok(produced)
        }
        .boxed()
    }

    fn after_settlement(&self, faulted: bool) -> BoxFuture<'_, anyhow::Result<()>> {
        self.shared.read_resource().after_post_run(faulted)
    }
}

/// Owner-side handle of a [`ChildResource`].
///
/// Holds the entity, its pending operation and the task group rooted at the
/// entity's action node. Only `&mut` methods change the pending operation,
/// apart from the action node resetting it after a successful run.
pub struct ExternalChild<R: ChildResource, P> {
    parent: Arc<P>,
    shared: Arc<ChildShared<R>>,
    group: TaskGroup,
}

impl<R: ChildResource, P> ExternalChild<R, P> {
    /// New child whose task key is a random UUID.
    pub fn new(name: impl Into<String>, parent: Arc<P>, resource: R) -> Self {
        Self::with_key(Uuid::new_v4().to_string(), name, parent, resource)
    }

    pub fn with_key(
        key: impl Into<TaskKey>,
        name: impl Into<String>,
        parent: Arc<P>,
        resource: R,
    ) -> Self {
        let shared = Arc::new(ChildShared {
            name: name.into(),
            resource: RwLock::new(resource),
            pending: AtomicPendingOperation::default(),
            last_result: Mutex::new(None),
        });
        let action = ChildActionTask {
            key: key.into(),
            shared: Arc::clone(&shared),
        };
        Self {
            parent,
            shared,
            group: TaskGroup::new(Arc::new(action)),
        }
    }

    pub fn with_options(mut self, options: GraphOptions) -> Self {
        self.group = self.group.with_options(options);
        self
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Key of the action node, which is also the key of the task group.
    pub fn key(&self) -> &str {
        self.group.key()
    }

    pub fn parent(&self) -> &Arc<P> {
        &self.parent
    }

    pub fn pending_operation(&self) -> PendingOperation {
        self.shared.pending.load()
    }

    pub fn set_pending_operation(&mut self, op: PendingOperation) {
        self.shared.pending.store(op);
    }

    /// Mark a child with nothing pending as to be created.
    pub fn prepare_for_update(&mut self) -> &mut Self {
        self.shared
            .pending
            .replace_if(PendingOperation::None, PendingOperation::ToBeCreated);
        self
    }

    /// Drop the pending operation and the value of the last run.
    pub fn clear(&mut self) {
        self.shared.pending.store(PendingOperation::None);
        self.shared.set_last_result(None);
    }

    /// Value produced by the last successful run of the action node.
    pub fn last_result(&self) -> Option<Produced> {
        self.shared.last_result()
    }

    /// Read access to the wrapped entity. Do not hold the guard across an
    /// await point.
    pub fn resource(&self) -> RwLockReadGuard<'_, R> {
        self.shared.read_resource()
    }

    pub fn resource_mut(&mut self) -> RwLockWriteGuard<'_, R> {
        self.shared.write_resource()
    }

    pub fn add_dependency(&mut self, item: Arc<dyn TaskItem>) -> Result<TaskKey> {
        self.group.add_dependency(item)
    }

    pub fn add_dependency_group(&mut self, dependency: &impl HasTaskGroup) -> Result<TaskKey> {
        self.group.add_dependency_task_group(dependency.task_group())
    }

    pub fn add_post_run_dependent(&mut self, item: Arc<dyn TaskItem>) -> Result<TaskKey> {
        self.group.add_post_run_dependent(item)
    }

    pub fn add_post_run_dependent_group(&mut self, dependent: &impl HasTaskGroup) -> Result<TaskKey> {
        self.group.add_post_run_dependent_task_group(dependent.task_group())
    }

    /// Fetch the server-side state and store it, whatever is pending.
    pub async fn refresh(&mut self) -> Result<R::Inner> {
        let call = self.shared.read_resource().get_inner();
        let inner = call.await?;
        self.shared.write_resource().set_inner(inner.clone());
        debug!(child = %self.shared.name, "child refreshed");
        Ok(inner)
    }

    /// Run the group and return the created (or updated) representation.
    ///
    /// Fails with [`TaskGraphError::ResultType`] if the pending operation was
    /// a removal, since that produces no value.
    pub async fn create(&mut self) -> Result<R::Inner> {
        let produced = self.run_group().await?;
        produced
            .downcast::<R::Inner>()
            .map(|inner| inner.as_ref().clone())
            .ok_or_else(|| TaskGraphError::ResultType(self.key().to_string()))
    }

    /// Run the group. `None` when the child was removed.
    pub async fn apply(&mut self) -> Result<Option<R::Inner>> {
        let produced = self.run_group().await?;
        if produced.is_void() {
            return Ok(None);
        }
        produced
            .downcast::<R::Inner>()
            .map(|inner| Some(inner.as_ref().clone()))
            .ok_or_else(|| TaskGraphError::ResultType(self.key().to_string()))
    }

    /// [`ExternalChild::apply`] on a spawned task; `callback` receives the
    /// child back together with the outcome.
    pub fn spawn_apply<F>(mut self, callback: F) -> JoinHandle<()>
    where
        P: Send + Sync + 'static,
        F: FnOnce(Self, Result<Option<R::Inner>>) + Send + 'static,
    {
        tokio::spawn(async move {
            let result = self.apply().await;
            callback(self, result);
        })
    }

    async fn run_group(&mut self) -> Result<Produced> {
        let ctx = self.group.new_invocation_context();
        let result = self.group.invoke(&ctx).await;

        for failure in ctx.post_run_failures() {
            warn!(
                child = %self.shared.name,
                run_id = ctx.run_id(),
                task = %failure.key(),
                error = %failure,
                "post-run failure"
            );
        }
        result
    }
}

impl<R: ChildResource, P> HasTaskGroup for ExternalChild<R, P> {
    fn task_group(&self) -> &TaskGroup {
        &self.group
    }
}

impl<R: ChildResource, P> fmt::Debug for ExternalChild<R, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExternalChild")
            .field("name", &self.shared.name)
            .field("key", &self.key())
            .field("pending", &self.pending_operation())
            .field("group_state", &self.group.state())
            .finish()
    }
}

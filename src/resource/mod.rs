// src/resource/mod.rs

//! Lifecycle adapter: lets a stateful remote entity take part in a task
//! group as a single node.
//!
//! - `pending.rs`: the create/update/remove tag the action node dispatches on.
//! - `external_child.rs`: the [`ChildResource`] contract and the
//!   [`ExternalChild`] wrapper that owns the entity's task group.

pub mod external_child;
pub mod pending;

pub use external_child::{ChildResource, ExternalChild};
pub use pending::PendingOperation;

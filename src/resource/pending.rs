// src/resource/pending.rs

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// What the next invocation of an external child should do.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PendingOperation {
    #[default]
    None = 0,
    ToBeCreated = 1,
    ToBeUpdated = 2,
    ToBeRemoved = 3,
}

impl PendingOperation {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => PendingOperation::ToBeCreated,
            2 => PendingOperation::ToBeUpdated,
            3 => PendingOperation::ToBeRemoved,
            _ => PendingOperation::None,
        }
    }
}

impl fmt::Display for PendingOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PendingOperation::None => "none",
            PendingOperation::ToBeCreated => "to-be-created",
            PendingOperation::ToBeUpdated => "to-be-updated",
            PendingOperation::ToBeRemoved => "to-be-removed",
        };
        f.write_str(s)
    }
}

/// Pending operation shared between an `ExternalChild` and its action node.
#[derive(Debug, Default)]
pub(crate) struct AtomicPendingOperation(AtomicU8);

impl AtomicPendingOperation {
    pub(crate) fn load(&self) -> PendingOperation {
        PendingOperation::from_u8(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn store(&self, op: PendingOperation) {
        self.0.store(op as u8, Ordering::Release);
    }

    /// Store `new` only if the current value is `current`.
    pub(crate) fn replace_if(&self, current: PendingOperation, new: PendingOperation) -> bool {
        self.0
            .compare_exchange(current as u8, new as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

//! Deferred backend identifiers.

use std::fmt;
use std::sync::{Arc, OnceLock};

use crate::error::{GraphError, Result};
use crate::types::ID;

/// Placeholder for an ID a pending batch write will produce.
///
/// The slot is filled once, by the flush that executes the write; until
/// then [`IdFuture::get`] returns `None`.
#[derive(Clone)]
pub struct IdFuture {
    index: usize,
    slot: Arc<OnceLock<ID>>,
}

impl IdFuture {
    pub(crate) fn new(index: usize) -> Self {
        Self {
            index,
            slot: Arc::new(OnceLock::new()),
        }
    }

    /// Batch-local sequence number, in submission order.
    pub fn index(&self) -> usize {
        self.index
    }

    /// The resolved ID.
    pub fn get(&self) -> Option<ID> {
        self.slot.get().copied()
    }

    /// Whether the producing write has been flushed.
    pub fn is_resolved(&self) -> bool {
        self.slot.get().is_some()
    }

    pub(crate) fn resolve(&self, id: ID) -> Result<()> {
        self.slot
            .set(id)
            .map_err(|_| GraphError::Batch(format!("id future {} resolved twice", self.index)))
    }
}

impl fmt::Debug for IdFuture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.get() {
            Some(id) => write!(f, "IdFuture({} => {})", self.index, id),
            None => write!(f, "IdFuture({} pending)", self.index),
        }
    }
}

/// One end of a batched relationship: a known ID or a pending node write.
#[derive(Debug, Clone)]
pub enum Endpoint {
    /// Already persisted.
    Id(ID),
    /// Created or merged earlier in the same batch.
    Pending(IdFuture),
}

impl Endpoint {
    /// The ID, if known.
    pub fn resolved(&self) -> Option<ID> {
        match self {
            Endpoint::Id(id) => Some(*id),
            Endpoint::Pending(future) => future.get(),
        }
    }
}

impl From<ID> for Endpoint {
    fn from(id: ID) -> Self {
        Endpoint::Id(id)
    }
}

impl From<IdFuture> for Endpoint {
    fn from(future: IdFuture) -> Self {
        Endpoint::Pending(future)
    }
}

impl From<&IdFuture> for Endpoint {
    fn from(future: &IdFuture) -> Self {
        Endpoint::Pending(future.clone())
    }
}

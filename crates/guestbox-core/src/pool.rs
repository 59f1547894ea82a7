//! Registry of live instances.
//!
//! The [`InstancePool`] is the one shared, mutable structure of a runtime.
//! Lookups and inserts may race freely from many threads; the map is sharded
//! so readers never block each other.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::{Mutex, MutexGuard};
use tracing::debug;
use uuid::Uuid;

use crate::instance::GuestInstance;
use guestbox_common::RuntimeError;

/// Unique identifier of an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(Uuid);

impl InstanceId {
    /// Generate a fresh identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// The underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for InstanceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for InstanceId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Shared handle to a registered instance.
///
/// Calls into one instance are serialized by the handle's lock; distinct
/// instances run in parallel.
#[derive(Clone)]
pub struct InstanceHandle {
    id: InstanceId,
    inner: Arc<Mutex<GuestInstance>>,
}

impl InstanceHandle {
    pub(crate) fn new(instance: GuestInstance) -> Self {
        Self {
            id: instance.id(),
            inner: Arc::new(Mutex::new(instance)),
        }
    }

    /// Identifier of the instance.
    pub fn id(&self) -> InstanceId {
        self.id
    }

    /// Lock the instance for exclusive use.
    pub fn lock(&self) -> MutexGuard<'_, GuestInstance> {
        self.inner.lock()
    }
}

impl fmt::Debug for InstanceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstanceHandle")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

/// Concurrent map from [`InstanceId`] to live instance.
#[derive(Debug, Default)]
pub struct InstancePool {
    entries: DashMap<InstanceId, InstanceHandle>,
}

impl InstancePool {
    /// Create an empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handle` under its own identifier.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::InstanceExists`] if the identifier is taken.
    pub fn insert(&self, handle: InstanceHandle) -> Result<(), RuntimeError> {
        use dashmap::mapref::entry::Entry;

        match self.entries.entry(handle.id()) {
            Entry::Occupied(_) => Err(RuntimeError::InstanceExists {
                instance_id: handle.id().to_string(),
            }),
            Entry::Vacant(slot) => {
                debug!(instance_id = %handle.id(), "Instance registered");
                slot.insert(handle);
                Ok(())
            }
        }
    }

    /// Look up an instance.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::InstanceNotFound`] for unknown identifiers.
    pub fn get(&self, id: InstanceId) -> Result<InstanceHandle, RuntimeError> {
        self.entries
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| RuntimeError::instance_not_found(id))
    }

    /// Remove an instance and hand it back.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::InstanceNotFound`] for unknown identifiers.
    pub fn remove(&self, id: InstanceId) -> Result<InstanceHandle, RuntimeError> {
        let (_, handle) = self
            .entries
            .remove(&id)
            .ok_or_else(|| RuntimeError::instance_not_found(id))?;
        debug!(instance_id = %id, "Instance removed");
        Ok(handle)
    }

    /// Whether `id` is registered.
    pub fn contains(&self, id: InstanceId) -> bool {
        self.entries.contains_key(&id)
    }

    /// Identifiers of all registered instances, sorted.
    pub fn ids(&self) -> Vec<InstanceId> {
        let mut ids: Vec<_> = self.entries.iter().map(|e| *e.key()).collect();
        ids.sort_unstable();
        ids
    }

    /// Number of registered instances.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the pool is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use vstore_types::ObjectId;

use crate::error::{StoreError, StoreResult};
use crate::object::{ObjectKind, StoredObject};
use crate::traits::ObjectStore;

/// Default hard per-object limit, matching common document stores (16 MiB).
pub const DEFAULT_HARD_OBJECT_SIZE_LIMIT: usize = 16 * 1024 * 1024;

type Partitions = HashMap<String, HashMap<ObjectId, StoredObject>>;

/// In-memory, HashMap-based object store.
///
/// Intended for tests and embedding. Stores obtained through
/// [`for_repository`](Self::for_repository) share the same memory but keep
/// their objects in separate partitions.
#[derive(Clone)]
pub struct InMemoryObjectStore {
    repository_id: String,
    hard_limit: usize,
    partitions: Arc<RwLock<Partitions>>,
}

impl InMemoryObjectStore {
    /// Create a new empty store for the default repository (`""`).
    pub fn new() -> Self {
        Self {
            repository_id: String::new(),
            hard_limit: DEFAULT_HARD_OBJECT_SIZE_LIMIT,
            partitions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Same store with a different hard per-object limit.
    pub fn with_hard_object_size_limit(mut self, limit: usize) -> Self {
        self.hard_limit = limit;
        self
    }

    /// A view of the same memory serving another repository.
    pub fn for_repository(&self, repository_id: impl Into<String>) -> Self {
        Self {
            repository_id: repository_id.into(),
            hard_limit: self.hard_limit,
            partitions: Arc::clone(&self.partitions),
        }
    }

    /// Number of objects stored for this repository.
    pub fn len(&self) -> usize {
        self.read_partitions()
            .map(|p| p.get(&self.repository_id).map_or(0, HashMap::len))
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of objects of `kind` stored for this repository.
    pub fn count_kind(&self, kind: ObjectKind) -> usize {
        self.read_partitions()
            .map(|p| {
                p.get(&self.repository_id)
                    .map_or(0, |objects| objects.values().filter(|o| o.kind == kind).count())
            })
            .unwrap_or(0)
    }

    /// Total bytes across this repository's objects.
    pub fn total_bytes(&self) -> usize {
        self.read_partitions()
            .map(|p| {
                p.get(&self.repository_id)
                    .map_or(0, |objects| objects.values().map(StoredObject::size).sum())
            })
            .unwrap_or(0)
    }

    fn read_partitions(&self) -> StoreResult<RwLockReadGuard<'_, Partitions>> {
        self.partitions
            .read()
            .map_err(|e| StoreError::Unavailable(format!("lock poisoned: {e}")))
    }

    fn write_partitions(&self) -> StoreResult<RwLockWriteGuard<'_, Partitions>> {
        self.partitions
            .write()
            .map_err(|e| StoreError::Unavailable(format!("lock poisoned: {e}")))
    }
}

impl Default for InMemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectStore for InMemoryObjectStore {
    fn repository_id(&self) -> &str {
        &self.repository_id
    }

    fn hard_object_size_limit(&self) -> usize {
        self.hard_limit
    }

    fn read(&self, id: &ObjectId) -> StoreResult<Option<StoredObject>> {
        let partitions = self.read_partitions()?;
        Ok(partitions
            .get(&self.repository_id)
            .and_then(|objects| objects.get(id))
            .cloned())
    }

    fn write(&self, object: &StoredObject) -> StoreResult<ObjectId> {
        if object.size() > self.hard_limit {
            return Err(StoreError::ObjectTooLarge {
                size: object.size(),
                limit: self.hard_limit,
            });
        }
        let id = object.compute_id();
        if id.is_empty_root() {
            return Err(StoreError::ReservedObjectId);
        }
        let mut partitions = self.write_partitions()?;
        // Content addressing: an existing entry under this id already holds
        // these exact bytes.
        partitions
            .entry(self.repository_id.clone())
            .or_default()
            .entry(id)
            .or_insert_with(|| object.clone());
        Ok(id)
    }

    fn exists(&self, id: &ObjectId) -> StoreResult<bool> {
        let partitions = self.read_partitions()?;
        Ok(partitions
            .get(&self.repository_id)
            .is_some_and(|objects| objects.contains_key(id)))
    }
}

impl std::fmt::Debug for InMemoryObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryObjectStore")
            .field("repository_id", &self.repository_id)
            .field("object_count", &self.len())
            .field("hard_limit", &self.hard_limit)
            .finish()
    }
}

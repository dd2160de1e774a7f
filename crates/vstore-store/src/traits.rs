use vstore_types::ObjectId;

use crate::error::StoreResult;
use crate::object::StoredObject;

/// Content-addressed object store.
///
/// All implementations must satisfy these invariants:
/// - Objects are immutable once written. The same bytes of the same kind
///   always produce the same id, so re-writing is a no-op.
/// - Objects larger than [`hard_object_size_limit`](Self::hard_object_size_limit)
///   are rejected with `StoreError::ObjectTooLarge`, never truncated.
/// - Concurrent reads and writes need no external locking.
/// - Data of different repositories sharing one backend never mixes.
/// - All I/O errors are propagated, never silently ignored.
pub trait ObjectStore: Send + Sync {
    /// The repository this store serves.
    fn repository_id(&self) -> &str;

    /// Largest serialized object, in bytes, the backend can hold.
    fn hard_object_size_limit(&self) -> usize;

    /// Read an object by id. Returns `Ok(None)` if it does not exist.
    fn read(&self, id: &ObjectId) -> StoreResult<Option<StoredObject>>;

    /// Write an object and return its content-addressed id.
    fn write(&self, object: &StoredObject) -> StoreResult<ObjectId>;

    /// Check whether an object exists.
    fn exists(&self, id: &ObjectId) -> StoreResult<bool>;

    /// Read multiple objects. Backends may override for fewer round trips.
    fn read_batch(&self, ids: &[ObjectId]) -> StoreResult<Vec<Option<StoredObject>>> {
        ids.iter().map(|id| self.read(id)).collect()
    }

    /// Write multiple objects. Backends may override for fewer round trips.
    fn write_batch(&self, objects: &[StoredObject]) -> StoreResult<Vec<ObjectId>> {
        objects.iter().map(|obj| self.write(obj)).collect()
    }
}

//! The [`RefStore`] trait defining the reference backend contract.

use vstore_types::ObjectId;

use crate::error::Result;
use crate::names::RefName;
use crate::types::{CasOutcome, Reference};

/// Storage backend for named references.
///
/// References are the only mutable state, and every mutation is conditional:
/// implementations must make [`compare_and_swap`](Self::compare_and_swap)
/// and [`delete_ref`](Self::delete_ref) atomic with respect to each other and
/// to concurrent callers in other processes sharing the backend.
pub trait RefStore: Send + Sync {
    /// The repository this store serves.
    fn repository_id(&self) -> &str;

    /// Read a reference. Returns `Ok(None)` if it does not exist.
    fn read_ref(&self, name: &RefName) -> Result<Option<Reference>>;

    /// Create a reference. Fails with `AlreadyExists` if the name is taken.
    fn create_ref(&self, name: &RefName, pointer: ObjectId) -> Result<Reference>;

    /// Set the pointer to `new` only if it currently equals `expected`.
    ///
    /// Fails with `NotFound` if the reference does not exist and with
    /// `TagImmutable` for tags.
    fn compare_and_swap(
        &self,
        name: &RefName,
        expected: ObjectId,
        new: ObjectId,
    ) -> Result<CasOutcome>;

    /// Delete the reference only if it currently points at `expected`.
    ///
    /// Returns `Ok(false)` if the pointer has moved.
    fn delete_ref(&self, name: &RefName, expected: ObjectId) -> Result<bool>;

    /// List references whose qualified name starts with `prefix`, sorted.
    fn list_refs(&self, prefix: &str) -> Result<Vec<Reference>>;
}

//! In-memory reference store for testing and ephemeral use.
//!
//! [`InMemoryRefStore`] keeps all references in a `HashMap` behind a
//! `RwLock`; taking the write lock for the whole read-compare-write makes
//! compare-and-swap atomic.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::trace;
use vstore_types::ObjectId;

use crate::error::{RefError, Result};
use crate::names::{RefKind, RefName};
use crate::traits::RefStore;
use crate::types::{CasOutcome, Reference};

type Partitions = HashMap<String, HashMap<RefName, ObjectId>>;

/// An in-memory implementation of [`RefStore`].
///
/// Clones and [`for_repository`](Self::for_repository) views share the same
/// underlying map. Data is lost when the last handle is dropped.
#[derive(Clone, Debug, Default)]
pub struct InMemoryRefStore {
    repository_id: String,
    refs: Arc<RwLock<Partitions>>,
}

impl InMemoryRefStore {
    /// Create a new empty ref store for the default repository (`""`).
    pub fn new() -> Self {
        Self::default()
    }

    /// A view of the same memory serving another repository.
    pub fn for_repository(&self, repository_id: impl Into<String>) -> Self {
        Self {
            repository_id: repository_id.into(),
            refs: Arc::clone(&self.refs),
        }
    }

    fn read_lock(&self) -> Result<RwLockReadGuard<'_, Partitions>> {
        self.refs
            .read()
            .map_err(|e| RefError::Unavailable(format!("lock poisoned: {e}")))
    }

    fn write_lock(&self) -> Result<RwLockWriteGuard<'_, Partitions>> {
        self.refs
            .write()
            .map_err(|e| RefError::Unavailable(format!("lock poisoned: {e}")))
    }
}

impl RefStore for InMemoryRefStore {
    fn repository_id(&self) -> &str {
        &self.repository_id
    }

    fn read_ref(&self, name: &RefName) -> Result<Option<Reference>> {
        let refs = self.read_lock()?;
        Ok(refs
            .get(&self.repository_id)
            .and_then(|r| r.get(name))
            .map(|pointer| Reference {
                name: name.clone(),
                pointer: *pointer,
            }))
    }

    fn create_ref(&self, name: &RefName, pointer: ObjectId) -> Result<Reference> {
        let mut refs = self.write_lock()?;
        let repo = refs.entry(self.repository_id.clone()).or_default();
        if repo.contains_key(name) {
            return Err(RefError::AlreadyExists {
                name: name.to_string(),
            });
        }
        repo.insert(name.clone(), pointer);
        Ok(Reference {
            name: name.clone(),
            pointer,
        })
    }

    fn compare_and_swap(
        &self,
        name: &RefName,
        expected: ObjectId,
        new: ObjectId,
    ) -> Result<CasOutcome> {
        if name.kind() == RefKind::Tag {
            return Err(RefError::TagImmutable {
                name: name.to_string(),
            });
        }
        let mut refs = self.write_lock()?;
        let pointer = refs
            .get_mut(&self.repository_id)
            .and_then(|r| r.get_mut(name))
            .ok_or_else(|| RefError::NotFound {
                name: name.to_string(),
            })?;
        if *pointer != expected {
            trace!(%name, expected = %expected.short_hex(), current = %pointer.short_hex(), "CAS mismatch");
            return Ok(CasOutcome::Mismatch { current: *pointer });
        }
        *pointer = new;
        Ok(CasOutcome::Updated)
    }

    fn delete_ref(&self, name: &RefName, expected: ObjectId) -> Result<bool> {
        let mut refs = self.write_lock()?;
        let repo = refs
            .get_mut(&self.repository_id)
            .ok_or_else(|| RefError::NotFound {
                name: name.to_string(),
            })?;
        match repo.get(name) {
            None => Err(RefError::NotFound {
                name: name.to_string(),
            }),
            Some(current) if *current != expected => Ok(false),
            Some(_) => {
                repo.remove(name);
                Ok(true)
            }
        }
    }

    fn list_refs(&self, prefix: &str) -> Result<Vec<Reference>> {
        let refs = self.read_lock()?;
        let mut result: Vec<Reference> = refs
            .get(&self.repository_id)
            .into_iter()
            .flat_map(|r| r.iter())
            .filter(|(name, _)| name.as_str().starts_with(prefix))
            .map(|(name, pointer)| Reference {
                name: name.clone(),
                pointer: *pointer,
            })
            .collect();
        result.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(result)
    }
}

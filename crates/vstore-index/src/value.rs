//! Index values and requested key changes.

use serde::{Deserialize, Serialize};
use vstore_types::{ObjectId, StoreKey};

/// What an index entry points to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IndexValue {
    /// The key currently resolves to this object.
    Live(ObjectId),
    /// The key was removed. Only incremental indexes carry tombstones; they
    /// shadow entries of the reference index until the next spill.
    Removed,
}

impl IndexValue {
    /// The pointer, or `None` for a tombstone.
    pub fn live(&self) -> Option<ObjectId> {
        match self {
            Self::Live(id) => Some(*id),
            Self::Removed => None,
        }
    }

    pub fn is_removed(&self) -> bool {
        matches!(self, Self::Removed)
    }
}

impl From<Option<ObjectId>> for IndexValue {
    fn from(value: Option<ObjectId>) -> Self {
        value.map_or(Self::Removed, Self::Live)
    }
}

/// One change submitted with a commit: point `key` at `value`, or remove it
/// when `value` is `None`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyChange {
    pub key: StoreKey,
    pub value: Option<ObjectId>,
}

impl KeyChange {
    pub fn put(key: StoreKey, value: ObjectId) -> Self {
        Self {
            key,
            value: Some(value),
        }
    }

    pub fn remove(key: StoreKey) -> Self {
        Self { key, value: None }
    }

    /// The value this change writes into an incremental index.
    pub fn index_value(&self) -> IndexValue {
        self.value.into()
    }
}

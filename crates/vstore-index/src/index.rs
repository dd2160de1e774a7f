//! The ordered [`StoreIndex`] and its size model.
//!
//! The serialized form is the bincode encoding of the underlying
//! `BTreeMap<StoreKey, IndexValue>`: a `u64` entry count followed by every
//! entry in key order, each key written as its canonical path string (`u64`
//! length + UTF-8 bytes) and each value as a `u32` variant tag plus, for live
//! entries, the 32-byte object id. [`StoreIndex::serialized_size`] is tracked
//! incrementally and always equals the length of [`StoreIndex::to_bytes`].

use std::collections::btree_map;
use std::collections::BTreeMap;
use std::ops::RangeBounds;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use vstore_types::{ObjectId, StoreKey, OBJECT_ID_LEN};

use crate::error::{IndexError, IndexResult};
use crate::value::{IndexValue, KeyChange};

/// Width of bincode's length prefixes (collections and strings).
const LEN_PREFIX: usize = 8;
/// Width of bincode's enum variant tag.
const VARIANT_TAG: usize = 4;

/// Serialized size of an index without entries.
pub const EMPTY_INDEX_SIZE: usize = LEN_PREFIX;

/// Serialized size of a single entry.
pub fn element_size(key: &StoreKey, value: &IndexValue) -> usize {
    let value_size = match value {
        IndexValue::Live(_) => VARIANT_TAG + OBJECT_ID_LEN,
        IndexValue::Removed => VARIANT_TAG,
    };
    LEN_PREFIX + key.encoded_len() + value_size
}

/// An ordered key → pointer map with exact serialized-size accounting.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct StoreIndex {
    elements: BTreeMap<StoreKey, IndexValue>,
    /// Sum of [`element_size`] over all entries.
    elements_size: usize,
}

impl std::fmt::Debug for StoreIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreIndex")
            .field("entries", &self.elements.len())
            .field("serialized_size", &self.serialized_size())
            .field("first_key", &self.first_key())
            .field("last_key", &self.last_key())
            .finish()
    }
}

impl StoreIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries, tombstones included.
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    /// Returns `true` if the index has no entries.
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// The entry stored for `key`, which may be a tombstone.
    pub fn get(&self, key: &StoreKey) -> Option<&IndexValue> {
        self.elements.get(key)
    }

    /// The live pointer for `key`; tombstones read as absent.
    pub fn lookup(&self, key: &StoreKey) -> Option<ObjectId> {
        self.elements.get(key).and_then(IndexValue::live)
    }

    pub fn contains(&self, key: &StoreKey) -> bool {
        self.elements.contains_key(key)
    }

    pub fn first_key(&self) -> Option<&StoreKey> {
        self.elements.keys().next()
    }

    pub fn last_key(&self) -> Option<&StoreKey> {
        self.elements.keys().next_back()
    }

    /// Iterate entries in key order.
    pub fn iter(&self) -> btree_map::Iter<'_, StoreKey, IndexValue> {
        self.elements.iter()
    }

    /// Iterate the entries whose keys fall in `range`.
    pub fn range<R>(&self, range: R) -> btree_map::Range<'_, StoreKey, IndexValue>
    where
        R: RangeBounds<StoreKey>,
    {
        self.elements.range(range)
    }

    // ---------------------------------------------------------------
    // Updates
    // ---------------------------------------------------------------

    /// Insert or overwrite an entry, returning the previous value.
    pub fn insert(&mut self, key: StoreKey, value: IndexValue) -> Option<IndexValue> {
        let added = element_size(&key, &value);
        let previous = match self.elements.entry(key) {
            btree_map::Entry::Occupied(mut slot) => {
                let removed = element_size(slot.key(), slot.get());
                self.elements_size -= removed;
                Some(slot.insert(value))
            }
            btree_map::Entry::Vacant(slot) => {
                slot.insert(value);
                None
            }
        };
        self.elements_size += added;
        previous
    }

    /// Physically drop an entry (no tombstone is left behind).
    pub fn remove(&mut self, key: &StoreKey) -> Option<IndexValue> {
        let (key, value) = self.elements.remove_entry(key)?;
        self.elements_size -= element_size(&key, &value);
        Some(value)
    }

    /// Apply commit changes in order. Removals become tombstones; a later
    /// change to the same key wins.
    pub fn apply(&mut self, changes: &[KeyChange]) {
        for change in changes {
            self.insert(change.key.clone(), change.index_value());
        }
    }

    /// Overlay `other` onto `self`; `other` wins on key collisions.
    pub fn merge_from(&mut self, other: &StoreIndex) {
        for (key, value) in other.iter() {
            self.insert(key.clone(), *value);
        }
    }

    /// Merge two indexes into a new one; `overlay` wins on key collisions.
    pub fn merge(base: &StoreIndex, overlay: &StoreIndex) -> StoreIndex {
        let mut merged = base.clone();
        merged.merge_from(overlay);
        merged
    }

    /// Apply `overlay` as a set of updates to a reference index: live
    /// entries overwrite, tombstones delete.
    pub fn apply_overlay(&mut self, overlay: &StoreIndex) {
        for (key, value) in overlay.iter() {
            match value {
                IndexValue::Live(_) => {
                    self.insert(key.clone(), *value);
                }
                IndexValue::Removed => {
                    self.remove(key);
                }
            }
        }
    }

    /// A copy of this index with all tombstones dropped.
    pub fn without_tombstones(&self) -> StoreIndex {
        self.iter()
            .filter(|(_, value)| !value.is_removed())
            .map(|(key, value)| (key.clone(), *value))
            .collect()
    }

    // ---------------------------------------------------------------
    // Size model
    // ---------------------------------------------------------------

    /// Exact number of bytes [`to_bytes`](Self::to_bytes) produces.
    ///
    /// Grows with every added entry and with key length, so size checks based
    /// on it never understate the persisted size.
    pub fn serialized_size(&self) -> usize {
        EMPTY_INDEX_SIZE + self.elements_size
    }

    /// Serialized size of the largest single entry, if any.
    pub fn largest_element_size(&self) -> Option<usize> {
        self.iter().map(|(k, v)| element_size(k, v)).max()
    }

    /// Partition the index by key order into the fewest contiguous stripes
    /// whose serialized size stays at or below `max_stripe_size`.
    ///
    /// An entry that alone exceeds the limit is placed in a stripe of its own;
    /// entries are never dropped or truncated. An empty index yields no
    /// stripes.
    pub fn split(&self, max_stripe_size: usize) -> Vec<StoreIndex> {
        let mut stripes = Vec::new();
        let mut current = StoreIndex::new();
        for (key, value) in self.iter() {
            let size = element_size(key, value);
            if !current.is_empty() && current.serialized_size() + size > max_stripe_size {
                stripes.push(std::mem::take(&mut current));
            }
            current.insert(key.clone(), *value);
        }
        if !current.is_empty() {
            stripes.push(current);
        }
        stripes
    }

    // ---------------------------------------------------------------
    // Encoding
    // ---------------------------------------------------------------

    /// Encode into the canonical binary form.
    pub fn to_bytes(&self) -> IndexResult<Vec<u8>> {
        bincode::serialize(self).map_err(|e| IndexError::Serialization(e.to_string()))
    }

    /// Decode from the canonical binary form.
    pub fn from_bytes(data: &[u8]) -> IndexResult<Self> {
        let index: StoreIndex =
            bincode::deserialize(data).map_err(|e| IndexError::Serialization(e.to_string()))?;
        if index.serialized_size() != data.len() {
            return Err(IndexError::Corrupt(format!(
                "decoded {} entries of {} bytes from {} input bytes",
                index.len(),
                index.serialized_size(),
                data.len()
            )));
        }
        Ok(index)
    }
}

impl FromIterator<(StoreKey, IndexValue)> for StoreIndex {
    fn from_iter<T: IntoIterator<Item = (StoreKey, IndexValue)>>(iter: T) -> Self {
        let mut index = StoreIndex::new();
        for (key, value) in iter {
            index.insert(key, value);
        }
        index
    }
}

impl<'a> IntoIterator for &'a StoreIndex {
    type Item = (&'a StoreKey, &'a IndexValue);
    type IntoIter = btree_map::Iter<'a, StoreKey, IndexValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl Serialize for StoreIndex {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.elements.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for StoreIndex {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let elements = BTreeMap::<StoreKey, IndexValue>::deserialize(deserializer)?;
        Ok(elements.into_iter().collect())
    }
}

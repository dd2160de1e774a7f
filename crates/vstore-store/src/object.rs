use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use vstore_crypto::ContentHasher;
use vstore_index::StoreIndex;
use vstore_types::{ObjectId, StoreKey};

use crate::error::{StoreError, StoreResult};

/// The kind of object stored.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectKind {
    /// A commit: parent link, ancestry tail, incremental index and a handle
    /// on the reference index.
    Commit,
    /// One stripe of a reference index.
    Index,
    /// The list of stripes of a reference index too large to embed.
    IndexSegments,
}

impl ObjectKind {
    fn hasher(&self) -> &'static ContentHasher {
        match self {
            Self::Commit => &ContentHasher::COMMIT,
            Self::Index => &ContentHasher::INDEX,
            Self::IndexSegments => &ContentHasher::SEGMENTS,
        }
    }
}

impl std::fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Commit => write!(f, "commit"),
            Self::Index => write!(f, "index"),
            Self::IndexSegments => write!(f, "index-segments"),
        }
    }
}

/// A stored object: kind tag plus canonical serialized bytes.
///
/// `StoredObject` is the unit of storage. Backends never interpret `data`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredObject {
    pub kind: ObjectKind,
    pub data: Vec<u8>,
}

impl StoredObject {
    pub fn new(kind: ObjectKind, data: Vec<u8>) -> Self {
        Self { kind, data }
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Compute the content-addressed id with the kind's domain hasher.
    pub fn compute_id(&self) -> ObjectId {
        self.kind.hasher().hash(&self.data)
    }
}

/// Typed objects that convert to and from [`StoredObject`]s.
///
/// The encoding is bincode over ordered collections only, so equal values
/// always produce equal bytes and therefore equal ids.
pub trait TypedObject: Serialize + DeserializeOwned {
    const KIND: ObjectKind;

    fn to_stored_object(&self) -> StoreResult<StoredObject> {
        let data = bincode::serialize(self).map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(StoredObject::new(Self::KIND, data))
    }

    fn from_stored_object(obj: &StoredObject) -> StoreResult<Self> {
        if obj.kind != Self::KIND {
            return Err(StoreError::CorruptObject {
                id: obj.compute_id(),
                reason: format!("expected {}, got {}", Self::KIND, obj.kind),
            });
        }
        bincode::deserialize(&obj.data).map_err(|e| StoreError::CorruptObject {
            id: obj.compute_id(),
            reason: e.to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// Index stripes
// ---------------------------------------------------------------------------

/// Reference to one externally stored stripe, with its key range.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexStripe {
    pub first_key: StoreKey,
    pub last_key: StoreKey,
    /// Id of the [`IndexObj`] holding the stripe's entries.
    pub segment: ObjectId,
}

impl IndexStripe {
    /// Returns `true` if `key` lies inside this stripe's range.
    pub fn covers(&self, key: &StoreKey) -> bool {
        &self.first_key <= key && key <= &self.last_key
    }
}

/// A single stripe of a reference index.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexObj {
    pub index: StoreIndex,
}

impl TypedObject for IndexObj {
    const KIND: ObjectKind = ObjectKind::Index;
}

/// The stripe list of a reference index, stored out of line when a commit
/// has more stripes than it may embed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSegmentsObj {
    pub stripes: Vec<IndexStripe>,
}

impl TypedObject for IndexSegmentsObj {
    const KIND: ObjectKind = ObjectKind::IndexSegments;
}

/// How a commit reaches its reference index.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReferenceIndex {
    /// Nothing has been spilled yet; the incremental index is the whole
    /// key set.
    #[default]
    Empty,
    /// Stripes embedded directly in the commit.
    Stripes(Vec<IndexStripe>),
    /// Id of an [`IndexSegmentsObj`] listing the stripes.
    Segments(ObjectId),
}

impl ReferenceIndex {
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    /// Embedded stripes, if any.
    pub fn embedded_stripes(&self) -> &[IndexStripe] {
        match self {
            Self::Stripes(stripes) => stripes,
            _ => &[],
        }
    }
}

// ---------------------------------------------------------------------------
// Commits
// ---------------------------------------------------------------------------

/// An immutable commit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitObj {
    /// Direct parent; [`ObjectId::EMPTY_ROOT`] for the root itself.
    pub parent: ObjectId,
    /// Most recent ancestors, nearest first, starting with `parent`.
    pub tail: Vec<ObjectId>,
    /// Distance from the empty root.
    pub seq: u64,
    /// Commit time in microseconds since the UNIX epoch.
    pub created_micros: u64,
    pub message: String,
    /// Recent changes not yet spilled into the reference index. May hold
    /// tombstones.
    pub incremental_index: StoreIndex,
    pub reference_index: ReferenceIndex,
}

impl TypedObject for CommitObj {
    const KIND: ObjectKind = ObjectKind::Commit;
}

impl CommitObj {
    /// The commit every branch starts from. Never stored; its id is
    /// [`ObjectId::EMPTY_ROOT`].
    pub fn empty_root() -> Self {
        Self {
            parent: ObjectId::EMPTY_ROOT,
            tail: Vec::new(),
            seq: 0,
            created_micros: 0,
            message: String::new(),
            incremental_index: StoreIndex::new(),
            reference_index: ReferenceIndex::Empty,
        }
    }

    /// Build a child of `parent` (whose id is `parent_id`).
    ///
    /// Pure: the result depends only on the arguments. The tail is
    /// `[parent_id] + parent.tail`, truncated to `parents_per_commit` by
    /// dropping the oldest entries.
    pub fn child(
        parent_id: ObjectId,
        parent: &CommitObj,
        parents_per_commit: usize,
        created_micros: u64,
        message: impl Into<String>,
        incremental_index: StoreIndex,
        reference_index: ReferenceIndex,
    ) -> Self {
        let mut tail = Vec::with_capacity(parents_per_commit.min(parent.tail.len() + 1));
        tail.push(parent_id);
        tail.extend(parent.tail.iter().copied());
        tail.truncate(parents_per_commit);
        Self {
            parent: parent_id,
            tail,
            seq: parent.seq + 1,
            created_micros,
            message: message.into(),
            incremental_index,
            reference_index,
        }
    }

    pub fn is_empty_root(&self) -> bool {
        self.seq == 0
    }
}

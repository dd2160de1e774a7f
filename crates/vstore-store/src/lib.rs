//! Content-addressed object graph for vstore.
//!
//! Every persisted object (commits, reference-index stripes, stripe lists) is
//! immutable and identified by the domain-separated BLAKE3 hash of its
//! canonical bytes. The only mutable state in vstore is the set of named
//! references, which lives in `vstore-refs`.
//!
//! # Object Types
//!
//! - [`CommitObj`] -- parent link, ancestry tail, incremental index and
//!   [`ReferenceIndex`] handle
//! - [`IndexObj`] -- one size-bounded stripe of a reference index
//! - [`IndexSegmentsObj`] -- list of [`IndexStripe`]s, used when a commit has
//!   more stripes than it may embed
//!
//! # Storage Backends
//!
//! All backends implement the [`ObjectStore`] trait:
//!
//! - [`InMemoryObjectStore`] -- `HashMap`-based store for tests and embedding
//!
//! # Design Rules
//!
//! 1. Objects are immutable once written; re-writing identical content is a
//!    no-op.
//! 2. Write-then-link: objects are written before any reference points at
//!    them, so readers never observe partial state.
//! 3. Objects above the backend's hard size limit are rejected, never
//!    truncated.

pub mod error;
pub mod memory;
pub mod object;
pub mod traits;

pub use error::{StoreError, StoreResult};
pub use memory::{InMemoryObjectStore, DEFAULT_HARD_OBJECT_SIZE_LIMIT};
pub use object::{
    CommitObj, IndexObj, IndexSegmentsObj, IndexStripe, ObjectKind, ReferenceIndex, StoredObject,
    TypedObject,
};
pub use traits::ObjectStore;

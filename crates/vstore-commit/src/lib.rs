//! The vstore commit protocol.
//!
//! Commits land on a branch through an optimistic loop: read the head, build
//! a candidate on top of it, and compare-and-swap the branch pointer. Losing
//! writers back off with randomized, doubling sleeps and rebuild against the
//! new head, bounded by a retry count and a wall-clock timeout.
//!
//! Every commit carries a small incremental index of recent changes. When it
//! outgrows `max_incremental_index_size` it is spilled into the reference
//! index: size-bounded stripes stored as separate objects, referenced either
//! directly from the commit or through one index segments object.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use vstore_commit::{CommitRequest, Committer, Persist};
//! use vstore_config::StoreConfig;
//! use vstore_refs::InMemoryRefStore;
//! use vstore_store::InMemoryObjectStore;
//! use vstore_types::{ObjectId, StoreKey};
//!
//! let persist = Persist::new(
//!     Arc::new(InMemoryObjectStore::new()),
//!     Arc::new(InMemoryRefStore::new()),
//!     StoreConfig::default(),
//! )?;
//! let committer = Committer::new(persist);
//! committer.create_branch("main", ObjectId::EMPTY_ROOT)?;
//!
//! let key = StoreKey::new(["db", "table"])?;
//! let outcome = committer.commit(
//!     CommitRequest::new("main").put(key.clone(), ObjectId::digest(b"content")),
//! )?;
//! assert_eq!(
//!     committer.lookup(&outcome.commit_id, &key)?,
//!     Some(ObjectId::digest(b"content"))
//! );
//! # Ok::<(), vstore_commit::CommitError>(())
//! ```

pub mod committer;
pub mod error;
pub mod persist;
pub mod request;
pub mod spill;

pub use committer::Committer;
pub use error::{CommitError, CommitResult};
pub use persist::Persist;
pub use request::{CommitOutcome, CommitRequest};
pub use spill::{spill, Spill};

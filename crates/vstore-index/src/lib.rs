//! Store index for vstore.
//!
//! A [`StoreIndex`] maps [`StoreKey`](vstore_types::StoreKey)s to object
//! pointers. It knows its exact serialized size, which lets the commit layer
//! decide when the small per-commit incremental index has to be spilled into
//! externally stored stripes, and how to cut those stripes so that none
//! exceeds the configured ceiling.
//!
//! # Key Types
//!
//! - [`StoreIndex`] -- ordered map with size accounting, merge and split
//! - [`IndexValue`] -- live pointer or removal tombstone
//! - [`KeyChange`] -- one requested change in a commit

pub mod error;
pub mod index;
pub mod value;

pub use error::{IndexError, IndexResult};
pub use index::{element_size, StoreIndex, EMPTY_INDEX_SIZE};
pub use value::{IndexValue, KeyChange};

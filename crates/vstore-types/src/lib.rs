//! Foundation types for vstore.
//!
//! Every other vstore crate depends on `vstore-types`.
//!
//! # Key Types
//!
//! - [`ObjectId`] -- content-addressed identifier of a stored object
//! - [`StoreKey`] -- validated, ordered multi-segment key
//! - [`key_codec`] -- canonical flat-string encoding of keys

pub mod error;
pub mod key;
pub mod object;

pub use error::{KeyError, TypeError};
pub use key::{key_codec, StoreKey, GROUP_SEPARATOR};
pub use object::{ObjectId, OBJECT_ID_LEN};

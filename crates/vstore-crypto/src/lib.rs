//! Content hashing for vstore.
//!
//! Provides domain-separated BLAKE3 hashing so that a commit and an index
//! segment with identical bytes never share an object id.

pub mod hasher;

pub use hasher::ContentHasher;

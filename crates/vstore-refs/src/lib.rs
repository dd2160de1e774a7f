//! Named references for vstore.
//!
//! References are the only mutable state in a repository. Every update goes
//! through a compare-and-swap on the reference's pointer, which is what makes
//! the commit protocol safe under concurrent writers.
//!
//! - **Branches** (`refs/heads/...`) advance as commits land.
//! - **Tags** (`refs/tags/...`) are created once and never move.
//!
//! # Modules
//!
//! - [`error`]: error types for ref operations
//! - [`names`]: validated [`RefName`]s
//! - [`types`]: [`Reference`] and [`CasOutcome`]
//! - [`traits`]: the [`RefStore`] backend contract
//! - [`memory`]: [`InMemoryRefStore`] for tests and embedding

pub mod error;
pub mod memory;
pub mod names;
pub mod traits;
pub mod types;

pub use error::{RefError, Result};
pub use memory::InMemoryRefStore;
pub use names::{validate_short_name, RefKind, RefName, BRANCH_PREFIX, TAG_PREFIX};
pub use traits::RefStore;
pub use types::{CasOutcome, Reference};

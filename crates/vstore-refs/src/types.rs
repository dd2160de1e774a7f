//! Reference values and compare-and-swap outcomes.

use serde::{Deserialize, Serialize};
use vstore_types::ObjectId;

use crate::names::RefName;

/// A named pointer to a commit. The only mutable entity in vstore.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reference {
    pub name: RefName,
    /// The commit this reference currently names.
    pub pointer: ObjectId,
}

/// Result of a compare-and-swap on a reference.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CasOutcome {
    /// The pointer matched the expectation and now holds the new value.
    Updated,
    /// The pointer had moved; nothing was changed.
    Mismatch { current: ObjectId },
}

impl CasOutcome {
    pub fn is_updated(&self) -> bool {
        matches!(self, Self::Updated)
    }
}

//! Commit inputs and results.

use std::time::Duration;

use vstore_index::KeyChange;
use vstore_store::CommitObj;
use vstore_types::{ObjectId, StoreKey};

use crate::error::CommitResult;

/// A set of key changes to land on a branch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommitRequest {
    /// Branch short name (`main`) or qualified name (`refs/heads/main`).
    pub branch: String,
    /// The head the caller based its changes on. When set and the branch has
    /// moved past it, the commit only proceeds if none of the changed keys
    /// moved too.
    pub expected_head: Option<ObjectId>,
    /// Applied in order; a later change to the same key wins.
    pub changes: Vec<KeyChange>,
    pub message: String,
    /// Caps the configured commit timeout for this request.
    pub timeout: Option<Duration>,
}

impl CommitRequest {
    pub fn new(branch: impl Into<String>) -> Self {
        Self {
            branch: branch.into(),
            expected_head: None,
            changes: Vec::new(),
            message: String::new(),
            timeout: None,
        }
    }

    pub fn with_expected_head(mut self, head: ObjectId) -> Self {
        self.expected_head = Some(head);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_change(mut self, change: KeyChange) -> Self {
        self.changes.push(change);
        self
    }

    pub fn put(self, key: StoreKey, value: ObjectId) -> Self {
        self.with_change(KeyChange::put(key, value))
    }

    pub fn remove(self, key: StoreKey) -> Self {
        self.with_change(KeyChange::remove(key))
    }

    /// Put a value under a key given as raw segments.
    pub fn put_segments<I, S>(self, segments: I, value: ObjectId) -> CommitResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Ok(self.put(StoreKey::new(segments)?, value))
    }

    /// Distinct keys touched by this request, sorted.
    pub fn changed_keys(&self) -> Vec<StoreKey> {
        let mut keys: Vec<StoreKey> = self.changes.iter().map(|c| c.key.clone()).collect();
        keys.sort();
        keys.dedup();
        keys
    }
}

/// A successful commit.
#[derive(Clone, Debug)]
pub struct CommitOutcome {
    /// The new branch head.
    pub commit_id: ObjectId,
    pub commit: CommitObj,
    /// Compare-and-swap attempts made, the successful one included.
    pub attempts: u32,
    /// Whether this commit moved its incremental index into stripes.
    pub spilled: bool,
}

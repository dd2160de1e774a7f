//! Typed access to the object and reference backends.
//!
//! [`Persist`] pairs an [`ObjectStore`] with a [`RefStore`] under one
//! [`StoreConfig`]. It knows how commits reach their reference index, so key
//! lookups, full listings and ancestry walks live here, while the retry loop
//! lives in [`Committer`](crate::Committer).

use std::sync::Arc;

use tracing::trace;
use vstore_config::StoreConfig;
use vstore_index::{IndexValue, StoreIndex};
use vstore_refs::{CasOutcome, RefError, RefName, RefStore};
use vstore_store::{
    CommitObj, IndexObj, IndexSegmentsObj, IndexStripe, ObjectStore, ReferenceIndex, StoreError,
    StoredObject, TypedObject,
};
use vstore_types::{ObjectId, StoreKey};

use crate::error::{CommitError, CommitResult};

/// Object and reference backends of one repository.
#[derive(Clone)]
pub struct Persist {
    objects: Arc<dyn ObjectStore>,
    refs: Arc<dyn RefStore>,
    config: StoreConfig,
}

impl Persist {
    /// Bind two backends to a configuration.
    ///
    /// Fails if either backend serves a different repository than
    /// `config.repository_id`, or if the configuration does not fit the
    /// object store's hard size limit.
    pub fn new(
        objects: Arc<dyn ObjectStore>,
        refs: Arc<dyn RefStore>,
        config: StoreConfig,
    ) -> CommitResult<Self> {
        for actual in [objects.repository_id(), refs.repository_id()] {
            if actual != config.repository_id {
                return Err(CommitError::RepositoryMismatch {
                    expected: config.repository_id.clone(),
                    actual: actual.to_string(),
                });
            }
        }
        config.validate(objects.hard_object_size_limit())?;
        Ok(Self {
            objects,
            refs,
            config,
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn objects(&self) -> &dyn ObjectStore {
        self.objects.as_ref()
    }

    pub fn refs(&self) -> &dyn RefStore {
        self.refs.as_ref()
    }

    // ---------------------------------------------------------------
    // References
    // ---------------------------------------------------------------

    /// Current head id of `branch` together with its commit.
    pub fn read_head(&self, branch: &RefName) -> CommitResult<(ObjectId, CommitObj)> {
        let reference = self
            .refs
            .read_ref(branch)?
            .ok_or_else(|| CommitError::ReferenceNotFound(branch.to_string()))?;
        let commit = self.fetch_commit(&reference.pointer)?;
        Ok((reference.pointer, commit))
    }

    /// Move `branch` from `expected` to `new`.
    pub fn swap_head(
        &self,
        branch: &RefName,
        expected: ObjectId,
        new: ObjectId,
    ) -> CommitResult<CasOutcome> {
        self.refs
            .compare_and_swap(branch, expected, new)
            .map_err(|e| match e {
                RefError::NotFound { name } => CommitError::ReferenceNotFound(name),
                other => other.into(),
            })
    }

    // ---------------------------------------------------------------
    // Objects
    // ---------------------------------------------------------------

    /// Load a commit. The empty root is synthesized, never read.
    pub fn fetch_commit(&self, id: &ObjectId) -> CommitResult<CommitObj> {
        if id.is_empty_root() {
            return Ok(CommitObj::empty_root());
        }
        let stored = self
            .objects
            .read(id)?
            .ok_or(CommitError::CommitNotFound(*id))?;
        Ok(CommitObj::from_stored_object(&stored)?)
    }

    pub fn write_commit(&self, commit: &CommitObj) -> CommitResult<ObjectId> {
        self.write_checked(commit.to_stored_object()?)
    }

    pub fn fetch_stripe(&self, stripe: &IndexStripe) -> CommitResult<StoreIndex> {
        let stored = self
            .objects
            .read(&stripe.segment)?
            .ok_or(StoreError::NotFound(stripe.segment))?;
        Ok(IndexObj::from_stored_object(&stored)?.index)
    }

    /// Load several stripes with one batched read, in the given order.
    pub fn fetch_stripes(&self, stripes: &[IndexStripe]) -> CommitResult<Vec<StoreIndex>> {
        let ids: Vec<ObjectId> = stripes.iter().map(|s| s.segment).collect();
        self.objects
            .read_batch(&ids)?
            .into_iter()
            .zip(&ids)
            .map(|(stored, id)| -> CommitResult<StoreIndex> {
                let stored = stored.ok_or(StoreError::NotFound(*id))?;
                Ok(IndexObj::from_stored_object(&stored)?.index)
            })
            .collect()
    }

    /// Write stripes with one batched write and describe them. Every index
    /// must be non-empty and fit the hard object size limit; nothing is
    /// written otherwise.
    pub fn write_stripes(&self, indexes: Vec<StoreIndex>) -> CommitResult<Vec<IndexStripe>> {
        let limit = self.objects.hard_object_size_limit();
        let mut ranges = Vec::with_capacity(indexes.len());
        let mut objects = Vec::with_capacity(indexes.len());
        for index in indexes {
            let (first_key, last_key) = match (index.first_key(), index.last_key()) {
                (Some(first), Some(last)) => (first.clone(), last.clone()),
                _ => {
                    let reason = "refusing to write an empty stripe".to_string();
                    return Err(StoreError::Serialization(reason).into());
                }
            };
            let object = IndexObj { index }.to_stored_object()?;
            check_size(&object, limit)?;
            ranges.push((first_key, last_key));
            objects.push(object);
        }
        let ids = self.objects.write_batch(&objects)?;
        Ok(ranges
            .into_iter()
            .zip(ids)
            .map(|((first_key, last_key), segment)| IndexStripe {
                first_key,
                last_key,
                segment,
            })
            .collect())
    }

    /// Stripes of a reference index, in key order.
    pub fn stripes(&self, reference: &ReferenceIndex) -> CommitResult<Vec<IndexStripe>> {
        match reference {
            ReferenceIndex::Empty => Ok(Vec::new()),
            ReferenceIndex::Stripes(stripes) => Ok(stripes.clone()),
            ReferenceIndex::Segments(id) => {
                let stored = self
                    .objects
                    .read(id)?
                    .ok_or(StoreError::NotFound(*id))?;
                Ok(IndexSegmentsObj::from_stored_object(&stored)?.stripes)
            }
        }
    }

    /// Reference a stripe list from a commit: embedded while it is short
    /// enough, through an [`IndexSegmentsObj`] otherwise.
    pub fn store_stripes(&self, stripes: Vec<IndexStripe>) -> CommitResult<ReferenceIndex> {
        if stripes.is_empty() {
            return Ok(ReferenceIndex::Empty);
        }
        if stripes.len() <= self.config.max_reference_stripes_per_commit {
            return Ok(ReferenceIndex::Stripes(stripes));
        }
        self.write_segments(stripes)
    }

    /// Move a stripe list out of line regardless of its length.
    pub fn write_segments(&self, stripes: Vec<IndexStripe>) -> CommitResult<ReferenceIndex> {
        let id = self.write_checked(IndexSegmentsObj { stripes }.to_stored_object()?)?;
        Ok(ReferenceIndex::Segments(id))
    }

    /// Whether `commit` serializes within the object store's hard limit.
    pub fn commit_fits(&self, commit: &CommitObj) -> CommitResult<bool> {
        Ok(commit.to_stored_object()?.size() <= self.objects.hard_object_size_limit())
    }

    fn write_checked(&self, object: StoredObject) -> CommitResult<ObjectId> {
        check_size(&object, self.objects.hard_object_size_limit())?;
        Ok(self.objects.write(&object)?)
    }

    // ---------------------------------------------------------------
    // Key resolution
    // ---------------------------------------------------------------

    /// What `key` resolves to at `commit`.
    ///
    /// The incremental index is consulted first; a tombstone there hides the
    /// key. Otherwise the single stripe whose range covers the key is loaded.
    pub fn lookup(&self, commit: &CommitObj, key: &StoreKey) -> CommitResult<Option<ObjectId>> {
        match commit.incremental_index.get(key) {
            Some(IndexValue::Live(id)) => return Ok(Some(*id)),
            Some(IndexValue::Removed) => return Ok(None),
            None => {}
        }
        let stripes = self.stripes(&commit.reference_index)?;
        let position = stripes.partition_point(|s| &s.last_key < key);
        match stripes.get(position) {
            Some(stripe) if stripe.covers(key) => {
                trace!(%key, segment = %stripe.segment.short_hex(), "stripe lookup");
                Ok(self.fetch_stripe(stripe)?.lookup(key))
            }
            _ => Ok(None),
        }
    }

    /// Every live key of `commit`: all stripes overlaid with the incremental
    /// index.
    pub fn entries(&self, commit: &CommitObj) -> CommitResult<StoreIndex> {
        let stripes = self.stripes(&commit.reference_index)?;
        let mut all = StoreIndex::new();
        for index in self.fetch_stripes(&stripes)? {
            all.merge_from(&index);
        }
        all.apply_overlay(&commit.incremental_index);
        Ok(all)
    }

    /// Live keys of `commit` that equal `prefix` or are nested below it.
    ///
    /// Such keys form one contiguous run, so only the stripes overlapping
    /// that run are loaded.
    pub fn entries_under(&self, commit: &CommitObj, prefix: &StoreKey) -> CommitResult<StoreIndex> {
        let stripes = self.stripes(&commit.reference_index)?;
        let start = stripes.partition_point(|s| &s.last_key < prefix);
        let overlapping = stripes[start..]
            .iter()
            .take_while(|s| &s.first_key <= prefix || s.first_key.starts_with(prefix))
            .count();

        let mut under = StoreIndex::new();
        for index in self.fetch_stripes(&stripes[start..start + overlapping])? {
            under.merge_from(&prefixed(&index, prefix));
        }
        under.apply_overlay(&prefixed(&commit.incremental_index, prefix));
        Ok(under)
    }

    // ---------------------------------------------------------------
    // Ancestry
    // ---------------------------------------------------------------

    /// Whether `candidate` is `descendant` or one of its ancestors.
    ///
    /// Each step checks a commit's tail and then jumps to the oldest tail
    /// entry, so long chains are crossed `parents_per_commit` at a time.
    pub fn is_ancestor(&self, candidate: &ObjectId, descendant: &ObjectId) -> CommitResult<bool> {
        if candidate == descendant || candidate.is_empty_root() {
            return Ok(true);
        }
        let floor = self.fetch_commit(candidate)?.seq;
        let mut current = self.fetch_commit(descendant)?;
        loop {
            if current.seq <= floor {
                return Ok(false);
            }
            if current.tail.contains(candidate) {
                return Ok(true);
            }
            match current.tail.last() {
                Some(oldest) => current = self.fetch_commit(oldest)?,
                None => return Ok(false),
            }
        }
    }

    /// Up to `limit` commits starting at `start`, following parent links.
    /// The empty root is not listed.
    pub fn log(&self, start: &ObjectId, limit: usize) -> CommitResult<Vec<(ObjectId, CommitObj)>> {
        let mut entries = Vec::new();
        let mut id = *start;
        while entries.len() < limit && !id.is_empty_root() {
            let commit = self.fetch_commit(&id)?;
            let parent = commit.parent;
            entries.push((id, commit));
            id = parent;
        }
        Ok(entries)
    }
}

/// Entries of `index` under `prefix`.
fn prefixed(index: &StoreIndex, prefix: &StoreKey) -> StoreIndex {
    index
        .range(prefix.clone()..)
        .take_while(|(key, _)| key.starts_with(prefix))
        .map(|(key, value)| (key.clone(), *value))
        .collect()
}

fn check_size(object: &StoredObject, limit: usize) -> CommitResult<()> {
    if object.size() > limit {
        return Err(CommitError::SizeLimitExceeded {
            kind: object.kind,
            size: object.size(),
            limit,
        });
    }
    Ok(())
}

impl std::fmt::Debug for Persist {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Persist")
            .field("repository_id", &self.config.repository_id)
            .field("hard_limit", &self.objects.hard_object_size_limit())
            .finish()
    }
}

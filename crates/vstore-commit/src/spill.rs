//! Folding an incremental index into the reference index.
//!
//! A spill only rewrites the stripes whose key range receives updates.
//! Untouched stripes keep their object ids, so a spill costs roughly the size
//! of the updates plus the stripes they land in, not the whole key set.

use std::collections::BTreeMap;

use tracing::debug;
use vstore_index::StoreIndex;
use vstore_store::{IndexStripe, ReferenceIndex};

use crate::error::CommitResult;
use crate::persist::Persist;

/// A rebuilt reference index.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Spill {
    pub reference_index: ReferenceIndex,
    /// Stripes in the new reference index.
    pub stripes: usize,
    /// Existing stripes that received updates and were rewritten.
    pub rewritten: usize,
}

/// Apply `updates` to the reference index reached through `reference`.
///
/// Live entries overwrite and tombstones delete. An update outside every
/// stripe range goes to the nearest stripe: the first one whose range ends
/// at or after the key, or the last stripe for keys past the end. Stripes
/// left empty are dropped and rewritten stripes are re-split under
/// `max_serialized_index_size`.
pub fn spill(
    persist: &Persist,
    reference: &ReferenceIndex,
    updates: &StoreIndex,
) -> CommitResult<Spill> {
    let max_stripe_size = persist.config().max_serialized_index_size;
    let existing = persist.stripes(reference)?;
    let mut rewritten = 0;

    let stripes = if existing.is_empty() {
        let mut index = StoreIndex::new();
        index.apply_overlay(updates);
        write_split(persist, &index, max_stripe_size)?
    } else {
        let last = existing.len() - 1;
        let mut groups: BTreeMap<usize, StoreIndex> = BTreeMap::new();
        for (key, value) in updates.iter() {
            let position = existing.partition_point(|s| &s.last_key < key).min(last);
            groups
                .entry(position)
                .or_default()
                .insert(key.clone(), *value);
        }

        let mut stripes = Vec::with_capacity(existing.len() + groups.len());
        for (position, stripe) in existing.into_iter().enumerate() {
            match groups.remove(&position) {
                None => stripes.push(stripe),
                Some(group) => {
                    let mut index = persist.fetch_stripe(&stripe)?;
                    index.apply_overlay(&group);
                    rewritten += 1;
                    stripes.extend(write_split(persist, &index, max_stripe_size)?);
                }
            }
        }
        stripes
    };

    let count = stripes.len();
    let reference_index = persist.store_stripes(stripes)?;
    debug!(
        stripes = count,
        rewritten,
        updates = updates.len(),
        external = matches!(reference_index, ReferenceIndex::Segments(_)),
        "spilled incremental index"
    );
    Ok(Spill {
        reference_index,
        stripes: count,
        rewritten,
    })
}

fn write_split(
    persist: &Persist,
    index: &StoreIndex,
    max_stripe_size: usize,
) -> CommitResult<Vec<IndexStripe>> {
    persist.write_stripes(index.split(max_stripe_size))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Arc;
    use vstore_config::StoreConfig;
    use vstore_index::{IndexValue, KeyChange};
    use vstore_refs::InMemoryRefStore;
    use vstore_store::{InMemoryObjectStore, ObjectStore};
    use vstore_types::{ObjectId, StoreKey};

    /// Keys `k000`..: 48 bytes per live entry, so a 200 byte stripe holds four.
    fn persist(max_stripes: usize) -> Persist {
        Persist::new(
            Arc::new(InMemoryObjectStore::new()),
            Arc::new(InMemoryRefStore::new()),
            StoreConfig::default()
                .with_max_incremental_index_size(200)
                .with_max_serialized_index_size(200)
                .with_max_reference_stripes_per_commit(max_stripes),
        )
        .unwrap()
    }

    fn key(i: usize) -> StoreKey {
        StoreKey::of(format!("k{i:03}")).unwrap()
    }

    fn value(i: usize) -> ObjectId {
        ObjectId::digest(format!("v{i}").as_bytes())
    }

    fn updates(changes: &[KeyChange]) -> StoreIndex {
        let mut index = StoreIndex::new();
        index.apply(changes);
        index
    }

    fn puts(range: impl Iterator<Item = usize>) -> StoreIndex {
        updates(
            &range
                .map(|i| KeyChange::put(key(i), value(i)))
                .collect::<Vec<_>>(),
        )
    }

    fn all_entries(persist: &Persist, reference: &ReferenceIndex) -> StoreIndex {
        let mut all = StoreIndex::new();
        let stripes = persist.stripes(reference).unwrap();
        for index in persist.fetch_stripes(&stripes).unwrap() {
            all.merge_from(&index);
        }
        all
    }

    fn assert_well_formed(persist: &Persist, reference: &ReferenceIndex) {
        let stripes = persist.stripes(reference).unwrap();
        for pair in stripes.windows(2) {
            assert!(pair[0].last_key < pair[1].first_key, "stripes overlap");
        }
        for stripe in &stripes {
            let index = persist.fetch_stripe(stripe).unwrap();
            assert!(!index.is_empty());
            assert!(index.serialized_size() <= 200);
            assert_eq!(index.first_key(), Some(&stripe.first_key));
            assert_eq!(index.last_key(), Some(&stripe.last_key));
            assert!(index.iter().all(|(_, v)| !v.is_removed()));
        }
    }

    #[test]
    fn first_spill_splits_everything() {
        let persist = persist(50);
        let spill = spill(&persist, &ReferenceIndex::Empty, &puts(0..10)).unwrap();
        assert_eq!(spill.stripes, 3);
        assert_eq!(spill.rewritten, 0);
        assert_eq!(spill.reference_index.embedded_stripes().len(), 3);
        assert_well_formed(&persist, &spill.reference_index);
        assert_eq!(all_entries(&persist, &spill.reference_index), puts(0..10));
    }

    #[test]
    fn first_spill_drops_tombstones() {
        let persist = persist(50);
        let mut changes = puts(0..3);
        changes.insert(key(1), IndexValue::Removed);
        let spill = spill(&persist, &ReferenceIndex::Empty, &changes).unwrap();
        let all = all_entries(&persist, &spill.reference_index);
        assert_eq!(all.len(), 2);
        assert!(!all.contains(&key(1)));
    }

    #[test]
    fn untouched_stripes_keep_their_ids() {
        let persist = persist(50);
        let base = spill(&persist, &ReferenceIndex::Empty, &puts((0..12).map(|i| i * 10))).unwrap();
        let before = persist.stripes(&base.reference_index).unwrap();
        assert_eq!(before.len(), 3);

        // k055 falls inside the middle stripe (k040..k070), which overflows
        // and is re-split in two.
        let next = spill(&persist, &base.reference_index, &puts([55].into_iter())).unwrap();
        let after = persist.stripes(&next.reference_index).unwrap();
        assert_eq!(next.rewritten, 1);
        assert_eq!(after.len(), 4);
        assert_eq!(after.first(), before.first());
        assert_eq!(after.last(), before.last());
        assert_ne!(after[1].segment, before[1].segment);
        assert_well_formed(&persist, &next.reference_index);
        assert_eq!(
            all_entries(&persist, &next.reference_index).lookup(&key(55)),
            Some(value(55))
        );
    }

    #[test]
    fn keys_outside_ranges_go_to_nearest_stripe() {
        let persist = persist(50);
        let base = spill(&persist, &ReferenceIndex::Empty, &puts((1..9).map(|i| i * 10))).unwrap();
        let stripes_before = persist.stripes(&base.reference_index).unwrap();
        assert_eq!(stripes_before.len(), 2);

        // Before the first range, in the gap between ranges, and past the end.
        let next = spill(&persist, &base.reference_index, &puts([0, 45, 99].into_iter())).unwrap();
        assert_well_formed(&persist, &next.reference_index);
        let all = all_entries(&persist, &next.reference_index);
        assert_eq!(all.len(), 11);
        for i in [0, 45, 99] {
            assert_eq!(all.lookup(&key(i)), Some(value(i)));
        }
    }

    #[test]
    fn emptied_stripes_are_dropped() {
        let persist = persist(50);
        let base = spill(&persist, &ReferenceIndex::Empty, &puts(0..8)).unwrap();
        assert_eq!(base.stripes, 2);
        let removals = updates(&(0..4).map(|i| KeyChange::remove(key(i))).collect::<Vec<_>>());
        let next = spill(&persist, &base.reference_index, &removals).unwrap();
        assert_eq!(next.stripes, 1);
        assert_eq!(all_entries(&persist, &next.reference_index), puts(4..8));

        let rest = updates(&(4..8).map(|i| KeyChange::remove(key(i))).collect::<Vec<_>>());
        let emptied = spill(&persist, &next.reference_index, &rest).unwrap();
        assert_eq!(emptied.reference_index, ReferenceIndex::Empty);
    }

    #[test]
    fn many_stripes_move_to_segments_object() {
        let persist = persist(2);
        let spill = spill(&persist, &ReferenceIndex::Empty, &puts(0..20)).unwrap();
        assert_eq!(spill.stripes, 5);
        let ReferenceIndex::Segments(id) = spill.reference_index else {
            panic!("expected an index segments object");
        };
        assert!(persist.objects().exists(&id).unwrap());
        assert_eq!(all_entries(&persist, &spill.reference_index), puts(0..20));
    }

    #[test]
    fn oversized_entry_is_a_size_policy_error() {
        let persist = Persist::new(
            Arc::new(InMemoryObjectStore::new().with_hard_object_size_limit(1024)),
            Arc::new(InMemoryRefStore::new()),
            StoreConfig::default()
                .with_max_incremental_index_size(200)
                .with_max_serialized_index_size(200),
        )
        .unwrap();
        let huge = StoreKey::of("x".repeat(2_000)).unwrap();
        let changes = updates(&[KeyChange::put(huge, value(0))]);
        let err = spill(&persist, &ReferenceIndex::Empty, &changes).unwrap_err();
        assert!(err.is_size_limit());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn repeated_spills_match_flat_model(
            batches in prop::collection::vec(
                prop::collection::vec((0usize..60, any::<bool>()), 1..20),
                1..6,
            ),
        ) {
            let persist = persist(3);
            let mut model = StoreIndex::new();
            let mut reference = ReferenceIndex::Empty;
            for batch in batches {
                let changes: Vec<KeyChange> = batch
                    .iter()
                    .map(|(i, live)| {
                        if *live {
                            KeyChange::put(key(*i), value(*i))
                        } else {
                            KeyChange::remove(key(*i))
                        }
                    })
                    .collect();
                let batch_updates = updates(&changes);
                model.apply_overlay(&batch_updates);
                reference = spill(&persist, &reference, &batch_updates).unwrap().reference_index;
                assert_well_formed(&persist, &reference);
                prop_assert_eq!(all_entries(&persist, &reference), model.clone());
            }
        }
    }
}

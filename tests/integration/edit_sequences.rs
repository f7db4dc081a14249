#![allow(missing_docs)]

mod support;

use arbor::{
    ArborError, DiskTable, FragmentBuilder, MemTable, NodeKind, Record, TableAccess, TableOptions,
    Tree,
};
use proptest::prelude::*;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use support::{small_blocks, snapshot, twelve_records};
use tempfile::tempdir;

#[derive(Debug, Clone)]
enum Edit {
    Insert { pre: usize, parent: usize, records: Vec<Record> },
    InsertAttribute { pre: usize, parent: usize, name: u16 },
    TouchingTexts { pre: usize, parent: usize },
    Delete { pre: usize },
    ReplaceSubtree { pre: usize, records: Vec<Record> },
    Replace { pre: usize, content: u64 },
}

/// Element whose two text children sit next to each other.
fn touching_texts(rng: &mut ChaCha8Rng) -> Vec<Record> {
    let mut b = FragmentBuilder::new();
    b.open_element(rng.gen_range(1..50), 0).unwrap();
    if rng.gen_bool(0.5) {
        b.comment(rng.gen_range(0..1000)).unwrap();
    }
    b.text(rng.gen_range(0..1000)).unwrap();
    b.text(rng.gen_range(0..1000)).unwrap();
    b.close().unwrap();
    b.finish().unwrap()
}

fn random_fragment(rng: &mut ChaCha8Rng) -> Vec<Record> {
    let mut b = FragmentBuilder::new();
    let tops = rng.gen_range(1..=3);
    for _ in 0..tops {
        match rng.gen_range(0..4) {
            0 => {
                b.text(rng.gen_range(0..1000)).unwrap();
            }
            1 => {
                b.comment(rng.gen_range(0..1000)).unwrap();
            }
            _ => {
                b.open_element(rng.gen_range(1..50), 0).unwrap();
                for _ in 0..rng.gen_range(0..3) {
                    b.attribute(rng.gen_range(1..50), rng.gen_range(0..1000), 0)
                        .unwrap();
                }
                if rng.gen_bool(0.5) {
                    b.text(rng.gen_range(0..1000)).unwrap();
                }
                for _ in 0..rng.gen_range(0..3) {
                    b.open_element(rng.gen_range(1..50), 0).unwrap().close().unwrap();
                }
                b.close().unwrap();
            }
        }
    }
    b.finish().unwrap()
}

fn next_edit<T: TableAccess>(tree: &Tree<T>, rng: &mut ChaCha8Rng) -> Edit {
    let len = tree.len();
    let containers: Vec<usize> = (0..len)
        .filter(|&p| tree.kind(p).unwrap().has_size())
        .collect();
    let child_slot = |rng: &mut ChaCha8Rng| {
        let parent = containers[rng.gen_range(0..containers.len())];
        let mut boundaries = tree.children(parent).unwrap();
        boundaries.push(parent + tree.size(parent).unwrap());
        (boundaries[rng.gen_range(0..boundaries.len())], parent)
    };
    match rng.gen_range(0..12) {
        0..=4 => {
            let (pre, parent) = child_slot(&mut *rng);
            Edit::Insert {
                pre,
                parent,
                records: random_fragment(rng),
            }
        }
        5 => {
            let elements: Vec<usize> = containers
                .iter()
                .copied()
                .filter(|&p| tree.kind(p).unwrap() == NodeKind::Element)
                .collect();
            if elements.is_empty() {
                return Edit::Replace { pre: 0, content: 1 };
            }
            let parent = elements[rng.gen_range(0..elements.len())];
            let pre = parent + 1 + rng.gen_range(0..=tree.attribute_count(parent).unwrap());
            Edit::InsertAttribute {
                pre,
                parent,
                name: rng.gen_range(1..50),
            }
        }
        6..=8 if len > 1 => Edit::Delete {
            pre: rng.gen_range(1..len),
        },
        9 => {
            let (pre, parent) = child_slot(&mut *rng);
            Edit::TouchingTexts { pre, parent }
        }
        10 if len > 1 => {
            let pre = rng.gen_range(1..len);
            let records = if tree.kind(pre).unwrap() == NodeKind::Attribute {
                vec![Record::attribute(rng.gen_range(1..50), 7, 0)]
            } else {
                random_fragment(rng)
            };
            Edit::ReplaceSubtree { pre, records }
        }
        _ => Edit::Replace {
            pre: rng.gen_range(0..len),
            content: rng.gen_range(0..1_000_000),
        },
    }
}

fn apply<T: TableAccess>(
    tree: &mut Tree<T>,
    edit: &Edit,
    rng: &mut ChaCha8Rng,
) -> Result<(), ArborError> {
    match edit {
        Edit::Insert {
            pre,
            parent,
            records,
        } => tree.insert_subtree(*pre, *parent, records).map(|_| ()),
        Edit::InsertAttribute { pre, parent, name } => tree
            .insert_subtree(*pre, *parent, &[Record::attribute(*name, 5, 0)])
            .map(|_| ()),
        Edit::TouchingTexts { pre, parent } => tree
            .insert_subtree(*pre, *parent, &touching_texts(rng))
            .map(|_| ()),
        Edit::Delete { pre } => tree.delete_subtree(*pre).map(|_| ()),
        Edit::ReplaceSubtree { pre, records } => {
            tree.replace_subtree(*pre, records).map(|_| ())
        }
        Edit::Replace { pre, content } => match tree.replace(*pre, *content) {
            Err(ArborError::Invalid(_)) => Ok(()),
            other => other,
        },
    }
}

fn run_sequence(seed: u64, steps: usize, options: TableOptions) {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let dir = tempdir().unwrap();
    let mut disk = Tree::create(dir.path(), options).unwrap();
    let mut mem = Tree::new(MemTable::default());
    disk.load(&twelve_records()).unwrap();
    mem.load(&twelve_records()).unwrap();

    for step in 0..steps {
        let edit = next_edit(&mem, &mut rng);
        let batch_seed = rng.gen();
        let on_mem = apply(&mut mem, &edit, &mut ChaCha8Rng::seed_from_u64(batch_seed));
        let on_disk = apply(&mut disk, &edit, &mut ChaCha8Rng::seed_from_u64(batch_seed));
        if let Edit::TouchingTexts { .. } = edit {
            assert!(
                matches!(on_mem, Err(ArborError::AdjacentText { .. })),
                "step {step}: {on_mem:?}"
            );
        }
        match (&on_mem, &on_disk) {
            (Ok(()), Ok(())) => {}
            (Err(ArborError::AdjacentText { .. }), Err(ArborError::AdjacentText { .. })) => {}
            _ => panic!("step {step}: {edit:?} gave {on_mem:?} and {on_disk:?}"),
        }
        let report = mem.verify().unwrap();
        assert!(report.is_structurally_sound(), "step {step}: {report}");
    }
    let expected = snapshot(&mem);
    assert_eq!(snapshot(&disk), expected);
    assert_eq!(disk.table().last_id(), mem.table().last_id());
    disk.close().unwrap();

    let reopened: Tree<DiskTable> = Tree::open(dir.path(), TableOptions::default()).unwrap();
    assert_eq!(snapshot(&reopened), expected);
}

#[test]
fn long_seeded_sequence_matches_memory_table() {
    support::init_tracing();
    run_sequence(0x5EED_0001, 300, small_blocks());
}

#[test]
fn two_block_cache_evicts_during_splits_and_deletes() {
    run_sequence(0xCAC4_E002, 250, small_blocks().cache_blocks(2));
}

#[test]
fn tiny_blocks_split_on_almost_every_insert() {
    run_sequence(0x0B10_C4ED, 150, TableOptions::default().block_size(64).fill_factor(0.75));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn random_sequences_keep_stores_identical(
        seed in any::<u64>(),
        steps in 1usize..80,
        cache in prop_oneof![Just(2usize), Just(64usize)],
    ) {
        run_sequence(seed, steps, small_blocks().cache_blocks(cache));
    }
}

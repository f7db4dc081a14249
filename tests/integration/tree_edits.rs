#![allow(missing_docs)]

mod support;

use arbor::{
    storage::record::field, ArborError, DiskTable, MemTable, NodeId, NodeKind, Record,
    TableAccess, Tree,
};
use support::{four_record_subtree, init_tracing, raw_records, small_blocks, twelve_records};
use tempfile::tempdir;

fn mem_tree() -> Tree<MemTable> {
    let mut tree = Tree::new(MemTable::default());
    tree.load(&twelve_records()).unwrap();
    tree
}

#[test]
fn delete_leaf_element_shrinks_ancestors() {
    init_tracing();
    let mut tree = mem_tree();
    let before_size = tree.size(1).unwrap();
    let old_four = tree.record(4).unwrap();

    assert_eq!(tree.kind(3).unwrap(), NodeKind::Element);
    assert_eq!(tree.delete_subtree(3).unwrap(), 1);

    assert_eq!(tree.len(), 11);
    assert_eq!(tree.size(0).unwrap(), 11);
    assert_eq!(tree.size(1).unwrap(), before_size - 1);
    let moved = tree.record(3).unwrap();
    assert_eq!(moved.id, old_four.id);
    assert_eq!(moved.name, old_four.name);
    assert_eq!(moved.size, old_four.size);
    assert_eq!(tree.parent(3).unwrap(), Some(1));
    assert_eq!(tree.parent(10).unwrap(), Some(1));
    assert!(tree.verify().unwrap().is_clean());
}

#[test]
fn insert_subtree_below_nested_parent() {
    init_tracing();
    let mut tree = mem_tree();
    let size_six = tree.size(6).unwrap();
    let tail_ids: Vec<NodeId> = (9..12).map(|p| tree.id(p).unwrap()).collect();

    let first = tree.insert_subtree(9, 6, &four_record_subtree()).unwrap();

    assert_eq!(tree.len(), 16);
    assert_eq!(tree.size(6).unwrap(), size_six + 4);
    assert_eq!(tree.size(1).unwrap(), 15);
    assert_eq!(tree.size(0).unwrap(), 16);
    assert_eq!(first, NodeId(13));
    let fresh: Vec<NodeId> = (9..13).map(|p| tree.id(p).unwrap()).collect();
    assert_eq!(fresh, vec![NodeId(13), NodeId(14), NodeId(15), NodeId(16)]);
    let shifted: Vec<NodeId> = (13..16).map(|p| tree.id(p).unwrap()).collect();
    assert_eq!(shifted, tail_ids);

    assert_eq!(tree.parent(9).unwrap(), Some(6));
    assert_eq!(tree.parent(10).unwrap(), Some(9));
    assert_eq!(tree.parent(13).unwrap(), Some(6));
    assert_eq!(tree.parent(15).unwrap(), Some(1));
    assert_eq!(tree.children(6).unwrap(), vec![8, 9, 13, 14]);
    assert_eq!(tree.table().last_id(), 16);
    assert!(tree.verify().unwrap().is_clean());
}

#[test]
fn cascade_touches_every_ancestor() {
    let mut tree = mem_tree();
    let ancestors = [0usize, 1, 4];
    let before: Vec<usize> = ancestors.iter().map(|&p| tree.size(p).unwrap()).collect();

    let batch = [Record::comment(7), Record::element(8, 0)];
    tree.insert_subtree(6, 4, &batch).unwrap();
    for (i, &p) in ancestors.iter().enumerate() {
        assert_eq!(tree.size(p).unwrap(), before[i] + 2);
    }

    let removed = tree.delete_subtree(4).unwrap();
    assert_eq!(removed, 4);
    assert_eq!(tree.size(1).unwrap(), before[1] - 2);
    assert_eq!(tree.size(0).unwrap(), before[0] - 2);
    assert!(tree.verify().unwrap().is_clean());
}

#[test]
fn adjacent_text_is_rejected_without_changes() {
    let mut tree = mem_tree();
    let before = raw_records(tree.table());
    let text = [Record::text(500)];

    // "z" follows at pre 9.
    assert!(matches!(
        tree.insert_subtree(9, 6, &text),
        Err(ArborError::AdjacentText { .. })
    ));
    // "z" precedes pre 10.
    assert!(matches!(
        tree.insert_subtree(10, 6, &text),
        Err(ArborError::AdjacentText { .. })
    ));
    let two_texts = [Record::text(1), Record::text(2)];
    assert!(matches!(
        tree.insert_subtree(11, 6, &two_texts),
        Err(ArborError::AdjacentText { .. })
    ));

    assert_eq!(raw_records(tree.table()), before);
    assert_eq!(tree.table().last_id(), 12);

    // After the last child element of d.
    tree.insert_subtree(11, 6, &text).unwrap();
    assert_eq!(tree.kind(11).unwrap(), NodeKind::Text);
}

#[test]
fn ids_survive_unrelated_edits() {
    let mut tree = mem_tree();
    let g = tree.id(11).unwrap();
    let e = tree.id(8).unwrap();

    tree.insert_subtree(2, 1, &[Record::comment(1)]).unwrap();
    tree.delete_subtree(5).unwrap();
    tree.insert_subtree(1, 0, &[Record::processing_instruction(3, 4)])
        .unwrap();

    let g_pre = tree.pre_of(g).unwrap().unwrap();
    let e_pre = tree.pre_of(e).unwrap().unwrap();
    assert_eq!(tree.id(g_pre).unwrap(), g);
    assert_eq!(tree.name(g_pre).unwrap(), Some(7));
    assert_eq!(tree.name(e_pre).unwrap(), Some(5));
    assert_eq!(g_pre, 11);

    let deleted = tree.id(e_pre).unwrap();
    tree.delete_subtree(e_pre).unwrap();
    assert_eq!(tree.pre_of(deleted).unwrap(), None);

    let fresh = tree.insert_subtree(e_pre, 6, &[Record::comment(9)]).unwrap();
    assert!(fresh.0 > 12);
    assert_ne!(fresh, deleted);
}

#[test]
fn deleting_the_root_empties_the_tree() {
    let mut tree = mem_tree();
    assert_eq!(tree.delete_subtree(0).unwrap(), 12);
    assert!(tree.is_empty());
    assert_eq!(tree.table().last_id(), 12);

    let first = tree.load(&twelve_records()).unwrap();
    assert_eq!(first, NodeId(13));
}

#[test]
fn disk_tree_matches_memory_tree() {
    init_tracing();
    let dir = tempdir().unwrap();
    let mut disk = Tree::new(DiskTable::create(dir.path(), small_blocks()).unwrap());
    let mut mem = mem_tree();
    disk.load(&twelve_records()).unwrap();

    for round in 0..6 {
        let batch = four_record_subtree();
        disk.insert_subtree(9, 6, &batch).unwrap();
        mem.insert_subtree(9, 6, &batch).unwrap();
        if round % 2 == 1 {
            assert_eq!(disk.delete_subtree(13).unwrap(), 4);
            assert_eq!(mem.delete_subtree(13).unwrap(), 4);
        }
    }
    assert_eq!(support::snapshot(&disk), support::snapshot(&mem));
    assert!(disk.table().block_count() > 1);
    assert!(disk.verify().unwrap().is_structurally_sound());
}

fn replace_steps<T: TableAccess>(tree: &mut Tree<T>) {
    // c("y") at pre 4 becomes the four-record subtree.
    let first = tree.replace_subtree(4, &four_record_subtree()).unwrap();
    assert_eq!(first, NodeId(13));
    assert_eq!(tree.len(), 14);
    assert_eq!(tree.size(1).unwrap(), 13);
    assert_eq!(tree.parent(8).unwrap(), Some(1));
    assert_eq!(tree.kind(8).unwrap(), NodeKind::Element);

    // @k of d, now at pre 9, becomes two attributes.
    let attrs = [Record::attribute(30, 300, 0), Record::attribute(31, 301, 0)];
    tree.replace_subtree(9, &attrs).unwrap();
    assert_eq!(tree.attribute_count(8).unwrap(), 2);
    assert_eq!(tree.size(8).unwrap(), 6);
    assert_eq!(tree.parent(11).unwrap(), Some(8));

    // Same-size replace of b leaves every size alone.
    tree.replace_subtree(3, &[Record::comment(40)]).unwrap();
    assert_eq!(tree.size(0).unwrap(), 15);
    assert_eq!(tree.pre_of(NodeId(4)).unwrap(), None);
    assert_eq!(tree.table().last_id(), 12 + 4 + 2 + 1);
    assert!(tree.verify().unwrap().is_clean());
}

#[test]
fn replace_subtree_matches_across_stores() {
    let dir = tempdir().unwrap();
    let options = small_blocks().cache_blocks(2);
    let mut disk = Tree::new(DiskTable::create(dir.path(), options).unwrap());
    disk.load(&twelve_records()).unwrap();
    let mut mem = mem_tree();

    replace_steps(&mut disk);
    replace_steps(&mut mem);
    assert_eq!(support::snapshot(&disk), support::snapshot(&mem));
    disk.close().unwrap();

    let reopened = Tree::open(dir.path(), small_blocks()).unwrap();
    assert_eq!(support::snapshot(&reopened), support::snapshot(&mem));
}

#[test]
fn rename_and_replace_write_in_place() {
    let mut tree = mem_tree();
    tree.rename(7, 77).unwrap();
    tree.replace(7, 1234).unwrap();
    let attr = tree.record(7).unwrap();
    assert_eq!(attr.kind, NodeKind::Attribute);
    assert_eq!((attr.name, attr.content), (77, 1234));
    assert_eq!(tree.table().read2(7, field::NAME.start).unwrap(), 77);
    assert!(tree.rename(2, 1).is_err());
    assert!(tree.replace(1, 1).is_err());
}

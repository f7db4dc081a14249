#![allow(missing_docs)]

mod support;

use std::fs;

use arbor::{storage::META_FILE, ArborError, DiskTable, Record, TableAccess, TableOptions, Tree};
use support::{
    four_record_subtree, init_tracing, raw_records, small_blocks, snapshot, twelve_records,
};
use tempfile::tempdir;

#[test]
fn close_and_reopen_preserves_every_record() {
    init_tracing();
    let dir = tempdir().unwrap();
    let expected = {
        let mut tree = Tree::create(dir.path(), small_blocks()).unwrap();
        tree.load(&twelve_records()).unwrap();
        for _ in 0..5 {
            tree.insert_subtree(9, 6, &four_record_subtree()).unwrap();
        }
        tree.delete_subtree(3).unwrap();
        tree.replace(2, 4242).unwrap();
        tree.rename(8, 99).unwrap();
        let expected = snapshot(&tree);
        tree.close().unwrap();
        expected
    };

    let tree = Tree::open(dir.path(), TableOptions::default()).unwrap();
    assert_eq!(snapshot(&tree), expected);
    assert_eq!(tree.table().last_id(), 12 + 20);
    assert!(tree.verify().unwrap().is_clean());
}

#[test]
fn ids_continue_after_reopen() {
    let dir = tempdir().unwrap();
    {
        let mut tree = Tree::create(dir.path(), small_blocks()).unwrap();
        tree.load(&twelve_records()).unwrap();
        tree.delete_subtree(11).unwrap();
        tree.flush().unwrap();
    }
    let mut tree = Tree::open(dir.path(), small_blocks()).unwrap();
    let id = tree.insert_subtree(11, 1, &[Record::comment(1)]).unwrap();
    assert_eq!(id.0, 13);
}

#[test]
fn edits_across_block_boundaries_leave_other_records_untouched() {
    let dir = tempdir().unwrap();
    let mut table = DiskTable::create(dir.path(), small_blocks()).unwrap();
    let mut records = Vec::new();
    for tag in 0..40u32 {
        let mut rec = vec![0u8; 16];
        rec[12..].copy_from_slice(&tag.to_be_bytes());
        records.extend(rec);
    }
    table.insert(0, &records).unwrap();
    let before = raw_records(&table);
    let blocks = table.block_count();

    // Spans the first and second block.
    table.delete(5, 6).unwrap();
    let after = raw_records(&table);
    assert_eq!(&after[..5], &before[..5]);
    assert_eq!(&after[5..], &before[11..]);
    assert_eq!(table.block_count(), blocks);

    // Overflows the block holding pre 3.
    let wide: Vec<u8> = vec![0xEE; 16 * 14];
    table.insert(3, &wide).unwrap();
    let grown = raw_records(&table);
    assert_eq!(&grown[..3], &after[..3]);
    assert!(grown[3..17].iter().all(|r| r.iter().all(|&b| b == 0xEE)));
    assert_eq!(&grown[17..], &after[3..]);

    // Emptying a whole block gives it back.
    let occupancies = table.occupancies();
    let first_len = occupancies[0];
    let second_len = occupancies[1];
    let count = table.block_count();
    table.delete(first_len, second_len).unwrap();
    assert_eq!(table.block_count(), count - 1);
    assert_eq!(table.free_blocks(), 1);
}

#[test]
fn corrupted_metadata_is_rejected() {
    let dir = tempdir().unwrap();
    {
        let mut tree = Tree::create(dir.path(), small_blocks()).unwrap();
        tree.load(&twelve_records()).unwrap();
        tree.close().unwrap();
    }
    let meta_path = dir.path().join(META_FILE);
    let mut image = fs::read(&meta_path).unwrap();
    let mid = image.len() / 2;
    image[mid] ^= 0x40;
    fs::write(&meta_path, &image).unwrap();

    assert!(matches!(
        Tree::open(dir.path(), TableOptions::default()),
        Err(ArborError::Corruption(_))
    ));

    fs::write(&meta_path, b"ARBT").unwrap();
    assert!(matches!(
        DiskTable::open(dir.path(), TableOptions::default()),
        Err(ArborError::Corruption(_))
    ));
}

#[test]
fn options_load_from_toml() {
    let options = TableOptions::from_toml_str(
        r#"
        block_size = 512
        record_power = 5
        fill_factor = 0.75
        cache_blocks = 4
        "#,
    )
    .unwrap();
    let dir = tempdir().unwrap();
    let mut tree = Tree::create(dir.path(), options).unwrap();
    tree.load(&twelve_records()).unwrap();
    assert_eq!(tree.table().record_size(), 32);
    assert_eq!(tree.table().options().fill_limit(), 12);
    tree.close().unwrap();

    let tree = Tree::open(dir.path(), TableOptions::default()).unwrap();
    assert_eq!(tree.table().options().block_size, 512);
    assert_eq!(tree.len(), 12);
}

#[test]
fn closed_table_rejects_every_call() {
    let dir = tempdir().unwrap();
    let mut tree = Tree::create(dir.path(), small_blocks()).unwrap();
    tree.load(&twelve_records()).unwrap();
    tree.close().unwrap();
    assert!(matches!(tree.size(0), Err(ArborError::Closed)));
    assert!(matches!(tree.flush(), Err(ArborError::Closed)));
    assert!(matches!(
        tree.insert_subtree(1, 0, &[Record::comment(1)]),
        Err(ArborError::Closed)
    ));
    let mut table = tree.into_inner();
    assert!(matches!(table.delete(0, 1), Err(ArborError::Closed)));
    assert!(matches!(table.close(), Err(ArborError::Closed)));
}

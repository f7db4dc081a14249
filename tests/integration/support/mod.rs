#![allow(dead_code)]

use std::sync::Once;

use arbor::{FragmentBuilder, Record, TableAccess, TableOptions, Tree};
use tracing_subscriber::EnvFilter;

pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("arbor=debug"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .try_init();
    });
}

/// 16 records per block, fresh blocks take 8.
pub fn small_blocks() -> TableOptions {
    TableOptions::default().block_size(256).fill_factor(0.5)
}

/// Twelve-record document:
///
/// ```text
///  0 doc
///  1   a
///  2     "x"
///  3     b
///  4     c
///  5       "y"
///  6     d @k
///  7       @k
///  8       e
///  9       "z"
/// 10       f
/// 11     g
/// ```
pub fn twelve_records() -> Vec<Record> {
    let mut b = FragmentBuilder::new();
    b.document(100).unwrap();
    b.open_element(1, 0).unwrap();
    b.text(101).unwrap();
    b.open_element(2, 0).unwrap().close().unwrap();
    b.open_element(3, 0).unwrap().text(102).unwrap().close().unwrap();
    b.open_element(4, 0).unwrap().attribute(9, 103, 0).unwrap();
    b.open_element(5, 0).unwrap().close().unwrap();
    b.text(104).unwrap();
    b.open_element(6, 0).unwrap().close().unwrap();
    b.close().unwrap();
    b.open_element(7, 0).unwrap().close().unwrap();
    b.close().unwrap().close().unwrap();
    b.finish().unwrap()
}

/// Element with one attribute, a text child and a comment: four records.
pub fn four_record_subtree() -> Vec<Record> {
    let mut b = FragmentBuilder::new();
    b.open_element(20, 1).unwrap().attribute(21, 200, 0).unwrap();
    b.text(201).unwrap().comment(202).unwrap();
    b.close().unwrap();
    b.finish().unwrap()
}

pub fn snapshot<T: TableAccess>(tree: &Tree<T>) -> Vec<Record> {
    (0..tree.len()).map(|pre| tree.record(pre).unwrap()).collect()
}

pub fn raw_records<T: TableAccess>(table: &T) -> Vec<Vec<u8>> {
    (0..table.len()).map(|pre| table.read_record(pre).unwrap()).collect()
}

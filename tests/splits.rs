use std::sync::Arc;

use spindle::{BTreeIndex, BufferPool, Error, IndexKey, MemRecords, RecordId, ScanOp};
use tempfile::tempdir;

const LEAF_CAPACITY: i32 = <i32 as IndexKey>::LEAF_CAPACITY as i32;
const NODE_CAPACITY: i32 = <i32 as IndexKey>::NODE_CAPACITY as i32;

fn empty_index(pool: &Arc<BufferPool>, dir: &std::path::Path) -> BTreeIndex<i32> {
    BTreeIndex::<i32>::open(
        Arc::clone(pool),
        dir,
        "relation",
        0,
        MemRecords::new(Vec::new()),
    )
    .unwrap()
}

fn rid_for(key: i32) -> RecordId {
    RecordId::new(1 + (key / 100) as u32, (key % 100) as u16)
}

fn scan_all(index: &mut BTreeIndex<i32>) -> Vec<RecordId> {
    index
        .start_scan(i32::MIN, ScanOp::Gte, i32::MAX - 1, ScanOp::Lte)
        .unwrap();
    let mut rids = Vec::new();
    loop {
        match index.scan_next() {
            Ok(rid) => rids.push(rid),
            Err(Error::ScanCompleted) => break,
            Err(e) => panic!("scan failed: {e}"),
        }
    }
    index.end_scan().unwrap();
    rids
}

#[test]
fn ascending_inserts_split_leaves() {
    let dir = tempdir().unwrap();
    let pool = Arc::new(BufferPool::new(128));
    let mut index = empty_index(&pool, dir.path());

    let count = LEAF_CAPACITY * 4;
    for key in 0..count {
        index.insert(key, rid_for(key)).unwrap();
    }

    let rids = scan_all(&mut index);
    assert_eq!(rids.len(), count as usize);
    let expected: Vec<RecordId> = (0..count).map(rid_for).collect();
    assert_eq!(rids, expected);
    assert_eq!(index.height().unwrap(), 2);
}

#[test]
fn descending_inserts_split_leaves() {
    let dir = tempdir().unwrap();
    let pool = Arc::new(BufferPool::new(128));
    let mut index = empty_index(&pool, dir.path());

    let count = LEAF_CAPACITY * 3;
    for key in (0..count).rev() {
        index.insert(key, rid_for(key)).unwrap();
    }

    let rids = scan_all(&mut index);
    let expected: Vec<RecordId> = (0..count).map(rid_for).collect();
    assert_eq!(rids, expected);
}

#[test]
fn inclusive_bounds_straddle_a_leaf_boundary() {
    let dir = tempdir().unwrap();
    let pool = Arc::new(BufferPool::new(128));
    let mut index = empty_index(&pool, dir.path());

    // At least three leaves.
    for key in 1..=(LEAF_CAPACITY * 3) {
        index.insert(key, rid_for(key)).unwrap();
    }

    // A three-key window around the first leaf's capacity necessarily
    // crosses a sibling pointer.
    let low = LEAF_CAPACITY;
    index
        .start_scan(low, ScanOp::Gte, low + 2, ScanOp::Lte)
        .unwrap();

    let mut rids = Vec::new();
    loop {
        match index.scan_next() {
            Ok(rid) => rids.push(rid),
            Err(Error::ScanCompleted) => break,
            Err(e) => panic!("scan failed: {e}"),
        }
    }
    assert_eq!(rids, vec![rid_for(low), rid_for(low + 1), rid_for(low + 2)]);
    index.end_scan().unwrap();
}

#[test]
fn interleaved_inserts_keep_order_across_splits() {
    let dir = tempdir().unwrap();
    let pool = Arc::new(BufferPool::new(128));
    let mut index = empty_index(&pool, dir.path());

    // Evens forward, then odds backward: plenty of mid-leaf shifting.
    let count = LEAF_CAPACITY * 3;
    for key in (0..count).step_by(2) {
        index.insert(key, rid_for(key)).unwrap();
    }
    for key in (0..count).filter(|k| k % 2 == 1).rev() {
        index.insert(key, rid_for(key)).unwrap();
    }

    let rids = scan_all(&mut index);
    let expected: Vec<RecordId> = (0..count).map(rid_for).collect();
    assert_eq!(rids, expected);
    assert_eq!(index.pinned_pages(), 1);
}

#[test]
fn root_split_grows_the_tree_one_level() {
    let dir = tempdir().unwrap();
    let pool = Arc::new(BufferPool::new(256));
    let mut index = empty_index(&pool, dir.path());

    assert_eq!(index.height().unwrap(), 2);

    // Ascending fill: leaf splits leave ceil((L+1)/2) behind, so the root
    // accumulates one separator per ~L/2 keys and overflows once the
    // separator count would pass NODE_CAPACITY.
    let half_leaf = (LEAF_CAPACITY + 1) / 2;
    let until_root_split = half_leaf * (NODE_CAPACITY + 3);
    let mut key = 0;
    while key < until_root_split {
        index.insert(key, rid_for(key)).unwrap();
        key += 1;
    }

    assert_eq!(index.height().unwrap(), 3);
    assert_eq!(index.pinned_pages(), 1);

    // The leaf chain survives the reshuffle: everything comes back, in
    // order, exactly once.
    let rids = scan_all(&mut index);
    assert_eq!(rids.len(), key as usize);
    let expected: Vec<RecordId> = (0..key).map(rid_for).collect();
    assert_eq!(rids, expected);

    // Point lookups still resolve on both flanks of the tree.
    index.start_scan(0, ScanOp::Gte, 0, ScanOp::Lte).unwrap();
    assert_eq!(index.scan_next().unwrap(), rid_for(0));
    index.end_scan().unwrap();

    index
        .start_scan(key - 1, ScanOp::Gte, key - 1, ScanOp::Lte)
        .unwrap();
    assert_eq!(index.scan_next().unwrap(), rid_for(key - 1));
    index.end_scan().unwrap();

    index.close().unwrap();
}

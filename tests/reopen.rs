use std::sync::Arc;

use spindle::{
    BTreeIndex, BufferPool, Error, MemRecords, NoRecords, RecordId, ScanOp, Str10,
};
use tempfile::tempdir;

fn int_source(keys: &[i32]) -> MemRecords {
    MemRecords::new(
        keys.iter()
            .enumerate()
            .map(|(i, key)| {
                let mut record = vec![0u8; 12];
                record[..4].copy_from_slice(&key.to_le_bytes());
                (RecordId::new(1, i as u16), record)
            })
            .collect(),
    )
}

fn collect_range(index: &mut BTreeIndex<i32>, low: i32, high: i32) -> Vec<RecordId> {
    index.start_scan(low, ScanOp::Gte, high, ScanOp::Lte).unwrap();
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
fn reopen_yields_identical_scans() {
    let dir = tempdir().unwrap();
    let keys = vec![12, 5, 900, -40, 33, 7, 256, -1];

    let first_pass = {
        let pool = Arc::new(BufferPool::new(128));
        let mut index =
            BTreeIndex::<i32>::open(pool, dir.path(), "relation", 0, int_source(&keys)).unwrap();
        let rids = collect_range(&mut index, -1000, 1000);
        index.close().unwrap();
        rids
    };

    // Fresh pool, existing file: the record source must stay untouched.
    let pool = Arc::new(BufferPool::new(128));
    let mut index = BTreeIndex::<i32>::open(pool, dir.path(), "relation", 0, NoRecords).unwrap();
    let second_pass = collect_range(&mut index, -1000, 1000);

    assert_eq!(first_pass, second_pass);
    assert_eq!(first_pass.len(), keys.len());
    index.close().unwrap();
}

#[test]
fn reopen_accepts_further_inserts() {
    let dir = tempdir().unwrap();

    {
        let pool = Arc::new(BufferPool::new(128));
        let index =
            BTreeIndex::<i32>::open(pool, dir.path(), "relation", 0, int_source(&[1, 2, 3]))
                .unwrap();
        index.close().unwrap();
    }

    let pool = Arc::new(BufferPool::new(128));
    let mut index = BTreeIndex::<i32>::open(pool, dir.path(), "relation", 0, NoRecords).unwrap();

    index.insert(4, RecordId::new(2, 0)).unwrap();
    assert!(matches!(
        index.insert(2, RecordId::new(2, 1)),
        Err(Error::DuplicateKey)
    ));
    assert_eq!(collect_range(&mut index, 1, 10).len(), 4);
}

#[test]
fn reopen_with_wrong_key_type_is_rejected() {
    let dir = tempdir().unwrap();

    {
        let pool = Arc::new(BufferPool::new(128));
        let index =
            BTreeIndex::<i32>::open(pool, dir.path(), "relation", 0, int_source(&[1])).unwrap();
        index.close().unwrap();
    }

    let pool = Arc::new(BufferPool::new(128));
    let result = BTreeIndex::<f64>::open(pool, dir.path(), "relation", 0, NoRecords);
    assert!(matches!(result, Err(Error::BadIndexInfo(_))));
}

#[test]
fn reopen_with_wrong_relation_name_is_rejected() {
    let dir = tempdir().unwrap();

    {
        let pool = Arc::new(BufferPool::new(128));
        let index =
            BTreeIndex::<i32>::open(pool, dir.path(), "orders", 0, int_source(&[1])).unwrap();
        index.close().unwrap();
    }

    // Same file on disk (forced via matching name/offset in the filename),
    // different relation recorded inside: rename the index file so the
    // open resolves to it.
    std::fs::rename(dir.path().join("orders.0"), dir.path().join("users.0")).unwrap();

    let pool = Arc::new(BufferPool::new(128));
    let result = BTreeIndex::<i32>::open(pool, dir.path(), "users", 0, NoRecords);
    assert!(matches!(result, Err(Error::BadIndexInfo(_))));
}

#[test]
fn string_index_survives_reopen() {
    let dir = tempdir().unwrap();
    let names = ["delta", "alpha", "echo", "bravo", "charlie"];

    {
        let pool = Arc::new(BufferPool::new(128));
        let records: Vec<(RecordId, Vec<u8>)> = names
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let mut record = vec![0u8; 16];
                record[..name.len()].copy_from_slice(name.as_bytes());
                (RecordId::new(1, i as u16), record)
            })
            .collect();
        let index =
            BTreeIndex::<Str10>::open(pool, dir.path(), "call_signs", 0, MemRecords::new(records))
                .unwrap();
        index.close().unwrap();
    }

    let pool = Arc::new(BufferPool::new(128));
    let mut index =
        BTreeIndex::<Str10>::open(pool, dir.path(), "call_signs", 0, NoRecords).unwrap();

    index
        .start_scan(
            Str10::from("alpha"),
            ScanOp::Gte,
            Str10::from("echo"),
            ScanOp::Lte,
        )
        .unwrap();
    let mut count = 0;
    while index.scan_next().is_ok() {
        count += 1;
    }
    assert_eq!(count, names.len());
    index.end_scan().unwrap();
    index.close().unwrap();
}

#[test]
fn drop_without_close_still_persists() {
    let dir = tempdir().unwrap();

    {
        let pool = Arc::new(BufferPool::new(128));
        let mut index =
            BTreeIndex::<i32>::open(pool, dir.path(), "relation", 0, int_source(&[10, 20]))
                .unwrap();
        // A scan is deliberately left open; teardown must end it.
        index.start_scan(0, ScanOp::Gt, 100, ScanOp::Lt).unwrap();
        drop(index);
    }

    let pool = Arc::new(BufferPool::new(128));
    let mut index = BTreeIndex::<i32>::open(pool, dir.path(), "relation", 0, NoRecords).unwrap();
    assert_eq!(collect_range(&mut index, 0, 100).len(), 2);
}

//! Storage integration tests: page manager, table heap, and B+ tree
//! working together on real files, including reopen.

use std::collections::HashSet;
use std::sync::Arc;

use rand::seq::SliceRandom;
use tempfile::tempdir;

use kaze_common::page::PageType;
use kaze_common::types::{RecordId, INVALID_PAGE_ID};
use kaze_storage::record::{self, Field};
use kaze_storage::{BPlusTree, HeapMigration, MigrationColumn, PageManager, TableHeap};

fn be_key(i: u32) -> Vec<u8> {
    i.to_be_bytes().to_vec()
}

#[test]
fn heap_and_index_stay_consistent() {
    let dir = tempdir().unwrap();
    let pm = Arc::new(PageManager::open(dir.path().join("kaze.db"), true, false, 64).unwrap());
    let index_pm =
        Arc::new(PageManager::open(dir.path().join("index_000001.kzx"), true, false, 64).unwrap());

    let root = pm.new_page(PageType::Data).unwrap();
    let heap = TableHeap::new(&pm, root).unwrap();
    let mut tree = BPlusTree::new(index_pm.clone(), INVALID_PAGE_ID, true).unwrap();

    // Insert rows, keying the tree by id.
    let mut locations = Vec::new();
    for i in 0..300u32 {
        let payload = record::encode(&[
            Field::from_int32(i as i32),
            Field::from_string(&format!("row {i}")),
        ]);
        let loc = heap.insert(&payload).unwrap();
        tree.insert(&be_key(i), loc).unwrap();
        locations.push(loc);
    }

    // Every key resolves to a live heap row with the right contents.
    for i in (0..300u32).step_by(7) {
        let rid = tree.search(&be_key(i)).unwrap().expect("key present");
        let payload = heap.read(rid).unwrap().expect("row present");
        let fields = record::decode(&payload).unwrap();
        assert_eq!(fields[0], Field::from_int32(i as i32));
    }

    // Delete a third of the rows through both structures.
    for i in (0..300u32).step_by(3) {
        let rid = locations[i as usize];
        assert!(heap.erase(rid).unwrap());
        tree.remove(&be_key(i), rid).unwrap();
    }
    assert_eq!(heap.row_count().unwrap(), 200);
    assert_eq!(
        tree.scan_range(None, true, None, true).unwrap().len(),
        200
    );
    for i in (0..300u32).step_by(3) {
        assert_eq!(tree.search(&be_key(i)).unwrap(), None);
    }

    assert_eq!(pm.pinned_total(), 0);
    assert_eq!(index_pm.pinned_total(), 0);
}

#[test]
fn tree_survives_reopen_with_recorded_root() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("index_000002.kzx");
    let root;
    {
        let pm = Arc::new(PageManager::open(&path, true, false, 64).unwrap());
        let mut tree = BPlusTree::new(pm.clone(), INVALID_PAGE_ID, false).unwrap();
        let mut keys: Vec<u32> = (0..1000).collect();
        keys.shuffle(&mut rand::thread_rng());
        for &i in &keys {
            tree.insert(&be_key(i), RecordId::new(2, (i % 500) as u16))
                .unwrap();
        }
        root = tree.root_page_id();
        pm.flush_all().unwrap();
    }

    let pm = Arc::new(PageManager::open(&path, false, false, 64).unwrap());
    let tree = BPlusTree::new(pm, root, false).unwrap();
    let all = tree.scan_range(None, true, None, true).unwrap();
    assert_eq!(all.len(), 1000);
    for (i, rid) in all.iter().enumerate() {
        assert_eq!(*rid, RecordId::new(2, (i % 500) as u16), "position {i}");
    }
    assert_eq!(
        tree.search(&be_key(997)).unwrap(),
        Some(RecordId::new(2, 497))
    );
}

#[test]
fn heap_chain_survives_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("kaze.db");
    let root;
    {
        let pm = Arc::new(PageManager::open(&path, true, false, 32).unwrap());
        root = pm.new_page(PageType::Data).unwrap();
        let heap = TableHeap::new(&pm, root).unwrap();
        for i in 0..500 {
            let payload = record::encode(&[
                Field::from_int64(i),
                Field::from_string(&format!("payload number {i}")),
            ]);
            heap.insert(&payload).unwrap();
        }
        pm.flush_all().unwrap();
    }

    let pm = Arc::new(PageManager::open(&path, false, false, 32).unwrap());
    let heap = TableHeap::new(&pm, root).unwrap();
    let mut expected = 0i64;
    heap.scan(|_, payload| {
        let fields = record::decode(payload).unwrap();
        assert_eq!(fields[0], Field::from_int64(expected));
        expected += 1;
        Ok(())
    })
    .unwrap();
    assert_eq!(expected, 500);
}

#[test]
fn migration_roundtrip_under_load() {
    let dir = tempdir().unwrap();
    let pm = Arc::new(PageManager::open(dir.path().join("kaze.db"), true, false, 64).unwrap());
    let root = pm.new_page(PageType::Data).unwrap();
    let heap = TableHeap::new(&pm, root).unwrap();

    for i in 0..200 {
        heap.insert(&record::encode(&[
            Field::from_int32(i),
            Field::from_string("before"),
        ]))
        .unwrap();
    }

    let columns = vec![
        MigrationColumn {
            name: "id".into(),
            data_type: kaze_common::types::DataType::Integer,
            not_null: true,
            source_index: Some(0),
            default: None,
        },
        MigrationColumn {
            name: "label".into(),
            data_type: kaze_common::types::DataType::Varchar,
            not_null: false,
            source_index: Some(1),
            default: None,
        },
        MigrationColumn {
            name: "since".into(),
            data_type: kaze_common::types::DataType::Date,
            not_null: false,
            source_index: None,
            default: Some(Field::from_date(19_800)),
        },
    ];
    let new_root = HeapMigration::rewrite(&pm, root, 2, &columns).unwrap();
    HeapMigration::free_chain(&pm, root).unwrap();

    let migrated = TableHeap::new(&pm, new_root).unwrap();
    let mut ids = HashSet::new();
    migrated
        .scan(|_, payload| {
            let fields = record::decode(payload).unwrap();
            assert_eq!(fields.len(), 3);
            assert_eq!(fields[2], Field::from_date(19_800));
            if let Field {
                is_null: false,
                payload,
                ..
            } = &fields[0]
            {
                ids.insert(i32::from_le_bytes(payload.as_slice().try_into().unwrap()));
            }
            Ok(())
        })
        .unwrap();
    assert_eq!(ids.len(), 200);

    // The freed chain's pages satisfy new allocations before file growth.
    let count = pm.page_count();
    let recycled = pm.new_page(PageType::Data).unwrap();
    assert!(recycled < count);
    assert_eq!(pm.page_count(), count);
}

#[test]
fn pins_return_to_zero_after_every_operation() {
    let dir = tempdir().unwrap();
    let pm = Arc::new(PageManager::open(dir.path().join("kaze.db"), true, false, 16).unwrap());
    let root = pm.new_page(PageType::Data).unwrap();
    let heap = TableHeap::new(&pm, root).unwrap();
    assert_eq!(pm.pinned_total(), 0);

    let loc = heap.insert(b"one").unwrap();
    assert_eq!(pm.pinned_total(), 0);
    heap.read(loc).unwrap();
    assert_eq!(pm.pinned_total(), 0);
    heap.update(loc, b"two").unwrap();
    assert_eq!(pm.pinned_total(), 0);
    heap.erase(loc).unwrap();
    assert_eq!(pm.pinned_total(), 0);
    heap.scan(|_, _| Ok(())).unwrap();
    assert_eq!(pm.pinned_total(), 0);
    heap.truncate().unwrap();
    assert_eq!(pm.pinned_total(), 0);

    // Failure paths unpin too.
    assert!(heap.insert(&vec![0u8; 70_000]).is_err());
    assert_eq!(pm.pinned_total(), 0);
}

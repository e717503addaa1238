use std::fs::OpenOptions;
use std::io::Write;
use std::sync::Once;

use recdb::{RecordStore, StoreOptions};

const PS: usize = 512;

static TRACING: Once = Once::new();

fn options() -> StoreOptions {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    });
    StoreOptions::default().page_size(PS)
}

fn payload(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| seed.wrapping_add((i % 251) as u8)).collect()
}

#[test]
fn payloads_of_all_shapes_survive_reopen() {
    let dir = tempfile::tempdir().expect("should create temp dir");
    // Zero-length, sub-page, exact-page-boundary and multi-page payloads up
    // to five pages.
    let sizes = [0usize, 1, 100, 493, 494, 989, 2 * PS, 1485, 2000, 5 * PS];

    let mut ids = Vec::new();
    let mut store = RecordStore::open(dir.path(), options()).expect("should open");
    for (i, &len) in sizes.iter().enumerate() {
        let id = store
            .insert(&payload(len, i as u8))
            .expect("should insert");
        ids.push(id);
    }
    store.close().expect("should close");

    let mut store = RecordStore::open(dir.path(), options()).expect("should reopen");
    for (i, (&id, &len)) in ids.iter().zip(&sizes).enumerate() {
        let fetched = store
            .fetch(id)
            .expect("should fetch")
            .expect("record exists");
        assert_eq!(fetched, payload(len, i as u8), "payload {i} of {len} bytes");
    }
    store.close().expect("should close");
}

#[test]
fn id_stays_stable_through_growth_and_shrink() {
    let dir = tempfile::tempdir().expect("should create temp dir");
    let mut store = RecordStore::open(dir.path(), options()).expect("should open");

    let id = store.insert(b"seed").expect("should insert");
    for (len, seed) in [(3000usize, 1u8), (10, 2), (900, 3), (0, 4), (450, 5)] {
        store.update(id, &payload(len, seed)).expect("should update");
        assert_eq!(
            store
                .fetch(id)
                .expect("should fetch")
                .expect("record exists"),
            payload(len, seed)
        );
    }
    store.commit().expect("should commit");
    store.close().expect("should close");

    let mut store = RecordStore::open(dir.path(), options()).expect("should reopen");
    assert_eq!(
        store
            .fetch(id)
            .expect("should fetch")
            .expect("record exists"),
        payload(450, 5)
    );
    store.close().expect("should close");
}

#[test]
fn deleted_ids_and_slots_are_recycled() {
    let dir = tempfile::tempdir().expect("should create temp dir");
    let mut store = RecordStore::open(dir.path(), options()).expect("should open");

    let mut ids = Vec::new();
    for i in 0..50u8 {
        ids.push(store.insert(&payload(60, i)).expect("should insert"));
    }
    for id in ids.iter().step_by(2) {
        store.delete(*id).expect("should delete");
    }
    store.commit().expect("should commit");

    for i in 0..25u8 {
        let id = store.insert(&payload(60, 100 + i)).expect("should insert");
        assert!(
            ids.contains(&id),
            "freed logical id should be handed out again"
        );
    }
    for (i, id) in ids.iter().enumerate().skip(1).step_by(2) {
        assert_eq!(
            store
                .fetch(*id)
                .expect("should fetch")
                .expect("record exists"),
            payload(60, i as u8),
            "surviving record {i} intact after recycling"
        );
    }
    store.close().expect("should close");
}

#[test]
fn committed_data_survives_a_crash() {
    let dir = tempfile::tempdir().expect("should create temp dir");
    let id = {
        let mut store = RecordStore::open(dir.path(), options()).expect("should open");
        let id = store.insert(&payload(700, 9)).expect("should insert");
        store.commit().expect("should commit");
        id
        // Dropped without close: the commit lives only in the redo log.
    };

    let mut store = RecordStore::open(dir.path(), options()).expect("should reopen");
    assert_eq!(
        store
            .fetch(id)
            .expect("should fetch")
            .expect("record exists"),
        payload(700, 9)
    );
    store.close().expect("should close");
}

#[test]
fn uncommitted_data_does_not_survive_a_crash() {
    let dir = tempfile::tempdir().expect("should create temp dir");
    let (kept, lost) = {
        let mut store = RecordStore::open(dir.path(), options()).expect("should open");
        let kept = store.insert(b"durable").expect("should insert");
        store.commit().expect("should commit");
        let lost = store.insert(b"volatile").expect("should insert");
        (kept, lost)
    };

    let mut store = RecordStore::open(dir.path(), options()).expect("should reopen");
    assert_eq!(
        store
            .fetch(kept)
            .expect("should fetch")
            .expect("record exists"),
        b"durable"
    );
    assert!(store.fetch(lost).expect("should fetch").is_none());
    store.close().expect("should close");
}

#[test]
fn torn_log_tail_is_ignored_on_recovery() {
    let dir = tempfile::tempdir().expect("should create temp dir");
    let id = {
        let mut store = RecordStore::open(dir.path(), options()).expect("should open");
        let id = store.insert(&payload(200, 3)).expect("should insert");
        store.commit().expect("should commit");
        id
    };

    // Simulate a crash mid-append: a batch header promising five pages with
    // no page content behind it.
    let mut log = OpenOptions::new()
        .append(true)
        .open(dir.path().join("redo.log"))
        .expect("log file exists after a commit-only run");
    log.write_all(&[5]).expect("should append");
    drop(log);

    let mut store = RecordStore::open(dir.path(), options()).expect("should reopen");
    assert_eq!(
        store
            .fetch(id)
            .expect("should fetch")
            .expect("record exists"),
        payload(200, 3)
    );
    store.close().expect("should close");
}

#[test]
fn rollback_is_clean_across_many_operations() {
    let dir = tempfile::tempdir().expect("should create temp dir");
    let mut store = RecordStore::open(dir.path(), options()).expect("should open");

    let a = store.insert(&payload(100, 1)).expect("should insert");
    let b = store.insert(&payload(1400, 2)).expect("should insert");
    store.set_root(0, a);
    store.commit().expect("should commit");

    store.delete(a).expect("should delete");
    store.update(b, &payload(40, 3)).expect("should update");
    store.insert(&payload(5000, 4)).expect("should insert");
    store.set_root(0, 777);
    store.rollback().expect("should rollback");

    assert_eq!(store.get_root(0), a);
    assert_eq!(
        store
            .fetch(a)
            .expect("should fetch")
            .expect("record exists"),
        payload(100, 1)
    );
    assert_eq!(
        store
            .fetch(b)
            .expect("should fetch")
            .expect("record exists"),
        payload(1400, 2)
    );
    store.close().expect("should close");
}

#[test]
fn non_transactional_store_round_trips() {
    let dir = tempfile::tempdir().expect("should create temp dir");
    let mut store = RecordStore::open(dir.path(), options().transactions(false))
        .expect("should open");
    let id = store.insert(&payload(800, 6)).expect("should insert");
    store.commit().expect("should commit");
    store.close().expect("should close");

    let mut store = RecordStore::open(dir.path(), options().transactions(false))
        .expect("should reopen");
    assert_eq!(
        store
            .fetch(id)
            .expect("should fetch")
            .expect("record exists"),
        payload(800, 6)
    );
    assert!(!dir.path().join("redo.log").exists(), "no log without transactions");
    store.close().expect("should close");
}

#[test]
fn roots_partition_independent_structures() {
    let dir = tempfile::tempdir().expect("should create temp dir");
    let mut store = RecordStore::open(dir.path(), options()).expect("should open");

    let head_a = store.insert(b"list a head").expect("should insert");
    let head_b = store.insert(b"list b head").expect("should insert");
    store.set_root(1, head_a);
    store.set_root(2, head_b);
    store.close().expect("should close");

    let mut store = RecordStore::open(dir.path(), options()).expect("should reopen");
    let a = store.get_root(1);
    let b = store.get_root(2);
    assert_ne!(a, b);
    assert_eq!(
        store.fetch(a).expect("should fetch").expect("record exists"),
        b"list a head"
    );
    assert_eq!(
        store.fetch(b).expect("should fetch").expect("record exists"),
        b"list b head"
    );
    store.close().expect("should close");
}

//! End-to-end store scenarios: kernels issuing PUT/GET/DELETE and async GET
//! against the fabric, exercised over the in-memory and persistent backends.

use std::sync::Arc;
use std::time::Duration;

use gridkv::prelude::*;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn memory_store(config: StoreConfig) -> KvStore {
    let store = KvStore::new(config, Arc::new(MemoryBackend::new())).unwrap();
    store.open_db().unwrap();
    store
}

fn le_key(key: u32) -> [u8; 4] {
    key.to_le_bytes()
}

#[test]
fn s1_single_put_get() {
    init_logging();
    let store = memory_store(StoreConfig::new(1, 32, 4, 16, 4, 1));
    let value = b"helloworld______";
    let out = SingleBuffer::new(16).unwrap();

    store
        .launch_kernel(|ctx| {
            assert_eq!(store.put(ctx, &le_key(1), value), KvStatus::Success);
            assert_eq!(store.get(ctx, &le_key(1), &out), KvStatus::Success);
        })
        .unwrap();

    let mut got = [0u8; 16];
    out.read(&mut got);
    assert_eq!(&got, value);
    store.close_db().unwrap();
}

/// Value layout used by the batched scenarios: first 4 bytes encode the key
/// little-endian, remainder zero.
fn keyed_value(key: u32) -> [u8; 16] {
    let mut value = [0u8; 16];
    value[..4].copy_from_slice(&key.to_le_bytes());
    value
}

#[test]
fn s2_batched_multi_get() {
    init_logging();
    let store = memory_store(StoreConfig::new(1, 32, 8, 16, 4, 8));

    let keys: Vec<[u8; 4]> = (1..=8).map(le_key).collect();
    let key_refs: Vec<&[u8]> = keys.iter().map(|k| &k[..]).collect();
    let values: Vec<[u8; 16]> = (1..=8).map(keyed_value).collect();
    let value_refs: Vec<&[u8]> = values.iter().map(|v| &v[..]).collect();

    let put_statuses = StatusBuffer::new(8).unwrap();
    let get_statuses = StatusBuffer::new(8).unwrap();
    let out = MultiBuffer::new(8, 16).unwrap();

    store
        .launch_kernel(|ctx| {
            store.multi_put(ctx, &key_refs, &value_refs, &put_statuses);
            store.multi_get(ctx, &key_refs, &out, &get_statuses);
        })
        .unwrap();

    for i in 0..8 {
        assert_eq!(put_statuses.get(i), KvStatus::Success);
        assert_eq!(get_statuses.get(i), KvStatus::Success);
        let mut got = [0u8; 16];
        out.read_elem(i, &mut got);
        assert_eq!(got, keyed_value(i as u32 + 1), "value mismatch for key {}", i + 1);
    }
    store.close_db().unwrap();
}

#[test]
fn s3_absent_key() {
    init_logging();
    let store = memory_store(StoreConfig::new(1, 32, 4, 16, 4, 1));
    let out = SingleBuffer::new(16).unwrap();

    store
        .launch_kernel(|ctx| {
            let status = store.get(ctx, &0xDEAD_BEEFu32.to_le_bytes(), &out);
            assert_eq!(status, KvStatus::NonExist);
        })
        .unwrap();
    store.close_db().unwrap();
}

#[test]
fn s4_async_pipeline_depth_10() {
    init_logging();
    const DEPTH: usize = 10;
    const BATCH: usize = 32;
    let store = memory_store(StoreConfig::new(1, 8, 64, 16, 4, BATCH));

    // 320 distinct keys, pre-put in batches of 32.
    let keys: Vec<[u8; 4]> = (0..(DEPTH * BATCH) as u32).map(le_key).collect();
    let values: Vec<[u8; 16]> = (0..(DEPTH * BATCH) as u32).map(keyed_value).collect();
    let batch_keys: Vec<Vec<&[u8]>> = (0..DEPTH)
        .map(|d| keys[d * BATCH..(d + 1) * BATCH].iter().map(|k| &k[..]).collect())
        .collect();
    let batch_values: Vec<Vec<&[u8]>> = (0..DEPTH)
        .map(|d| values[d * BATCH..(d + 1) * BATCH].iter().map(|v| &v[..]).collect())
        .collect();

    let put_statuses = StatusBuffer::new(BATCH).unwrap();
    let value_bufs: Vec<MultiBuffer> = (0..DEPTH)
        .map(|_| MultiBuffer::new(BATCH, 16).unwrap())
        .collect();
    let status_bufs: Vec<StatusBuffer> = (0..DEPTH)
        .map(|_| StatusBuffer::new(BATCH).unwrap())
        .collect();

    store
        .launch_kernel(|ctx| {
            for d in 0..DEPTH {
                store.multi_put(ctx, &batch_keys[d], &batch_values[d], &put_statuses);
            }
            // Ten initiates, then ten finalizes in the same order.
            let mut tickets = [0u32; DEPTH];
            for d in 0..DEPTH {
                tickets[d] = unsafe {
                    store.async_get_initiate(ctx, &batch_keys[d], &value_bufs[d], &status_bufs[d])
                };
            }
            for d in 0..DEPTH {
                store.async_get_finalize(ctx, tickets[d]);
            }
        })
        .unwrap();

    for d in 0..DEPTH {
        for i in 0..BATCH {
            assert_eq!(status_bufs[d].get(i), KvStatus::Success, "batch {d} key {i}");
            let mut got = [0u8; 16];
            value_bufs[d].read_elem(i, &mut got);
            assert_eq!(got, keyed_value((d * BATCH + i) as u32), "batch {d} key {i}");
        }
    }
    store.close_db().unwrap();
}

#[test]
fn s5_backpressure_with_delayed_worker() {
    init_logging();
    let config = StoreConfig::new(1, 4, 2, 8, 4, 1).with_worker_delay(Duration::from_millis(1));
    let store = memory_store(config);
    let out = SingleBuffer::new(8).unwrap();

    store
        .launch_kernel(|ctx| {
            for i in 0..100u32 {
                let mut value = [0u8; 8];
                value[..4].copy_from_slice(&i.to_le_bytes());
                assert_eq!(store.put(ctx, &le_key(i), &value), KvStatus::Success);
            }
            // Every put completed; nothing was lost to the full ring.
            for i in 0..100u32 {
                assert_eq!(store.get(ctx, &le_key(i), &out), KvStatus::Success);
            }
        })
        .unwrap();
    store.close_db().unwrap();
}

#[test]
fn s6_clean_shutdown() {
    init_logging();
    let store = memory_store(StoreConfig::new(1, 32, 8, 16, 4, 8));

    let keys: Vec<[u8; 4]> = (1..=8).map(le_key).collect();
    let key_refs: Vec<&[u8]> = keys.iter().map(|k| &k[..]).collect();
    let values: Vec<[u8; 16]> = (1..=8).map(keyed_value).collect();
    let value_refs: Vec<&[u8]> = values.iter().map(|v| &v[..]).collect();
    let statuses = StatusBuffer::new(8).unwrap();

    store
        .launch_kernel(|ctx| store.multi_put(ctx, &key_refs, &value_refs, &statuses))
        .unwrap();

    store.close_db().unwrap();
    store.delete_db().unwrap();
}

#[test]
fn idempotent_close_reports_error_not_ub() {
    init_logging();
    let store = memory_store(StoreConfig::new(1, 2, 4, 8, 4, 1));
    store.close_db().unwrap();
    assert!(store.close_db().is_err());
    assert!(store.close_db().is_err());
}

#[test]
fn open_twice_is_an_error() {
    init_logging();
    let store = memory_store(StoreConfig::new(1, 2, 4, 8, 4, 1));
    assert!(store.open_db().is_err());
    store.close_db().unwrap();
}

#[test]
fn construction_rejects_bad_geometry() {
    let backend: Arc<dyn KvBackend> = Arc::new(MemoryBackend::new());
    assert!(KvStore::new(StoreConfig::new(1, 32, 2, 16, 4, 8), backend.clone()).is_err());
    assert!(KvStore::new(StoreConfig::new(0, 32, 8, 16, 4, 8), backend.clone()).is_err());
    assert!(KvStore::new(StoreConfig::new(1, 32, 8, 0, 4, 8), backend).is_err());
}

#[test]
fn delete_then_get_reports_non_exist() {
    init_logging();
    let store = memory_store(StoreConfig::new(1, 8, 4, 16, 4, 1));
    let out = SingleBuffer::new(16).unwrap();

    store
        .launch_kernel(|ctx| {
            assert_eq!(store.put(ctx, &le_key(9), &keyed_value(9)), KvStatus::Success);
            assert_eq!(store.delete(ctx, &le_key(9)), KvStatus::Success);
            assert_eq!(store.delete(ctx, &le_key(9)), KvStatus::NonExist);
            assert_eq!(store.get(ctx, &le_key(9), &out), KvStatus::NonExist);
        })
        .unwrap();
    store.close_db().unwrap();
}

#[test]
fn async_equals_sync_multi_get() {
    init_logging();
    let store = memory_store(StoreConfig::new(1, 8, 16, 16, 4, 4));

    let keys: Vec<[u8; 4]> = (100..104).map(le_key).collect();
    let key_refs: Vec<&[u8]> = keys.iter().map(|k| &k[..]).collect();
    let values: Vec<[u8; 16]> = (100..104).map(keyed_value).collect();
    let value_refs: Vec<&[u8]> = values.iter().map(|v| &v[..]).collect();

    let put_statuses = StatusBuffer::new(4).unwrap();
    let sync_out = MultiBuffer::new(4, 16).unwrap();
    let sync_statuses = StatusBuffer::new(4).unwrap();
    let async_out = MultiBuffer::new(4, 16).unwrap();
    let async_statuses = StatusBuffer::new(4).unwrap();

    store
        .launch_kernel(|ctx| {
            store.multi_put(ctx, &key_refs, &value_refs, &put_statuses);
            store.multi_get(ctx, &key_refs, &sync_out, &sync_statuses);
            let ticket =
                unsafe { store.async_get_initiate(ctx, &key_refs, &async_out, &async_statuses) };
            store.async_get_finalize(ctx, ticket);
        })
        .unwrap();

    for i in 0..4 {
        assert_eq!(sync_statuses.get(i), async_statuses.get(i));
        let mut sync_value = [0u8; 16];
        let mut async_value = [0u8; 16];
        sync_out.read_elem(i, &mut sync_value);
        async_out.read_elem(i, &mut async_value);
        assert_eq!(sync_value, async_value);
    }
    store.close_db().unwrap();
}

#[test]
fn blocks_operate_independently() {
    init_logging();
    let store = memory_store(StoreConfig::new(2, 8, 4, 16, 4, 1));
    let outs: Vec<SingleBuffer> = (0..2).map(|_| SingleBuffer::new(16).unwrap()).collect();

    store
        .launch_kernel(|ctx| {
            let block = ctx.block_index() as u32;
            // Per-block FIFO: each block issues an ordered sequence against
            // its own ring and observes its own responses in order.
            for i in 0..20u32 {
                let key = le_key(block * 1000 + i);
                assert_eq!(store.put(ctx, &key, &keyed_value(i)), KvStatus::Success);
                assert_eq!(store.get(ctx, &key, &outs[ctx.block_index()]), KvStatus::Success);
                let mut got = [0u8; 16];
                outs[ctx.block_index()].read(&mut got);
                assert_eq!(&got[..4], &i.to_le_bytes());
            }
        })
        .unwrap();
    store.close_db().unwrap();
}

#[test]
fn round_trip_survives_random_value_bytes() {
    init_logging();
    let store = memory_store(StoreConfig::new(1, 4, 8, 32, 8, 4));

    // Deterministic xorshift fill so the test is reproducible.
    let mut seed = 0x2545_F491u32;
    let mut next = move || {
        seed ^= seed << 13;
        seed ^= seed >> 17;
        seed ^= seed << 5;
        seed
    };
    let values: Vec<[u8; 32]> = (0..16)
        .map(|_| {
            let mut value = [0u8; 32];
            for chunk in value.chunks_exact_mut(4) {
                chunk.copy_from_slice(&next().to_le_bytes());
            }
            value
        })
        .collect();

    let out = SingleBuffer::new(32).unwrap();
    store
        .launch_kernel(|ctx| {
            for (i, value) in values.iter().enumerate() {
                let key = (i as u64).to_le_bytes();
                assert_eq!(store.put(ctx, &key, value), KvStatus::Success);
                assert_eq!(store.get(ctx, &key, &out), KvStatus::Success);
                let mut got = [0u8; 32];
                out.read(&mut got);
                assert_eq!(&got, value, "bit-exact round trip failed for key {i}");
            }
        })
        .unwrap();
    store.close_db().unwrap();
}

#[test]
fn persistent_backend_end_to_end() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let value = b"durable_payload_";

    {
        let backend = Arc::new(PersistentBackend::new("fabric", dir.path()));
        let store = KvStore::new(StoreConfig::new(1, 8, 4, 16, 4, 1), backend).unwrap();
        store.open_db().unwrap();
        store
            .launch_kernel(|ctx| {
                assert_eq!(store.put(ctx, &le_key(77), value), KvStatus::Success);
            })
            .unwrap();
        store.close_db().unwrap();
    }

    // A fresh store over the same identity sees the data.
    let backend = Arc::new(PersistentBackend::new("fabric", dir.path()));
    let store = KvStore::new(StoreConfig::new(1, 8, 4, 16, 4, 1), backend).unwrap();
    store.open_db().unwrap();
    let out = SingleBuffer::new(16).unwrap();
    store
        .launch_kernel(|ctx| {
            assert_eq!(store.get(ctx, &le_key(77), &out), KvStatus::Success);
        })
        .unwrap();
    let mut got = [0u8; 16];
    out.read(&mut got);
    assert_eq!(&got, value);
    store.close_db().unwrap();
    store.delete_db().unwrap();
}

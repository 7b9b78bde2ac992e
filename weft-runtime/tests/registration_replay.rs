//! Worker replacement and registration replay.

mod common;

use std::time::Duration;
use common::{init_tracing, test_registry, wait_until};
use weft_core::{Channel, Value};
use weft_runtime::{Pool, PoolConfig};

#[tokio::test]
async fn replacement_workers_receive_the_registration_history() {
    init_tracing();
    let pool = Pool::with_config(test_registry(), PoolConfig::default().with_workers(2)).unwrap();

    let chan = Channel::create(4, 128).unwrap();
    pool.register_channel("shared-data", chan.clone());

    // Kill every original worker so the next dispatch can only land on a
    // replacement.
    let originals = pool.worker_ids();
    assert_eq!(originals.len(), 2);
    for id in &originals {
        assert!(pool.kill_worker(*id));
    }

    let replaced = wait_until(Duration::from_secs(2), || {
        let current = pool.worker_ids();
        current.len() == 2 && current.iter().all(|id| !originals.contains(id))
    })
    .await;
    assert!(replaced, "replacements did not come up: {}", pool.stats());
    assert_eq!(pool.stats().replaced, 2);

    // The replay happened before the replacements went idle, so the lookup
    // resolves on whichever replacement takes the task.
    for _ in 0..4 {
        let visible = pool
            .submit_shared("channel_visible", vec![Value::string("shared-data")])
            .unwrap()
            .join()
            .await
            .unwrap();
        assert_eq!(visible, Value::bool(true));
    }

    // And the channel is usable end to end from a replacement worker.
    let sent = pool
        .submit_shared(
            "push_to",
            vec![Value::string("shared-data"), Value::int(7)],
        )
        .unwrap()
        .join()
        .await
        .unwrap();
    assert_eq!(sent, Value::int(1));
    assert_eq!(chan.receive().unwrap(), Value::int(7));

    pool.terminate().await;
}

#[tokio::test]
async fn late_registration_reaches_existing_workers() {
    init_tracing();
    let pool = Pool::with_config(test_registry(), PoolConfig::default().with_workers(1)).unwrap();

    let before = pool
        .submit_shared("channel_visible", vec![Value::string("late")])
        .unwrap()
        .join()
        .await
        .unwrap();
    assert_eq!(before, Value::bool(false));

    let chan = Channel::create(1, 64).unwrap();
    pool.register_channel("late", chan);

    let after = pool
        .submit_shared("channel_visible", vec![Value::string("late")])
        .unwrap()
        .join()
        .await
        .unwrap();
    assert_eq!(after, Value::bool(true));

    pool.terminate().await;
}

#[tokio::test]
async fn reregistering_an_id_replaces_the_handle() {
    init_tracing();
    let pool = Pool::with_config(test_registry(), PoolConfig::default().with_workers(1)).unwrap();

    let first = Channel::create(1, 64).unwrap();
    let second = Channel::create(1, 64).unwrap();
    pool.register_channel("slot", first.clone());
    pool.register_channel("slot", second.clone());

    pool.submit_shared("push_to", vec![Value::string("slot"), Value::int(9)])
        .unwrap()
        .join()
        .await
        .unwrap();

    // The newer registration won: the value landed on `second`.
    assert!(!first.has_data());
    assert_eq!(second.receive().unwrap(), Value::int(9));

    pool.terminate().await;
}

#[tokio::test]
async fn killed_idle_worker_is_replaced_up_to_the_bound() {
    init_tracing();
    let pool = Pool::with_config(test_registry(), PoolConfig::default().with_workers(3)).unwrap();

    let victim = pool.worker_ids()[0];
    assert!(pool.kill_worker(victim));

    let replaced = wait_until(Duration::from_secs(2), || {
        let ids = pool.worker_ids();
        ids.len() == 3 && !ids.contains(&victim)
    })
    .await;
    assert!(replaced, "pool did not return to its bound: {}", pool.stats());

    // The pool still serves work afterwards.
    let result = pool
        .submit("square", vec![Value::int(6)])
        .unwrap()
        .join()
        .await
        .unwrap();
    assert_eq!(result, Value::int(36));

    pool.terminate().await;
}

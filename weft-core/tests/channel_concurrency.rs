//! Channel behaviour under concurrent load.
//!
//! Exercises FIFO ordering, bounded occupancy, and the no-lost-wake-up
//! guarantee after close with real thread interleavings.

use std::collections::HashMap;
use std::thread;
use std::time::{Duration, Instant};
use weft_core::{Channel, Value, WeftError};

#[test]
fn fifo_order_survives_ring_wraparound() {
    let chan = Channel::create(2, 64).unwrap();
    const COUNT: i64 = 500;

    let sender = chan.clone();
    let producer = thread::spawn(move || {
        for i in 0..COUNT {
            sender.send(&Value::int(i)).unwrap();
        }
        sender.close();
    });

    let received: Vec<Value> = chan.drain().collect::<Result<_, _>>().unwrap();
    producer.join().unwrap();

    let expected: Vec<Value> = (0..COUNT).map(Value::int).collect();
    assert_eq!(received, expected);
}

#[test]
fn per_sender_order_is_preserved_with_many_senders() {
    let chan = Channel::create(4, 64).unwrap();
    const SENDERS: i64 = 4;
    const PER_SENDER: i64 = 100;

    let mut producers = Vec::new();
    for sender_id in 0..SENDERS {
        let sender = chan.clone();
        producers.push(thread::spawn(move || {
            for seq in 0..PER_SENDER {
                let value = Value(serde_json::json!({"sender": sender_id, "seq": seq}));
                sender.send(&value).unwrap();
            }
        }));
    }

    let receiver = chan.clone();
    let consumer = thread::spawn(move || {
        let mut seen: Vec<(i64, i64)> = Vec::new();
        for _ in 0..SENDERS * PER_SENDER {
            let value = receiver.receive().unwrap();
            let sender = value.inner()["sender"].as_i64().unwrap();
            let seq = value.inner()["seq"].as_i64().unwrap();
            seen.push((sender, seq));
        }
        seen
    });

    for producer in producers {
        producer.join().unwrap();
    }
    let seen = consumer.join().unwrap();

    // Every value arrived exactly once, and each sender's own sequence is
    // consumed in commit order.
    assert_eq!(seen.len() as i64, SENDERS * PER_SENDER);
    let mut next_seq: HashMap<i64, i64> = HashMap::new();
    for (sender, seq) in seen {
        let expected = next_seq.entry(sender).or_insert(0);
        assert_eq!(seq, *expected, "sender {} out of order", sender);
        *expected += 1;
    }
}

#[test]
fn occupancy_never_exceeds_capacity() {
    let chan = Channel::create(3, 64).unwrap();

    let sender = chan.clone();
    let producer = thread::spawn(move || {
        for i in 0..200 {
            sender.send(&Value::int(i)).unwrap();
        }
        sender.close();
    });

    let mut received = 0u32;
    loop {
        let status = chan.status();
        assert!(status.in_flight() <= 3, "occupancy {} over bound", status);

        match chan.try_receive() {
            Ok(Some(_)) => received += 1,
            Ok(None) => thread::yield_now(),
            Err(WeftError::ClosedAndEmpty) => break,
            Err(e) => panic!("unexpected receive failure: {e}"),
        }
    }
    producer.join().unwrap();
    assert_eq!(received, 200);
}

#[test]
fn close_releases_all_blocked_waiters_promptly() {
    let chan = Channel::create(1, 64).unwrap();
    chan.send(&Value::int(0)).unwrap();

    // Park senders on the full buffer and receivers on a second, empty
    // channel; both directions must come back after close.
    let empty = Channel::create(1, 64).unwrap();
    let mut waiters = Vec::new();
    for _ in 0..4 {
        let sender = chan.clone();
        waiters.push(thread::spawn(move || sender.send(&Value::int(1))));
        let receiver = empty.clone();
        waiters.push(thread::spawn(move || receiver.receive().map(|_| ())));
    }

    thread::sleep(Duration::from_millis(30));
    let closed_at = Instant::now();
    chan.close();
    empty.close();

    for waiter in waiters {
        let result = waiter.join().unwrap();
        assert!(matches!(
            result,
            Err(WeftError::Closed) | Err(WeftError::ClosedAndEmpty)
        ));
    }
    // Every waiter observed the close within a few wait slices.
    assert!(closed_at.elapsed() < Duration::from_millis(500));
}

#[test]
fn rendezvous_pairs_many_senders_with_many_receivers() {
    let chan = Channel::create(0, 64).unwrap();
    const PAIRS: i64 = 8;

    let mut senders = Vec::new();
    for i in 0..PAIRS {
        let sender = chan.clone();
        senders.push(thread::spawn(move || sender.send(&Value::int(i))));
    }

    let mut receivers = Vec::new();
    for _ in 0..PAIRS {
        let receiver = chan.clone();
        receivers.push(thread::spawn(move || {
            receiver.receive().unwrap().as_i64().unwrap()
        }));
    }

    for sender in senders {
        sender.join().unwrap().unwrap();
    }
    let mut got: Vec<i64> = receivers
        .into_iter()
        .map(|r| r.join().unwrap())
        .collect();
    got.sort_unstable();
    assert_eq!(got, (0..PAIRS).collect::<Vec<_>>());

    let status = chan.status();
    assert_eq!(status.write_index, PAIRS as u32);
    assert_eq!(status.read_index, PAIRS as u32);
}

#[test]
fn closed_receivers_see_every_send_committed_before_close() {
    let chan = Channel::create(8, 64).unwrap();
    for i in 0..5 {
        chan.send(&Value::int(i)).unwrap();
    }
    chan.close();

    let receiver = chan.clone();
    let drained = thread::spawn(move || {
        receiver
            .drain()
            .collect::<Result<Vec<_>, _>>()
            .unwrap()
            .len()
    });
    assert_eq!(drained.join().unwrap(), 5);
}

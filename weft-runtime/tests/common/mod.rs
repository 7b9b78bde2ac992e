//! Common test utilities for integration tests.

#![allow(dead_code)]

use std::sync::Once;
use std::time::Duration;
use weft_core::{Value, WeftError};
use weft_runtime::TaskRegistry;

static TRACING: Once = Once::new();

/// Install a per-process test subscriber once; honours `RUST_LOG`.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Registry with the task bodies the integration suites share.
pub fn test_registry() -> TaskRegistry {
    let mut registry = TaskRegistry::new();

    registry.register("square", |args| {
        let n = args.first().and_then(Value::as_i64).unwrap_or(0);
        Ok(Value::int(n * n))
    });

    registry.register("ok_after", |args| {
        let ms = args.first().and_then(Value::as_i64).unwrap_or(0);
        std::thread::sleep(Duration::from_millis(ms as u64));
        Ok(Value::string("ok"))
    });

    registry.register("boom_after", |args| {
        let ms = args.first().and_then(Value::as_i64).unwrap_or(0);
        std::thread::sleep(Duration::from_millis(ms as u64));
        panic!("boom");
    });

    // Shared entry: resolves a channel by id and pushes the remaining
    // arguments into it.
    registry.register_shared("push_to", |channels, args| {
        let id = args
            .first()
            .and_then(Value::as_str)
            .ok_or_else(|| WeftError::TaskFailed {
                cause: "first argument must be a channel id".to_string(),
            })?
            .to_string();
        let channel = channels.get(&id).ok_or_else(|| WeftError::TaskFailed {
            cause: format!("channel '{}' is not registered", id),
        })?;
        for value in &args[1..] {
            channel.send(value)?;
        }
        Ok(Value::int((args.len() - 1) as i64))
    });

    // Shared entry: reports whether a channel id resolves on this worker.
    registry.register_shared("channel_visible", |channels, args| {
        let id = args.first().and_then(Value::as_str).unwrap_or_default();
        Ok(Value::bool(channels.get(id).is_some()))
    });

    registry
}

/// Poll `probe` every few milliseconds until it returns true or `timeout`
/// elapses.
pub async fn wait_until(timeout: Duration, mut probe: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if probe() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    probe()
}

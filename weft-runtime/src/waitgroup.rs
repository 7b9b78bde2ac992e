//! Aggregation of outstanding task completions.

use crate::pool::TaskHandle;
use tokio::task::JoinSet;
use weft_core::{Result, Value};

/// Collects task handles and resolves once all of them have completed.
///
/// Results come back in add-order. If any handle rejects, `wait` rejects
/// with the first failure observed (in completion order) and stops
/// collecting. After `wait` returns the group is empty and reusable.
///
/// # Example
///
/// ```no_run
/// # async fn demo(pool: weft_runtime::Pool) -> weft_core::Result<()> {
/// use weft_runtime::WaitGroup;
/// use weft_core::Value;
///
/// let mut group = WaitGroup::new();
/// for i in 0..4 {
///     group.add(pool.submit("square", vec![Value::int(i)])?);
/// }
/// let results = group.wait().await?;
/// assert_eq!(results.len(), 4);
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct WaitGroup {
    handles: Vec<TaskHandle>,
}

impl WaitGroup {
    /// Create an empty group.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a completion handle.
    pub fn add(&mut self, handle: TaskHandle) {
        self.handles.push(handle);
    }

    /// Number of entries not yet collected by [`WaitGroup::wait`]. Advisory.
    #[must_use]
    pub fn count(&self) -> usize {
        self.handles.len()
    }

    /// Whether the group currently holds no handles.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Wait for every added handle.
    ///
    /// # Errors
    ///
    /// The first rejection observed, in completion order; remaining handles
    /// are dropped (their tasks keep running in the pool).
    pub async fn wait(&mut self) -> Result<Vec<Value>> {
        let handles = std::mem::take(&mut self.handles);
        let total = handles.len();

        let mut collectors = JoinSet::new();
        for (index, handle) in handles.into_iter().enumerate() {
            collectors.spawn(async move { (index, handle.join().await) });
        }

        let mut results: Vec<Option<Value>> = vec![None; total];
        while let Some(joined) = collectors.join_next().await {
            let (index, result) = joined.expect("waitgroup collector never aborts");
            match result {
                Ok(value) => results[index] = Some(value),
                Err(e) => {
                    collectors.abort_all();
                    return Err(e);
                }
            }
        }

        Ok(results
            .into_iter()
            .map(|r| r.expect("every collector reported"))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::oneshot;
    use weft_core::{TaskId, WeftError};

    fn handle_resolving_after(
        value: Result<Value>,
        delay: Duration,
    ) -> TaskHandle {
        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(value);
        });
        TaskHandle::from_parts(TaskId::new(), rx)
    }

    #[tokio::test]
    async fn empty_group_resolves_immediately() {
        let mut group = WaitGroup::new();
        assert!(group.is_empty());
        assert_eq!(group.wait().await.unwrap(), Vec::<Value>::new());
    }

    #[tokio::test]
    async fn results_come_back_in_add_order() {
        let mut group = WaitGroup::new();
        // The first handle resolves last; order must still be add-order.
        group.add(handle_resolving_after(
            Ok(Value::int(1)),
            Duration::from_millis(60),
        ));
        group.add(handle_resolving_after(
            Ok(Value::int(2)),
            Duration::from_millis(10),
        ));
        group.add(handle_resolving_after(
            Ok(Value::int(3)),
            Duration::from_millis(30),
        ));
        assert_eq!(group.count(), 3);

        let results = group.wait().await.unwrap();
        assert_eq!(results, vec![Value::int(1), Value::int(2), Value::int(3)]);
        assert_eq!(group.count(), 0);
    }

    #[tokio::test]
    async fn first_failure_observed_wins() {
        let mut group = WaitGroup::new();
        group.add(handle_resolving_after(
            Ok(Value::string("ok")),
            Duration::from_millis(50),
        ));
        group.add(handle_resolving_after(
            Err(WeftError::TaskFailed {
                cause: "boom".to_string(),
            }),
            Duration::from_millis(10),
        ));

        let err = group.wait().await.unwrap_err();
        assert!(err.to_string().contains("boom"));
    }

    #[tokio::test]
    async fn group_is_reusable_after_wait() {
        let mut group = WaitGroup::new();
        group.add(handle_resolving_after(
            Ok(Value::int(1)),
            Duration::from_millis(5),
        ));
        assert_eq!(group.wait().await.unwrap(), vec![Value::int(1)]);

        group.add(handle_resolving_after(
            Ok(Value::int(2)),
            Duration::from_millis(5),
        ));
        assert_eq!(group.wait().await.unwrap(), vec![Value::int(2)]);
    }
}

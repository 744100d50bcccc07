//! Off-thread diffing for large payloads.
//!
//! Payloads above the configured node count are diffed on the rayon pool.
//! Snapshots go in as `Arc<Value>`, the patch comes back over a oneshot.
//! A panicking diff is caught and reported as [`DiffError::Panicked`].

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tokio::sync::oneshot;

use super::{DiffOptions, Patch, diff_with};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DiffError {
    #[error("diff panicked")]
    Panicked,

    #[error("diff worker dropped the result")]
    WorkerLost,
}

/// Number of JSON nodes in a value.
pub fn value_size(value: &Value) -> usize {
    match value {
        Value::Array(items) => 1 + items.iter().map(value_size).sum::<usize>(),
        Value::Object(map) => 1 + map.values().map(value_size).sum::<usize>(),
        _ => 1,
    }
}

/// Diff two payloads, offloading to rayon when they hold at least
/// `offload_threshold` nodes combined.
pub async fn diff_payloads(
    old: Arc<Value>,
    new: Arc<Value>,
    options: DiffOptions,
    offload_threshold: usize,
) -> Result<Option<Patch>, DiffError> {
    if value_size(&old) + value_size(&new) < offload_threshold {
        return catch_unwind(AssertUnwindSafe(|| diff_with(&old, &new, options)))
            .map_err(|_| DiffError::Panicked);
    }

    let (tx, rx) = oneshot::channel();
    rayon::spawn(move || {
        let result = catch_unwind(AssertUnwindSafe(|| diff_with(&old, &new, options)))
            .map_err(|_| DiffError::Panicked);
        let _ = tx.send(result);
    });
    rx.await.map_err(|_| DiffError::WorkerLost)?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::apply;
    use serde_json::json;

    #[test]
    fn test_value_size() {
        assert_eq!(value_size(&json!(1)), 1);
        assert_eq!(value_size(&json!([1, 2])), 3);
        assert_eq!(value_size(&json!({"a": [1], "b": null})), 4);
    }

    #[tokio::test]
    async fn test_inline_below_threshold() {
        let old = Arc::new(json!({"a": 1}));
        let new = Arc::new(json!({"a": 2}));
        let patch = diff_payloads(old, new, DiffOptions::default(), usize::MAX)
            .await
            .unwrap();
        assert!(patch.is_some());
    }

    #[tokio::test]
    async fn test_offloaded_matches_inline() {
        let old: Value = (0..200).map(|i| json!({"i": i})).collect();
        let new: Value = (0..200).rev().map(|i| json!({"i": i})).collect();
        let patch = diff_payloads(Arc::new(old.clone()), Arc::new(new.clone()), DiffOptions::default(), 0)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(apply(old, &patch).unwrap(), new);
    }

    #[tokio::test]
    async fn test_offloaded_equal_is_none() {
        let value = Arc::new(json!([1, 2, 3]));
        let patch = diff_payloads(value.clone(), value, DiffOptions::default(), 0)
            .await
            .unwrap();
        assert!(patch.is_none());
    }
}

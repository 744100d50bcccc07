//! Structural diff and patch of JSON payloads.
//!
//! [`diff`] produces a [`Patch`] that turns one payload into another;
//! [`apply`] replays it. The contract is `apply(old, diff(old, new)) == new`
//! and `diff(x, x) == None`.
//!
//! ```text
//! Patch
//!  ├── Insert(value)      replace with a literal
//!  ├── Remove             drop an object key
//!  ├── Object(key→Patch)  per-key changes, unchanged keys omitted
//!  └── Array { len, ops } sequence of:
//!        Insert(values)           literal run
//!        Copy { from, len }       run copied from the old array
//!        Nested { at, from, patch } old[from] patched into new[at]
//! ```
//!
//! Array diffs index old elements by [`ParsedValue`] (sentinels for
//! null/bool, literals for numbers/strings, structural hashes for
//! composites) so identical composites compare in O(1).

mod apply;
mod array;
mod parsed;
pub mod worker;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

pub use apply::apply;
pub use parsed::ParsedValue;
pub use worker::{DiffError, diff_payloads, value_size};

/// A structural patch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", content = "value", rename_all = "snake_case")]
pub enum Patch {
    /// Replace the value.
    Insert(Value),
    /// Remove the key holding this value (object members only).
    Remove,
    /// Rebuild an array from old elements and literals.
    Array(ArrayPatch),
    /// Per-key changes of an object.
    Object(BTreeMap<String, Patch>),
}

/// Array rebuild instructions; ops cover the new array left to right.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrayPatch {
    /// Length of the resulting array.
    pub len: usize,
    pub ops: Vec<ArrayOp>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ArrayOp {
    /// Literal run.
    Insert { values: Vec<Value> },
    /// Copy `len` old elements starting at `from`.
    Copy { from: usize, len: usize },
    /// New element at `at` is old element `from` with `patch` applied.
    Nested {
        at: usize,
        from: usize,
        patch: Box<Patch>,
    },
}

impl ArrayOp {
    /// Number of new elements this op produces.
    pub fn produced(&self) -> usize {
        match self {
            Self::Insert { values } => values.len(),
            Self::Copy { len, .. } => *len,
            Self::Nested { .. } => 1,
        }
    }
}

/// Errors raised when a patch does not fit the value it is applied to.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PatchError {
    #[error("expected {expected} at patch target")]
    TypeMismatch { expected: &'static str },

    #[error("remove applied outside of an object")]
    UnexpectedRemove,

    #[error("source index {index} out of bounds (old length {len})")]
    OutOfBounds { index: usize, len: usize },

    #[error("nested op at {at} but {position} elements produced")]
    Misaligned { at: usize, position: usize },

    #[error("array patch produced {produced} elements, expected {expected}")]
    LengthMismatch { produced: usize, expected: usize },
}

/// Tunables for [`diff_with`].
#[derive(Debug, Clone, Copy)]
pub struct DiffOptions {
    /// Index the old array lazily when the new array is shorter.
    pub early_stop: bool,
}

impl Default for DiffOptions {
    fn default() -> Self {
        Self { early_stop: true }
    }
}

/// Diff two payloads with default options.
pub fn diff(old: &Value, new: &Value) -> Option<Patch> {
    diff_with(old, new, DiffOptions::default())
}

/// Diff two payloads. Returns `None` when they are structurally equal.
pub fn diff_with(old: &Value, new: &Value, options: DiffOptions) -> Option<Patch> {
    match (old, new) {
        (Value::Object(a), Value::Object(b)) => diff_objects(a, b, options),
        (Value::Array(a), Value::Array(b)) => array::diff_arrays(a, b, options),
        _ if old == new => None,
        _ => Some(Patch::Insert(new.clone())),
    }
}

fn diff_objects(old: &Map<String, Value>, new: &Map<String, Value>, options: DiffOptions) -> Option<Patch> {
    let mut changes = BTreeMap::new();

    for (key, new_value) in new {
        match old.get(key) {
            Some(old_value) => {
                if let Some(patch) = diff_with(old_value, new_value, options) {
                    changes.insert(key.clone(), patch);
                }
            }
            None => {
                changes.insert(key.clone(), Patch::Insert(new_value.clone()));
            }
        }
    }
    for key in old.keys() {
        if !new.contains_key(key) {
            changes.insert(key.clone(), Patch::Remove);
        }
    }

    (!changes.is_empty()).then_some(Patch::Object(changes))
}

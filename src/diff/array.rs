//! Array diff: copy runs, literal runs and nested patches.
//!
//! The new array is scanned left to right. Each element either extends the
//! current copy run, starts a copy run at an indexed old position, becomes a
//! nested patch of the old element at the same position (both composite), or
//! joins a literal run.
//!
//! When the new array is shorter and `early_stop` is on, the old array is
//! indexed lazily: only as far as needed to find the element being looked
//! up. A miss always indexes to the end before giving up, so lazy indexing
//! only changes which old position is picked, never the validity of the
//! result.

use rustc_hash::FxHashMap;
use serde_json::Value;
use smallvec::SmallVec;

use super::{ArrayOp, ArrayPatch, DiffOptions, ParsedValue, Patch, diff_with};

pub(super) fn diff_arrays(old: &[Value], new: &[Value], options: DiffOptions) -> Option<Patch> {
    if old == new {
        return None;
    }

    let old_parsed: Vec<ParsedValue> = old.iter().map(ParsedValue::of).collect();
    let lazy = options.early_stop && new.len() < old.len();
    let mut index = OldIndex::new(&old_parsed, lazy);
    let mut ops: Vec<ArrayOp> = Vec::new();

    for (at, value) in new.iter().enumerate() {
        let parsed = ParsedValue::of(value);

        // Extend the current copy run
        if let Some(ArrayOp::Copy { from, len }) = ops.last_mut() {
            let next = *from + *len;
            if next < old_parsed.len() && old_parsed[next] == parsed {
                *len += 1;
                continue;
            }
        }

        let cursor = copy_cursor(&ops);
        if let Some(from) = index.find(&parsed, cursor) {
            ops.push(ArrayOp::Copy { from, len: 1 });
            continue;
        }

        if let Some(old_parsed_at) = old_parsed.get(at)
            && parsed.same_composite_kind(old_parsed_at)
            && let Some(patch) = diff_with(&old[at], value, options)
        {
            ops.push(ArrayOp::Nested {
                at,
                from: at,
                patch: Box::new(patch),
            });
            continue;
        }

        match ops.last_mut() {
            Some(ArrayOp::Insert { values }) => values.push(value.clone()),
            _ => ops.push(ArrayOp::Insert {
                values: vec![value.clone()],
            }),
        }
    }

    Some(Patch::Array(ArrayPatch {
        len: new.len(),
        ops,
    }))
}

/// Old position right after the most recent copy run.
fn copy_cursor(ops: &[ArrayOp]) -> usize {
    ops.iter()
        .rev()
        .find_map(|op| match op {
            ArrayOp::Copy { from, len } => Some(from + len),
            _ => None,
        })
        .unwrap_or(0)
}

/// Parsed value → ascending old positions, filled eagerly or on demand.
struct OldIndex<'a> {
    parsed: &'a [ParsedValue],
    positions: FxHashMap<&'a ParsedValue, SmallVec<[usize; 2]>>,
    indexed: usize,
}

impl<'a> OldIndex<'a> {
    fn new(parsed: &'a [ParsedValue], lazy: bool) -> Self {
        let mut index = Self {
            parsed,
            positions: FxHashMap::default(),
            indexed: 0,
        };
        if !lazy {
            index.index_to_end();
        }
        index
    }

    fn index_to_end(&mut self) {
        while self.indexed < self.parsed.len() {
            self.index_next();
        }
    }

    fn index_next(&mut self) -> usize {
        let parsed: &'a [ParsedValue] = self.parsed;
        let pos = self.indexed;
        self.indexed += 1;
        self.positions.entry(&parsed[pos]).or_default().push(pos);
        pos
    }

    /// Old position holding `value`, preferring the first one at or after
    /// `cursor`.
    fn find(&mut self, value: &ParsedValue, cursor: usize) -> Option<usize> {
        if let Some(pos) = self.indexed_from(value, cursor) {
            return Some(pos);
        }
        while self.indexed < self.parsed.len() {
            let pos = self.index_next();
            if pos >= cursor && self.parsed[pos] == *value {
                return Some(pos);
            }
        }
        self.positions.get(value).and_then(|list| list.first().copied())
    }

    fn indexed_from(&self, value: &ParsedValue, cursor: usize) -> Option<usize> {
        let list = self.positions.get(value)?;
        let k = list.partition_point(|&p| p < cursor);
        list.get(k).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::apply;
    use serde_json::json;

    fn array_ops(patch: &Patch) -> &[ArrayOp] {
        match patch {
            Patch::Array(array) => &array.ops,
            other => panic!("expected array patch, got {other:?}"),
        }
    }

    #[test]
    fn test_equal_arrays_no_patch() {
        let a = vec![json!(1), json!({"x": 1})];
        assert!(diff_arrays(&a, &a.clone(), DiffOptions::default()).is_none());
    }

    #[test]
    fn test_removal_is_two_copy_runs() {
        let old = vec![json!(1), json!(2), json!(3)];
        let new = vec![json!(1), json!(3)];
        let patch = diff_arrays(&old, &new, DiffOptions::default()).unwrap();
        assert_eq!(
            array_ops(&patch),
            &[ArrayOp::Copy { from: 0, len: 1 }, ArrayOp::Copy { from: 2, len: 1 }]
        );
    }

    #[test]
    fn test_append_extends_with_literal_run() {
        let old = vec![json!("a"), json!("b")];
        let new = vec![json!("a"), json!("b"), json!("c"), json!("d")];
        let patch = diff_arrays(&old, &new, DiffOptions::default()).unwrap();
        assert_eq!(
            array_ops(&patch),
            &[
                ArrayOp::Copy { from: 0, len: 2 },
                ArrayOp::Insert {
                    values: vec![json!("c"), json!("d")]
                },
            ]
        );
    }

    #[test]
    fn test_changed_object_becomes_nested() {
        let old = vec![json!({"name": "m1"}), json!({"name": "m2"})];
        let new = vec![json!({"name": "m1x"}), json!({"name": "m2"})];
        let patch = diff_arrays(&old, &new, DiffOptions::default()).unwrap();
        let ops = array_ops(&patch);
        assert!(matches!(ops[0], ArrayOp::Nested { at: 0, from: 0, .. }));
        assert_eq!(ops[1], ArrayOp::Copy { from: 1, len: 1 });
    }

    #[test]
    fn test_reorder_uses_copies() {
        let old = vec![json!({"a": 1}), json!({"b": 2}), json!({"c": 3})];
        let new = vec![json!({"c": 3}), json!({"a": 1}), json!({"b": 2})];
        let patch = diff_arrays(&old, &new, DiffOptions::default()).unwrap();
        assert!(
            array_ops(&patch)
                .iter()
                .all(|op| matches!(op, ArrayOp::Copy { .. }))
        );
        assert_eq!(apply(Value::Array(old), &patch).unwrap(), Value::Array(new));
    }

    #[test]
    fn test_duplication_round_trips() {
        let old = vec![json!({"a": [1, 2]})];
        let new = vec![json!({"a": [1, 2]}), json!({"a": [1, 2]}), json!({"a": [1, 2]})];
        let patch = diff_arrays(&old, &new, DiffOptions::default()).unwrap();
        assert_eq!(apply(Value::Array(old), &patch).unwrap(), Value::Array(new));
    }

    #[test]
    fn test_lazy_and_eager_both_valid() {
        let old: Vec<Value> = (0..20).map(|i| json!({"i": i % 5})).collect();
        let new: Vec<Value> = (0..7).rev().map(|i| json!({"i": i % 3})).collect();
        for early_stop in [true, false] {
            let patch = diff_arrays(&old, &new, DiffOptions { early_stop }).unwrap();
            let result = apply(Value::Array(old.clone()), &patch).unwrap();
            assert_eq!(result, Value::Array(new.clone()));
        }
    }

    #[test]
    fn test_lazy_miss_falls_back_to_earlier_position() {
        // "x" only exists before the cursor; lazy search must still find it
        let old = vec![json!("x"), json!("y"), json!("z"), json!("w")];
        let new = vec![json!("z"), json!("x")];
        let patch = diff_arrays(&old, &new, DiffOptions { early_stop: true }).unwrap();
        assert_eq!(
            array_ops(&patch),
            &[ArrayOp::Copy { from: 2, len: 1 }, ArrayOp::Copy { from: 0, len: 1 }]
        );
    }
}

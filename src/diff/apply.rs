//! Patch application.

use serde_json::{Map, Value};

use super::{ArrayOp, ArrayPatch, Patch, PatchError};

/// Apply `patch` to `old`, consuming it.
///
/// Old array elements are moved into their last use and deep-cloned for
/// every earlier one, so duplicated elements never share state.
pub fn apply(old: Value, patch: &Patch) -> Result<Value, PatchError> {
    match patch {
        Patch::Insert(value) => Ok(value.clone()),
        Patch::Remove => Err(PatchError::UnexpectedRemove),
        Patch::Object(changes) => {
            let Value::Object(mut map) = old else {
                return Err(PatchError::TypeMismatch { expected: "object" });
            };
            apply_object(&mut map, changes)?;
            Ok(Value::Object(map))
        }
        Patch::Array(array) => {
            let Value::Array(items) = old else {
                return Err(PatchError::TypeMismatch { expected: "array" });
            };
            apply_array(items, array).map(Value::Array)
        }
    }
}

fn apply_object(
    map: &mut Map<String, Value>,
    changes: &std::collections::BTreeMap<String, Patch>,
) -> Result<(), PatchError> {
    for (key, change) in changes {
        match change {
            Patch::Remove => {
                map.remove(key);
            }
            Patch::Insert(value) => {
                map.insert(key.clone(), value.clone());
            }
            nested => match map.get_mut(key) {
                Some(slot) => {
                    let current = std::mem::take(slot);
                    *slot = apply(current, nested)?;
                }
                None => {
                    let value = apply(Value::Null, nested)?;
                    map.insert(key.clone(), value);
                }
            },
        }
    }
    Ok(())
}

fn apply_array(items: Vec<Value>, patch: &ArrayPatch) -> Result<Vec<Value>, PatchError> {
    let len = items.len();

    // Remaining uses per old index
    let mut uses = vec![0usize; len];
    for op in &patch.ops {
        match *op {
            ArrayOp::Insert { .. } => {}
            ArrayOp::Copy { from, len: run } => {
                let end = from.checked_add(run).filter(|&end| end <= len).ok_or(
                    PatchError::OutOfBounds {
                        index: from.saturating_add(run),
                        len,
                    },
                )?;
                for count in &mut uses[from..end] {
                    *count += 1;
                }
            }
            ArrayOp::Nested { from, .. } => {
                let count = uses
                    .get_mut(from)
                    .ok_or(PatchError::OutOfBounds { index: from, len })?;
                *count += 1;
            }
        }
    }

    let mut slots: Vec<Option<Value>> = items.into_iter().map(Some).collect();
    let mut take = |index: usize| -> Result<Value, PatchError> {
        let missing = PatchError::OutOfBounds { index, len };
        uses[index] -= 1;
        if uses[index] == 0 {
            slots[index].take().ok_or(missing)
        } else {
            slots[index].clone().ok_or(missing)
        }
    };

    let mut out = Vec::with_capacity(patch.len);
    for op in &patch.ops {
        match op {
            ArrayOp::Insert { values } => out.extend(values.iter().cloned()),
            ArrayOp::Copy { from, len: run } => {
                for index in *from..*from + *run {
                    out.push(take(index)?);
                }
            }
            ArrayOp::Nested { at, from, patch } => {
                if *at != out.len() {
                    return Err(PatchError::Misaligned {
                        at: *at,
                        position: out.len(),
                    });
                }
                out.push(apply(take(*from)?, patch)?);
            }
        }
    }

    if out.len() != patch.len {
        return Err(PatchError::LengthMismatch {
            produced: out.len(),
            expected: patch.len,
        });
    }
    Ok(out)
}

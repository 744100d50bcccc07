//! Filter predicates and their compiled form.
//!
//! A [`Filter`] tree is flattened into reverse Polish notation
//! ([`CompiledFilter`]) so the store can evaluate it with a bool stack and
//! so markers can hash a canonical rendering of it.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::FieldPath;

/// Field holding an entity's type name.
pub const TYPE_FIELD: &str = "type";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Filter {
    Eq { field: FieldPath, value: Value },
    Ne { field: FieldPath, value: Value },
    Gt { field: FieldPath, value: Value },
    Lt { field: FieldPath, value: Value },
    Exists { field: FieldPath },
    And { filters: Vec<Filter> },
    Or { filters: Vec<Filter> },
    Not { filter: Box<Filter> },
}

impl Filter {
    pub fn eq(field: &str, value: Value) -> Self {
        Self::Eq {
            field: field.into(),
            value,
        }
    }

    pub fn compile(&self) -> CompiledFilter {
        let mut code = Vec::new();
        self.emit(&mut code);
        CompiledFilter(code)
    }

    fn emit(&self, code: &mut Vec<Instr>) {
        match self {
            Self::Eq { field, value } => code.push(Instr::Eq {
                field: field.clone(),
                value: value.clone(),
            }),
            Self::Ne { field, value } => code.push(Instr::Ne {
                field: field.clone(),
                value: value.clone(),
            }),
            Self::Gt { field, value } => code.push(Instr::Gt {
                field: field.clone(),
                value: value.clone(),
            }),
            Self::Lt { field, value } => code.push(Instr::Lt {
                field: field.clone(),
                value: value.clone(),
            }),
            Self::Exists { field } => code.push(Instr::Exists {
                field: field.clone(),
            }),
            Self::And { filters } => emit_chain(filters, code, true),
            Self::Or { filters } => emit_chain(filters, code, false),
            Self::Not { filter } => {
                filter.emit(code);
                code.push(Instr::Not);
            }
        }
    }

    /// Type name this filter pins, if every match must have `type == name`.
    pub fn type_name(&self) -> Option<&str> {
        match self {
            Self::Eq { field, value } if field.as_str() == TYPE_FIELD => value.as_str(),
            Self::And { filters } => filters.iter().find_map(Filter::type_name),
            _ => None,
        }
    }
}

fn emit_chain(filters: &[Filter], code: &mut Vec<Instr>, all: bool) {
    let Some((first, rest)) = filters.split_first() else {
        code.push(Instr::Const { value: all });
        return;
    };
    first.emit(code);
    for filter in rest {
        filter.emit(code);
        code.push(if all { Instr::And } else { Instr::Or });
    }
}

/// One RPN instruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Instr {
    Eq { field: FieldPath, value: Value },
    Ne { field: FieldPath, value: Value },
    Gt { field: FieldPath, value: Value },
    Lt { field: FieldPath, value: Value },
    Exists { field: FieldPath },
    Const { value: bool },
    And,
    Or,
    Not,
}

/// Filter in reverse Polish notation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CompiledFilter(Vec<Instr>);

impl CompiledFilter {
    pub fn instructions(&self) -> &[Instr] {
        &self.0
    }

    /// Fields the predicate reads.
    pub fn fields(&self) -> impl Iterator<Item = &FieldPath> {
        self.0.iter().filter_map(|instr| match instr {
            Instr::Eq { field, .. }
            | Instr::Ne { field, .. }
            | Instr::Gt { field, .. }
            | Instr::Lt { field, .. }
            | Instr::Exists { field } => Some(field),
            _ => None,
        })
    }

    /// Evaluate against an entity whose fields are resolved by `lookup`.
    ///
    /// Malformed programs evaluate to `false`.
    pub fn eval<'v, F>(&self, mut lookup: F) -> bool
    where
        F: FnMut(&FieldPath) -> Option<&'v Value>,
    {
        let mut stack: Vec<bool> = Vec::with_capacity(self.0.len());
        for instr in &self.0 {
            let result = match instr {
                Instr::Eq { field, value } => matches_value(lookup(field), value),
                Instr::Ne { field, value } => !matches_value(lookup(field), value),
                Instr::Gt { field, value } => {
                    compare(lookup(field), value) == Some(Ordering::Greater)
                }
                Instr::Lt { field, value } => compare(lookup(field), value) == Some(Ordering::Less),
                Instr::Exists { field } => lookup(field).is_some_and(|v| !v.is_null()),
                Instr::Const { value } => *value,
                Instr::Not => match stack.pop() {
                    Some(top) => !top,
                    None => return false,
                },
                Instr::And | Instr::Or => {
                    let (Some(b), Some(a)) = (stack.pop(), stack.pop()) else {
                        return false;
                    };
                    if matches!(instr, Instr::And) { a && b } else { a || b }
                }
            };
            stack.push(result);
        }
        stack.len() == 1 && stack[0]
    }
}

/// Equality, or membership when the field holds an array.
fn matches_value(actual: Option<&Value>, expected: &Value) -> bool {
    match actual {
        Some(Value::Array(items)) if !expected.is_array() => items.contains(expected),
        Some(actual) => actual == expected,
        None => expected.is_null(),
    }
}

fn compare(actual: Option<&Value>, expected: &Value) -> Option<Ordering> {
    match (actual?, expected) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

impl fmt::Display for CompiledFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, instr) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            match instr {
                Instr::Eq { field, value } => write!(f, "${field} {value} =")?,
                Instr::Ne { field, value } => write!(f, "${field} {value} !")?,
                Instr::Gt { field, value } => write!(f, "${field} {value} >")?,
                Instr::Lt { field, value } => write!(f, "${field} {value} <")?,
                Instr::Exists { field } => write!(f, "${field} ?")?,
                Instr::Const { value } => write!(f, "{value}")?,
                Instr::And => f.write_str("&")?,
                Instr::Or => f.write_str("|")?,
                Instr::Not => f.write_str("~")?,
            }
        }
        Ok(())
    }
}

//! Core types - pure abstractions shared across the codebase.

mod hash;
mod id;

pub use hash::{ContentHash, Version, compute};
pub use id::{Channel, ClientId, EntityId, FieldPath, Origin, TYPE_PREFIX_LEN, type_prefix};

//! Content hashing using blake3 and FxHash.
//!
//! - [`ContentHash`]: 256-bit blake3 digest used for payload versions,
//!   dependency-tree versions and channel identities.
//! - [`ContentHash::of_value`]: structural hash of a JSON value that ignores
//!   object key order.
//! - [`compute`]: fast deterministic 64-bit FxHash for small identifiers.

use std::hash::Hasher;

use rustc_hash::FxHasher;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// A 256-bit content hash (blake3 output).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentHash([u8; 32]);

/// Version of a published payload.
pub type Version = ContentHash;

impl ContentHash {
    /// Create a new ContentHash from raw bytes.
    #[inline]
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    #[inline]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Hash raw bytes.
    pub fn of_bytes(data: &[u8]) -> Self {
        Self(*blake3::hash(data).as_bytes())
    }

    /// Structural hash of a JSON value, invariant to object key order.
    pub fn of_value(value: &Value) -> Self {
        let mut hasher = blake3::Hasher::new();
        feed_value(&mut hasher, value);
        Self(*hasher.finalize().as_bytes())
    }

    /// Convert to hex string.
    pub fn to_hex(self) -> String {
        hex::encode(self.0)
    }

    /// Create from hex string.
    pub fn from_hex(s: &str) -> Option<Self> {
        let bytes = hex::decode(s).ok()?;
        if bytes.len() != 32 {
            return None;
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Some(Self(arr))
    }
}

impl std::fmt::Display for ContentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Display first 16 chars of hex for brevity
        write!(f, "{}", &self.to_hex()[..16])
    }
}

impl Serialize for ContentHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ContentHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).ok_or_else(|| serde::de::Error::custom("invalid content hash"))
    }
}

// =============================================================================
// Structural hashing
// =============================================================================

const TAG_NULL: u8 = 0;
const TAG_BOOL: u8 = 1;
const TAG_NUMBER: u8 = 2;
const TAG_STRING: u8 = 3;
const TAG_ARRAY: u8 = 4;
const TAG_OBJECT: u8 = 5;

fn feed_len(hasher: &mut blake3::Hasher, len: usize) {
    hasher.update(&(len as u64).to_le_bytes());
}

fn feed_str(hasher: &mut blake3::Hasher, s: &str) {
    feed_len(hasher, s.len());
    hasher.update(s.as_bytes());
}

fn feed_value(hasher: &mut blake3::Hasher, value: &Value) {
    match value {
        Value::Null => {
            hasher.update(&[TAG_NULL]);
        }
        Value::Bool(b) => {
            hasher.update(&[TAG_BOOL, u8::from(*b)]);
        }
        Value::Number(n) => {
            hasher.update(&[TAG_NUMBER]);
            feed_str(hasher, &n.to_string());
        }
        Value::String(s) => {
            hasher.update(&[TAG_STRING]);
            feed_str(hasher, s);
        }
        Value::Array(items) => {
            hasher.update(&[TAG_ARRAY]);
            feed_len(hasher, items.len());
            for item in items {
                feed_value(hasher, item);
            }
        }
        Value::Object(map) => {
            // Each entry is digested on its own, then digests are sorted
            let mut entries: Vec<[u8; 32]> = map
                .iter()
                .map(|(key, item)| {
                    let mut entry = blake3::Hasher::new();
                    feed_str(&mut entry, key);
                    feed_value(&mut entry, item);
                    *entry.finalize().as_bytes()
                })
                .collect();
            entries.sort_unstable();

            hasher.update(&[TAG_OBJECT]);
            feed_len(hasher, entries.len());
            for entry in &entries {
                hasher.update(entry);
            }
        }
    }
}

// =============================================================================
// FxHash helpers
// =============================================================================

/// Compute 64-bit hash from byte data.
#[inline]
pub fn compute<T: AsRef<[u8]> + ?Sized>(data: &T) -> u64 {
    let mut hasher = FxHasher::default();
    hasher.write(data.as_ref());
    hasher.finish()
}

// =============================================================================
// Tests
// =============================================================================

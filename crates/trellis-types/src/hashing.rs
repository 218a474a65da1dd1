//! # History Hashing
//!
//! Computes the stable hash under which an event is recorded in the
//! event-history store.
//!
//! The flattened payload keys are sorted lexicographically, serialized as
//! `key:value;` pairs, and digested with SHA-256; the first 8 bytes form
//! the `u64` key. An optional mask restricts which keys participate; the
//! pseudo-keys `~type` and `~source` select the event's core fields.

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::data::flatten;
use crate::event::Event;

/// Pseudo-key selecting the event type into the hash.
pub const MASK_KEY_TYPE: &str = "~type";

/// Pseudo-key selecting the event source into the hash.
pub const MASK_KEY_SOURCE: &str = "~source";

/// Compute the history hash for an event.
///
/// Without a mask, every flattened payload key participates and the core
/// fields do not. With a mask, exactly the listed keys participate.
#[must_use]
pub fn history_hash(event: &Event, mask: Option<&[String]>) -> u64 {
    let mut flat = flatten(event.data());

    if let Some(mask) = mask {
        flat.retain(|key, _| mask.iter().any(|m| m == key));
        if mask.iter().any(|m| m == MASK_KEY_TYPE) {
            flat.insert(
                MASK_KEY_TYPE.to_string(),
                Value::String(event.event_type().as_str().to_string()),
            );
        }
        if mask.iter().any(|m| m == MASK_KEY_SOURCE) {
            flat.insert(
                MASK_KEY_SOURCE.to_string(),
                Value::String(event.source().as_str().to_string()),
            );
        }
    }

    hash_kv(&flat)
}

/// Hash a flattened key→value map.
///
/// Shared by event recording and the rules engine's historical-condition
/// request masks so both sides derive identical keys.
#[must_use]
pub fn hash_kv(entries: &std::collections::BTreeMap<String, Value>) -> u64 {
    let mut hasher = Sha256::new();
    for (key, value) in entries {
        hasher.update(key.as_bytes());
        hasher.update(b":");
        hasher.update(scalar_text(value).as_bytes());
        hasher.update(b";");
    }

    let digest = hasher.finalize();
    u64::from_be_bytes(digest[..8].try_into().unwrap_or_default())
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

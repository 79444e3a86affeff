//! Store key derivation

use latchkey_common::LOCK_KEY_SUFFIX;

/// Store key for a logical resource, e.g. `orderno` -> `orderno_lock`
pub fn derive_key(resource_id: &str) -> String {
    derive_key_with_suffix(resource_id, LOCK_KEY_SUFFIX)
}

pub fn derive_key_with_suffix(resource_id: &str, suffix: &str) -> String {
    let mut key = String::with_capacity(resource_id.len() + suffix.len());
    key.push_str(resource_id);
    key.push_str(suffix);
    key
}

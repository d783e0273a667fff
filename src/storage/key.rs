use sha2::{Digest, Sha256};
use std::fmt;

/// Keys longer than this are truncated and suffixed with a hash.
const MAX_KEY_LEN: usize = 200;
/// Length of the sanitized prefix kept when truncating.
const TRUNCATED_LEN: usize = 192;
/// Hex characters of the SHA-256 digest appended to truncated keys.
const HASH_LEN: usize = 8;

/// Characters that are unsafe in object names and file paths.
const UNSAFE_CHARS: &[char] = &['/', '\\', ':', '*', '?', '"', '<', '>', '|', ' '];

/// Sanitized, bounded-length storage key derived from an item identifier.
///
/// Derivation is deterministic: the same identifier always maps to the same
/// key, so re-storing an item overwrites its previous object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemKey(String);

impl ItemKey {
    pub fn from_identifier(id: &str) -> Self {
        let sanitized: String = id
            .chars()
            .map(|c| if UNSAFE_CHARS.contains(&c) { '_' } else { c })
            .collect();

        if sanitized.len() <= MAX_KEY_LEN {
            return Self(sanitized);
        }

        let digest = Sha256::digest(id.as_bytes());
        let hash = format!("{:x}", digest);
        let cut = floor_char_boundary(&sanitized, TRUNCATED_LEN);
        Self(format!("{}_{}", &sanitized[..cut], &hash[..HASH_LEN]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Largest index `<= max` that falls on a UTF-8 char boundary.
fn floor_char_boundary(s: &str, max: usize) -> usize {
    if max >= s.len() {
        return s.len();
    }
    let mut idx = max;
    while !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

/// Prefix under which every item object of a source lives.
pub fn items_prefix(source_name: &str) -> String {
    format!("sources/{source_name}/items/")
}

/// Full object path for one item: `sources/<name>/items/<key>.json`.
pub fn item_object_path(source_name: &str, key: &ItemKey) -> String {
    format!("{}{}.json", items_prefix(source_name), key)
}

//! Key normalization and lock-handle hashing.

use xxhash_rust::xxh32::xxh32;

/// Seed for the keyed 32-bit hash. Changing it invalidates every hashed key
/// in shared backends, so it is fixed for the lifetime of the wire format.
const HASH_SEED: u32 = 0x9E37_79B9;

/// Deterministic 32-bit keyed hash of an arbitrary byte string.
pub fn keyed_hash(data: &[u8]) -> u32 {
    xxh32(data, HASH_SEED)
}

/// The physical key a backend sees for a `(region, key)` pair.
///
/// With hashing enabled the logical key collapses to its 32-bit hash, which
/// keeps arbitrarily long logical keys within backend key-length limits.
pub fn physical_key(region: &str, key: &str, hash_keys: bool) -> String {
    if hash_keys {
        format!("{}:{:08x}", region, keyed_hash(key.as_bytes()))
    } else {
        format!("{}:{}", region, key)
    }
}

/// Lock-table handle for a `(region, key, depth)` triple.
///
/// Depth participates in the hash so a re-entrant population at a greater
/// depth lands on a different handle and cannot deadlock on its own lock.
pub fn lock_handle(region: &str, key: &str, depth: u32) -> u32 {
    let mut buf = Vec::with_capacity(region.len() + key.len() + 6);
    buf.extend_from_slice(region.as_bytes());
    buf.push(0);
    buf.extend_from_slice(key.as_bytes());
    buf.push(0);
    buf.extend_from_slice(&depth.to_le_bytes());
    keyed_hash(&buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyed_hash_is_deterministic() {
        assert_eq!(keyed_hash(b"pages:start"), keyed_hash(b"pages:start"));
        assert_ne!(keyed_hash(b"pages:start"), keyed_hash(b"pages:start2"));
    }

    #[test]
    fn physical_key_plain_and_hashed() {
        assert_eq!(physical_key("pages", "start", false), "pages:start");

        let hashed = physical_key("pages", "start", true);
        assert!(hashed.starts_with("pages:"));
        assert_eq!(hashed.len(), "pages:".len() + 8);
        assert_eq!(hashed, physical_key("pages", "start", true));
    }

    #[test]
    fn lock_handle_varies_with_depth() {
        let h0 = lock_handle("pages", "start", 0);
        let h1 = lock_handle("pages", "start", 1);
        assert_ne!(h0, h1);
        assert_eq!(h0, lock_handle("pages", "start", 0));
    }

    #[test]
    fn lock_handle_separates_region_and_key() {
        // "ab" + "c" must not collide with "a" + "bc".
        assert_ne!(lock_handle("ab", "c", 0), lock_handle("a", "bc", 0));
    }
}

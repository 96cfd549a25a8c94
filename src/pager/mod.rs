//! Cursor-pagination cache.
//!
//! Upstream list queries resume from opaque cursor tokens; the UI pages by
//! offset. This index remembers, per list identity, which cursor resumes at
//! which offset so an offset request can be translated into the nearest
//! recorded cursor. State lives in the caller's session store and dies with
//! the session.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Session key the cursor blob is stored under.
const SESSION_KEY: &str = "cairn:cursors";

/// Session-scoped key/value store capability. One instance per user session;
/// concurrent requests in the same session serialize here (last commit
/// wins).
pub trait SessionStore: Send + Sync {
    fn load(&self, key: &str) -> Option<String>;
    fn store(&self, key: &str, value: String);
}

/// In-memory [`SessionStore`] for tests and non-web hosts.
#[derive(Default)]
pub struct MemorySessionStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemorySessionStore {
    fn load(&self, key: &str) -> Option<String> {
        self.entries.lock().get(key).cloned()
    }

    fn store(&self, key: &str, value: String) {
        self.entries.lock().insert(key.to_string(), value);
    }
}

/// Recorded cursors for one list identity.
#[derive(Debug, Default, Serialize, Deserialize)]
struct ListCursors {
    /// start index -> cursor token resuming at that index
    cursors: BTreeMap<u64, String>,
    /// the offset the last lookup actually resumed from
    #[serde(rename = "startIndex")]
    start_index: u64,
}

type CursorBlob = HashMap<String, ListCursors>;

/// Offset → cursor translation over an injected session store.
///
/// Every operation is load-mutate-commit against the session blob.
#[derive(Clone)]
pub struct CursorIndex {
    session: Arc<dyn SessionStore>,
}

impl CursorIndex {
    pub fn new(session: Arc<dyn SessionStore>) -> Self {
        Self { session }
    }

    /// Find the cursor to resume `list_id` from, for a requested offset.
    ///
    /// Returns the token and the offset it actually resumes at - when no
    /// cursor was recorded for the exact offset, the nearest earlier one is
    /// returned and the caller must page forward from there. Offset zero
    /// (and an empty index) always starts fresh: `(None, 0)`.
    pub fn lookup(&self, list_id: &str, start_index: u64) -> (Option<String>, u64) {
        let mut blob = self.load();
        let list = blob.entry(list_id.to_string()).or_default();

        let (token, resumed) = if start_index == 0 || list.cursors.is_empty() {
            (None, 0)
        } else if let Some(token) = list.cursors.get(&start_index) {
            (Some(token.clone()), start_index)
        } else {
            // Nearest recorded offset strictly below the requested one.
            match list.cursors.range(..start_index).next_back() {
                Some((&index, token)) => (Some(token.clone()), index),
                None => (None, 0),
            }
        };

        debug!(
            "cursor lookup for '{}' at {}: resuming at {}",
            list_id, start_index, resumed
        );
        list.start_index = resumed;
        self.commit(&blob);
        (token, resumed)
    }

    /// Record the cursor that resumes `list_id` at `start_index`. Called
    /// after a query reported more results, with the cursor it returned for
    /// the following page.
    pub fn advance(&self, list_id: &str, start_index: u64, token: &str) {
        let mut blob = self.load();
        blob.entry(list_id.to_string())
            .or_default()
            .cursors
            .insert(start_index, token.to_string());
        self.commit(&blob);
    }

    fn load(&self) -> CursorBlob {
        let Some(raw) = self.session.load(SESSION_KEY) else {
            return CursorBlob::default();
        };
        match serde_json::from_str(&raw) {
            Ok(blob) => blob,
            Err(e) => {
                warn!("corrupt cursor blob in session, starting over: {}", e);
                CursorBlob::default()
            }
        }
    }

    fn commit(&self, blob: &CursorBlob) {
        match serde_json::to_string(blob) {
            Ok(raw) => self.session.store(SESSION_KEY, raw),
            Err(e) => warn!("failed to commit cursor blob: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index() -> CursorIndex {
        CursorIndex::new(Arc::new(MemorySessionStore::new()))
    }

    #[test]
    fn exact_offset_returns_its_token() {
        let index = index();
        index.advance("L", 20, "abc123");
        assert_eq!(index.lookup("L", 20), (Some("abc123".into()), 20));
    }

    #[test]
    fn offset_below_all_entries_starts_fresh() {
        let index = index();
        index.advance("L", 20, "abc123");
        assert_eq!(index.lookup("L", 15), (None, 0));
    }

    #[test]
    fn offset_above_resumes_from_the_nearest_earlier_entry() {
        let index = index();
        index.advance("L", 20, "abc123");
        assert_eq!(index.lookup("L", 25), (Some("abc123".into()), 20));
    }

    #[test]
    fn offset_zero_always_starts_fresh() {
        let index = index();
        index.advance("L", 20, "abc123");
        assert_eq!(index.lookup("L", 0), (None, 0));
    }

    #[test]
    fn empty_index_starts_fresh() {
        assert_eq!(index().lookup("L", 40), (None, 0));
    }

    #[test]
    fn lists_are_independent() {
        let index = index();
        index.advance("L", 20, "abc123");
        index.advance("M", 10, "zzz");
        assert_eq!(index.lookup("M", 10), (Some("zzz".into()), 10));
        assert_eq!(index.lookup("L", 10), (None, 0));
    }

    #[test]
    fn advance_overwrites_an_existing_entry() {
        let index = index();
        index.advance("L", 20, "old");
        index.advance("L", 20, "new");
        assert_eq!(index.lookup("L", 20), (Some("new".into()), 20));
    }

    #[test]
    fn resumed_offset_is_persisted_in_the_session_blob() {
        let session = Arc::new(MemorySessionStore::new());
        let index = CursorIndex::new(session.clone());

        index.advance("L", 20, "abc123");
        index.lookup("L", 25);

        let blob: serde_json::Value =
            serde_json::from_str(&session.load(SESSION_KEY).unwrap()).unwrap();
        assert_eq!(blob["L"]["startIndex"], 20);
        assert_eq!(blob["L"]["cursors"]["20"], "abc123");
    }

    #[test]
    fn corrupt_session_blob_is_treated_as_empty() {
        let session = Arc::new(MemorySessionStore::new());
        session.store(SESSION_KEY, "not json".into());

        let index = CursorIndex::new(session);
        assert_eq!(index.lookup("L", 20), (None, 0));
    }
}

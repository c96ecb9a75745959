//! Embedded-side local content cache.
//!
//! The embedded app renders instantly from this cache instead of
//! round-tripping to the authority on every paint. The cache is a
//! performance layer only, never a second source of truth: authority
//! values always win on merge, a live fetch always wins on reconcile,
//! and a corrupted file is treated as empty rather than a crash.
//!
//! The state lock is held across each read-modify-write so a concurrent
//! load cannot interleave, and the file is replaced atomically via a
//! temp file + rename.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

/// On-disk shape of the cache.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheRecord {
    #[serde(default)]
    pub values: BTreeMap<String, String>,
    /// Epoch seconds of the last write.
    #[serde(default)]
    pub updated_at: u64,
    /// Provenance tag of the last writer (e.g. "save-broadcast",
    /// "live-fetch").
    #[serde(default)]
    pub source: String,
}

/// File-backed cache of authority-confirmed content.
#[derive(Debug)]
pub struct LocalContentCache {
    path: PathBuf,
    state: Mutex<CacheRecord>,
}

impl LocalContentCache {
    /// Open the cache at `path`, loading whatever is there. A missing or
    /// unparseable file starts the cache empty.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let state = Self::load_record(&path);
        Self {
            path,
            state: Mutex::new(state),
        }
    }

    fn load_record(path: &PathBuf) -> CacheRecord {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(_) => return CacheRecord::default(),
        };
        match serde_json::from_str(&raw) {
            Ok(record) => record,
            Err(error) => {
                tracing::warn!(path = %path.display(), %error, "content cache unreadable; starting empty");
                CacheRecord::default()
            }
        }
    }

    pub fn get(&self, field_name: &str) -> Option<String> {
        self.state.lock().values.get(field_name).cloned()
    }

    pub fn values(&self) -> BTreeMap<String, String> {
        self.state.lock().values.clone()
    }

    pub fn len(&self) -> usize {
        self.state.lock().values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().values.is_empty()
    }

    /// Overlay authority-confirmed values onto the cache. Incoming values
    /// always win over what is cached; fields not mentioned keep their
    /// cached value. Re-merging the same values is a no-op on the result.
    pub fn merge(
        &self,
        new_values: &BTreeMap<String, String>,
        source_tag: &str,
    ) -> anyhow::Result<()> {
        let mut state = self.state.lock();
        for (name, value) in new_values {
            state.values.insert(name.clone(), value.clone());
        }
        state.updated_at = epoch_secs();
        state.source = source_tag.to_string();
        self.persist(&state)
    }

    /// Make a live fetch authoritative: if the cache disagrees anywhere,
    /// replace its contents wholesale. Returns true when a correction was
    /// written.
    pub fn reconcile(&self, live: &BTreeMap<String, String>, source_tag: &str) -> anyhow::Result<bool> {
        let mut state = self.state.lock();
        if state.values == *live {
            return Ok(false);
        }
        tracing::info!(
            cached = state.values.len(),
            live = live.len(),
            "cache diverged from authority; correcting"
        );
        state.values = live.clone();
        state.updated_at = epoch_secs();
        state.source = source_tag.to_string();
        self.persist(&state)?;
        Ok(true)
    }

    /// Write the record to disk atomically (temp file + rename).
    fn persist(&self, record: &CacheRecord) -> anyhow::Result<()> {
        let parent = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        let json = serde_json::to_string(record)?;

        let mut tmp = tempfile::NamedTempFile::new_in(&parent)?;
        tmp.write_all(json.as_bytes())?;
        tmp.persist(&self.path)?;
        Ok(())
    }
}

/// Current Unix epoch in seconds.
fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

// ── Tests ───────────────────────────────────────────────────────

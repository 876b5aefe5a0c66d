//! Durable mirror for cache entries.
//!
//! One JSON file per key, namespaced with a fixed filename prefix so
//! `clear` never touches unrelated files. The mirror is best-effort:
//! callers treat every failure as a cache miss.

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::store::CacheEntry;

const FILE_PREFIX: &str = "geekshelf-cache-";

/// Serialized form of a mirrored entry. Self-describing: the original
/// key travels with the payload because filenames are sanitized.
#[derive(Debug, Serialize, Deserialize)]
struct DiskRecord {
    key: String,
    #[serde(flatten)]
    entry: CacheEntry<Value>,
}

/// Filesystem mirror rooted at a single directory.
#[derive(Debug, Clone)]
pub(super) struct DiskMirror {
    root: PathBuf,
}

impl DiskMirror {
    pub(super) fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub(super) fn write(&self, key: &str, entry: &CacheEntry<Value>) -> Result<()> {
        fs::create_dir_all(&self.root)
            .with_context(|| format!("failed to create {}", self.root.display()))?;
        let record = DiskRecord {
            key: key.to_string(),
            entry: entry.clone(),
        };
        let path = self.path_for(key);
        let serialized = serde_json::to_vec(&record).context("failed to serialize cache entry")?;
        fs::write(&path, serialized).with_context(|| format!("failed to write {}", path.display()))
    }

    /// Read a mirrored entry, regardless of liveness. The store
    /// validates `expires_at` before accepting it.
    pub(super) fn read(&self, key: &str) -> Result<Option<CacheEntry<Value>>> {
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(None);
        }
        let record = read_record(&path)?;
        Ok((record.key == key).then_some(record.entry))
    }

    pub(super) fn remove(&self, key: &str) -> Result<()> {
        let path = self.path_for(key);
        if path.exists() {
            fs::remove_file(&path)
                .with_context(|| format!("failed to remove {}", path.display()))?;
        }
        Ok(())
    }

    /// Enumerate every mirrored entry under the namespace prefix.
    /// Unreadable files are deleted rather than propagated.
    pub(super) fn load_all(&self) -> Result<Vec<(String, CacheEntry<Value>)>> {
        let mut entries = Vec::new();
        if !self.root.exists() {
            return Ok(entries);
        }
        for dir_entry in fs::read_dir(&self.root).context("failed to read cache directory")? {
            let path = dir_entry?.path();
            if !is_namespaced(&path) {
                continue;
            }
            match read_record(&path) {
                Ok(record) => entries.push((record.key, record.entry)),
                Err(err) => {
                    tracing::warn!("removing unreadable cache file {}: {err}", path.display());
                    let _ = fs::remove_file(&path);
                }
            }
        }
        Ok(entries)
    }

    /// Delete every namespaced file, leaving unrelated files alone.
    pub(super) fn clear(&self) -> Result<()> {
        if !self.root.exists() {
            return Ok(());
        }
        for dir_entry in fs::read_dir(&self.root).context("failed to read cache directory")? {
            let path = dir_entry?.path();
            if is_namespaced(&path) {
                fs::remove_file(&path)
                    .with_context(|| format!("failed to remove {}", path.display()))?;
            }
        }
        Ok(())
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root
            .join(format!("{FILE_PREFIX}{}.json", sanitize_key(key)))
    }
}

fn read_record(path: &Path) -> Result<DiskRecord> {
    let content =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("failed to parse {}", path.display()))
}

fn is_namespaced(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(|name| name.starts_with(FILE_PREFIX) && name.ends_with(".json"))
        .unwrap_or(false)
}

fn sanitize_key(key: &str) -> String {
    let mut result = String::with_capacity(key.len());
    for ch in key.chars() {
        if ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_') {
            result.push(ch);
        } else {
            result.push('_');
        }
    }
    if result.is_empty() {
        "entry".to_string()
    } else {
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use serde_json::json;
    use tempfile::tempdir;

    fn sample_entry() -> CacheEntry<Value> {
        let now = Utc::now();
        CacheEntry {
            data: json!({"games": ["Brass"]}),
            created_at: now,
            expires_at: now + Duration::hours(1),
        }
    }

    #[test]
    fn round_trips_entries_by_key() -> Result<()> {
        let dir = tempdir()?;
        let mirror = DiskMirror::new(dir.path());
        let entry = sample_entry();

        mirror.write("collection:alice", &entry)?;
        let loaded = mirror.read("collection:alice")?.expect("entry missing");
        assert_eq!(loaded.data, entry.data);

        mirror.remove("collection:alice")?;
        assert!(mirror.read("collection:alice")?.is_none());
        Ok(())
    }

    #[test]
    fn clear_leaves_unrelated_files_alone() -> Result<()> {
        let dir = tempdir()?;
        let mirror = DiskMirror::new(dir.path());
        mirror.write("collection:alice", &sample_entry())?;
        fs::write(dir.path().join("unrelated.json"), "{}")?;

        mirror.clear()?;
        assert!(mirror.load_all()?.is_empty());
        assert!(dir.path().join("unrelated.json").exists());
        Ok(())
    }

    #[test]
    fn load_all_skips_and_removes_corrupt_files() -> Result<()> {
        let dir = tempdir()?;
        let mirror = DiskMirror::new(dir.path());
        mirror.write("collection:alice", &sample_entry())?;
        let corrupt = dir.path().join(format!("{FILE_PREFIX}bad.json"));
        fs::write(&corrupt, "not json")?;

        let entries = mirror.load_all()?;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0, "collection:alice");
        assert!(!corrupt.exists());
        Ok(())
    }
}

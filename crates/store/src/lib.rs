//! Durable per-bot snapshots.
//!
//! One JSON file per bot at `<data_dir>/<bot_id>.json`:
//! `{"updatedAt": <epoch_ms>, "state": {…}}`. Writes replace the whole
//! file atomically (temp file + rename). Readers tolerate missing and
//! corrupt files, treating both as "no prior state".

use common::epoch_ms;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, Serialize, Deserialize)]
struct Envelope<T> {
    #[serde(rename = "updatedAt")]
    updated_at: i64,
    state: T,
}

/// Filesystem-backed snapshot store, one file per bot id.
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    /// Open (creating if needed) the snapshot directory.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| StoreError::Io {
            path: dir.clone(),
            source,
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    /// Persist `state` for the bot, replacing any previous snapshot.
    pub fn save<T: Serialize>(&self, id: &str, state: &T) -> Result<(), StoreError> {
        let envelope = Envelope {
            updated_at: epoch_ms(),
            state,
        };
        let payload = serde_json::to_vec_pretty(&envelope)?;

        let path = self.path_for(id);
        let tmp = self.dir.join(format!("{id}.json.tmp"));

        fs::write(&tmp, payload).map_err(|source| StoreError::Io {
            path: tmp.clone(),
            source,
        })?;
        fs::rename(&tmp, &path).map_err(|source| StoreError::Io { path, source })?;

        Ok(())
    }

    /// Load the snapshot for a bot. Missing or unreadable files are
    /// reported as `None`.
    pub fn load<T: DeserializeOwned>(&self, id: &str) -> Option<T> {
        let path = self.path_for(id);
        let raw = fs::read_to_string(&path).ok()?;

        match serde_json::from_str::<Envelope<T>>(&raw) {
            Ok(envelope) => Some(envelope.state),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "ignoring corrupt snapshot");
                None
            }
        }
    }

    /// Delete a bot's snapshot; missing files are fine.
    pub fn delete(&self, id: &str) {
        let path = self.path_for(id);
        if let Err(e) = fs::remove_file(&path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %path.display(), error = %e, "failed to delete snapshot");
            }
        }
    }

    /// Load every readable snapshot in the directory as `(bot_id,
    /// state)` pairs. Corrupt files are skipped with a warning.
    pub fn load_all<T: DeserializeOwned>(&self) -> Vec<(String, T)> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(dir = %self.dir.display(), error = %e, "cannot list snapshot dir");
                return Vec::new();
            }
        };

        let mut out = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let Some(id) = name.strip_suffix(".json") else {
                continue;
            };
            if let Some(state) = self.load::<T>(id) {
                out.push((id.to_string(), state));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct FakeState {
        name: String,
        status: String,
        rounds: u64,
        time_started: Option<i64>,
    }

    fn temp_store() -> SnapshotStore {
        let dir = std::env::temp_dir().join(format!("snapshots-{}", uuid::Uuid::new_v4()));
        SnapshotStore::new(dir).unwrap()
    }

    fn sample() -> FakeState {
        FakeState {
            name: "grid-1".into(),
            status: "running".into(),
            rounds: 7,
            time_started: Some(1_700_000_000_000),
        }
    }

    #[test]
    fn save_then_load_round_trips() {
        let store = temp_store();
        let state = sample();

        store.save("bot-a", &state).unwrap();
        let loaded: FakeState = store.load("bot-a").unwrap();
        assert_eq!(loaded, state);
    }

    #[test]
    fn missing_snapshot_is_none() {
        let store = temp_store();
        assert!(store.load::<FakeState>("nope").is_none());
    }

    #[test]
    fn corrupt_snapshot_is_none() {
        let store = temp_store();
        std::fs::write(store.path_for("bad"), "{not json").unwrap();
        assert!(store.load::<FakeState>("bad").is_none());
    }

    #[test]
    fn delete_removes_snapshot() {
        let store = temp_store();
        store.save("bot-a", &sample()).unwrap();
        store.delete("bot-a");
        assert!(store.load::<FakeState>("bot-a").is_none());

        // Deleting again is harmless.
        store.delete("bot-a");
    }

    #[test]
    fn load_all_returns_every_snapshot() {
        let store = temp_store();
        store.save("bot-a", &sample()).unwrap();
        let mut other = sample();
        other.name = "dca-1".into();
        store.save("bot-b", &other).unwrap();
        std::fs::write(store.path_for("bad"), "garbage").unwrap();

        let mut all: Vec<(String, FakeState)> = store.load_all();
        all.sort_by(|a, b| a.0.cmp(&b.0));

        assert_eq!(all.len(), 2);
        assert_eq!(all[0].0, "bot-a");
        assert_eq!(all[1].1.name, "dca-1");
    }

    #[test]
    fn overwrite_replaces_previous_state() {
        let store = temp_store();
        store.save("bot-a", &sample()).unwrap();

        let mut updated = sample();
        updated.rounds = 8;
        store.save("bot-a", &updated).unwrap();

        let loaded: FakeState = store.load("bot-a").unwrap();
        assert_eq!(loaded.rounds, 8);
    }
}

//! Persisted application state: recorded clips and the validated server endpoint
//!
//! The whole state is serialized to one JSON file on every mutation and
//! rehydrated at startup. Mutation goes through the defined operations only;
//! readers get snapshot copies, never references into the live list.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Default display name for clips whose naming prompt was cancelled.
pub const DEFAULT_CLIP_NAME: &str = "Enregistrement";

/// A finalized, named recording. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Clip {
    pub id: String,
    pub name: String,
    pub uri: PathBuf,
    /// Whole elapsed seconds at the time the recording was stopped.
    pub duration: u64,
}

/// Host/port pair of the last successfully probed server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerEndpoint {
    pub host: String,
    pub port: String,
}

impl ServerEndpoint {
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

#[derive(Debug)]
pub enum StoreError {
    DuplicateName(String),
    Io(String),
    Serialize(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::DuplicateName(name) => {
                write!(f, "A clip named \"{}\" already exists", name)
            }
            StoreError::Io(e) => write!(f, "State file I/O error: {}", e),
            StoreError::Serialize(e) => write!(f, "State serialization error: {}", e),
        }
    }
}

impl std::error::Error for StoreError {}

/// On-disk layout: a root object with an `audio` and a `server` partition.
#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedState {
    #[serde(default)]
    audio: AudioSection,
    #[serde(default)]
    server: ServerSection,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct AudioSection {
    #[serde(default)]
    clips: Vec<Clip>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ServerSection {
    #[serde(default)]
    ip: String,
    #[serde(default)]
    port: String,
}

/// The one shared mutable resource of the app. Every mutating operation
/// rewrites the whole state file before returning.
pub struct StateStore {
    path: PathBuf,
    clips: Vec<Clip>,
    endpoint: Option<ServerEndpoint>,
}

impl StateStore {
    /// Rehydrate from `path`, falling back to an empty state on a missing or
    /// unreadable file (a corrupt state file must not brick the app).
    pub fn load(path: &Path) -> StateStore {
        let persisted = match std::fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str::<PersistedState>(&contents) {
                Ok(state) => state,
                Err(e) => {
                    log::warn!("State: failed to parse {:?}: {}", path, e);
                    PersistedState::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => PersistedState::default(),
            Err(e) => {
                log::warn!("State: failed to read {:?}: {}", path, e);
                PersistedState::default()
            }
        };

        let endpoint = if persisted.server.ip.is_empty() || persisted.server.port.is_empty() {
            None
        } else {
            Some(ServerEndpoint {
                host: persisted.server.ip,
                port: persisted.server.port,
            })
        };

        StateStore {
            path: path.to_path_buf(),
            clips: persisted.audio.clips,
            endpoint,
        }
    }

    /// Ordered snapshot of all clips. Later mutations do not affect it.
    pub fn clips(&self) -> Vec<Clip> {
        self.clips.clone()
    }

    pub fn endpoint(&self) -> Option<ServerEndpoint> {
        self.endpoint.clone()
    }

    /// Case-insensitive name collision check.
    pub fn is_name_taken(&self, name: &str) -> bool {
        let lowered = name.to_lowercase();
        self.clips.iter().any(|c| c.name.to_lowercase() == lowered)
    }

    /// Synthesize the next free default name: "Enregistrement",
    /// "Enregistrement_1", "Enregistrement_2", ...
    pub fn default_clip_name(&self) -> String {
        if !self.is_name_taken(DEFAULT_CLIP_NAME) {
            return DEFAULT_CLIP_NAME.to_string();
        }
        let mut n = 1u32;
        loop {
            let candidate = format!("{}_{}", DEFAULT_CLIP_NAME, n);
            if !self.is_name_taken(&candidate) {
                return candidate;
            }
            n += 1;
        }
    }

    /// Append at the end of the list. The name is re-validated here even
    /// though callers check first; the store enforces its own invariant.
    /// A failed write rolls the append back so the list and the state file
    /// never diverge.
    pub fn append_clip(&mut self, clip: Clip) -> Result<(), StoreError> {
        if self.is_name_taken(&clip.name) {
            return Err(StoreError::DuplicateName(clip.name));
        }
        self.clips.push(clip);
        if let Err(e) = self.persist() {
            self.clips.pop();
            return Err(e);
        }
        Ok(())
    }

    /// Remove by id and delete the backing file. Absent ids and already
    /// missing files are not errors.
    pub fn remove_clip(&mut self, id: &str) -> Result<Option<Clip>, StoreError> {
        let Some(pos) = self.clips.iter().position(|c| c.id == id) else {
            return Ok(None);
        };
        let clip = self.clips.remove(pos);
        match std::fs::remove_file(&clip.uri) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => log::warn!("Failed to delete backing file {:?}: {}", clip.uri, e),
        }
        self.persist()?;
        Ok(Some(clip))
    }

    /// Overwrite (not merge) the validated endpoint. Caller has already run a
    /// successful probe against this pair.
    pub fn set_endpoint(&mut self, host: &str, port: &str) -> Result<(), StoreError> {
        self.endpoint = Some(ServerEndpoint {
            host: host.trim().to_string(),
            port: port.trim().to_string(),
        });
        self.persist()
    }

    /// Whole-state serialization, written atomically (temp file + rename) so
    /// a crash mid-write never leaves a corrupt state file behind.
    fn persist(&self) -> Result<(), StoreError> {
        let persisted = PersistedState {
            audio: AudioSection {
                clips: self.clips.clone(),
            },
            server: match &self.endpoint {
                Some(ep) => ServerSection {
                    ip: ep.host.clone(),
                    port: ep.port.clone(),
                },
                None => ServerSection::default(),
            },
        };

        let contents = serde_json::to_string_pretty(&persisted)
            .map_err(|e| StoreError::Serialize(e.to_string()))?;

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::Io(e.to_string()))?;
        }

        let tmp_path = self.path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &contents).map_err(|e| StoreError::Io(e.to_string()))?;
        std::fs::rename(&tmp_path, &self.path).map_err(|e| StoreError::Io(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_in(dir: &Path) -> StateStore {
        StateStore::load(&dir.join("state.json"))
    }

    fn clip(id: &str, name: &str) -> Clip {
        Clip {
            id: id.to_string(),
            name: name.to_string(),
            uri: PathBuf::from(format!("/tmp/{}.wav", id)),
            duration: 3,
        }
    }

    #[test]
    fn list_reflects_net_effect_in_order() {
        let tmp = tempfile::tempdir().unwrap();
        let mut store = store_in(tmp.path());

        store.append_clip(clip("a", "one")).unwrap();
        store.append_clip(clip("b", "two")).unwrap();
        store.append_clip(clip("c", "three")).unwrap();
        store.remove_clip("b").unwrap();

        let names: Vec<_> = store.clips().into_iter().map(|c| c.name).collect();
        assert_eq!(names, vec!["one", "three"]);
    }

    #[test]
    fn remove_of_absent_id_is_a_noop() {
        let tmp = tempfile::tempdir().unwrap();
        let mut store = store_in(tmp.path());
        assert!(store.remove_clip("ghost").unwrap().is_none());
    }

    #[test]
    fn duplicate_name_is_rejected_case_insensitively() {
        let tmp = tempfile::tempdir().unwrap();
        let mut store = store_in(tmp.path());

        store.append_clip(clip("a", "demo")).unwrap();
        let err = store.append_clip(clip("b", "Demo")).unwrap_err();
        assert!(matches!(err, StoreError::DuplicateName(_)));
        assert_eq!(store.clips().len(), 1);
    }

    #[test]
    fn default_name_synthesis_appends_numeric_suffix() {
        let tmp = tempfile::tempdir().unwrap();
        let mut store = store_in(tmp.path());

        assert_eq!(store.default_clip_name(), "Enregistrement");
        store.append_clip(clip("a", "Enregistrement")).unwrap();
        assert_eq!(store.default_clip_name(), "Enregistrement_1");
        store.append_clip(clip("b", "Enregistrement_1")).unwrap();
        assert_eq!(store.default_clip_name(), "Enregistrement_2");
    }

    #[test]
    fn endpoint_is_overwritten_not_merged() {
        let tmp = tempfile::tempdir().unwrap();
        let mut store = store_in(tmp.path());

        assert!(store.endpoint().is_none());
        store.set_endpoint(" 192.168.1.42 ", "5000").unwrap();
        store.set_endpoint("10.0.0.1", "8080").unwrap();

        let ep = store.endpoint().unwrap();
        assert_eq!(ep.host, "10.0.0.1");
        assert_eq!(ep.port, "8080");
        assert_eq!(ep.base_url(), "http://10.0.0.1:8080");
    }

    #[test]
    fn state_survives_reload_with_documented_layout() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("state.json");

        {
            let mut store = StateStore::load(&path);
            store.append_clip(clip("a", "one")).unwrap();
            store.set_endpoint("192.168.1.42", "5000").unwrap();
        }

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["audio"]["clips"][0]["name"], "one");
        assert_eq!(raw["server"]["ip"], "192.168.1.42");
        assert_eq!(raw["server"]["port"], "5000");

        let reloaded = StateStore::load(&path);
        assert_eq!(reloaded.clips().len(), 1);
        assert_eq!(reloaded.endpoint().unwrap().port, "5000");
    }

    #[test]
    fn corrupt_state_file_falls_back_to_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("state.json");
        std::fs::write(&path, b"not json at all").unwrap();

        let store = StateStore::load(&path);
        assert!(store.clips().is_empty());
        assert!(store.endpoint().is_none());
    }

    #[test]
    fn failed_persist_rolls_back_the_append() {
        let tmp = tempfile::tempdir().unwrap();
        // a regular file where the state directory should be makes every
        // write fail
        let blocker = tmp.path().join("blocker");
        std::fs::write(&blocker, b"x").unwrap();

        let mut store = StateStore::load(&blocker.join("state.json"));
        let err = store.append_clip(clip("a", "one")).unwrap_err();
        assert!(matches!(err, StoreError::Io(_)));
        assert!(store.clips().is_empty());
    }

    #[test]
    fn remove_deletes_backing_file_idempotently() {
        let tmp = tempfile::tempdir().unwrap();
        let mut store = store_in(tmp.path());

        let backing = tmp.path().join("take.wav");
        std::fs::write(&backing, b"riff").unwrap();
        let mut c = clip("a", "take");
        c.uri = backing.clone();
        store.append_clip(c).unwrap();

        store.remove_clip("a").unwrap();
        assert!(!backing.exists());

        // Removing a clip whose file is already gone must not error either.
        let mut c2 = clip("b", "gone");
        c2.uri = tmp.path().join("never_existed.wav");
        store.append_clip(c2).unwrap();
        assert!(store.remove_clip("b").unwrap().is_some());
    }
}

//! Local key/value persistence for the session identifiers.
//!
//! The session only ever touches two keys ([`USER_ID_KEY`] and
//! [`THREAD_ID_KEY`]); values are plain strings with no schema versioning.
//!
//! [`USER_ID_KEY`]: crate::identity::USER_ID_KEY
//! [`THREAD_ID_KEY`]: crate::identity::THREAD_ID_KEY

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use parking_lot::Mutex;

/// Persistent string storage.
pub trait Store: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

/// Process-local store. Forgets everything on exit.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populated store, handy for resuming a known identity.
    pub fn with_values<'a>(values: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let map = values
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Self {
            values: Mutex::new(map),
        }
    }
}

impl Store for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.values.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.values.lock().remove(key);
        Ok(())
    }
}

/// TOML-file store, rewritten on every change.
///
/// Default location is `<config dir>/hello-patient/session.toml`.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    values: Mutex<BTreeMap<String, String>>,
}

impl FileStore {
    /// Open the store at `path`. A missing file is an empty store; a corrupt
    /// one is logged and treated as empty.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let values = Self::load(&path);
        Self {
            path,
            values: Mutex::new(values),
        }
    }

    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("hello-patient")
            .join("session.toml")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(path: &Path) -> BTreeMap<String, String> {
        if !path.exists() {
            return BTreeMap::new();
        }
        match std::fs::read_to_string(path) {
            Ok(s) => match toml::from_str(&s) {
                Ok(values) => values,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Bad session file, starting empty");
                    BTreeMap::new()
                }
            },
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Can't read session file");
                BTreeMap::new()
            }
        }
    }

    fn save(&self, values: &BTreeMap<String, String>) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating {}", dir.display()))?;
        }
        let body = toml::to_string_pretty(values).context("serializing session state")?;
        std::fs::write(&self.path, body)
            .with_context(|| format!("writing {}", self.path.display()))?;
        Ok(())
    }
}

impl Store for FileStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.lock().get(key).cloned()
    }

    // Changes are committed to memory only once they are on disk.
    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut values = self.values.lock();
        let mut next = values.clone();
        next.insert(key.to_string(), value.to_string());
        self.save(&next)?;
        *values = next;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut values = self.values.lock();
        if !values.contains_key(key) {
            return Ok(());
        }
        let mut next = values.clone();
        next.remove(key);
        self.save(&next)?;
        *values = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{THREAD_ID_KEY, USER_ID_KEY};

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("hello-patient-test-{}-{name}", std::process::id()))
            .join("session.toml")
    }

    #[test]
    fn memory_store_roundtrip() {
        let store = MemoryStore::with_values([(USER_ID_KEY, "1")]);
        assert_eq!(store.get(USER_ID_KEY).as_deref(), Some("1"));
        store.set(THREAD_ID_KEY, "42").unwrap();
        store.remove(USER_ID_KEY).unwrap();
        assert_eq!(store.get(USER_ID_KEY), None);
        assert_eq!(store.get(THREAD_ID_KEY).as_deref(), Some("42"));
    }

    #[test]
    fn file_store_survives_reopen() {
        let path = temp_path("reopen");
        let _ = std::fs::remove_file(&path);

        let store = FileStore::open(&path);
        store.set(USER_ID_KEY, "1").unwrap();
        store.set(THREAD_ID_KEY, "42").unwrap();
        drop(store);

        let reopened = FileStore::open(&path);
        assert_eq!(reopened.get(USER_ID_KEY).as_deref(), Some("1"));
        assert_eq!(reopened.get(THREAD_ID_KEY).as_deref(), Some("42"));

        reopened.remove(THREAD_ID_KEY).unwrap();
        let again = FileStore::open(&path);
        assert_eq!(again.get(THREAD_ID_KEY), None);
        assert_eq!(again.get(USER_ID_KEY).as_deref(), Some("1"));

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn failed_write_leaves_store_unchanged() {
        let path = temp_path("unwritable");
        let dir = path.parent().unwrap().to_path_buf();
        std::fs::create_dir_all(&dir).unwrap();
        // A regular file where the state file's directory should be.
        let blocker = dir.join("blocker");
        std::fs::write(&blocker, "").unwrap();

        let store = FileStore::open(blocker.join("session.toml"));
        assert!(store.set(USER_ID_KEY, "1").is_err());
        assert_eq!(store.get(USER_ID_KEY), None);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn corrupt_file_is_empty_store() {
        let path = temp_path("corrupt");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "this is = = not toml").unwrap();

        let store = FileStore::open(&path);
        assert_eq!(store.get(USER_ID_KEY), None);

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }
}

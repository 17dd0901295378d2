use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use serde::{Serialize, de::DeserializeOwned};

/// Directory-backed JSON store for the little durable state the core keeps:
/// lifetime statistics and fitted model coefficients.
#[derive(Debug, Clone)]
pub struct StateStore {
    dir: PathBuf,
}

impl StateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// `$XDG_STATE_HOME/cadenza-power`, or the local data directory.
    pub fn default_dir() -> Result<PathBuf> {
        let state_dir = dirs::state_dir()
            .or_else(dirs::data_local_dir)
            .context("couldn't find state directory")?;

        Ok(state_dir.join("cadenza-power"))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.json"))
    }

    /// Write `value` under `name`, replacing any previous record.
    pub fn save<T: Serialize>(&self, name: &str, value: &T) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("couldn't create {}", self.dir.display()))?;

        let json = serde_json::to_string_pretty(value)?;
        let path = self.path(name);

        // write-then-rename so a crash never leaves a truncated record
        let tmp = self.dir.join(format!(".{name}.json.tmp"));
        fs::write(&tmp, json).with_context(|| format!("couldn't write {}", tmp.display()))?;
        fs::rename(&tmp, &path).with_context(|| format!("couldn't replace {}", path.display()))?;

        log::debug!("saved {name} to {:?}", path);
        Ok(())
    }

    /// Read the record stored under `name`.
    pub fn load<T: DeserializeOwned>(&self, name: &str) -> Result<T> {
        let path = self.path(name);
        let json = fs::read_to_string(&path)
            .with_context(|| format!("couldn't read {}", path.display()))?;

        serde_json::from_str(&json).with_context(|| format!("couldn't parse {}", path.display()))
    }

    pub fn remove(&self, name: &str) -> Result<()> {
        let path = self.path(name);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("couldn't remove {}", path.display())),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Totals {
        total: f64,
        num_points: f64,
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("nested"));

        let totals = Totals {
            total: 0.1 + 0.2,
            num_points: 3.0,
        };
        store.save("totals", &totals).unwrap();

        let loaded: Totals = store.load("totals").unwrap();
        assert_eq!(loaded, totals);
    }

    #[test]
    fn test_missing_and_corrupt_records_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());

        assert!(store.load::<Totals>("missing").is_err());

        fs::write(store.path("corrupt"), "{ not json").unwrap();
        assert!(store.load::<Totals>("corrupt").is_err());
    }

    #[test]
    fn test_remove_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());

        store.save("gone", &1.0).unwrap();
        store.remove("gone").unwrap();
        store.remove("gone").unwrap();
        assert!(!store.path("gone").exists());
    }
}

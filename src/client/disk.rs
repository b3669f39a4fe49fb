//! Last-known-good snapshots on local disk.

use crate::core::properties;
use crate::error::Result;
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Reads and writes `{dir}/{tenant}+{cluster}+{namespace}.properties`.
#[derive(Debug, Clone)]
pub struct DiskSnapshotStore {
    dir: PathBuf,
    tenant: String,
    cluster: String,
}

impl DiskSnapshotStore {
    /// Snapshots for `tenant` and `cluster` under `dir`.
    pub fn new(dir: impl Into<PathBuf>, tenant: impl Into<String>, cluster: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            tenant: tenant.into(),
            cluster: cluster.into(),
        }
    }

    /// Directory holding the snapshot files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File holding the snapshot of `namespace`.
    pub fn path_for(&self, namespace: &str) -> PathBuf {
        self.dir
            .join(format!("{}+{}+{}.properties", self.tenant, self.cluster, namespace))
    }

    /// Stored snapshot of `namespace`, or `None` if there is none.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read.
    pub fn load(&self, namespace: &str) -> Result<Option<BTreeMap<String, String>>> {
        match fs::read_to_string(self.path_for(namespace)) {
            Ok(text) => Ok(Some(properties::parse(&text))),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Replace the stored snapshot of `namespace`.
    ///
    /// The file is written next to its final name and renamed into place, so
    /// a reader never sees a partial snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or file cannot be written.
    pub fn persist(&self, namespace: &str, snapshot: &BTreeMap<String, String>) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(namespace);
        let staging = path.with_extension("properties.tmp");
        fs::write(&staging, properties::render(snapshot))?;
        fs::rename(&staging, &path)?;
        debug!(path = %path.display(), keys = snapshot.len(), "Persisted config snapshot");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_path_layout() {
        let store = DiskSnapshotStore::new("/var/cache/relay", "shop", "default");
        assert_eq!(
            store.path_for("application"),
            PathBuf::from("/var/cache/relay/shop+default+application.properties")
        );
    }

    #[test]
    fn test_persist_then_load() {
        let dir = TempDir::new().unwrap();
        let store = DiskSnapshotStore::new(dir.path().join("nested"), "shop", "default");
        let snapshot = BTreeMap::from([
            ("timeout".to_string(), "30".to_string()),
            ("greeting".to_string(), "hello world".to_string()),
        ]);

        store.persist("application", &snapshot).unwrap();
        assert_eq!(store.load("application").unwrap(), Some(snapshot));
    }

    #[test]
    fn test_missing_snapshot_is_none() {
        let dir = TempDir::new().unwrap();
        let store = DiskSnapshotStore::new(dir.path(), "shop", "default");
        assert_eq!(store.load("absent").unwrap(), None);
    }
}

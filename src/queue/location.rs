//! On-disk layout of a task store: `{root}/cache/{group}/{group}.db`.

use std::path::PathBuf;

use tracing::debug;

use super::StoreError;

const CACHE_DIR: &str = "cache";
const STORE_EXTENSION: &str = "db";

/// Where one group's store lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreLocation {
    root_dir: PathBuf,
    group_key: String,
}

impl StoreLocation {
    pub fn new(root_dir: impl Into<PathBuf>, group_key: impl Into<String>) -> Self {
        Self {
            root_dir: root_dir.into(),
            group_key: group_key.into(),
        }
    }

    #[must_use]
    pub fn group_key(&self) -> &str {
        &self.group_key
    }

    /// Directory holding the store file and its WAL side files.
    #[must_use]
    pub fn dir(&self) -> PathBuf {
        self.root_dir.join(CACHE_DIR).join(&self.group_key)
    }

    /// Path of the store file itself.
    #[must_use]
    pub fn db_path(&self) -> PathBuf {
        self.dir()
            .join(format!("{}.{STORE_EXTENSION}", self.group_key))
    }

    /// True when a store file was persisted by an earlier run.
    #[must_use]
    pub fn exists(&self) -> bool {
        self.db_path().is_file()
    }

    /// Removes all persisted state for the group. Missing state is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] when the directory exists but cannot be removed.
    pub async fn remove(&self) -> Result<(), StoreError> {
        let dir = self.dir();
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {
                debug!(dir = %dir.display(), "removed task store");
                Ok(())
            }
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(error) => Err(StoreError::io(dir, &error)),
        }
    }
}

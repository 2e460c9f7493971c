//! Persistence of configuration and pipeline progress
//!
//! Four independent slots (config, state, parsed, categorized) on top of a
//! plain key-value store. Every write replaces the whole value of a slot, so
//! a reader never sees a half-written progress record.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::bookmarks::BookmarkRecord;
use crate::config::AppConfig;
use crate::error::StoreError;
use crate::state::PipelineState;

pub const CONFIG_KEY: &str = "config";
pub const STATE_KEY: &str = "state";
pub const PARSED_KEY: &str = "parsed";
pub const CATEGORIZED_KEY: &str = "categorized";

pub trait KeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn put(&self, key: &str, value: &str) -> Result<(), StoreError>;
    fn remove(&self, key: &str) -> Result<(), StoreError>;
}

/// One `<key>.json` file per slot inside a directory
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// `$HOME/.bookmark-categorizer`
    pub fn default_dir() -> anyhow::Result<PathBuf> {
        let home = std::env::var("HOME")?;
        Ok(PathBuf::from(home).join(".bookmark-categorizer"))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }

    fn io_error(key: &str) -> impl FnOnce(std::io::Error) -> StoreError + '_ {
        move |source| StoreError::Io {
            key: key.to_string(),
            source,
        }
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(None);
        }
        fs::read_to_string(&path).map(Some).map_err(Self::io_error(key))
    }

    fn put(&self, key: &str, value: &str) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir).map_err(Self::io_error(key))?;

        // Write beside the target, then rename over it
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, value).map_err(Self::io_error(key))?;
        fs::rename(&tmp, &path).map_err(Self::io_error(key))?;

        debug!("Saved slot '{}' ({} bytes)", key, value.len());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Self::io_error(key)(e)),
        }
    }
}

/// Typed access to the four slots
pub struct PipelineStore<S: KeyValueStore> {
    inner: S,
}

impl<S: KeyValueStore> PipelineStore<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }

    #[cfg(test)]
    pub fn inner(&self) -> &S {
        &self.inner
    }

    fn load<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        match self.inner.get(key)? {
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|source| StoreError::Json {
                    key: key.to_string(),
                    source,
                }),
            None => Ok(None),
        }
    }

    fn save<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        let raw = serde_json::to_string_pretty(value).map_err(|source| StoreError::Json {
            key: key.to_string(),
            source,
        })?;
        self.inner.put(key, &raw)
    }

    /// Stored configuration, or defaults when none was saved
    pub fn load_config(&self) -> Result<AppConfig, StoreError> {
        Ok(self.load(CONFIG_KEY)?.unwrap_or_default())
    }

    pub fn save_config(&self, config: &AppConfig) -> Result<(), StoreError> {
        self.save(CONFIG_KEY, config)
    }

    pub fn clear_config(&self) -> Result<(), StoreError> {
        self.inner.remove(CONFIG_KEY)
    }

    pub fn load_state(&self) -> Result<Option<PipelineState>, StoreError> {
        self.load(STATE_KEY)
    }

    pub fn save_state(&self, state: &PipelineState) -> Result<(), StoreError> {
        self.save(STATE_KEY, state)
    }

    pub fn clear_state(&self) -> Result<(), StoreError> {
        self.inner.remove(STATE_KEY)
    }

    pub fn load_parsed(&self) -> Result<Option<Vec<BookmarkRecord>>, StoreError> {
        self.load(PARSED_KEY)
    }

    pub fn save_parsed(&self, bookmarks: &[BookmarkRecord]) -> Result<(), StoreError> {
        self.save(PARSED_KEY, bookmarks)
    }

    pub fn clear_parsed(&self) -> Result<(), StoreError> {
        self.inner.remove(PARSED_KEY)
    }

    pub fn load_categorized(&self) -> Result<Option<Vec<BookmarkRecord>>, StoreError> {
        self.load(CATEGORIZED_KEY)
    }

    pub fn save_categorized(&self, bookmarks: &[BookmarkRecord]) -> Result<(), StoreError> {
        self.save(CATEGORIZED_KEY, bookmarks)
    }

    pub fn clear_categorized(&self) -> Result<(), StoreError> {
        self.inner.remove(CATEGORIZED_KEY)
    }

    /// Persist one batch worth of progress: the categorized list first, then the state
    pub fn save_progress(&self, categorized: &[BookmarkRecord], state: &PipelineState) -> Result<(), StoreError> {
        self.save_categorized(categorized)?;
        self.save_state(state)
    }

    /// "Start new": drop everything except configuration
    pub fn start_new(&self) -> Result<(), StoreError> {
        self.clear_state()?;
        self.clear_parsed()?;
        self.clear_categorized()
    }
}

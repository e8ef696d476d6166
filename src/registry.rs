//! Model catalog and the persisted model selection.
//!
//! The selection survives restarts through a [`KeyValueStore`]. Tests use
//! [`MemoryStore`]; the REPL uses [`FileStore`].

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use rand::seq::SliceRandom;

use crate::error::{Error, Result};
use crate::types::{ModelInfo, ModelSelection};

/// Key under which the selected model is persisted.
pub const SELECTED_MODEL_KEY: &str = "selectedModel";

/// A small string-to-string store that outlives the process.
pub trait KeyValueStore: Send {
    /// Read a value.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write a value.
    fn set(&mut self, key: &str, value: &str) -> Result<()>;

    /// Delete a value. Deleting a missing key is not an error.
    fn remove(&mut self, key: &str) -> Result<()>;
}

/// In-memory store.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    values: BTreeMap<String, String>,
}

impl MemoryStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        self.values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<()> {
        self.values.remove(key);
        Ok(())
    }
}

/// A store kept as one JSON object in a file.
///
/// The file is read once when the store opens and rewritten on every change.
/// A missing file is an empty store.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
    values: BTreeMap<String, String>,
}

impl FileStore {
    /// Open the store at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let values = match fs::read_to_string(&path) {
            Ok(text) if text.trim().is_empty() => BTreeMap::new(),
            Ok(text) => serde_json::from_str(&text).map_err(|e| {
                Error::serialization(
                    format!("failed to parse state file {}: {e}", path.display()),
                    Some(Box::new(e)),
                )
            })?,
            Err(err) if err.kind() == io::ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => {
                return Err(Error::io(
                    format!("failed to read state file {}", path.display()),
                    err,
                ));
            }
        };
        Ok(Self { path, values })
    }

    /// Where the store lives.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write `values` out. The in-memory map is only replaced by the caller
    /// once this succeeds.
    fn write(&self, values: &BTreeMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .map_err(|err| Error::io("failed to create state directory", err))?;
        }
        let text = serde_json::to_string_pretty(values)?;
        fs::write(&self.path, text).map_err(|err| {
            Error::io(
                format!("failed to write state file {}", self.path.display()),
                err,
            )
        })
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let mut values = self.values.clone();
        values.insert(key.to_string(), value.to_string());
        self.write(&values)?;
        self.values = values;
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<()> {
        if !self.values.contains_key(key) {
            return Ok(());
        }
        let mut values = self.values.clone();
        values.remove(key);
        self.write(&values)?;
        self.values = values;
        Ok(())
    }
}

/// The models the backend offers and the one the user picked.
pub struct ModelRegistry<S: KeyValueStore> {
    store: S,
    models: Vec<String>,
    selection: ModelSelection,
}

impl<S: KeyValueStore> ModelRegistry<S> {
    /// Load the persisted selection from `store`. The catalog starts empty.
    pub fn load(store: S) -> Result<Self> {
        let selection = store
            .get(SELECTED_MODEL_KEY)?
            .map(ModelSelection::new)
            .unwrap_or_default();
        Ok(Self {
            store,
            models: Vec::new(),
            selection,
        })
    }

    /// Replace the catalog with what the backend reported.
    ///
    /// If nothing is selected and the catalog is non-empty, a random model is
    /// selected and persisted.
    pub fn populate(&mut self, models: Vec<ModelInfo>) -> Result<()> {
        self.models = models.into_iter().map(|model| model.id).collect();
        if self.selection.is_empty()
            && let Some(choice) = self.models.choose(&mut rand::thread_rng()).cloned()
        {
            tracing::info!(model = %choice, "no model selected; picked one at random");
            self.select(&choice)?;
        }
        Ok(())
    }

    /// Select a model and persist the choice. An empty id clears the
    /// selection.
    pub fn select(&mut self, id: &str) -> Result<()> {
        let selection = ModelSelection::new(id);
        match selection.id() {
            Some(id) => {
                if !self.models.is_empty() && !self.models.iter().any(|model| model == id) {
                    tracing::warn!(model = %id, "selected model is not in the catalog");
                }
                self.store.set(SELECTED_MODEL_KEY, id)?;
            }
            None => self.store.remove(SELECTED_MODEL_KEY)?,
        }
        self.selection = selection;
        Ok(())
    }

    /// The current selection.
    pub fn selection(&self) -> &ModelSelection {
        &self.selection
    }

    /// The catalog, in the order the backend listed it.
    pub fn models(&self) -> &[String] {
        &self.models
    }

    /// Returns true if `id` is in the catalog.
    pub fn contains(&self, id: &str) -> bool {
        self.models.iter().any(|model| model == id)
    }

    /// The underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog(ids: &[&str]) -> Vec<ModelInfo> {
        ids.iter()
            .map(|id| ModelInfo {
                id: id.to_string(),
                owned_by: None,
            })
            .collect()
    }

    fn scratch_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("lmchat-{}-{name}.json", std::process::id()))
    }

    #[test]
    fn loads_persisted_selection() {
        let mut store = MemoryStore::new();
        store.set(SELECTED_MODEL_KEY, "qwen").unwrap();
        let registry = ModelRegistry::load(store).unwrap();
        assert_eq!(registry.selection().as_str(), "qwen");
    }

    #[test]
    fn populate_keeps_existing_selection() {
        let mut store = MemoryStore::new();
        store.set(SELECTED_MODEL_KEY, "b").unwrap();
        let mut registry = ModelRegistry::load(store).unwrap();
        registry.populate(catalog(&["a", "b", "c"])).unwrap();
        assert_eq!(registry.selection().as_str(), "b");
        assert_eq!(registry.models(), &["a", "b", "c"]);
    }

    #[test]
    fn populate_picks_and_persists_a_default() {
        let mut registry = ModelRegistry::load(MemoryStore::new()).unwrap();
        registry.populate(catalog(&["a", "b"])).unwrap();
        let picked = registry.selection().as_str().to_string();
        assert!(registry.contains(&picked));
        assert_eq!(
            registry.store().get(SELECTED_MODEL_KEY).unwrap(),
            Some(picked)
        );
    }

    #[test]
    fn empty_catalog_leaves_selection_empty() {
        let mut registry = ModelRegistry::load(MemoryStore::new()).unwrap();
        registry.populate(Vec::new()).unwrap();
        assert!(registry.selection().is_empty());
        assert_eq!(registry.store().get(SELECTED_MODEL_KEY).unwrap(), None);
    }

    #[test]
    fn select_persists_and_clear_removes() {
        let mut registry = ModelRegistry::load(MemoryStore::new()).unwrap();
        registry.select("m").unwrap();
        assert_eq!(
            registry.store().get(SELECTED_MODEL_KEY).unwrap().as_deref(),
            Some("m")
        );
        registry.select("").unwrap();
        assert!(registry.selection().is_empty());
        assert_eq!(registry.store().get(SELECTED_MODEL_KEY).unwrap(), None);
    }

    #[test]
    fn file_store_round_trips_across_opens() {
        let path = scratch_path("round-trip");
        let _ = fs::remove_file(&path);
        {
            let mut registry = ModelRegistry::load(FileStore::open(&path).unwrap()).unwrap();
            registry.select("llama").unwrap();
        }
        let registry = ModelRegistry::load(FileStore::open(&path).unwrap()).unwrap();
        assert_eq!(registry.selection().as_str(), "llama");
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn file_store_missing_file_is_empty() {
        let path = scratch_path("missing");
        let _ = fs::remove_file(&path);
        let store = FileStore::open(&path).unwrap();
        assert_eq!(store.get(SELECTED_MODEL_KEY).unwrap(), None);
        assert!(!path.exists());
    }

    #[test]
    fn failed_write_leaves_store_and_selection_alone() {
        let path = scratch_path("unwritable");
        let _ = fs::remove_dir_all(&path);
        let _ = fs::remove_file(&path);
        let mut registry = ModelRegistry::load(FileStore::open(&path).unwrap()).unwrap();
        registry.select("kept").unwrap();
        fs::remove_file(&path).unwrap();
        fs::create_dir(&path).unwrap();

        assert!(registry.select("lost").is_err());
        assert_eq!(registry.selection().as_str(), "kept");
        assert_eq!(
            registry.store().get(SELECTED_MODEL_KEY).unwrap().as_deref(),
            Some("kept")
        );
        assert!(registry.select("").is_err());
        assert_eq!(
            registry.store().get(SELECTED_MODEL_KEY).unwrap().as_deref(),
            Some("kept")
        );
        let _ = fs::remove_dir_all(&path);
    }

    #[test]
    fn file_store_rejects_garbage() {
        let path = scratch_path("garbage");
        fs::write(&path, "not json").unwrap();
        assert!(matches!(
            FileStore::open(&path),
            Err(Error::Serialization { .. })
        ));
        let _ = fs::remove_file(&path);
    }
}

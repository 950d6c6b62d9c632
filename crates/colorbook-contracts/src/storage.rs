use std::path::{Path, PathBuf};

use serde_json::{Map, Value};

use crate::error::PersistenceError;

/// One JSON object file holding named records, the on-disk counterpart of
/// browser local storage. Only keys touched through this handle are written
/// back, so two handles editing different keys do not clobber each other.
#[derive(Debug, Clone)]
pub struct KeyValueStore {
    path: PathBuf,
    payload: Option<Map<String, Value>>,
    dirty_keys: Vec<String>,
    removed_keys: Vec<String>,
}

impl KeyValueStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            payload: None,
            dirty_keys: Vec::new(),
            removed_keys: Vec::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&mut self, key: &str) -> Option<Value> {
        self.refresh().get(key).cloned()
    }

    pub fn contains(&mut self, key: &str) -> bool {
        self.refresh().contains_key(key)
    }

    pub fn set(&mut self, key: &str, value: Value) -> Result<(), PersistenceError> {
        let payload = self.refresh();
        if payload.get(key) == Some(&value) {
            return Ok(());
        }
        payload.insert(key.to_string(), value);
        self.removed_keys.retain(|existing| existing != key);
        if !self.dirty_keys.iter().any(|existing| existing == key) {
            self.dirty_keys.push(key.to_string());
        }
        self.flush()
    }

    pub fn remove(&mut self, key: &str) -> Result<(), PersistenceError> {
        let payload = self.refresh();
        if payload.remove(key).is_none() {
            return Ok(());
        }
        self.dirty_keys.retain(|existing| existing != key);
        if !self.removed_keys.iter().any(|existing| existing == key) {
            self.removed_keys.push(key.to_string());
        }
        self.flush()
    }

    pub fn flush(&mut self) -> Result<(), PersistenceError> {
        if self.dirty_keys.is_empty() && self.removed_keys.is_empty() {
            return Ok(());
        }
        let Some(payload) = &self.payload else {
            return Ok(());
        };

        let mut on_disk = read_json_object(&self.path).unwrap_or_default();
        for key in &self.dirty_keys {
            if let Some(value) = payload.get(key) {
                on_disk.insert(key.clone(), value.clone());
            }
        }
        for key in &self.removed_keys {
            on_disk.remove(key);
        }
        write_json_object(&self.path, &on_disk)?;
        self.payload = Some(on_disk);
        self.dirty_keys.clear();
        self.removed_keys.clear();
        Ok(())
    }

    fn refresh(&mut self) -> &mut Map<String, Value> {
        self.payload
            .insert(read_json_object(&self.path).unwrap_or_default())
    }
}

fn read_json_object(path: &Path) -> Option<Map<String, Value>> {
    let raw = std::fs::read_to_string(path).ok()?;
    let parsed: Value = serde_json::from_str(&raw).ok()?;
    parsed.as_object().cloned()
}

fn write_json_object(path: &Path, payload: &Map<String, Value>) -> Result<(), PersistenceError> {
    let write_error = |source| PersistenceError::Write {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(write_error)?;
    }
    let body = serde_json::to_string_pretty(&Value::Object(payload.clone())).map_err(|err| {
        PersistenceError::Corrupt {
            key: "*".to_string(),
            message: err.to_string(),
        }
    })?;
    std::fs::write(path, body).map_err(write_error)?;
    Ok(())
}

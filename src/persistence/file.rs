use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use log::{error, info, warn};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::KvStore;
use crate::error::Result;

/// On-disk document: namespace → key → value bytes.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct KvDocument {
    namespaces: BTreeMap<String, BTreeMap<String, Vec<u8>>>,
}

impl KvDocument {
    fn load(path: &Path) -> Self {
        match fs::read(path) {
            Ok(bytes) => match serde_json::from_slice::<KvDocument>(&bytes) {
                Ok(doc) => {
                    info!(
                        "Loaded {} storage namespaces from {:?}",
                        doc.namespaces.len(),
                        path
                    );
                    doc
                }
                Err(e) => {
                    warn!("Failed to parse storage file: {}", e);
                    Self::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No storage file found at {:?} (first run)", path);
                Self::default()
            }
            Err(e) => {
                error!("Failed to read storage file: {}", e);
                Self::default()
            }
        }
    }

    fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_vec_pretty(self)?;
        fs::write(path, data)?;
        Ok(())
    }
}

/// [`KvStore`] backed by a JSON file, rewritten on every mutation.
pub struct FileKvStore {
    path: PathBuf,
    doc: RwLock<KvDocument>,
}

impl FileKvStore {
    /// Open the store at `path`. A missing or unreadable file starts empty.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let doc = KvDocument::load(&path);
        Self {
            path,
            doc: RwLock::new(doc),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Drop every entry and remove the backing file.
    pub fn clear(&self) -> Result<()> {
        let mut doc = self.doc.write();
        doc.namespaces.clear();
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl KvStore for FileKvStore {
    fn get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self
            .doc
            .read()
            .namespaces
            .get(namespace)
            .and_then(|entries| entries.get(key))
            .cloned())
    }

    fn set(&self, namespace: &str, key: &str, value: &[u8]) -> Result<()> {
        let mut doc = self.doc.write();
        doc.namespaces
            .entry(namespace.to_string())
            .or_default()
            .insert(key.to_string(), value.to_vec());
        doc.save(&self.path)
    }

    fn erase(&self, namespace: &str, key: &str) -> Result<bool> {
        let mut doc = self.doc.write();
        let Some(entries) = doc.namespaces.get_mut(namespace) else {
            return Ok(false);
        };
        if entries.remove(key).is_none() {
            return Ok(false);
        }
        if entries.is_empty() {
            doc.namespaces.remove(namespace);
        }
        doc.save(&self.path)?;
        Ok(true)
    }
}

//! Storage collaborators: where finished save blobs live.
//!
//! Layout inside a [`FileStore`] directory:
//! ```text
//! saves/
//!   <slot>.bin         - the save blob, byte for byte
//!   <slot>.meta.json   - display name, size and sha-256 of the blob
//! ```

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Current schema version of the `.meta.json` sidecar.
pub const META_SCHEMA_VERSION: u32 = 1;

/// Errors from save storage.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("integrity check failed: expected {expected}, got {actual}")]
    IntegrityMismatch { expected: String, actual: String },
    #[error("schema version mismatch: file has v{file_version}, expected v{expected_version}")]
    SchemaMismatch {
        file_version: u32,
        expected_version: u32,
    },
    #[error("no save in slot `{0}`")]
    UnknownSlot(String),
    #[error("invalid slot name `{0}`")]
    InvalidSlot(String),
}

/// A finished save handed to storage.
#[derive(Debug, Clone)]
pub struct SaveRequest {
    /// Storage key.
    pub slot: String,
    /// Name shown to players; not interpreted by storage.
    pub display_name: String,
    pub data: Vec<u8>,
}

/// A save handed back by storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedBlob {
    pub display_name: String,
    pub data: Vec<u8>,
}

/// Where save blobs are kept. The blob is opaque to every implementation.
pub trait SaveStore {
    fn write(&mut self, request: SaveRequest) -> Result<(), StoreError>;

    fn read(&self, slot: &str) -> Result<SavedBlob, StoreError>;

    /// Slots that currently hold a save, sorted.
    fn slots(&self) -> Result<Vec<String>, StoreError>;
}

/// In-memory store for tests and tools.
#[derive(Debug, Default)]
pub struct MemoryStore {
    saves: BTreeMap<String, SavedBlob>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SaveStore for MemoryStore {
    fn write(&mut self, request: SaveRequest) -> Result<(), StoreError> {
        validate_slot(&request.slot)?;
        self.saves.insert(
            request.slot,
            SavedBlob {
                display_name: request.display_name,
                data: request.data,
            },
        );
        Ok(())
    }

    fn read(&self, slot: &str) -> Result<SavedBlob, StoreError> {
        self.saves
            .get(slot)
            .cloned()
            .ok_or_else(|| StoreError::UnknownSlot(slot.to_owned()))
    }

    fn slots(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.saves.keys().cloned().collect())
    }
}

/// Metadata stored next to each blob.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveMeta {
    pub schema_version: u32,
    pub display_name: String,
    pub size: u64,
    pub sha256: String,
}

/// Directory-backed store with an integrity check on every read.
#[derive(Debug)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Open or create a store at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let root = path.as_ref().to_path_buf();
        fs::create_dir_all(root.join("saves"))?;
        Ok(Self { root })
    }

    /// Get the path to the store root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn blob_path(&self, slot: &str) -> PathBuf {
        self.root.join("saves").join(format!("{slot}.bin"))
    }

    fn meta_path(&self, slot: &str) -> PathBuf {
        self.root.join("saves").join(format!("{slot}.meta.json"))
    }

    /// Read and version-check the metadata of a slot.
    pub fn meta(&self, slot: &str) -> Result<SaveMeta, StoreError> {
        validate_slot(slot)?;
        let path = self.meta_path(slot);
        if !path.exists() {
            return Err(StoreError::UnknownSlot(slot.to_owned()));
        }
        let meta: SaveMeta = serde_json::from_reader(File::open(&path)?)?;
        if meta.schema_version != META_SCHEMA_VERSION {
            return Err(StoreError::SchemaMismatch {
                file_version: meta.schema_version,
                expected_version: META_SCHEMA_VERSION,
            });
        }
        Ok(meta)
    }
}

impl SaveStore for FileStore {
    fn write(&mut self, request: SaveRequest) -> Result<(), StoreError> {
        validate_slot(&request.slot)?;
        let meta = SaveMeta {
            schema_version: META_SCHEMA_VERSION,
            display_name: request.display_name,
            size: request.data.len() as u64,
            sha256: sha256_hex(&request.data),
        };
        // Blob first: a meta file never points at a blob that is not there yet.
        atomic_write(&self.blob_path(&request.slot), &request.data)?;
        atomic_write(
            &self.meta_path(&request.slot),
            &serde_json::to_vec_pretty(&meta)?,
        )?;
        tracing::debug!(slot = %request.slot, bytes = meta.size, "save written");
        Ok(())
    }

    fn read(&self, slot: &str) -> Result<SavedBlob, StoreError> {
        let meta = self.meta(slot)?;
        let data = fs::read(self.blob_path(slot))?;
        let actual = sha256_hex(&data);
        if actual != meta.sha256 {
            return Err(StoreError::IntegrityMismatch {
                expected: meta.sha256,
                actual,
            });
        }
        Ok(SavedBlob {
            display_name: meta.display_name,
            data,
        })
    }

    fn slots(&self) -> Result<Vec<String>, StoreError> {
        let mut slots = Vec::new();
        for entry in fs::read_dir(self.root.join("saves"))? {
            let name = entry?.file_name();
            if let Some(slot) = name.to_str().and_then(|n| n.strip_suffix(".meta.json")) {
                slots.push(slot.to_owned());
            }
        }
        slots.sort();
        Ok(slots)
    }
}

/// Slot names become file names: keep them to `[A-Za-z0-9_-]`, not empty.
fn validate_slot(slot: &str) -> Result<(), StoreError> {
    let valid = !slot.is_empty()
        && slot
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidSlot(slot.to_owned()))
    }
}

/// Write to `{path}.tmp`, sync, then rename over `path`.
fn atomic_write(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let mut file = File::create(&tmp)?;
    file.write_all(data)?;
    file.sync_all()?;
    fs::rename(&tmp, path)
}

fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

#![deny(warnings)]

//! Persistence layer: saved production chains in a local JSON document.
//!
//! The store is an explicit value: open it once, pass it by `&mut` to
//! whatever mutates it, and every mutation is written through to disk.

use chrono::Utc;
use prod_core::{validate_new_chain, NewChain, ProductionChain, ValidationError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

/// Fixed storage key; also the file stem of the document on disk.
pub const STORAGE_NAMESPACE: &str = "anno117-production-storage";

/// Environment variable overriding the data directory.
pub const DATA_DIR_ENV: &str = "PRODCALC_DATA_DIR";

/// Version written into the document envelope.
pub const STORAGE_VERSION: u32 = 0;

/// Errors that can occur while loading or saving chains.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid chain: {0}")]
    Invalid(#[from] ValidationError),

    #[error("unsupported storage version {0}")]
    UnsupportedVersion(u32),
}

/// Where the store lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub data_dir: PathBuf,
    pub namespace: String,
}

impl StoreConfig {
    pub fn new(data_dir: PathBuf) -> Self {
        Self {
            data_dir,
            namespace: STORAGE_NAMESPACE.to_string(),
        }
    }

    /// Data directory from `PRODCALC_DATA_DIR`, else the default.
    pub fn from_env() -> Self {
        match std::env::var_os(DATA_DIR_ENV) {
            Some(dir) if !dir.is_empty() => Self::new(PathBuf::from(dir)),
            _ => Self::default(),
        }
    }

    /// `<data_dir>/<namespace>.json`
    pub fn storage_path(&self) -> PathBuf {
        self.data_dir.join(format!("{}.json", self.namespace))
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::new(PathBuf::from("./data"))
    }
}

#[derive(Deserialize)]
struct Document {
    #[serde(default)]
    state: StoredState,
    #[serde(default)]
    version: u32,
}

#[derive(Deserialize, Default)]
struct StoredState {
    #[serde(default)]
    chains: Vec<ProductionChain>,
}

#[derive(Serialize)]
struct DocumentRef<'a> {
    state: StateRef<'a>,
    version: u32,
}

#[derive(Serialize)]
struct StateRef<'a> {
    chains: &'a [ProductionChain],
}

/// Saved production chains, in creation order.
#[derive(Debug)]
pub struct ChainStore {
    path: Option<PathBuf>,
    chains: Vec<ProductionChain>,
}

impl ChainStore {
    /// Load the store described by `config`. A missing file is an empty store.
    pub fn open(config: &StoreConfig) -> Result<Self, StoreError> {
        Self::open_path(config.storage_path())
    }

    /// Load the store from an explicit document path.
    pub fn open_path(path: PathBuf) -> Result<Self, StoreError> {
        let chains = if path.exists() {
            let text = fs::read_to_string(&path)?;
            let doc: Document = serde_json::from_str(&text)?;
            if doc.version > STORAGE_VERSION {
                return Err(StoreError::UnsupportedVersion(doc.version));
            }
            doc.state.chains
        } else {
            Vec::new()
        };
        debug!("Loaded {} chains from {:?}", chains.len(), path);
        Ok(Self {
            path: Some(path),
            chains,
        })
    }

    /// A store that never touches disk.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            chains: Vec::new(),
        }
    }

    /// Backing document, `None` for in-memory stores.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn list(&self) -> &[ProductionChain] {
        &self.chains
    }

    pub fn len(&self) -> usize {
        self.chains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&ProductionChain> {
        self.chains.iter().find(|c| c.id == id)
    }

    /// Chains whose name, or any building name, contains `query`
    /// (case-insensitive). A blank query matches everything.
    pub fn search(&self, query: &str) -> Vec<&ProductionChain> {
        let needle = query.trim().to_lowercase();
        self.chains
            .iter()
            .filter(|c| {
                needle.is_empty()
                    || c.name.to_lowercase().contains(&needle)
                    || c
                        .buildings
                        .iter()
                        .any(|b| b.name.to_lowercase().contains(&needle))
            })
            .collect()
    }

    /// Validate, stamp and save a new chain.
    pub fn add(&mut self, chain: NewChain) -> Result<&ProductionChain, StoreError> {
        self.add_at(chain, Utc::now().timestamp_millis())
    }

    /// As [`ChainStore::add`] with an explicit creation time in milliseconds.
    pub fn add_at(&mut self, chain: NewChain, now_ms: i64) -> Result<&ProductionChain, StoreError> {
        validate_new_chain(&chain)?;
        let id = self.unique_id(now_ms);
        self.chains.push(ProductionChain::from_new(chain, id, now_ms));
        if let Err(e) = self.save() {
            self.chains.pop();
            return Err(e);
        }
        let added = &self.chains[self.chains.len() - 1];
        info!(id = %added.id, name = %added.name, "Saved production chain");
        Ok(added)
    }

    /// Delete a chain. Returns `None` (and writes nothing) when `id` is unknown.
    pub fn remove(&mut self, id: &str) -> Result<Option<ProductionChain>, StoreError> {
        let Some(pos) = self.chains.iter().position(|c| c.id == id) else {
            return Ok(None);
        };
        let removed = self.chains.remove(pos);
        if let Err(e) = self.save() {
            self.chains.insert(pos, removed);
            return Err(e);
        }
        info!(id = %removed.id, name = %removed.name, "Removed production chain");
        Ok(Some(removed))
    }

    /// Millisecond timestamp as a decimal string, bumped until unused.
    fn unique_id(&self, now_ms: i64) -> String {
        let mut candidate = now_ms;
        loop {
            let id = candidate.to_string();
            if self.get(&id).is_none() {
                return id;
            }
            candidate += 1;
        }
    }

    /// Write the document to a sibling temp file, then rename it into place.
    fn save(&self) -> Result<(), StoreError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        if let Err(e) = self.write_document(&tmp, path) {
            // a failed write must not leave a partial temp file behind
            let _ = fs::remove_file(&tmp);
            return Err(e);
        }
        debug!("Wrote {} chains to {:?}", self.chains.len(), path);
        Ok(())
    }

    fn write_document(&self, tmp: &Path, path: &Path) -> Result<(), StoreError> {
        {
            let file = fs::File::create(tmp)?;
            let mut writer = BufWriter::new(file);
            let doc = DocumentRef {
                state: StateRef {
                    chains: &self.chains,
                },
                version: STORAGE_VERSION,
            };
            serde_json::to_writer_pretty(&mut writer, &doc)?;
            writer.flush()?;
        }
        fs::rename(tmp, path)?;
        Ok(())
    }
}

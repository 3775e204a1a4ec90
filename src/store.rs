//! On-disk persistence of an alderman's held shards.
//!
//! Each shard lands in its own `shard_NNN.bin` file next to a
//! `manifest.json` sidecar recording the coding geometry, the global
//! ordering, and a hex digest per shard. Loading re-hashes every shard
//! against the manifest, so silent corruption on disk surfaces as an
//! error rather than a failed audit later.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::erasure::{EncodedDataset, ErasureError};
use crate::keys::sha256;

const MANIFEST_SCHEMA: &str = "shardkeep.manifest.v1";
const MANIFEST_FILE: &str = "manifest.json";

/// Errors surfaced while persisting or restoring shards.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying filesystem failure.
    #[error("store I/O error: {0}")]
    Io(String),
    /// The manifest was missing, malformed, or had an unexpected schema.
    #[error("invalid manifest: {0}")]
    InvalidManifest(String),
    /// A shard file's digest did not match the manifest.
    #[error("shard file {index} does not match its manifest digest")]
    DigestMismatch {
        /// Local index of the offending shard file.
        index: usize,
    },
    /// The restored parts did not form a consistent dataset.
    #[error(transparent)]
    Erasure(#[from] ErasureError),
}

#[derive(Debug, Serialize, Deserialize)]
struct Manifest {
    schema: String,
    hashes: Vec<String>,
    ordering: Vec<usize>,
    data_shards: usize,
    parity_shards: usize,
    original_len: usize,
}

/// A directory holding one dataset's shards.
#[derive(Debug, Clone)]
pub struct ShardStore {
    root: PathBuf,
}

impl ShardStore {
    /// Points the store at `root`; the directory is created on save.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn shard_path(&self, index: usize) -> PathBuf {
        self.root.join(format!("shard_{index:03}.bin"))
    }

    /// Persists the dataset: one file per shard plus the manifest.
    ///
    /// The manifest is written last via tmp-file + rename, so a crashed
    /// save never leaves a manifest pointing at missing shards.
    pub fn save(&self, dataset: &EncodedDataset) -> Result<(), StoreError> {
        fs::create_dir_all(&self.root).map_err(|err| StoreError::Io(err.to_string()))?;
        for (index, shard) in dataset.shards().iter().enumerate() {
            fs::write(self.shard_path(index), shard)
                .map_err(|err| StoreError::Io(err.to_string()))?;
        }
        let manifest = Manifest {
            schema: MANIFEST_SCHEMA.to_string(),
            hashes: dataset.hashes().iter().map(hex::encode).collect(),
            ordering: dataset.ordering().to_vec(),
            data_shards: dataset.data_shards(),
            parity_shards: dataset.parity_shards(),
            original_len: dataset.original_len(),
        };
        let contents = serde_json::to_string_pretty(&manifest)
            .map_err(|err| StoreError::Io(err.to_string()))?;
        let tmp = self.root.join(format!("{MANIFEST_FILE}.tmp"));
        fs::write(&tmp, contents).map_err(|err| StoreError::Io(err.to_string()))?;
        fs::rename(&tmp, self.root.join(MANIFEST_FILE))
            .map_err(|err| StoreError::Io(err.to_string()))?;
        Ok(())
    }

    /// Restores the dataset, verifying every shard against the manifest.
    pub fn load(&self) -> Result<EncodedDataset, StoreError> {
        let manifest = self.read_manifest(&self.root.join(MANIFEST_FILE))?;
        let mut shards = Vec::with_capacity(manifest.hashes.len());
        for (index, hash_hex) in manifest.hashes.iter().enumerate() {
            let expected: [u8; 32] = hex::decode(hash_hex)
                .ok()
                .and_then(|bytes| bytes.try_into().ok())
                .ok_or_else(|| {
                    StoreError::InvalidManifest(format!("bad digest at index {index}"))
                })?;
            let shard = fs::read(self.shard_path(index))
                .map_err(|err| StoreError::Io(err.to_string()))?;
            if sha256(&shard) != expected {
                return Err(StoreError::DigestMismatch { index });
            }
            shards.push(shard);
        }
        Ok(EncodedDataset::from_parts(
            shards,
            manifest.ordering,
            manifest.data_shards,
            manifest.parity_shards,
            manifest.original_len,
        )?)
    }

    fn read_manifest(&self, path: &Path) -> Result<Manifest, StoreError> {
        let contents = fs::read_to_string(path).map_err(|err| StoreError::Io(err.to_string()))?;
        let manifest: Manifest = serde_json::from_str(&contents)
            .map_err(|err| StoreError::InvalidManifest(err.to_string()))?;
        if manifest.schema != MANIFEST_SCHEMA {
            return Err(StoreError::InvalidManifest(format!(
                "unexpected schema {}",
                manifest.schema
            )));
        }
        if manifest.hashes.len() != manifest.ordering.len() {
            return Err(StoreError::InvalidManifest(
                "hash and ordering counts disagree".into(),
            ));
        }
        Ok(manifest)
    }
}

//! Reed–Solomon erasure coding of client files into hash-authenticated shards.
//!
//! A file is split into `d` data shards and extended with `p` parity shards
//! over GF(2^8), so that any `f = d - p` original shards reconstruct the
//! file. Every shard carries its SHA-256 digest, and every shard remembers
//! its global index in the full coded set (`ordering`), which is what lets
//! an alderman hold an arbitrary subset and still prove which shards it is
//! storing.

use reed_solomon_erasure::galois_8::ReedSolomon;
use thiserror::Error;

use crate::keys::sha256;

/// An immutable erasure-coded view of a file, or of a subset of one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedDataset {
    shards: Vec<Vec<u8>>,
    hashes: Vec<[u8; 32]>,
    ordering: Vec<usize>,
    num_data_shards: usize,
    num_parity_shards: usize,
    original_len: usize,
}

/// Errors reported by the erasure-coding engine.
#[derive(Debug, Clone, Error)]
pub enum ErasureError {
    /// The redundancy/threshold pair does not yield a usable shard count.
    #[error("invalid shard geometry for redundancy {redundancy} and threshold {threshold}")]
    InvalidGeometry {
        /// Requested redundancy factor.
        redundancy: usize,
        /// Requested reconstruction threshold.
        threshold: usize,
    },
    /// The input was empty, so no shards can be cut from it.
    #[error("dataset is too small to shard")]
    EmptyInput,
    /// A subset selection asked for more shards than the dataset holds.
    #[error("cannot select subset of size {requested} from set of {available} shards")]
    SubsetTooLarge {
        /// Number of indices requested.
        requested: usize,
        /// Number of shards available.
        available: usize,
    },
    /// A shard index was outside the dataset.
    #[error("cannot select index {index} from set of {available} shards")]
    IndexOutOfRange {
        /// Offending index.
        index: usize,
        /// Number of shards available.
        available: usize,
    },
    /// A shard's SHA-256 digest did not match its recorded hash.
    #[error("hash of shard {index} does not match encoding")]
    HashMismatch {
        /// Global index of the offending shard.
        index: usize,
    },
    /// Reconstruction inputs disagreed on the coding parameters.
    #[error("inconsistent {field} in dataset {dataset}")]
    InconsistentMetadata {
        /// Name of the disagreeing parameter.
        field: &'static str,
        /// Position of the offending dataset in the input slice.
        dataset: usize,
    },
    /// Two inputs supplied different bytes for the same global shard slot.
    #[error("shard {index} conflicts with a previously supplied copy")]
    ShardConflict {
        /// Global index of the conflicting shard.
        index: usize,
    },
    /// No datasets were supplied to reconstruction.
    #[error("no encodings passed")]
    NoDatasets,
    /// The Reed–Solomon codec rejected the operation.
    #[error("reed-solomon: {0}")]
    Coding(String),
}

impl EncodedDataset {
    /// Rebuilds a dataset from raw parts, recomputing every shard hash.
    ///
    /// Lengths of `shards` and `ordering` must agree; shard bytes are
    /// hashed fresh, so the result always satisfies the hash invariant.
    pub fn from_parts(
        shards: Vec<Vec<u8>>,
        ordering: Vec<usize>,
        num_data_shards: usize,
        num_parity_shards: usize,
        original_len: usize,
    ) -> Result<Self, ErasureError> {
        if shards.is_empty() {
            return Err(ErasureError::EmptyInput);
        }
        if shards.len() != ordering.len() {
            return Err(ErasureError::InconsistentMetadata {
                field: "ordering",
                dataset: 0,
            });
        }
        let total = num_data_shards + num_parity_shards;
        for &index in &ordering {
            if index >= total {
                return Err(ErasureError::IndexOutOfRange {
                    index,
                    available: total,
                });
            }
        }
        let hashes = shards.iter().map(|shard| sha256(shard)).collect();
        Ok(Self {
            shards,
            hashes,
            ordering,
            num_data_shards,
            num_parity_shards,
            original_len,
        })
    }

    /// Number of shards held by this dataset.
    pub fn len(&self) -> usize {
        self.shards.len()
    }

    /// True when the dataset holds no shards.
    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }

    /// The held shards, aligned with [`hashes`](Self::hashes) and
    /// [`ordering`](Self::ordering).
    pub fn shards(&self) -> &[Vec<u8>] {
        &self.shards
    }

    /// Shard bytes at a local index.
    pub fn shard(&self, index: usize) -> Option<&[u8]> {
        self.shards.get(index).map(Vec::as_slice)
    }

    /// Per-shard SHA-256 digests.
    pub fn hashes(&self) -> &[[u8; 32]] {
        &self.hashes
    }

    /// Global index of each held shard in the full coded set.
    pub fn ordering(&self) -> &[usize] {
        &self.ordering
    }

    /// Number of data shards in the full coded set.
    pub fn data_shards(&self) -> usize {
        self.num_data_shards
    }

    /// Number of parity shards in the full coded set.
    pub fn parity_shards(&self) -> usize {
        self.num_parity_shards
    }

    /// Length in bytes of the original file.
    pub fn original_len(&self) -> usize {
        self.original_len
    }

    /// Copies out the shards at `indices` as a new dataset.
    ///
    /// Each selected shard is re-hashed and checked against the recorded
    /// digest, and keeps its global `ordering` value, so the subset stays
    /// authenticated against the parent coded set.
    pub fn select_segments(&self, indices: &[usize]) -> Result<EncodedDataset, ErasureError> {
        if indices.len() > self.shards.len() {
            return Err(ErasureError::SubsetTooLarge {
                requested: indices.len(),
                available: self.shards.len(),
            });
        }
        let mut shards = Vec::with_capacity(indices.len());
        let mut hashes = Vec::with_capacity(indices.len());
        let mut ordering = Vec::with_capacity(indices.len());
        for &index in indices {
            if index >= self.shards.len() {
                return Err(ErasureError::IndexOutOfRange {
                    index,
                    available: self.shards.len(),
                });
            }
            let shard = self.shards[index].clone();
            if sha256(&shard) != self.hashes[index] {
                return Err(ErasureError::HashMismatch { index });
            }
            hashes.push(self.hashes[index]);
            ordering.push(self.ordering[index]);
            shards.push(shard);
        }
        Ok(EncodedDataset {
            shards,
            hashes,
            ordering,
            num_data_shards: self.num_data_shards,
            num_parity_shards: self.num_parity_shards,
            original_len: self.original_len,
        })
    }
}

/// Erasure-codes `data` into `n = d + p` shards.
///
/// The geometry follows `d = f*(1+r)/2` (integer division) and `p = d - f`,
/// where `f` is the reconstruction threshold and `r` the redundancy factor,
/// so any `f` of the original shards recover the file. Shards have length
/// `ceil(len/d)` with the tail zero-padded. GF(2^8) limits `n` to 256;
/// larger geometries surface as [`ErasureError::Coding`].
pub fn create_erasure_coding(
    data: &[u8],
    redundancy: usize,
    threshold: usize,
) -> Result<EncodedDataset, ErasureError> {
    let num_data_shards = (threshold * (1 + redundancy)) / 2;
    if num_data_shards == 0 || num_data_shards < threshold {
        return Err(ErasureError::InvalidGeometry {
            redundancy,
            threshold,
        });
    }
    let num_parity_shards = num_data_shards - threshold;
    if data.is_empty() {
        return Err(ErasureError::EmptyInput);
    }
    let shard_len = data.len().div_ceil(num_data_shards);
    let total = num_data_shards + num_parity_shards;

    let mut shards = vec![vec![0u8; shard_len]; total];
    for (shard, chunk) in shards.iter_mut().zip(data.chunks(shard_len)) {
        shard[..chunk.len()].copy_from_slice(chunk);
    }

    if num_parity_shards > 0 {
        let rs = ReedSolomon::new(num_data_shards, num_parity_shards)
            .map_err(|err| ErasureError::Coding(err.to_string()))?;
        rs.encode(&mut shards)
            .map_err(|err| ErasureError::Coding(err.to_string()))?;
    }

    let hashes = shards.iter().map(|shard| sha256(shard)).collect();
    let ordering = (0..total).collect();
    Ok(EncodedDataset {
        shards,
        hashes,
        ordering,
        num_data_shards,
        num_parity_shards,
        original_len: data.len(),
    })
}

/// Restores the original file bytes from one or more partial datasets.
///
/// Shards are placed into their global slots, verifying hashes along the
/// way; two inputs may supply the same slot only with identical bytes.
/// Reconstruction fails when fewer than `d` distinct shards survive the
/// checks.
pub fn reconstruct_from_segments(datasets: &[EncodedDataset]) -> Result<Vec<u8>, ErasureError> {
    let first = datasets.first().ok_or(ErasureError::NoDatasets)?;
    let num_data_shards = first.num_data_shards;
    let num_parity_shards = first.num_parity_shards;
    let original_len = first.original_len;
    let total = num_data_shards + num_parity_shards;

    let mut slots: Vec<Option<Vec<u8>>> = vec![None; total];
    for (position, dataset) in datasets.iter().enumerate() {
        if dataset.num_data_shards != num_data_shards {
            return Err(ErasureError::InconsistentMetadata {
                field: "data shard count",
                dataset: position,
            });
        }
        if dataset.num_parity_shards != num_parity_shards {
            return Err(ErasureError::InconsistentMetadata {
                field: "parity shard count",
                dataset: position,
            });
        }
        if dataset.original_len != original_len {
            return Err(ErasureError::InconsistentMetadata {
                field: "original length",
                dataset: position,
            });
        }
        for ((shard, &hash), &slot) in dataset
            .shards
            .iter()
            .zip(dataset.hashes.iter())
            .zip(dataset.ordering.iter())
        {
            if slot >= total {
                return Err(ErasureError::IndexOutOfRange {
                    index: slot,
                    available: total,
                });
            }
            let digest = sha256(shard);
            if digest != hash {
                return Err(ErasureError::HashMismatch { index: slot });
            }
            match &slots[slot] {
                Some(existing) if sha256(existing) != digest => {
                    return Err(ErasureError::ShardConflict { index: slot });
                }
                Some(_) => {}
                None => slots[slot] = Some(shard.clone()),
            }
        }
    }

    if num_parity_shards > 0 {
        let rs = ReedSolomon::new(num_data_shards, num_parity_shards)
            .map_err(|err| ErasureError::Coding(err.to_string()))?;
        rs.reconstruct_data(&mut slots)
            .map_err(|err| ErasureError::Coding(err.to_string()))?;
    }

    let mut data = Vec::with_capacity(original_len);
    for slot in slots.into_iter().take(num_data_shards) {
        match slot {
            Some(shard) => data.extend_from_slice(&shard),
            None => return Err(ErasureError::Coding("too few shards to reconstruct".into())),
        }
    }
    data.truncate(original_len);
    Ok(data)
}

//! Safetensors header inspection
//!
//! The file is memory-mapped and handed to [`safetensors::SafeTensors::read_metadata`],
//! so multi-gigabyte expert checkpoints are summarized from their header
//! without reading the tensor payload into memory.

use memmap2::Mmap;
use safetensors::SafeTensorError;
use safetensors::tensor::{Dtype, Metadata, SafeTensors};
use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur while reading a checkpoint header
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("Failed to read file: {path}")]
    FileRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid safetensors file: {path}")]
    InvalidSafetensors {
        path: String,
        #[source]
        source: SafeTensorError,
    },
}

impl CheckpointError {
    /// Whether the file ends before the length its header declares
    pub fn is_truncated(&self) -> bool {
        matches!(
            self,
            CheckpointError::InvalidSafetensors {
                source: SafeTensorError::InvalidHeaderLength
                    | SafeTensorError::MetadataIncompleteBuffer,
                ..
            }
        )
    }
}

// =============================================================================
// Header Types
// =============================================================================

/// Information about a tensor (without the actual data)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorInfo {
    pub dtype: Dtype,
    /// Shape of the tensor
    pub shape: Vec<usize>,
}

/// Summary of a checkpoint header
#[derive(Debug, Clone)]
pub struct CheckpointSummary {
    pub path: PathBuf,
    /// Number of tensors in the file
    pub tensor_count: usize,
    /// Tensor count per dtype name, e.g. `F8_E4M3`
    pub dtypes: BTreeMap<String, usize>,
    /// Size of the tensor payload after the header
    pub payload_bytes: u64,
    /// Free-form `__metadata__` entries
    pub metadata: BTreeMap<String, String>,
    pub tensors: BTreeMap<String, TensorInfo>,
}

impl CheckpointSummary {
    /// Whether any tensor is stored in an 8-bit float format
    pub fn is_fp8(&self) -> bool {
        self.tensors.values().any(|info| is_fp8_dtype(info.dtype))
    }

    /// Sorted tensor names
    pub fn tensor_names(&self) -> Vec<&str> {
        self.tensors.keys().map(|s| s.as_str()).collect()
    }
}

fn is_fp8_dtype(dtype: Dtype) -> bool {
    matches!(dtype, Dtype::F8_E4M3 | Dtype::F8_E5M2)
}

// =============================================================================
// Reading
// =============================================================================

/// Read and summarize the header of a safetensors file
pub fn inspect_checkpoint(path: impl AsRef<Path>) -> Result<CheckpointSummary, CheckpointError> {
    let path = path.as_ref();
    let read_err = |e: std::io::Error| CheckpointError::FileRead {
        path: path.display().to_string(),
        source: e,
    };

    let file = File::open(path).map_err(read_err)?;
    // SAFETY: read-only mapping that lives only for this call. The file must
    // not be truncated by another process while it is mapped.
    let mmap = unsafe { Mmap::map(&file) }.map_err(read_err)?;

    let (_, metadata) =
        SafeTensors::read_metadata(&mmap).map_err(|e| CheckpointError::InvalidSafetensors {
            path: path.display().to_string(),
            source: e,
        })?;

    Ok(summarize(path, &metadata))
}

fn summarize(path: &Path, metadata: &Metadata) -> CheckpointSummary {
    let mut dtypes = BTreeMap::new();
    let mut tensors = BTreeMap::new();
    let mut payload_bytes = 0u64;

    for (name, info) in metadata.tensors() {
        payload_bytes = payload_bytes.max(info.data_offsets.1 as u64);
        *dtypes.entry(format!("{:?}", info.dtype)).or_insert(0) += 1;
        tensors.insert(
            name,
            TensorInfo {
                dtype: info.dtype,
                shape: info.shape.clone(),
            },
        );
    }

    let metadata = metadata
        .metadata()
        .as_ref()
        .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
        .unwrap_or_default();

    CheckpointSummary {
        path: path.to_path_buf(),
        tensor_count: tensors.len(),
        dtypes,
        payload_bytes,
        metadata,
        tensors,
    }
}

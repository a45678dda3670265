use thiserror::Error;

use crate::tree::KeyPath;

/// Classification of a failure reported by a local batch source.
///
/// Only [`BatchError::Transient`] is retried by the batch fetcher, every other
/// failure reaches the caller on the attempt it happened.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum BatchError {
    /// The data pipeline stalled and the same request may succeed later.
    #[error("transient data pipeline failure: {0}")]
    Transient(String),
    /// The data pipeline failed permanently (corrupt record, closed reader, ...).
    #[error("data pipeline failure: {0}")]
    Fatal(String),
}

/// Reported by a dataset handle that cannot hand out an iterator.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct SourceError(pub String);

/// Errors produced while loading and distributing batches.
#[derive(Debug, Error)]
pub enum LoaderError {
    /// The local source failed. The original error is kept as is.
    #[error(transparent)]
    Source(#[from] BatchError),
    /// A leaf could not be split evenly across the local devices.
    #[error(
        "Unable to put to devices shape {shape:?} with local device count {local_device_count} at {path}"
    )]
    Split {
        /// Shape of the offending local array.
        shape: Vec<usize>,
        /// Number of devices attached to this host.
        local_device_count: usize,
        /// Position of the leaf in the batch.
        path: KeyPath,
    },
    /// The configured data source cannot be used by the loader.
    #[error("unsupported data source: {0}")]
    UnsupportedSource(String),
    /// A sharding rule does not fit the mesh or the array it describes.
    #[error("invalid sharding: {0}")]
    Sharding(String),
    /// Per-device buffers do not form a valid global array.
    #[error("unable to assemble global array: {0}")]
    Assembly(String),
}

/// Result type of the loader.
pub type Result<T> = core::result::Result<T, LoaderError>;

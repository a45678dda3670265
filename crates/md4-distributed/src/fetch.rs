use core::time::Duration;

use log::{debug, warn};
use ndarray::{ArrayD, Axis, Slice};
use serde::{Deserialize, Serialize};

use crate::sharding::{DeviceMesh, MeshDevice, ShardingSpec};
use crate::tree::{KeyPath, Tree};
use crate::{BatchError, DistributedBackend, LoaderError, Result};

/// A batch as produced by a host-local source.
pub type LocalBatch<E> = Tree<ArrayD<E>>;

/// How often, and how patiently, transient source failures are retried.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Number of guarded attempts before the final, unguarded one.
    pub max_attempts: u32,
    /// Pause after every transient failure.
    pub backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 30,
            backoff: Duration::from_secs(10),
        }
    }
}

impl RetryConfig {
    /// Creates a retry configuration.
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts,
            backoff,
        }
    }

    /// Creates a retry configuration where the first failure is final.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 0,
            ..Default::default()
        }
    }
}

/// Pulls the next batch from `local_iterator` and distributes it over `global_mesh`.
///
/// [`BatchError::Transient`] failures are logged and retried after sleeping for
/// `retry.backoff`, up to `retry.max_attempts` times. Once the attempts are used
/// up the iterator is polled one last time and whatever it returns is final.
/// Any other error is returned on the attempt it happened.
///
/// Returns `Ok(None)` when the iterator is exhausted. On success every leaf of
/// the batch has been turned into a global array; if a single leaf fails the
/// whole batch fails.
pub fn get_next_batch_sharded<E, I, B, S>(
    local_iterator: &mut I,
    global_mesh: &DeviceMesh<B::Device>,
    backend: &B,
    retry: &RetryConfig,
    mut sleep: S,
) -> Result<Option<Tree<B::Array>>>
where
    E: Clone,
    I: Iterator<Item = core::result::Result<LocalBatch<E>, BatchError>> + ?Sized,
    B: DistributedBackend<E>,
    S: FnMut(Duration),
{
    let mut data_load_attempts = 0;
    let mut local_data = None;

    while local_data.is_none() && data_load_attempts < retry.max_attempts {
        data_load_attempts += 1;
        match local_iterator.next() {
            None => return Ok(None),
            Some(Ok(batch)) => local_data = Some(batch),
            Some(Err(BatchError::Transient(reason))) => {
                warn!(
                    "Failed to get next data batch (attempt {}/{}): {}, retrying",
                    data_load_attempts, retry.max_attempts, reason
                );
                sleep(retry.backoff);
            }
            Some(Err(err)) => return Err(err.into()),
        }
    }

    let local_data = match local_data {
        Some(batch) => batch,
        // Last try, its error is returned as is.
        None => match local_iterator.next() {
            None => return Ok(None),
            Some(result) => result?,
        },
    };

    local_data
        .try_map_with_path(|path, array| form_global_array(path, array, global_mesh, backend))
        .map(Some)
}

/// Splits a host-local array over the local devices and assembles the global array.
///
/// The leading dimension of `array` is cut into one equal contiguous slice per
/// local device of `global_mesh`. `path` only serves the error message when
/// the leading dimension does not divide evenly; nothing is padded or dropped.
pub fn form_global_array<E, B>(
    path: &KeyPath,
    array: ArrayD<E>,
    global_mesh: &DeviceMesh<B::Device>,
    backend: &B,
) -> Result<B::Array>
where
    E: Clone,
    B: DistributedBackend<E>,
{
    let local_devices = global_mesh.local_devices();
    let split_error = || LoaderError::Split {
        shape: array.shape().to_vec(),
        local_device_count: local_devices.len(),
        path: path.clone(),
    };

    if array.ndim() == 0 {
        return Err(split_error());
    }

    let (global_shape, sharding) = build_global_shape_and_sharding(array.shape(), global_mesh);
    let local_device_arrays = split_leading(&array, local_devices.len()).ok_or_else(split_error)?;

    debug!(
        "Placing {:?} at {} on {} local devices as global shape {:?}",
        array.shape(),
        path,
        local_devices.len(),
        global_shape
    );

    let local_device_buffers = backend.device_put(local_device_arrays, &local_devices)?;
    backend.make_array_from_single_device_arrays(&global_shape, sharding, local_device_buffers)
}

/// Global shape and sharding of a leaf whose local shape is `local_shape`.
///
/// `local_shape` must have at least one dimension.
fn build_global_shape_and_sharding<T: MeshDevice>(
    local_shape: &[usize],
    global_mesh: &DeviceMesh<T>,
) -> (Vec<usize>, ShardingSpec<T>) {
    let sharding = ShardingSpec::batch(global_mesh, local_shape.len());

    let mut global_shape = local_shape.to_vec();
    global_shape[0] *= global_mesh.process_count();

    (global_shape, sharding)
}

fn split_leading<E: Clone>(array: &ArrayD<E>, parts: usize) -> Option<Vec<ArrayD<E>>> {
    let len = array.len_of(Axis(0));
    if parts == 0 || len % parts != 0 {
        return None;
    }

    let step = len / parts;
    Some(
        (0..parts)
            .map(|part| {
                array
                    .slice_axis(Axis(0), Slice::from(part * step..(part + 1) * step))
                    .to_owned()
            })
            .collect(),
    )
}

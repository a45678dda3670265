use ndarray::{ArrayD, ArrayViewD, Axis};

use crate::sharding::{MeshDevice, ShardingSpec};
use crate::{LoaderError, Result};

/// Host data placed on one device.
#[derive(Clone, Debug, PartialEq)]
pub struct DeviceBuffer<E, T> {
    device: T,
    data: ArrayD<E>,
}

impl<E, T> DeviceBuffer<E, T> {
    /// Wraps `data` as resident on `device`.
    pub fn new(device: T, data: ArrayD<E>) -> Self {
        Self { device, data }
    }

    /// The device holding the data.
    pub fn device(&self) -> &T {
        &self.device
    }

    /// The data held by the device.
    pub fn data(&self) -> &ArrayD<E> {
        &self.data
    }
}

/// Represents an array that is distributed across the devices of a mesh.
///
/// A `ShardedArray` holds the shards addressable from this host, along with
/// metadata describing how the full array is partitioned across devices. The
/// distribution is defined by a `ShardingSpec`, which specifies per-dimension
/// distribution strategies (e.g., sharded or replicated) and the associated
/// device mesh.
#[derive(Clone, Debug)]
pub struct ShardedArray<E, T> {
    /// Shards held by the devices of this host, in local device order
    addressable_shards: Vec<DeviceBuffer<E, T>>,
    /// Specification of how this array is sharded
    sharding_spec: ShardingSpec<T>,
    /// Global shape of the array (across all devices)
    global_shape: Vec<usize>,
}

impl<E: Clone, T: MeshDevice> ShardedArray<E, T> {
    /// Assembles a sharded array, checking that the shards fit the sharding.
    ///
    /// There must be exactly one shard per local device of the mesh, in local
    /// device order, each with the shape of a single shard of `global_shape`.
    pub fn new(
        global_shape: Vec<usize>,
        sharding_spec: ShardingSpec<T>,
        addressable_shards: Vec<DeviceBuffer<E, T>>,
    ) -> Result<Self> {
        let shard_shape = sharding_spec.shard_shape(&global_shape)?;
        let local_devices = sharding_spec.device_mesh().local_devices();

        if addressable_shards.len() != local_devices.len() {
            return Err(LoaderError::Assembly(format!(
                "Got {} shards for {} local devices",
                addressable_shards.len(),
                local_devices.len()
            )));
        }

        for (shard, device) in addressable_shards.iter().zip(&local_devices) {
            if shard.device() != device {
                return Err(LoaderError::Assembly(format!(
                    "Shard on device {} where device {} was expected",
                    shard.device().id(),
                    device.id()
                )));
            }
            if shard.data().shape() != shard_shape.as_slice() {
                return Err(LoaderError::Assembly(format!(
                    "Shard of shape {:?} on device {} does not match shard shape {:?} of global shape {:?}",
                    shard.data().shape(),
                    device.id(),
                    shard_shape,
                    global_shape
                )));
            }
        }

        Ok(Self {
            addressable_shards,
            sharding_spec,
            global_shape,
        })
    }

    /// Global shape of the array.
    pub fn global_shape(&self) -> &[usize] {
        &self.global_shape
    }

    /// How the array is laid out over the mesh.
    pub fn sharding(&self) -> &ShardingSpec<T> {
        &self.sharding_spec
    }

    /// Shards held by the devices of this host.
    pub fn addressable_shards(&self) -> &[DeviceBuffer<E, T>] {
        &self.addressable_shards
    }

    /// Gathers the shards of this host back into one host array.
    ///
    /// Shards are concatenated along the leading dimension in local device
    /// order, which gives back the batch this host contributed.
    pub fn local_data(&self) -> Result<ArrayD<E>> {
        let views: Vec<ArrayViewD<'_, E>> = self
            .addressable_shards
            .iter()
            .map(|shard| shard.data().view())
            .collect();

        ndarray::concatenate(Axis(0), &views)
            .map_err(|err| LoaderError::Assembly(format!("Unable to gather local shards: {err}")))
    }
}

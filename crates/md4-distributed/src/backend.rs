use ndarray::ArrayD;

use crate::Result;
use crate::sharding::{MeshDevice, ShardingSpec};

/// Places host data on devices and stitches per-device buffers into global arrays.
///
/// This is the only place the loader touches accelerator memory. Implementations
/// must not move data between hosts: every process hands over the buffers of its
/// own devices and the returned array refers to the shards of all processes.
pub trait DistributedBackend<E> {
    /// Device type of the meshes the backend works with.
    type Device: MeshDevice;
    /// Data resident on a single device.
    type Buffer;
    /// A logical array distributed over a mesh.
    type Array;

    /// Copies `slices[i]` onto `devices[i]`.
    fn device_put(&self, slices: Vec<ArrayD<E>>, devices: &[Self::Device]) -> Result<Vec<Self::Buffer>>;

    /// Builds the global array of `global_shape` whose addressable shards are `buffers`.
    fn make_array_from_single_device_arrays(
        &self,
        global_shape: &[usize],
        sharding: ShardingSpec<Self::Device>,
        buffers: Vec<Self::Buffer>,
    ) -> Result<Self::Array>;
}

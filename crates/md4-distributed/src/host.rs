use ndarray::ArrayD;

use crate::sharding::{MeshDevice, ShardingSpec};
use crate::{DeviceBuffer, DistributedBackend, LoaderError, Result, ShardedArray};

/// A device addressed by id and owning process, with memory in host RAM.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub struct HostDevice {
    id: usize,
    process_index: usize,
}

impl HostDevice {
    /// Creates the device `id` attached to process `process_index`.
    pub fn new(id: usize, process_index: usize) -> Self {
        Self { id, process_index }
    }
}

impl MeshDevice for HostDevice {
    fn id(&self) -> usize {
        self.id
    }

    fn process_index(&self) -> usize {
        self.process_index
    }
}

/// In-process backend keeping every device buffer in host memory.
///
/// Useful to run the loader without accelerators: the resulting
/// [`ShardedArray`]s hold exactly what each device would receive.
#[derive(Clone, Copy, Debug, Default)]
pub struct HostBackend;

impl<E: Clone> DistributedBackend<E> for HostBackend {
    type Device = HostDevice;
    type Buffer = DeviceBuffer<E, HostDevice>;
    type Array = ShardedArray<E, HostDevice>;

    fn device_put(&self, slices: Vec<ArrayD<E>>, devices: &[HostDevice]) -> Result<Vec<Self::Buffer>> {
        if slices.len() != devices.len() {
            return Err(LoaderError::Assembly(format!(
                "Cannot put {} slices on {} devices",
                slices.len(),
                devices.len()
            )));
        }

        Ok(slices
            .into_iter()
            .zip(devices)
            .map(|(data, device)| DeviceBuffer::new(*device, data))
            .collect())
    }

    fn make_array_from_single_device_arrays(
        &self,
        global_shape: &[usize],
        sharding: ShardingSpec<HostDevice>,
        buffers: Vec<Self::Buffer>,
    ) -> Result<Self::Array> {
        ShardedArray::new(global_shape.to_vec(), sharding, buffers)
    }
}

use core::fmt;
use core::hash::Hash;

use alloc::vec::Vec;
use hashbrown::{HashMap, HashSet};
use thiserror::Error;

/// A compute device that can take part in a [`DeviceMesh`].
///
/// Every device is attached to exactly one host process. The devices of the
/// process running the loader are its *local* devices.
pub trait MeshDevice: Clone + fmt::Debug + PartialEq + Eq + Hash {
    /// Globally unique identifier of the device.
    fn id(&self) -> usize;
    /// Index of the host process the device is attached to.
    fn process_index(&self) -> usize;
}

/// Represents a logical mesh dimension, identified by a unique name.
///
/// Mesh dimensions are used to define the logical structure of a device mesh.
/// They help organize and partition parallel computation workloads, such as data,
/// tensor, or pipeline parallelism, across the mesh. Each dimension is named
/// to provide unambiguous mapping during sharding operations.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct MeshDim {
    /// A name that uniquely identifies the mesh dimension.
    name: String,
}

impl MeshDim {
    /// Constructs a new [`MeshDim`] with the given name.
    pub fn new<S: Into<String>>(name: S) -> Self {
        MeshDim { name: name.into() }
    }

    /// The name of the dimension.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for MeshDim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Represents a logical arrangement of devices used for parallel computation.
///
/// A `DeviceMesh` defines a structured, N-dimensional topology over a set of physical devices,
/// where each dimension can be given a unique name (e.g., `"data"`, `"model"`).
/// Devices are laid out in row-major order over the mesh shape.
///
/// For example, a 2D mesh with shape `[2, 4]` and dimensions `["data", "model"]` over
/// two host processes with four devices each represents 8 devices in total, 4 of which
/// are local to every host.
///
/// The mesh also records which host process it was built on, which determines the
/// devices returned by [`DeviceMesh::local_devices`]. A built mesh is never mutated.
#[derive(Clone, Debug)]
pub struct DeviceMesh<T> {
    /// Physical devices in an n-dimensional logical arrangement
    devices: Vec<T>,
    /// Shape of the logical mesh
    shape: Vec<usize>,
    /// Maps dimension names to their indices in the mesh
    dims: HashMap<MeshDim, usize>,
    /// Process the mesh was built on
    process_index: usize,
}

impl<T: MeshDevice> DeviceMesh<T> {
    /// All devices of the mesh, in row-major mesh order.
    pub fn devices(&self) -> &[T] {
        &self.devices
    }

    /// Shape of the logical mesh.
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Total number of devices across all processes.
    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    /// Axis names, ordered by their index in the mesh shape.
    pub fn axis_names(&self) -> Vec<MeshDim> {
        let mut dims: Vec<(&MeshDim, &usize)> = self.dims.iter().collect();
        dims.sort_by_key(|(_, idx)| **idx);
        dims.into_iter().map(|(dim, _)| dim.clone()).collect()
    }

    /// Size of the mesh along `dim`, if the dimension is part of the mesh.
    pub fn axis_size(&self, dim: &MeshDim) -> Option<usize> {
        self.dims.get(dim).map(|&idx| self.shape[idx])
    }

    /// Index of the host process this mesh was built on.
    pub fn process_index(&self) -> usize {
        self.process_index
    }

    /// Number of host processes owning devices of the mesh.
    pub fn process_count(&self) -> usize {
        self.devices
            .iter()
            .map(MeshDevice::process_index)
            .collect::<HashSet<_>>()
            .len()
    }

    /// Devices attached to this host process, in mesh order.
    pub fn local_devices(&self) -> Vec<T> {
        self.devices
            .iter()
            .filter(|device| device.process_index() == self.process_index)
            .cloned()
            .collect()
    }
}

/// Represents errors that can occur when constructing a `DeviceMesh`.
///
/// These errors are typically related to invalid dimension mappings or mismatches
/// between the device count and the mesh shape.
#[derive(Debug, Error)]
pub enum DeviceMeshError {
    /// An invalid dimension was specified.
    #[error("invalid mesh dimension: {0}")]
    InvalidDimension(String),
    /// The mesh configuration is invalid.
    #[error("invalid mesh: {0}")]
    InvalidMesh(String),
}

/// A builder for constructing a [`DeviceMesh`].
///
/// This builder allows you to define a logical mesh structure with a shape and
/// specific dimension mappings. Once all dimensions are mapped, the builder can
/// be used to construct the [`DeviceMesh`] instance.
#[derive(Clone, Debug)]
pub struct DeviceMeshBuilder<T> {
    /// Physical devices in an n-dimensional logical arrangement.
    devices: Vec<T>,
    /// Shape of the logical mesh.
    shape: Vec<usize>,
    /// Maps dimension names to their indices in the mesh.
    dims: HashMap<MeshDim, usize>,
    /// Process the mesh is built on.
    process_index: usize,
}

impl<T: MeshDevice> DeviceMeshBuilder<T> {
    /// Creates a new [`DeviceMeshBuilder`] with the given devices and shape.
    ///
    /// The mesh is built for process `0` unless [`with_process_index`](Self::with_process_index)
    /// says otherwise.
    ///
    /// # Arguments
    /// * `devices` - A vector of devices to be arranged in the mesh.
    /// * `shape` - A vector representing the shape (dimensions) of the mesh.
    pub fn new<S: Into<Vec<usize>>>(devices: Vec<T>, shape: S) -> Self {
        Self {
            devices,
            shape: shape.into(),
            dims: HashMap::new(),
            process_index: 0,
        }
    }

    /// Adds a dimension to the logical mesh, associating it with a specific index.
    ///
    /// Each dimension represents a logical axis of parallelism and should
    /// correspond to a unique index in the shape of the mesh. The mapping is
    /// validated by [`build`](Self::build).
    ///
    /// # Arguments
    /// * `idx` - The index of the dimension in the mesh shape.
    /// * `dim` - The mesh dimension to be assigned.
    ///
    /// # Example
    ///
    /// ```rust
    /// use md4_distributed::HostDevice;
    /// use md4_distributed::sharding::{DeviceMeshBuilder, MeshDim};
    ///
    /// let devices = (0..4).map(|id| HostDevice::new(id, 0)).collect();
    /// let mesh = DeviceMeshBuilder::new(devices, [2, 2])
    ///     .with_dim(0, MeshDim::new("data"))
    ///     .with_dim(1, MeshDim::new("model"))
    ///     .build()
    ///     .unwrap();
    /// assert_eq!(mesh.device_count(), 4);
    /// ```
    pub fn with_dim(mut self, idx: usize, dim: MeshDim) -> Self {
        self.dims.insert(dim, idx);
        self
    }

    /// Sets the host process the mesh is built on.
    pub fn with_process_index(mut self, process_index: usize) -> Self {
        self.process_index = process_index;
        self
    }

    /// Builds a [`DeviceMesh`] from the current configuration.
    ///
    /// This method performs validation to ensure that all dimensions are correctly
    /// mapped, that the number of devices matches the expected shape, and that
    /// every process, including this one, owns the same number of devices.
    ///
    /// # Returns
    /// A `DeviceMesh` if the configuration is valid, or a `DeviceMeshError` if invalid.
    pub fn build(self) -> Result<DeviceMesh<T>, DeviceMeshError> {
        let ndim = self.shape.len();
        let mut seen_indices = HashSet::new();

        for &idx in self.dims.values() {
            if idx >= ndim {
                return Err(DeviceMeshError::InvalidDimension(format!(
                    "Index {} exceeds mesh shape {:?}",
                    idx, self.shape
                )));
            }
            if !seen_indices.insert(idx) {
                return Err(DeviceMeshError::InvalidDimension(format!(
                    "Dimension {} already mapped",
                    idx
                )));
            }
        }

        if seen_indices.len() != ndim {
            return Err(DeviceMeshError::InvalidMesh(format!(
                "Not all mesh dimensions are mapped. Got {}, expected {}",
                seen_indices.len(),
                ndim
            )));
        }

        let expected_devices = self.shape.iter().product::<usize>();
        if self.devices.len() != expected_devices {
            return Err(DeviceMeshError::InvalidMesh(format!(
                "Device count ({}) doesn't match mesh shape {:?}",
                self.devices.len(),
                self.shape,
            )));
        }

        let mut devices_per_process: HashMap<usize, usize> = HashMap::new();
        for device in &self.devices {
            *devices_per_process.entry(device.process_index()).or_default() += 1;
        }

        let Some(&local_count) = devices_per_process.get(&self.process_index) else {
            return Err(DeviceMeshError::InvalidMesh(format!(
                "Process {} owns no device of the mesh",
                self.process_index
            )));
        };

        if devices_per_process.values().any(|&count| count != local_count) {
            return Err(DeviceMeshError::InvalidMesh(format!(
                "Processes own different numbers of devices: {:?}",
                devices_per_process
            )));
        }

        Ok(DeviceMesh {
            devices: self.devices,
            shape: self.shape,
            dims: self.dims,
            process_index: self.process_index,
        })
    }
}

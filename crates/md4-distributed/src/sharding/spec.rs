use alloc::vec::Vec;

use super::{DeviceMesh, MeshDevice, MeshDim};
use crate::{LoaderError, Result};

/// Specifies how a single dimension is distributed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DimDistribution {
    /// Dimension is sharded jointly across the listed mesh dimensions.
    ///
    /// Shards are laid out in the order of the listed dimensions, the last one
    /// varying fastest.
    Sharded(Vec<MeshDim>),
    /// Dimension is replicated (not sharded).
    Replicated,
}

/// Describes how an array is distributed across devices
#[derive(Clone, Debug)]
pub struct ShardingSpec<T> {
    /// Distribution pattern for each array dimension
    dim_distributions: Vec<DimDistribution>,
    /// Description of the device mesh
    device_mesh: DeviceMesh<T>,
}

impl<T: MeshDevice> ShardingSpec<T> {
    /// Creates a sharding spec, checking that it only refers to axes of the mesh
    /// and uses every axis at most once.
    pub fn new(dim_distributions: Vec<DimDistribution>, device_mesh: DeviceMesh<T>) -> Result<Self> {
        let mut used = Vec::new();
        for distribution in &dim_distributions {
            let DimDistribution::Sharded(dims) = distribution else {
                continue;
            };
            for dim in dims {
                if device_mesh.axis_size(dim).is_none() {
                    return Err(LoaderError::Sharding(format!(
                        "Mesh has no dimension named `{dim}`"
                    )));
                }
                if used.contains(&dim) {
                    return Err(LoaderError::Sharding(format!(
                        "Mesh dimension `{dim}` is used more than once"
                    )));
                }
                used.push(dim);
            }
        }

        Ok(Self {
            dim_distributions,
            device_mesh,
        })
    }

    /// Shards the leading (batch) dimension across every axis of the mesh and
    /// replicates the remaining `ndim - 1` dimensions.
    pub fn batch(device_mesh: &DeviceMesh<T>, ndim: usize) -> Self {
        let dim_distributions = (0..ndim)
            .map(|dim| match dim {
                0 => DimDistribution::Sharded(device_mesh.axis_names()),
                _ => DimDistribution::Replicated,
            })
            .collect();

        Self {
            dim_distributions,
            device_mesh: device_mesh.clone(),
        }
    }

    /// Distribution of every array dimension.
    pub fn dim_distributions(&self) -> &[DimDistribution] {
        &self.dim_distributions
    }

    /// The mesh the array is distributed over.
    pub fn device_mesh(&self) -> &DeviceMesh<T> {
        &self.device_mesh
    }

    /// Number of pieces array dimension `dim` is cut into.
    pub fn num_shards(&self, dim: usize) -> usize {
        match self.dim_distributions.get(dim) {
            Some(DimDistribution::Sharded(dims)) => dims
                .iter()
                .filter_map(|axis| self.device_mesh.axis_size(axis))
                .product(),
            _ => 1,
        }
    }

    /// Shape of the piece of an array of `global_shape` held by a single device.
    pub fn shard_shape(&self, global_shape: &[usize]) -> Result<Vec<usize>> {
        if global_shape.len() != self.dim_distributions.len() {
            return Err(LoaderError::Sharding(format!(
                "Sharding of rank {} applied to shape {:?}",
                self.dim_distributions.len(),
                global_shape
            )));
        }

        global_shape
            .iter()
            .enumerate()
            .map(|(dim, &size)| {
                let shards = self.num_shards(dim);
                if size % shards != 0 {
                    return Err(LoaderError::Sharding(format!(
                        "Dimension {dim} of shape {global_shape:?} is not divisible into {shards} shards"
                    )));
                }
                Ok(size / shards)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::HostDevice;
    use crate::sharding::DeviceMeshBuilder;
    use alloc::vec;

    fn mesh() -> DeviceMesh<HostDevice> {
        let devices = (0..8).map(|id| HostDevice::new(id, id / 4)).collect();
        DeviceMeshBuilder::new(devices, [2, 4])
            .with_dim(0, MeshDim::new("data"))
            .with_dim(1, MeshDim::new("model"))
            .build()
            .unwrap()
    }

    #[test]
    fn test_batch_sharding_uses_all_axes() {
        let spec = ShardingSpec::batch(&mesh(), 3);

        assert_eq!(
            spec.dim_distributions(),
            &[
                DimDistribution::Sharded(vec![MeshDim::new("data"), MeshDim::new("model")]),
                DimDistribution::Replicated,
                DimDistribution::Replicated,
            ]
        );
        assert_eq!(spec.num_shards(0), 8);
        assert_eq!(spec.num_shards(1), 1);
    }

    #[test]
    fn test_shard_shape() {
        let spec = ShardingSpec::batch(&mesh(), 2);

        assert_eq!(spec.shard_shape(&[16, 3]).unwrap(), vec![2, 3]);
        assert!(matches!(
            spec.shard_shape(&[12, 3]),
            Err(LoaderError::Sharding(_))
        ));
        assert!(matches!(
            spec.shard_shape(&[16, 3, 1]),
            Err(LoaderError::Sharding(_))
        ));
    }

    #[test]
    fn test_spec_should_use_known_axes_once() {
        let unknown = ShardingSpec::new(
            vec![DimDistribution::Sharded(vec![MeshDim::new("pipeline")])],
            mesh(),
        );
        assert!(matches!(unknown, Err(LoaderError::Sharding(_))));

        let repeated = ShardingSpec::new(
            vec![
                DimDistribution::Sharded(vec![MeshDim::new("data")]),
                DimDistribution::Sharded(vec![MeshDim::new("data")]),
            ],
            mesh(),
        );
        assert!(matches!(repeated, Err(LoaderError::Sharding(_))));
    }
}

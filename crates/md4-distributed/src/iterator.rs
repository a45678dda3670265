use core::fmt;
use core::time::Duration;

use log::debug;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, VariantNames};

use crate::sharding::DeviceMesh;
use crate::tree::Tree;
use crate::{
    BatchError, DistributedBackend, LoaderError, LocalBatch, Result, RetryConfig, SourceError,
    get_next_batch_sharded,
};

/// A live iterator over the batches of one host.
pub type LocalIterator<E> = Box<dyn Iterator<Item = core::result::Result<LocalBatch<E>, BatchError>>>;

/// A finite dataset that can be iterated from the start any number of times.
pub trait ReiterableDataset<E> {
    /// Starts a new pass over the dataset.
    fn as_numpy_iterator(&self) -> core::result::Result<LocalIterator<E>, SourceError>;
}

/// Any collection of batches that can hand out a fresh iterator.
pub trait Reiterable<E> {
    /// Starts a new pass over the collection.
    fn iter_batches(&self) -> LocalIterator<E>;
}

impl<E, C> Reiterable<E> for C
where
    C: IntoIterator<Item = core::result::Result<LocalBatch<E>, BatchError>> + Clone,
    C::IntoIter: 'static,
{
    fn iter_batches(&self) -> LocalIterator<E> {
        Box::new(self.clone().into_iter())
    }
}

/// The kinds of [`Source`] a loader can be configured with.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Display, EnumString, VariantNames, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// A [`ReiterableDataset`].
    Dataset,
    /// A [`Reiterable`] collection.
    Iterable,
}

impl SourceKind {
    /// Parses a configured source kind.
    pub fn parse(kind: &str) -> Result<Self> {
        kind.parse().map_err(|_| {
            LoaderError::UnsupportedSource(format!(
                "`{kind}`, expected one of: {}",
                Self::VARIANTS.join(", ")
            ))
        })
    }
}

/// Where the batches of a host come from.
pub enum Source<E> {
    /// A finite dataset handle, restarted through [`ReiterableDataset::as_numpy_iterator`].
    Dataset(Box<dyn ReiterableDataset<E>>),
    /// A generic collection, restarted through [`Reiterable::iter_batches`].
    Iterable(Box<dyn Reiterable<E>>),
}

impl<E> Source<E> {
    /// Wraps a dataset handle.
    pub fn dataset<D: ReiterableDataset<E> + 'static>(dataset: D) -> Self {
        Source::Dataset(Box::new(dataset))
    }

    /// Wraps a re-iterable collection.
    pub fn iterable<C: Reiterable<E> + 'static>(iterable: C) -> Self {
        Source::Iterable(Box::new(iterable))
    }

    /// The kind of this source.
    pub fn kind(&self) -> SourceKind {
        match self {
            Source::Dataset(_) => SourceKind::Dataset,
            Source::Iterable(_) => SourceKind::Iterable,
        }
    }

    /// Checks that this source is of the configured `kind`.
    pub fn expect_kind(self, kind: SourceKind) -> Result<Self> {
        if self.kind() != kind {
            return Err(LoaderError::UnsupportedSource(format!(
                "configured for a {kind} source but got a {} source",
                self.kind()
            )));
        }
        Ok(self)
    }

    fn local_iterator(&self) -> Result<LocalIterator<E>> {
        match self {
            Source::Dataset(dataset) => dataset.as_numpy_iterator().map_err(|err| {
                LoaderError::UnsupportedSource(format!("dataset cannot be iterated: {err}"))
            }),
            Source::Iterable(iterable) => Ok(iterable.iter_batches()),
        }
    }
}

impl<E> fmt::Debug for Source<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Source").field(&self.kind()).finish()
    }
}

/// Loader settings that can come from a configuration file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoaderConfig {
    /// Expected kind of source, `dataset` or `iterable`.
    pub source: String,
    /// Retry behavior on transient source failures.
    #[serde(default)]
    pub retry: RetryConfig,
}

/// Iterator yielding one globally sharded batch per call.
///
/// Wraps a host-local [`Source`] and runs every batch through
/// [`get_next_batch_sharded`]. The loader owns a single live local iterator,
/// replaced by [`reset`](Self::reset).
///
/// A loader is meant for a single consumer: the training loop of its host.
/// Every host must pull the same number of batches in lockstep, which the
/// loader does not enforce.
pub struct MultiHostDataLoadIterator<E, B: DistributedBackend<E>> {
    global_mesh: DeviceMesh<B::Device>,
    backend: B,
    dataloader: Source<E>,
    local_iterator: LocalIterator<E>,
    retry: RetryConfig,
    sleep: Box<dyn FnMut(Duration)>,
}

impl<E, B> MultiHostDataLoadIterator<E, B>
where
    E: Clone,
    B: DistributedBackend<E>,
{
    /// Creates a loader with the default [`RetryConfig`].
    ///
    /// The source is asked for an iterator right away, so a source that cannot
    /// be iterated fails here rather than on the first batch.
    pub fn new(dataloader: Source<E>, global_mesh: DeviceMesh<B::Device>, backend: B) -> Result<Self> {
        Self::with_retry(dataloader, global_mesh, backend, RetryConfig::default())
    }

    /// Creates a loader with a custom retry configuration.
    pub fn with_retry(
        dataloader: Source<E>,
        global_mesh: DeviceMesh<B::Device>,
        backend: B,
        retry: RetryConfig,
    ) -> Result<Self> {
        let local_iterator = dataloader.local_iterator()?;
        debug!("Created loader over a {} source", dataloader.kind());

        Ok(Self {
            global_mesh,
            backend,
            dataloader,
            local_iterator,
            retry,
            sleep: Box::new(std::thread::sleep),
        })
    }

    /// Creates a loader from configuration, checking the source against it.
    pub fn from_config(
        config: &LoaderConfig,
        dataloader: Source<E>,
        global_mesh: DeviceMesh<B::Device>,
        backend: B,
    ) -> Result<Self> {
        let dataloader = dataloader.expect_kind(SourceKind::parse(&config.source)?)?;
        Self::with_retry(dataloader, global_mesh, backend, config.retry.clone())
    }

    /// Replaces how the loader waits between retries.
    pub fn with_sleep<S: FnMut(Duration) + 'static>(mut self, sleep: S) -> Self {
        self.sleep = Box::new(sleep);
        self
    }

    /// Drops the live iterator and starts over from the beginning of the source.
    ///
    /// When the source cannot be iterated again the error is returned and the
    /// live iterator is kept, so iteration goes on where it was.
    pub fn reset(&mut self) -> Result<()> {
        self.local_iterator = self.dataloader.local_iterator()?;
        debug!("Restarted {} source", self.dataloader.kind());
        Ok(())
    }

    /// Restarts the source and returns the loader, ready to iterate from the start.
    ///
    /// Restarting discards the current position even in the middle of a pass.
    pub fn restart(&mut self) -> Result<&mut Self> {
        self.reset()?;
        Ok(self)
    }

    /// The mesh batches are distributed over.
    pub fn global_mesh(&self) -> &DeviceMesh<B::Device> {
        &self.global_mesh
    }
}

impl<E, B> Iterator for MultiHostDataLoadIterator<E, B>
where
    E: Clone,
    B: DistributedBackend<E>,
{
    type Item = Result<Tree<B::Array>>;

    fn next(&mut self) -> Option<Self::Item> {
        get_next_batch_sharded(
            self.local_iterator.as_mut(),
            &self.global_mesh,
            &self.backend,
            &self.retry,
            &mut self.sleep,
        )
        .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sharding::{DeviceMeshBuilder, MeshDim};
    use crate::{HostBackend, HostDevice, ShardedArray};
    use ndarray::{ArrayD, IxDyn};
    use std::cell::Cell;
    use std::rc::Rc;

    type HostLoader = MultiHostDataLoadIterator<f32, HostBackend>;

    fn mesh() -> DeviceMesh<HostDevice> {
        let devices = (0..4).map(|id| HostDevice::new(id, id / 2)).collect();
        DeviceMeshBuilder::new(devices, [4])
            .with_dim(0, MeshDim::new("data"))
            .with_process_index(1)
            .build()
            .unwrap()
    }

    fn batch(value: f32) -> LocalBatch<f32> {
        Tree::map([
            ("image", Tree::Leaf(ArrayD::from_elem(IxDyn(&[4, 2, 2]), value))),
            ("label", Tree::Leaf(ArrayD::from_elem(IxDyn(&[4]), value))),
        ])
    }

    fn batches(values: &[f32]) -> Vec<core::result::Result<LocalBatch<f32>, BatchError>> {
        values.iter().map(|&value| Ok(batch(value))).collect()
    }

    fn label(sharded: &Tree<ShardedArray<f32, HostDevice>>) -> ArrayD<f32> {
        sharded
            .leaves()
            .into_iter()
            .find(|(path, _)| path.to_string() == "['label']")
            .map(|(_, array)| array.local_data().unwrap())
            .unwrap()
    }

    /// Counts batches from zero on every pass and remembers how many passes were started.
    struct CountingDataset {
        len: usize,
        passes: Rc<Cell<usize>>,
    }

    impl ReiterableDataset<f32> for CountingDataset {
        fn as_numpy_iterator(&self) -> core::result::Result<LocalIterator<f32>, SourceError> {
            self.passes.set(self.passes.get() + 1);
            Ok(Box::new((0..self.len).map(|step| Ok(batch(step as f32)))))
        }
    }

    struct ClosedDataset;

    impl ReiterableDataset<f32> for ClosedDataset {
        fn as_numpy_iterator(&self) -> core::result::Result<LocalIterator<f32>, SourceError> {
            Err(SourceError("reader was closed".into()))
        }
    }

    /// Hands out a single pass of two batches, then refuses.
    #[derive(Default)]
    struct OneShotDataset {
        opened: Cell<bool>,
    }

    impl ReiterableDataset<f32> for OneShotDataset {
        fn as_numpy_iterator(&self) -> core::result::Result<LocalIterator<f32>, SourceError> {
            if self.opened.replace(true) {
                return Err(SourceError("closed after one pass".into()));
            }
            Ok(Box::new(batches(&[0.0, 1.0]).into_iter()))
        }
    }

    #[test]
    fn test_loader_yields_sharded_batches_until_exhausted() {
        let batches = batches(&[1.0, 2.0]);
        let loader = HostLoader::new(Source::iterable(batches), mesh(), HostBackend).unwrap();

        let labels: Vec<ArrayD<f32>> = loader.map(|sharded| label(&sharded.unwrap())).collect();

        assert_eq!(
            labels,
            vec![
                ArrayD::from_elem(IxDyn(&[4]), 1.0),
                ArrayD::from_elem(IxDyn(&[4]), 2.0),
            ]
        );
    }

    #[test]
    fn test_loader_shards_over_local_devices_of_its_process() {
        let mut loader = HostLoader::new(Source::iterable(batches(&[1.0])), mesh(), HostBackend).unwrap();

        let sharded = loader.next().unwrap().unwrap();
        let image = sharded.leaves()[0].1;

        assert_eq!(image.global_shape(), &[8, 2, 2]);
        let devices: Vec<HostDevice> = image
            .addressable_shards()
            .iter()
            .map(|shard| *shard.device())
            .collect();
        assert_eq!(devices, vec![HostDevice::new(2, 1), HostDevice::new(3, 1)]);
    }

    #[test]
    fn test_restart_starts_source_over() {
        let passes = Rc::new(Cell::new(0));
        let dataset = CountingDataset {
            len: 5,
            passes: passes.clone(),
        };
        let mut loader = HostLoader::new(Source::dataset(dataset), mesh(), HostBackend).unwrap();
        assert_eq!(passes.get(), 1);

        let first = loader.next().unwrap().unwrap();
        let second = loader.next().unwrap().unwrap();
        assert_eq!(label(&first), ArrayD::from_elem(IxDyn(&[4]), 0.0));
        assert_eq!(label(&second), ArrayD::from_elem(IxDyn(&[4]), 1.0));

        let restarted = loader.restart().unwrap().next().unwrap().unwrap();

        assert_eq!(passes.get(), 2);
        assert_eq!(label(&restarted), ArrayD::from_elem(IxDyn(&[4]), 0.0));
    }

    #[test]
    fn test_reset_restarts_iterable_sources() {
        let batches = batches(&[1.0, 2.0]);
        let mut loader = HostLoader::new(Source::iterable(batches), mesh(), HostBackend).unwrap();

        assert_eq!(loader.by_ref().count(), 2);
        assert!(loader.next().is_none());

        loader.reset().unwrap();
        assert_eq!(loader.count(), 2);
    }

    #[test]
    fn test_loader_should_fail_on_construction_when_source_cannot_iterate() {
        let result = HostLoader::new(Source::dataset(ClosedDataset), mesh(), HostBackend);

        assert!(matches!(result, Err(LoaderError::UnsupportedSource(_))));
    }

    #[test]
    fn test_reset_should_fail_when_source_closes_and_keep_live_iterator() {
        let mut loader = HostLoader::new(Source::dataset(OneShotDataset::default()), mesh(), HostBackend).unwrap();
        let first = loader.next().unwrap().unwrap();
        assert_eq!(label(&first), ArrayD::from_elem(IxDyn(&[4]), 0.0));

        let Err(err) = loader.reset() else {
            panic!("a closed dataset cannot be reset");
        };
        assert_eq!(
            err.to_string(),
            "unsupported data source: dataset cannot be iterated: closed after one pass"
        );
        assert!(matches!(loader.restart(), Err(LoaderError::UnsupportedSource(_))));

        // The pass opened before the failed resets goes on.
        let second = loader.next().unwrap().unwrap();
        assert_eq!(label(&second), ArrayD::from_elem(IxDyn(&[4]), 1.0));
        assert!(loader.next().is_none());
    }

    #[test]
    fn test_loader_retries_transient_failures() {
        let batches = vec![
            Err(BatchError::Transient("stalled".into())),
            Err(BatchError::Transient("stalled".into())),
            Ok(batch(3.0)),
        ];
        let sleeps = Rc::new(Cell::new(0));
        let counter = sleeps.clone();
        let mut loader = HostLoader::new(Source::iterable(batches), mesh(), HostBackend)
            .unwrap()
            .with_sleep(move |_| counter.set(counter.get() + 1));

        let sharded = loader.next().unwrap().unwrap();

        assert_eq!(sleeps.get(), 2);
        assert_eq!(label(&sharded), ArrayD::from_elem(IxDyn(&[4]), 3.0));
    }

    #[test]
    fn test_loader_propagates_fatal_errors() {
        let batches = vec![Err(BatchError::Fatal("corrupt record".into())), Ok(batch(1.0))];
        let mut loader = HostLoader::new(Source::iterable(batches), mesh(), HostBackend).unwrap();

        assert!(matches!(
            loader.next(),
            Some(Err(LoaderError::Source(BatchError::Fatal(_))))
        ));
        assert!(matches!(loader.next(), Some(Ok(_))));
    }

    #[test]
    fn test_source_kind_should_be_supported() {
        assert_eq!(SourceKind::parse("dataset").unwrap(), SourceKind::Dataset);
        assert_eq!(SourceKind::parse("iterable").unwrap(), SourceKind::Iterable);

        let Err(err) = SourceKind::parse("tfrecord") else {
            panic!("tfrecord is not a source kind");
        };
        assert_eq!(
            err.to_string(),
            "unsupported data source: `tfrecord`, expected one of: dataset, iterable"
        );
    }

    #[test]
    fn test_from_config_checks_source_before_loading() {
        let config: LoaderConfig =
            serde_json::from_str(r#"{"source": "dataset", "retry": {"max_attempts": 3, "backoff": {"secs": 1, "nanos": 0}}}"#)
                .unwrap();

        let mismatched = HostLoader::from_config(
            &config,
            Source::iterable(batches(&[1.0])),
            mesh(),
            HostBackend,
        );
        assert!(matches!(mismatched, Err(LoaderError::UnsupportedSource(_))));

        let unknown = LoaderConfig {
            source: "tfrecord".into(),
            ..config.clone()
        };
        let passes = Rc::new(Cell::new(0));
        let dataset = CountingDataset {
            len: 1,
            passes: passes.clone(),
        };
        let result = HostLoader::from_config(&unknown, Source::dataset(dataset), mesh(), HostBackend);
        assert!(matches!(result, Err(LoaderError::UnsupportedSource(_))));
        assert_eq!(passes.get(), 0);
    }
}

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{ConfigError, NoiseSchedule, Result, Sampler, SamplingGrid, Seed, TaskType};

/// Field overrides applied on top of a base configuration, keyed by field name.
pub type Overrides = Map<String, Value>;

/// Hyperparameters of an MD4 training run.
///
/// The default is the CIFAR-10 setup. Fields documented as unused are kept
/// so that configurations written for other model variants still load.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Md4Config {
    // Dataset.
    /// Number of distinct token values.
    pub vocab_size: usize,
    /// Name of the dataset to train on.
    pub dataset: String,
    /// Number of classes for class-conditional training, `None` for unconditional.
    pub classes: Option<usize>,
    /// Kind of data, text or image.
    pub task_type: TaskType,
    /// Model family.
    pub model_type: String,
    /// Shape of a single example.
    pub data_shape: Vec<usize>,

    // Diffusion process.
    /// Number of discrete time steps, `None` for continuous time.
    pub timesteps: Option<usize>,
    /// Masking schedule.
    pub noise_schedule: NoiseSchedule,
    /// Not used.
    pub outside_embed: bool,
    /// `t`, or `none` to remove the time dependence of the model.
    pub time_features: String,
    /// Whether time is continuous during training.
    pub cont_time: bool,

    // Model.
    /// Width of the hidden features.
    pub feature_dim: usize,
    /// Number of layers.
    pub n_layers: usize,
    /// Not used.
    pub ch_mult: Vec<usize>,
    /// Not used.
    pub n_dit_layers: usize,
    /// Not used.
    pub dit_num_heads: usize,
    /// Not used.
    pub dit_hidden_size: usize,
    /// Dropout probability.
    pub dropout_rate: f64,
    /// Not used.
    pub num_heads: usize,
    /// Not used.
    pub mlp_type: String,
    /// Not used.
    pub depth_scaled_init: bool,
    /// Not used.
    pub cond_type: String,

    // Optimization.
    /// Peak learning rate.
    pub learning_rate: f64,
    /// Learning rate decay after warmup.
    pub learning_rate_schedule: String,
    /// Number of linear warmup steps.
    pub warmup_steps: u64,
    /// Decoupled weight decay.
    pub weight_decay: f64,
    /// Gradient clipping norm, `0.0` disables clipping.
    pub clip: f64,
    /// Second moment decay of the optimizer.
    pub b2: f64,
    /// Number of epochs, used when `num_train_steps` is `None`.
    pub num_epochs: Option<u64>,
    /// Decay of the parameter moving average.
    pub ema_rate: f64,
    /// Number of training steps, `None` to derive it from `num_epochs`.
    pub num_train_steps: Option<u64>,
    /// Number of evaluation steps, `None` to evaluate a full epoch.
    pub num_eval_steps: Option<u64>,
    /// Global batch size, used when `per_device_batch_size` is `None`.
    pub batch_size: usize,
    /// Batch size of a single device.
    pub per_device_batch_size: Option<usize>,
    /// Whether to pad the last evaluation batch to cover the whole dataset.
    pub eval_pad_last_batch: bool,
    /// Whether to check for NaNs after every step.
    pub check_nans: bool,

    // Sampling.
    /// How tokens are unmasked.
    pub sampler: Sampler,
    /// Spacing of sampling steps.
    pub sampling_grid: SamplingGrid,
    /// Nucleus mass of the `topp` sampler.
    pub topp: f64,

    // Bookkeeping.
    /// Interval between loss logs.
    pub log_loss_every_steps: u64,
    /// Interval between evaluations.
    pub eval_every_steps: u64,
    /// Interval between checkpoints.
    pub checkpoint_every_steps: u64,
    /// Checkpoints at multiples of this many steps are never deleted.
    pub checkpoint_keep_period: u64,
    /// Random seed, `None` to let the launcher derive one per work unit.
    pub seed: Option<Seed>,
    /// Number of data loading workers.
    pub grain_num_workers: usize,
    /// Dummy field to repeat identical runs.
    pub trial: u64,
    /// Whether the run is a notebook smoke test.
    pub test_in_colab: bool,
}

impl Default for Md4Config {
    fn default() -> Self {
        Self {
            vocab_size: 256,
            dataset: "cifar10".into(),
            classes: None,
            task_type: TaskType::Image,
            model_type: "md4".into(),
            data_shape: vec![32, 32, 3],

            timesteps: Some(256),
            noise_schedule: NoiseSchedule::Linear,
            outside_embed: true,
            time_features: "t".into(),
            cont_time: true,

            feature_dim: 128,
            n_layers: 32,
            ch_mult: vec![1],
            n_dit_layers: 0,
            dit_num_heads: 12,
            dit_hidden_size: 768,
            dropout_rate: 0.1,
            num_heads: 12,
            mlp_type: "glu".into(),
            depth_scaled_init: true,
            cond_type: "adaln_zero".into(),

            learning_rate: 2e-4,
            learning_rate_schedule: "cosine".into(),
            warmup_steps: 100,
            weight_decay: 0.01,
            clip: 0.0,
            b2: 0.99,
            num_epochs: None,
            ema_rate: 0.9999,
            num_train_steps: Some(2_000_000),
            num_eval_steps: None,
            batch_size: 256,
            per_device_batch_size: None,
            eval_pad_last_batch: false,
            check_nans: false,

            sampler: Sampler::Ancestral,
            sampling_grid: SamplingGrid::Cosine,
            topp: 0.98,

            log_loss_every_steps: 500,
            eval_every_steps: 10_000,
            checkpoint_every_steps: 5_000,
            checkpoint_keep_period: 10_000,
            seed: Some(Seed::default()),
            grain_num_workers: 15,
            trial: 0,
            test_in_colab: false,
        }
    }
}

impl Md4Config {
    /// The CIFAR-10 configuration.
    pub fn cifar10() -> Self {
        Self::default()
    }

    /// Loads a configuration from a JSON file. Missing fields take their default value.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Saves the configuration as pretty-printed JSON.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Returns a copy of the configuration with `overrides` applied.
    ///
    /// Every override must name an existing field and hold a value of the
    /// field's type.
    pub fn with_overrides(&self, overrides: &Overrides) -> Result<Self> {
        let mut config = serde_json::to_value(self)?;
        let Some(fields) = config.as_object_mut() else {
            return Err(ConfigError::Unresolved("config fields: not a JSON object".into()));
        };

        for (key, value) in overrides {
            let Some(field) = fields.get_mut(key) else {
                return Err(ConfigError::UnknownField(key.clone()));
            };
            *field = value.clone();
        }

        Ok(serde_json::from_value(config)?)
    }

    /// Number of training steps, derived from `num_epochs` when `num_train_steps` is unset.
    pub fn train_steps(&self, steps_per_epoch: u64) -> Result<u64> {
        match (self.num_train_steps, self.num_epochs) {
            (Some(steps), _) => Ok(steps),
            (None, Some(epochs)) => epochs.checked_mul(steps_per_epoch).ok_or_else(|| {
                ConfigError::Unresolved(format!(
                    "training steps: {epochs} epochs of {steps_per_epoch} steps overflow"
                ))
            }),
            (None, None) => Err(ConfigError::Unresolved(
                "training steps: neither num_train_steps nor num_epochs is set".into(),
            )),
        }
    }

    /// Number of evaluation steps, a full epoch when `num_eval_steps` is unset.
    pub fn eval_steps(&self, steps_per_epoch: u64) -> u64 {
        self.num_eval_steps.unwrap_or(steps_per_epoch)
    }

    /// Global batch size over `device_count` devices.
    pub fn global_batch_size(&self, device_count: usize) -> Result<usize> {
        match self.per_device_batch_size {
            None => Ok(self.batch_size),
            Some(per_device) => per_device.checked_mul(device_count).ok_or_else(|| {
                ConfigError::Unresolved(format!(
                    "global batch size: {per_device} per device on {device_count} devices overflows"
                ))
            }),
        }
    }
}

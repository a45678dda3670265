#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! Hyperparameters of MD4 training runs.
//!
//! [`Md4Config`] declares every setting read by the training loop at startup,
//! with the CIFAR-10 setup as default. [`sweep`] lists the variants a
//! launcher starts as separate work units.

mod config;
mod error;
mod options;
mod sweep;

pub use config::*;
pub use error::*;
pub use options::*;
pub use sweep::*;

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! Multi-host data loading for MD4 training.
//!
//! Every host process pulls batches from its own local source and contributes
//! them, split across its local devices, to one globally sharded array per
//! batch leaf. [`MultiHostDataLoadIterator`] is the entry point used by the
//! training loop.

extern crate alloc;

mod array;
mod backend;
mod error;
mod fetch;
mod host;
mod iterator;

pub mod sharding;
pub mod tree;

pub use array::*;
pub use backend::*;
pub use error::*;
pub use fetch::*;
pub use host::*;
pub use iterator::*;

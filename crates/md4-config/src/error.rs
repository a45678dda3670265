use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while loading, overriding or resolving a configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Reading or writing a configuration file failed.
    #[error("unable to access config file '{}': {source}", path.display())]
    Io {
        /// The file being accessed.
        path: PathBuf,
        /// The underlying failure.
        #[source]
        source: std::io::Error,
    },
    /// The configuration is not valid JSON for [`Md4Config`](crate::Md4Config).
    #[error("malformed config: {0}")]
    Json(#[from] serde_json::Error),
    /// An override names a field the configuration does not have.
    #[error("unknown config field `{0}`")]
    UnknownField(String),
    /// A field holds a value outside of its accepted set.
    #[error("invalid value for `{field}`: {message}")]
    InvalidValue {
        /// Name of the field.
        field: &'static str,
        /// What is wrong with the value.
        message: String,
    },
    /// A derived setting cannot be computed from the configuration.
    #[error("unable to resolve {0}")]
    Unresolved(String),
}

/// Result type of configuration handling.
pub type Result<T> = core::result::Result<T, ConfigError>;

//! Error types for `Shuttle` core library.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias using `Shuttle` Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for `Shuttle` operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Config file exists but could not be read
    #[error("Failed to read config file {}: {source}", path.display())]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Config file is not valid TOML for [`crate::Config`]
    #[error("Failed to parse config file {}: {source}", path.display())]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

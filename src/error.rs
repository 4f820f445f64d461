//! Error types for configuration synthesis and apply orchestration

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for tfp-forge operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Missing or invalid required field, name collision, or dangling reference
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A script, key or generated document could not be read or written
    #[error("io error at {}: {source}", path.display())]
    Io {
        /// Path that was being accessed
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The external apply tool failed
    #[error("apply error: {0}")]
    Apply(String),

    /// A bounded wait exceeded its deadline
    #[error("timed out: {0}")]
    Timeout(String),

    /// The declared module does not map to any builder chain
    #[error("unsupported topology: {0}")]
    UnsupportedTopology(String),

    /// An apply succeeded but did not produce an output the next phase needs
    #[error("phase {phase} is missing expected output '{key}'")]
    MissingOutput {
        /// Phase that produced the outputs
        phase: String,
        /// Output key that was expected
        key: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Create a configuration error with the given message
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create an I/O error bound to the path that failed
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create an apply error with the given message
    pub fn apply(msg: impl Into<String>) -> Self {
        Self::Apply(msg.into())
    }

    /// Create a timeout error with the given message
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// Create an unsupported topology error for the given module
    pub fn unsupported_topology(module: impl Into<String>) -> Self {
        Self::UnsupportedTopology(module.into())
    }

    /// Create a missing output error
    pub fn missing_output(phase: impl Into<String>, key: impl Into<String>) -> Self {
        Self::MissingOutput {
            phase: phase.into(),
            key: key.into(),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Self::serialization(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::serialization(e.to_string())
    }
}

impl From<hcl::Error> for Error {
    fn from(e: hcl::Error) -> Self {
        Self::serialization(e.to_string())
    }
}

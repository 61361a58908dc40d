//! Error types for the reconciliation engine

use std::fmt;

use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// A step of the sync pipeline, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Link,
    Device,
    Addresses,
    Routes,
}

impl Stage {
    /// Every stage in the order the pipeline runs them
    pub const ALL: [Stage; 4] = [Stage::Link, Stage::Device, Stage::Addresses, Stage::Routes];
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Link => "cannot sync link",
            Stage::Device => "cannot configure device",
            Stage::Addresses => "cannot sync addresses",
            Stage::Routes => "cannot sync routes",
        })
    }
}

/// Errors that can occur while bringing an interface up, down or in sync
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Failed to parse configuration file
    #[error("failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Kernel call failed
    #[error("{context}: {source}")]
    Netlink {
        context: &'static str,
        #[source]
        source: wgq_netlink::Error,
    },

    /// Interface name cannot be used
    #[error("invalid interface name: {0:?}")]
    InvalidInterfaceName(String),

    /// Activation requested for an interface that already exists
    #[error("interface {0} already exists")]
    LinkExists(String),

    /// Deactivation requested for an interface that does not exist
    #[error("interface {0} does not exist")]
    LinkNotFound(String),

    /// An existing interface has the wrong kind
    #[error("interface {name} is of kind {kind}, not wireguard")]
    WrongKind { name: String, kind: String },

    /// Hook command exited non-zero
    #[error("failed to execute {command}:\n{output}")]
    Hook { command: String, output: String },

    /// A sync stage failed; earlier stages stay applied
    #[error("{stage}: {source}")]
    Stage {
        stage: Stage,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Adapter for `map_err` that tags a kernel error with what was being done
    pub fn netlink(context: &'static str) -> impl FnOnce(wgq_netlink::Error) -> Error {
        move |source| Error::Netlink { context, source }
    }

    /// Wrap this error with the sync stage it came from
    pub fn in_stage(self, stage: Stage) -> Error {
        Error::Stage {
            stage,
            source: Box::new(self),
        }
    }

    /// The failing sync stage, if this error came out of the pipeline
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Error::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// Check if this is a configuration error
    pub fn is_config_error(&self) -> bool {
        matches!(self, Error::Config(_) | Error::ConfigParse(_))
    }
}

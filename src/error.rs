//! Error type shared by the reconciliation core.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// A networks or network-status annotation could not be read.
    #[error("invalid annotation: {0}")]
    Annotation(String),

    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
        kind: &'static str,
        namespace: String,
        name: String,
    },

    /// The delegate transport or the plugin behind it failed.
    #[error("delegate error: {0}")]
    Delegate(String),

    /// The object changed since it was read; carries the stale version.
    #[error("conflict updating {namespace}/{name}: resource version {resource_version} is stale")]
    Conflict {
        namespace: String,
        name: String,
        resource_version: u64,
    },

    #[error("store error: {0}")]
    Store(String),

    #[error("container runtime error: {0}")]
    Runtime(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn not_found(kind: &'static str, namespace: &str, name: &str) -> Self {
        Error::NotFound {
            kind,
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }
}

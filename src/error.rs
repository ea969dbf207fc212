use thiserror::Error;

/// Faults in setting up or configuring a job manager.
///
/// Cancellation outcomes are never errors: they're reported as booleans.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("malformed configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("no tokio runtime to drive the job manager")]
    NoRuntime,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

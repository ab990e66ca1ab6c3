use thiserror::Error;

pub type MoverResult<T> = Result<T, DocMoverError>;

#[derive(Debug, Error)]
pub enum DocMoverError {
    #[error("invalid configuration: {reason}")]
    Config { reason: String },

    #[error("this operation must be called after starting the job")]
    NotStarted,

    #[error("this job has been stopped")]
    Stopped,

    #[error("transport failure on host \"{host}\": {reason}")]
    Transport { host: String, reason: String },

    #[error("failed to retry batch {batch_number} after failover")]
    RetryFailed {
        batch_number: u64,
        #[source]
        source: Box<DocMoverError>,
    },

    #[error("listener failure: {reason}")]
    Listener { reason: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl DocMoverError {
    pub(crate) fn config(reason: impl Into<String>) -> Self {
        DocMoverError::Config {
            reason: reason.into(),
        }
    }
}

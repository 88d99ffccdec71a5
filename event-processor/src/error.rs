use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("checkpoint store operation failed: {0}")]
    Store(#[source] anyhow::Error),

    #[error("stream client operation failed: {0}")]
    Client(#[source] anyhow::Error),

    #[error("failed to start pump for partition {partition_id}: {source}")]
    PumpStart {
        partition_id: String,
        #[source]
        source: Box<Error>,
    },

    #[error("event stream for partition {partition_id} failed: {source}")]
    Stream {
        partition_id: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl Error {
    pub fn store(e: impl Into<anyhow::Error>) -> Self {
        Self::Store(e.into())
    }

    pub fn client(e: impl Into<anyhow::Error>) -> Self {
        Self::Client(e.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

//! Typed errors shared by every reader.

use std::error::Error as StdError;

/// Errors that can occur while configuring a reader or consuming a dataset.
#[derive(Debug, thiserror::Error)]
pub enum ReaderError {
    /// A source descriptor, option or condition could not be understood.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// An error raised by the underlying driver or client, passed through as-is.
    #[error(transparent)]
    Upstream(Box<dyn StdError + Send + Sync>),
    /// An HTTP collaborator answered with a non-success status.
    #[error("request to {url} failed with status {status}: {body}")]
    Status {
        url: String,
        status: u16,
        body: String,
    },
}

impl ReaderError {
    pub fn config(msg: impl Into<String>) -> Self {
        ReaderError::Configuration(msg.into())
    }

    /// Wrap a collaborator error without altering its message or source chain.
    pub fn upstream<E>(err: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        ReaderError::Upstream(Box::new(err))
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, ReaderError::Configuration(_))
    }
}

impl From<std::io::Error> for ReaderError {
    fn from(e: std::io::Error) -> Self {
        ReaderError::upstream(e)
    }
}

impl From<serde_json::Error> for ReaderError {
    fn from(e: serde_json::Error) -> Self {
        ReaderError::upstream(e)
    }
}

/// Convenience for mapping driver results into [`ReaderError::Upstream`].
pub trait UpstreamExt<T> {
    fn upstream(self) -> Result<T>;
}

impl<T, E> UpstreamExt<T> for std::result::Result<T, E>
where
    E: StdError + Send + Sync + 'static,
{
    fn upstream(self) -> Result<T> {
        self.map_err(ReaderError::upstream)
    }
}

pub type Result<T> = std::result::Result<T, ReaderError>;

use thiserror::Error;

use crate::api::RemoteError;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("couldn't list directory: {0}")]
    List(#[source] RemoteError),
    #[error("failed to resolve shortcut: {0}")]
    Shortcut(#[source] RemoteError),
    #[error("couldn't find root directory ID: {0}")]
    RootId(#[source] RemoteError),
    #[error("directory not found: {0:?}")]
    DirNotFound(String),
    #[error("unsupported link type {0}")]
    UnsupportedLink(String),
    #[error("listing cancelled")]
    Cancelled,
    #[error("entry callback failed: {0}")]
    Callback(#[source] BoxError),
    #[error("crawl worker failed: {0}")]
    Worker(String),
}

impl CrawlError {
    pub(crate) fn list(err: RemoteError) -> Self {
        match err {
            RemoteError::Cancelled => CrawlError::Cancelled,
            other => CrawlError::List(other),
        }
    }

    pub(crate) fn shortcut(err: RemoteError) -> Self {
        match err {
            RemoteError::Cancelled => CrawlError::Cancelled,
            other => CrawlError::Shortcut(other),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, CrawlError::Cancelled)
    }
}

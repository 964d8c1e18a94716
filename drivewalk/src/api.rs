use std::future::Future;

use drive_core::{About, DriveClient, DriveError, File, FileList, ListQuery};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::pacer::Pacer;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error(transparent)]
    Api(#[from] DriveError),
    #[error("giving up after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: DriveError,
    },
    #[error("remote call cancelled")]
    Cancelled,
}

impl RemoteError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, RemoteError::Api(err) if err.is_not_found())
    }
}

/// The two remote calls the listing engine needs.
///
/// Every call receives the crawl's cancellation token and must return
/// [`RemoteError::Cancelled`] promptly once it fires.
pub trait DriveApi: Send + Sync + 'static {
    fn list_page(
        &self,
        query: &ListQuery,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<FileList, RemoteError>> + Send;

    fn get_file(
        &self,
        id: &str,
        fields: &str,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<File, RemoteError>> + Send;

    /// Prefix for media download links, see [`DriveClient::base_path`].
    fn base_path(&self) -> String {
        String::new()
    }
}

/// [`DriveClient`] behind a rate limited, retrying [`Pacer`].
pub struct PacedClient {
    client: DriveClient,
    pacer: Pacer,
}

impl PacedClient {
    pub fn new(client: DriveClient, pacer: Pacer) -> Self {
        Self { client, pacer }
    }

    pub fn client(&self) -> &DriveClient {
        &self.client
    }

    /// Account metadata, paced and retried like the listing calls.
    pub async fn get_about(
        &self,
        fields: &str,
        cancel: &CancellationToken,
    ) -> Result<About, RemoteError> {
        self.pacer
            .call(cancel, || self.client.get_about(fields))
            .await
    }
}

impl DriveApi for PacedClient {
    async fn list_page(
        &self,
        query: &ListQuery,
        cancel: &CancellationToken,
    ) -> Result<FileList, RemoteError> {
        self.pacer
            .call(cancel, || self.client.list_files(query))
            .await
    }

    async fn get_file(
        &self,
        id: &str,
        fields: &str,
        cancel: &CancellationToken,
    ) -> Result<File, RemoteError> {
        self.pacer
            .call(cancel, || self.client.get_file(id, Some(fields)))
            .await
    }

    fn base_path(&self) -> String {
        self.client.base_path()
    }
}

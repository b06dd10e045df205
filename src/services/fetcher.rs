// src/services/fetcher.rs
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::errors::FilterError;
use crate::models::StorageUri;
use crate::services::flood::{FloodControl, REMOTE_FETCH};
use crate::storage::LocalStorage;

const TEMP_PREFIX: &str = "refit_";

#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn get(&self, url: &str) -> Result<(u16, Bytes), FilterError>;
}

pub struct ReqwestClient {
    client: Client,
}

impl ReqwestClient {
    pub fn new(timeout: Duration) -> Result<Self, FilterError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("refit/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FilterError::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn get(&self, url: &str) -> Result<(u16, Bytes), FilterError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FilterError::FetchFailed(format!("{}: {}", url, e)))?;

        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| FilterError::FetchFailed(format!("{}: {}", url, e)))?;

        Ok((status, body))
    }
}

/// A file in temporary storage, removed when dropped.
pub struct TemporaryFile {
    storage: LocalStorage,
    uri: StorageUri,
    path: PathBuf,
}

impl TemporaryFile {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TemporaryFile {
    fn drop(&mut self) {
        if let Err(e) = self.storage.delete(&self.uri) {
            log::warn!("Failed to remove temporary file {}: {}", self.uri, e);
        }
    }
}

pub struct FetchedSource {
    pub file: TemporaryFile,
    /// Hex SHA-256 of the downloaded bytes.
    pub digest: String,
}

pub struct RemoteFetcher {
    client: Box<dyn HttpClient>,
    flood: FloodControl,
    storage: LocalStorage,
}

impl RemoteFetcher {
    pub fn new(client: Box<dyn HttpClient>, flood: FloodControl, storage: LocalStorage) -> Self {
        Self {
            client,
            flood,
            storage,
        }
    }

    pub async fn fetch(&self, url: &str) -> Result<FetchedSource, FilterError> {
        self.flood.admit(REMOTE_FETCH).await?;

        let (status, body) = self.client.get(url).await?;
        if status != 200 {
            return Err(FilterError::FetchFailed(format!(
                "{} returned HTTP {}",
                url, status
            )));
        }

        let digest = format!("{:x}", Sha256::digest(&body));
        let uri = self.storage.temporary_uri(TEMP_PREFIX);
        let path = self.storage.realpath(&uri)?;
        let file = TemporaryFile {
            storage: self.storage.clone(),
            uri: uri.clone(),
            path,
        };

        let storage = self.storage.clone();
        tokio::task::spawn_blocking(move || storage.write(&uri, &body))
            .await
            .map_err(|e| FilterError::FetchFailed(format!("write task failed: {}", e)))??;

        log::debug!("Fetched {} into {}", url, file.path().display());
        Ok(FetchedSource { file, digest })
    }
}

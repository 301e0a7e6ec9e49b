//! PDF artifact storage.
//!
//! Uploads are keyed by facture id and return the public URL of the stored
//! object. Upload failures never fail the generation request; the caller
//! records them on the facture row instead.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;
use tokio::fs;
use tracing::info;

use facturo_core::config::{StockageConfig, StockageMode};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage client error: {0}")]
    Client(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("upload failed: {0}")]
    Upload(String),
}

#[async_trait]
pub trait ArtefactStorage: Send + Sync {
    /// Store the artifact and return its public URL.
    async fn upload(&self, key: &str, data: Vec<u8>) -> Result<String, StorageError>;
}

/// Filesystem-backed store for development and single-host deployments.
pub struct LocalStorage {
    base_path: PathBuf,
}

impl LocalStorage {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self { base_path: base_path.into() }
    }
}

#[async_trait]
impl ArtefactStorage for LocalStorage {
    async fn upload(&self, key: &str, data: Vec<u8>) -> Result<String, StorageError> {
        let path = self.base_path.join(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&path, data).await?;

        Ok(format!("file://{}", path.display()))
    }
}

/// Hosted bucket store over HTTP (object upload + public URL convention).
pub struct BucketStorage {
    client: reqwest::Client,
    base_url: String,
    bucket: String,
    api_key: SecretString,
}

impl BucketStorage {
    pub fn new(
        base_url: &str,
        bucket: &str,
        api_key: SecretString,
        timeout_secs: u64,
    ) -> Result<Self, StorageError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|error| StorageError::Client(error.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            bucket: bucket.to_string(),
            api_key,
        })
    }
}

#[async_trait]
impl ArtefactStorage for BucketStorage {
    async fn upload(&self, key: &str, data: Vec<u8>) -> Result<String, StorageError> {
        let url = format!("{}/object/{}/{}", self.base_url, self.bucket, key);
        let response = self
            .client
            .post(&url)
            .bearer_auth(self.api_key.expose_secret())
            .header(reqwest::header::CONTENT_TYPE, "application/pdf")
            .body(data)
            .send()
            .await
            .map_err(|error| StorageError::Upload(error.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(StorageError::Upload(format!("bucket responded {status}: {body}")));
        }

        Ok(format!("{}/object/public/{}/{}", self.base_url, self.bucket, key))
    }
}

/// Build the storage backend selected by configuration; `None` when artifact
/// storage is disabled.
pub fn build_storage(
    stockage: &StockageConfig,
) -> Result<Option<Arc<dyn ArtefactStorage>>, StorageError> {
    match stockage.mode {
        StockageMode::Desactive => {
            info!("artifact storage disabled, generated PDFs are response-only");
            Ok(None)
        }
        StockageMode::Local => {
            let repertoire = stockage.repertoire.clone().unwrap_or_else(|| "storage".to_string());
            Ok(Some(Arc::new(LocalStorage::new(repertoire))))
        }
        StockageMode::Bucket => {
            let base_url = stockage.base_url.clone().unwrap_or_default();
            let api_key =
                stockage.api_key.clone().unwrap_or_else(|| SecretString::from(String::new()));
            Ok(Some(Arc::new(BucketStorage::new(
                &base_url,
                &stockage.bucket,
                api_key,
                stockage.timeout_secs,
            )?)))
        }
    }
}

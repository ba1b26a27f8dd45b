//! Persisted state storage for the index snapshot: none, local file, or a
//! Google Cloud Storage object, selected by the scheme of a configured
//! URI.

use async_trait::async_trait;
use indexer_model::{Error, Index, IndexSnapshot};

use crate::registry::Credentials;

/// Loads and saves the index snapshot across restarts.
#[async_trait]
pub trait StateStorage: Send + Sync {
    async fn load(&self) -> Result<Index, Error>;
    async fn save(&self, index: &Index) -> Result<(), Error>;
}

/// Builds the configured storage backend from a URI: empty for
/// [`NullStorage`], a bare path for [`FileStorage`], `gs://bucket/object`
/// for [`CloudObjectStorage`].
pub async fn from_uri(uri: &str) -> Result<Box<dyn StateStorage>, Error> {
    if uri.is_empty() {
        return Ok(Box::new(NullStorage));
    }
    if let Some(rest) = uri.strip_prefix("gs://") {
        let (bucket, object) = rest
            .split_once('/')
            .ok_or_else(|| Error::Config(format!("invalid gs:// URI, missing object path: {uri}")))?;
        if bucket.is_empty() {
            return Err(Error::Config(format!("invalid gs:// URI, missing bucket: {uri}")));
        }
        let credentials = Credentials::ambient().await?;
        return Ok(Box::new(CloudObjectStorage::new(
            bucket.to_string(),
            object.to_string(),
            credentials,
        )));
    }
    Ok(Box::new(FileStorage::new(uri.to_string())))
}

/// Discards snapshots. Used when no `--state-storage-uri` is configured;
/// the index always starts empty and a full reindex populates it.
pub struct NullStorage;

#[async_trait]
impl StateStorage for NullStorage {
    async fn load(&self) -> Result<Index, Error> {
        Ok(Index::new())
    }

    async fn save(&self, _index: &Index) -> Result<(), Error> {
        Ok(())
    }
}

/// Persists the snapshot to a local file as JSON.
pub struct FileStorage {
    path: String,
}

impl FileStorage {
    pub fn new(path: String) -> Self {
        FileStorage { path }
    }
}

#[async_trait]
impl StateStorage for FileStorage {
    async fn load(&self) -> Result<Index, Error> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => {
                let snapshot: IndexSnapshot = serde_json::from_slice(&bytes)
                    .map_err(|e| Error::Storage(format!("malformed state file {}: {e}", self.path)))?;
                Index::from_snapshot(snapshot)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Index::new()),
            Err(e) => Err(Error::Storage(format!("failed to read {}: {e}", self.path))),
        }
    }

    async fn save(&self, index: &Index) -> Result<(), Error> {
        let snapshot = index.to_snapshot();
        let bytes = serde_json::to_vec_pretty(&snapshot)
            .map_err(|e| Error::Storage(format!("failed to encode state: {e}")))?;
        tokio::fs::write(&self.path, bytes)
            .await
            .map_err(|e| Error::Storage(format!("failed to write {}: {e}", self.path)))
    }
}

/// Persists the snapshot as an object in Google Cloud Storage, speaking
/// the JSON API directly over `reqwest` with an ambient bearer token (the
/// pack carries no maintained `google-cloud-storage` crate).
pub struct CloudObjectStorage {
    bucket: String,
    object: String,
    credentials: Credentials,
    client: reqwest::Client,
}

impl CloudObjectStorage {
    pub fn new(bucket: String, object: String, credentials: Credentials) -> Self {
        CloudObjectStorage {
            bucket,
            object,
            credentials,
            client: reqwest::Client::new(),
        }
    }

    fn media_url(&self) -> String {
        format!(
            "https://storage.googleapis.com/storage/v1/b/{}/o/{}?alt=media",
            self.bucket,
            urlencoding_object(&self.object)
        )
    }

    fn upload_url(&self) -> String {
        format!(
            "https://storage.googleapis.com/upload/storage/v1/b/{}/o?uploadType=media&name={}",
            self.bucket,
            urlencoding_object(&self.object)
        )
    }

    async fn bearer_token(&self) -> Result<String, Error> {
        let (_, token) = self.credentials.basic().await?;
        Ok(token)
    }
}

fn urlencoding_object(object: &str) -> String {
    object.replace('/', "%2F")
}

#[async_trait]
impl StateStorage for CloudObjectStorage {
    async fn load(&self) -> Result<Index, Error> {
        let token = self.bearer_token().await?;
        let response = self
            .client
            .get(self.media_url())
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| Error::Storage(format!("failed to fetch gs://{}/{}: {e}", self.bucket, self.object)))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(Index::new());
        }
        if !response.status().is_success() {
            return Err(Error::Storage(format!(
                "gs://{}/{} returned {}",
                self.bucket,
                self.object,
                response.status()
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::Storage(format!("failed to read gs object body: {e}")))?;
        let snapshot: IndexSnapshot = serde_json::from_slice(&bytes)
            .map_err(|e| Error::Storage(format!("malformed state object: {e}")))?;
        Index::from_snapshot(snapshot)
    }

    async fn save(&self, index: &Index) -> Result<(), Error> {
        let token = self.bearer_token().await?;
        let snapshot = index.to_snapshot();
        let bytes = serde_json::to_vec(&snapshot)
            .map_err(|e| Error::Storage(format!("failed to encode state: {e}")))?;

        let response = self
            .client
            .post(self.upload_url())
            .bearer_auth(token)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(bytes)
            .send()
            .await
            .map_err(|e| Error::Storage(format!("failed to upload gs://{}/{}: {e}", self.bucket, self.object)))?;

        if !response.status().is_success() {
            return Err(Error::Storage(format!(
                "gs://{}/{} upload returned {}",
                self.bucket,
                self.object,
                response.status()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn file_storage_missing_file_loads_empty_index() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.json");
        let storage = FileStorage::new(path.to_string_lossy().to_string());
        let index = storage.load().await.unwrap();
        assert!(index.read().is_empty());
    }

    #[tokio::test]
    async fn file_storage_round_trips_snapshot() {
        use chrono::Utc;
        use indexer_model::{Image, Reference};
        use std::collections::BTreeMap;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let storage = FileStorage::new(path.to_string_lossy().to_string());

        let index = Index::new();
        let reference = Reference::parse("r.example/ns/app:v1").unwrap();
        index.replace_image(&reference, Image::new("v1", Utc::now(), BTreeMap::new()));
        storage.save(&index).await.unwrap();

        let loaded = storage.load().await.unwrap();
        let repos = loaded.read();
        assert_eq!(repos.get("r.example/ns/app").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn null_storage_always_loads_empty() {
        let storage = NullStorage;
        assert!(storage.load().await.unwrap().read().is_empty());
    }
}

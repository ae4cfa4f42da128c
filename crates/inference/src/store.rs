//! [`ImageStore`] implementations.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::RwLock;

use crate::error::InferenceError;
use crate::http::{ensure_success, parse_response};
use crate::traits::ImageStore;

/// Object store reached over HTTP.
///
/// `GET {base}/objects/{ref}` returns the bytes; `POST {base}/objects` with a
/// raw body stores them and answers `{"ref": "..."}`.
#[derive(Clone)]
pub struct HttpImageStore {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct PutResponse {
    #[serde(rename = "ref")]
    image_ref: String,
}

impl HttpImageStore {
    pub fn new(client: reqwest::Client, base_url: String) -> Self {
        Self { client, base_url }
    }
}

#[async_trait]
impl ImageStore for HttpImageStore {
    async fn fetch(&self, image_ref: &str) -> Result<Vec<u8>, InferenceError> {
        let response = self
            .client
            .get(format!("{}/objects/{}", self.base_url, image_ref))
            .send()
            .await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(InferenceError::NotFound(image_ref.to_string()));
        }
        let response = ensure_success(response).await?;
        Ok(response.bytes().await?.to_vec())
    }

    async fn put(&self, bytes: Vec<u8>, content_type: &str) -> Result<String, InferenceError> {
        let response = self
            .client
            .post(format!("{}/objects", self.base_url))
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(bytes)
            .send()
            .await?;
        let stored: PutResponse = parse_response(response).await?;
        Ok(stored.image_ref)
    }
}

/// In-process store for tests and single-binary development.
#[derive(Default)]
pub struct MemoryImageStore {
    objects: RwLock<HashMap<String, (Vec<u8>, String)>>,
    next_id: AtomicU64,
}

impl MemoryImageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store bytes under a caller-chosen reference.
    pub async fn insert(&self, image_ref: impl Into<String>, bytes: Vec<u8>, content_type: &str) {
        self.objects
            .write()
            .await
            .insert(image_ref.into(), (bytes, content_type.to_string()));
    }

    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }

    pub async fn content_type(&self, image_ref: &str) -> Option<String> {
        self.objects
            .read()
            .await
            .get(image_ref)
            .map(|(_, ct)| ct.clone())
    }
}

#[async_trait]
impl ImageStore for MemoryImageStore {
    async fn fetch(&self, image_ref: &str) -> Result<Vec<u8>, InferenceError> {
        self.objects
            .read()
            .await
            .get(image_ref)
            .map(|(bytes, _)| bytes.clone())
            .ok_or_else(|| InferenceError::NotFound(image_ref.to_string()))
    }

    async fn put(&self, bytes: Vec<u8>, content_type: &str) -> Result<String, InferenceError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let image_ref = format!("mem://{id}");
        self.insert(image_ref.clone(), bytes, content_type).await;
        Ok(image_ref)
    }
}

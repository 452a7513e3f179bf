//! Blob storage for check-in progress photos
//!
//! Photos never pass through this process. Clients upload straight to a
//! short-lived URL from the gateway and then submit the returned file
//! reference with their check-in.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::error::CoachError;

#[derive(Error, Debug)]
pub enum StorageError {
  #[error("Request failed: {0}")]
  Request(String),

  #[error("Gateway error: HTTP {0}")]
  Gateway(u16),

  #[error("File not found: {0}")]
  NotFound(String),

  #[error("Invalid gateway URL: {0}")]
  Url(#[from] url::ParseError),
}

impl From<StorageError> for CoachError {
  fn from(e: StorageError) -> Self {
    match e {
      StorageError::NotFound(file_ref) => CoachError::NotFound(format!("file {}", file_ref)),
      other => CoachError::Storage(other.to_string()),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadTicket {
  pub file_ref: String,
  pub upload_url: String,
}

#[async_trait]
pub trait BlobStore: Send + Sync {
  /// New upload slot under `prefix`
  async fn upload_url(&self, prefix: &str) -> Result<UploadTicket, StorageError>;
  async fn get_url(&self, file_ref: &str) -> Result<String, StorageError>;
  async fn delete(&self, file_ref: &str) -> Result<(), StorageError>;
}

/// Blob gateway speaking a small JSON API:
/// `POST /uploads`, `GET /files/{ref}/url`, `DELETE /files/{ref}`
pub struct HttpBlobStore {
  client: Client,
  base_url: Url,
}

#[derive(Deserialize)]
struct UrlResponse {
  url: String,
}

impl HttpBlobStore {
  pub fn new(base_url: Url) -> Self {
    Self {
      client: Client::new(),
      base_url,
    }
  }

  fn file_url(&self, file_ref: &str, suffix: &str) -> Result<Url, StorageError> {
    let mut url = self.base_url.clone();
    url
      .path_segments_mut()
      .map_err(|_| StorageError::Url(url::ParseError::RelativeUrlWithCannotBeABaseBase))?
      .pop_if_empty()
      .push("files")
      .push(file_ref)
      .extend(suffix.split('/').filter(|s| !s.is_empty()));
    Ok(url)
  }

  fn check(status: StatusCode, file_ref: &str) -> Result<(), StorageError> {
    match status {
      s if s.is_success() => Ok(()),
      StatusCode::NOT_FOUND => Err(StorageError::NotFound(file_ref.to_string())),
      s => Err(StorageError::Gateway(s.as_u16())),
    }
  }
}

#[async_trait]
impl BlobStore for HttpBlobStore {
  async fn upload_url(&self, prefix: &str) -> Result<UploadTicket, StorageError> {
    let url = self.base_url.join("uploads")?;
    let response = self
      .client
      .post(url)
      .json(&serde_json::json!({ "prefix": prefix }))
      .send()
      .await
      .map_err(|e| StorageError::Request(e.to_string()))?;

    Self::check(response.status(), prefix)?;
    response
      .json::<UploadTicket>()
      .await
      .map_err(|e| StorageError::Request(e.to_string()))
  }

  async fn get_url(&self, file_ref: &str) -> Result<String, StorageError> {
    let response = self
      .client
      .get(self.file_url(file_ref, "url")?)
      .send()
      .await
      .map_err(|e| StorageError::Request(e.to_string()))?;

    Self::check(response.status(), file_ref)?;
    let body: UrlResponse = response
      .json()
      .await
      .map_err(|e| StorageError::Request(e.to_string()))?;
    Ok(body.url)
  }

  async fn delete(&self, file_ref: &str) -> Result<(), StorageError> {
    let response = self
      .client
      .delete(self.file_url(file_ref, "")?)
      .send()
      .await
      .map_err(|e| StorageError::Request(e.to_string()))?;

    match Self::check(response.status(), file_ref) {
      // Already gone is fine
      Err(StorageError::NotFound(_)) => Ok(()),
      other => other,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn store(server: &mockito::Server) -> HttpBlobStore {
    HttpBlobStore::new(Url::parse(&format!("{}/", server.url())).unwrap())
  }

  #[tokio::test]
  async fn test_upload_url_returns_ticket() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
      .mock("POST", "/uploads")
      .match_body(mockito::Matcher::Json(serde_json::json!({"prefix": "user-1"})))
      .with_status(200)
      .with_header("content-type", "application/json")
      .with_body(r#"{"fileRef": "user-1/abc.jpg", "uploadUrl": "https://blob.example/put/abc"}"#)
      .create_async()
      .await;

    let ticket = store(&server).upload_url("user-1").await.unwrap();
    assert_eq!(ticket.file_ref, "user-1/abc.jpg");
    mock.assert_async().await;
  }

  #[tokio::test]
  async fn test_get_url_escapes_file_ref() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
      .mock("GET", mockito::Matcher::Regex(r"^/files/user-1(%2F|/)abc\.jpg/url$".to_string()))
      .with_status(200)
      .with_body(r#"{"url": "https://blob.example/get/abc"}"#)
      .create_async()
      .await;

    let url = store(&server).get_url("user-1/abc.jpg").await.unwrap();
    assert_eq!(url, "https://blob.example/get/abc");
    mock.assert_async().await;
  }

  #[tokio::test]
  async fn test_missing_files() {
    let mut server = mockito::Server::new_async().await;
    server
      .mock("GET", "/files/gone.jpg/url")
      .with_status(404)
      .create_async()
      .await;
    server
      .mock("DELETE", "/files/gone.jpg")
      .with_status(404)
      .create_async()
      .await;

    let store = store(&server);
    assert!(matches!(store.get_url("gone.jpg").await, Err(StorageError::NotFound(_))));
    assert!(store.delete("gone.jpg").await.is_ok());
  }
}

//! Xray Client
//!
//! Thin client for the n8n public REST API. It fetches the documents the
//! trace reconstruction works on:
//! - `GET {base}/executions/{id}?includeData=true` → [`ExecutionRecord`]
//! - `GET {base}/workflows/{id}` → [`WorkflowDocument`]
//!
//! Failures here happen before any analysis starts and are reported as
//! [`ClientError`]s.

use std::time::Duration;

use reqwest::Client;
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;
use xray_config::ApiConfig;
use xray_trace::{ExecutionRecord, WorkflowDocument};

/// Header carrying the n8n API key.
pub const API_KEY_HEADER: &str = "X-N8N-API-KEY";

/// Longest error body kept in [`ClientError::Status`].
const MAX_ERROR_BODY: usize = 512;

/// Errors raised while fetching documents from n8n.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
  /// The configured base URL cannot be used to build endpoint URLs.
  #[error("invalid API base URL '{url}': {message}")]
  InvalidBaseUrl { url: String, message: String },

  /// The request could not be sent or the response could not be read.
  #[error("request to {url} failed: {source}")]
  Http {
    url: String,
    #[source]
    source: reqwest::Error,
  },

  /// n8n answered with a non-success status.
  #[error("{url} returned HTTP {status}: {body}")]
  Status { url: String, status: u16, body: String },

  /// The response body is not the expected document.
  #[error("failed to decode response from {url}: {source}")]
  Decode {
    url: String,
    #[source]
    source: serde_json::Error,
  },
}

/// Client for the n8n public API.
#[derive(Debug, Clone)]
pub struct ApiClient {
  http: Client,
  base_url: Url,
  api_key: Option<String>,
}

impl ApiClient {
  /// Create a client from the API section of the configuration.
  pub fn new(config: &ApiConfig) -> Result<Self, ClientError> {
    let base_url = Url::parse(&config.base_url).map_err(|e| ClientError::InvalidBaseUrl {
      url: config.base_url.clone(),
      message: e.to_string(),
    })?;
    if base_url.cannot_be_a_base() {
      return Err(ClientError::InvalidBaseUrl {
        url: config.base_url.clone(),
        message: "URL cannot be used as a base".to_string(),
      });
    }

    let http = Client::builder()
      .timeout(Duration::from_millis(config.timeout_ms))
      .build()
      .map_err(|source| ClientError::Http {
        url: config.base_url.clone(),
        source,
      })?;

    Ok(Self {
      http,
      base_url,
      api_key: config.api_key.clone(),
    })
  }

  /// Fetch an execution including its execution data.
  pub async fn fetch_execution(&self, execution_id: &str) -> Result<ExecutionRecord, ClientError> {
    let mut url = self.endpoint(&["executions", execution_id]);
    url.query_pairs_mut().append_pair("includeData", "true");

    debug!(execution_id = %execution_id, %url, "fetching execution");
    self.get_document(url).await
  }

  /// Fetch a workflow definition.
  pub async fn fetch_workflow(&self, workflow_id: &str) -> Result<WorkflowDocument, ClientError> {
    let url = self.endpoint(&["workflows", workflow_id]);

    debug!(workflow_id = %workflow_id, %url, "fetching workflow");
    self.get_document(url).await
  }

  /// Build `{base}/{segments...}`, escaping each segment.
  pub fn endpoint(&self, segments: &[&str]) -> Url {
    let mut url = self.base_url.clone();
    // Checked in `new`: the base URL has path segments.
    if let Ok(mut path) = url.path_segments_mut() {
      path.pop_if_empty().extend(segments);
    }
    url
  }

  async fn get_document<T: DeserializeOwned>(&self, url: Url) -> Result<T, ClientError> {
    let mut request = self.http.get(url.clone()).header("accept", "application/json");
    if let Some(api_key) = &self.api_key {
      request = request.header(API_KEY_HEADER, api_key);
    }

    let response = request.send().await.map_err(|source| ClientError::Http {
      url: url.to_string(),
      source,
    })?;
    let status = response.status();
    let body = response.text().await.map_err(|source| ClientError::Http {
      url: url.to_string(),
      source,
    })?;

    if !status.is_success() {
      return Err(ClientError::Status {
        url: url.to_string(),
        status: status.as_u16(),
        body: body.chars().take(MAX_ERROR_BODY).collect(),
      });
    }

    serde_json::from_str(&body).map_err(|source| ClientError::Decode {
      url: url.to_string(),
      source,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn client(base_url: &str) -> ApiClient {
    ApiClient::new(&ApiConfig {
      base_url: base_url.to_string(),
      ..ApiConfig::default()
    })
    .unwrap()
  }

  #[test]
  fn test_endpoint_joins_segments() {
    let client = client("http://localhost:5678/api/v1");

    assert_eq!(
      client.endpoint(&["executions", "42"]).as_str(),
      "http://localhost:5678/api/v1/executions/42"
    );
  }

  #[test]
  fn test_endpoint_with_trailing_slash() {
    let client = client("https://n8n.example.com/api/v1/");

    assert_eq!(
      client.endpoint(&["workflows", "abc"]).as_str(),
      "https://n8n.example.com/api/v1/workflows/abc"
    );
  }

  #[test]
  fn test_endpoint_escapes_ids() {
    let client = client("http://localhost:5678/api/v1");

    assert_eq!(
      client.endpoint(&["executions", "a/b"]).as_str(),
      "http://localhost:5678/api/v1/executions/a%2Fb"
    );
  }

  #[test]
  fn test_invalid_base_url() {
    let result = ApiClient::new(&ApiConfig {
      base_url: "not a url".to_string(),
      ..ApiConfig::default()
    });

    assert!(matches!(result, Err(ClientError::InvalidBaseUrl { .. })));
  }
}

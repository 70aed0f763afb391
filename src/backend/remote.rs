//! HTTP embedding APIs.
//!
//! - `flavor = "openai"`: `POST {url}/embeddings` with a bearer key. Works
//!   with any OpenAI-compatible server.
//! - `flavor = "ollama"`: `POST {url}/api/embed`.
//!
//! Status mapping (one attempt per call):
//! - HTTP 429 and 5xx → `EmbedError::Transient`
//! - other HTTP 4xx → `EmbedError::Permanent`
//! - network error or client timeout → `EmbedError::Transient`
//! - malformed body → `EmbedError::Permanent`

use std::time::Duration;

use async_trait::async_trait;

use docindex_core::backend::{BackendKind, ModelBackend};
use docindex_core::error::{EmbedError, EmbedResult};

use crate::config::{ModelConfig, RemoteFlavor};

pub struct RemoteBackend {
    model_id: String,
    api_model: String,
    dims: usize,
    max_batch: usize,
    flavor: RemoteFlavor,
    endpoint: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl RemoteBackend {
    pub fn new(config: &ModelConfig, request_timeout: Duration) -> EmbedResult<Self> {
        let api_key = config.resolve_api_key();
        if config.flavor == RemoteFlavor::OpenAi && api_key.is_none() {
            return Err(EmbedError::Configuration(format!(
                "model '{}': no API key (set api_key, api_key_env, or OPENAI_API_KEY)",
                config.id
            )));
        }

        let base = config.url().trim_end_matches('/');
        let endpoint = match config.flavor {
            RemoteFlavor::OpenAi => format!("{}/embeddings", base),
            RemoteFlavor::Ollama => format!("{}/api/embed", base),
        };

        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| EmbedError::Configuration(format!("http client: {}", e)))?;

        Ok(Self {
            model_id: config.id.clone(),
            api_model: config.api_model().to_string(),
            dims: config.dims,
            max_batch: config.max_batch,
            flavor: config.flavor,
            endpoint,
            api_key,
            client,
        })
    }
}

#[async_trait]
impl ModelBackend for RemoteBackend {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dims(&self) -> usize {
        self.dims
    }

    fn max_batch(&self) -> usize {
        self.max_batch
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Remote
    }

    async fn embed(&self, batch: &[String]) -> EmbedResult<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.api_model,
            "input": batch,
        });

        let mut request = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", "application/json")
            .json(&body);
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {}", key));
        }

        let response = request
            .send()
            .await
            .map_err(|e| EmbedError::Transient(format!("{}: {}", self.model_id, e)))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            let msg = format!("{} API error {}: {}", self.model_id, status, body_text);
            // Rate limited or server error
            if status.as_u16() == 429 || status.is_server_error() {
                return Err(EmbedError::Transient(msg));
            }
            return Err(EmbedError::Permanent(msg));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| EmbedError::Permanent(format!("invalid response body: {}", e)))?;

        match self.flavor {
            RemoteFlavor::OpenAi => parse_openai_response(&json),
            RemoteFlavor::Ollama => parse_ollama_response(&json),
        }
    }
}

/// Extract `data[].embedding`, ordered by `data[].index` when present.
fn parse_openai_response(json: &serde_json::Value) -> EmbedResult<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| EmbedError::Permanent("invalid response: missing data array".into()))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (pos, item) in data.iter().enumerate() {
        let embedding = item
            .get("embedding")
            .ok_or_else(|| EmbedError::Permanent("invalid response: missing embedding".into()))?;
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(pos);
        indexed.push((index, parse_vector(embedding)?));
    }

    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

fn parse_ollama_response(json: &serde_json::Value) -> EmbedResult<Vec<Vec<f32>>> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| {
            EmbedError::Permanent("invalid response: missing embeddings array".into())
        })?;

    embeddings.iter().map(parse_vector).collect()
}

fn parse_vector(value: &serde_json::Value) -> EmbedResult<Vec<f32>> {
    let items = value
        .as_array()
        .ok_or_else(|| EmbedError::Permanent("invalid response: embedding is not an array".into()))?;
    items
        .iter()
        .map(|v| {
            v.as_f64()
                .map(|f| f as f32)
                .ok_or_else(|| EmbedError::Permanent("invalid response: non-numeric value".into()))
        })
        .collect()
}

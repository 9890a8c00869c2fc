/// Language model access
///
/// `ResponseGenerator` turns a prompt into text. Failures are logged and
/// reported as `None`; callers treat that as "no response produced".

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::GenerationError;

#[async_trait]
pub trait ResponseGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Option<String>;
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: Option<String>,
}

/// Client for an Ollama-style `/api/generate` endpoint.
pub struct OllamaGenerator {
    http_client: reqwest::Client,
    api_url: String,
    model: String,
}

impl OllamaGenerator {
    pub fn new(
        http_client: reqwest::Client,
        api_url: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            http_client,
            api_url: api_url.into(),
            model: model.into(),
        }
    }

    async fn request(&self, prompt: &str) -> Result<String, GenerationError> {
        let request = GenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
        };

        let response = self
            .http_client
            .post(&self.api_url)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error response".to_string());
            return Err(GenerationError::Status {
                status: status.as_u16(),
                message: error_text,
            });
        }

        let response_text = response.text().await?;
        extract_response(&response_text)
    }
}

fn extract_response(body: &str) -> Result<String, GenerationError> {
    let parsed: GenerateResponse =
        serde_json::from_str(body).map_err(|e| GenerationError::Parse(e.to_string()))?;
    parsed.response.ok_or(GenerationError::MissingResponse)
}

#[async_trait]
impl ResponseGenerator for OllamaGenerator {
    async fn generate(&self, prompt: &str) -> Option<String> {
        match self.request(prompt).await {
            Ok(text) => Some(text),
            Err(e) => {
                log::error!("Error calling model API at {}: {}", self.api_url, e);
                None
            }
        }
    }
}

//! OpenAI-compatible chat-completion client with timeout, classification
//! and retry.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, instrument, warn};

use riskbot_core::{defaults, AiRequestPayload, AiResult, AnalysisBackend, Error, Result};

use super::error::classify_failure;
use super::types::*;
use crate::retry::RetryPolicy;

/// Configuration for the OpenAI-compatible backend.
#[derive(Debug, Clone)]
pub struct OpenAIConfig {
    /// Full URL the chat-completion request is POSTed to.
    pub endpoint_url: String,
    /// API key (optional for local endpoints).
    pub api_key: Option<String>,
    /// Header carrying the key. `Authorization` gets a `Bearer` prefix.
    pub auth_header: String,
    /// Model to request.
    pub model: String,
    /// Dotted path to the analysis text in a success response.
    pub response_text_path: String,
    /// Ask for `{"type": "json_object"}` output.
    pub json_response_format: bool,
    /// Sampling temperature.
    pub temperature: Option<f32>,
    /// Skip TLS verification (for self-signed certs in local environments).
    pub skip_tls_verify: bool,
    pub retry: RetryPolicy,
}

impl Default for OpenAIConfig {
    fn default() -> Self {
        Self {
            endpoint_url: String::new(),
            api_key: None,
            auth_header: defaults::AI_AUTH_HEADER.to_string(),
            model: defaults::AI_MODEL.to_string(),
            response_text_path: defaults::AI_RESPONSE_PATH.to_string(),
            json_response_format: true,
            temperature: Some(defaults::AI_TEMPERATURE),
            skip_tls_verify: false,
            retry: RetryPolicy::default(),
        }
    }
}

/// Result of one logical call plus how it got there.
#[derive(Debug, Clone)]
pub struct AnalysisOutcome {
    pub result: AiResult,
    /// Network attempts made, first try included.
    pub attempts: u32,
    pub elapsed: Duration,
}

/// OpenAI-compatible analysis backend.
pub struct OpenAIBackend {
    client: Client,
    config: OpenAIConfig,
}

impl OpenAIBackend {
    /// Create a new backend with the given configuration.
    pub fn new(config: OpenAIConfig) -> Result<Self> {
        if config.endpoint_url.trim().is_empty() {
            return Err(Error::Config("AI endpoint URL is not set".to_string()));
        }

        let mut client_builder = Client::builder();
        if config.skip_tls_verify {
            client_builder = client_builder.danger_accept_invalid_certs(true);
        }
        let client = client_builder
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        info!(
            subsystem = "inference",
            endpoint = %config.endpoint_url,
            model = %config.model,
            max_attempts = config.retry.max_attempts,
            "Initializing OpenAI-compatible backend"
        );

        Ok(Self { client, config })
    }

    /// Get the current configuration.
    pub fn config(&self) -> &OpenAIConfig {
        &self.config
    }

    fn build_body(&self, payload: &AiRequestPayload) -> ChatCompletionRequest {
        let mut messages = Vec::with_capacity(2);
        if !payload.system_prompt.is_empty() {
            messages.push(ChatMessage::system(payload.system_prompt.clone()));
        }
        messages.push(ChatMessage::user(payload.content.clone()));

        ChatCompletionRequest {
            model: payload.model.clone(),
            messages,
            temperature: self.config.temperature,
            seed: payload.seed,
            response_format: self
                .config
                .json_response_format
                .then(ResponseFormat::json_object),
        }
    }

    /// Build a request with authentication if configured.
    fn build_request(&self) -> reqwest::RequestBuilder {
        let mut req = self.client.post(&self.config.endpoint_url);

        if let Some(ref api_key) = self.config.api_key {
            if self.config.auth_header.eq_ignore_ascii_case("authorization") {
                req = req.header("Authorization", format!("Bearer {}", api_key));
            } else {
                req = req.header(self.config.auth_header.as_str(), api_key.as_str());
            }
        }

        req.header("Content-Type", "application/json")
            .header("Accept", "application/json")
    }

    /// One network round trip, bounded by `timeout`.
    async fn attempt(&self, body: &ChatCompletionRequest, timeout: Duration) -> Result<String> {
        match tokio::time::timeout(timeout, self.round_trip(body)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(format!(
                "no response within {}ms",
                timeout.as_millis()
            ))),
        }
    }

    async fn round_trip(&self, body: &ChatCompletionRequest) -> Result<String> {
        let response = self.build_request().json(body).send().await?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| Error::Transport(format!("Failed to read response body: {}", e)))?;

        if !status.is_success() {
            debug!(status = status.as_u16(), "Endpoint returned an error status");
            return Err(classify_failure(status.as_u16(), &text));
        }
        extract_analysis_text(&text, &self.config.response_text_path)
    }

    /// Run one logical analysis call and report attempts and elapsed time.
    #[instrument(skip(self, payload), fields(request_id = %payload.request_id, model = %payload.model))]
    pub async fn analyze_detailed(&self, payload: &AiRequestPayload) -> AnalysisOutcome {
        let start = Instant::now();
        let body = self.build_body(payload);
        let policy = &self.config.retry;

        debug!(
            prompt_len = payload.content.len(),
            seed = ?payload.seed,
            timeout_ms = payload.timeout.as_millis() as u64,
            "Sending analysis request"
        );

        let mut attempts = 0u32;
        let mut rate_limit_hits = 0u32;

        loop {
            attempts += 1;
            match self.attempt(&body, payload.timeout).await {
                Ok(text) => {
                    info!(
                        attempt = attempts,
                        response_len = text.len(),
                        duration_ms = start.elapsed().as_millis() as u64,
                        "Analysis request succeeded"
                    );
                    return AnalysisOutcome {
                        result: AiResult::Success {
                            analysis_text: text,
                        },
                        attempts,
                        elapsed: start.elapsed(),
                    };
                }
                Err(err) => {
                    let kind = err.kind();
                    if kind == riskbot_core::FailureKind::RateLimited {
                        rate_limit_hits += 1;
                    }

                    if !policy.should_retry(kind, attempts, rate_limit_hits) {
                        error!(
                            attempt = attempts,
                            kind = %kind,
                            error = %err,
                            duration_ms = start.elapsed().as_millis() as u64,
                            "Analysis request failed"
                        );
                        return AnalysisOutcome {
                            result: err.into(),
                            attempts,
                            elapsed: start.elapsed(),
                        };
                    }

                    let delay = policy.backoff(attempts);
                    warn!(
                        attempt = attempts,
                        kind = %kind,
                        error = %err,
                        backoff_ms = delay.as_millis() as u64,
                        "Analysis attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

#[async_trait]
impl AnalysisBackend for OpenAIBackend {
    async fn analyze(&self, payload: &AiRequestPayload) -> AiResult {
        self.analyze_detailed(payload).await.result
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

/// Pull the analysis text out of a success body.
///
/// String values are returned as-is; objects and arrays (endpoints that
/// answer with the assessment inline) are serialised back to JSON text.
pub fn extract_analysis_text(body: &str, path: &str) -> Result<String> {
    let json: Value = serde_json::from_str(body)
        .map_err(|e| Error::MalformedResponse(format!("response body is not JSON: {}", e)))?;

    let mut current = &json;
    for segment in path.split('.').filter(|s| !s.is_empty()) {
        let next = match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        };
        current = next.ok_or_else(|| {
            Error::MalformedResponse(format!("response has no field '{}'", path))
        })?;
    }

    match current {
        Value::String(s) if !s.trim().is_empty() => Ok(s.clone()),
        Value::String(_) | Value::Null => Err(Error::MalformedResponse(format!(
            "field '{}' is empty",
            path
        ))),
        Value::Object(_) | Value::Array(_) => Ok(current.to_string()),
        other => Ok(other.to_string()),
    }
}

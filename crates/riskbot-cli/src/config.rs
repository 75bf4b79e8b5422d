//! Runtime settings read from the environment.
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `AI_API_URL` | (required) | Chat-completion endpoint URL |
//! | `AI_API_KEY` | unset | API key sent with each request |
//! | `AI_AUTH_HEADER` | `Authorization` | Header carrying the key |
//! | `AI_MODEL` | `gpt-4o` | Model identifier |
//! | `AI_RESPONSE_PATH` | `choices.0.message.content` | Dotted path to the answer |
//! | `AI_MAX_ATTEMPTS` | `3` | Attempt ceiling per analysis |
//! | `AI_SKIP_TLS_VERIFY` | `false` | Accept invalid certificates |
//! | `API_TIMEOUT` | `180` | Per-attempt timeout, seconds |
//! | `PIPELINE_TIMEOUT` | `600` | Whole-run timeout, seconds |
//! | `TEMP_FILE_PATH` | `./temp_files` | Staging directory |
//! | `MAX_UPLOAD_BYTES` | `20971520` | Largest accepted upload |
//! | `EXTRACT_MAX_ROWS` | `500` | Records sent for analysis |
//! | `EXTRACT_MAX_BYTES` | `65536` | Rendered content ceiling |

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use riskbot_core::{defaults, Error, Result};
use riskbot_inference::{OpenAIConfig, RetryPolicy};
use riskbot_pipeline::{ExtractionLimits, PipelineConfig, StagingConfig};

#[derive(Debug, Clone)]
pub struct Settings {
    pub api_url: String,
    pub api_key: Option<String>,
    pub auth_header: String,
    pub model: String,
    pub response_path: String,
    pub max_attempts: u32,
    pub skip_tls_verify: bool,
    pub api_timeout: Duration,
    pub pipeline_timeout: Duration,
    pub temp_file_path: PathBuf,
    pub max_upload_bytes: usize,
    pub extract_max_rows: usize,
    pub extract_max_bytes: usize,
}

impl Settings {
    /// Read the process environment. `main` loads `.env` beforehand.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        Ok(Self {
            api_url: var("AI_API_URL").unwrap_or_default(),
            api_key: var("AI_API_KEY"),
            auth_header: var("AI_AUTH_HEADER")
                .unwrap_or_else(|| defaults::AI_AUTH_HEADER.to_string()),
            model: var("AI_MODEL").unwrap_or_else(|| defaults::AI_MODEL.to_string()),
            response_path: var("AI_RESPONSE_PATH")
                .unwrap_or_else(|| defaults::AI_RESPONSE_PATH.to_string()),
            max_attempts: parse_or(&var, "AI_MAX_ATTEMPTS", defaults::AI_MAX_ATTEMPTS)?.max(1),
            skip_tls_verify: var("AI_SKIP_TLS_VERIFY")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
            api_timeout: Duration::from_secs(parse_or(
                &var,
                "API_TIMEOUT",
                defaults::AI_TIMEOUT_SECS,
            )?),
            pipeline_timeout: Duration::from_secs(parse_or(
                &var,
                "PIPELINE_TIMEOUT",
                defaults::PIPELINE_TIMEOUT_SECS,
            )?),
            temp_file_path: var("TEMP_FILE_PATH")
                .unwrap_or_else(|| defaults::TEMP_FILE_PATH.to_string())
                .into(),
            max_upload_bytes: parse_or(&var, "MAX_UPLOAD_BYTES", defaults::MAX_UPLOAD_BYTES)?,
            extract_max_rows: parse_or(&var, "EXTRACT_MAX_ROWS", defaults::EXTRACT_MAX_ROWS)?,
            extract_max_bytes: parse_or(&var, "EXTRACT_MAX_BYTES", defaults::EXTRACT_MAX_BYTES)?,
        })
    }

    /// Check the settings needed to call the analysis endpoint.
    pub fn validate(&self) -> Result<()> {
        if self.api_url.is_empty() {
            return Err(Error::Config("AI_API_URL is not set".to_string()));
        }
        if !self.api_url.starts_with("http://") && !self.api_url.starts_with("https://") {
            return Err(Error::Config(format!(
                "AI_API_URL must be an http(s) URL, got '{}'",
                self.api_url
            )));
        }
        if self.api_timeout.is_zero() || self.pipeline_timeout.is_zero() {
            return Err(Error::Config("timeouts must be positive".to_string()));
        }
        if self.api_key.is_none() {
            tracing::warn!("AI_API_KEY is not set; requests will be sent without credentials");
        }
        Ok(())
    }

    pub fn openai_config(&self) -> OpenAIConfig {
        OpenAIConfig {
            endpoint_url: self.api_url.clone(),
            api_key: self.api_key.clone(),
            auth_header: self.auth_header.clone(),
            model: self.model.clone(),
            response_text_path: self.response_path.clone(),
            skip_tls_verify: self.skip_tls_verify,
            retry: RetryPolicy {
                max_attempts: self.max_attempts,
                ..RetryPolicy::default()
            },
            ..OpenAIConfig::default()
        }
    }

    pub fn staging_config(&self) -> StagingConfig {
        StagingConfig {
            max_upload_bytes: self.max_upload_bytes,
            ..StagingConfig::with_root(&self.temp_file_path)
        }
    }

    pub fn extraction_limits(&self) -> ExtractionLimits {
        ExtractionLimits {
            max_rows: self.extract_max_rows,
            max_content_bytes: self.extract_max_bytes,
        }
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            ai_timeout: self.api_timeout,
            overall_timeout: self.pipeline_timeout,
            ..PipelineConfig::default()
        }
    }
}

fn parse_or<T, F>(var: &F, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match var(key) {
        Some(raw) => raw
            .parse()
            .map_err(|_| Error::Config(format!("{} has an invalid value: '{}'", key, raw))),
        None => Ok(default),
    }
}

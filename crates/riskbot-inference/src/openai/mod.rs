//! OpenAI-compatible analysis backend.
//!
//! Works with any endpoint that accepts a chat-completion request body:
//! OpenAI, Azure OpenAI, OpenRouter, vLLM, LocalAI, LM Studio, or Ollama in
//! compatibility mode. The endpoint URL is used as-is, so path layouts other
//! than `/v1/chat/completions` are supported.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use riskbot_inference::openai::{OpenAIBackend, OpenAIConfig};
//! use riskbot_inference::prompt::build_payload;
//! use riskbot_core::ExtractedDocument;
//!
//! # async fn run(doc: ExtractedDocument) -> riskbot_core::Result<()> {
//! let backend = OpenAIBackend::new(OpenAIConfig {
//!     endpoint_url: "https://api.openai.com/v1/chat/completions".to_string(),
//!     api_key: Some("sk-...".to_string()),
//!     ..Default::default()
//! })?;
//!
//! let payload = build_payload(&doc, "gpt-4o", Duration::from_secs(180));
//! let outcome = backend.analyze_detailed(&payload).await;
//! println!("{:?} after {} attempts", outcome.result, outcome.attempts);
//! # Ok(())
//! # }
//! ```

mod backend;
mod error;
mod types;

pub use backend::{extract_analysis_text, AnalysisOutcome, OpenAIBackend, OpenAIConfig};
pub use error::{classify_failure, to_riskbot_error, OpenAIErrorCode};
pub use types::*;

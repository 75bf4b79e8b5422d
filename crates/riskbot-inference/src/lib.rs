//! # riskbot-inference
//!
//! AI client for the riskbot pipeline.
//!
//! This crate provides:
//! - An OpenAI-compatible chat-completion backend with per-attempt timeout,
//!   failure classification and bounded retry
//! - The retry policy (attempt ceiling and exponential backoff)
//! - Prompt framing and deterministic request seeds
//! - Tolerant parsing of the model's JSON risk assessment
//!
//! # Feature Flags
//!
//! - `mock`: Enable the scripted backend for tests in dependent crates

pub mod assessment;
pub mod openai;
pub mod prompt;
pub mod retry;

// Scripted backend for testing
#[cfg(any(test, feature = "mock"))]
pub mod mock;

// Re-export core types
pub use riskbot_core::*;

pub use assessment::{RiskAssessment, Scenario, ScoreTier};
pub use openai::{AnalysisOutcome, OpenAIBackend, OpenAIConfig};
pub use prompt::{build_payload, content_seed, RISK_ANALYST_PROMPT};
pub use retry::RetryPolicy;

//! Core traits for riskbot abstractions.
//!
//! The orchestrator depends on these traits rather than on concrete
//! clients so tests can substitute scripted backends.

use async_trait::async_trait;

use crate::models::{AiRequestPayload, AiResult};

/// Backend that turns a prompt payload into an analysis.
///
/// Implementations own their retry and timeout policy; `analyze` never
/// returns before a terminal `AiResult` is known and never panics on
/// remote failures.
#[async_trait]
pub trait AnalysisBackend: Send + Sync {
    /// Run one logical analysis call.
    async fn analyze(&self, payload: &AiRequestPayload) -> AiResult;

    /// Model identifier sent with each request.
    fn model_name(&self) -> &str;
}

//! Scripted analysis backend for deterministic testing.
//!
//! ## Usage
//!
//! ```rust
//! use riskbot_inference::mock::ScriptedBackend;
//!
//! let backend = ScriptedBackend::new()
//!     .with_success(r#"{"risk_level": "Low"}"#)
//!     .with_latency_ms(5);
//! assert_eq!(backend.call_count(), 0);
//! ```

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use riskbot_core::{AiRequestPayload, AiResult, AnalysisBackend, FailureKind};

/// Backend that replays a queue of results, then repeats a fallback.
#[derive(Clone)]
pub struct ScriptedBackend {
    script: Arc<Mutex<VecDeque<AiResult>>>,
    fallback: AiResult,
    latency: Duration,
    calls: Arc<Mutex<Vec<AiRequestPayload>>>,
}

impl Default for ScriptedBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self {
            script: Arc::new(Mutex::new(VecDeque::new())),
            fallback: AiResult::Success {
                analysis_text: "Mock analysis".to_string(),
            },
            latency: Duration::ZERO,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Queue a successful answer.
    pub fn with_success(self, text: impl Into<String>) -> Self {
        self.with_result(AiResult::Success {
            analysis_text: text.into(),
        })
    }

    /// Queue a failure.
    pub fn with_failure(self, kind: FailureKind, message: impl Into<String>) -> Self {
        self.with_result(AiResult::Failure {
            kind,
            message: message.into(),
        })
    }

    pub fn with_result(self, result: AiResult) -> Self {
        self.script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(result);
        self
    }

    /// Result returned once the queue is exhausted.
    pub fn with_fallback(mut self, result: AiResult) -> Self {
        self.fallback = result;
        self
    }

    /// Simulated latency for every call.
    pub fn with_latency_ms(mut self, latency_ms: u64) -> Self {
        self.latency = Duration::from_millis(latency_ms);
        self
    }

    /// Payloads received so far, in call order.
    pub fn calls(&self) -> Vec<AiRequestPayload> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[async_trait]
impl AnalysisBackend for ScriptedBackend {
    async fn analyze(&self, payload: &AiRequestPayload) -> AiResult {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(payload.clone());

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        self.script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone())
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

//! Per-request orchestration: stage, extract, analyse, deliver.
//!
//! A run moves strictly forward through [`PipelineStage`] or ends in
//! `Failed`. The staged file is released as soon as extraction finishes,
//! whatever its outcome, and the whole run is bounded by one wall-clock
//! deadline that covers every step including all AI attempts. A request id
//! is accepted once per pipeline; later runs with the same id fail at
//! staging without touching the store.

use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use riskbot_core::{
    defaults, AiResult, AnalysisBackend, AnalysisRequest, Error, ExtractionFailure, FailureKind,
    PipelineStage, PipelineState, Result,
};
use riskbot_inference::{build_payload, RiskAssessment};

use crate::extraction::SpreadsheetExtractor;
use crate::report::{failure_message, format_analysis, split_message};
use crate::staging::TempFileStore;
use crate::workbook::ReportAttachment;

/// Orchestrator settings.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Bound for each individual AI attempt.
    pub ai_timeout: Duration,
    /// Bound for the whole run, from staging to delivery.
    pub overall_timeout: Duration,
    /// Maximum characters per delivered message.
    pub max_message_chars: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            ai_timeout: Duration::from_secs(defaults::AI_TIMEOUT_SECS),
            overall_timeout: Duration::from_secs(defaults::PIPELINE_TIMEOUT_SECS),
            max_message_chars: defaults::MESSAGE_MAX_CHARS,
        }
    }
}

/// State machine of a single run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineTracker {
    request_id: Uuid,
    state: PipelineState,
    history: Vec<PipelineStage>,
}

impl PipelineTracker {
    pub fn new(request_id: Uuid) -> Self {
        Self {
            request_id,
            state: PipelineState::Active {
                stage: PipelineStage::Received,
            },
            history: vec![PipelineStage::Received],
        }
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    /// Stages reached so far, in order.
    pub fn history(&self) -> &[PipelineStage] {
        &self.history
    }

    /// Move to `to`, which must directly follow the current stage.
    pub fn advance(&mut self, to: PipelineStage) -> Result<()> {
        match self.state {
            PipelineState::Active { stage } if stage.next() == Some(to) => {
                self.state = PipelineState::Active { stage: to };
                self.history.push(to);
                Ok(())
            }
            _ => Err(Error::Internal(format!(
                "invalid transition from {} to {}",
                self.state, to
            ))),
        }
    }

    /// Record a failure while trying to reach the next stage.
    pub fn fail(&mut self, kind: FailureKind, detail: impl Into<String>) -> Result<()> {
        let target = match self.state {
            PipelineState::Active { stage } => stage.next(),
            PipelineState::Failed { .. } => None,
        };
        match target {
            Some(stage) => {
                self.state = PipelineState::Failed {
                    stage,
                    kind,
                    detail: detail.into(),
                };
                Ok(())
            }
            None => Err(Error::Internal(format!(
                "cannot fail a run in terminal state {}",
                self.state
            ))),
        }
    }
}

/// Final result of a run.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineOutcome {
    pub request_id: Uuid,
    pub state: PipelineState,
    pub history: Vec<PipelineStage>,
    /// Messages for the user, in send order.
    pub messages: Vec<String>,
    /// Raw model output when the run was delivered.
    pub analysis_text: Option<String>,
    pub truncated: bool,
    /// Workbook report when the model answered with a parseable assessment.
    pub report: Option<ReportAttachment>,
    pub elapsed: Duration,
}

impl PipelineOutcome {
    pub fn is_delivered(&self) -> bool {
        self.state.is_delivered()
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        self.state.failure_kind()
    }
}

struct Delivery {
    analysis_text: String,
    truncated: bool,
    messages: Vec<String>,
    report: Option<ReportAttachment>,
}

/// Request ids accepted by a pipeline, shared by all of its clones.
#[derive(Debug, Clone, Default)]
struct ClaimedRequests(Arc<Mutex<HashSet<Uuid>>>);

impl ClaimedRequests {
    /// True the first time an id is seen.
    fn claim(&self, request_id: Uuid) -> bool {
        let mut ids = self.0.lock().unwrap_or_else(|e| e.into_inner());
        ids.insert(request_id)
    }
}

struct StepFailure {
    kind: FailureKind,
    detail: String,
    extraction: Option<ExtractionFailure>,
}

impl From<Error> for StepFailure {
    fn from(err: Error) -> Self {
        let extraction = match &err {
            Error::Extraction { reason, .. } => Some(*reason),
            _ => None,
        };
        Self {
            kind: err.kind(),
            detail: err.to_string(),
            extraction,
        }
    }
}

/// Run a step unless the run deadline passes first.
async fn before_deadline<T>(
    deadline: tokio::time::Instant,
    target: PipelineStage,
    step: impl Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout_at(deadline, step).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout(format!(
            "run deadline expired before reaching {}",
            target
        ))),
    }
}

/// Drives requests through staging, extraction and analysis.
#[derive(Clone)]
pub struct Pipeline {
    store: TempFileStore,
    extractor: SpreadsheetExtractor,
    backend: Arc<dyn AnalysisBackend>,
    config: PipelineConfig,
    claimed: ClaimedRequests,
}

impl Pipeline {
    pub fn new(
        store: TempFileStore,
        extractor: SpreadsheetExtractor,
        backend: Arc<dyn AnalysisBackend>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            store,
            extractor,
            backend,
            config,
            claimed: ClaimedRequests::default(),
        }
    }

    pub fn store(&self) -> &TempFileStore {
        &self.store
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Process one request to a terminal state.
    ///
    /// Never panics on request-level failures; every failure is reported in
    /// the outcome with exactly one user message.
    #[instrument(
        skip(self, request),
        fields(
            subsystem = "pipeline",
            request_id = %request.request_id,
            filename = %request.source_filename,
            bytes = request.raw_bytes.len()
        )
    )]
    pub async fn run(&self, request: AnalysisRequest) -> PipelineOutcome {
        let start = Instant::now();
        let deadline = tokio::time::Instant::now() + self.config.overall_timeout;
        let mut tracker = PipelineTracker::new(request.request_id);

        info!("Pipeline run started");

        let (messages, analysis_text, truncated, report) =
            match self.drive(&request, &mut tracker, deadline).await {
                Ok(delivery) => {
                    info!(
                        duration_ms = start.elapsed().as_millis() as u64,
                        truncated = delivery.truncated,
                        report = delivery.report.is_some(),
                        "Pipeline run delivered"
                    );
                    (
                        delivery.messages,
                        Some(delivery.analysis_text),
                        delivery.truncated,
                        delivery.report,
                    )
                }
                Err(failure) => {
                    let message = failure_message(failure.kind, failure.extraction);
                    if let Err(e) = tracker.fail(failure.kind, failure.detail.clone()) {
                        error!(error = %e, "Failed to record pipeline failure");
                    }
                    let stage = match tracker.state() {
                        PipelineState::Failed { stage, .. } => stage.to_string(),
                        other => other.to_string(),
                    };
                    match failure.kind {
                        FailureKind::Internal | FailureKind::Storage => error!(
                            stage = %stage,
                            kind = %failure.kind,
                            error = %failure.detail,
                            duration_ms = start.elapsed().as_millis() as u64,
                            "Pipeline run failed"
                        ),
                        _ => warn!(
                            stage = %stage,
                            kind = %failure.kind,
                            error = %failure.detail,
                            duration_ms = start.elapsed().as_millis() as u64,
                            "Pipeline run failed"
                        ),
                    }
                    (vec![message.to_string()], None, false, None)
                }
            };

        PipelineOutcome {
            request_id: request.request_id,
            state: tracker.state().clone(),
            history: tracker.history().to_vec(),
            messages,
            analysis_text,
            truncated,
            report,
            elapsed: start.elapsed(),
        }
    }

    /// Spawn a run as an independent task and hand its outcome to
    /// `on_complete` before the task finishes.
    pub fn submit<F>(
        &self,
        request: AnalysisRequest,
        on_complete: F,
    ) -> JoinHandle<PipelineOutcome>
    where
        F: FnOnce(&PipelineOutcome) + Send + 'static,
    {
        let pipeline = self.clone();
        tokio::spawn(async move {
            let outcome = pipeline.run(request).await;
            on_complete(&outcome);
            outcome
        })
    }

    async fn drive(
        &self,
        request: &AnalysisRequest,
        tracker: &mut PipelineTracker,
        deadline: tokio::time::Instant,
    ) -> std::result::Result<Delivery, StepFailure> {
        let request_id = request.request_id;
        if !self.claimed.claim(request_id) {
            return Err(Error::Storage(format!(
                "request {} was already submitted",
                request_id
            ))
            .into());
        }

        // Staging
        let step = Instant::now();
        let mut staged = before_deadline(
            deadline,
            PipelineStage::Staged,
            self.store
                .stage(request_id, &request.source_filename, &request.raw_bytes),
        )
        .await?;
        tracker.advance(PipelineStage::Staged)?;
        debug!(
            stage = %PipelineStage::Staged,
            duration_ms = step.elapsed().as_millis() as u64,
            "Stage reached"
        );

        // Extraction runs on the blocking pool; the file is released
        // before the result is inspected.
        let step = Instant::now();
        let extractor = self.extractor.clone();
        let path = staged.path().to_path_buf();
        let source_name = staged.source_name().to_string();
        let extracted = before_deadline(deadline, PipelineStage::Extracted, async move {
            tokio::task::spawn_blocking(move || {
                extractor.extract_path(&path, request_id, &source_name)
            })
            .await
            .unwrap_or_else(|e| Err(Error::Internal(format!("extraction task failed: {}", e))))
        })
        .await;
        if let Err(e) = staged.release() {
            warn!(error = %e, "Staged file could not be released");
        }
        let doc = extracted?;
        tracker.advance(PipelineStage::Extracted)?;
        debug!(
            stage = %PipelineStage::Extracted,
            row_count = doc.row_count,
            total_rows = doc.total_rows,
            duration_ms = step.elapsed().as_millis() as u64,
            "Stage reached"
        );

        // Analysis
        let step = Instant::now();
        let payload = build_payload(&doc, self.backend.model_name(), self.config.ai_timeout);
        let result = match tokio::time::timeout_at(deadline, self.backend.analyze(&payload)).await
        {
            Ok(result) => result,
            Err(_) => AiResult::Failure {
                kind: FailureKind::Timeout,
                message: format!(
                    "run deadline expired before reaching {}",
                    PipelineStage::Analyzed
                ),
            },
        };
        let analysis_text = match result {
            AiResult::Success { analysis_text } => analysis_text,
            AiResult::Failure { kind, message } => {
                return Err(StepFailure {
                    kind,
                    detail: message,
                    extraction: None,
                })
            }
        };
        tracker.advance(PipelineStage::Analyzed)?;
        debug!(
            stage = %PipelineStage::Analyzed,
            response_len = analysis_text.len(),
            duration_ms = step.elapsed().as_millis() as u64,
            "Stage reached"
        );

        // Delivery
        let formatted = format_analysis(&analysis_text, doc.truncated);
        let messages = split_message(&formatted, self.config.max_message_chars);
        let report = RiskAssessment::parse(&analysis_text).and_then(|assessment| {
            match ReportAttachment::build(&doc, &assessment) {
                Ok(report) => Some(report),
                Err(e) => {
                    warn!(error = %e, "Report workbook skipped; delivering text only");
                    None
                }
            }
        });
        tracker.advance(PipelineStage::Delivered)?;

        Ok(Delivery {
            analysis_text,
            truncated: doc.truncated,
            messages,
            report,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::staging::StagingConfig;
    use riskbot_core::logging;
    use riskbot_inference::mock::ScriptedBackend;

    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_tracker_walks_every_stage() {
        let mut t = PipelineTracker::new(Uuid::nil());
        for stage in [
            PipelineStage::Staged,
            PipelineStage::Extracted,
            PipelineStage::Analyzed,
            PipelineStage::Delivered,
        ] {
            t.advance(stage).unwrap();
        }
        assert!(t.state().is_delivered());
        assert_eq!(t.history().len(), 5);
    }

    #[test]
    fn test_tracker_rejects_skips_and_backtracking() {
        let mut t = PipelineTracker::new(Uuid::nil());
        assert!(t.advance(PipelineStage::Extracted).is_err());
        t.advance(PipelineStage::Staged).unwrap();
        assert!(t.advance(PipelineStage::Received).is_err());
        assert!(t.advance(PipelineStage::Staged).is_err());
        assert_eq!(t.history(), &[PipelineStage::Received, PipelineStage::Staged]);
    }

    #[test]
    fn test_tracker_fail_targets_next_stage() {
        let mut t = PipelineTracker::new(Uuid::nil());
        t.advance(PipelineStage::Staged).unwrap();
        t.fail(FailureKind::Extraction, "corrupt").unwrap();
        assert_eq!(
            t.state(),
            &PipelineState::Failed {
                stage: PipelineStage::Extracted,
                kind: FailureKind::Extraction,
                detail: "corrupt".into(),
            }
        );
    }

    #[test]
    fn test_tracker_failed_is_absorbing() {
        let mut t = PipelineTracker::new(Uuid::nil());
        t.fail(FailureKind::Storage, "disk full").unwrap();
        assert!(t.advance(PipelineStage::Staged).is_err());
        assert!(t.fail(FailureKind::Internal, "again").is_err());
        assert_eq!(t.state().failure_kind(), Some(FailureKind::Storage));
    }

    #[test]
    fn test_tracker_delivered_cannot_fail() {
        let mut t = PipelineTracker::new(Uuid::nil());
        for stage in [
            PipelineStage::Staged,
            PipelineStage::Extracted,
            PipelineStage::Analyzed,
            PipelineStage::Delivered,
        ] {
            t.advance(stage).unwrap();
        }
        assert!(t.fail(FailureKind::Timeout, "late").is_err());
        assert!(t.state().is_delivered());
    }

    #[test]
    fn test_step_failure_keeps_extraction_reason() {
        let f = StepFailure::from(Error::extraction(ExtractionFailure::NoUsableRows, "empty"));
        assert_eq!(f.kind, FailureKind::Extraction);
        assert_eq!(f.extraction, Some(ExtractionFailure::NoUsableRows));

        let f = StepFailure::from(Error::Storage("full".into()));
        assert_eq!(f.kind, FailureKind::Storage);
        assert_eq!(f.extraction, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_before_deadline_expires() {
        let deadline = tokio::time::Instant::now() + Duration::from_millis(10);
        let result: Result<()> = before_deadline(deadline, PipelineStage::Analyzed, async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(Error::Timeout(_))));
    }

    #[test]
    fn test_claims_are_shared_by_clones() {
        let claims = ClaimedRequests::default();
        let id = Uuid::now_v7();
        assert!(claims.clone().claim(id));
        assert!(!claims.claim(id));
        assert!(claims.claim(Uuid::now_v7()));
    }

    #[tokio::test]
    async fn test_failed_run_logs_schema_field_names() {
        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .json()
            .with_writer(move || writer.clone())
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let dir = tempfile::TempDir::new().unwrap();
        let pipeline = Pipeline::new(
            TempFileStore::new(StagingConfig::with_root(dir.path())),
            SpreadsheetExtractor::default(),
            Arc::new(ScriptedBackend::new()),
            PipelineConfig::default(),
        );
        let outcome = pipeline
            .run(AnalysisRequest::new("notes.txt", b"hello".to_vec()))
            .await;
        assert_eq!(outcome.failure_kind(), Some(FailureKind::Extraction));

        let output = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
        let line = output
            .lines()
            .find(|l| l.contains("Pipeline run failed"))
            .expect("failure event should be logged");
        assert!(line.contains(&format!("\"{}\":\"extraction\"", logging::FAILURE_KIND)));
        assert!(line.contains(&format!("\"{}\":\"", logging::ERROR_MSG)));
        assert!(line.contains(&format!("\"{}\":\"extracted\"", logging::STAGE)));
        assert!(!line.contains("failure_kind"));
        assert!(!line.contains("error_msg"));
    }
}

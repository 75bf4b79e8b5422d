//! Core data models for the document-to-analysis pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

// =============================================================================
// INTAKE
// =============================================================================

/// An uploaded document waiting to be analysed.
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub request_id: Uuid,
    /// Filename as supplied by the sender. Only its extension is ever used.
    pub source_filename: String,
    pub raw_bytes: Vec<u8>,
    pub received_at: DateTime<Utc>,
}

impl AnalysisRequest {
    /// Create a request with a fresh time-ordered id.
    pub fn new(source_filename: impl Into<String>, raw_bytes: Vec<u8>) -> Self {
        Self::with_id(Uuid::now_v7(), source_filename, raw_bytes)
    }

    pub fn with_id(
        request_id: Uuid,
        source_filename: impl Into<String>,
        raw_bytes: Vec<u8>,
    ) -> Self {
        Self {
            request_id,
            source_filename: source_filename.into(),
            raw_bytes,
            received_at: Utc::now(),
        }
    }

    /// Lower-cased extension of the source filename, if any.
    pub fn extension(&self) -> Option<String> {
        file_extension(&self.source_filename)
    }
}

/// Lower-cased extension of a filename, restricted to ASCII alphanumerics.
///
/// Returns `None` when there is no extension or it contains anything else,
/// so the result is always safe to append to a generated filename.
pub fn file_extension(filename: &str) -> Option<String> {
    let base = filename.rsplit(['/', '\\']).next().unwrap_or(filename);
    let (stem, ext) = base.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() || ext.len() > 8 {
        return None;
    }
    if !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

// =============================================================================
// EXTRACTED CONTENT
// =============================================================================

/// A single spreadsheet cell value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    Empty,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl CellValue {
    pub fn is_empty(&self) -> bool {
        match self {
            CellValue::Empty => true,
            CellValue::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Empty => Ok(()),
            CellValue::Bool(b) => write!(f, "{}", b),
            CellValue::Int(i) => write!(f, "{}", i),
            // Whole floats print without a trailing ".0" so spreadsheet
            // integers stored as doubles read naturally in the prompt.
            CellValue::Float(x) if x.fract() == 0.0 && x.abs() < 1e15 => {
                write!(f, "{}", *x as i64)
            }
            CellValue::Float(x) => write!(f, "{}", x),
            CellValue::Text(s) => write!(f, "{}", s.trim()),
        }
    }
}

/// One data row: ordered column name to value pairs plus its origin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub sheet: String,
    /// 1-based row number within the sheet.
    pub row_number: usize,
    pub cells: Vec<(String, CellValue)>,
}

impl Record {
    /// Look up a cell by column name.
    pub fn get(&self, column: &str) -> Option<&CellValue> {
        self.cells
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    /// True when every cell is empty.
    pub fn is_blank(&self) -> bool {
        self.cells.iter().all(|(_, v)| v.is_empty())
    }

    /// Single-line rendering used both for the prompt and for the payload
    /// byte ceiling. Empty cells are omitted.
    pub fn render(&self) -> String {
        let pairs: Vec<String> = self
            .cells
            .iter()
            .filter(|(_, v)| !v.is_empty())
            .map(|(k, v)| format!("{}: {}", k, v))
            .collect();
        format!("[{} #{}] {}", self.sheet, self.row_number, pairs.join("; "))
    }

    /// Bytes this record contributes to the rendered content, newline included.
    pub fn rendered_len(&self) -> usize {
        self.render().len() + 1
    }
}

/// Structured content pulled out of a staged spreadsheet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedDocument {
    /// Back-reference to the owning request.
    pub request_id: Uuid,
    /// Filename the sender used, for prompt context only.
    pub source_name: String,
    /// Distinct column names holding a value in at least one kept record,
    /// in first-seen order.
    pub columns: Vec<String>,
    pub rows: Vec<Record>,
    /// Records kept (`rows.len()`).
    pub row_count: usize,
    /// Records found before any ceiling was applied.
    pub total_rows: usize,
    /// True when the payload ceiling dropped trailing records.
    pub truncated: bool,
}

impl ExtractedDocument {
    /// Newline-joined rendering of every kept record.
    pub fn render_content(&self) -> String {
        let mut out = String::with_capacity(self.rendered_len());
        for row in &self.rows {
            out.push_str(&row.render());
            out.push('\n');
        }
        out
    }

    pub fn rendered_len(&self) -> usize {
        self.rows.iter().map(Record::rendered_len).sum()
    }

    /// Context lines that precede the records in the prompt.
    pub fn render_header(&self) -> String {
        render_header(
            &self.source_name,
            &self.columns,
            self.row_count,
            self.total_rows,
            self.truncated,
        )
    }

    /// Header followed by every kept record. This is the text the content
    /// ceiling is measured against.
    pub fn render_payload(&self) -> String {
        let mut out = self.render_header();
        out.push_str(&self.render_content());
        out
    }
}

/// Prompt header for a document with the given shape, blank separator line
/// included.
pub fn render_header(
    source_name: &str,
    columns: &[String],
    row_count: usize,
    total_rows: usize,
    truncated: bool,
) -> String {
    let mut out = format!("Source file: {}\n", source_name);
    if truncated {
        out.push_str(&format!(
            "Records: {} of {} (only the earliest rows are included)\n",
            row_count, total_rows
        ));
    } else {
        out.push_str(&format!("Records: {}\n", row_count));
    }
    if !columns.is_empty() {
        out.push_str(&format!("Columns: {}\n", columns.join(", ")));
    }
    out.push('\n');
    out
}

// =============================================================================
// AI EXCHANGE
// =============================================================================

/// Everything the AI client needs for one logical analysis call.
#[derive(Debug, Clone, PartialEq)]
pub struct AiRequestPayload {
    pub request_id: Uuid,
    pub model: String,
    pub system_prompt: String,
    pub content: String,
    /// Bound for each individual attempt.
    pub timeout: Duration,
    /// Deterministic sampling seed derived from the content.
    pub seed: Option<u32>,
}

/// Terminal outcome of one logical AI call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AiResult {
    Success { analysis_text: String },
    Failure { kind: FailureKind, message: String },
}

impl AiResult {
    pub fn is_success(&self) -> bool {
        matches!(self, AiResult::Success { .. })
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            AiResult::Success { .. } => None,
            AiResult::Failure { kind, .. } => Some(*kind),
        }
    }
}

impl From<crate::Error> for AiResult {
    fn from(err: crate::Error) -> Self {
        AiResult::Failure {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

// =============================================================================
// FAILURE TAXONOMY
// =============================================================================

/// Failure category of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Storage,
    Extraction,
    Timeout,
    Unauthorized,
    RateLimited,
    ServerError,
    Transport,
    MalformedResponse,
    Internal,
}

impl FailureKind {
    /// Whether a fresh attempt can plausibly succeed.
    ///
    /// `RateLimited` is retryable but capped separately by the retry policy.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ServerError | Self::Transport | Self::RateLimited
        )
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Storage => write!(f, "storage"),
            Self::Extraction => write!(f, "extraction"),
            Self::Timeout => write!(f, "timeout"),
            Self::Unauthorized => write!(f, "unauthorized"),
            Self::RateLimited => write!(f, "rate_limited"),
            Self::ServerError => write!(f, "server_error"),
            Self::Transport => write!(f, "transport"),
            Self::MalformedResponse => write!(f, "malformed_response"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

impl std::str::FromStr for FailureKind {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "storage" => Ok(Self::Storage),
            "extraction" => Ok(Self::Extraction),
            "timeout" => Ok(Self::Timeout),
            "unauthorized" | "auth" => Ok(Self::Unauthorized),
            "rate_limited" | "ratelimited" => Ok(Self::RateLimited),
            "server_error" | "servererror" => Ok(Self::ServerError),
            "transport" => Ok(Self::Transport),
            "malformed_response" | "malformed" => Ok(Self::MalformedResponse),
            "internal" => Ok(Self::Internal),
            _ => Err(format!("Invalid failure kind: {}", s)),
        }
    }
}

/// Why a staged file produced no records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionFailure {
    /// Corrupt or unparsable file.
    Unreadable,
    /// Extension not handled by any reader.
    UnsupportedFormat,
    /// Parsed, but no sheet contained a data row.
    NoUsableRows,
}

impl fmt::Display for ExtractionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unreadable => write!(f, "unreadable"),
            Self::UnsupportedFormat => write!(f, "unsupported_format"),
            Self::NoUsableRows => write!(f, "no_usable_rows"),
        }
    }
}

// =============================================================================
// PIPELINE STATE MACHINE
// =============================================================================

/// Ordered stages of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Received,
    Staged,
    Extracted,
    Analyzed,
    Delivered,
}

impl PipelineStage {
    /// The only stage reachable from this one, if any.
    pub fn next(self) -> Option<Self> {
        match self {
            Self::Received => Some(Self::Staged),
            Self::Staged => Some(Self::Extracted),
            Self::Extracted => Some(Self::Analyzed),
            Self::Analyzed => Some(Self::Delivered),
            Self::Delivered => None,
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Received => write!(f, "received"),
            Self::Staged => write!(f, "staged"),
            Self::Extracted => write!(f, "extracted"),
            Self::Analyzed => write!(f, "analyzed"),
            Self::Delivered => write!(f, "delivered"),
        }
    }
}

/// Current state of a pipeline run.
///
/// `Failed.stage` is the stage the run was trying to reach when it failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PipelineState {
    Active {
        stage: PipelineStage,
    },
    Failed {
        stage: PipelineStage,
        kind: FailureKind,
        detail: String,
    },
}

impl PipelineState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PipelineState::Active {
                stage: PipelineStage::Delivered
            } | PipelineState::Failed { .. }
        )
    }

    pub fn is_delivered(&self) -> bool {
        matches!(
            self,
            PipelineState::Active {
                stage: PipelineStage::Delivered
            }
        )
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            PipelineState::Failed { kind, .. } => Some(*kind),
            PipelineState::Active { .. } => None,
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineState::Active { stage } => write!(f, "{}", stage),
            PipelineState::Failed { stage, kind, .. } => {
                write!(f, "failed({}, {})", stage, kind)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn record(cells: Vec<(&str, CellValue)>) -> Record {
        Record {
            sheet: "Sheet1".to_string(),
            row_number: 2,
            cells: cells
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
        }
    }

    #[test]
    fn test_file_extension_lowercases() {
        assert_eq!(file_extension("Report.XLSX"), Some("xlsx".to_string()));
    }

    #[test]
    fn test_file_extension_ignores_directories() {
        assert_eq!(
            file_extension("../../etc/passwd.csv"),
            Some("csv".to_string())
        );
        assert_eq!(file_extension("dir.d/noext"), None);
    }

    #[test]
    fn test_file_extension_rejects_odd_characters() {
        assert_eq!(file_extension("a.x/y"), None);
        assert_eq!(file_extension("a.xl sx"), None);
        assert_eq!(file_extension(".hidden"), None);
        assert_eq!(file_extension("trailing."), None);
    }

    #[test]
    fn test_cell_value_display() {
        assert_eq!(CellValue::Float(12.0).to_string(), "12");
        assert_eq!(CellValue::Float(0.25).to_string(), "0.25");
        assert_eq!(CellValue::Int(-3).to_string(), "-3");
        assert_eq!(CellValue::Text("  capex ".into()).to_string(), "capex");
        assert_eq!(CellValue::Empty.to_string(), "");
    }

    #[test]
    fn test_cell_value_whitespace_text_is_empty() {
        assert!(CellValue::Text("   ".into()).is_empty());
        assert!(!CellValue::Bool(false).is_empty());
    }

    #[test]
    fn test_record_render_skips_empty_cells() {
        let r = record(vec![
            ("name", CellValue::Text("Bridge".into())),
            ("note", CellValue::Empty),
            ("capex", CellValue::Float(1500.0)),
        ]);
        assert_eq!(r.render(), "[Sheet1 #2] name: Bridge; capex: 1500");
        assert_eq!(r.rendered_len(), r.render().len() + 1);
    }

    #[test]
    fn test_record_get() {
        let r = record(vec![("irr", CellValue::Float(0.12))]);
        assert_eq!(r.get("irr"), Some(&CellValue::Float(0.12)));
        assert_eq!(r.get("npv"), None);
    }

    #[test]
    fn test_document_rendered_len_matches_content() {
        let doc = ExtractedDocument {
            request_id: Uuid::nil(),
            source_name: "model.xlsx".into(),
            columns: vec!["a".into()],
            rows: vec![
                record(vec![("a", CellValue::Int(1))]),
                record(vec![("a", CellValue::Int(2))]),
            ],
            row_count: 2,
            total_rows: 2,
            truncated: false,
        };
        assert_eq!(doc.render_content().len(), doc.rendered_len());
        assert_eq!(doc.render_content().lines().count(), 2);
    }

    #[test]
    fn test_document_payload_starts_with_header() {
        let doc = ExtractedDocument {
            request_id: Uuid::nil(),
            source_name: "model.xlsx".into(),
            columns: vec!["a".into(), "b".into()],
            rows: vec![record(vec![("a", CellValue::Int(1))])],
            row_count: 1,
            total_rows: 9,
            truncated: true,
        };
        let header = doc.render_header();
        assert_eq!(
            header,
            "Source file: model.xlsx\n\
             Records: 1 of 9 (only the earliest rows are included)\n\
             Columns: a, b\n\n"
        );
        let payload = doc.render_payload();
        assert!(payload.starts_with(&header));
        assert_eq!(payload.len(), header.len() + doc.rendered_len());
    }

    #[test]
    fn test_failure_kind_roundtrip_display_fromstr() {
        for kind in [
            FailureKind::Storage,
            FailureKind::Extraction,
            FailureKind::Timeout,
            FailureKind::Unauthorized,
            FailureKind::RateLimited,
            FailureKind::ServerError,
            FailureKind::Transport,
            FailureKind::MalformedResponse,
            FailureKind::Internal,
        ] {
            assert_eq!(FailureKind::from_str(&kind.to_string()), Ok(kind));
        }
        assert!(FailureKind::from_str("nope").is_err());
    }

    #[test]
    fn test_failure_kind_retryable() {
        assert!(FailureKind::ServerError.is_retryable());
        assert!(FailureKind::Transport.is_retryable());
        assert!(!FailureKind::Unauthorized.is_retryable());
        assert!(!FailureKind::MalformedResponse.is_retryable());
        assert!(!FailureKind::Timeout.is_retryable());
    }

    #[test]
    fn test_failure_kind_serde_snake_case() {
        let json = serde_json::to_string(&FailureKind::MalformedResponse).unwrap();
        assert_eq!(json, "\"malformed_response\"");
    }

    #[test]
    fn test_stage_next_is_linear() {
        let mut stage = PipelineStage::Received;
        let mut seen = vec![stage];
        while let Some(next) = stage.next() {
            assert!(next > stage);
            stage = next;
            seen.push(stage);
        }
        assert_eq!(seen.len(), 5);
        assert_eq!(stage, PipelineStage::Delivered);
    }

    #[test]
    fn test_state_terminal() {
        assert!(!PipelineState::Active {
            stage: PipelineStage::Analyzed
        }
        .is_terminal());
        assert!(PipelineState::Active {
            stage: PipelineStage::Delivered
        }
        .is_terminal());
        let failed = PipelineState::Failed {
            stage: PipelineStage::Extracted,
            kind: FailureKind::Extraction,
            detail: "bad".into(),
        };
        assert!(failed.is_terminal());
        assert_eq!(failed.failure_kind(), Some(FailureKind::Extraction));
        assert_eq!(failed.to_string(), "failed(extracted, extraction)");
    }

    #[test]
    fn test_ai_result_from_error() {
        let result: AiResult = crate::Error::Unauthorized("bad key".into()).into();
        assert_eq!(result.failure_kind(), Some(FailureKind::Unauthorized));
        assert!(!result.is_success());
    }

    #[test]
    fn test_request_extension() {
        let req = AnalysisRequest::new("Q3 Model.xlsx", vec![1, 2, 3]);
        assert_eq!(req.extension().as_deref(), Some("xlsx"));
        assert_eq!(req.request_id.get_version_num(), 7);
    }
}

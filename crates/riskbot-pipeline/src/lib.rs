//! # riskbot-pipeline
//!
//! Turns an uploaded spreadsheet into a delivered risk analysis.
//!
//! This crate provides:
//! - Scoped temp-file staging with guaranteed removal
//! - Spreadsheet extraction with row and byte ceilings
//! - The per-request state machine and its orchestrator
//! - User-facing message rendering
//! - The risk analysis workbook attached to delivered runs
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use riskbot_pipeline::{
//!     Pipeline, PipelineConfig, SpreadsheetExtractor, StagingConfig, TempFileStore,
//! };
//! use riskbot_inference::{OpenAIBackend, OpenAIConfig};
//! use riskbot_core::AnalysisRequest;
//!
//! let backend = OpenAIBackend::new(OpenAIConfig {
//!     endpoint_url: "https://api.openai.com/v1/chat/completions".into(),
//!     api_key: Some(key),
//!     ..Default::default()
//! })?;
//! let pipeline = Pipeline::new(
//!     TempFileStore::new(StagingConfig::default()),
//!     SpreadsheetExtractor::default(),
//!     Arc::new(backend),
//!     PipelineConfig::default(),
//! );
//!
//! let outcome = pipeline.run(AnalysisRequest::new("model.xlsx", bytes)).await;
//! for message in &outcome.messages {
//!     println!("{}", message);
//! }
//! ```

pub mod extraction;
pub mod pipeline;
pub mod report;
pub mod staging;
pub mod workbook;

// Re-export core types
pub use riskbot_core::*;

pub use extraction::{column_letter, ExtractionLimits, SourceFormat, SpreadsheetExtractor};
pub use pipeline::{Pipeline, PipelineConfig, PipelineOutcome, PipelineTracker};
pub use report::{failure_message, format_analysis, split_message, RECEIVED_ACK};
pub use staging::{StagedFile, StagingConfig, TempFileStore};
pub use workbook::{report_filename, ReportAttachment};

//! # riskbot-core
//!
//! Core types, traits, and error definitions for the riskbot
//! document-to-analysis pipeline.
//!
//! This crate holds the data model shared by the extraction, inference and
//! orchestration crates. It performs no I/O and never reads the environment;
//! configuration is passed in through explicit structs.

pub mod defaults;
pub mod error;
pub mod logging;
pub mod models;
pub mod traits;

// Re-export commonly used types at crate root
pub use error::{Error, Result};
pub use models::*;
pub use traits::*;

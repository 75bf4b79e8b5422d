//! Centralized default constants for the riskbot pipeline.
//!
//! **This module is the single source of truth** for shared default values.
//! Config structs in the other crates build their `Default` impls from these
//! constants, and the CLI falls back to them when an environment variable is
//! unset.

// =============================================================================
// AI ENDPOINT
// =============================================================================

/// Default chat-completion model.
pub const AI_MODEL: &str = "gpt-4o";

/// Per-attempt AI request timeout in seconds.
///
/// Large spreadsheets produce long prompts and the model answers with a
/// multi-section JSON document, so this is deliberately generous.
pub const AI_TIMEOUT_SECS: u64 = 180;

/// Dotted path to the analysis text inside a chat-completion response.
pub const AI_RESPONSE_PATH: &str = "choices.0.message.content";

/// Header carrying the API key. `Authorization` values are sent as
/// `Bearer <key>`; any other header receives the raw key.
pub const AI_AUTH_HEADER: &str = "Authorization";

/// Sampling temperature sent with every analysis request.
pub const AI_TEMPERATURE: f32 = 0.2;

// =============================================================================
// RETRY POLICY
// =============================================================================

/// Total attempts for one logical AI call (first try included).
pub const AI_MAX_ATTEMPTS: u32 = 3;

/// Backoff before the second attempt, in milliseconds.
pub const AI_RETRY_BASE_DELAY_MS: u64 = 1_000;

/// Upper bound on a single backoff sleep, in milliseconds.
pub const AI_RETRY_MAX_DELAY_MS: u64 = 8_000;

/// Extra attempts granted after a 429 response.
pub const AI_RATE_LIMIT_RETRIES: u32 = 1;

// =============================================================================
// PIPELINE
// =============================================================================

/// Wall-clock ceiling for one pipeline run in seconds.
///
/// Covers staging, extraction and every AI attempt including backoff.
pub const PIPELINE_TIMEOUT_SECS: u64 = 600;

/// Maximum length of one outbound chat message (Telegram caps at 4096).
pub const MESSAGE_MAX_CHARS: usize = 4_000;

/// A split prefers the last newline when it falls within the final 20% of
/// the chunk.
pub const MESSAGE_SPLIT_MIN_RATIO: f64 = 0.8;

// =============================================================================
// STAGING
// =============================================================================

/// Default staging directory.
pub const TEMP_FILE_PATH: &str = "./temp_files";

/// Maximum accepted upload size in bytes (20 MB, the Bot API download cap).
pub const MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;

/// Age after which a leftover staged file is treated as a crash orphan.
pub const ORPHAN_GRACE_SECS: u64 = 5 * 60;

/// Suffix for in-progress writes.
pub const PARTIAL_SUFFIX: &str = "part";

// =============================================================================
// EXTRACTION
// =============================================================================

/// Maximum records forwarded to the AI endpoint.
pub const EXTRACT_MAX_ROWS: usize = 500;

/// Maximum rendered content size in bytes forwarded to the AI endpoint.
pub const EXTRACT_MAX_BYTES: usize = 64 * 1024;

/// Spreadsheet extensions handled by the workbook reader. Only Office Open
/// XML workbooks are accepted since their cells can be streamed.
pub const WORKBOOK_EXTENSIONS: &[&str] = &["xlsx", "xlsm"];

/// Delimited text extensions.
pub const DELIMITED_EXTENSIONS: &[&str] = &["csv"];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_timeout_covers_one_attempt() {
        assert!(PIPELINE_TIMEOUT_SECS > AI_TIMEOUT_SECS);
    }

    #[test]
    fn test_backoff_bounds_ordered() {
        assert!(AI_RETRY_BASE_DELAY_MS <= AI_RETRY_MAX_DELAY_MS);
    }

    #[test]
    fn test_message_limit_below_telegram_cap() {
        assert!(MESSAGE_MAX_CHARS < 4096);
    }
}

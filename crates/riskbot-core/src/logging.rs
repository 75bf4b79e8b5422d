//! Structured logging schema and field name constants for riskbot.
//!
//! All crates log with `tracing` using these field names so a single
//! request can be followed from intake to delivery in the aggregated logs.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Request reached `Failed`, or a startup task could not run |
//! | WARN  | Retryable AI failure, truncated payload, leftover file removed |
//! | INFO  | Stage transitions, AI call completions, startup and shutdown |
//! | DEBUG | Decision points, config choices, per-attempt detail |
//! | TRACE | Per-row and per-sheet iteration |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Correlation ID of one inbound document, carried through every stage.
/// Format: UUIDv7 (time-ordered).
pub const REQUEST_ID: &str = "request_id";

/// Subsystem originating the log event.
/// Values: "staging", "extraction", "inference", "pipeline", "cli"
pub const SUBSYSTEM: &str = "subsystem";

// ─── Pipeline fields ───────────────────────────────────────────────────────

/// Pipeline stage being entered or that failed.
pub const STAGE: &str = "stage";

/// Failure category (`FailureKind` in snake_case).
pub const FAILURE_KIND: &str = "kind";

/// Original upload filename. Logged, never used as a path.
pub const FILENAME: &str = "filename";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Byte size of an upload or rendered payload.
pub const BYTES: &str = "bytes";

/// Number of records kept after truncation.
pub const ROW_COUNT: &str = "row_count";

/// Number of records seen before truncation.
pub const TOTAL_ROWS: &str = "total_rows";

/// Whether the payload ceiling dropped rows.
pub const TRUNCATED: &str = "truncated";

/// Number of entries removed by an orphan sweep.
pub const REMOVED_COUNT: &str = "removed";

/// Staged file or directory a filesystem event refers to.
pub const PATH: &str = "path";

// ─── Inference fields ──────────────────────────────────────────────────────

/// Model name used for inference.
pub const MODEL: &str = "model";

/// 1-based attempt number within one logical AI call.
pub const ATTEMPT: &str = "attempt";

/// HTTP status returned by the AI endpoint.
pub const STATUS: &str = "status";

/// Backoff before the next attempt, in milliseconds.
pub const BACKOFF_MS: &str = "backoff_ms";

/// Byte length of a prompt.
pub const PROMPT_LEN: &str = "prompt_len";

/// Byte length of a model response.
pub const RESPONSE_LEN: &str = "response_len";

// ─── Outcome fields ────────────────────────────────────────────────────────

/// Error message when an operation fails.
pub const ERROR_MSG: &str = "error";

//! User-facing message texts.
//!
//! Every failure maps to exactly one fixed message. Internal error strings
//! never reach the user; operators see them through tracing.

use riskbot_core::{defaults, ExtractionFailure, FailureKind};
use riskbot_inference::RiskAssessment;

/// Acknowledgement sent as soon as a file arrives.
pub const RECEIVED_ACK: &str = "File received. Starting processing...";

/// Note appended when trailing rows were dropped to fit the payload ceiling.
pub const TRUNCATION_NOTE: &str =
    "Note: the file was too large, so only its earliest rows were analysed.";

/// Fixed message for a failed run.
pub fn failure_message(kind: FailureKind, extraction: Option<ExtractionFailure>) -> &'static str {
    match kind {
        FailureKind::Extraction => match extraction {
            Some(ExtractionFailure::UnsupportedFormat) => {
                "Error: only spreadsheet files are supported (.xlsx, .xlsm, .csv)."
            }
            Some(ExtractionFailure::NoUsableRows) => {
                "Error: the file contains no data rows to analyse."
            }
            Some(ExtractionFailure::Unreadable) | None => {
                "Error: could not read the file. Make sure it is not damaged."
            }
        },
        FailureKind::Storage => {
            "Error: could not save the file for processing. Please try again later."
        }
        FailureKind::Timeout => "Processing error: the request timed out.",
        FailureKind::Unauthorized
        | FailureKind::RateLimited
        | FailureKind::ServerError
        | FailureKind::Transport => "API error: the analysis service is temporarily unavailable.",
        FailureKind::MalformedResponse => {
            "API error: the analysis service returned an unexpected response."
        }
        FailureKind::Internal => "Processing error: an unexpected error occurred.",
    }
}

/// Render the delivered analysis.
///
/// A parseable assessment becomes a summary; anything else is passed through
/// as the model wrote it.
pub fn format_analysis(analysis_text: &str, truncated: bool) -> String {
    let mut out = match RiskAssessment::parse(analysis_text) {
        Some(assessment) => format_assessment(&assessment),
        None => analysis_text.trim().to_string(),
    };
    if truncated {
        out.push_str("\n\n");
        out.push_str(TRUNCATION_NOTE);
    }
    out
}

fn format_assessment(a: &RiskAssessment) -> String {
    let mut out = String::from("Risk analysis\n\n");
    out.push_str(&format!("Risk level: {}\n", a.risk_level.trim()));
    if let (Some(score), Some(tier)) = (a.business_score, a.score_tier()) {
        out.push_str(&format!(
            "Business score: {} {:.0}/100 ({})\n{}\n",
            tier.marker(),
            score,
            tier.label(),
            tier.explanation()
        ));
    }
    if !a.reason.trim().is_empty() {
        out.push_str(&format!("\nRationale: {}\n", a.reason.trim()));
    }
    push_list(&mut out, "Critical factors", &a.critical_factors);
    if !a.scenarios.is_empty() {
        out.push_str("\nScenarios:\n");
        for s in &a.scenarios {
            let mut line = format!("- {}", s.name.trim());
            if !s.probability.trim().is_empty() {
                line.push_str(&format!(" (probability: {})", s.probability.trim()));
            }
            if !s.description.trim().is_empty() {
                line.push_str(&format!(": {}", s.description.trim()));
            }
            out.push_str(&line);
            out.push('\n');
        }
    }
    if let Some(losses) = a.total_potential_losses {
        out.push_str(&format!("\nTotal potential losses: {:.2}\n", losses));
    }
    push_list(&mut out, "Risk mitigation", &a.risk_mitigation);
    if !a.business_vision.trim().is_empty() {
        out.push_str(&format!("\nBusiness vision: {}\n", a.business_vision.trim()));
    }
    if let Some(payback) = a.estimated_payback {
        out.push_str(&format!("Estimated payback: {:.1} years\n", payback));
    }
    out.trim_end().to_string()
}

fn push_list(out: &mut String, title: &str, items: &[String]) {
    let items: Vec<&str> = items
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .collect();
    if items.is_empty() {
        return;
    }
    out.push_str(&format!("\n{}:\n", title));
    for item in items {
        out.push_str(&format!("- {}\n", item));
    }
}

/// Split text into chunks of at most `max_chars` characters.
///
/// A chunk ends at the last newline when that newline falls in the final
/// fifth of the chunk; otherwise it is cut at the limit. Whitespace-only
/// chunks are dropped.
pub fn split_message(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let chars: Vec<char> = text.chars().collect();
    let min_break = (max_chars as f64 * defaults::MESSAGE_SPLIT_MIN_RATIO) as usize;

    let mut chunks = Vec::new();
    let mut start = 0;
    while start < chars.len() {
        let mut end = (start + max_chars).min(chars.len());
        if end < chars.len() {
            if let Some(pos) = chars[start..end].iter().rposition(|&c| c == '\n') {
                if pos >= min_break {
                    end = start + pos + 1;
                }
            }
        }
        let chunk: String = chars[start..end].iter().collect();
        let chunk = chunk.trim_end_matches('\n');
        if !chunk.trim().is_empty() {
            chunks.push(chunk.to_string());
        }
        start = end;
    }
    chunks
}

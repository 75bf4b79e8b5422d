//! Prompt framing and payload construction for spreadsheet risk analysis.

use sha2::{Digest, Sha256};
use std::time::Duration;

use riskbot_core::{AiRequestPayload, ExtractedDocument};

/// System framing sent ahead of every spreadsheet.
pub const RISK_ANALYST_PROMPT: &str = r#"You are an expert in risk analysis of infrastructure investment projects.
You receive rows extracted from a project's financial model spreadsheet. Assess the project's overall risk level, taking into account:
1. Financial sustainability (NPV, IRR, payback period)
2. Debt load and cost of borrowed capital
3. Schedule risk (construction duration)
4. Specifics of the project type

Analyse these contingencies and their impact on the project: construction budget overrun of 20-50%, construction delay of 1-3 years, discount rate increase of 2-5 points, revenue or tariff decline of 15-30%, operating cost growth, force majeure.
For each contingency estimate the NPV impact, the IRR impact, the probability (Low/Medium/High) and the potential losses.

Also provide a forward-looking business vision of 7-10 sentences, an estimated payback period in years, and an overall business score from 0 to 100.

Return ONLY a valid JSON object with no text before or after it, in exactly this shape:
{
  "risk_level": "Low" | "Medium" | "High" | "Critical",
  "reason": "2-4 sentence justification",
  "critical_factors": ["factor", ...],
  "scenarios": [
    {
      "name": "scenario name",
      "description": "what happens",
      "npv_impact": number,
      "irr_impact": number,
      "probability": "Low" | "Medium" | "High",
      "potential_losses": number
    }
  ],
  "total_potential_losses": number,
  "risk_mitigation": ["recommendation", ...],
  "business_vision": "7-10 sentences",
  "estimated_payback": number,
  "business_score": number
}"#;

/// Deterministic sampling seed for a piece of content.
///
/// Identical spreadsheets yield identical seeds so repeated uploads get
/// stable answers from endpoints that honour `seed`. The value fits in a
/// positive 32-bit signed integer.
pub fn content_seed(content: &str) -> u32 {
    let digest = Sha256::digest(content.as_bytes());
    let head = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
    head >> 1
}

/// User message for an extracted document: a short header followed by one
/// rendered line per record.
pub fn render_user_content(doc: &ExtractedDocument) -> String {
    doc.render_payload()
}

/// Build the request payload for one analysis call.
pub fn build_payload(
    doc: &ExtractedDocument,
    model: &str,
    timeout: Duration,
) -> AiRequestPayload {
    let content = render_user_content(doc);
    let seed = content_seed(&content);
    AiRequestPayload {
        request_id: doc.request_id,
        model: model.to_string(),
        system_prompt: RISK_ANALYST_PROMPT.to_string(),
        content,
        timeout,
        seed: Some(seed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use riskbot_core::{CellValue, Record};
    use uuid::Uuid;

    fn doc(truncated: bool) -> ExtractedDocument {
        let rows = vec![Record {
            sheet: "Model".into(),
            row_number: 2,
            cells: vec![
                ("capex".into(), CellValue::Float(1200.0)),
                ("irr".into(), CellValue::Float(0.14)),
            ],
        }];
        ExtractedDocument {
            request_id: Uuid::nil(),
            source_name: "project.xlsx".into(),
            columns: vec!["capex".into(), "irr".into()],
            row_count: rows.len(),
            total_rows: if truncated { 40 } else { 1 },
            rows,
            truncated,
        }
    }

    #[test]
    fn test_seed_is_deterministic_and_31_bit() {
        let a = content_seed("rows");
        assert_eq!(a, content_seed("rows"));
        assert_ne!(a, content_seed("other rows"));
        assert!(a <= i32::MAX as u32);
    }

    #[test]
    fn test_user_content_lists_rows_and_columns() {
        let content = render_user_content(&doc(false));
        assert!(content.starts_with("Source file: project.xlsx\n"));
        assert!(content.contains("Records: 1\n"));
        assert!(content.contains("Columns: capex, irr\n"));
        assert!(content.ends_with("[Model #2] capex: 1200; irr: 0.14\n"));
    }

    #[test]
    fn test_user_content_flags_truncation() {
        let content = render_user_content(&doc(true));
        assert!(content.contains("Records: 1 of 40 (only the earliest rows are included)"));
    }

    #[test]
    fn test_build_payload() {
        let d = doc(false);
        let payload = build_payload(&d, "gpt-4o", Duration::from_secs(30));
        assert_eq!(payload.model, "gpt-4o");
        assert_eq!(payload.system_prompt, RISK_ANALYST_PROMPT);
        assert_eq!(payload.timeout, Duration::from_secs(30));
        assert_eq!(payload.seed, Some(content_seed(&payload.content)));
        assert_eq!(payload.request_id, d.request_id);
    }
}

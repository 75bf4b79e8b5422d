//! Structured view of the model's risk assessment.
//!
//! The model is asked for a JSON object, but endpoints do not always honour
//! JSON mode. Parsing is therefore tolerant: code fences and surrounding
//! prose are stripped, numbers may arrive as strings, and every field except
//! `risk_level` is optional. Anything that still does not parse is delivered
//! to the user as plain text by the caller.

use serde::{Deserialize, Deserializer, Serialize};

/// One contingency scenario.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub npv_impact: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub irr_impact: Option<f64>,
    #[serde(default)]
    pub probability: String,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub potential_losses: Option<f64>,
}

/// Risk assessment returned by the model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub risk_level: String,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub critical_factors: Vec<String>,
    #[serde(default)]
    pub scenarios: Vec<Scenario>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub total_potential_losses: Option<f64>,
    #[serde(default)]
    pub risk_mitigation: Vec<String>,
    #[serde(default)]
    pub business_vision: String,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub estimated_payback: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub business_score: Option<f64>,
}

impl RiskAssessment {
    /// Parse model output into an assessment.
    ///
    /// Returns `None` when no JSON object with a non-empty `risk_level` can
    /// be found.
    pub fn parse(text: &str) -> Option<Self> {
        let json = json_object_slice(text)?;
        let parsed: RiskAssessment = serde_json::from_str(json).ok()?;
        if parsed.risk_level.trim().is_empty() {
            return None;
        }
        Some(parsed)
    }

    pub fn score_tier(&self) -> Option<ScoreTier> {
        self.business_score.map(ScoreTier::from_score)
    }
}

/// Outermost `{ ... }` span of a text, ignoring fences and prose around it.
fn json_object_slice(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

fn lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().replace(',', ".").parse().ok(),
        _ => None,
    })
}

/// Business score band with its user-facing wording.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreTier {
    Excellent,
    Good,
    Satisfactory,
    NeedsAttention,
}

impl ScoreTier {
    pub fn from_score(score: f64) -> Self {
        if score >= 80.0 {
            Self::Excellent
        } else if score >= 60.0 {
            Self::Good
        } else if score >= 40.0 {
            Self::Satisfactory
        } else {
            Self::NeedsAttention
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Excellent => "Excellent",
            Self::Good => "Good",
            Self::Satisfactory => "Satisfactory",
            Self::NeedsAttention => "Needs attention",
        }
    }

    pub fn marker(&self) -> &'static str {
        match self {
            Self::Excellent => "🟢",
            Self::Good => "🟡",
            Self::Satisfactory => "🟠",
            Self::NeedsAttention => "🔴",
        }
    }

    pub fn explanation(&self) -> &'static str {
        match self {
            Self::Excellent => "The project shows high investment appeal with strong financials and low risk.",
            Self::Good => "The project has good prospects but its key risks need close monitoring.",
            Self::Satisfactory => "The project has moderate appeal and needs additional risk mitigation.",
            Self::NeedsAttention => "The project carries high risk and its financial model needs serious rework.",
        }
    }
}

use std::collections::BTreeMap;

use garde::Validate;
use serde::{Deserialize, Deserializer, Serialize};
use strum::{Display, EnumString};

/// Structured payload written by the analysis backend.
///
/// Every field is independently optional; a job can finish with any subset
/// of them populated.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,

    /// May arrive as a JSON array or as a JSON-encoded string of one.
    #[serde(
        default,
        deserialize_with = "deserialize_insights",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub clinical_insights: Vec<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub soap_note: Option<SoapNote>,

    /// OASIS item id -> score payload.
    #[serde(
        default,
        deserialize_with = "deserialize_scores",
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub oasis_scores: BTreeMap<String, serde_json::Value>,
}

impl AnalysisResult {
    /// True when at least one field carries real content: non-blank summary,
    /// non-empty insights, a SOAP note with a non-blank section, or any OASIS score.
    pub fn has_usable_content(&self) -> bool {
        self.summary.as_deref().is_some_and(|s| !s.trim().is_empty())
            || !self.clinical_insights.is_empty()
            || self.soap_note.as_ref().is_some_and(SoapNote::has_content)
            || !self.oasis_scores.is_empty()
    }

    /// Looser than [`has_usable_content`](Self::has_usable_content): any
    /// non-empty field, whitespace-only text included.
    pub fn has_any_field(&self) -> bool {
        self.summary.as_deref().is_some_and(|s| !s.is_empty())
            || !self.clinical_insights.is_empty()
            || self.soap_note.as_ref().is_some_and(|n| !n.is_empty())
            || !self.oasis_scores.is_empty()
    }

    /// Free-text fields that can carry backend status messages.
    pub fn text_fields(&self) -> impl Iterator<Item = &str> {
        let summary = self.summary.as_deref();
        let sections = self
            .soap_note
            .iter()
            .flat_map(|note| note.sections().map(|(_, text)| text));
        let insights = self.clinical_insights.iter().filter_map(|v| v.as_str());
        summary.into_iter().chain(sections).chain(insights)
    }
}

/// SOAP note split into its four sections.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SoapNote {
    #[serde(
        default,
        deserialize_with = "deserialize_section",
        skip_serializing_if = "Option::is_none"
    )]
    pub subjective: Option<String>,
    #[serde(
        default,
        deserialize_with = "deserialize_section",
        skip_serializing_if = "Option::is_none"
    )]
    pub objective: Option<String>,
    #[serde(
        default,
        deserialize_with = "deserialize_section",
        skip_serializing_if = "Option::is_none"
    )]
    pub assessment: Option<String>,
    #[serde(
        default,
        deserialize_with = "deserialize_section",
        skip_serializing_if = "Option::is_none"
    )]
    pub plan: Option<String>,
}

impl SoapNote {
    /// Present sections in S-O-A-P order.
    pub fn sections(&self) -> impl Iterator<Item = (&'static str, &str)> {
        [
            ("subjective", self.subjective.as_deref()),
            ("objective", self.objective.as_deref()),
            ("assessment", self.assessment.as_deref()),
            ("plan", self.plan.as_deref()),
        ]
        .into_iter()
        .filter_map(|(name, text)| text.map(|t| (name, t)))
    }

    /// No section with any text, whitespace included.
    pub fn is_empty(&self) -> bool {
        self.sections().all(|(_, text)| text.is_empty())
    }

    pub fn has_content(&self) -> bool {
        self.sections().any(|(_, text)| !text.trim().is_empty())
    }
}

/// Decodes `clinicalInsights`. A malformed value becomes an empty list so one
/// bad field never blocks completion detection on the others.
fn deserialize_insights<'de, D>(deserializer: D) -> Result<Vec<serde_json::Value>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Array(items)) => items,
        Some(serde_json::Value::String(encoded)) => decode_insights(&encoded),
        Some(other) => {
            tracing::debug!(kind = json_kind(&other), "Ignoring clinicalInsights of unexpected type");
            Vec::new()
        }
        None => Vec::new(),
    })
}

/// Decodes `oasisScores`. `null` or a non-object becomes an empty map.
fn deserialize_scores<'de, D>(
    deserializer: D,
) -> Result<BTreeMap<String, serde_json::Value>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Object(scores)) => scores.into_iter().collect(),
        Some(other) => {
            tracing::debug!(kind = json_kind(&other), "Ignoring oasisScores of unexpected type");
            BTreeMap::new()
        }
        None => BTreeMap::new(),
    })
}

/// Decodes one SOAP section. Strings pass through, scalars are stringified,
/// arrays of strings are joined by newlines; anything else is dropped.
fn deserialize_section<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(serde_json::Value::Null) => None,
        Some(serde_json::Value::String(text)) => Some(text),
        Some(serde_json::Value::Bool(b)) => Some(b.to_string()),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        Some(serde_json::Value::Array(items)) => {
            let lines: Option<Vec<&str>> = items.iter().map(|v| v.as_str()).collect();
            match lines {
                Some(lines) => Some(lines.join("\n")),
                None => {
                    tracing::debug!("Ignoring SOAP section with non-text entries");
                    None
                }
            }
        }
        Some(other) => {
            tracing::debug!(kind = json_kind(&other), "Ignoring SOAP section of unexpected type");
            None
        }
    })
}

fn decode_insights(encoded: &str) -> Vec<serde_json::Value> {
    if encoded.trim().is_empty() {
        return Vec::new();
    }
    match serde_json::from_str::<Vec<serde_json::Value>>(encoded) {
        Ok(items) => items,
        Err(e) => {
            tracing::debug!(error = %e, "Failed to decode clinicalInsights string, treating as empty");
            Vec::new()
        }
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

/// Supplementary analysis variants served by `POST /custom/{jobId}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum CustomAnalysisKind {
    Soap,
    Oasis,
}

/// Request body for `POST /custom/{jobId}`.
#[derive(Debug, Clone, PartialEq, Serialize, Validate)]
pub struct CustomAnalysisRequest {
    #[serde(rename = "type")]
    #[garde(skip)]
    pub kind: CustomAnalysisKind,

    /// OASIS item ids to score. Empty means "all".
    #[serde(skip_serializing_if = "Vec::is_empty")]
    #[garde(length(max = 50), inner(length(min = 1, max = 64)))]
    pub items: Vec<String>,
}

impl CustomAnalysisRequest {
    pub fn soap() -> Self {
        Self {
            kind: CustomAnalysisKind::Soap,
            items: Vec::new(),
        }
    }

    pub fn oasis<I, T>(items: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self {
            kind: CustomAnalysisKind::Oasis,
            items: items.into_iter().map(Into::into).collect(),
        }
    }
}

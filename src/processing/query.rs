//! Query structuring: free-text claim description to [`StructuredQuery`].

use super::json::parse_json_object;
use super::types::{PipelineError, PipelineStage, StructuredQuery};
use crate::llm::LanguageModel;
use serde::Deserialize;

const EXTRACTION_INSTRUCTION: &str = "You extract facts from insurance claim queries. \
Respond with a single JSON object with exactly these keys: \
\"age\" (integer years or null), \"gender\" (string or null), \"procedure\" (string or null), \
\"location\" (string or null), \"policyDurationMonths\" (number of months or null). \
Use null for anything the query does not state. Do not guess. Do not add other keys.";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
struct ExtractionPayload {
    #[serde(default)]
    age: Option<u32>,
    #[serde(default)]
    gender: Option<String>,
    #[serde(default)]
    procedure: Option<String>,
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    policy_duration_months: Option<f64>,
}

/// Build the extraction prompt for `raw_query`.
pub(crate) fn build_extraction_prompt(raw_query: &str) -> String {
    format!("{EXTRACTION_INSTRUCTION}\n\nQuery: \"{}\"\n\nJSON:", raw_query.trim())
}

/// Extract a [`StructuredQuery`] from free text with one language-model call.
pub async fn extract_query(
    model: &dyn LanguageModel,
    raw_query: &str,
) -> Result<StructuredQuery, PipelineError> {
    if raw_query.trim().is_empty() {
        return Err(PipelineError::InvalidQuery);
    }

    let prompt = build_extraction_prompt(raw_query);
    let raw = model
        .complete(&prompt)
        .await
        .map_err(|error| PipelineError::from_language_model(PipelineStage::Structuring, error))?;

    let query = parse_extraction(&raw)?;
    tracing::debug!(query = ?query, "Structured query extracted");
    Ok(query)
}

/// Validate and convert the model's extraction output.
pub(crate) fn parse_extraction(raw: &str) -> Result<StructuredQuery, PipelineError> {
    let malformed = |reason: String| PipelineError::MalformedExtraction {
        raw: raw.to_string(),
        reason,
    };

    let object = parse_json_object(raw).map_err(malformed)?;
    let payload: ExtractionPayload = serde_json::from_value(serde_json::Value::Object(object))
        .map_err(|error| malformed(error.to_string()))?;

    if let Some(months) = payload.policy_duration_months {
        if !months.is_finite() || months < 0.0 {
            return Err(malformed(format!(
                "policyDurationMonths must be a non-negative number, got {months}"
            )));
        }
    }

    Ok(StructuredQuery {
        age: payload.age,
        gender: clean(payload.gender),
        procedure: clean(payload.procedure),
        location: clean(payload.location),
        policy_duration_months: payload.policy_duration_months,
    })
}

fn clean(value: Option<String>) -> Option<String> {
    value.and_then(|input| {
        let trimmed = input.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("null") {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

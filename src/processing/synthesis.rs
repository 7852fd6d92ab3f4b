//! Grounded decision synthesis.
//!
//! The prompt enumerates the grounding set verbatim and the model must answer with a fixed JSON
//! shape. Citations in the answer are mapped back onto the supplied clauses; anything that
//! cannot be traced to a clause is discarded.

use super::json::parse_json_object;
use super::types::{
    Decision, DecisionOutcome, PipelineError, PipelineStage, RetrievedClause, StructuredQuery,
};
use crate::llm::LanguageModel;
use serde::Deserialize;
use std::collections::HashSet;
use std::fmt::Write as _;
use unicode_segmentation::UnicodeSegmentation;

const REQUIRED_KEYS: [&str; 4] = ["decision", "amount", "justification", "clauses"];

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct DecisionPayload {
    decision: String,
    amount: Option<f64>,
    justification: String,
    clauses: Vec<String>,
}

/// Build the grounding prompt for `query` and `clauses`.
pub(crate) fn build_decision_prompt(
    query: &StructuredQuery,
    clauses: &[RetrievedClause],
) -> String {
    let mut prompt = String::from(
        "You are a policy decision engine. Decide the claim using ONLY the policy clauses below. \
         Do not rely on outside knowledge. If the clauses do not settle the claim, answer \
         \"insufficient_information\".\n\nPOLICY CLAUSES:\n",
    );
    for (position, clause) in clauses.iter().enumerate() {
        let _ = writeln!(
            prompt,
            "Clause {} (source: {}, chunk {}):\n{}\n",
            position + 1,
            clause.chunk.source_name,
            clause.chunk.chunk_index,
            clause.chunk.text.trim()
        );
    }

    let _ = write!(
        prompt,
        "CASE:\nAge: {}\nGender: {}\nProcedure: {}\nLocation: {}\nPolicy Duration (months): {}\n\n",
        display(query.age),
        display(query.gender.as_deref()),
        display(query.procedure.as_deref()),
        display(query.location.as_deref()),
        display(query.policy_duration_months),
    );

    prompt.push_str(
        "Respond with a single JSON object with exactly these keys:\n\
         \"decision\": one of \"approved\", \"denied\", \"insufficient_information\";\n\
         \"amount\": payable amount as a number, or null when the clauses state none;\n\
         \"justification\": short explanation referring to clause numbers;\n\
         \"clauses\": array of the exact clause text (or \"Clause N\") supporting the decision.\n",
    );
    prompt
}

fn display<T: ToString>(value: Option<T>) -> String {
    value.map_or_else(|| "unknown".to_string(), |inner| inner.to_string())
}

/// Produce a decision grounded in `clauses`.
///
/// With no clauses the model is not consulted and the outcome is
/// [`DecisionOutcome::InsufficientInformation`].
pub async fn synthesize(
    model: &dyn LanguageModel,
    query: &StructuredQuery,
    clauses: &[RetrievedClause],
) -> Result<Decision, PipelineError> {
    if clauses.is_empty() {
        tracing::debug!("Empty grounding set; skipping language model");
        return Ok(Decision::insufficient_information());
    }

    let prompt = build_decision_prompt(query, clauses);
    let raw = model
        .complete(&prompt)
        .await
        .map_err(|error| PipelineError::from_language_model(PipelineStage::Synthesizing, error))?;

    let decision = parse_decision(&raw, clauses)?;
    tracing::debug!(
        decision = ?decision.decision,
        amount = ?decision.amount,
        citations = decision.clauses.len(),
        "Decision synthesized"
    );
    Ok(decision)
}

/// Validate the model's decision output and ground its citations.
pub(crate) fn parse_decision(
    raw: &str,
    clauses: &[RetrievedClause],
) -> Result<Decision, PipelineError> {
    let malformed = |reason: String| PipelineError::MalformedDecision {
        raw: raw.to_string(),
        reason,
    };

    let object = parse_json_object(raw).map_err(malformed)?;
    if let Some(missing) = REQUIRED_KEYS.iter().find(|key| !object.contains_key(**key)) {
        return Err(malformed(format!("missing required field `{missing}`")));
    }
    let payload: DecisionPayload = serde_json::from_value(serde_json::Value::Object(object))
        .map_err(|error| malformed(error.to_string()))?;

    let decision = DecisionOutcome::from_label(&payload.decision)
        .ok_or_else(|| malformed(format!("unknown decision `{}`", payload.decision)))?;
    if let Some(amount) = payload.amount {
        if !amount.is_finite() || amount < 0.0 {
            return Err(malformed(format!("amount must be non-negative, got {amount}")));
        }
    }

    Ok(Decision {
        decision,
        amount: payload.amount,
        justification: payload.justification.trim().to_string(),
        clauses: ground_citations(&payload.clauses, clauses),
    })
}

/// Fewest whole words a quoted citation must share with a clause, unless it quotes all of it.
const MIN_QUOTED_WORDS: usize = 3;

/// A word of clause or citation text with its byte span in the original string.
struct Word {
    key: String,
    start: usize,
    end: usize,
}

fn words(text: &str) -> Vec<Word> {
    text.unicode_word_indices()
        .map(|(start, word)| Word {
            key: word.to_lowercase(),
            start,
            end: start + word.len(),
        })
        .collect()
}

fn find_run(haystack: &[Word], needle: &[Word]) -> Option<usize> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window.iter().zip(needle).all(|(a, b)| a.key == b.key))
}

/// Map cited strings onto supplied clause text, dropping citations with no source.
///
/// Every returned string is a slice of a clause's original text.
fn ground_citations(citations: &[String], clauses: &[RetrievedClause]) -> Vec<String> {
    let clause_words: Vec<Vec<Word>> = clauses
        .iter()
        .map(|clause| words(&clause.chunk.text))
        .collect();
    let mut seen = HashSet::new();
    let mut grounded = Vec::new();

    for citation in citations {
        let resolved = resolve_citation(citation, clauses, &clause_words);
        match resolved {
            Some(text) => {
                if seen.insert(normalize(&text)) {
                    grounded.push(text);
                }
            }
            None => {
                tracing::warn!(
                    citation = %citation,
                    "Dropping citation not found in grounding set"
                );
            }
        }
    }
    grounded
}

fn resolve_citation(
    citation: &str,
    clauses: &[RetrievedClause],
    clause_words: &[Vec<Word>],
) -> Option<String> {
    if let Some(position) = clause_reference(citation) {
        return clauses
            .get(position.checked_sub(1)?)
            .map(|clause| clause.chunk.text.trim().to_string());
    }

    let cited = words(citation);
    if cited.is_empty() {
        return None;
    }

    // Quoted excerpt: return the matching span of the clause itself.
    for (clause, haystack) in clauses.iter().zip(clause_words) {
        if cited.len() < MIN_QUOTED_WORDS.min(haystack.len()) {
            continue;
        }
        if let Some(first) = find_run(haystack, &cited) {
            let text = clause.chunk.text.as_str();
            let start = haystack[first].start;
            let last_end = haystack[first + cited.len() - 1].end;
            // Keep punctuation that closes the last word, such as a full stop.
            let end = text[last_end..]
                .char_indices()
                .find(|(_, c)| c.is_whitespace() || c.is_alphanumeric())
                .map_or(text.len(), |(offset, _)| last_end + offset);
            return Some(text[start..end].to_string());
        }
    }

    // Citation wrapping a whole clause in extra prose.
    clauses
        .iter()
        .zip(clause_words)
        .find(|(_, haystack)| find_run(&cited, haystack).is_some())
        .map(|(clause, _)| clause.chunk.text.trim().to_string())
}

/// Parse references such as `3`, `Clause 3`, `[3]`, or `#3`.
fn clause_reference(citation: &str) -> Option<usize> {
    let trimmed = citation.trim();
    let lower = trimmed.to_lowercase();
    let stripped = lower.strip_prefix("clause").unwrap_or(&lower);
    let digits = stripped
        .trim()
        .trim_start_matches(['[', '#'])
        .trim_end_matches([']', ':', '.'])
        .trim();
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

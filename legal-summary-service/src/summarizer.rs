use regex::Regex;
use std::sync::LazyLock;
use thiserror::Error;
use tracing::{info, warn};

use crate::llm::LanguageModel;
use crate::models::SummaryResult;

pub const SUMMARY_PROMPT: &str = r#"
You are a legal explainer. Simplify this legal document.
Return ONLY valid JSON with the following keys:
- "summary_elevator": a 2-3 sentence plain-English elevator pitch
- "summary_bullets": a list of 5–7 key points in bullet form
- "missing_info": a list of missing details the user must clarify
- "confidence": number 0–100 (confidence of correctness)
- "next_steps": actionable recommendations for the user
"#;

pub const QUESTION_LEAD_IN: &str = "Here is the legal document:";

pub const NO_RESPONSE_ANSWER: &str = "No response from AI";

static LEADING_JSON_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^```json\s*").expect("valid regex"));
static LEADING_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^```\s*").expect("valid regex"));
static TRAILING_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"```$").expect("valid regex"));

#[derive(Error, Debug)]
pub enum SummarizeError {
    /// The model could not be reached or returned an error.
    #[error("{0}")]
    Call(String),

    /// The model answered, but not with a valid summary object.
    #[error("{message}")]
    Parse { message: String, raw: String },
}

impl SummarizeError {
    pub fn raw(&self) -> Option<&str> {
        match self {
            SummarizeError::Call(_) => None,
            SummarizeError::Parse { raw, .. } => Some(raw),
        }
    }
}

/// Remove markdown code fences around a model answer so it can be parsed as
/// JSON. Applied until nothing changes, so the result is a fixed point.
pub fn clean_ai_response(text: &str) -> String {
    let mut current = text.trim().to_string();
    loop {
        let next = strip_fences_once(&current);
        if next == current {
            return current;
        }
        current = next;
    }
}

fn strip_fences_once(text: &str) -> String {
    let text = LEADING_JSON_FENCE.replace(text.trim(), "");
    let text = LEADING_FENCE.replace(&text, "");
    let text = TRAILING_FENCE.replace(&text, "");
    text.trim().to_string()
}

/// Ask the model for the five-key summary of `document_text`.
pub async fn summarize_document(
    model: &dyn LanguageModel,
    document_text: &str,
) -> Result<SummaryResult, SummarizeError> {
    let parts = [SUMMARY_PROMPT.to_string(), document_text.to_string()];
    let raw = model
        .generate(&parts)
        .await
        .map_err(|e| SummarizeError::Call(format!("{e:#}")))?;

    parse_summary(&raw)
}

pub fn parse_summary(raw: &str) -> Result<SummaryResult, SummarizeError> {
    let cleaned = clean_ai_response(raw);
    match serde_json::from_str::<SummaryResult>(&cleaned) {
        Ok(summary) => {
            info!(
                bullets = summary.summary_bullets.len(),
                confidence = summary.confidence,
                "Parsed document summary"
            );
            Ok(summary)
        }
        Err(e) => {
            warn!(error = %e, "Model response is not a valid summary");
            Err(SummarizeError::Parse {
                message: e.to_string(),
                raw: raw.to_string(),
            })
        }
    }
}

/// Answer a follow-up question about a stored document.
///
/// Failures become the answer text instead of an error so the conversation
/// in the browser is never interrupted.
pub async fn answer_question(
    model: &dyn LanguageModel,
    document_text: &str,
    question: &str,
) -> String {
    let parts = [
        QUESTION_LEAD_IN.to_string(),
        document_text.to_string(),
        format!("User question: {question}"),
    ];

    match model.generate(&parts).await {
        Ok(answer) if answer.trim().is_empty() => NO_RESPONSE_ANSWER.to_string(),
        Ok(answer) => answer,
        Err(e) => {
            warn!(error = %e, "Question answering failed");
            format!("AI call failed: {e:#}")
        }
    }
}

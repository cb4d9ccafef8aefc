use serde::{Deserialize, Deserializer, Serialize};
use std::path::PathBuf;

/// Context key under which a session's [`SessionState`] is kept.
pub const SESSION_STATE_KEY: &str = "legal_document";

/// Structured plain-English summary of a legal document, as produced by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SummaryResult {
    pub summary_elevator: String,
    pub summary_bullets: Vec<String>,
    pub missing_info: Vec<String>,
    pub next_steps: Vec<String>,
    #[serde(deserialize_with = "confidence_percent")]
    pub confidence: u8,
}

/// Models occasionally answer `87.0` for an integer field; accept any number
/// in range and round it.
fn confidence_percent<'de, D>(deserializer: D) -> Result<u8, D::Error>
where
    D: Deserializer<'de>,
{
    let value = f64::deserialize(deserializer)?;
    if !(0.0..=100.0).contains(&value) {
        return Err(serde::de::Error::custom(format!(
            "confidence must be between 0 and 100, got {value}"
        )));
    }
    Ok(value.round() as u8)
}

/// A PDF received by the upload handler together with its extracted text.
#[derive(Debug, Clone)]
pub struct UploadedDocument {
    pub file_name: String,
    pub stored_path: PathBuf,
    pub text: String,
}

/// What a session remembers between requests: the last uploaded document's
/// text and the summary computed from it. Both are replaced together by the
/// next successful upload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionState {
    pub document_text: Option<String>,
    pub summary: Option<SummaryResult>,
}

#[derive(Debug, Deserialize)]
pub struct AskRequest {
    #[serde(default)]
    pub question: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AskResponse {
    pub answer: String,
}

//! Plain-text extraction from uploaded PDFs.

use lopdf::Document;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("Failed to load PDF: {0}")]
    Load(String),

    #[error("Extraction task failed: {0}")]
    Join(String),
}

/// Extract the text of every page of the PDF at `path`, in page order.
///
/// Pages that yield no text, or whose content cannot be decoded, contribute
/// nothing. The result is empty when no page has text.
pub fn extract_text_from_pdf(path: &Path) -> Result<String, ExtractError> {
    let doc = Document::load(path).map_err(|e| ExtractError::Load(e.to_string()))?;

    let pages = doc.get_pages().into_keys().map(|page_num| {
        doc.extract_text(&[page_num]).unwrap_or_else(|e| {
            warn!(page = page_num, error = %e, "Skipping page with undecodable text");
            String::new()
        })
    });
    let text = join_page_text(pages);

    info!(
        path = %path.display(),
        chars = text.chars().count(),
        "Extracted text from PDF"
    );
    Ok(text)
}

/// Same as [`extract_text_from_pdf`], run on the blocking pool.
pub async fn extract_text_blocking(path: PathBuf) -> Result<String, ExtractError> {
    tokio::task::spawn_blocking(move || extract_text_from_pdf(&path))
        .await
        .map_err(|e| ExtractError::Join(e.to_string()))?
}

/// Concatenate non-empty page texts, each followed by a newline, and trim.
pub fn join_page_text<I>(pages: I) -> String
where
    I: IntoIterator<Item = String>,
{
    let mut text = String::new();
    for page in pages {
        if page.trim().is_empty() {
            continue;
        }
        text.push_str(&page);
        text.push('\n');
    }
    text.trim().to_string()
}

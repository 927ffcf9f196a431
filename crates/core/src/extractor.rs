use crate::error::IngestError;
use lopdf::Document;

/// Page separator used when joining extracted page text.
pub const PAGE_BREAK: char = '\u{000C}';

pub trait PdfExtractor: Send + Sync {
    /// Extracts the document's text, pages joined by [`PAGE_BREAK`].
    fn extract_text(&self, bytes: &[u8]) -> Result<String, IngestError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LopdfExtractor;

impl PdfExtractor for LopdfExtractor {
    fn extract_text(&self, bytes: &[u8]) -> Result<String, IngestError> {
        let document =
            Document::load_mem(bytes).map_err(|error| IngestError::Extraction(error.to_string()))?;

        let mut pages = Vec::new();
        for page_no in document.get_pages().keys() {
            let text = document
                .extract_text(&[*page_no])
                .map_err(|error| IngestError::Extraction(error.to_string()))?;

            if !text.trim().is_empty() {
                pages.push(text);
            }
        }

        if pages.is_empty() {
            return Err(IngestError::Extraction(
                "pdf had no readable page text".to_string(),
            ));
        }

        Ok(pages.join(&PAGE_BREAK.to_string()))
    }
}

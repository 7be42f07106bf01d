//! Local text-only extraction with `pdf-extract`. No tables.

use async_trait::async_trait;

use super::{check_pdf, split_paragraphs, Extraction, Extractor, Page};
use crate::error::ExtractionError;

#[derive(Debug, Default, Clone)]
pub struct LocalExtractor;

impl LocalExtractor {
    pub fn new() -> Self {
        LocalExtractor
    }
}

fn extract_blocking(pdf: Vec<u8>) -> Result<Extraction, ExtractionError> {
    let pages = pdf_extract::extract_text_from_mem_by_pages(&pdf)
        .map_err(|e| ExtractionError::UnsupportedPdf(e.to_string()))?;

    let pages: Vec<Page> = pages
        .iter()
        .enumerate()
        .map(|(i, text)| Page {
            number: i as u32 + 1,
            paragraphs: split_paragraphs(text),
            tables: Vec::new(),
        })
        .collect();

    if pages.iter().all(|p| p.paragraphs.is_empty()) {
        return Err(ExtractionError::UnsupportedPdf(
            "no extractable text (scanned or image-only PDF?)".into(),
        ));
    }
    Ok(Extraction::from_parts(pages, Vec::new()))
}

#[async_trait]
impl Extractor for LocalExtractor {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn extract(&self, pdf: &[u8]) -> Result<Extraction, ExtractionError> {
        check_pdf(pdf)?;
        let bytes = pdf.to_vec();
        let extraction = tokio::task::spawn_blocking(move || extract_blocking(bytes))
            .await
            .map_err(|e| ExtractionError::MalformedResult(format!("extraction task failed: {}", e)))??;

        tracing::info!(
            pages = extraction.page_count(),
            chars = extraction.raw_text.len(),
            "local extraction complete"
        );
        Ok(extraction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rejects_non_pdf_without_parsing() {
        let err = LocalExtractor::new().extract(b"plain text").await.unwrap_err();
        assert!(matches!(err, ExtractionError::UnsupportedPdf(_)));
    }

    #[test]
    fn test_garbage_pdf_is_unsupported() {
        let err = extract_blocking(b"%PDF-1.4 garbage".to_vec()).unwrap_err();
        assert!(matches!(err, ExtractionError::UnsupportedPdf(_)));
    }
}

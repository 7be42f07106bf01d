//! Extraction adapters: PDF bytes → `Extraction`
//!
//! Two backends implement [`Extractor`]: the Adobe PDF Services Extract API
//! (text and tables) and a local text-only fallback built on `pdf-extract`.

mod adobe;
mod local;

pub use adobe::AdobeExtractor;
pub use local::LocalExtractor;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::ExtractionError;

/// Normalized result of extracting one PDF.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Extraction {
    pub pages: Vec<Page>,
    pub tables: Vec<Table>,
    pub raw_text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Page {
    /// 1-based page number
    pub number: u32,
    pub paragraphs: Vec<String>,
    /// Indexes into `Extraction::tables`
    pub tables: Vec<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Table {
    pub index: usize,
    pub page: u32,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    pub fn cell(&self, row: usize, col: usize) -> Option<&str> {
        self.rows.get(row).and_then(|r| r.get(col)).map(String::as_str)
    }
}

impl Extraction {
    /// Build from per-page text blocks and tables, filling in the page
    /// table indexes and the raw text.
    pub fn from_parts(mut pages: Vec<Page>, mut tables: Vec<Table>) -> Self {
        pages.sort_by_key(|p| p.number);
        for (i, table) in tables.iter_mut().enumerate() {
            table.index = i;
        }
        for table in &tables {
            match pages.iter_mut().find(|p| p.number == table.page) {
                Some(page) => page.tables.push(table.index),
                None => {
                    pages.push(Page { number: table.page, paragraphs: Vec::new(), tables: vec![table.index] });
                    pages.sort_by_key(|p| p.number);
                }
            }
        }
        let raw_text = pages
            .iter()
            .flat_map(|p| p.paragraphs.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join("\n");
        Extraction { pages, tables, raw_text }
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }
}

#[async_trait]
pub trait Extractor: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &'static str;

    async fn extract(&self, pdf: &[u8]) -> Result<Extraction, ExtractionError>;
}

/// Reject input that is not a PDF or is encrypted, before any remote call.
pub fn check_pdf(pdf: &[u8]) -> Result<(), ExtractionError> {
    if !pdf.starts_with(b"%PDF-") {
        return Err(ExtractionError::UnsupportedPdf("missing %PDF- header".into()));
    }
    if pdf.windows(b"/Encrypt".len()).any(|w| w == b"/Encrypt") {
        return Err(ExtractionError::UnsupportedPdf("document is encrypted".into()));
    }
    Ok(())
}

/// Split page text into paragraphs on blank lines, collapsing inner line
/// breaks.
pub fn split_paragraphs(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            if !current.is_empty() {
                out.push(current.join(" "));
                current.clear();
            }
        } else {
            current.push(line);
        }
    }
    if !current.is_empty() {
        out.push(current.join(" "));
    }
    out
}

/// Fixed extraction used by offline tools and tests.
pub fn sample_extraction() -> Extraction {
    let page = |number: u32, paragraphs: &[&str]| Page {
        number,
        paragraphs: paragraphs.iter().map(|s| s.to_string()).collect(),
        tables: Vec::new(),
    };
    let rows = [
        ["Model", "Vout", "Iout", "Pout"],
        ["SPS-120W-A", "12V", "10A", "120W"],
        ["SPS-120W-B", "24V", "5A", "120W"],
    ];
    Extraction::from_parts(
        vec![
            page(1, &["CB TEST REPORT", "Report Number: TW-12345-UL", "Standard: IEC 62368-1:2018"]),
            page(
                2,
                &[
                    "Applicant: ABC Technology Co., Ltd.",
                    "Address: No. 123, Tech Road, Hsinchu, Taiwan",
                    "Manufacturer: XYZ Manufacturing Inc.",
                ],
            ),
        ],
        vec![Table {
            index: 0,
            page: 3,
            rows: rows.iter().map(|r| r.iter().map(|c| c.to_string()).collect()).collect(),
        }],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_pdf() {
        assert!(check_pdf(b"%PDF-1.7\n1 0 obj").is_ok());
        assert!(matches!(check_pdf(b"hello"), Err(ExtractionError::UnsupportedPdf(_))));
        assert!(matches!(
            check_pdf(b"%PDF-1.4\ntrailer << /Encrypt 5 0 R >>"),
            Err(ExtractionError::UnsupportedPdf(_))
        ));
    }

    #[test]
    fn test_split_paragraphs() {
        let paras = split_paragraphs("Line one\ncontinues\n\n\n  Second  \n");
        assert_eq!(paras, vec!["Line one continues", "Second"]);
    }

    #[test]
    fn test_from_parts_links_tables_to_pages() {
        let ex = sample_extraction();
        assert_eq!(ex.page_count(), 3);
        assert_eq!(ex.pages[2].tables, vec![0]);
        assert_eq!(ex.tables[0].cell(1, 0), Some("SPS-120W-A"));
        assert_eq!(ex.tables[0].cell(9, 0), None);
        assert!(ex.raw_text.starts_with("CB TEST REPORT\nReport Number"));
    }
}

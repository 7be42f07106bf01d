//! End-to-end report generation: PDF → extraction → structuring → fill.
//!
//! One linear pass per request. The mock path substitutes the fixture
//! record and never touches the extraction or structuring adapters.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::Instrument;

use crate::error::{ExtractionError, PipelineError, StructuringError};
use crate::extraction::{AdobeExtractor, Extraction, Extractor, LocalExtractor};
use crate::schema::{mock_schema, ReportSchema};
use crate::settings::{ExtractorBackend, Settings};
use crate::structuring::{LlmStructurer, Structurer};
use crate::template::{fill_with, FillContext, FillStats, Template};
use crate::utils::filename_safe;

/// A generated Word report.
#[derive(Debug, Clone)]
pub struct Report {
    pub filename: String,
    pub bytes: Vec<u8>,
    pub report_no: Option<String>,
    pub stats: FillStats,
}

/// Adapter whose credentials are missing. Every call fails, so the server
/// can still start and serve the mock path.
struct Unconfigured(String);

#[async_trait]
impl Extractor for Unconfigured {
    fn name(&self) -> &'static str {
        "unconfigured"
    }

    async fn extract(&self, _pdf: &[u8]) -> Result<Extraction, ExtractionError> {
        Err(ExtractionError::NotConfigured(self.0.clone()))
    }
}

#[async_trait]
impl Structurer for Unconfigured {
    fn name(&self) -> &'static str {
        "unconfigured"
    }

    async fn structure(&self, _extraction: &Extraction) -> Result<ReportSchema, StructuringError> {
        Err(StructuringError::NotConfigured(self.0.clone()))
    }
}

pub struct Pipeline {
    extractor: Arc<dyn Extractor>,
    structurer: Arc<dyn Structurer>,
    template: Arc<Template>,
    ctx: FillContext,
    max_pdf_bytes: usize,
}

impl Pipeline {
    pub fn new(
        extractor: Arc<dyn Extractor>,
        structurer: Arc<dyn Structurer>,
        template: Arc<Template>,
        ctx: FillContext,
        max_pdf_bytes: usize,
    ) -> Self {
        Pipeline { extractor, structurer, template, ctx, max_pdf_bytes }
    }

    /// Wire the configured adapters. Missing credentials are logged and
    /// reported on first use rather than at startup.
    pub fn from_settings(settings: &Settings, template: Arc<Template>) -> Self {
        let extractor: Arc<dyn Extractor> = match settings.extractor {
            ExtractorBackend::Local => Arc::new(LocalExtractor::new()),
            ExtractorBackend::Adobe => match AdobeExtractor::from_settings(&settings.adobe) {
                Ok(adobe) => Arc::new(adobe),
                Err(e) => {
                    tracing::warn!("Adobe extraction unavailable: {}", e);
                    Arc::new(Unconfigured(e.to_string()))
                }
            },
        };
        let structurer: Arc<dyn Structurer> = match LlmStructurer::from_settings(&settings.azure) {
            Ok(llm) => Arc::new(llm),
            Err(e) => {
                tracing::warn!("LLM structuring unavailable: {}", e);
                Arc::new(Unconfigured(e.to_string()))
            }
        };
        tracing::info!(extractor = extractor.name(), structurer = structurer.name(), "Pipeline ready");

        Self::new(extractor, structurer, template, FillContext::from_settings(settings), settings.max_pdf_bytes())
    }

    pub fn template(&self) -> &Template {
        &self.template
    }

    pub fn max_pdf_bytes(&self) -> usize {
        self.max_pdf_bytes
    }

    /// Generate a report for one uploaded PDF.
    pub async fn generate(&self, pdf: &[u8], filename: &str, use_mock: bool) -> Result<Report, PipelineError> {
        let request_id = uuid::Uuid::new_v4();
        let span = tracing::info_span!("generate", %request_id, file = %filename, mock = use_mock);
        self.generate_inner(pdf, filename, use_mock).instrument(span).await
    }

    async fn generate_inner(&self, pdf: &[u8], filename: &str, use_mock: bool) -> Result<Report, PipelineError> {
        self.check_upload(pdf, filename)?;
        tracing::info!(bytes = pdf.len(), "Upload accepted");

        let mut schema = if use_mock {
            tracing::info!("Using mock data");
            mock_schema()
        } else {
            let extraction = self.extractor.extract(pdf).await?;
            tracing::info!(pages = extraction.page_count(), tables = extraction.tables.len(), "Extraction done");
            self.structurer.structure(&extraction).await?
        };
        schema.source_filename = Some(filename.to_string());
        if let Some(notes) = &schema.extraction_notes {
            tracing::warn!("Validation notices: {}", notes);
        }

        let filled = fill_with(&self.template, &schema, &self.ctx)?;
        let report_no = schema.report_number().map(str::to_string);
        let out_name = output_filename(report_no.as_deref(), chrono::Local::now());
        tracing::info!(output = %out_name, bytes = filled.bytes.len(), "Report generated");

        Ok(Report { filename: out_name, bytes: filled.bytes, report_no, stats: filled.stats })
    }

    fn check_upload(&self, pdf: &[u8], filename: &str) -> Result<(), PipelineError> {
        if !filename.to_lowercase().ends_with(".pdf") {
            return Err(PipelineError::InvalidUpload("only PDF files are accepted".into()));
        }
        if pdf.is_empty() {
            return Err(PipelineError::InvalidUpload("uploaded file is empty".into()));
        }
        if pdf.len() > self.max_pdf_bytes {
            return Err(PipelineError::InvalidUpload(format!(
                "file exceeds the {} MB limit",
                self.max_pdf_bytes / (1024 * 1024)
            )));
        }
        Ok(())
    }
}

/// `CNS_Report_<report no>_<YYYYmmdd_HHMMSS>.docx`
pub fn output_filename<Tz: chrono::TimeZone>(report_no: Option<&str>, at: chrono::DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    format!(
        "CNS_Report_{}_{}.docx",
        filename_safe(report_no.unwrap_or("Unknown")),
        at.format("%Y%m%d_%H%M%S")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Stage;
    use crate::extraction::sample_extraction;
    use crate::template::find_unresolved;
    use crate::template::testing::{para, read_entry, template_with_body};
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingExtractor {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl Extractor for CountingExtractor {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn extract(&self, _pdf: &[u8]) -> Result<Extraction, ExtractionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(ExtractionError::QuotaExhausted("monthly limit".into()));
            }
            Ok(sample_extraction())
        }
    }

    #[derive(Default)]
    struct CountingStructurer {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Structurer for CountingStructurer {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn structure(&self, extraction: &Extraction) -> Result<ReportSchema, StructuringError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut schema = ReportSchema::default();
            schema.basic_info.cb_report_no = "CB/2024 01".into();
            schema.basic_info.product_name_en = extraction.pages[0].paragraphs[0].clone();
            Ok(schema)
        }
    }

    const PDF: &[u8] = b"%PDF-1.7\n%fake";

    fn pipeline(extractor: Arc<CountingExtractor>, structurer: Arc<CountingStructurer>) -> Pipeline {
        let body = format!(
            "{}{}",
            para(&["Report ", "{{cb_", "report_no}}"]),
            para(&["Product: {{product_name_en}}"])
        );
        Pipeline::new(extractor, structurer, Arc::new(template_with_body(&body)), FillContext::default(), 1024)
    }

    #[tokio::test]
    async fn test_mock_path_makes_no_adapter_calls() {
        let extractor = Arc::new(CountingExtractor::default());
        let structurer = Arc::new(CountingStructurer::default());
        let p = pipeline(extractor.clone(), structurer.clone());

        let report = p.generate(PDF, "report.pdf", true).await.unwrap();

        assert_eq!(extractor.calls.load(Ordering::SeqCst), 0);
        assert_eq!(structurer.calls.load(Ordering::SeqCst), 0);
        assert_eq!(report.report_no.as_deref(), Some("TW-12345-UL"));
        assert!(report.filename.starts_with("CNS_Report_TW-12345-UL_"));
        assert!(report.filename.ends_with(".docx"));
        let doc = read_entry(&report.bytes, "word/document.xml");
        assert!(doc.contains("TW-12345-UL"));
        assert_eq!(find_unresolved(&report.bytes).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_live_path_runs_each_adapter_once() {
        let extractor = Arc::new(CountingExtractor::default());
        let structurer = Arc::new(CountingStructurer::default());
        let p = pipeline(extractor.clone(), structurer.clone());

        let report = p.generate(PDF, "Upload.PDF", false).await.unwrap();

        assert_eq!(extractor.calls.load(Ordering::SeqCst), 1);
        assert_eq!(structurer.calls.load(Ordering::SeqCst), 1);
        assert!(report.filename.starts_with("CNS_Report_CB_2024_01_"));
        let doc = read_entry(&report.bytes, "word/document.xml");
        assert!(doc.contains("Product: CB TEST REPORT"));
    }

    #[tokio::test]
    async fn test_extraction_failure_reports_stage() {
        let extractor = Arc::new(CountingExtractor { fail: true, ..Default::default() });
        let structurer = Arc::new(CountingStructurer::default());
        let p = pipeline(extractor, structurer.clone());

        let err = p.generate(PDF, "a.pdf", false).await.unwrap_err();
        assert_eq!(err.stage(), Stage::Extraction);
        assert_eq!(structurer.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_upload_checks() {
        let extractor = Arc::new(CountingExtractor::default());
        let p = pipeline(extractor.clone(), Arc::new(CountingStructurer::default()));

        let err = p.generate(PDF, "notes.txt", true).await.unwrap_err();
        assert_eq!(err.stage(), Stage::Upload);
        let err = p.generate(&[], "a.pdf", false).await.unwrap_err();
        assert_eq!(err.stage(), Stage::Upload);
        let big = vec![b'x'; 2048];
        let err = p.generate(&big, "a.pdf", false).await.unwrap_err();
        assert!(matches!(err, PipelineError::InvalidUpload(_)));
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unconfigured_adapters_fail_at_use() {
        let settings = Settings::default();
        let p = Pipeline::from_settings(&settings, Arc::new(template_with_body(&para(&["x"]))));

        let err = p.generate(PDF, "a.pdf", false).await.unwrap_err();
        assert!(matches!(err, PipelineError::Extraction(ExtractionError::NotConfigured(_))));
        assert!(p.generate(PDF, "a.pdf", true).await.is_ok());
    }

    #[test]
    fn test_output_filename() {
        let at = chrono::Utc.with_ymd_and_hms(2024, 1, 15, 9, 5, 3).unwrap();
        assert_eq!(output_filename(Some("TW 1/2"), at), "CNS_Report_TW_1_2_20240115_090503.docx");
        assert_eq!(output_filename(None, at), "CNS_Report_Unknown_20240115_090503.docx");
    }
}

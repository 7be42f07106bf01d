//! HTTP API for report generation
//!
//! Endpoints:
//!   GET  /                    upload page
//!   GET  /health              liveness and version
//!   POST /generate-report     multipart `file` (+ `use_mock`) → .docx
//!   GET  /api/template-info   placeholders found in the loaded template
//!   GET  /api/schema-sample   fixture record as JSON

use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde_json::json;
use tower_http::cors::CorsLayer;

use crate::error::{PipelineError, Stage};
use crate::pipeline::Pipeline;
use crate::schema::mock_schema;

pub const DOCX_MIME: &str = "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

/// Multipart framing allowance on top of the PDF size limit
const MULTIPART_OVERHEAD: usize = 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    pub app_name: String,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(pipeline: Arc<Pipeline>, app_name: impl Into<String>) -> Self {
        AppState { pipeline, app_name: app_name.into(), start_time: Instant::now() }
    }
}

// ============================================================================
// Error type
// ============================================================================

pub struct AppError {
    status: StatusCode,
    error: String,
    stage: Stage,
    detail: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = json!({"error": self.error, "stage": self.stage, "detail": self.detail});
        (self.status, Json(body)).into_response()
    }
}

impl From<PipelineError> for AppError {
    fn from(e: PipelineError) -> Self {
        let stage = e.stage();
        let (status, error) = match stage {
            Stage::Upload => (StatusCode::BAD_REQUEST, "Invalid upload"),
            Stage::Extraction => (StatusCode::BAD_GATEWAY, "PDF extraction failed"),
            Stage::Structuring => (StatusCode::BAD_GATEWAY, "Structuring failed"),
            Stage::Validation => (StatusCode::BAD_GATEWAY, "Structured data does not match the schema"),
            Stage::Filling => (StatusCode::INTERNAL_SERVER_ERROR, "Template fill failed"),
        };
        AppError { status, error: error.to_string(), stage, detail: e.to_string() }
    }
}

fn bad_request(detail: impl Into<String>) -> AppError {
    PipelineError::InvalidUpload(detail.into()).into()
}

// ============================================================================
// Handlers
// ============================================================================

async fn index_handler(State(state): State<AppState>) -> Html<String> {
    Html(format!(
        r#"<!DOCTYPE html>
<html lang="zh-Hant">
<head><meta charset="utf-8"><title>{name}</title></head>
<body>
<h1>{name}</h1>
<form action="/generate-report" method="post" enctype="multipart/form-data">
  <p><input type="file" name="file" accept="application/pdf" required></p>
  <p><label><input type="checkbox" name="use_mock" value="true"> Use mock data</label></p>
  <p><button type="submit">Generate CNS report</button></p>
</form>
<p>Template: {template}</p>
</body>
</html>"#,
        name = html_escape::encode_text(&state.app_name),
        template = html_escape::encode_text(state.pipeline.template().name()),
    ))
}

async fn health_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "app_name": state.app_name,
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_secs": state.start_time.elapsed().as_secs(),
    }))
}

fn parse_flag(value: &str) -> bool {
    matches!(value.trim().to_lowercase().as_str(), "true" | "1" | "yes" | "on")
}

async fn generate_report_handler(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Response, AppError> {
    let mut upload: Option<(String, Vec<u8>)> = None;
    let mut use_mock = false;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(format!("malformed upload: {}", e)))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "file" => {
                let filename = field.file_name().unwrap_or("").to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| bad_request(format!("could not read file: {}", e)))?;
                upload = Some((filename, bytes.to_vec()));
            }
            "use_mock" => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| bad_request(format!("could not read use_mock: {}", e)))?;
                use_mock = parse_flag(&value);
            }
            _ => {}
        }
    }

    let (filename, pdf) = upload.ok_or_else(|| bad_request("missing `file` field"))?;
    tracing::info!(file = %filename, bytes = pdf.len(), use_mock, "POST /generate-report");

    let report = state.pipeline.generate(&pdf, &filename, use_mock).await.map_err(|e| {
        tracing::error!(stage = e.stage().as_str(), "Report generation failed: {}", e);
        AppError::from(e)
    })?;

    let disposition = format!("attachment; filename=\"{}\"", report.filename);
    Ok((
        [(header::CONTENT_TYPE, DOCX_MIME.to_string()), (header::CONTENT_DISPOSITION, disposition)],
        report.bytes,
    )
        .into_response())
}

async fn template_info_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    let template = state.pipeline.template();
    let placeholders: Vec<String> = template.placeholders().collect();
    Json(json!({
        "status": "ok",
        "template": template.name(),
        "fingerprint": template.fingerprint(),
        "count": placeholders.len(),
        "placeholders": placeholders,
    }))
}

async fn schema_sample_handler() -> Json<crate::schema::ReportSchema> {
    Json(mock_schema())
}

// ============================================================================
// Router
// ============================================================================

pub fn router(state: AppState) -> Router {
    let body_limit = state.pipeline.max_pdf_bytes() + MULTIPART_OVERHEAD;
    Router::new()
        .route("/", get(index_handler))
        .route("/health", get(health_handler))
        .route("/generate-report", post(generate_report_handler))
        .route("/api/template-info", get(template_info_handler))
        .route("/api/schema-sample", get(schema_sample_handler))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::Settings;
    use crate::template::find_unresolved;
    use crate::template::testing::{para, read_entry, template_with_body};
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    const BOUNDARY: &str = "XBOUNDARYX";

    fn app() -> Router {
        let body = format!("{}{}", para(&["No. {{cb_report_no}}"]), para(&["{{model_main}} / {{brand}}"]));
        let template = Arc::new(template_with_body(&body));
        let pipeline = Pipeline::from_settings(&Settings::default(), template);
        router(AppState::new(Arc::new(pipeline), "Test App"))
    }

    fn multipart_body(filename: &str, content: &[u8], use_mock: Option<&str>) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(
            format!(
                "--{b}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{f}\"\r\nContent-Type: application/pdf\r\n\r\n",
                b = BOUNDARY,
                f = filename
            )
            .as_bytes(),
        );
        body.extend_from_slice(content);
        body.extend_from_slice(b"\r\n");
        if let Some(flag) = use_mock {
            body.extend_from_slice(
                format!("--{}\r\nContent-Disposition: form-data; name=\"use_mock\"\r\n\r\n{}\r\n", BOUNDARY, flag)
                    .as_bytes(),
            );
        }
        body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
        body
    }

    fn upload(body: Vec<u8>) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/generate-report")
            .header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={}", BOUNDARY))
            .body(Body::from(body))
            .unwrap()
    }

    async fn json_body(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let response = app()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["app_name"], "Test App");
        assert!(body["timestamp"].is_string());
    }

    #[tokio::test]
    async fn test_index_page_has_upload_form() {
        let response = app().oneshot(Request::builder().uri("/").body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let html = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(html.contains("action=\"/generate-report\""));
    }

    #[tokio::test]
    async fn test_generate_mock_report() {
        let response = app()
            .oneshot(upload(multipart_body("cb.pdf", b"%PDF-1.7\n", Some("true"))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], DOCX_MIME);
        let disposition = response.headers()[header::CONTENT_DISPOSITION].to_str().unwrap().to_string();
        assert!(disposition.starts_with("attachment; filename=\"CNS_Report_TW-12345-UL_"));

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(find_unresolved(&bytes).unwrap().count(), 0);
        let doc = read_entry(&bytes, "word/document.xml");
        assert!(doc.contains("No. TW-12345-UL"));
        assert!(doc.contains("SPS-120W"));
    }

    #[tokio::test]
    async fn test_generate_rejects_non_pdf() {
        let response = app()
            .oneshot(upload(multipart_body("notes.txt", b"hello", Some("true"))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert_eq!(body["stage"], "upload");
        assert!(body["detail"].as_str().unwrap().contains("PDF"));
    }

    #[tokio::test]
    async fn test_generate_without_credentials_is_bad_gateway() {
        let response = app()
            .oneshot(upload(multipart_body("cb.pdf", b"%PDF-1.7\n", None)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let body = json_body(response).await;
        assert_eq!(body["stage"], "extraction");
        assert_eq!(body["error"], "PDF extraction failed");
    }

    #[tokio::test]
    async fn test_missing_file_field() {
        let body = format!(
            "--{b}\r\nContent-Disposition: form-data; name=\"use_mock\"\r\n\r\ntrue\r\n--{b}--\r\n",
            b = BOUNDARY
        );
        let response = app().oneshot(upload(body.into_bytes())).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_template_info_lists_placeholders() {
        let response = app()
            .oneshot(Request::builder().uri("/api/template-info").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = json_body(response).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["count"], 3);
        assert_eq!(body["placeholders"], json!(["cb_report_no", "model_main", "brand"]));
    }

    #[tokio::test]
    async fn test_schema_sample() {
        let response = app()
            .oneshot(Request::builder().uri("/api/schema-sample").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = json_body(response).await;
        assert_eq!(body["basic_info"]["cb_report_no"], "TW-12345-UL");
        assert!(body["series_models"].as_array().unwrap().len() >= 3);
    }

    #[test]
    fn test_parse_flag() {
        assert!(parse_flag("true"));
        assert!(parse_flag(" On "));
        assert!(!parse_flag("false"));
        assert!(!parse_flag(""));
    }
}

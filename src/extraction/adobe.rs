//! Adobe PDF Services Extract API client
//!
//! Flow: IMS token → create asset → upload to presigned URL → create
//! extract job → poll status → download result (ZIP with
//! `structuredData.json` and `tables/*.csv`, or bare JSON) → normalize.

use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::Mutex;

use super::{check_pdf, Extraction, Extractor, Page, Table};
use crate::error::ExtractionError;
use crate::settings::AdobeSettings;
use crate::utils::safe_truncate;

const TOKEN_SCOPE: &str = "openid,AdobeID,read_organizations";
/// Refresh this long before the token actually expires
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    86400
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AssetResponse {
    upload_uri: String,
    #[serde(rename = "assetID")]
    asset_id: String,
}

struct CachedToken {
    token: String,
    refresh_at: Instant,
}

pub struct AdobeExtractor {
    client: reqwest::Client,
    client_id: String,
    client_secret: String,
    base_url: String,
    ims_url: String,
    timeout: Duration,
    poll_interval: Duration,
    token: Mutex<Option<CachedToken>>,
}

async fn check_response(response: reqwest::Response) -> Result<reqwest::Response, ExtractionError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let body = safe_truncate(&body, 500).to_string();
    if status.as_u16() == 429 {
        Err(ExtractionError::QuotaExhausted(body))
    } else {
        Err(ExtractionError::Service { status: status.as_u16(), body })
    }
}

impl AdobeExtractor {
    pub fn from_settings(settings: &AdobeSettings) -> Result<Self, ExtractionError> {
        let client_id = settings
            .client_id
            .clone()
            .ok_or_else(|| ExtractionError::NotConfigured("ADOBE_CLIENT_ID is not set".into()))?;
        let client_secret = settings
            .client_secret
            .clone()
            .ok_or_else(|| ExtractionError::NotConfigured("ADOBE_CLIENT_SECRET is not set".into()))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()?;

        Ok(AdobeExtractor {
            client,
            client_id,
            client_secret,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            ims_url: settings.ims_url.clone(),
            timeout: Duration::from_secs(settings.extract_timeout_secs),
            poll_interval: Duration::from_secs(settings.poll_interval_secs.max(1)),
            token: Mutex::new(None),
        })
    }

    /// Cached IMS access token, refreshed shortly before expiry.
    async fn access_token(&self) -> Result<String, ExtractionError> {
        let mut cached = self.token.lock().await;
        if let Some(t) = cached.as_ref() {
            if Instant::now() < t.refresh_at {
                return Ok(t.token.clone());
            }
        }

        tracing::info!("Requesting Adobe IMS access token");
        let params = [
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("scope", TOKEN_SCOPE),
        ];
        let response = self.client.post(&self.ims_url).form(&params).send().await?;
        let token: TokenResponse = check_response(response).await?.json().await?;

        let lifetime = Duration::from_secs(token.expires_in);
        let refresh_at = Instant::now() + lifetime.saturating_sub(TOKEN_EXPIRY_MARGIN);
        *cached = Some(CachedToken { token: token.access_token.clone(), refresh_at });
        Ok(token.access_token)
    }

    fn authed(&self, builder: reqwest::RequestBuilder, token: &str) -> reqwest::RequestBuilder {
        builder
            .header("Authorization", format!("Bearer {}", token))
            .header("x-api-key", &self.client_id)
    }

    async fn upload(&self, token: &str, pdf: &[u8]) -> Result<String, ExtractionError> {
        let response = self
            .authed(self.client.post(format!("{}/assets", self.base_url)), token)
            .json(&json!({ "mediaType": "application/pdf" }))
            .send()
            .await?;
        let asset: AssetResponse = check_response(response).await?.json().await?;

        let response = self
            .client
            .put(&asset.upload_uri)
            .header("Content-Type", "application/pdf")
            .body(pdf.to_vec())
            .send()
            .await?;
        check_response(response).await?;

        tracing::debug!(asset_id = %asset.asset_id, bytes = pdf.len(), "PDF uploaded");
        Ok(asset.asset_id)
    }

    /// Create the extract job and return its status URL.
    async fn create_job(&self, token: &str, asset_id: &str) -> Result<String, ExtractionError> {
        let response = self
            .authed(self.client.post(format!("{}/operation/extractpdf", self.base_url)), token)
            .json(&json!({
                "assetID": asset_id,
                "elementsToExtract": ["text", "tables"],
                "tableOutputFormat": "csv",
            }))
            .send()
            .await?;
        let response = check_response(response).await?;

        let header = |name: &str| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        if let Some(location) = header("location") {
            return Ok(location);
        }
        match header("x-request-id") {
            Some(job_id) => Ok(format!("{}/operation/extractpdf/{}/status", self.base_url, job_id)),
            None => Err(ExtractionError::MalformedResult("extract job created without a location".into())),
        }
    }

    async fn poll(&self, token: &str, status_url: &str) -> Result<Value, ExtractionError> {
        let started = Instant::now();
        loop {
            if started.elapsed() > self.timeout {
                return Err(ExtractionError::Timeout(self.timeout.as_secs()));
            }

            let response = self.authed(self.client.get(status_url), token).send().await?;
            let status: Value = check_response(response).await?.json().await?;
            let state = status.get("status").and_then(Value::as_str).unwrap_or("").to_lowercase();

            match state.as_str() {
                "done" | "succeeded" => return Ok(status),
                "failed" | "error" => {
                    let message = status
                        .pointer("/error/message")
                        .and_then(Value::as_str)
                        .unwrap_or("unknown error")
                        .to_string();
                    let code = status.pointer("/error/status").and_then(Value::as_u64).unwrap_or(500);
                    return Err(ExtractionError::Service { status: code as u16, body: message });
                }
                "in progress" | "running" | "pending" => {
                    tracing::debug!(elapsed = started.elapsed().as_secs(), "extract job in progress");
                }
                other => tracing::warn!("Unknown extract job status '{}'", other),
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn download(&self, status: &Value) -> Result<Vec<u8>, ExtractionError> {
        let uri = ["/content/downloadUri", "/asset/downloadUri", "/resource/downloadUri"]
            .iter()
            .find_map(|p| status.pointer(p).and_then(Value::as_str))
            .ok_or_else(|| ExtractionError::MalformedResult("no download URI in job status".into()))?;

        // Presigned: no auth headers
        let response = self.client.get(uri).send().await?;
        let bytes = check_response(response).await?.bytes().await?;
        Ok(bytes.to_vec())
    }
}

/// Minimal RFC 4180 reader: quoted fields, doubled quotes, CRLF, BOM.
pub(crate) fn parse_csv(content: &str) -> Vec<Vec<String>> {
    let content = content.trim_start_matches('\u{feff}');
    let mut rows = Vec::new();
    let mut row = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = content.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    field.push('"');
                    chars.next();
                }
                '"' => in_quotes = false,
                '\r' => {}
                _ => field.push(c),
            }
            continue;
        }
        match c {
            '"' => in_quotes = true,
            ',' => row.push(std::mem::take(&mut field)),
            '\r' => {}
            '\n' => {
                row.push(std::mem::take(&mut field));
                rows.push(std::mem::take(&mut row));
            }
            _ => field.push(c),
        }
    }
    if !field.is_empty() || !row.is_empty() {
        row.push(field);
        rows.push(row);
    }
    rows
}

/// Turn `structuredData.json` plus its CSV tables into an `Extraction`.
pub(crate) fn normalize(structured: &Value, csvs: &HashMap<String, String>) -> Result<Extraction, ExtractionError> {
    let elements = structured
        .get("elements")
        .and_then(Value::as_array)
        .ok_or_else(|| ExtractionError::MalformedResult("structured data has no elements".into()))?;

    let mut pages: Vec<Page> = Vec::new();
    let mut tables: Vec<Table> = Vec::new();
    let page_mut = |pages: &mut Vec<Page>, number: u32| -> usize {
        match pages.iter().position(|p| p.number == number) {
            Some(i) => i,
            None => {
                pages.push(Page { number, ..Page::default() });
                pages.len() - 1
            }
        }
    };

    for element in elements {
        let number = element.get("Page").and_then(Value::as_u64).unwrap_or(0) as u32 + 1;
        let path = element.get("Path").and_then(Value::as_str).unwrap_or("");

        let csv_paths: Vec<&str> = element
            .get("filePaths")
            .and_then(Value::as_array)
            .map(|a| a.iter().filter_map(Value::as_str).filter(|p| p.ends_with(".csv")).collect())
            .unwrap_or_default();
        if !csv_paths.is_empty() {
            for csv_path in csv_paths {
                let content = csvs
                    .iter()
                    .find(|(name, _)| name.ends_with(csv_path))
                    .map(|(_, c)| c.as_str());
                if let Some(content) = content {
                    tables.push(Table { index: 0, page: number, rows: parse_csv(content) });
                } else {
                    tracing::warn!("Table file {} missing from extract result", csv_path);
                }
            }
            continue;
        }

        // Table cell text is covered by the CSV files
        if path.contains("/Table") && !csvs.is_empty() {
            continue;
        }
        if let Some(text) = element.get("Text").and_then(Value::as_str) {
            let text = text.trim();
            if !text.is_empty() {
                let i = page_mut(&mut pages, number);
                pages[i].paragraphs.push(text.to_string());
            }
        }
    }

    Ok(Extraction::from_parts(pages, tables))
}

/// Parse the downloaded result: a ZIP archive or bare JSON.
pub(crate) fn parse_result(bytes: &[u8]) -> Result<Extraction, ExtractionError> {
    if bytes.first() == Some(&b'{') {
        let structured: Value = serde_json::from_slice(bytes)
            .map_err(|e| ExtractionError::MalformedResult(e.to_string()))?;
        return normalize(&structured, &HashMap::new());
    }

    let malformed = |e: &dyn std::fmt::Display| ExtractionError::MalformedResult(e.to_string());
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).map_err(|e| malformed(&e))?;
    let mut structured = None;
    let mut csvs = HashMap::new();

    for i in 0..archive.len() {
        let mut file = archive.by_index(i).map_err(|e| malformed(&e))?;
        let name = file.name().to_string();
        if name.ends_with("structuredData.json") {
            let mut raw = Vec::new();
            file.read_to_end(&mut raw).map_err(|e| malformed(&e))?;
            structured = Some(serde_json::from_slice::<Value>(&raw).map_err(|e| malformed(&e))?);
        } else if name.ends_with(".csv") {
            let mut raw = Vec::new();
            file.read_to_end(&mut raw).map_err(|e| malformed(&e))?;
            csvs.insert(name, String::from_utf8_lossy(&raw).into_owned());
        }
    }

    let structured = structured
        .ok_or_else(|| ExtractionError::MalformedResult("structuredData.json missing".into()))?;
    normalize(&structured, &csvs)
}

#[async_trait]
impl Extractor for AdobeExtractor {
    fn name(&self) -> &'static str {
        "adobe"
    }

    async fn extract(&self, pdf: &[u8]) -> Result<Extraction, ExtractionError> {
        check_pdf(pdf)?;

        let token = self.access_token().await?;
        let asset_id = self.upload(&token, pdf).await?;
        let status_url = self.create_job(&token, &asset_id).await?;
        tracing::info!(asset_id = %asset_id, "Adobe extract job created");

        let status = self.poll(&token, &status_url).await?;
        let result = self.download(&status).await?;
        let extraction = parse_result(&result)?;

        tracing::info!(
            pages = extraction.page_count(),
            tables = extraction.tables.len(),
            "Adobe extraction complete"
        );
        Ok(extraction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_csv_multiline_cell() {
        let rows = parse_csv("Clause,Remark\r\n4.1.1,\"Line one\r\nLine two\"\r\n");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1], vec!["4.1.1".to_string(), "Line one\nLine two".to_string()]);
    }

    #[test]
    fn test_parse_csv_quotes_and_crlf() {
        let rows = parse_csv("\u{feff}Model,\"Rated, output\"\r\nA,\"12V \"\"max\"\"\"\r\nB,\n");
        assert_eq!(
            rows,
            vec![
                vec!["Model".to_string(), "Rated, output".to_string()],
                vec!["A".to_string(), "12V \"max\"".to_string()],
                vec!["B".to_string(), String::new()],
            ]
        );
    }

    #[test]
    fn test_normalize_groups_pages_and_tables() {
        let structured = json!({
            "elements": [
                {"Page": 0, "Path": "//Document/H1", "Text": "CB TEST REPORT "},
                {"Page": 0, "Path": "//Document/P", "Text": "Report Number: TW-1"},
                {"Page": 2, "Path": "//Document/Table", "filePaths": ["tables/fileoutpart0.csv"]},
                {"Page": 2, "Path": "//Document/Table/TR/TD/P", "Text": "Model"},
                {"Page": 1, "Path": "//Document/P", "Text": "   "}
            ]
        });
        let mut csvs = HashMap::new();
        csvs.insert("tables/fileoutpart0.csv".to_string(), "Model,Vout\nA,12V\n".to_string());

        let ex = normalize(&structured, &csvs).unwrap();
        assert_eq!(ex.pages.len(), 2);
        assert_eq!(ex.pages[0].number, 1);
        assert_eq!(ex.pages[0].paragraphs, vec!["CB TEST REPORT", "Report Number: TW-1"]);
        assert_eq!(ex.pages[1].number, 3);
        assert!(ex.pages[1].paragraphs.is_empty());
        assert_eq!(ex.tables[0].cell(1, 1), Some("12V"));
    }

    #[test]
    fn test_parse_zip_result() {
        let mut w = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let opts = zip::write::SimpleFileOptions::default();
        w.start_file("structuredData.json", opts).unwrap();
        w.write_all(br#"{"elements":[{"Page":0,"Text":"Hello"}]}"#).unwrap();
        let bytes = w.finish().unwrap().into_inner();

        let ex = parse_result(&bytes).unwrap();
        assert_eq!(ex.raw_text, "Hello");
    }

    #[test]
    fn test_parse_result_rejects_garbage() {
        assert!(matches!(parse_result(b"PK\x03\x04junk"), Err(ExtractionError::MalformedResult(_))));
        assert!(matches!(parse_result(b"{\"no\": 1}"), Err(ExtractionError::MalformedResult(_))));
    }

    #[test]
    fn test_missing_credentials_not_configured() {
        let settings = AdobeSettings::default();
        assert!(matches!(
            AdobeExtractor::from_settings(&settings),
            Err(ExtractionError::NotConfigured(_))
        ));
    }
}

//! Application settings
//!
//! Read once at process start from an optional JSON file, then overlaid with
//! environment variables (environment takes precedence). The resulting value
//! is immutable and passed by reference into the pipeline.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Which extraction backend turns PDFs into text/tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExtractorBackend {
    #[default]
    Adobe,
    Local,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdobeSettings {
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default = "default_adobe_base_url")]
    pub base_url: String,
    #[serde(default = "default_adobe_ims_url")]
    pub ims_url: String,
    /// Give up polling an extract job after this many seconds
    #[serde(default = "default_extract_timeout")]
    pub extract_timeout_secs: u64,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AzureSettings {
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_deployment")]
    pub deployment: String,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Lower is more stable; extraction wants near-deterministic output
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Pages per structuring request
    #[serde(default = "default_chunk_pages")]
    pub chunk_pages: usize,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

/// Fixed facts about the issuing lab, printed on every report.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LabProfile {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub accreditation_no: String,
    #[serde(default = "default_lab_altitude")]
    pub altitude: String,
}

/// Values used when the source report does not provide them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReportDefaults {
    #[serde(default = "default_test_type")]
    pub test_type: String,
    #[serde(default = "default_cns_standard")]
    pub cns_standard: String,
    #[serde(default = "default_cns_standard_version")]
    pub cns_standard_version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_app_name")]
    pub app_name: String,
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Explicit template file; when unset the newest placeholder template in
    /// `template_dir` is used
    #[serde(default)]
    pub template_path: Option<PathBuf>,
    #[serde(default = "default_template_dir")]
    pub template_dir: PathBuf,
    #[serde(default = "default_max_pdf_size_mb")]
    pub max_pdf_size_mb: usize,
    #[serde(default)]
    pub extractor: ExtractorBackend,
    #[serde(default)]
    pub adobe: AdobeSettings,
    #[serde(default)]
    pub azure: AzureSettings,
    #[serde(default)]
    pub lab: LabProfile,
    #[serde(default)]
    pub defaults: ReportDefaults,
}

fn default_app_name() -> String {
    "CB to CNS Report Generator".to_string()
}

fn default_bind() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_template_dir() -> PathBuf {
    PathBuf::from("templates")
}

fn default_max_pdf_size_mb() -> usize {
    50
}

fn default_adobe_base_url() -> String {
    "https://pdf-services.adobe.io".to_string()
}

fn default_adobe_ims_url() -> String {
    "https://ims-na1.adobelogin.com/ims/token/v3".to_string()
}

fn default_extract_timeout() -> u64 {
    300
}

fn default_poll_interval() -> u64 {
    3
}

fn default_deployment() -> String {
    "gpt-4o".to_string()
}

fn default_api_version() -> String {
    "2024-12-01-preview".to_string()
}

fn default_max_tokens() -> u32 {
    16384
}

fn default_temperature() -> f32 {
    0.1
}

fn default_chunk_pages() -> usize {
    5
}

fn default_max_concurrent() -> usize {
    5
}

fn default_request_timeout() -> u64 {
    180
}

fn default_lab_altitude() -> String {
    "2000".to_string()
}

fn default_test_type() -> String {
    "型式試驗".to_string()
}

fn default_cns_standard() -> String {
    "CNS 15598-1".to_string()
}

fn default_cns_standard_version() -> String {
    "109年版".to_string()
}

impl Default for AdobeSettings {
    fn default() -> Self {
        Self {
            client_id: None,
            client_secret: None,
            base_url: default_adobe_base_url(),
            ims_url: default_adobe_ims_url(),
            extract_timeout_secs: default_extract_timeout(),
            poll_interval_secs: default_poll_interval(),
        }
    }
}

impl Default for AzureSettings {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key: None,
            deployment: default_deployment(),
            api_version: default_api_version(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            chunk_pages: default_chunk_pages(),
            max_concurrent: default_max_concurrent(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl Default for LabProfile {
    fn default() -> Self {
        Self {
            name: String::new(),
            address: String::new(),
            accreditation_no: String::new(),
            altitude: default_lab_altitude(),
        }
    }
}

impl Default for ReportDefaults {
    fn default() -> Self {
        Self {
            test_type: default_test_type(),
            cns_standard: default_cns_standard(),
            cns_standard_version: default_cns_standard_version(),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            app_name: default_app_name(),
            bind: default_bind(),
            template_path: None,
            template_dir: default_template_dir(),
            max_pdf_size_mb: default_max_pdf_size_mb(),
            extractor: ExtractorBackend::default(),
            adobe: AdobeSettings::default(),
            azure: AzureSettings::default(),
            lab: LabProfile::default(),
            defaults: ReportDefaults::default(),
        }
    }
}

impl Settings {
    /// Load settings from a JSON file (if given and present), then apply the
    /// process environment on top.
    pub fn load(path: Option<&Path>) -> Self {
        let mut settings = match path {
            Some(p) => Self::from_file(p),
            None => Self::default(),
        };
        settings.apply_env(|key| std::env::var(key).ok());
        settings
    }

    /// Read a settings file; a missing or unreadable file yields defaults.
    pub fn from_file(path: &Path) -> Self {
        if !path.exists() {
            return Settings::default();
        }
        match fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                tracing::warn!("Ignoring malformed settings file {}: {}", path.display(), e);
                Settings::default()
            }),
            Err(e) => {
                tracing::warn!("Could not read settings file {}: {}", path.display(), e);
                Settings::default()
            }
        }
    }

    /// Overlay values from an environment lookup. Empty values are ignored.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("APP_NAME") { self.app_name = v; }
        if let Some(v) = get("BIND") { self.bind = v; }
        if let Some(v) = get("PORT") { self.bind = format!("0.0.0.0:{}", v.trim()); }
        if let Some(v) = get("TEMPLATE_PATH") { self.template_path = Some(PathBuf::from(v)); }
        if let Some(v) = get("TEMPLATE_DIR") { self.template_dir = PathBuf::from(v); }
        if let Some(v) = get("MAX_PDF_SIZE_MB").and_then(|v| v.trim().parse().ok()) {
            self.max_pdf_size_mb = v;
        }
        if let Some(v) = get("EXTRACTOR") {
            match v.trim().to_lowercase().as_str() {
                "adobe" => self.extractor = ExtractorBackend::Adobe,
                "local" => self.extractor = ExtractorBackend::Local,
                other => tracing::warn!("Unknown EXTRACTOR '{}', keeping {:?}", other, self.extractor),
            }
        }

        if let Some(v) = get("ADOBE_CLIENT_ID") { self.adobe.client_id = Some(v); }
        if let Some(v) = get("ADOBE_CLIENT_SECRET") { self.adobe.client_secret = Some(v); }
        if let Some(v) = get("ADOBE_PDF_SERVICES_BASE_URL") { self.adobe.base_url = v; }

        if let Some(v) = get("AZURE_OPENAI_ENDPOINT") { self.azure.endpoint = Some(v); }
        if let Some(v) = get("AZURE_OPENAI_API_KEY") { self.azure.api_key = Some(v); }
        if let Some(v) = get("AZURE_OPENAI_DEPLOYMENT") { self.azure.deployment = v; }
        if let Some(v) = get("AZURE_OPENAI_API_VERSION") { self.azure.api_version = v; }
        if let Some(v) = get("LLM_MAX_TOKENS").and_then(|v| v.trim().parse().ok()) {
            self.azure.max_tokens = v;
        }
        if let Some(v) = get("LLM_TEMPERATURE").and_then(|v| v.trim().parse().ok()) {
            self.azure.temperature = v;
        }
        if let Some(v) = get("LLM_CHUNK_PAGES").and_then(|v| v.trim().parse().ok()) {
            self.azure.chunk_pages = v;
        }
        if let Some(v) = get("LLM_MAX_CONCURRENT").and_then(|v| v.trim().parse().ok()) {
            self.azure.max_concurrent = v;
        }

        if let Some(v) = get("LAB_NAME") { self.lab.name = v; }
        if let Some(v) = get("LAB_ADDRESS") { self.lab.address = v; }
        if let Some(v) = get("LAB_ACCREDITATION_NO") { self.lab.accreditation_no = v; }
        if let Some(v) = get("LAB_ALTITUDE") { self.lab.altitude = v; }
    }

    pub fn max_pdf_bytes(&self) -> usize {
        self.max_pdf_size_mb * 1024 * 1024
    }

    /// Pick the template to load: the explicit path, otherwise a `.docx` in
    /// `template_dir`, preferring `*.placeholder.docx` and skipping Word
    /// lock files (`~$...`).
    pub fn resolve_template_path(&self) -> Option<PathBuf> {
        if let Some(path) = &self.template_path {
            return Some(path.clone());
        }

        let entries = fs::read_dir(&self.template_dir).ok()?;
        let mut candidates: Vec<PathBuf> = entries
            .flatten()
            .map(|e| e.path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.ends_with(".docx") && !n.starts_with('~'))
                    .unwrap_or(false)
            })
            .collect();
        candidates.sort();

        candidates
            .iter()
            .find(|p| p.to_string_lossy().contains(".placeholder."))
            .or_else(|| candidates.first())
            .cloned()
    }
}

/// Default location of the settings file when none is given.
pub fn default_config_path() -> PathBuf {
    if let Ok(path) = std::env::var("CNS_REPORT_CONFIG") {
        if !path.is_empty() {
            return PathBuf::from(path);
        }
    }
    dirs::config_dir()
        .map(|p| p.join("cns-report").join("settings.json"))
        .unwrap_or_else(|| PathBuf::from("settings.json"))
}

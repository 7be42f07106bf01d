//! CB test report → CNS Word report generator
//!
//! Pipeline: extraction (PDF → text and tables) → structuring (LLM →
//! `ReportSchema`) → template fill (`.docx` with `{{placeholders}}`).
//! `http_server` exposes it over HTTP; the binaries wire settings and logging.

pub mod ai_client;
pub mod error;
pub mod extraction;
pub mod http_server;
pub mod pipeline;
pub mod schema;
pub mod settings;
pub mod structuring;
pub mod template;
pub mod utils;

//! CNS report server — HTTP API turning CB test report PDFs into CNS Word reports.
//!
//! Usage:
//!   AZURE_OPENAI_ENDPOINT=... AZURE_OPENAI_API_KEY=... \
//!   ADOBE_CLIENT_ID=... ADOBE_CLIENT_SECRET=... cns-report-server
//!
//! Or with args:
//!   cns-report-server --bind 0.0.0.0:8000 --template templates/cns.placeholder.docx

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use cns_report_lib::http_server::{router, AppState};
use cns_report_lib::pipeline::Pipeline;
use cns_report_lib::settings::{default_config_path, Settings};
use cns_report_lib::template::Template;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "cns-report-server")]
#[command(version, about = "CB test report to CNS report generator (HTTP API)", long_about = None)]
struct Args {
    /// Bind address (default: BIND env or 0.0.0.0:8000)
    #[arg(long)]
    bind: Option<String>,

    /// Settings file (default: CNS_REPORT_CONFIG or the user config dir)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Word template with placeholders (default: first .docx in the template dir)
    #[arg(long)]
    template: Option<PathBuf>,
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}

#[tokio::main]
async fn main() {
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let args = Args::parse();

    let config_path = args.config.unwrap_or_else(default_config_path);
    let mut settings = Settings::load(Some(&config_path));
    if let Some(bind) = args.bind {
        settings.bind = bind;
    }
    if let Some(template) = args.template {
        settings.template_path = Some(template);
    }

    let Some(template_path) = settings.resolve_template_path() else {
        tracing::error!(
            "No template found (set TEMPLATE_PATH or put a .docx in {})",
            settings.template_dir.display()
        );
        std::process::exit(1);
    };
    let template = match Template::open(&template_path) {
        Ok(t) => t,
        Err(e) => {
            tracing::error!("Failed to load template {}: {}", template_path.display(), e);
            std::process::exit(1);
        }
    };
    tracing::info!(
        template = %template_path.display(),
        placeholders = template.placeholders().count(),
        fingerprint = %template.fingerprint(),
        "Template loaded"
    );

    let pipeline = Arc::new(Pipeline::from_settings(&settings, Arc::new(template)));
    let app = router(AppState::new(pipeline, settings.app_name.clone()));

    let listener = match tokio::net::TcpListener::bind(&settings.bind).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!("Failed to bind to {}: {}", settings.bind, e);
            std::process::exit(1);
        }
    };

    tracing::info!("{} listening on {}", settings.app_name, settings.bind);
    if let Err(e) = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }
}

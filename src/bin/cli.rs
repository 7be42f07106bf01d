//! CNS report CLI - offline template tools
//!
//! Usage: cns-report-cli [OPTIONS] <COMMAND>
//!
//! Fill a template from a JSON record, list a template's placeholders, check
//! a generated report for leftovers, or print the sample record.

use std::fs;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use cns_report_lib::schema::{mock_schema, validate, ReportSchema};
use cns_report_lib::settings::{default_config_path, Settings};
use cns_report_lib::template::{fill_with, find_unresolved, FillContext, FillStats, Template};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "cns-report-cli")]
#[command(version, about = "CNS report template tools", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Settings file (lab profile and report defaults)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output as JSON for scripting
    #[arg(long, global = true)]
    json: bool,

    /// Detailed logging
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fill a template with a report record
    Fill {
        /// Word template with {{placeholders}}
        #[arg(long, short)]
        template: PathBuf,
        /// ReportSchema JSON (default: the sample record)
        #[arg(long, short)]
        data: Option<PathBuf>,
        /// Output .docx
        #[arg(long, short)]
        out: PathBuf,
    },
    /// List the placeholders in a template
    Placeholders {
        docx: PathBuf,
    },
    /// Check a filled report for unresolved placeholders
    Verify {
        docx: PathBuf,
    },
    /// Print the sample report record
    Sample {
        /// Write to a file instead of stdout
        #[arg(long, short)]
        out: Option<PathBuf>,
    },
}

fn load_record(path: Option<&Path>) -> Result<ReportSchema, String> {
    let Some(path) = path else {
        return Ok(mock_schema());
    };
    let text = fs::read_to_string(path).map_err(|e| format!("Failed to read {}: {}", path.display(), e))?;
    let raw: serde_json::Value =
        serde_json::from_str(&text).map_err(|e| format!("{} is not valid JSON: {}", path.display(), e))?;
    let validated = validate(&raw).map_err(|errors| {
        let lines: Vec<String> = errors.iter().map(|e| format!("  {}", e)).collect();
        format!("{} does not match the report schema:\n{}", path.display(), lines.join("\n"))
    })?;
    for notice in &validated.notices {
        eprintln!("Note: {}", notice);
    }
    Ok(validated.schema)
}

fn cmd_fill(template: &Path, data: Option<&Path>, out: &Path, ctx: &FillContext) -> Result<FillStats, String> {
    let template = Template::open(template).map_err(|e| e.to_string())?;
    let record = load_record(data)?;
    let filled = fill_with(&template, &record, ctx).map_err(|e| e.to_string())?;
    fs::write(out, &filled.bytes).map_err(|e| format!("Failed to write {}: {}", out.display(), e))?;
    Ok(filled.stats)
}

fn cmd_placeholders(docx: &Path) -> Result<Vec<String>, String> {
    let template = Template::open(docx).map_err(|e| e.to_string())?;
    Ok(template.placeholders().collect())
}

fn cmd_verify(docx: &Path) -> Result<Vec<String>, String> {
    let bytes = fs::read(docx).map_err(|e| format!("Failed to read {}: {}", docx.display(), e))?;
    let leftovers = find_unresolved(&bytes).map_err(|e| e.to_string())?;
    Ok(leftovers.collect())
}

fn print_names(names: &[String], json: bool) {
    if json {
        println!("{}", serde_json::json!({"count": names.len(), "placeholders": names}));
    } else {
        for name in names {
            println!("{}", name);
        }
    }
}

fn run_cli(cli: Cli) -> Result<(), String> {
    match cli.command {
        Commands::Fill { template, data, out } => {
            let config = cli.config.unwrap_or_else(default_config_path);
            let ctx = FillContext::from_settings(&Settings::load(Some(&config)));
            let stats = cmd_fill(&template, data.as_deref(), &out, &ctx)?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&stats).map_err(|e| e.to_string())?);
            } else {
                println!("Wrote {}", out.display());
                println!(
                    "  {} resolved, {} blank, {} glyphs checked, {} form checkboxes changed",
                    stats.resolved, stats.blanked, stats.glyphs_checked, stats.form_checkboxes_changed
                );
            }
            Ok(())
        }
        Commands::Placeholders { docx } => {
            let names = cmd_placeholders(&docx)?;
            print_names(&names, cli.json);
            if !cli.json {
                eprintln!("{} placeholder(s)", names.len());
            }
            Ok(())
        }
        Commands::Verify { docx } => {
            let leftovers = cmd_verify(&docx)?;
            if leftovers.is_empty() {
                if cli.json {
                    print_names(&leftovers, true);
                } else {
                    println!("OK: no unresolved placeholders");
                }
                return Ok(());
            }
            print_names(&leftovers, cli.json);
            Err(format!("{} unresolved placeholder(s) in {}", leftovers.len(), docx.display()))
        }
        Commands::Sample { out } => {
            let text = serde_json::to_string_pretty(&mock_schema()).map_err(|e| e.to_string())?;
            match out {
                Some(path) => {
                    fs::write(&path, text).map_err(|e| format!("Failed to write {}: {}", path.display(), e))?;
                    println!("Wrote {}", path.display());
                }
                None => println!("{}", text),
            }
            Ok(())
        }
    }
}

fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run_cli(cli) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

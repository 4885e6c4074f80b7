//! apiref CLI
//!
//! Command-line interface for scanning, indexing and checking API document references.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::json;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use url::Url;

use apiref::{check, extract_refs, load_file, FileStatus, IndexConfig, Rolodex, Severity};

#[derive(Parser)]
#[command(name = "apiref")]
#[command(about = "Scan, index and check $ref graphs in API documents")]
#[command(version)]
struct Cli {
    /// Log resolution progress to stderr (overridden by RUST_LOG)
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct LookupArgs {
    /// Allow references to remote (http/https) documents
    #[arg(long)]
    allow_remote: bool,

    /// Base URL for relative references when documents are served remotely
    #[arg(long)]
    base_url: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// List every $ref in a document without parsing it
    Refs {
        /// Document to scan
        file: PathBuf,

        /// Output results as JSON
        #[arg(long)]
        json: bool,
    },

    /// Index a document and its dependencies, then report references and cycles
    Index {
        /// Root document: file path or URL (http:// or https://)
        source: String,

        /// Output results as JSON
        #[arg(long)]
        json: bool,

        #[command(flatten)]
        lookup: LookupArgs,
    },

    /// Check documents for broken, malformed and circular references
    Check {
        /// File or directory to check
        path: PathBuf,

        /// Output format: text (default) or json
        #[arg(long, default_value = "text")]
        format: String,

        /// Treat warnings as errors
        #[arg(long)]
        strict: bool,

        /// Report every circular reference as a warning
        #[arg(long)]
        allow_circular: bool,

        /// Suppress progress output, only show errors
        #[arg(long, short)]
        quiet: bool,

        #[command(flatten)]
        lookup: LookupArgs,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match cli.command {
        Commands::Refs { file, json } => run_refs(&file, json),
        Commands::Index {
            source,
            json,
            lookup,
        } => build_config(&lookup).and_then(|config| run_index(&source, json, config)),
        Commands::Check {
            path,
            format,
            strict,
            allow_circular,
            quiet,
            lookup,
        } => build_config(&lookup).and_then(|config| {
            let config = config.allow_circular_references(allow_circular);
            run_check(&path, &format, strict, quiet, &config)
        }),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(code) => ExitCode::from(code),
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "apiref=debug" } else { "apiref=warn" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn build_config(args: &LookupArgs) -> Result<IndexConfig, u8> {
    let mut config = IndexConfig::open().allow_remote_references(args.allow_remote);
    if let Some(base) = &args.base_url {
        match Url::parse(base) {
            Ok(url) => config = config.base_url(url),
            Err(e) => {
                report_error(false, &format!("invalid base URL '{}': {}", base, e));
                return Err(2);
            }
        }
    }
    Ok(config)
}

/// Output an error message in plain text or JSON format.
fn report_error(json_output: bool, msg: &str) {
    if json_output {
        println!("{}", json!({ "ok": false, "error": msg }));
    } else {
        eprintln!("Error: {}", msg);
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<(), u8> {
    match serde_json::to_string_pretty(value) {
        Ok(text) => {
            println!("{}", text);
            Ok(())
        }
        Err(e) => {
            eprintln!("Error: cannot serialize output: {}", e);
            Err(2)
        }
    }
}

fn run_refs(file: &Path, json_output: bool) -> Result<(), u8> {
    let text = load_file(file).map_err(|e| {
        report_error(json_output, &e.to_string());
        e.exit_code() as u8
    })?;
    let refs = extract_refs(&text);

    if json_output {
        return print_json(&refs);
    }
    for found in &refs {
        println!("{:<6} {}", found.ref_type, found.location);
    }
    Ok(())
}

fn run_index(source: &str, json_output: bool, config: IndexConfig) -> Result<(), u8> {
    let rolodex = Rolodex::new(config);
    let index = rolodex.load_root(source).map_err(|e| {
        report_error(json_output, &e.to_string());
        e.exit_code() as u8
    })?;
    let cycles = rolodex.check_for_circular_references();
    let load_errors = rolodex.load_errors();

    if json_output {
        let references: Vec<_> = index
            .references()
            .iter()
            .map(|edge| {
                let at = edge.position();
                json!({
                    "source": edge.source,
                    "reference": edge.reference,
                    "type": edge.ref_type,
                    "line": at.line,
                    "column": at.column,
                })
            })
            .collect();
        let errors: Vec<String> = load_errors.iter().map(|e| e.to_string()).collect();
        return print_json(&json!({
            "location": index.location(),
            "documents": rolodex.indexes().len(),
            "references": references,
            "cycles": cycles,
            "load_errors": errors,
        }));
    }

    println!(
        "{}: {} references, {} documents",
        index.location(),
        index.references().len(),
        rolodex.indexes().len()
    );
    for edge in index.references() {
        let at = edge.position();
        println!(
            "  {}:{}  {} -> {} ({})",
            at.line, at.column, edge.source, edge.reference, edge.ref_type
        );
    }
    if !cycles.is_empty() {
        println!("\ncircular references:");
        for cycle in &cycles {
            let kind = if cycle.is_infinite_loop() {
                "infinite"
            } else {
                "tolerated"
            };
            println!(
                "  {} ({}, line {}, column {})",
                cycle.journey_path(),
                kind,
                cycle.line,
                cycle.column
            );
        }
    }
    for e in &load_errors {
        eprintln!("warning: {}", e);
    }
    Ok(())
}

fn run_check(
    path: &Path,
    format: &str,
    strict: bool,
    quiet: bool,
    config: &IndexConfig,
) -> Result<(), u8> {
    if !path.exists() {
        eprintln!("Error: path not found: {}", path.display());
        return Err(2);
    }

    let result = check(path, config, strict);

    if format == "json" {
        print_json(&result)?;
    } else {
        // Text output
        if !quiet {
            println!("Checking {} ...\n", path.display());
        }

        for file_result in &result.results {
            let status_icon = match file_result.status {
                FileStatus::Ok => "\x1b[32m✓\x1b[0m",
                FileStatus::Warning => "\x1b[33m⚠\x1b[0m",
                FileStatus::Error => "\x1b[31m✗\x1b[0m",
            };

            if !quiet || file_result.status != FileStatus::Ok {
                println!("  {} {}", status_icon, file_result.file.display());
            }

            for diag in &file_result.diagnostics {
                let (color, label) = match diag.severity {
                    Severity::Error => ("\x1b[31m", "error"),
                    Severity::Warning => ("\x1b[33m", "warning"),
                };
                if !quiet || diag.severity == Severity::Error {
                    println!(
                        "    {}{}[{}]\x1b[0m: {}:{} {} - {}",
                        color, label, diag.code, diag.line, diag.column, diag.path, diag.message
                    );
                }
            }
        }

        println!();
        if result.is_ok() && (!strict || result.warnings == 0) {
            println!(
                "\x1b[32m✓ {} files checked, all passed\x1b[0m",
                result.files_checked
            );
        } else {
            println!(
                "\x1b[31m✗ {} files checked: {} passed, {} failed ({} errors, {} warnings)\x1b[0m",
                result.files_checked, result.passed, result.failed, result.errors, result.warnings
            );
        }
    }

    if result.is_ok() && (!strict || result.warnings == 0) {
        Ok(())
    } else {
        Err(1)
    }
}

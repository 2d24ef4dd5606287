use std::fs;
use std::path::PathBuf;

use clap::Parser;
use macro_format::GestureCatalog;
use store_validator::{Severity, ValidationIssue};

#[derive(Parser, Debug)]
#[command(author, version, about = "Validate gesture macro stores and runtime settings", long_about = None)]
struct Cli {
    /// Path to the JSON store holding macros and bindings
    store: PathBuf,
    /// Optional runtime settings file (YAML) to validate as well
    #[arg(long)]
    settings: Option<PathBuf>,
}

fn main() {
    let cli = Cli::parse();
    let mut issues = Vec::new();

    let content = read_or_exit(&cli.store);
    match store_validator::parse_store_str(&content) {
        Ok(document) => issues.extend(store_validator::validate_store(
            &document,
            &GestureCatalog::builtin(),
            &content,
        )),
        Err(err) => {
            eprintln!("Validation failed for {}: {err}", cli.store.display());
            std::process::exit(1);
        }
    }

    if let Some(path) = &cli.settings {
        let content = read_or_exit(path);
        match store_validator::parse_settings_str(&content) {
            Ok(settings) => issues.extend(store_validator::validate_settings(&settings, &content)),
            Err(err) => {
                eprintln!("Validation failed for {}: {err}", path.display());
                std::process::exit(1);
            }
        }
    }

    if issues.is_empty() {
        println!("Validation OK: {}", cli.store.display());
        return;
    }

    eprintln!("Validation diagnostics:");
    print_issues(&issues);
    if issues.iter().any(|i| i.severity == Severity::Error) {
        std::process::exit(2);
    }
}

fn read_or_exit(path: &PathBuf) -> String {
    match fs::read_to_string(path) {
        Ok(c) => c,
        Err(err) => {
            eprintln!("Failed to read {}: {err}", path.display());
            std::process::exit(1);
        }
    }
}

fn print_issues(issues: &[ValidationIssue]) {
    for issue in issues {
        let level = issue.severity.label();
        if let Some(loc) = issue.location {
            eprintln!(
                "- [{}] {}: {} (line {}, column {})",
                level, issue.path, issue.message, loc.line, loc.column
            );
        } else {
            eprintln!("- [{}] {}: {}", level, issue.path, issue.message);
        }
    }
}

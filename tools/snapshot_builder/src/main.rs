use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use macro_format::GestureCatalog;
use snapshot_builder::{BuildError, build_from_path};
use store_validator::ValidationIssue;

#[derive(Parser, Debug)]
#[command(author, version, about = "Compile a macro store into a validated snapshot", long_about = None)]
struct Cli {
    /// Path to the JSON store holding macros and bindings
    store: PathBuf,
    /// Output snapshot path (defaults to the store path with .snapshot.json)
    #[arg(long)]
    out: Option<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let out_path = cli
        .out
        .clone()
        .unwrap_or_else(|| default_output_path(&cli.store));

    match build_from_path(&cli.store, &GestureCatalog::builtin()) {
        Ok(output) => {
            print_diagnostics(&output.diagnostics);
            let json = serde_json::to_string_pretty(&output.snapshot)
                .context("serializing snapshot")?;
            fs::write(&out_path, json)
                .with_context(|| format!("writing snapshot to {}", out_path.display()))?;
            println!(
                "Snapshot generated at {} ({} macros, {} bindings)",
                out_path.display(),
                output.snapshot.macros.len(),
                output.snapshot.bindings.len()
            );
            Ok(())
        }
        Err(BuildError::Validation(diags)) => {
            print_diagnostics(&diags);
            eprintln!("Snapshot build failed due to validation errors.");
            std::process::exit(2);
        }
        Err(err) => Err(err.into()),
    }
}

fn default_output_path(store_path: &Path) -> PathBuf {
    store_path.with_extension("snapshot.json")
}

fn print_diagnostics(diags: &[ValidationIssue]) {
    if diags.is_empty() {
        return;
    }
    eprintln!("Diagnostics:");
    for diag in diags {
        let level = diag.severity.label();
        if let Some(loc) = diag.location {
            eprintln!(
                "- [{}] {}: {} (line {}, column {})",
                level, diag.path, diag.message, loc.line, loc.column
            );
        } else {
            eprintln!("- [{}] {}: {}", level, diag.path, diag.message);
        }
    }
}

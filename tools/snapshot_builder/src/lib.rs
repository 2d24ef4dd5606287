use std::fs;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use macro_format::{GestureCatalog, SNAPSHOT_VERSION, SnapshotHeader, StoreSnapshot};
use store_validator::schema::StoreDocument;
use store_validator::{ConfigError, Severity, ValidationIssue, parse_store_str, validate_store};
use thiserror::Error;
use xxhash_rust::xxh3::xxh3_64;

#[derive(Debug)]
pub struct BuildOutput {
    pub snapshot: StoreSnapshot,
    pub diagnostics: Vec<ValidationIssue>,
}

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] ConfigError),
    #[error("Validation errors encountered")]
    Validation(Vec<ValidationIssue>),
}

/// Hash used to recognise an unchanged store document.
pub fn source_hash(content: &str) -> u64 {
    xxh3_64(content.as_bytes())
}

pub fn build_from_path(
    path: impl AsRef<Path>,
    catalog: &GestureCatalog,
) -> Result<BuildOutput, BuildError> {
    let content = fs::read_to_string(path.as_ref())?;
    build_from_str(&content, catalog)
}

pub fn build_from_str(content: &str, catalog: &GestureCatalog) -> Result<BuildOutput, BuildError> {
    let document = parse_store_str(content)?;
    build_from_document(document, catalog, content)
}

fn build_from_document(
    document: StoreDocument,
    catalog: &GestureCatalog,
    source: &str,
) -> Result<BuildOutput, BuildError> {
    let diagnostics = validate_store(&document, catalog, source);
    if diagnostics
        .iter()
        .any(|issue| matches!(issue.severity, Severity::Error))
    {
        return Err(BuildError::Validation(diagnostics));
    }

    let snapshot = assemble_snapshot(document, source);
    Ok(BuildOutput {
        snapshot,
        diagnostics,
    })
}

// Store order is kept as-is: the matcher breaks ties by insertion order.
fn assemble_snapshot(document: StoreDocument, source: &str) -> StoreSnapshot {
    let generated_at = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();

    StoreSnapshot {
        header: SnapshotHeader {
            version: SNAPSHOT_VERSION,
            source_hash: source_hash(source),
            generated_at,
        },
        bindings: document.mappings,
        macros: document.macros,
    }
}

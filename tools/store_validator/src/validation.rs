use std::collections::HashSet;

use macro_format::{Action, GestureCatalog};

use crate::schema::{Settings, StoreDocument};

#[derive(Debug, Clone, Copy)]
pub struct Location {
    pub line: usize,
    pub column: usize,
}

#[derive(Debug, Clone)]
pub struct ValidationIssue {
    pub path: String,
    pub message: String,
    pub location: Option<Location>,
    pub severity: Severity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl Severity {
    pub fn label(self) -> &'static str {
        match self {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Info => "info",
        }
    }
}

impl ValidationIssue {
    pub fn new(path: String, message: String, severity: Severity) -> Self {
        Self {
            path,
            message,
            location: None,
            severity,
        }
    }
}

pub fn validate_settings(settings: &Settings, source: &str) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();

    if settings.version != 1 {
        issues.push(ValidationIssue::new(
            "version".into(),
            format!("Unsupported settings version {} (expected 1)", settings.version),
            Severity::Error,
        ));
    }

    if settings.ingest.port == 0 {
        issues.push(ValidationIssue::new(
            "ingest.port".into(),
            "Ingest port must be a fixed, non-zero port".into(),
            Severity::Error,
        ));
    }

    if settings.ingest.host.trim().is_empty() {
        issues.push(ValidationIssue::new(
            "ingest.host".into(),
            "Ingest host must not be empty".into(),
            Severity::Error,
        ));
    }

    if settings.worker.program.trim().is_empty() {
        issues.push(ValidationIssue::new(
            "worker.program".into(),
            "Worker program must not be empty".into(),
            Severity::Error,
        ));
    }

    if settings.sequencer.inter_action_delay_ms == 0 {
        issues.push(ValidationIssue::new(
            "sequencer.inter_action_delay_ms".into(),
            "A zero inter-action delay may overwhelm the OS input layer".into(),
            Severity::Warning,
        ));
    }

    let notifications = &settings.notifications;
    if notifications.suppress_window_ms < notifications.auto_dismiss_ms {
        issues.push(ValidationIssue::new(
            "notifications.suppress_window_ms".into(),
            format!(
                "Suppression window ({} ms) is shorter than auto-dismiss ({} ms); alerts will be force-closed early",
                notifications.suppress_window_ms, notifications.auto_dismiss_ms
            ),
            Severity::Warning,
        ));
    }

    for issue in &mut issues {
        issue.location = find_key_location(source, &issue.path);
    }
    issues
}

pub fn validate_store(
    document: &StoreDocument,
    catalog: &GestureCatalog,
    source: &str,
) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();

    let mut macro_names = HashSet::new();
    for macro_def in &document.macros {
        let macro_path = format!("macros.{}", macro_def.name);

        if macro_def.name.trim().is_empty() {
            issues.push(ValidationIssue::new(
                macro_path.clone(),
                "Macro name must not be empty".into(),
                Severity::Error,
            ));
        }
        if !macro_names.insert(macro_def.name.as_str()) {
            issues.push(ValidationIssue::new(
                macro_path.clone(),
                format!("Duplicate macro name `{}`", macro_def.name),
                Severity::Error,
            ));
        }
        if macro_def.actions.is_empty() {
            issues.push(ValidationIssue::new(
                macro_path.clone(),
                "Macro has no actions and will do nothing".into(),
                Severity::Info,
            ));
        }

        for (idx, action) in macro_def.actions.iter().enumerate() {
            let action_path = format!("{macro_path}.actions[{idx}]");
            match action {
                Action::Unknown { tag, .. } => {
                    issues.push(ValidationIssue::new(
                        action_path,
                        format!("Unknown action type `{tag}` will be skipped"),
                        Severity::Warning,
                    ));
                }
                other if other.value().trim().is_empty() => {
                    issues.push(ValidationIssue::new(
                        action_path,
                        format!("Empty {} action will fail at run time", other.kind()),
                        Severity::Warning,
                    ));
                }
                _ => {}
            }
        }
    }

    let mut binding_names = HashSet::new();
    for binding in &document.mappings {
        let binding_path = format!("mappings.{}", binding.name);

        if binding.name.trim().is_empty() {
            issues.push(ValidationIssue::new(
                binding_path.clone(),
                "Binding name must not be empty".into(),
                Severity::Error,
            ));
        }
        if !binding_names.insert(binding.name.as_str()) {
            issues.push(ValidationIssue::new(
                binding_path.clone(),
                format!("Duplicate binding name `{}`", binding.name),
                Severity::Error,
            ));
        }
        if !binding.has_gesture() {
            issues.push(ValidationIssue::new(
                binding_path.clone(),
                "Binding must set a left or right gesture".into(),
                Severity::Error,
            ));
        }
        for gesture_id in [binding.left(), binding.right()].into_iter().flatten() {
            if !catalog.contains(gesture_id) {
                issues.push(ValidationIssue::new(
                    binding_path.clone(),
                    format!("References unknown gesture `{gesture_id}`"),
                    Severity::Warning,
                ));
            }
        }
        if !macro_names.contains(binding.macro_name.as_str()) {
            issues.push(ValidationIssue::new(
                binding_path.clone(),
                format!(
                    "References undefined macro `{}`; the binding will not run anything",
                    binding.macro_name
                ),
                Severity::Warning,
            ));
        }
    }

    for issue in &mut issues {
        issue.location = find_record_location(source, &issue.path);
    }
    issues
}

/// Locates a dotted YAML key path by its last segment.
fn find_key_location(source: &str, path: &str) -> Option<Location> {
    let needle = path.split('.').last()?;
    find_needle(source, needle)
}

/// Locates a store record by its quoted `name`.
fn find_record_location(source: &str, path: &str) -> Option<Location> {
    let name = path.splitn(2, '.').nth(1)?;
    let name = name.split(".actions[").next()?;
    find_needle(source, &format!("\"{name}\""))
}

fn find_needle(source: &str, needle: &str) -> Option<Location> {
    for (idx, line) in source.lines().enumerate() {
        if let Some(column) = line.find(needle) {
            return Some(Location {
                line: idx + 1,
                column: column + 1,
            });
        }
    }
    None
}

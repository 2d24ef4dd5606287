//! Action execution: key-combo injection, shell commands and script files.
//!
//! Every action is side-effecting and irreversible. Nothing here retries;
//! repeating an action is a macro-authoring decision.

pub mod keys;

use std::ffi::OsStr;
use std::path::Path;
use std::process::{Output, Stdio};
use std::sync::{Arc, Mutex};

use macro_format::{Action, ActionKind};
use thiserror::Error;
use tokio::process::Command;
use tokio::task;
use tracing::{debug, info, warn};

pub use keys::{parse_combo, Modifier, ParsedCombo};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ActionError {
    #[error("no key could be resolved from combo `{0}`")]
    NoKeyResolved(String),
    #[error("{kind} action failed: {reason}")]
    ActionFailed { kind: ActionKind, reason: String },
    #[error("{0} actions are not implemented")]
    NotImplemented(ActionKind),
}

impl ActionError {
    fn failed(kind: ActionKind, reason: impl Into<String>) -> Self {
        ActionError::ActionFailed {
            kind,
            reason: reason.into(),
        }
    }
}

#[async_trait::async_trait]
pub trait KeySender: Send + Sync {
    async fn send_combo(&self, combo: &ParsedCombo) -> Result<(), ActionError>;
}

/// Logs combos instead of injecting them. Keeps a history for inspection.
#[derive(Debug, Default)]
pub struct LoggingKeySender {
    sent: Mutex<Vec<ParsedCombo>>,
}

impl LoggingKeySender {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<ParsedCombo> {
        self.sent
            .lock()
            .map(|sent| sent.clone())
            .unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl KeySender for LoggingKeySender {
    async fn send_combo(&self, combo: &ParsedCombo) -> Result<(), ActionError> {
        info!(%combo, "key combo (not injected)");
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(combo.clone());
        }
        Ok(())
    }
}

pub struct EnigoKeySender;

impl EnigoKeySender {
    pub fn new() -> Self {
        Self
    }
}

impl Default for EnigoKeySender {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl KeySender for EnigoKeySender {
    async fn send_combo(&self, combo: &ParsedCombo) -> Result<(), ActionError> {
        let main = map_key(&combo.key).ok_or_else(|| {
            ActionError::failed(
                ActionKind::Keypress,
                format!("unsupported key `{}`", combo.key),
            )
        })?;
        let modifiers: Vec<enigo::Key> = combo.modifiers.iter().map(|m| modifier_key(*m)).collect();

        task::spawn_blocking(move || send_keys_blocking(modifiers, main))
            .await
            .map_err(|err| ActionError::failed(ActionKind::Keypress, err.to_string()))
    }
}

#[cfg(not(test))]
pub type DefaultKeySender = EnigoKeySender;

#[cfg(test)]
pub type DefaultKeySender = LoggingKeySender;

/// Runs one atomic action and reports how it went.
#[derive(Clone)]
pub struct ActionExecutor {
    key_sender: Arc<dyn KeySender>,
}

impl ActionExecutor {
    pub fn new(key_sender: Arc<dyn KeySender>) -> Self {
        Self { key_sender }
    }

    pub async fn execute(&self, action: &Action) -> Result<(), ActionError> {
        match action {
            Action::Keypress { combo } => {
                let parsed = parse_combo(combo)?;
                self.key_sender.send_combo(&parsed).await
            }
            Action::Command { text } => run_shell(text).await,
            Action::Script { path } => run_script(Path::new(path)).await,
            Action::Unknown { .. } => Err(ActionError::NotImplemented(ActionKind::Unknown)),
        }
    }
}

async fn run_shell(text: &str) -> Result<(), ActionError> {
    if text.trim().is_empty() {
        return Err(ActionError::failed(ActionKind::Command, "empty command"));
    }
    let mut command = shell_command(text);
    run_process(ActionKind::Command, &mut command).await
}

#[cfg(windows)]
fn shell_command(text: &str) -> Command {
    let mut command = Command::new("cmd");
    command.arg("/C").arg(text);
    command
}

#[cfg(not(windows))]
fn shell_command(text: &str) -> Command {
    let mut command = Command::new("sh");
    command.arg("-c").arg(text);
    command
}

async fn run_script(path: &Path) -> Result<(), ActionError> {
    if path.as_os_str().is_empty() {
        return Err(ActionError::failed(ActionKind::Script, "empty script path"));
    }
    let Some(mut command) = script_command(path) else {
        return Err(ActionError::NotImplemented(ActionKind::Script));
    };
    if let Some(dir) = path.parent().filter(|dir| dir.is_dir()) {
        command.current_dir(dir);
    }
    run_process(ActionKind::Script, &mut command).await
}

/// Picks the interpreter for a script by its extension.
fn script_command(path: &Path) -> Option<Command> {
    let extension = path
        .extension()
        .and_then(OsStr::to_str)
        .map(str::to_ascii_lowercase);
    let (program, leading): (&str, &[&str]) = match extension.as_deref() {
        Some("sh") => ("sh", &[]),
        Some("bash") => ("bash", &[]),
        Some("py") => ("python", &[]),
        Some("js") => ("node", &[]),
        Some("ps1") => ("powershell", &["-ExecutionPolicy", "Bypass", "-File"]),
        Some("bat") | Some("cmd") => ("cmd", &["/C"]),
        _ => return None,
    };
    let mut command = Command::new(program);
    command.args(leading).arg(path);
    Some(command)
}

async fn run_process(kind: ActionKind, command: &mut Command) -> Result<(), ActionError> {
    let output = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|err| ActionError::failed(kind, err.to_string()))?;
    log_output(kind, &output);

    if output.status.success() {
        Ok(())
    } else {
        warn!(%kind, status = %output.status, "process exited unsuccessfully");
        Err(ActionError::failed(
            kind,
            format!("exited with {}", output.status),
        ))
    }
}

// Output is captured for diagnostics only.
fn log_output(kind: ActionKind, output: &Output) {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stdout.trim().is_empty() {
        debug!(%kind, stdout = %stdout.trim_end(), "process stdout");
    }
    if !stderr.trim().is_empty() {
        debug!(%kind, stderr = %stderr.trim_end(), "process stderr");
    }
}

fn send_keys_blocking(modifiers: Vec<enigo::Key>, main: enigo::Key) {
    use enigo::{Enigo, KeyboardControllable};

    let mut enigo = Enigo::new();
    for key in &modifiers {
        enigo.key_down(key.clone());
    }
    enigo.key_click(main);
    for key in modifiers.into_iter().rev() {
        enigo.key_up(key);
    }
}

fn modifier_key(modifier: Modifier) -> enigo::Key {
    use enigo::Key;
    match modifier {
        Modifier::Ctrl => Key::Control,
        Modifier::Alt => Key::Alt,
        Modifier::Shift => Key::Shift,
        Modifier::Meta => Key::Meta,
    }
}

fn map_key(input: &str) -> Option<enigo::Key> {
    use enigo::Key;
    let key = match input {
        "enter" | "return" => Key::Return,
        "space" | "spacebar" => Key::Space,
        "tab" => Key::Tab,
        "esc" | "escape" => Key::Escape,
        "backspace" => Key::Backspace,
        "delete" | "del" => Key::Delete,
        "home" => Key::Home,
        "end" => Key::End,
        "pageup" | "pgup" => Key::PageUp,
        "pagedown" | "pgdn" => Key::PageDown,
        "up" | "arrowup" => Key::UpArrow,
        "down" | "arrowdown" => Key::DownArrow,
        "left" | "arrowleft" => Key::LeftArrow,
        "right" | "arrowright" => Key::RightArrow,
        "capslock" => Key::CapsLock,
        "f1" => Key::F1,
        "f2" => Key::F2,
        "f3" => Key::F3,
        "f4" => Key::F4,
        "f5" => Key::F5,
        "f6" => Key::F6,
        "f7" => Key::F7,
        "f8" => Key::F8,
        "f9" => Key::F9,
        "f10" => Key::F10,
        "f11" => Key::F11,
        "f12" => Key::F12,
        s => {
            let mut chars = s.chars();
            match (chars.next(), chars.next()) {
                (Some(ch), None) => Key::Layout(ch),
                _ => return None,
            }
        }
    };
    Some(key)
}

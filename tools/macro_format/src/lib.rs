//! Shared data model describing gestures, bindings, macros and the snapshot handed to the runtime.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Current snapshot format version.
pub const SNAPSHOT_VERSION: u32 = 1;

/// A recognised hand pose, independent of which hand produced it.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Gesture {
    pub id: String,
    pub display_name: String,
    pub display_symbol: String,
}

impl Gesture {
    pub fn new(id: &str, display_name: &str, display_symbol: &str) -> Self {
        Self {
            id: id.to_string(),
            display_name: display_name.to_string(),
            display_symbol: display_symbol.to_string(),
        }
    }
}

/// Static gesture catalog. Loaded once and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GestureCatalog {
    gestures: Vec<Gesture>,
}

impl GestureCatalog {
    pub fn new(gestures: Vec<Gesture>) -> Self {
        Self { gestures }
    }

    /// Poses the bundled recognition worker is trained on.
    pub fn builtin() -> Self {
        Self::new(vec![
            Gesture::new("open_hand", "Open Hand", "\u{270B}"),
            Gesture::new("fist", "Fist", "\u{270A}"),
            Gesture::new("thumbs_up", "Thumbs Up", "\u{1F44D}"),
            Gesture::new("peace", "Peace", "\u{270C}\u{FE0F}"),
        ])
    }

    pub fn get(&self, id: &str) -> Option<&Gesture> {
        self.gestures.iter().find(|gesture| gesture.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Gesture> {
        self.gestures.iter()
    }
}

impl Default for GestureCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

/// A user rule mapping one or two poses to a macro.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Binding {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub left_gesture_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub right_gesture_id: Option<String>,
    #[serde(rename = "macro")]
    pub macro_name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl Binding {
    /// Left gesture id, treating the store's empty string as unset.
    pub fn left(&self) -> Option<&str> {
        non_empty(&self.left_gesture_id)
    }

    pub fn right(&self) -> Option<&str> {
        non_empty(&self.right_gesture_id)
    }

    pub fn has_gesture(&self) -> bool {
        self.left().is_some() || self.right().is_some()
    }

    /// Pose-membership test: the worker does not report which hand produced a pose.
    pub fn involves(&self, gesture_id: &str) -> bool {
        self.left() == Some(gesture_id) || self.right() == Some(gesture_id)
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|id| !id.is_empty())
}

/// A named, ordered list of actions.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
pub struct Macro {
    pub name: String,
    #[serde(default)]
    pub actions: Vec<Action>,
}

/// One atomic effect. Stored as `{"type": ..., "value": ...}`.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
#[serde(from = "ActionRecord", into = "ActionRecord")]
pub enum Action {
    Keypress { combo: String },
    Command { text: String },
    Script { path: String },
    /// A record whose `type` this build does not know. Skipped at run time.
    Unknown { tag: String, value: String },
}

impl Action {
    pub fn kind(&self) -> ActionKind {
        match self {
            Action::Keypress { .. } => ActionKind::Keypress,
            Action::Command { .. } => ActionKind::Command,
            Action::Script { .. } => ActionKind::Script,
            Action::Unknown { .. } => ActionKind::Unknown,
        }
    }

    pub fn value(&self) -> &str {
        match self {
            Action::Keypress { combo } => combo,
            Action::Command { text } => text,
            Action::Script { path } => path,
            Action::Unknown { value, .. } => value,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Keypress,
    Command,
    Script,
    Unknown,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ActionKind::Keypress => "keypress",
            ActionKind::Command => "command",
            ActionKind::Script => "script",
            ActionKind::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
struct ActionRecord {
    #[serde(rename = "type")]
    tag: String,
    #[serde(default)]
    value: String,
}

impl From<ActionRecord> for Action {
    fn from(record: ActionRecord) -> Self {
        match record.tag.to_ascii_lowercase().as_str() {
            "keypress" => Action::Keypress {
                combo: record.value,
            },
            "command" => Action::Command { text: record.value },
            "script" => Action::Script { path: record.value },
            _ => Action::Unknown {
                tag: record.tag,
                value: record.value,
            },
        }
    }
}

impl From<Action> for ActionRecord {
    fn from(action: Action) -> Self {
        let (tag, value) = match action {
            Action::Keypress { combo } => ("keypress".to_string(), combo),
            Action::Command { text } => ("command".to_string(), text),
            Action::Script { path } => ("script".to_string(), path),
            Action::Unknown { tag, value } => (tag, value),
        };
        ActionRecord { tag, value }
    }
}

/// Header stored with every snapshot.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
pub struct SnapshotHeader {
    /// Snapshot format version (`SNAPSHOT_VERSION`).
    pub version: u32,
    /// Hash of the store document the snapshot was built from (xxh3).
    pub source_hash: u64,
    /// UNIX timestamp (seconds) when the snapshot was built.
    pub generated_at: u64,
}

/// Whole-collection view of the persisted bindings and macros, in store order.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
pub struct StoreSnapshot {
    pub header: SnapshotHeader,
    pub bindings: Vec<Binding>,
    pub macros: Vec<Macro>,
}

impl StoreSnapshot {
    pub fn empty() -> Self {
        Self {
            header: SnapshotHeader {
                version: SNAPSHOT_VERSION,
                source_hash: 0,
                generated_at: 0,
            },
            bindings: Vec::new(),
            macros: Vec::new(),
        }
    }

    pub fn macro_named(&self, name: &str) -> Option<&Macro> {
        self.macros.iter().find(|m| m.name == name)
    }
}

//! Drives a macro's actions in order with a fixed inter-action delay.
//!
//! Runs are not serialized against each other: every `run` owns its own
//! timer chain, so overlapping gestures produce overlapping executions.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use macro_format::{Action, ActionKind, Macro};
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::executor::{ActionError, ActionExecutor};

pub const DEFAULT_INTER_ACTION_DELAY: Duration = Duration::from_millis(500);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SequencerError {
    #[error("macro `{0}` not found")]
    MacroNotFound(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutcome {
    Completed,
    Failed(ActionError),
    Skipped,
}

#[derive(Debug, Clone)]
pub struct ActionLog {
    pub index: usize,
    pub kind: ActionKind,
    pub outcome: ActionOutcome,
    pub started_at: Instant,
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub macro_name: String,
    pub actions: Vec<ActionLog>,
}

impl RunReport {
    pub fn completed(&self) -> usize {
        self.count(|o| matches!(o, ActionOutcome::Completed))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, ActionOutcome::Failed(_)))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, ActionOutcome::Skipped))
    }

    fn count(&self, pred: impl Fn(&ActionOutcome) -> bool) -> usize {
        self.actions.iter().filter(|log| pred(&log.outcome)).count()
    }
}

type MacroTable = HashMap<String, Arc<Macro>>;

#[derive(Clone)]
pub struct MacroSequencer {
    macros: Arc<watch::Sender<Arc<MacroTable>>>,
    executor: ActionExecutor,
    delay: Duration,
}

impl MacroSequencer {
    pub fn new(executor: ActionExecutor, delay: Duration) -> Self {
        let (macros, _) = watch::channel(Arc::new(MacroTable::new()));
        Self {
            macros: Arc::new(macros),
            executor,
            delay,
        }
    }

    /// Replaces the macro snapshot wholesale. Runs already in flight keep the
    /// macro they started with.
    pub fn refresh(&self, macros: Vec<Macro>) {
        let table: MacroTable = macros
            .into_iter()
            .map(|m| (m.name.clone(), Arc::new(m)))
            .collect();
        debug!(count = table.len(), "macro snapshot replaced");
        self.macros.send_replace(Arc::new(table));
    }

    pub fn macro_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.macros.borrow().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn lookup(&self, name: &str) -> Result<Arc<Macro>, SequencerError> {
        self.macros
            .borrow()
            .get(name)
            .cloned()
            .ok_or_else(|| SequencerError::MacroNotFound(name.to_string()))
    }

    pub async fn run(&self, name: &str) -> Result<RunReport, SequencerError> {
        let macro_def = self.lookup(name)?;
        Ok(self.drive(&macro_def).await)
    }

    async fn drive(&self, macro_def: &Macro) -> RunReport {
        info!(macro_name = %macro_def.name, actions = macro_def.actions.len(), "running macro");
        let mut logs = Vec::with_capacity(macro_def.actions.len());

        for (index, action) in macro_def.actions.iter().enumerate() {
            // Skipped actions still hold their slot in the timer chain.
            if index > 0 {
                tokio::time::sleep(self.delay).await;
            }
            let started_at = Instant::now();
            let outcome = match action {
                Action::Unknown { tag, .. } => {
                    warn!(macro_name = %macro_def.name, index, tag = %tag, "skipping unknown action");
                    ActionOutcome::Skipped
                }
                _ => match self.executor.execute(action).await {
                    Ok(()) => ActionOutcome::Completed,
                    Err(err) => {
                        warn!(macro_name = %macro_def.name, index, error = %err, "action failed");
                        ActionOutcome::Failed(err)
                    }
                },
            };
            logs.push(ActionLog {
                index,
                kind: action.kind(),
                outcome,
                started_at,
            });
        }

        RunReport {
            macro_name: macro_def.name.clone(),
            actions: logs,
        }
    }
}

//! Resolves a detected pose to the enabled bindings that reference it.

use std::sync::Arc;

use macro_format::Binding;
use tokio::sync::watch;
use tracing::debug;

/// Result of matching one gesture against the current snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub gesture_id: String,
    pub matches: Vec<Binding>,
}

impl Resolution {
    /// The binding whose macro runs: first match in store order.
    pub fn triggering(&self) -> Option<&Binding> {
        self.matches.first()
    }

    pub fn binding_names(&self) -> Vec<String> {
        self.matches.iter().map(|b| b.name.clone()).collect()
    }
}

#[derive(Clone)]
pub struct BindingMatcher {
    bindings: Arc<watch::Sender<Arc<Vec<Binding>>>>,
}

impl BindingMatcher {
    pub fn new() -> Self {
        let (bindings, _) = watch::channel(Arc::new(Vec::new()));
        Self {
            bindings: Arc::new(bindings),
        }
    }

    /// Swaps in a new snapshot; resolutions already in progress keep the old one.
    pub fn refresh(&self, bindings: Vec<Binding>) {
        debug!(count = bindings.len(), "binding snapshot replaced");
        self.bindings.send_replace(Arc::new(bindings));
    }

    pub fn snapshot(&self) -> Arc<Vec<Binding>> {
        self.bindings.borrow().clone()
    }

    /// Every enabled binding with `gesture_id` as its left or right pose, in
    /// store order.
    pub fn resolve(&self, gesture_id: &str) -> Resolution {
        let snapshot = self.snapshot();
        let matches = snapshot
            .iter()
            .filter(|binding| binding.enabled)
            .filter(|binding| binding.involves(gesture_id))
            .cloned()
            .collect();
        Resolution {
            gesture_id: gesture_id.to_string(),
            matches,
        }
    }
}

impl Default for BindingMatcher {
    fn default() -> Self {
        Self::new()
    }
}

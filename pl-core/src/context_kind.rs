//! Identifiers for the two serial execution contexts.
//!
//! Every object read from the store is bound to the context it was loaded
//! in. Objects never cross contexts directly; their ids do, and the target
//! context re-fetches them.

use serde::{Deserialize, Serialize};

/// Which execution context owns a piece of work or a loaded object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextKind {
    /// The UI-facing context. Results handed to observers live here.
    Ui,
    /// The background context used for scans, sync and deletion.
    Sync,
}

impl ContextKind {
    /// Short label used in thread names and log fields.
    pub fn label(&self) -> &'static str {
        match self {
            ContextKind::Ui => "ui",
            ContextKind::Sync => "sync",
        }
    }
}

impl std::fmt::Display for ContextKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels() {
        assert_eq!(ContextKind::Ui.to_string(), "ui");
        assert_eq!(ContextKind::Sync.label(), "sync");
    }

    #[test]
    fn test_serde_snake_case() {
        let json = serde_json::to_string(&ContextKind::Sync).unwrap();
        assert_eq!(json, "\"sync\"");
    }
}

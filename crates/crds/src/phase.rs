//! Intent lifecycle phase
//!
//! Shared by every intent status. The finalizer only gates deletion; the
//! lifecycle itself is tracked here.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Lifecycle phase recorded in an intent's status
///
/// Serializes as PascalCase ("Pending", "Active", etc.) but deserializes
/// lowercase too, so hand-edited objects still parse.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub enum IntentPhase {
    /// Finalizer registered, nothing dispatched yet
    #[default]
    #[serde(alias = "pending")]
    Pending,

    /// Derived resources exist (or a capture is running)
    #[serde(alias = "active")]
    Active,

    /// Capture finished and its end time is recorded
    #[serde(alias = "completed")]
    Completed,

    /// A fatal error was recorded; waiting for a spec change
    #[serde(alias = "failed")]
    Failed,

    /// Deletion observed, owned resources being released
    #[serde(alias = "terminating")]
    Terminating,
}

impl IntentPhase {
    /// String form written into status patches
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentPhase::Pending => "Pending",
            IntentPhase::Active => "Active",
            IntentPhase::Completed => "Completed",
            IntentPhase::Failed => "Failed",
            IntentPhase::Terminating => "Terminating",
        }
    }
}

impl std::fmt::Display for IntentPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

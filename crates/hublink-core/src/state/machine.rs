//! Hub mode state machine.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Mode the hub's serial console is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceMode {
    /// Line-oriented REPL, not usable for structured requests.
    Interactive,
    /// JSON request/response mode.
    #[default]
    Structured,
}

impl fmt::Display for DeviceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceMode::Interactive => write!(f, "INTERACTIVE"),
            DeviceMode::Structured => write!(f, "STRUCTURED"),
        }
    }
}

/// Tracks the hub mode for one session.
///
/// The only transition is `Interactive -> Structured`; once structured the
/// hub stays structured for the rest of the session.
#[derive(Debug, Default)]
pub struct ModeMachine {
    mode: DeviceMode,
}

impl ModeMachine {
    pub fn new(initial: DeviceMode) -> Self {
        Self { mode: initial }
    }

    pub fn mode(&self) -> DeviceMode {
        self.mode
    }

    /// Whether a ready probe must run before the next structured request.
    pub fn needs_ready_probe(&self) -> bool {
        self.mode == DeviceMode::Interactive
    }

    /// Record that the hub acknowledged structured mode.
    ///
    /// Returns the previous mode when this was an actual transition.
    pub fn mark_structured(&mut self) -> Option<DeviceMode> {
        if self.mode == DeviceMode::Structured {
            return None;
        }
        let from = self.mode;
        tracing::info!(from = %from, to = %DeviceMode::Structured, "Mode transition");
        self.mode = DeviceMode::Structured;
        Some(from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_structured() {
        let machine = ModeMachine::default();
        assert_eq!(machine.mode(), DeviceMode::Structured);
        assert!(!machine.needs_ready_probe());
    }

    #[test]
    fn test_interactive_to_structured() {
        let mut machine = ModeMachine::new(DeviceMode::Interactive);
        assert!(machine.needs_ready_probe());

        assert_eq!(machine.mark_structured(), Some(DeviceMode::Interactive));
        assert_eq!(machine.mode(), DeviceMode::Structured);

        // Already structured: not a transition.
        assert_eq!(machine.mark_structured(), None);
    }

    #[test]
    fn test_mode_serde_names() {
        assert_eq!(
            serde_json::to_string(&DeviceMode::Interactive).unwrap(),
            "\"interactive\""
        );
        let mode: DeviceMode = serde_json::from_str("\"structured\"").unwrap();
        assert_eq!(mode, DeviceMode::Structured);
    }
}

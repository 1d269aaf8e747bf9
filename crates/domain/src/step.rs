//! Plan step vocabulary shared by Think, Act, and prompt assembly.

use serde::{Deserialize, Serialize};

/// What kind of work one plan step does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepType {
    Read,
    Analyze,
    Generate,
    Write,
}

impl StepType {
    pub fn as_str(self) -> &'static str {
        match self {
            StepType::Read => "read",
            StepType::Analyze => "analyze",
            StepType::Generate => "generate",
            StepType::Write => "write",
        }
    }

    /// Steps that touch the database through tool calls.
    pub fn uses_tools(self) -> bool {
        matches!(self, StepType::Read | StepType::Write)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_names_are_lowercase() {
        let t: StepType = serde_json::from_str("\"generate\"").unwrap();
        assert_eq!(t, StepType::Generate);
        assert_eq!(serde_json::to_string(&StepType::Write).unwrap(), "\"write\"");
    }

    #[test]
    fn only_read_and_write_use_tools() {
        assert!(StepType::Read.uses_tools());
        assert!(StepType::Write.uses_tools());
        assert!(!StepType::Analyze.uses_tools());
        assert!(!StepType::Generate.uses_tools());
    }
}

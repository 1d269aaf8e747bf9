//! Interaction modes and per-turn mode context.

use serde::{Deserialize, Serialize};

/// The three interaction modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Quick,
    #[default]
    Plan,
    Create,
}

/// Per-mode tuning. Defaults come from [`ModeSettings::for_mode`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModeSettings {
    pub max_steps: usize,
    pub skip_think: bool,
    pub proposal_required: bool,
    /// Reply verbosity hint passed into the reply prompt.
    pub verbosity: Verbosity,
    pub max_tool_calls_per_step: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verbosity {
    Terse,
    #[default]
    Normal,
    Detailed,
}

impl ModeSettings {
    pub fn for_mode(mode: Mode) -> Self {
        match mode {
            Mode::Quick => Self {
                max_steps: 2,
                skip_think: true,
                proposal_required: false,
                verbosity: Verbosity::Terse,
                max_tool_calls_per_step: 3,
            },
            Mode::Plan => Self {
                max_steps: 8,
                skip_think: false,
                proposal_required: false,
                verbosity: Verbosity::Normal,
                max_tool_calls_per_step: 3,
            },
            Mode::Create => Self {
                max_steps: 4,
                skip_think: false,
                proposal_required: true,
                verbosity: Verbosity::Detailed,
                max_tool_calls_per_step: 3,
            },
        }
    }
}

/// What a turn knows about its mode.
///
/// When `active_bypass_mode` names a handler the domain registered, the
/// pipeline is skipped entirely and the handler owns the turn.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModeContext {
    pub selected_mode: Mode,
    /// Sparse overrides on top of the mode defaults.
    #[serde(default)]
    pub override_params: OverrideParams,
    #[serde(default)]
    pub active_bypass_mode: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OverrideParams {
    #[serde(default)]
    pub max_steps: Option<usize>,
    #[serde(default)]
    pub max_tool_calls_per_step: Option<usize>,
}

impl ModeContext {
    pub fn new(mode: Mode) -> Self {
        Self {
            selected_mode: mode,
            ..Default::default()
        }
    }

    /// Mode defaults with overrides applied.
    pub fn settings(&self) -> ModeSettings {
        let mut s = ModeSettings::for_mode(self.selected_mode);
        if let Some(max_steps) = self.override_params.max_steps {
            s.max_steps = max_steps;
        }
        if let Some(cap) = self.override_params.max_tool_calls_per_step {
            s.max_tool_calls_per_step = cap;
        }
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quick_skips_think_with_two_steps() {
        let s = ModeSettings::for_mode(Mode::Quick);
        assert!(s.skip_think);
        assert_eq!(s.max_steps, 2);
        assert!(!s.proposal_required);
    }

    #[test]
    fn create_requires_proposal() {
        let s = ModeSettings::for_mode(Mode::Create);
        assert!(s.proposal_required);
        assert_eq!(s.max_steps, 4);
    }

    #[test]
    fn plan_is_the_default_mode() {
        assert_eq!(Mode::default(), Mode::Plan);
        assert_eq!(ModeSettings::for_mode(Mode::Plan).max_steps, 8);
    }

    #[test]
    fn overrides_win_over_defaults() {
        let mut ctx = ModeContext::new(Mode::Plan);
        ctx.override_params.max_steps = Some(2);
        assert_eq!(ctx.settings().max_steps, 2);
        assert_eq!(ctx.settings().max_tool_calls_per_step, 3);
    }
}

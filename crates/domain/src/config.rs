//! Engine configuration.
//!
//! Every knob has a default matching the engine's documented behavior, so
//! an empty TOML file (or `EngineConfig::default()`) is a working setup.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::mode::{Mode, ModeSettings};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EngineConfig {
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub act: ActConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub prompts: PromptConfig,
    /// Per-mode overrides; unlisted modes use [`ModeSettings::for_mode`].
    #[serde(default)]
    pub modes: HashMap<Mode, ModeSettings>,
}

impl EngineConfig {
    /// Settings for a mode, honoring any configured override.
    pub fn mode_settings(&self, mode: Mode) -> ModeSettings {
        self.modes
            .get(&mode)
            .cloned()
            .unwrap_or_else(|| ModeSettings::for_mode(mode))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Context assembly
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Turns kept at full text before folding into the history summary.
    #[serde(default = "d_full_detail_turns")]
    pub full_detail_turns: usize,
    /// Reasoning traces kept in full before folding.
    #[serde(default = "d_full_trace_turns")]
    pub full_trace_turns: usize,
    /// Token budget for condensed (Think/Router) context.
    #[serde(default = "d_condensed_budget")]
    pub condensed_token_budget: usize,
    /// Token budget for full (Act) context.
    #[serde(default = "d_full_budget")]
    pub full_token_budget: usize,
    /// Per-subdomain user-preference guidance cap, in characters.
    #[serde(default = "d_guidance_cap")]
    pub guidance_char_cap: usize,
    /// Recency window for the active entity tier, in turns.
    #[serde(default = "d_active_window")]
    pub active_window_turns: u64,
}

fn d_full_detail_turns() -> usize {
    3
}
fn d_full_trace_turns() -> usize {
    2
}
fn d_condensed_budget() -> usize {
    8_000
}
fn d_full_budget() -> usize {
    25_000
}
fn d_guidance_cap() -> usize {
    800
}
fn d_active_window() -> u64 {
    2
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            full_detail_turns: d_full_detail_turns(),
            full_trace_turns: d_full_trace_turns(),
            condensed_token_budget: d_condensed_budget(),
            full_token_budget: d_full_budget(),
            guidance_char_cap: d_guidance_cap(),
            active_window_turns: d_active_window(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Act loop
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActConfig {
    /// Hard cap on tool calls per step.
    #[serde(default = "d_max_tool_calls")]
    pub max_tool_calls_per_step: usize,
    /// Schema requests allowed per step.
    #[serde(default = "d_max_schema_requests")]
    pub max_schema_requests: usize,
    /// Empty reads of the same table before the step is force-completed.
    #[serde(default = "d_empty_read_breaker")]
    pub empty_read_breaker: usize,
}

fn d_max_tool_calls() -> usize {
    3
}
fn d_max_schema_requests() -> usize {
    2
}
fn d_empty_read_breaker() -> usize {
    2
}

impl Default for ActConfig {
    fn default() -> Self {
        Self {
            max_tool_calls_per_step: d_max_tool_calls(),
            max_schema_requests: d_max_schema_requests(),
            empty_read_breaker: d_empty_read_breaker(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LLM boundary
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Model id per complexity tier.
    #[serde(default = "d_tiers")]
    pub tiers: HashMap<String, String>,
    /// Retries on structured-output validation failure.
    #[serde(default = "d_max_retries")]
    pub max_retries: usize,
}

fn d_tiers() -> HashMap<String, String> {
    let mut m = HashMap::new();
    m.insert("low".into(), "fast-mini".into());
    m.insert("medium".into(), "standard".into());
    m.insert("high".into(), "frontier".into());
    m
}
fn d_max_retries() -> usize {
    2
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            tiers: d_tiers(),
            max_retries: d_max_retries(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Prompts
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PromptConfig {
    /// Directory holding node templates. `None` = built-ins only.
    #[serde(default)]
    pub template_dir: Option<PathBuf>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl EngineConfig {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if self.context.condensed_token_budget == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "context.condensed_token_budget".into(),
                message: "budget must be greater than 0".into(),
            });
        }
        if self.context.full_token_budget < self.context.condensed_token_budget {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                field: "context.full_token_budget".into(),
                message: "full budget is smaller than the condensed budget".into(),
            });
        }
        if self.act.max_tool_calls_per_step == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "act.max_tool_calls_per_step".into(),
                message: "must allow at least one tool call".into(),
            });
        }
        for (mode, settings) in &self.modes {
            if settings.max_steps == 0 {
                issues.push(ConfigIssue {
                    severity: ConfigSeverity::Error,
                    field: format!("modes.{mode:?}.max_steps"),
                    message: "must be at least 1".into(),
                });
            }
        }
        for tier in ["low", "medium", "high"] {
            if !self.llm.tiers.contains_key(tier) {
                issues.push(ConfigIssue {
                    severity: ConfigSeverity::Warning,
                    field: format!("llm.tiers.{tier}"),
                    message: "tier has no model configured".into(),
                });
            }
        }

        issues
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = EngineConfig::default();
        let errors: Vec<_> = config
            .validate()
            .into_iter()
            .filter(|i| i.severity == ConfigSeverity::Error)
            .collect();
        assert!(errors.is_empty(), "{errors:?}");
    }

    #[test]
    fn default_budgets() {
        let config = EngineConfig::default();
        assert_eq!(config.context.condensed_token_budget, 8_000);
        assert_eq!(config.context.full_token_budget, 25_000);
        assert_eq!(config.context.full_detail_turns, 3);
        assert_eq!(config.context.guidance_char_cap, 800);
    }

    #[test]
    fn zero_budget_is_an_error() {
        let mut config = EngineConfig::default();
        config.context.condensed_token_budget = 0;
        let issues = config.validate();
        assert!(issues
            .iter()
            .any(|i| i.field == "context.condensed_token_budget"
                && i.severity == ConfigSeverity::Error));
    }

    #[test]
    fn mode_override_wins() {
        let mut config = EngineConfig::default();
        let mut quick = ModeSettings::for_mode(Mode::Quick);
        quick.max_steps = 1;
        config.modes.insert(Mode::Quick, quick);
        assert_eq!(config.mode_settings(Mode::Quick).max_steps, 1);
        assert_eq!(config.mode_settings(Mode::Plan).max_steps, 8);
    }
}

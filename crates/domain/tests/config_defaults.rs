use alfred_domain::config::EngineConfig;
use alfred_domain::mode::Mode;

#[test]
fn empty_toml_yields_working_defaults() {
    let config: EngineConfig = toml::from_str("").unwrap();
    assert_eq!(config.context.full_detail_turns, 3);
    assert_eq!(config.act.max_tool_calls_per_step, 3);
    assert_eq!(config.llm.max_retries, 2);
    assert_eq!(config.mode_settings(Mode::Create).max_steps, 4);
}

#[test]
fn explicit_budget_parses() {
    let toml_str = r#"
[context]
condensed_token_budget = 4000
full_token_budget = 12000
"#;
    let config: EngineConfig = toml::from_str(toml_str).unwrap();
    assert_eq!(config.context.condensed_token_budget, 4000);
    assert_eq!(config.context.full_token_budget, 12000);
    // Untouched knobs keep their defaults.
    assert_eq!(config.context.guidance_char_cap, 800);
}

#[test]
fn mode_table_overrides_one_mode() {
    let toml_str = r#"
[modes.quick]
max_steps = 1
skip_think = true
proposal_required = false
verbosity = "terse"
max_tool_calls_per_step = 2
"#;
    let config: EngineConfig = toml::from_str(toml_str).unwrap();
    assert_eq!(config.mode_settings(Mode::Quick).max_steps, 1);
    assert_eq!(config.mode_settings(Mode::Quick).max_tool_calls_per_step, 2);
    assert_eq!(config.mode_settings(Mode::Plan).max_steps, 8);
}

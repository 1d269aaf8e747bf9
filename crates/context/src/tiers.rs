//! Entity tier classification and rendering.
//!
//! Which registered entities get rendered into prompts this turn:
//! generated artifacts awaiting a save, entities touched within the
//! recency window, and older entities Understand chose to retain.

use alfred_domain::contract::DomainConfig;
use alfred_domain::event::ActiveEntity;
use alfred_domain::refs::{ActionTag, DetailLevel};
use alfred_registry::SessionIdRegistry;

/// One rendered entity line.
#[derive(Debug, Clone)]
pub struct EntityLine {
    pub entity_ref: String,
    pub label: String,
    pub annotation: String,
}

/// The three rendered tiers, in prompt order.
#[derive(Debug, Clone, Default)]
pub struct EntityTierView {
    pub generated: Vec<EntityLine>,
    pub active: Vec<EntityLine>,
    pub retained: Vec<EntityLine>,
}

impl EntityTierView {
    /// All refs this view renders, for snapshot diffing.
    pub fn rendered_refs(&self) -> Vec<String> {
        self.generated
            .iter()
            .chain(&self.active)
            .chain(&self.retained)
            .map(|line| line.entity_ref.clone())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.generated.is_empty() && self.active.is_empty() && self.retained.is_empty()
    }

    /// The `<entity_context>` block body.
    pub fn render(&self, window: u64) -> String {
        let mut out = String::new();
        if !self.generated.is_empty() {
            out.push_str("Generated (NOT YET SAVED):\n");
            for line in &self.generated {
                out.push_str(&format!(
                    "  {} - {} {}\n",
                    line.entity_ref, line.label, line.annotation
                ));
            }
        }
        if !self.active.is_empty() {
            out.push_str(&format!("Active (last {window} turns):\n"));
            for line in &self.active {
                out.push_str(&format!(
                    "  {} - {} {}\n",
                    line.entity_ref, line.label, line.annotation
                ));
            }
        }
        if !self.retained.is_empty() {
            out.push_str("Long-Term (retained):\n");
            for line in &self.retained {
                out.push_str(&format!(
                    "  {} - {} {}\n",
                    line.entity_ref, line.label, line.annotation
                ));
            }
        }
        out
    }
}

/// Classify and annotate the registry's entities for prompt rendering.
pub fn render_entity_context(
    registry: &SessionIdRegistry,
    window: u64,
) -> EntityTierView {
    let (recent, retained) = registry.get_active_entities(window);
    let generated_refs = registry.generated_refs();

    let mut view = EntityTierView::default();

    for entity_ref in &generated_refs {
        view.generated.push(EntityLine {
            entity_ref: entity_ref.clone(),
            label: registry.label_of(entity_ref).unwrap_or(entity_ref).to_string(),
            annotation: "[needs save]".into(),
        });
    }

    for entity_ref in recent {
        // Generated artifacts already render in their own tier.
        if generated_refs.contains(&entity_ref) {
            continue;
        }
        let action = registry
            .action_of(&entity_ref)
            .map(ActionTag::as_str)
            .unwrap_or("read");
        let detail = match registry.detail_of(&entity_ref) {
            Some(entry) if entry.level == DetailLevel::Full => ":full",
            Some(_) => ":summary",
            None => "",
        };
        let turn = registry.turn_last_ref(&entity_ref).unwrap_or(0);
        view.active.push(EntityLine {
            label: registry
                .label_of(&entity_ref)
                .unwrap_or(&entity_ref)
                .to_string(),
            annotation: format!("[{action}{detail}] T{turn}"),
            entity_ref,
        });
    }

    for entity_ref in retained {
        let created = registry.turn_created(&entity_ref).unwrap_or(0);
        let reason = registry.active_reason(&entity_ref).unwrap_or("");
        view.retained.push(EntityLine {
            label: registry
                .label_of(&entity_ref)
                .unwrap_or(&entity_ref)
                .to_string(),
            annotation: format!("(turn {created}) \"{reason}\""),
            entity_ref,
        });
    }

    view
}

/// The `active_context` event payload for the current rendering.
pub fn render_active_entities(
    registry: &SessionIdRegistry,
    domain: &dyn DomainConfig,
    window: u64,
) -> Vec<ActiveEntity> {
    let view = render_entity_context(registry, window);
    view.rendered_refs()
        .into_iter()
        .filter_map(|entity_ref| {
            let label = registry.label_of(&entity_ref)?.to_string();
            let entity_type = registry.type_of(&entity_ref)?.to_string();
            let action = registry.action_of(&entity_ref)?.as_str().to_string();
            // Domains may veto rendering of an entity line entirely.
            if let Some(custom) = domain.format_entity_for_context(&entity_ref, &label, &action) {
                if custom.is_empty() {
                    return None;
                }
            }
            Some(ActiveEntity {
                entity_ref,
                entity_type,
                label,
                action,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const UUID_A: &str = "aaaaaaaa-aaaa-aaaa-aaaa-aaaaaaaaaaaa";
    const UUID_B: &str = "bbbbbbbb-bbbb-bbbb-bbbb-bbbbbbbbbbbb";

    fn registry() -> SessionIdRegistry {
        let mut r = SessionIdRegistry::new(1);
        r.advance_turn();
        r
    }

    #[test]
    fn generated_tier_renders_needs_save() {
        let mut reg = registry();
        reg.register_generated("thing", json!({"name": "Beta"}), "Beta".into(), 0);
        let view = render_entity_context(&reg, 2);
        assert_eq!(view.generated.len(), 1);
        let text = view.render(2);
        assert!(text.contains("gen_thing_1 - Beta [needs save]"));
    }

    #[test]
    fn active_tier_shows_action_detail_and_turn() {
        let mut reg = registry();
        reg.register_read(UUID_A, "thing", "Alpha".into(), Some(DetailLevel::Full));
        let view = render_entity_context(&reg, 2);
        let text = view.render(2);
        assert!(text.contains("thing_1 - Alpha [read:full] T1"));
    }

    #[test]
    fn retained_tier_quotes_the_reason() {
        let mut reg = registry();
        reg.register_read(UUID_A, "thing", "Old".into(), None);
        reg.advance_turn();
        reg.advance_turn();
        reg.advance_turn();
        reg.set_active_reason("thing_1", "ongoing goal");
        let view = render_entity_context(&reg, 2);
        assert!(view.active.is_empty());
        assert_eq!(view.retained.len(), 1);
        assert!(view.render(2).contains("\"ongoing goal\""));
    }

    #[test]
    fn generated_is_not_duplicated_into_active() {
        let mut reg = registry();
        reg.register_generated("thing", json!({"name": "Beta"}), "Beta".into(), 0);
        reg.register_read(UUID_B, "thing", "Alpha".into(), None);
        let view = render_entity_context(&reg, 2);
        assert_eq!(view.generated.len(), 1);
        assert_eq!(view.active.len(), 1);
        assert_eq!(view.active[0].entity_ref, "thing_1");
    }

    #[test]
    fn rendered_refs_cover_all_tiers() {
        let mut reg = registry();
        reg.register_generated("thing", json!({}), "G".into(), 0);
        reg.register_read(UUID_A, "thing", "A".into(), None);
        let view = render_entity_context(&reg, 2);
        let refs = view.rendered_refs();
        assert!(refs.contains(&"gen_thing_1".to_string()));
        assert!(refs.contains(&"thing_1".to_string()));
    }
}

//! The per-node fallback chain.

use std::path::Path;

use alfred_domain::contract::{DomainConfig, NodeKind};

use crate::cache::load_template;

/// Resolve a node's system prompt.
///
/// 1. A non-empty full replacement from the domain wins outright.
/// 2. Otherwise the built-in template is loaded and its placeholder
///    slots are filled from the domain's context hooks.
/// 3. A non-empty injection is appended either way.
///
/// Act's layered system prompt lives in [`crate::act_system_prompt`];
/// this function covers every other node.
pub fn node_system_prompt(
    domain: &dyn DomainConfig,
    node: NodeKind,
    template_dir: Option<&Path>,
) -> String {
    let mut prompt = match domain.node_prompt_content(node) {
        Some(full) if !full.is_empty() => full,
        _ => {
            let template = load_template(template_dir, node.as_str());
            substitute(&template, domain, node)
        }
    };

    if let Some(injection) = domain.node_prompt_injection(node) {
        if !injection.is_empty() {
            prompt.push_str("\n\n");
            prompt.push_str(&injection);
        }
    }

    prompt
}

fn substitute(template: &str, domain: &dyn DomainConfig, node: NodeKind) -> String {
    let domain_context = domain.node_domain_context(node).unwrap_or_default();
    let planning_guide = domain.think_planning_guide().unwrap_or_default();
    let subdomain_guide = domain.reply_subdomain_guide().unwrap_or_default();
    let router_injection = domain.router_prompt_injection().unwrap_or_default();

    template
        .replace("{domain_context}", &domain_context)
        .replace("{planning_guide}", &planning_guide)
        .replace("{subdomain_guide}", &subdomain_guide)
        .replace("{router_injection}", &router_injection)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alfred_testing::StubDomain;

    #[test]
    fn template_path_substitutes_domain_context() {
        let domain = StubDomain::new();
        let prompt = node_system_prompt(&domain, NodeKind::Think, None);
        // StubDomain supplies Think context but no full replacement.
        assert!(prompt.contains("Plan over the things subdomain."));
        assert!(prompt.contains("planner"));
        assert!(!prompt.contains("{domain_context}"));
    }

    #[test]
    fn empty_slots_vanish() {
        let domain = StubDomain::new();
        let prompt = node_system_prompt(&domain, NodeKind::Reply, None);
        assert!(!prompt.contains("{subdomain_guide}"));
        assert!(!prompt.contains("{domain_context}"));
    }

    #[test]
    fn full_replacement_wins() {
        struct Replacing(StubDomain);

        #[async_trait::async_trait]
        impl DomainConfig for Replacing {
            fn name(&self) -> &str {
                self.0.name()
            }
            fn entities(
                &self,
            ) -> &std::collections::HashMap<String, alfred_domain::entity::EntityDefinition>
            {
                self.0.entities()
            }
            fn subdomains(
                &self,
            ) -> &std::collections::HashMap<String, alfred_domain::entity::SubdomainDefinition>
            {
                self.0.subdomains()
            }
            fn entity_index(&self) -> &alfred_domain::entity::EntityIndex {
                self.0.entity_index()
            }
            fn user_owned_tables(&self) -> &std::collections::HashSet<String> {
                self.0.user_owned_tables()
            }
            fn uuid_fields(&self) -> &std::collections::HashSet<String> {
                self.0.uuid_fields()
            }
            fn fk_enrich_map(
                &self,
            ) -> &std::collections::HashMap<String, alfred_domain::contract::FkEnrichTarget>
            {
                self.0.fk_enrich_map()
            }
            fn system_prompt(&self) -> String {
                self.0.system_prompt()
            }
            fn node_prompt_content(&self, node: NodeKind) -> Option<String> {
                (node == NodeKind::Understand).then(|| "fully custom".to_string())
            }
            fn node_prompt_injection(&self, node: NodeKind) -> Option<String> {
                (node == NodeKind::Understand).then(|| "appended anyway".to_string())
            }
            async fn user_profile(&self, u: &str) -> alfred_domain::Result<String> {
                self.0.user_profile(u).await
            }
            async fn domain_snapshot(&self, u: &str) -> alfred_domain::Result<String> {
                self.0.domain_snapshot(u).await
            }
        }

        let domain = Replacing(StubDomain::new());
        let prompt = node_system_prompt(&domain, NodeKind::Understand, None);
        assert!(prompt.starts_with("fully custom"));
        assert!(prompt.ends_with("appended anyway"));
        assert!(!prompt.contains("memory manager"));
    }
}

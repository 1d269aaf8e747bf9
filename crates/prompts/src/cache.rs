//! The process-wide template cache.
//!
//! Templates come from the configured template directory when present,
//! otherwise from the built-ins. Each template is read at most once per
//! process; entries are pure strings and never invalidated (there is no
//! hot reload).

use std::collections::HashMap;
use std::path::Path;
use std::sync::OnceLock;

use parking_lot::RwLock;

use crate::templates;

static CACHE: OnceLock<RwLock<HashMap<String, String>>> = OnceLock::new();

fn cache() -> &'static RwLock<HashMap<String, String>> {
    CACHE.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Load a template by name (`"think"`, `"act_base"`, ...).
///
/// Lookup order: cache, then `{template_dir}/{name}.md`, then the
/// built-in. A directory read failure falls back to the built-in with a
/// warning; the result is cached either way.
pub fn load_template(template_dir: Option<&Path>, name: &str) -> String {
    let key = match template_dir {
        Some(dir) => format!("{}::{name}", dir.display()),
        None => format!("builtin::{name}"),
    };

    if let Some(cached) = cache().read().get(&key) {
        return cached.clone();
    }

    let content = template_dir
        .map(|dir| dir.join(format!("{name}.md")))
        .filter(|path| path.exists())
        .and_then(|path| match std::fs::read_to_string(&path) {
            Ok(text) => Some(text),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "template read failed; using built-in");
                None
            }
        })
        .unwrap_or_else(|| builtin(name).to_string());

    cache().write().insert(key, content.clone());
    content
}

fn builtin(name: &str) -> &'static str {
    match name {
        "understand" => templates::UNDERSTAND,
        "think" => templates::THINK,
        "act_base" => templates::ACT_BASE,
        "act_crud" => templates::ACT_CRUD,
        "act_step_read" => templates::ACT_STEP_READ,
        "act_step_write" => templates::ACT_STEP_WRITE,
        "act_step_analyze" => templates::ACT_STEP_ANALYZE,
        "act_step_generate" => templates::ACT_STEP_GENERATE,
        "act_quick" => templates::ACT_QUICK,
        "reply" => templates::REPLY,
        "summarize" => templates::SUMMARIZE,
        "router" => templates::ROUTER,
        other => {
            tracing::warn!(template = other, "unknown template name; using empty");
            ""
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn builtin_when_no_dir() {
        let text = load_template(None, "think");
        assert!(text.contains("planner"));
    }

    #[test]
    fn directory_overrides_builtin_and_caches() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reply.md");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "custom reply template").unwrap();

        let text = load_template(Some(dir.path()), "reply");
        assert!(text.contains("custom reply template"));

        // Deleting the file doesn't matter: the cache holds the entry.
        std::fs::remove_file(&path).unwrap();
        let again = load_template(Some(dir.path()), "reply");
        assert!(again.contains("custom reply template"));
    }

    #[test]
    fn missing_file_falls_back_to_builtin() {
        let dir = tempfile::tempdir().unwrap();
        let text = load_template(Some(dir.path()), "summarize");
        assert!(text.contains("compress"));
    }
}

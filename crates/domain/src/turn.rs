//! Turn inputs that arrive alongside the user message.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A frontend-initiated entity change reported with the turn.
///
/// Ingested into the registry before Understand runs, with the `:user`
/// action suffix. When `data` is present it is injected into the current
/// turn's step results so Act sees the fresh row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UiChange {
    pub entity_type: String,
    pub id: String,
    /// One of `created`, `updated`, `deleted`.
    pub action: String,
    pub label: String,
    #[serde(default)]
    pub data: Option<Value>,
}

/// An entity the user @-mentioned in the message text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MentionedEntity {
    pub label: String,
    pub entity_type: String,
    pub id: String,
}

/// Parse `@[Label](type:uuid)` mentions out of a user message.
///
/// Tolerant of any label text except `]`, and only accepts the UUID
/// shape on the id side so `@[x](y:z)` noise is ignored.
pub fn parse_mentions(message: &str) -> Vec<MentionedEntity> {
    static PATTERN: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
    let re = PATTERN.get_or_init(|| {
        regex::Regex::new(r"@\[([^\]]+)\]\(([a-z][a-z0-9_]*):([0-9a-fA-F-]{36})\)")
            .expect("mention pattern is valid")
    });

    re.captures_iter(message)
        .filter(|caps| crate::refs::is_uuid_shape(&caps[3]))
        .map(|caps| MentionedEntity {
            label: caps[1].to_string(),
            entity_type: caps[2].to_string(),
            id: caps[3].to_string(),
        })
        .collect()
}

//! Ref syntax and the action-tag taxonomy.
//!
//! A ref is the short human-readable identifier the engine hands to the
//! LLM in place of a database UUID: `recipe_1`, `gen_meal_plan_2`. The
//! detection heuristic here is a hard contract: the CRUD layer decides
//! whether to translate a value based on it.

use serde::{Deserialize, Serialize};

/// Sentinel UUID stored for a generated ref until it is promoted.
pub const PENDING_UUID: &str = "__pending__";

/// Prefix marking LLM-generated (not yet saved) refs.
pub const GEN_PREFIX: &str = "gen_";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Detection
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// True when `s` has the canonical UUID shape: 36 chars, exactly four `-`.
///
/// Anything matching this shape is never treated as a ref.
pub fn is_uuid_shape(s: &str) -> bool {
    s.len() == 36 && s.bytes().filter(|b| *b == b'-').count() == 4
}

/// True when `s` looks like a ref: contains `_`, the final
/// underscore-separated segment parses as a non-negative integer, and the
/// string does not have the UUID shape.
pub fn is_ref(s: &str) -> bool {
    if is_uuid_shape(s) {
        return false;
    }
    match s.rsplit_once('_') {
        Some((head, tail)) => !head.is_empty() && !tail.is_empty() && tail.bytes().all(|b| b.is_ascii_digit()),
        None => false,
    }
}

/// True when `s` is a generated ref (`gen_{type}_{n}`).
pub fn is_gen_ref(s: &str) -> bool {
    s.starts_with(GEN_PREFIX) && is_ref(s)
}

/// Build a database ref: `{type_name}_{n}`.
pub fn make_ref(type_name: &str, n: u64) -> String {
    format!("{type_name}_{n}")
}

/// Build a generated ref: `gen_{type_name}_{n}`.
pub fn make_gen_ref(type_name: &str, n: u64) -> String {
    format!("{GEN_PREFIX}{type_name}_{n}")
}

/// Extract the type name from a ref, stripping a `gen_` prefix and the
/// trailing counter. Returns `None` when `s` is not a ref.
pub fn ref_type_name(s: &str) -> Option<&str> {
    if !is_ref(s) {
        return None;
    }
    let body = s.strip_prefix(GEN_PREFIX).unwrap_or(s);
    body.rsplit_once('_').map(|(head, _)| head)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Action tags
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// How an entity entered (or last changed in) the registry.
///
/// The `:user` variants mark frontend-initiated changes reported through
/// UI-change ingestion rather than engine-executed CRUD.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionTag {
    #[serde(rename = "read")]
    Read,
    #[serde(rename = "created")]
    Created,
    #[serde(rename = "updated")]
    Updated,
    #[serde(rename = "deleted")]
    Deleted,
    #[serde(rename = "generated")]
    Generated,
    #[serde(rename = "linked")]
    Linked,
    #[serde(rename = "created:user")]
    CreatedUser,
    #[serde(rename = "updated:user")]
    UpdatedUser,
    #[serde(rename = "deleted:user")]
    DeletedUser,
    #[serde(rename = "mentioned:user")]
    MentionedUser,
}

impl ActionTag {
    /// The `:user` counterpart of a verb reported from the frontend.
    pub fn from_ui_verb(verb: &str) -> Option<ActionTag> {
        match verb {
            "created" => Some(ActionTag::CreatedUser),
            "updated" => Some(ActionTag::UpdatedUser),
            "deleted" => Some(ActionTag::DeletedUser),
            "mentioned" => Some(ActionTag::MentionedUser),
            _ => None,
        }
    }

    pub fn is_user_initiated(self) -> bool {
        matches!(
            self,
            ActionTag::CreatedUser
                | ActionTag::UpdatedUser
                | ActionTag::DeletedUser
                | ActionTag::MentionedUser
        )
    }

    /// Wire label, e.g. `"created:user"`.
    pub fn as_str(self) -> &'static str {
        match self {
            ActionTag::Read => "read",
            ActionTag::Created => "created",
            ActionTag::Updated => "updated",
            ActionTag::Deleted => "deleted",
            ActionTag::Generated => "generated",
            ActionTag::Linked => "linked",
            ActionTag::CreatedUser => "created:user",
            ActionTag::UpdatedUser => "updated:user",
            ActionTag::DeletedUser => "deleted:user",
            ActionTag::MentionedUser => "mentioned:user",
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Detail tracking
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Read depth recorded for entities whose type has detail tracking on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetailLevel {
    Summary,
    Full,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uuid_shape_is_not_a_ref() {
        assert!(is_uuid_shape("aaaaaaaa-aaaa-aaaa-aaaa-aaaaaaaaaaaa"));
        assert!(!is_ref("aaaaaaaa-aaaa-aaaa-aaaa-aaaaaaaaaaaa"));
    }

    #[test]
    fn plain_refs_detected() {
        assert!(is_ref("recipe_1"));
        assert!(is_ref("meal_plan_12"));
        assert!(is_ref("gen_recipe_3"));
        assert!(!is_ref("recipe"));
        assert!(!is_ref("recipe_"));
        assert!(!is_ref("_1"));
        assert!(!is_ref("recipe_one"));
    }

    #[test]
    fn gen_ref_detection() {
        assert!(is_gen_ref("gen_recipe_1"));
        assert!(!is_gen_ref("recipe_1"));
        assert!(!is_gen_ref("gen_"));
    }

    #[test]
    fn type_name_extraction() {
        assert_eq!(ref_type_name("recipe_1"), Some("recipe"));
        assert_eq!(ref_type_name("meal_plan_7"), Some("meal_plan"));
        assert_eq!(ref_type_name("gen_meal_plan_7"), Some("meal_plan"));
        assert_eq!(ref_type_name("not a ref"), None);
    }

    #[test]
    fn ui_verbs_map_to_user_tags() {
        assert_eq!(ActionTag::from_ui_verb("created"), Some(ActionTag::CreatedUser));
        assert_eq!(ActionTag::from_ui_verb("deleted"), Some(ActionTag::DeletedUser));
        assert_eq!(ActionTag::from_ui_verb("promoted"), None);
        assert!(ActionTag::MentionedUser.is_user_initiated());
        assert!(!ActionTag::Created.is_user_initiated());
    }

    #[test]
    fn action_tag_round_trips_through_serde() {
        let json = serde_json::to_string(&ActionTag::CreatedUser).unwrap();
        assert_eq!(json, "\"created:user\"");
        let back: ActionTag = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ActionTag::CreatedUser);
    }
}

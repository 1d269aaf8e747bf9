//! Registry state and entity lifecycles.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use alfred_domain::contract::DomainConfig;
use alfred_domain::error::{Error, Result};
use alfred_domain::refs::{
    is_gen_ref, make_gen_ref, make_ref, ActionTag, DetailLevel, PENDING_UUID,
};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Entry types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Detail level recorded for a ref whose type has detail tracking on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetailEntry {
    pub level: DetailLevel,
    /// Turn on which the entity was last read at full detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_turn: Option<u64>,
}

/// One queued FK name lookup: fetch `name_column` from `table` for `uuid`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrichRequest {
    pub table: String,
    pub name_column: String,
    pub uuid: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Per-session store mapping refs ↔ UUIDs with all surrounding metadata.
///
/// Invariants maintained by every operation:
/// - `ref_to_uuid` / `uuid_to_ref` are inverse bijections, except that
///   refs awaiting promotion map to the `__pending__` sentinel (which is
///   never a key of `uuid_to_ref`).
/// - every ref in `ref_to_uuid` has a type and an action.
/// - a `gen_*` ref's action is only ever `generated` or `created`, and
///   promotion is the only way its UUID leaves the sentinel.
/// - counters never decrease; removing a ref leaves them alone.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionIdRegistry {
    #[serde(default)]
    pub session_id: u64,
    #[serde(default)]
    current_turn: u64,

    #[serde(default)]
    ref_to_uuid: HashMap<String, String>,
    #[serde(default)]
    uuid_to_ref: HashMap<String, String>,

    #[serde(default)]
    counters: HashMap<String, u64>,
    #[serde(default)]
    gen_counters: HashMap<String, u64>,

    #[serde(default)]
    pending_artifacts: HashMap<String, Value>,

    #[serde(default)]
    ref_actions: HashMap<String, ActionTag>,
    #[serde(default)]
    ref_labels: HashMap<String, String>,
    #[serde(default)]
    ref_types: HashMap<String, String>,
    #[serde(default)]
    ref_detail_tracking: HashMap<String, DetailEntry>,

    #[serde(default)]
    ref_turn_created: HashMap<String, u64>,
    #[serde(default)]
    ref_turn_last_ref: HashMap<String, u64>,
    #[serde(default)]
    ref_source_step: HashMap<String, usize>,
    #[serde(default)]
    ref_turn_promoted: HashMap<String, u64>,

    /// Set by Understand to retain an entity past the recency window.
    #[serde(default)]
    ref_active_reason: HashMap<String, String>,

    // Transient: never serialized.
    #[serde(skip)]
    lazy_enrich_queue: HashMap<String, EnrichRequest>,
    #[serde(skip)]
    last_snapshot_refs: HashSet<String>,
}

impl SessionIdRegistry {
    pub fn new(session_id: u64) -> Self {
        Self {
            session_id,
            ..Default::default()
        }
    }

    // ── Turn bookkeeping ───────────────────────────────────────────

    pub fn current_turn(&self) -> u64 {
        self.current_turn
    }

    /// Enter the next turn. `current_turn` only ever increases.
    pub fn advance_turn(&mut self) -> u64 {
        self.current_turn += 1;
        self.current_turn
    }

    // ── Lookup ─────────────────────────────────────────────────────

    pub fn uuid_for(&self, entity_ref: &str) -> Option<&str> {
        self.ref_to_uuid.get(entity_ref).map(String::as_str)
    }

    pub fn ref_for_uuid(&self, uuid: &str) -> Option<&str> {
        self.uuid_to_ref.get(uuid).map(String::as_str)
    }

    pub fn contains_ref(&self, entity_ref: &str) -> bool {
        self.ref_to_uuid.contains_key(entity_ref)
    }

    pub fn action_of(&self, entity_ref: &str) -> Option<ActionTag> {
        self.ref_actions.get(entity_ref).copied()
    }

    pub fn label_of(&self, entity_ref: &str) -> Option<&str> {
        self.ref_labels.get(entity_ref).map(String::as_str)
    }

    pub fn type_of(&self, entity_ref: &str) -> Option<&str> {
        self.ref_types.get(entity_ref).map(String::as_str)
    }

    pub fn detail_of(&self, entity_ref: &str) -> Option<DetailEntry> {
        self.ref_detail_tracking.get(entity_ref).copied()
    }

    pub fn turn_last_ref(&self, entity_ref: &str) -> Option<u64> {
        self.ref_turn_last_ref.get(entity_ref).copied()
    }

    pub fn turn_created(&self, entity_ref: &str) -> Option<u64> {
        self.ref_turn_created.get(entity_ref).copied()
    }

    pub fn active_reason(&self, entity_ref: &str) -> Option<&str> {
        self.ref_active_reason.get(entity_ref).map(String::as_str)
    }

    /// Full generated content for a `gen_*` ref, if retained.
    pub fn get_entity_data(&self, entity_ref: &str) -> Option<&Value> {
        self.pending_artifacts.get(entity_ref)
    }

    /// True when the ref's recorded UUID is still the pending sentinel.
    pub fn is_pending(&self, entity_ref: &str) -> bool {
        self.uuid_for(entity_ref) == Some(PENDING_UUID)
    }

    /// All refs currently mapped, in no particular order.
    pub fn all_refs(&self) -> impl Iterator<Item = &str> {
        self.ref_to_uuid.keys().map(String::as_str)
    }

    pub fn counter(&self, type_name: &str) -> u64 {
        self.counters.get(type_name).copied().unwrap_or(0)
    }

    pub fn gen_counter(&self, type_name: &str) -> u64 {
        self.gen_counters.get(type_name).copied().unwrap_or(0)
    }

    // ── Lifecycle: database read ───────────────────────────────────

    /// Register (or refresh) an entity returned by a database read.
    ///
    /// Reuses the existing ref for a known UUID; otherwise allocates
    /// `{type}_{n}`. Reads never flip a `gen_*` ref's action.
    pub fn register_read(
        &mut self,
        uuid: &str,
        type_name: &str,
        label: String,
        detail: Option<DetailLevel>,
    ) -> String {
        let entity_ref = match self.uuid_to_ref.get(uuid) {
            Some(existing) => existing.clone(),
            None => {
                let n = self.bump_counter(type_name);
                let r = make_ref(type_name, n);
                self.ref_to_uuid.insert(r.clone(), uuid.to_string());
                self.uuid_to_ref.insert(uuid.to_string(), r.clone());
                self.ref_types.insert(r.clone(), type_name.to_string());
                self.ref_turn_created.insert(r.clone(), self.current_turn);
                r
            }
        };

        if !is_gen_ref(&entity_ref) {
            self.ref_actions.insert(entity_ref.clone(), ActionTag::Read);
        }
        self.ref_labels.insert(entity_ref.clone(), label);
        self.touch(&entity_ref);
        if let Some(level) = detail {
            self.record_detail(&entity_ref, level);
        }
        entity_ref
    }

    // ── Lifecycle: LLM generation ──────────────────────────────────

    /// Register LLM-generated content under a fresh `gen_*` ref with the
    /// pending sentinel UUID. Content is retained across turns until the
    /// artifact is promoted or dropped.
    pub fn register_generated(
        &mut self,
        type_name: &str,
        content: Value,
        label: String,
        step_index: usize,
    ) -> String {
        let n = self.bump_gen_counter(type_name);
        let entity_ref = make_gen_ref(type_name, n);

        self.ref_to_uuid
            .insert(entity_ref.clone(), PENDING_UUID.to_string());
        self.ref_types
            .insert(entity_ref.clone(), type_name.to_string());
        self.ref_actions
            .insert(entity_ref.clone(), ActionTag::Generated);
        self.ref_labels.insert(entity_ref.clone(), label);
        self.pending_artifacts.insert(entity_ref.clone(), content);
        self.ref_turn_created
            .insert(entity_ref.clone(), self.current_turn);
        self.ref_source_step.insert(entity_ref.clone(), step_index);
        self.touch(&entity_ref);

        tracing::debug!(entity_ref = %entity_ref, type_name, "registered generated artifact");
        entity_ref
    }

    // ── Lifecycle: database create / promotion ─────────────────────

    /// Register a row the engine just created.
    ///
    /// Promotion rules: an explicit `gen_*` ref hint wins; otherwise a
    /// unique pending artifact of the same type with a matching label is
    /// promoted. Zero or multiple matches allocate a fresh ref. The ref
    /// itself never changes across promotion.
    pub fn register_created(
        &mut self,
        ref_hint: Option<&str>,
        uuid: &str,
        type_name: &str,
        label: String,
    ) -> String {
        if let Some(hint) = ref_hint {
            if is_gen_ref(hint) && self.contains_ref(hint) {
                return self.promote(hint, uuid, label);
            }
        }

        let candidates: Vec<String> = self
            .pending_artifacts
            .keys()
            .filter(|r| {
                self.ref_types.get(*r).map(String::as_str) == Some(type_name)
                    && self.ref_actions.get(*r) == Some(&ActionTag::Generated)
                    && self.ref_labels.get(*r).map(String::as_str) == Some(label.as_str())
            })
            .cloned()
            .collect();

        if candidates.len() == 1 {
            return self.promote(&candidates[0], uuid, label);
        }

        let n = self.bump_counter(type_name);
        let entity_ref = make_ref(type_name, n);
        self.ref_to_uuid.insert(entity_ref.clone(), uuid.to_string());
        self.uuid_to_ref.insert(uuid.to_string(), entity_ref.clone());
        self.ref_types
            .insert(entity_ref.clone(), type_name.to_string());
        self.ref_actions
            .insert(entity_ref.clone(), ActionTag::Created);
        self.ref_labels.insert(entity_ref.clone(), label);
        self.ref_turn_created
            .insert(entity_ref.clone(), self.current_turn);
        self.touch(&entity_ref);
        entity_ref
    }

    fn promote(&mut self, entity_ref: &str, uuid: &str, label: String) -> String {
        self.ref_to_uuid
            .insert(entity_ref.to_string(), uuid.to_string());
        self.uuid_to_ref
            .insert(uuid.to_string(), entity_ref.to_string());
        self.ref_actions
            .insert(entity_ref.to_string(), ActionTag::Created);
        self.ref_turn_promoted
            .insert(entity_ref.to_string(), self.current_turn);
        self.ref_labels.insert(entity_ref.to_string(), label);
        self.touch(entity_ref);
        tracing::debug!(entity_ref, uuid, "promoted pending artifact");
        entity_ref.to_string()
    }

    // ── Lifecycle: update / delete ─────────────────────────────────

    /// Mark an existing entity updated. Unknown UUIDs are ignored (the
    /// read that surfaces them will register them).
    pub fn register_updated(&mut self, uuid: &str, label: Option<String>) -> Option<String> {
        let entity_ref = self.uuid_to_ref.get(uuid)?.clone();
        self.ref_actions
            .insert(entity_ref.clone(), ActionTag::Updated);
        if let Some(label) = label {
            self.ref_labels.insert(entity_ref.clone(), label);
        }
        self.touch(&entity_ref);
        Some(entity_ref)
    }

    /// Drop the mapping and label for a deleted row. Counters are left
    /// alone so the ref number is never reused.
    pub fn register_deleted(&mut self, uuid: &str) -> Option<String> {
        let entity_ref = self.uuid_to_ref.get(uuid)?.clone();
        self.remove_ref(&entity_ref);
        Some(entity_ref)
    }

    /// Remove a ref and all its metadata. Counters are untouched.
    pub fn remove_ref(&mut self, entity_ref: &str) {
        if let Some(uuid) = self.ref_to_uuid.remove(entity_ref) {
            self.uuid_to_ref.remove(&uuid);
        }
        self.ref_labels.remove(entity_ref);
        self.ref_types.remove(entity_ref);
        self.ref_actions.remove(entity_ref);
        self.ref_detail_tracking.remove(entity_ref);
        self.ref_turn_created.remove(entity_ref);
        self.ref_turn_last_ref.remove(entity_ref);
        self.ref_source_step.remove(entity_ref);
        self.ref_turn_promoted.remove(entity_ref);
        self.ref_active_reason.remove(entity_ref);
        self.pending_artifacts.remove(entity_ref);
        self.lazy_enrich_queue.remove(entity_ref);
    }

    // ── Lifecycle: UI reports ──────────────────────────────────────

    /// Register a frontend-initiated change with the `:user` action
    /// suffix. Delete verbs drop the mapping like an engine delete.
    pub fn register_from_ui(
        &mut self,
        uuid: &str,
        type_name: &str,
        label: String,
        action: ActionTag,
    ) -> Result<String> {
        if !action.is_user_initiated() {
            return Err(Error::Other(format!(
                "register_from_ui requires a :user action, got {}",
                action.as_str()
            )));
        }

        if action == ActionTag::DeletedUser {
            if let Some(r) = self.uuid_to_ref.get(uuid).cloned() {
                self.remove_ref(&r);
                return Ok(r);
            }
        }

        let entity_ref = match self.uuid_to_ref.get(uuid) {
            Some(existing) => existing.clone(),
            None => {
                let n = self.bump_counter(type_name);
                let r = make_ref(type_name, n);
                self.ref_to_uuid.insert(r.clone(), uuid.to_string());
                self.uuid_to_ref.insert(uuid.to_string(), r.clone());
                self.ref_types.insert(r.clone(), type_name.to_string());
                self.ref_turn_created.insert(r.clone(), self.current_turn);
                r
            }
        };

        if action != ActionTag::DeletedUser {
            self.ref_actions.insert(entity_ref.clone(), action);
            self.ref_labels.insert(entity_ref.clone(), label);
            self.touch(&entity_ref);
        }
        Ok(entity_ref)
    }

    // ── Lifecycle: lazy FK registration ────────────────────────────

    /// Allocate a `linked` ref for an unknown FK UUID and queue it for
    /// batch name enrichment. Reuses the existing ref for known UUIDs.
    pub fn register_linked(
        &mut self,
        uuid: &str,
        type_name: &str,
        table: &str,
        name_column: &str,
    ) -> String {
        if let Some(existing) = self.uuid_to_ref.get(uuid) {
            return existing.clone();
        }

        let n = self.bump_counter(type_name);
        let entity_ref = make_ref(type_name, n);
        self.ref_to_uuid.insert(entity_ref.clone(), uuid.to_string());
        self.uuid_to_ref.insert(uuid.to_string(), entity_ref.clone());
        self.ref_types
            .insert(entity_ref.clone(), type_name.to_string());
        self.ref_actions
            .insert(entity_ref.clone(), ActionTag::Linked);
        // Placeholder label until enrichment lands.
        self.ref_labels.insert(entity_ref.clone(), entity_ref.clone());
        self.ref_turn_created
            .insert(entity_ref.clone(), self.current_turn);
        self.touch(&entity_ref);

        self.lazy_enrich_queue.insert(
            entity_ref.clone(),
            EnrichRequest {
                table: table.to_string(),
                name_column: name_column.to_string(),
                uuid: uuid.to_string(),
            },
        );
        entity_ref
    }

    /// Allocate a `linked` ref for a UUID column with no enrichment
    /// target. The ref keeps its placeholder label.
    pub fn register_linked_untracked(&mut self, uuid: &str, type_name: &str) -> String {
        if let Some(existing) = self.uuid_to_ref.get(uuid) {
            return existing.clone();
        }
        let n = self.bump_counter(type_name);
        let entity_ref = make_ref(type_name, n);
        self.ref_to_uuid.insert(entity_ref.clone(), uuid.to_string());
        self.uuid_to_ref.insert(uuid.to_string(), entity_ref.clone());
        self.ref_types
            .insert(entity_ref.clone(), type_name.to_string());
        self.ref_actions
            .insert(entity_ref.clone(), ActionTag::Linked);
        self.ref_labels.insert(entity_ref.clone(), entity_ref.clone());
        self.ref_turn_created
            .insert(entity_ref.clone(), self.current_turn);
        self.touch(&entity_ref);
        entity_ref
    }

    /// Drain the enrichment queue. The queue clears itself on read.
    pub fn take_lazy_enrich_queue(&mut self) -> HashMap<String, EnrichRequest> {
        std::mem::take(&mut self.lazy_enrich_queue)
    }

    /// Apply fetched labels. Idempotent: re-applying an already-applied
    /// map changes nothing observable.
    pub fn apply_enrichment(&mut self, labels: &HashMap<String, String>) {
        for (entity_ref, label) in labels {
            if self.contains_ref(entity_ref) {
                self.ref_labels.insert(entity_ref.clone(), label.clone());
            }
        }
    }

    // ── Active reasons & tiers ─────────────────────────────────────

    pub fn set_active_reason(&mut self, entity_ref: &str, reason: impl Into<String>) {
        if self.contains_ref(entity_ref) {
            self.ref_active_reason
                .insert(entity_ref.to_string(), reason.into());
        }
    }

    pub fn clear_active_reason(&mut self, entity_ref: &str) {
        self.ref_active_reason.remove(entity_ref);
    }

    /// Split registered entities into the recency tier and the retained
    /// tier. `recent`: refs touched within `turns_window` turns.
    /// `retained`: older refs carrying an active reason. Both lists are
    /// ordered by recency (newest first), ties broken by ref string.
    pub fn get_active_entities(&self, turns_window: u64) -> (Vec<String>, Vec<String>) {
        let cutoff = self.current_turn.saturating_sub(turns_window);
        let mut recent = Vec::new();
        let mut retained = Vec::new();

        for entity_ref in self.ref_to_uuid.keys() {
            let last = self
                .ref_turn_last_ref
                .get(entity_ref)
                .copied()
                .unwrap_or(0);
            if last > cutoff {
                recent.push((last, entity_ref.clone()));
            } else if self.ref_active_reason.contains_key(entity_ref) {
                retained.push((last, entity_ref.clone()));
            }
        }

        recent.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
        retained.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
        (
            recent.into_iter().map(|(_, r)| r).collect(),
            retained.into_iter().map(|(_, r)| r).collect(),
        )
    }

    /// Refs whose action is `generated` and whose artifact still exists.
    pub fn generated_refs(&self) -> Vec<String> {
        let mut refs: Vec<String> = self
            .pending_artifacts
            .keys()
            .filter(|r| self.ref_actions.get(*r) == Some(&ActionTag::Generated))
            .cloned()
            .collect();
        refs.sort();
        refs
    }

    // ── Turn-end maintenance ───────────────────────────────────────

    /// Drop artifacts for refs promoted this turn. Called by Summarize,
    /// after the reply went out, never before.
    pub fn clear_turn_promoted_artifacts(&mut self) {
        let promoted: Vec<String> = self
            .ref_turn_promoted
            .iter()
            .filter(|(_, turn)| **turn == self.current_turn)
            .map(|(r, _)| r.clone())
            .collect();
        for entity_ref in promoted {
            self.pending_artifacts.remove(&entity_ref);
        }
    }

    // ── Snapshot diffing (active_context events) ───────────────────

    /// Diff the currently-rendered ref set against the last snapshot and
    /// remember the new one. Transient; not serialized.
    pub fn snapshot_rendered(&mut self, rendered: &[String]) -> (Vec<String>, Vec<String>) {
        let current: HashSet<String> = rendered.iter().cloned().collect();
        let mut added: Vec<String> = current
            .difference(&self.last_snapshot_refs)
            .cloned()
            .collect();
        let mut removed: Vec<String> = self
            .last_snapshot_refs
            .difference(&current)
            .cloned()
            .collect();
        added.sort();
        removed.sort();
        self.last_snapshot_refs = current;
        (added, removed)
    }

    // ── Detail tracking ────────────────────────────────────────────

    pub fn record_detail(&mut self, entity_ref: &str, level: DetailLevel) {
        let entry = match level {
            DetailLevel::Full => DetailEntry {
                level,
                full_turn: Some(self.current_turn),
            },
            DetailLevel::Summary => {
                // A summary read never downgrades a recorded full read.
                match self.ref_detail_tracking.get(entity_ref) {
                    Some(existing) if existing.level == DetailLevel::Full => *existing,
                    _ => DetailEntry {
                        level,
                        full_turn: None,
                    },
                }
            }
        };
        self.ref_detail_tracking
            .insert(entity_ref.to_string(), entry);
    }

    // ── Serialization ──────────────────────────────────────────────

    /// Deterministic serialized form, excluding transient fields.
    pub fn to_dict(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn from_dict(value: Value) -> Result<Self> {
        Ok(serde_json::from_value(value)?)
    }

    // ── Internals ──────────────────────────────────────────────────

    fn bump_counter(&mut self, type_name: &str) -> u64 {
        let n = self.counters.entry(type_name.to_string()).or_insert(0);
        *n += 1;
        *n
    }

    fn bump_gen_counter(&mut self, type_name: &str) -> u64 {
        let n = self.gen_counters.entry(type_name.to_string()).or_insert(0);
        *n += 1;
        *n
    }

    fn touch(&mut self, entity_ref: &str) {
        self.ref_turn_last_ref
            .insert(entity_ref.to_string(), self.current_turn);
    }
}

// Label computation shared by the translation layer.
pub(crate) fn compute_label(
    domain: &dyn DomainConfig,
    record: &Value,
    type_name: &str,
    entity_ref: &str,
) -> String {
    domain.compute_entity_label(record, type_name, entity_ref)
}

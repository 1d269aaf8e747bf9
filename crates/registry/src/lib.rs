//! The session id registry.
//!
//! Bidirectional mapping between database UUIDs and human-readable refs
//! (`recipe_1`, `gen_recipe_1`), with everything the pipeline needs to
//! reason about entities across turns: action tags, labels, temporal
//! tracking, detail tracking, pending artifacts, and the lazy FK
//! enrichment queue.
//!
//! The registry is owned by exactly one turn at a time and contains no
//! interior mutability; all state is flat maps keyed by ref string, so
//! serialization is a plain serde round-trip (transient queues excluded).

mod registry;
mod translate;

pub use registry::{DetailEntry, EnrichRequest, SessionIdRegistry};

//! The CRUD executor.
//!
//! A protocol-level translation layer between the LLM's tool calls and
//! the database adapter: refs become UUIDs on the way in, UUIDs become
//! refs on the way out, domain middleware runs in the middle, and
//! user-owned tables are force-scoped. Nothing above this crate ever
//! sees a raw UUID.

mod enrich;
mod executor;
mod sanitize;

pub use enrich::enrich_fk_labels;
pub use executor::{CrudExecutor, CrudOutcome};
pub use sanitize::sanitize_strings;

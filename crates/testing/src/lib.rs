//! Test doubles for the Alfred engine.
//!
//! An in-memory [`MemoryAdapter`] implementing the full adapter
//! protocol, a [`StubDomain`] with a minimal `thing`/`owner` entity
//! model, and a [`ScriptedLlm`] that replays canned node outputs while
//! recording every prompt it was shown.

mod adapter;
mod scripted;
mod stub_domain;

pub use adapter::MemoryAdapter;
pub use scripted::ScriptedLlm;
pub use stub_domain::StubDomain;

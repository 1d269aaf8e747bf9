//! The Alfred pipeline engine.
//!
//! A user message plus conversation state flows through Understand →
//! Think → Act → Reply → Summarize (with a quick path that skips Think
//! and an iterative Act loop), emitting a typed event stream along the
//! way. The engine is constructed with explicit handles (domain,
//! database adapter, LLM client) and owns no global state.

mod engine;
mod nodes;
mod outputs;
mod preprocess;
mod state;

pub use engine::{Engine, TurnOutcome, TurnRequest};
pub use outputs::{
    ActDecision, ActQuickDecision, CurationOp, GeneratedArtifact, SummarizeOutput, ThinkDecision,
    ThinkOutput, ThinkStep, UnderstandOutput,
};
pub use state::{CancelToken, EventSink};

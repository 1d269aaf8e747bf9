//! Per-turn node trace.
//!
//! A lightweight record of which nodes ran, how long they took, and
//! whether they errored. Surfaced in the turn result for observability;
//! never fed back into prompts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeTrace {
    pub node: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
    #[serde(default)]
    pub is_error: bool,
}

impl NodeTrace {
    pub fn start(node: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            started_at: Utc::now(),
            ended_at: None,
            duration_ms: None,
            is_error: false,
        }
    }

    pub fn finish(&mut self, is_error: bool) {
        let ended = Utc::now();
        self.duration_ms = Some((ended - self.started_at).num_milliseconds().max(0) as u64);
        self.ended_at = Some(ended);
        self.is_error = is_error;
    }
}

/// Trace of one whole turn, in execution order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TurnTrace {
    pub nodes: Vec<NodeTrace>,
}

impl TurnTrace {
    pub fn push(&mut self, trace: NodeTrace) {
        self.nodes.push(trace);
    }

    /// Names of nodes that ran, in order.
    pub fn node_names(&self) -> Vec<&str> {
        self.nodes.iter().map(|n| n.node.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finish_records_duration() {
        let mut t = NodeTrace::start("understand");
        t.finish(false);
        assert!(t.ended_at.is_some());
        assert!(t.duration_ms.is_some());
        assert!(!t.is_error);
    }

    #[test]
    fn node_names_in_order() {
        let mut trace = TurnTrace::default();
        trace.push(NodeTrace::start("understand"));
        trace.push(NodeTrace::start("think"));
        assert_eq!(trace.node_names(), vec!["understand", "think"]);
    }
}

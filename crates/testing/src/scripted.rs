//! A scripted LLM client.
//!
//! Responses are enqueued per node and replayed in order; every prompt
//! pair is recorded so tests can assert both call counts ("Think was
//! never invoked") and prompt content ("no UUID reached the model").

use std::collections::HashMap;

use parking_lot::Mutex;

use alfred_domain::error::{Error, Result};
use alfred_domain::event::Usage;
use alfred_llm::{LlmClient, LlmRequest, LlmResponse};

/// One recorded call.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub node: String,
    pub model: String,
    pub system_prompt: String,
    pub user_prompt: String,
}

#[derive(Default)]
struct ScriptState {
    queues: HashMap<String, Vec<String>>,
    calls: Vec<RecordedCall>,
}

/// Scripted [`LlmClient`] test double.
#[derive(Default)]
pub struct ScriptedLlm {
    state: Mutex<ScriptState>,
}

impl ScriptedLlm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a response for a node. JSON values are passed as raw
    /// strings; queues drain front-first.
    pub fn enqueue(&self, node: &str, response: impl Into<String>) {
        self.state
            .lock()
            .queues
            .entry(node.to_string())
            .or_default()
            .push(response.into());
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.state.lock().calls.clone()
    }

    /// Calls made by one node.
    pub fn calls_for(&self, node: &str) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|c| c.node == node)
            .count()
    }

    /// True when `needle` appears in any recorded prompt.
    pub fn any_prompt_contains(&self, needle: &str) -> bool {
        self.state
            .lock()
            .calls
            .iter()
            .any(|c| c.system_prompt.contains(needle) || c.user_prompt.contains(needle))
    }
}

#[async_trait::async_trait]
impl LlmClient for ScriptedLlm {
    async fn complete(&self, req: &LlmRequest) -> Result<LlmResponse> {
        let mut state = self.state.lock();
        state.calls.push(RecordedCall {
            node: req.node.clone(),
            model: req.model.clone(),
            system_prompt: req.system_prompt.clone(),
            user_prompt: req.user_prompt.clone(),
        });

        let queue = state.queues.get_mut(&req.node);
        let content = match queue.and_then(|q| {
            if q.is_empty() {
                None
            } else {
                Some(q.remove(0))
            }
        }) {
            Some(content) => content,
            None => {
                return Err(Error::Llm(format!(
                    "scripted LLM has no response queued for node '{}'",
                    req.node
                )))
            }
        };

        Ok(LlmResponse {
            content,
            usage: Usage {
                prompt_tokens: 100,
                completion_tokens: 50,
                total_tokens: 150,
            },
        })
    }
}

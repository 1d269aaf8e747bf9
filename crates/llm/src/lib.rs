//! The LLM boundary.
//!
//! Everything above this crate calls [`LlmBoundary::call_structured`] or
//! [`LlmBoundary::call_text`] and never sees a provider. The boundary
//! owns model selection by complexity tier, bounded retry on
//! structured-output violations, and the per-call tracing span.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use alfred_domain::config::LlmConfig;
use alfred_domain::error::{Error, Result};
use alfred_domain::event::Usage;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request / response
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Model tier selection hint per pipeline node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Low,
    #[default]
    Medium,
    High,
}

impl Complexity {
    pub fn as_str(self) -> &'static str {
        match self {
            Complexity::Low => "low",
            Complexity::Medium => "medium",
            Complexity::High => "high",
        }
    }
}

/// A provider-agnostic completion request.
#[derive(Debug, Clone)]
pub struct LlmRequest {
    /// The pipeline node making the call (for scripting and spans).
    pub node: String,
    pub system_prompt: String,
    pub user_prompt: String,
    /// Resolved model id for the selected tier.
    pub model: String,
    /// JSON schema the output must satisfy, when structured.
    pub output_schema: Option<Value>,
}

/// A completion response: raw text plus usage.
#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub content: String,
    pub usage: Usage,
}

/// Trait every LLM adapter implements.
#[async_trait::async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, req: &LlmRequest) -> Result<LlmResponse>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Boundary
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The single entry point the pipeline uses for every model call.
#[derive(Clone)]
pub struct LlmBoundary {
    client: Arc<dyn LlmClient>,
    config: LlmConfig,
}

impl LlmBoundary {
    pub fn new(client: Arc<dyn LlmClient>, config: LlmConfig) -> Self {
        Self { client, config }
    }

    /// The model id configured for a complexity tier.
    pub fn model_for(&self, complexity: Complexity) -> String {
        self.config
            .tiers
            .get(complexity.as_str())
            .cloned()
            .unwrap_or_else(|| "standard".to_string())
    }

    /// Structured-output call: parse the response as `T`, retrying with
    /// a corrective note on violation, bounded by `max_retries`.
    pub async fn call_structured<T: DeserializeOwned>(
        &self,
        node: &str,
        system_prompt: &str,
        user_prompt: &str,
        output_schema: Option<Value>,
        complexity: Complexity,
    ) -> Result<(T, Usage)> {
        let model = self.model_for(complexity);
        let span = tracing::info_span!(
            "llm.call",
            node,
            model = %model,
            complexity = complexity.as_str(),
        );

        let mut usage = Usage::default();
        let mut last_error = String::new();
        let mut req = LlmRequest {
            node: node.to_string(),
            system_prompt: system_prompt.to_string(),
            user_prompt: user_prompt.to_string(),
            model,
            output_schema,
        };

        let attempts = async {
            for attempt in 0..=self.config.max_retries {
                if attempt > 0 {
                    tracing::warn!(node, attempt, error = %last_error, "retrying after schema violation");
                    req.user_prompt = format!(
                        "{user_prompt}\n\nYour previous output was not valid: {last_error}\n\
                         Respond with JSON matching the required schema and nothing else."
                    );
                }

                let response = self.client.complete(&req).await?;
                usage.add(&response.usage);

                match parse_structured::<T>(&response.content) {
                    Ok(parsed) => return Ok((parsed, usage)),
                    Err(e) => last_error = e.to_string(),
                }
            }

            Err(Error::SchemaMismatch {
                node: node.to_string(),
                message: last_error,
            })
        };
        tracing::Instrument::instrument(attempts, span).await
    }

    /// Free-form text call (reply rendering, summaries).
    pub async fn call_text(
        &self,
        node: &str,
        system_prompt: &str,
        user_prompt: &str,
        complexity: Complexity,
    ) -> Result<(String, Usage)> {
        let model = self.model_for(complexity);
        let span = tracing::info_span!(
            "llm.call",
            node,
            model = %model,
            complexity = complexity.as_str(),
        );

        let req = LlmRequest {
            node: node.to_string(),
            system_prompt: system_prompt.to_string(),
            user_prompt: user_prompt.to_string(),
            model,
            output_schema: None,
        };
        let call = async {
            let response = self.client.complete(&req).await?;
            Ok((response.content, response.usage))
        };
        tracing::Instrument::instrument(call, span).await
    }
}

/// Parse structured output, tolerating a fenced code block around the
/// JSON body (a common model habit).
fn parse_structured<T: DeserializeOwned>(content: &str) -> Result<T> {
    let trimmed = content.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|s| s.strip_suffix("```"))
        .map(str::trim)
        .unwrap_or(trimmed);
    Ok(serde_json::from_str(body)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Decision {
        action: String,
    }

    /// Returns each canned response once, in order.
    struct SequenceClient {
        responses: Mutex<Vec<String>>,
        calls: Mutex<usize>,
    }

    impl SequenceClient {
        fn new(responses: Vec<&str>) -> Self {
            Self {
                responses: Mutex::new(responses.into_iter().map(String::from).collect()),
                calls: Mutex::new(0),
            }
        }
    }

    #[async_trait::async_trait]
    impl LlmClient for SequenceClient {
        async fn complete(&self, _req: &LlmRequest) -> Result<LlmResponse> {
            *self.calls.lock() += 1;
            let mut responses = self.responses.lock();
            let content = if responses.is_empty() {
                "{}".to_string()
            } else {
                responses.remove(0)
            };
            Ok(LlmResponse {
                content,
                usage: Usage {
                    prompt_tokens: 10,
                    completion_tokens: 5,
                    total_tokens: 15,
                },
            })
        }
    }

    fn boundary(client: SequenceClient) -> LlmBoundary {
        LlmBoundary::new(Arc::new(client), LlmConfig::default())
    }

    #[tokio::test]
    async fn structured_call_parses_first_attempt() {
        let b = boundary(SequenceClient::new(vec![r#"{"action": "step_complete"}"#]));
        let (decision, usage): (Decision, Usage) = b
            .call_structured("act", "sys", "user", None, Complexity::Medium)
            .await
            .unwrap();
        assert_eq!(decision.action, "step_complete");
        assert_eq!(usage.total_tokens, 15);
    }

    #[tokio::test]
    async fn retries_on_invalid_then_succeeds() {
        let client = SequenceClient::new(vec!["not json", r#"{"action": "tool_call"}"#]);
        let b = boundary(client);
        let (decision, usage): (Decision, Usage) = b
            .call_structured("act", "sys", "user", None, Complexity::Low)
            .await
            .unwrap();
        assert_eq!(decision.action, "tool_call");
        // Two calls' worth of usage accumulated.
        assert_eq!(usage.total_tokens, 30);
    }

    #[tokio::test]
    async fn gives_up_after_bounded_retries() {
        let b = boundary(SequenceClient::new(vec!["bad", "bad", "bad", "bad"]));
        let result: Result<(Decision, Usage)> = b
            .call_structured("think", "sys", "user", None, Complexity::High)
            .await;
        match result {
            Err(Error::SchemaMismatch { node, .. }) => assert_eq!(node, "think"),
            other => panic!("expected SchemaMismatch, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn fenced_json_is_accepted() {
        let b = boundary(SequenceClient::new(vec![
            "```json\n{\"action\": \"fail\"}\n```",
        ]));
        let (decision, _): (Decision, Usage) = b
            .call_structured("act", "sys", "user", None, Complexity::Medium)
            .await
            .unwrap();
        assert_eq!(decision.action, "fail");
    }

    #[test]
    fn tier_selection_uses_config() {
        let b = LlmBoundary::new(
            Arc::new(SequenceClient::new(vec![])),
            LlmConfig::default(),
        );
        assert_eq!(b.model_for(Complexity::Low), "fast-mini");
        assert_eq!(b.model_for(Complexity::Medium), "standard");
        assert_eq!(b.model_for(Complexity::High), "frontier");
    }
}

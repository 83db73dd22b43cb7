mod mock;
mod openai;
pub mod schema;

use async_trait::async_trait;
use futures::{Stream, stream::BoxStream};
use serde_json::Value;

pub use mock::MockAgent;
pub use openai::OpenAiAgent;

#[derive(Debug, Clone)]
pub struct AgentRequest {
    pub user_id: String,
    pub prompt: String,
}

/// One step of a streamed agent run.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    AgentUpdated { agent: String },
    TextDelta(String),
    ToolCalled { tool: String, args: Value },
    ToolCompleted { tool: String },
    /// The agent's final structured output, not yet validated.
    Completed(Value),
}

pub type AgentEventStream = BoxStream<'static, anyhow::Result<AgentEvent>>;

/// Tool-using language-model agent. Implementations are free to call the
/// catalog tools any number of times before producing their final output.
#[async_trait]
pub trait Agent: Send + Sync {
    async fn run(&self, request: AgentRequest) -> anyhow::Result<Value>;

    async fn run_streamed(&self, request: AgentRequest) -> anyhow::Result<AgentEventStream>;
}

pub(crate) fn boxed_events<S>(stream: S) -> AgentEventStream
where
    S: Stream<Item = anyhow::Result<AgentEvent>> + Send + 'static,
{
    Box::pin(stream)
}

/// Reads the model's final message as JSON, tolerating code fences. Text
/// that still isn't JSON is passed through as a string so validation can
/// reject it.
pub(crate) fn parse_final_output(raw: &str) -> Value {
    let candidate = raw
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    serde_json::from_str(candidate).unwrap_or_else(|_| Value::String(raw.to_owned()))
}

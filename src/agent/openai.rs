use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::tools::{ToolContext, ToolDefinition, ToolExecutor};

use super::{
    Agent, AgentEvent, AgentEventStream, AgentRequest, boxed_events, parse_final_output, schema,
};

const MAX_TOOL_ROUNDS: usize = 6;

/// Chat-completions agent with function tools and a strict JSON output schema.
#[derive(Clone)]
pub struct OpenAiAgent {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
    tools: Arc<dyn ToolExecutor>,
}

impl OpenAiAgent {
    pub fn new(
        client: Client,
        api_key: String,
        model: String,
        base_url: String,
        tools: Arc<dyn ToolExecutor>,
    ) -> Self {
        Self {
            client,
            api_key,
            model,
            base_url: base_url.trim_end_matches('/').to_owned(),
            tools,
        }
    }

    fn request_body<'a>(
        &'a self,
        messages: &'a [ChatMessage],
        definitions: &'a [ToolDefinition],
        stream: bool,
    ) -> ChatCompletionRequest<'a> {
        ChatCompletionRequest {
            model: &self.model,
            messages,
            tools: definitions
                .iter()
                .map(|function| ToolSpec {
                    kind: "function",
                    function,
                })
                .collect(),
            response_format: json!({
                "type": "json_schema",
                "json_schema": {
                    "name": "assistant_reply",
                    "strict": true,
                    "schema": schema::output_schema()
                }
            }),
            stream,
        }
    }

    async fn send(
        &self,
        messages: &[ChatMessage],
        definitions: &[ToolDefinition],
        stream: bool,
    ) -> anyhow::Result<reqwest::Response> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&self.request_body(messages, definitions, stream))
            .send()
            .await
            .map_err(|error| {
                warn!(?error, "chat completion request failed");
                error
            })?
            .error_for_status()
            .map_err(|error| {
                warn!(?error, "chat completion returned error status");
                error
            })?;
        Ok(response)
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    tools: Vec<ToolSpec<'a>>,
    response_format: Value,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ToolSpec<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    function: &'a ToolDefinition,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ToolCallPayload>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl ChatMessage {
    fn new(role: &str, content: &str) -> Self {
        Self {
            role: role.to_owned(),
            content: Some(content.to_owned()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    fn tool_result(call_id: &str, content: String) -> Self {
        Self {
            role: "tool".to_owned(),
            content: Some(content),
            tool_calls: None,
            tool_call_id: Some(call_id.to_owned()),
        }
    }

    fn tool_calls(calls: Vec<ToolCallPayload>) -> Self {
        Self {
            role: "assistant".to_owned(),
            content: None,
            tool_calls: Some(calls),
            tool_call_id: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ToolCallPayload {
    id: String,
    #[serde(rename = "type", default = "function_kind")]
    kind: String,
    function: FunctionCall,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct FunctionCall {
    name: String,
    #[serde(default)]
    arguments: String,
}

fn function_kind() -> String {
    "function".to_owned()
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCallDelta>>,
}

#[derive(Debug, Deserialize)]
struct ToolCallDelta {
    index: usize,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<FunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct FunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[async_trait]
impl Agent for OpenAiAgent {
    async fn run(&self, request: AgentRequest) -> anyhow::Result<Value> {
        let ctx = ToolContext {
            user_id: request.user_id.clone(),
        };
        let definitions = self.tools.definitions();
        let mut messages = initial_messages(&request.prompt);

        for round in 1..=MAX_TOOL_ROUNDS {
            let response = self
                .send(&messages, &definitions, false)
                .await?
                .json::<ChatCompletionResponse>()
                .await?;

            let message = response
                .choices
                .into_iter()
                .next()
                .map(|choice| choice.message)
                .ok_or_else(|| anyhow::anyhow!("model returned no choices"))?;

            let tool_calls = message.tool_calls.clone().unwrap_or_default();
            if tool_calls.is_empty() {
                debug!(user_id = %ctx.user_id, round, "agent produced final output");
                return Ok(parse_final_output(message.content.as_deref().unwrap_or_default()));
            }

            info!(
                user_id = %ctx.user_id,
                round,
                tool_calls = tool_calls.len(),
                "agent requested tools"
            );
            messages.push(message);
            for call in &tool_calls {
                let output = execute_tool_call(self.tools.as_ref(), call, &ctx).await;
                messages.push(ChatMessage::tool_result(&call.id, output));
            }
        }

        Err(anyhow::anyhow!(
            "agent exceeded {MAX_TOOL_ROUNDS} tool rounds without a final answer"
        ))
    }

    async fn run_streamed(&self, request: AgentRequest) -> anyhow::Result<AgentEventStream> {
        let agent = self.clone();

        let stream = async_stream::try_stream! {
            yield AgentEvent::AgentUpdated {
                agent: schema::AGENT_NAME.to_owned(),
            };

            let ctx = ToolContext {
                user_id: request.user_id.clone(),
            };
            let definitions = agent.tools.definitions();
            let mut messages = initial_messages(&request.prompt);
            let mut completed = false;

            for round in 1..=MAX_TOOL_ROUNDS {
                let response = agent.send(&messages, &definitions, true).await?;
                let mut bytes = response.bytes_stream();
                let mut buffer = Vec::new();
                let mut content = String::new();
                let mut pending = BTreeMap::new();

                let mut upstream_done = false;
                while !upstream_done {
                    let payloads = match bytes.next().await {
                        Some(chunk) => {
                            buffer.extend_from_slice(&chunk?);
                            drain_sse_data(&mut buffer)
                        }
                        None => {
                            upstream_done = true;
                            flush_sse_data(&mut buffer)
                        }
                    };
                    for data in payloads {
                        if data == "[DONE]" {
                            continue;
                        }
                        let chunk = serde_json::from_str::<StreamChunk>(&data)?;
                        for choice in chunk.choices {
                            if let Some(text) = choice.delta.content.filter(|text| !text.is_empty()) {
                                content.push_str(&text);
                                yield AgentEvent::TextDelta(text);
                            }
                            for delta in choice.delta.tool_calls.unwrap_or_default() {
                                merge_tool_call_delta(&mut pending, delta);
                            }
                        }
                    }
                }

                if pending.is_empty() {
                    debug!(user_id = %ctx.user_id, round, "streamed agent produced final output");
                    yield AgentEvent::Completed(parse_final_output(&content));
                    completed = true;
                    break;
                }

                let tool_calls = pending.into_values().collect::<Vec<_>>();
                info!(
                    user_id = %ctx.user_id,
                    round,
                    tool_calls = tool_calls.len(),
                    "streamed agent requested tools"
                );
                messages.push(ChatMessage::tool_calls(tool_calls.clone()));
                for call in &tool_calls {
                    yield AgentEvent::ToolCalled {
                        tool: call.function.name.clone(),
                        args: parse_tool_arguments(&call.function.arguments).unwrap_or(Value::Null),
                    };
                    let output = execute_tool_call(agent.tools.as_ref(), call, &ctx).await;
                    messages.push(ChatMessage::tool_result(&call.id, output));
                    yield AgentEvent::ToolCompleted {
                        tool: call.function.name.clone(),
                    };
                }
            }

            if !completed {
                Err::<(), _>(anyhow::anyhow!(
                    "agent exceeded {MAX_TOOL_ROUNDS} tool rounds without a final answer"
                ))?;
            }
        };

        Ok(boxed_events(stream))
    }
}

fn initial_messages(prompt: &str) -> Vec<ChatMessage> {
    vec![
        ChatMessage::new("system", schema::instructions()),
        ChatMessage::new("user", prompt),
    ]
}

fn parse_tool_arguments(raw: &str) -> Result<Value, serde_json::Error> {
    if raw.trim().is_empty() {
        return Ok(json!({}));
    }
    serde_json::from_str(raw)
}

/// Tool failures go back to the model as an error payload instead of
/// aborting the run.
async fn execute_tool_call(
    tools: &dyn ToolExecutor,
    call: &ToolCallPayload,
    ctx: &ToolContext,
) -> String {
    let args = match parse_tool_arguments(&call.function.arguments) {
        Ok(args) => args,
        Err(error) => {
            warn!(tool_name = %call.function.name, ?error, "model sent malformed tool arguments");
            return json!({ "error": format!("invalid JSON arguments: {error}") }).to_string();
        }
    };

    match tools.execute(&call.function.name, args, ctx).await {
        Ok(output) => output,
        Err(error) => {
            warn!(tool_name = %call.function.name, ?error, "tool call failed; continuing agent run");
            json!({ "error": error.to_string() }).to_string()
        }
    }
}

/// Removes every complete SSE event from `buffer` and returns its `data:`
/// payloads.
fn drain_sse_data(buffer: &mut Vec<u8>) -> Vec<String> {
    let mut payloads = Vec::new();

    while let Some(event_end) = buffer.windows(2).position(|window| window == b"\n\n") {
        let event = buffer.drain(..event_end + 2).collect::<Vec<_>>();
        let event = String::from_utf8_lossy(&event);
        for line in event.lines() {
            if let Some(data) = line.strip_prefix("data:") {
                payloads.push(data.trim().to_owned());
            }
        }
    }

    payloads
}

/// Drains whatever is left once the body ends, including a final event
/// that was not followed by a blank line.
fn flush_sse_data(buffer: &mut Vec<u8>) -> Vec<String> {
    if !buffer.iter().all(u8::is_ascii_whitespace) {
        buffer.extend_from_slice(b"\n\n");
    }
    let payloads = drain_sse_data(buffer);
    buffer.clear();
    payloads
}

fn merge_tool_call_delta(pending: &mut BTreeMap<usize, ToolCallPayload>, delta: ToolCallDelta) {
    let entry = pending.entry(delta.index).or_insert_with(|| ToolCallPayload {
        kind: function_kind(),
        ..ToolCallPayload::default()
    });

    if let Some(id) = delta.id {
        entry.id = id;
    }
    if let Some(function) = delta.function {
        if let Some(name) = function.name {
            entry.function.name.push_str(&name);
        }
        if let Some(arguments) = function.arguments {
            entry.function.arguments.push_str(&arguments);
        }
    }
}

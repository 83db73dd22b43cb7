use std::sync::Arc;

use async_trait::async_trait;
use futures::stream;
use serde_json::{Value, json};

use crate::{
    pricing::extract_price_hint,
    tools::{
        GET_DEALS, GET_ORDERS, GET_PAYMENT_STATUS, GET_USER_PROFILE, ToolContext, ToolExecutor,
    },
    types::{MessageKind, StructuredOutput},
};

use super::{Agent, AgentEvent, AgentEventStream, AgentRequest, boxed_events, schema};

const DELTA_CHARS: usize = 24;

/// Keyword-driven offline agent. It calls the real tools so replies reflect
/// the store's contents.
#[derive(Clone)]
pub struct MockAgent {
    tools: Arc<dyn ToolExecutor>,
}

impl MockAgent {
    pub fn new(tools: Arc<dyn ToolExecutor>) -> Self {
        Self { tools }
    }

    /// The tool call made, if any, and the answer as JSON text. Tool results
    /// are echoed verbatim so their field order survives streaming.
    async fn answer(
        &self,
        request: &AgentRequest,
    ) -> anyhow::Result<(Option<(String, Value)>, String)> {
        let message = latest_user_message(&request.prompt);
        let lower = message.to_lowercase();

        let tool_call = if lower.contains("profile") || lower.contains("account") {
            Some((GET_USER_PROFILE, json!({})))
        } else if lower.contains("payment") || lower.contains("pay ") || lower.ends_with("pay") {
            Some((GET_PAYMENT_STATUS, json!({})))
        } else if lower.contains("buy") {
            return Ok((
                None,
                reply(
                    MessageKind::Text,
                    "Would you like to pay via Cash on Delivery or Pay Online?",
                )?,
            ));
        } else if lower.contains("order") {
            Some((GET_ORDERS, json!({})))
        } else if ["deal", "show", "find", "search", "under", "below", "above", "between"]
            .iter()
            .any(|keyword| lower.contains(keyword))
        {
            let hint = extract_price_hint(message);
            Some((
                GET_DEALS,
                json!({
                    "query": "",
                    "minPrice": price_arg(hint.min_price),
                    "maxPrice": price_arg(hint.max_price),
                }),
            ))
        } else if lower.contains("menu") || lower.contains("help") {
            return Ok((
                None,
                reply(
                    MessageKind::Menu,
                    "I can show deals, place orders, and check your orders, payments or profile.",
                )?,
            ));
        } else {
            None
        };

        let Some((tool, args)) = tool_call else {
            return Ok((
                None,
                reply(
                    MessageKind::Text,
                    "Hi! Ask me for deals, your orders, payments or profile.",
                )?,
            ));
        };

        let ctx = ToolContext {
            user_id: request.user_id.clone(),
        };
        let raw = self.tools.execute(tool, args.clone(), &ctx).await?;
        Ok((Some((tool.to_owned(), args)), raw))
    }
}

#[async_trait]
impl Agent for MockAgent {
    async fn run(&self, request: AgentRequest) -> anyhow::Result<Value> {
        let (_, raw) = self.answer(&request).await?;
        Ok(serde_json::from_str(&raw)?)
    }

    async fn run_streamed(&self, request: AgentRequest) -> anyhow::Result<AgentEventStream> {
        let (tool_call, raw) = self.answer(&request).await?;
        let output = serde_json::from_str::<Value>(&raw)?;

        let mut events = vec![AgentEvent::AgentUpdated {
            agent: schema::AGENT_NAME.to_owned(),
        }];
        if let Some((tool, args)) = tool_call {
            events.push(AgentEvent::ToolCalled {
                tool: tool.clone(),
                args,
            });
            events.push(AgentEvent::ToolCompleted { tool });
        }
        let chars = raw.chars().collect::<Vec<_>>();
        events.extend(
            chars
                .chunks(DELTA_CHARS)
                .map(|chunk| AgentEvent::TextDelta(chunk.iter().collect())),
        );
        events.push(AgentEvent::Completed(output));

        Ok(boxed_events(stream::iter(events.into_iter().map(Ok))))
    }
}

/// The shopper's newest message, without history or system annotations.
fn latest_user_message(prompt: &str) -> &str {
    let message = prompt
        .rsplit_once("\nUser: ")
        .map_or(prompt, |(_, message)| message);
    message
        .split_once("\n\n[")
        .map_or(message, |(message, _)| message)
        .trim()
}

fn reply(kind: MessageKind, content: &str) -> anyhow::Result<String> {
    Ok(serde_json::to_string(&StructuredOutput {
        kind,
        ..StructuredOutput::text(content)
    })?)
}

fn price_arg(bound: Option<u64>) -> String {
    bound.map_or_else(|| "NULL".to_owned(), |value| value.to_string())
}

use std::{sync::Arc, time::Instant};

use chrono::Utc;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    agent::{Agent, AgentEvent, AgentRequest},
    pipeline::{
        FALLBACK_REPLY, HistoryWindow, NormalizedReply, RetryController, StreamDecoder,
        StreamEvent, build_prompt, chat_title, normalize,
    },
    pricing::extract_price_hint,
    store::{ChatStore, NewChatMessage},
    types::{
        BotMessage, ChatMessageRecord, ChatRecord, ChatRole, ChatSummary, MessageKind,
        StructuredOutput, TurnReply,
    },
};

const STREAM_BUFFER: usize = 64;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatTurnRequest {
    pub message: String,
    #[serde(default)]
    pub chat_id: Option<String>,
}

/// A turn whose user message is persisted and whose prompt is ready.
struct PreparedTurn {
    chat: ChatRecord,
    prompt: String,
}

pub struct ChatOrchestrator {
    agent: Arc<dyn Agent>,
    chats: Arc<dyn ChatStore>,
    retry: RetryController,
    history: HistoryWindow,
}

impl ChatOrchestrator {
    pub fn new(
        agent: Arc<dyn Agent>,
        chats: Arc<dyn ChatStore>,
        retry: RetryController,
        history: HistoryWindow,
    ) -> Self {
        Self {
            agent,
            chats,
            retry,
            history,
        }
    }

    pub async fn handle_turn(
        &self,
        user_id: &str,
        request: ChatTurnRequest,
    ) -> anyhow::Result<TurnReply> {
        let started_at = Instant::now();
        let turn = self.prepare_turn(user_id, &request).await?;

        let output = self
            .retry
            .run(
                self.agent.as_ref(),
                AgentRequest {
                    user_id: user_id.to_owned(),
                    prompt: turn.prompt,
                },
            )
            .await?;
        let reply = normalize(output);
        let record = self.persist_reply(&turn.chat.id, reply).await?;

        info!(
            user_id,
            chat_id = %turn.chat.id,
            reply_type = record.kind.as_str(),
            total_ms = elapsed_ms(started_at),
            "turn completed"
        );

        Ok(TurnReply {
            chat_id: turn.chat.id,
            message: record.into(),
        })
    }

    /// Runs a streaming turn on its own task. The turn keeps going, and the
    /// reply is still persisted, if the receiver is dropped.
    pub fn stream_turn(
        self: &Arc<Self>,
        user_id: String,
        request: ChatTurnRequest,
    ) -> ReceiverStream<StreamEvent> {
        let (sender, receiver) = mpsc::channel(STREAM_BUFFER);
        let orchestrator = Arc::clone(self);
        tokio::spawn(async move {
            orchestrator.run_stream(user_id, request, sender).await;
        });
        ReceiverStream::new(receiver)
    }

    pub async fn list_chats(&self, user_id: &str) -> anyhow::Result<Vec<ChatSummary>> {
        self.chats.list_chats(user_id).await
    }

    /// Messages of a chat owned by `user_id`, oldest first. Chats owned by
    /// someone else read as empty.
    pub async fn chat_messages(
        &self,
        user_id: &str,
        chat_id: &str,
    ) -> anyhow::Result<Vec<ChatMessageRecord>> {
        self.chats.list_messages(chat_id, user_id).await
    }

    pub async fn delete_chat(&self, user_id: &str, chat_id: &str) -> anyhow::Result<bool> {
        let deleted = self.chats.delete_chat(chat_id, user_id).await?;
        if deleted {
            info!(user_id, chat_id, "chat deleted");
        }
        Ok(deleted)
    }

    async fn prepare_turn(
        &self,
        user_id: &str,
        request: &ChatTurnRequest,
    ) -> anyhow::Result<PreparedTurn> {
        let existing = match request.chat_id.as_deref().filter(|id| !id.is_empty()) {
            Some(chat_id) => self.chats.find_chat(chat_id, user_id).await?,
            None => None,
        };
        let chat = match existing {
            Some(chat) => chat,
            None => {
                let chat = self
                    .chats
                    .create_chat(user_id, &chat_title(&request.message))
                    .await?;
                info!(user_id, chat_id = %chat.id, "chat created");
                chat
            }
        };

        let user_turn = self
            .chats
            .append_message(NewChatMessage {
                chat_id: chat.id.clone(),
                role: ChatRole::User,
                content: request.message.clone(),
                kind: MessageKind::Text,
                metadata: None,
            })
            .await?;

        let recent = self
            .chats
            .recent_messages(&chat.id, self.history.fetch_limit())
            .await?;
        let history = self.history.render(&recent, &user_turn.id);
        let hint = extract_price_hint(&request.message);
        if !hint.is_empty() {
            debug!(
                chat_id = %chat.id,
                min_price = ?hint.min_price,
                max_price = ?hint.max_price,
                "price hint extracted"
            );
        }

        Ok(PreparedTurn {
            prompt: build_prompt(&history, &request.message, &hint),
            chat,
        })
    }

    async fn persist_reply(
        &self,
        chat_id: &str,
        reply: NormalizedReply,
    ) -> anyhow::Result<ChatMessageRecord> {
        self.chats
            .append_message(NewChatMessage {
                chat_id: chat_id.to_owned(),
                role: ChatRole::Bot,
                content: reply.content,
                kind: reply.kind,
                metadata: reply.metadata,
            })
            .await
    }

    async fn run_stream(
        &self,
        user_id: String,
        request: ChatTurnRequest,
        sender: mpsc::Sender<StreamEvent>,
    ) {
        let started_at = Instant::now();
        let mut decoder = StreamDecoder::new();

        let (chat_id, reply) = match self
            .drive_stream(&user_id, &request, &mut decoder, &sender)
            .await
        {
            Ok(result) => result,
            Err(error) => {
                warn!(user_id = %user_id, ?error, "streaming turn failed");
                if let Some(event) = decoder.fail() {
                    let _ = sender.send(event).await;
                }
                return;
            }
        };

        let message = BotMessage {
            id: Uuid::new_v4().to_string(),
            role: ChatRole::Bot,
            content: reply.content.clone(),
            kind: reply.kind,
            metadata: reply.metadata.clone(),
            created_at: Utc::now(),
        };
        if let Some(event) = decoder.finish(&chat_id, message) {
            if sender.send(event).await.is_err() {
                debug!(chat_id = %chat_id, "stream receiver dropped before done");
            }
        }
        drop(sender);

        match self.persist_reply(&chat_id, reply).await {
            Ok(record) => info!(
                user_id = %user_id,
                chat_id = %chat_id,
                reply_type = record.kind.as_str(),
                total_ms = elapsed_ms(started_at),
                "streaming turn completed"
            ),
            Err(error) => warn!(
                user_id = %user_id,
                chat_id = %chat_id,
                ?error,
                "failed to persist streamed reply"
            ),
        }
    }

    async fn drive_stream(
        &self,
        user_id: &str,
        request: &ChatTurnRequest,
        decoder: &mut StreamDecoder,
        sender: &mpsc::Sender<StreamEvent>,
    ) -> anyhow::Result<(String, NormalizedReply)> {
        let turn = self.prepare_turn(user_id, request).await?;
        let mut events = self
            .agent
            .run_streamed(AgentRequest {
                user_id: user_id.to_owned(),
                prompt: turn.prompt,
            })
            .await?;

        let mut final_output = None;
        while let Some(event) = events.next().await {
            let event = event?;
            if let AgentEvent::Completed(output) = &event {
                final_output = Some(output.clone());
            }
            for update in decoder.push(event) {
                // A closed receiver is ignored; the turn still completes.
                let _ = sender.send(update).await;
            }
        }

        let output = final_output
            .ok_or_else(|| anyhow::anyhow!("agent stream ended without a final output"))?;
        Ok((turn.chat.id, normalize(structured_or_fallback(output))))
    }
}

/// Streaming turns are not retried. Objects are read leniently, bare text
/// becomes a text reply and anything else falls back to the apology reply.
fn structured_or_fallback(output: Value) -> StructuredOutput {
    match output {
        Value::Object(object) => StructuredOutput::from_object(&object),
        Value::String(text) if !text.trim().is_empty() => StructuredOutput::text(text),
        other => {
            warn!(output = %other, "streamed output carries no answer");
            StructuredOutput::text(FALLBACK_REPLY)
        }
    }
}

fn elapsed_ms(started_at: Instant) -> u64 {
    started_at
        .elapsed()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}

use std::{collections::HashMap, sync::LazyLock};

use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::{
    agent::AgentEvent,
    types::{BotMessage, Deal, MessageKind, Order, Payment},
};

pub const STREAM_ERROR_MESSAGE: &str = "Something went wrong";

const STRING: &str = r#""(?:[^"\\]|\\.)*""#;
const NUMBER: &str = r"-?\d+(?:\.\d+)?(?:[eE][+-]?\d+)?";
/// Bytes re-read before new text when looking for the kind marker, so a
/// marker split across deltas is still found.
const MARKER_LOOKBACK: usize = 64;

static KIND_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""type"\s*:\s*"(deals|orders|payments)""#).expect("kind marker regex is valid")
});

static DEAL_RECORD: LazyLock<Regex> = LazyLock::new(|| {
    record_pattern(&[
        ("id", STRING),
        ("title", STRING),
        ("description", STRING),
        ("price", NUMBER),
        ("imageURL", nullable(STRING).as_str()),
    ])
});

static ORDER_RECORD: LazyLock<Regex> = LazyLock::new(|| {
    record_pattern(&[
        ("id", STRING),
        ("productName", STRING),
        ("status", STRING),
        ("imageURL", nullable(STRING).as_str()),
        ("paymentUrl", nullable(STRING).as_str()),
    ])
});

static PAYMENT_RECORD: LazyLock<Regex> = LazyLock::new(|| {
    record_pattern(&[
        ("id", STRING),
        ("amountPaid", NUMBER),
        ("pendingAmount", NUMBER),
        ("orderId", STRING),
        ("productName", STRING),
        ("createdAt", STRING),
    ])
});

/// A JSON object with exactly these fields in this order, any whitespace.
fn record_pattern(fields: &[(&str, &str)]) -> Regex {
    let body = fields
        .iter()
        .map(|(name, value)| format!(r#""{name}"\s*:\s*{value}"#))
        .collect::<Vec<_>>()
        .join(r"\s*,\s*");
    Regex::new(&format!(r"\{{\s*{body}\s*\}}")).expect("record regex is valid")
}

fn nullable(pattern: &str) -> String {
    format!("(?:null|{pattern})")
}

/// One entry of the reasoning trace shown while a turn streams.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ThinkingStep {
    ToolCall { tool: String, args: Value },
    ToolResult { tool: String, result: String },
    AgentUpdate { agent: String },
}

/// Server-sent event relayed to the UI, one per `data:` record.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Text {
        content: String,
    },
    Item {
        kind: MessageKind,
        index: usize,
        item: Value,
    },
    Thinking(ThinkingStep),
    Done {
        #[serde(rename = "chatId")]
        chat_id: String,
        message: BotMessage,
        thinking: Vec<ThinkingStep>,
    },
    Error {
        error: String,
    },
}

/// Turns the agent's event feed into UI events, scraping deal, order and
/// payment cards out of the raw JSON text before the final output exists.
///
/// Extraction is best effort: records whose fields deviate from the
/// expected order are only delivered with `done`.
#[derive(Debug, Default)]
pub struct StreamDecoder {
    accumulated_text: String,
    marker_offset: usize,
    scans: HashMap<MessageKind, RecordScan>,
    thinking: Vec<ThinkingStep>,
    finished: bool,
}

/// Progress of record extraction for one announced kind. Text before
/// `offset` has already been matched and is never scanned again.
#[derive(Debug, Default)]
struct RecordScan {
    offset: usize,
    emitted: usize,
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn accumulated_text(&self) -> &str {
        &self.accumulated_text
    }

    pub fn thinking(&self) -> &[ThinkingStep] {
        &self.thinking
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn push(&mut self, event: AgentEvent) -> Vec<StreamEvent> {
        if self.finished {
            return Vec::new();
        }

        match event {
            AgentEvent::TextDelta(delta) => {
                self.accumulated_text.push_str(&delta);
                let mut events = vec![StreamEvent::Text { content: delta }];
                events.extend(self.scrape_items());
                events
            }
            AgentEvent::ToolCalled { tool, args } => {
                debug!(tool = %tool, args_json = %args, "agent called tool");
                self.think(ThinkingStep::ToolCall { tool, args })
            }
            AgentEvent::ToolCompleted { tool } => {
                debug!(tool = %tool, "agent tool completed");
                self.think(ThinkingStep::ToolResult {
                    tool,
                    result: "completed".to_owned(),
                })
            }
            AgentEvent::AgentUpdated { agent } => self.think(ThinkingStep::AgentUpdate { agent }),
            AgentEvent::Completed(_) => Vec::new(),
        }
    }

    /// The terminal success event. Returns `None` once the stream is closed.
    pub fn finish(&mut self, chat_id: &str, message: BotMessage) -> Option<StreamEvent> {
        if self.finished {
            return None;
        }
        self.finished = true;
        Some(StreamEvent::Done {
            chat_id: chat_id.to_owned(),
            message,
            thinking: self.thinking.clone(),
        })
    }

    /// The terminal failure event. Returns `None` once the stream is closed.
    pub fn fail(&mut self) -> Option<StreamEvent> {
        if self.finished {
            return None;
        }
        self.finished = true;
        Some(StreamEvent::Error {
            error: STREAM_ERROR_MESSAGE.to_owned(),
        })
    }

    fn think(&mut self, step: ThinkingStep) -> Vec<StreamEvent> {
        self.thinking.push(step.clone());
        vec![StreamEvent::Thinking(step)]
    }

    fn scrape_items(&mut self) -> Vec<StreamEvent> {
        self.scan_kind_markers();

        let mut events = Vec::new();
        for kind in [MessageKind::Deals, MessageKind::Orders, MessageKind::Payments] {
            let Some(scan) = self.scans.get_mut(&kind) else {
                continue;
            };
            let (items, consumed) = extract_records(kind, &self.accumulated_text[scan.offset..]);
            scan.offset += consumed;
            for item in items {
                events.push(StreamEvent::Item {
                    kind,
                    index: scan.emitted,
                    item,
                });
                scan.emitted += 1;
            }
        }
        events
    }

    fn scan_kind_markers(&mut self) {
        let text = &self.accumulated_text;
        let mut start = self.marker_offset.min(text.len());
        while !text.is_char_boundary(start) {
            start -= 1;
        }

        for captures in KIND_MARKER.captures_iter(&text[start..]) {
            if let Some(kind) = captures
                .get(1)
                .and_then(|found| MessageKind::parse(found.as_str()))
            {
                self.scans.entry(kind).or_default();
            }
        }
        self.marker_offset = text.len().saturating_sub(MARKER_LOOKBACK);
    }
}

/// Decodes every complete record in `text` and reports how far the last
/// match reached.
fn extract_records(kind: MessageKind, text: &str) -> (Vec<Value>, usize) {
    match kind {
        MessageKind::Deals => parse_matches::<Deal>(&DEAL_RECORD, text),
        MessageKind::Orders => parse_matches::<Order>(&ORDER_RECORD, text),
        MessageKind::Payments => parse_matches::<Payment>(&PAYMENT_RECORD, text),
        _ => (Vec::new(), 0),
    }
}

/// Each match is a complete JSON object, so it is decoded into the typed
/// record and re-encoded; matches that fail to decode are skipped.
fn parse_matches<T>(pattern: &Regex, text: &str) -> (Vec<Value>, usize)
where
    T: serde::de::DeserializeOwned + Serialize,
{
    let mut consumed = 0;
    let mut items = Vec::new();
    for found in pattern.find_iter(text) {
        consumed = found.end();
        if let Some(item) = serde_json::from_str::<T>(found.as_str())
            .ok()
            .and_then(|record| serde_json::to_value(record).ok())
        {
            items.push(item);
        }
    }
    (items, consumed)
}

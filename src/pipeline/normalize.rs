use crate::types::{MessageKind, StructuredOutput, TurnMetadata};

/// A bot turn in its persisted shape.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedReply {
    pub kind: MessageKind,
    pub content: String,
    pub metadata: Option<TurnMetadata>,
}

pub fn normalize(output: StructuredOutput) -> NormalizedReply {
    let kind = output.kind;
    let content = output
        .content
        .filter(|content| !content.trim().is_empty())
        .unwrap_or_else(|| default_content(kind).to_owned());

    let metadata = match kind {
        MessageKind::Deals => output.deals.map(|deals| TurnMetadata {
            deals: Some(deals),
            ..TurnMetadata::default()
        }),
        MessageKind::Orders => output.orders.map(|orders| TurnMetadata {
            orders: Some(orders),
            ..TurnMetadata::default()
        }),
        MessageKind::Payments => Some(TurnMetadata {
            payments: output.payments,
            summary: output.summary,
            ..TurnMetadata::default()
        }),
        MessageKind::Profile => output.profile.map(|profile| TurnMetadata {
            profile: Some(profile),
            ..TurnMetadata::default()
        }),
        MessageKind::Text | MessageKind::Menu => None,
    };

    NormalizedReply {
        kind,
        content,
        metadata,
    }
}

fn default_content(kind: MessageKind) -> &'static str {
    match kind {
        MessageKind::Deals => "Here are some deals for you:",
        MessageKind::Orders => "Here are your orders:",
        MessageKind::Payments => "Here is your payment information:",
        MessageKind::Profile => "Here is your profile:",
        MessageKind::Text | MessageKind::Menu => "Here is the information you requested.",
    }
}

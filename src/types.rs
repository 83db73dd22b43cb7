use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    User,
    Bot,
}

impl ChatRole {
    pub fn as_str(self) -> &'static str {
        match self {
            ChatRole::User => "user",
            ChatRole::Bot => "bot",
        }
    }

    /// Speaker label used when replaying history into a prompt.
    pub fn speaker(self) -> &'static str {
        match self {
            ChatRole::User => "User",
            ChatRole::Bot => "Assistant",
        }
    }
}

/// Discriminant tag of a structured output and of a persisted message.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    #[default]
    Text,
    Deals,
    Orders,
    Payments,
    Profile,
    Menu,
}

impl MessageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageKind::Text => "text",
            MessageKind::Deals => "deals",
            MessageKind::Orders => "orders",
            MessageKind::Payments => "payments",
            MessageKind::Profile => "profile",
            MessageKind::Menu => "menu",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "text" => Some(MessageKind::Text),
            "deals" => Some(MessageKind::Deals),
            "orders" => Some(MessageKind::Orders),
            "payments" => Some(MessageKind::Payments),
            "profile" => Some(MessageKind::Profile),
            "menu" => Some(MessageKind::Menu),
            _ => None,
        }
    }
}

// Catalog records are also read back from model output, so missing fields,
// nulls and float-valued counts are accepted when deserializing.

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Deal {
    #[serde(deserialize_with = "lenient_string")]
    pub id: String,
    #[serde(deserialize_with = "lenient_string")]
    pub title: String,
    #[serde(deserialize_with = "lenient_string")]
    pub description: String,
    #[serde(deserialize_with = "lenient_number")]
    pub price: f64,
    #[serde(rename = "imageURL")]
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Order {
    #[serde(deserialize_with = "lenient_string")]
    pub id: String,
    #[serde(deserialize_with = "lenient_string")]
    pub product_name: String,
    #[serde(deserialize_with = "lenient_string")]
    pub status: String,
    #[serde(rename = "imageURL")]
    pub image_url: Option<String>,
    pub payment_url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Payment {
    #[serde(deserialize_with = "lenient_string")]
    pub id: String,
    #[serde(deserialize_with = "lenient_number")]
    pub amount_paid: f64,
    #[serde(deserialize_with = "lenient_number")]
    pub pending_amount: f64,
    #[serde(deserialize_with = "lenient_string")]
    pub order_id: String,
    #[serde(deserialize_with = "lenient_string")]
    pub product_name: String,
    #[serde(deserialize_with = "lenient_string")]
    pub created_at: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PaymentSummary {
    #[serde(deserialize_with = "lenient_number")]
    pub total_paid: f64,
    #[serde(deserialize_with = "lenient_number")]
    pub total_pending: f64,
    #[serde(deserialize_with = "lenient_count")]
    pub count: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Profile {
    #[serde(deserialize_with = "lenient_string")]
    pub name: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub address: Option<String>,
    #[serde(deserialize_with = "lenient_count")]
    pub orders_count: u64,
    #[serde(deserialize_with = "lenient_count")]
    pub chats_count: u64,
    #[serde(deserialize_with = "lenient_string")]
    pub member_since: String,
}

fn lenient_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

fn lenient_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or_default())
}

/// Counts arrive as JSON numbers, which may be floats such as `2.0`.
fn lenient_count<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    let count = Option::<f64>::deserialize(deserializer)?.unwrap_or_default();
    Ok(if count.is_finite() && count > 0.0 {
        count.round() as u64
    } else {
        0
    })
}

/// The agent's structured answer for one turn. Which payload fields are
/// meaningful is selected by `kind`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StructuredOutput {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub deals: Option<Vec<Deal>>,
    #[serde(default)]
    pub orders: Option<Vec<Order>>,
    #[serde(default)]
    pub payments: Option<Vec<Payment>>,
    #[serde(default)]
    pub summary: Option<PaymentSummary>,
    #[serde(default)]
    pub profile: Option<Profile>,
}

impl StructuredOutput {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Text,
            content: Some(content.into()),
            ..Self::default()
        }
    }

    /// Reads an agent answer without rejecting it. A missing or unknown
    /// `type` reads as text and payload entries that are not records are
    /// skipped.
    pub fn from_object(object: &Map<String, Value>) -> Self {
        Self {
            kind: object
                .get("type")
                .and_then(Value::as_str)
                .and_then(MessageKind::parse)
                .unwrap_or_default(),
            content: object
                .get("content")
                .and_then(Value::as_str)
                .map(str::to_owned),
            deals: records(object.get("deals")),
            orders: records(object.get("orders")),
            payments: records(object.get("payments")),
            summary: object
                .get("summary")
                .and_then(|summary| PaymentSummary::deserialize(summary).ok()),
            profile: object
                .get("profile")
                .and_then(|profile| Profile::deserialize(profile).ok()),
        }
    }
}

fn records<T: DeserializeOwned>(value: Option<&Value>) -> Option<Vec<T>> {
    let items = value?.as_array()?;
    Some(
        items
            .iter()
            .filter(|item| item.is_object())
            .filter_map(|item| T::deserialize(item).ok())
            .collect(),
    )
}

/// Type-specific payload persisted alongside a bot message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TurnMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deals: Option<Vec<Deal>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orders: Option<Vec<Order>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payments: Option<Vec<Payment>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<PaymentSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<Profile>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRecord {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSummary {
    pub id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub message_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessageRecord {
    pub id: String,
    pub chat_id: String,
    pub role: ChatRole,
    pub content: String,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<TurnMetadata>,
    pub created_at: DateTime<Utc>,
}

/// Message body returned to the UI for a bot turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BotMessage {
    pub id: String,
    pub role: ChatRole,
    pub content: String,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<TurnMetadata>,
    pub created_at: DateTime<Utc>,
}

impl From<ChatMessageRecord> for BotMessage {
    fn from(record: ChatMessageRecord) -> Self {
        Self {
            id: record.id,
            role: record.role,
            content: record.content,
            kind: record.kind,
            metadata: record.metadata,
            created_at: record.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnReply {
    pub chat_id: String,
    pub message: BotMessage,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum PaymentMethod {
    Cod,
    Online,
}

/// Optional inclusive price bounds applied to deal lookups.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PriceRange {
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl PriceRange {
    pub fn contains(&self, price: f64) -> bool {
        self.min.is_none_or(|min| price >= min) && self.max.is_none_or(|max| price <= max)
    }
}

/// Shopper account as owned by the authentication service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserAccount {
    pub id: String,
    pub name: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub address: Option<String>,
    pub created_at: DateTime<Utc>,
}

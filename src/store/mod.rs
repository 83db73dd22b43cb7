mod in_memory;
mod postgres;

use async_trait::async_trait;

use crate::types::{
    ChatMessageRecord, ChatRecord, ChatRole, ChatSummary, Deal, MessageKind, Order, Payment,
    PaymentMethod, PriceRange, Profile, TurnMetadata,
};

pub use in_memory::InMemoryStore;
pub use postgres::PostgresStore;

#[derive(Debug, Clone)]
pub struct NewChatMessage {
    pub chat_id: String,
    pub role: ChatRole,
    pub content: String,
    pub kind: MessageKind,
    pub metadata: Option<TurnMetadata>,
}

/// Conversations and their turns, always scoped to the owning user.
#[async_trait]
pub trait ChatStore: Send + Sync {
    async fn find_chat(&self, chat_id: &str, user_id: &str) -> anyhow::Result<Option<ChatRecord>>;

    async fn create_chat(&self, user_id: &str, title: &str) -> anyhow::Result<ChatRecord>;

    /// Appends a turn and bumps the chat's `updated_at`.
    async fn append_message(&self, message: NewChatMessage) -> anyhow::Result<ChatMessageRecord>;

    /// The newest `limit` turns of a chat, oldest first.
    async fn recent_messages(
        &self,
        chat_id: &str,
        limit: usize,
    ) -> anyhow::Result<Vec<ChatMessageRecord>>;

    async fn list_messages(
        &self,
        chat_id: &str,
        user_id: &str,
    ) -> anyhow::Result<Vec<ChatMessageRecord>>;

    async fn list_chats(&self, user_id: &str) -> anyhow::Result<Vec<ChatSummary>>;

    async fn delete_chat(&self, chat_id: &str, user_id: &str) -> anyhow::Result<bool>;
}

/// Deals, orders, payments and profiles read or written by the agent's tools.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Newest deals first.
    async fn latest_deals(&self, range: PriceRange, limit: usize) -> anyhow::Result<Vec<Deal>>;

    /// Deals ordered by cosine distance to `embedding`.
    async fn similar_deals(
        &self,
        embedding: &[f32],
        range: PriceRange,
        limit: usize,
    ) -> anyhow::Result<Vec<Deal>>;

    async fn find_deal(&self, deal_id: &str) -> anyhow::Result<Option<Deal>>;

    async fn place_order(
        &self,
        user_id: &str,
        deal: &Deal,
        method: PaymentMethod,
    ) -> anyhow::Result<Order>;

    /// Newest orders first. `payment_url` is left unset.
    async fn recent_orders(&self, user_id: &str, limit: usize) -> anyhow::Result<Vec<Order>>;

    async fn recent_payments(&self, user_id: &str, limit: usize) -> anyhow::Result<Vec<Payment>>;

    async fn user_profile(&self, user_id: &str) -> anyhow::Result<Option<Profile>>;
}

pub(crate) const ORDER_STATUS_CONFIRMED: &str = "confirmed";

/// Splits the deal price between paid and pending according to the method.
pub(crate) fn initial_payment(price: f64, method: PaymentMethod) -> (f64, f64) {
    match method {
        PaymentMethod::Online => (price, 0.0),
        PaymentMethod::Cod => (0.0, price),
    }
}

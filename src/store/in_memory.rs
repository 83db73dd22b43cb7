use std::{cmp::Ordering, collections::HashMap, sync::Arc};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::types::{
    ChatMessageRecord, ChatRecord, ChatSummary, Deal, Order, Payment, PaymentMethod, PriceRange,
    Profile, UserAccount,
};

use super::{CatalogStore, ChatStore, NewChatMessage, ORDER_STATUS_CONFIRMED, initial_payment};

#[derive(Debug, Clone)]
struct DealListing {
    deal: Deal,
    embedding: Option<Vec<f32>>,
}

#[derive(Debug, Clone)]
struct OrderEntry {
    order: Order,
    user_id: String,
}

#[derive(Debug, Clone)]
struct PaymentEntry {
    payment: Payment,
    user_id: String,
}

#[derive(Debug, Default)]
pub struct InMemoryStore {
    users: Arc<RwLock<HashMap<String, UserAccount>>>,
    chats: Arc<RwLock<HashMap<String, ChatRecord>>>,
    messages: Arc<RwLock<Vec<ChatMessageRecord>>>,
    deals: Arc<RwLock<Vec<DealListing>>>,
    orders: Arc<RwLock<Vec<OrderEntry>>>,
    payments: Arc<RwLock<Vec<PaymentEntry>>>,
}

impl InMemoryStore {
    pub async fn insert_user(&self, user: UserAccount) {
        self.users.write().await.insert(user.id.clone(), user);
    }

    pub async fn insert_deal(&self, deal: Deal, embedding: Option<Vec<f32>>) {
        self.deals
            .write()
            .await
            .push(DealListing { deal, embedding });
    }

    /// Overwrites an order's status, e.g. to simulate an unpaid order.
    pub async fn set_order_status(&self, order_id: &str, status: &str) -> bool {
        let mut orders = self.orders.write().await;
        match orders.iter_mut().find(|entry| entry.order.id == order_id) {
            Some(entry) => {
                entry.order.status = status.to_owned();
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl ChatStore for InMemoryStore {
    async fn find_chat(&self, chat_id: &str, user_id: &str) -> anyhow::Result<Option<ChatRecord>> {
        Ok(self
            .chats
            .read()
            .await
            .get(chat_id)
            .filter(|chat| chat.user_id == user_id)
            .cloned())
    }

    async fn create_chat(&self, user_id: &str, title: &str) -> anyhow::Result<ChatRecord> {
        let now = Utc::now();
        let chat = ChatRecord {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_owned(),
            title: title.to_owned(),
            created_at: now,
            updated_at: now,
        };
        self.chats.write().await.insert(chat.id.clone(), chat.clone());
        Ok(chat)
    }

    async fn append_message(&self, message: NewChatMessage) -> anyhow::Result<ChatMessageRecord> {
        let now = Utc::now();
        {
            let mut chats = self.chats.write().await;
            let chat = chats
                .get_mut(&message.chat_id)
                .ok_or_else(|| anyhow::anyhow!("chat {} does not exist", message.chat_id))?;
            chat.updated_at = now;
        }

        let record = ChatMessageRecord {
            id: Uuid::new_v4().to_string(),
            chat_id: message.chat_id,
            role: message.role,
            content: message.content,
            kind: message.kind,
            metadata: message.metadata,
            created_at: now,
        };
        self.messages.write().await.push(record.clone());
        Ok(record)
    }

    async fn recent_messages(
        &self,
        chat_id: &str,
        limit: usize,
    ) -> anyhow::Result<Vec<ChatMessageRecord>> {
        let mut messages = self
            .messages
            .read()
            .await
            .iter()
            .filter(|message| message.chat_id == chat_id)
            .cloned()
            .collect::<Vec<_>>();
        if messages.len() > limit {
            let start = messages.len().saturating_sub(limit);
            messages = messages.split_off(start);
        }
        Ok(messages)
    }

    async fn list_messages(
        &self,
        chat_id: &str,
        user_id: &str,
    ) -> anyhow::Result<Vec<ChatMessageRecord>> {
        if self.find_chat(chat_id, user_id).await?.is_none() {
            return Ok(Vec::new());
        }
        Ok(self
            .messages
            .read()
            .await
            .iter()
            .filter(|message| message.chat_id == chat_id)
            .cloned()
            .collect())
    }

    async fn list_chats(&self, user_id: &str) -> anyhow::Result<Vec<ChatSummary>> {
        let chats = self.chats.read().await;
        let messages = self.messages.read().await;

        let mut summaries = chats
            .values()
            .filter(|chat| chat.user_id == user_id)
            .map(|chat| ChatSummary {
                id: chat.id.clone(),
                title: chat.title.clone(),
                created_at: chat.created_at,
                updated_at: chat.updated_at,
                message_count: messages
                    .iter()
                    .filter(|message| message.chat_id == chat.id)
                    .count() as i64,
            })
            .collect::<Vec<_>>();
        summaries.sort_by_key(|summary| std::cmp::Reverse(summary.updated_at));
        Ok(summaries)
    }

    async fn delete_chat(&self, chat_id: &str, user_id: &str) -> anyhow::Result<bool> {
        let mut chats = self.chats.write().await;
        let owned = chats
            .get(chat_id)
            .is_some_and(|chat| chat.user_id == user_id);
        if !owned {
            return Ok(false);
        }
        chats.remove(chat_id);
        self.messages
            .write()
            .await
            .retain(|message| message.chat_id != chat_id);
        Ok(true)
    }
}

#[async_trait]
impl CatalogStore for InMemoryStore {
    async fn latest_deals(&self, range: PriceRange, limit: usize) -> anyhow::Result<Vec<Deal>> {
        Ok(self
            .deals
            .read()
            .await
            .iter()
            .rev()
            .filter(|listing| range.contains(listing.deal.price))
            .take(limit)
            .map(|listing| listing.deal.clone())
            .collect())
    }

    async fn similar_deals(
        &self,
        embedding: &[f32],
        range: PriceRange,
        limit: usize,
    ) -> anyhow::Result<Vec<Deal>> {
        let mut scored = self
            .deals
            .read()
            .await
            .iter()
            .filter(|listing| range.contains(listing.deal.price))
            .filter_map(|listing| {
                let candidate = listing.embedding.as_deref()?;
                Some((cosine_distance(embedding, candidate), listing.deal.clone()))
            })
            .collect::<Vec<_>>();
        scored.sort_by(|left, right| left.0.partial_cmp(&right.0).unwrap_or(Ordering::Equal));
        Ok(scored.into_iter().take(limit).map(|(_, deal)| deal).collect())
    }

    async fn find_deal(&self, deal_id: &str) -> anyhow::Result<Option<Deal>> {
        Ok(self
            .deals
            .read()
            .await
            .iter()
            .find(|listing| listing.deal.id == deal_id)
            .map(|listing| listing.deal.clone()))
    }

    async fn place_order(
        &self,
        user_id: &str,
        deal: &Deal,
        method: PaymentMethod,
    ) -> anyhow::Result<Order> {
        let now = Utc::now();
        let order = Order {
            id: Uuid::new_v4().to_string(),
            product_name: deal.title.clone(),
            status: ORDER_STATUS_CONFIRMED.to_owned(),
            image_url: deal.image_url.clone(),
            payment_url: None,
        };
        let (amount_paid, pending_amount) = initial_payment(deal.price, method);

        self.orders.write().await.push(OrderEntry {
            order: order.clone(),
            user_id: user_id.to_owned(),
        });
        self.payments.write().await.push(PaymentEntry {
            payment: Payment {
                id: Uuid::new_v4().to_string(),
                order_id: order.id.clone(),
                product_name: order.product_name.clone(),
                amount_paid,
                pending_amount,
                created_at: now.to_rfc3339(),
            },
            user_id: user_id.to_owned(),
        });

        Ok(order)
    }

    async fn recent_orders(&self, user_id: &str, limit: usize) -> anyhow::Result<Vec<Order>> {
        Ok(self
            .orders
            .read()
            .await
            .iter()
            .rev()
            .filter(|entry| entry.user_id == user_id)
            .take(limit)
            .map(|entry| entry.order.clone())
            .collect())
    }

    async fn recent_payments(&self, user_id: &str, limit: usize) -> anyhow::Result<Vec<Payment>> {
        let mut payments = self
            .payments
            .read()
            .await
            .iter()
            .filter(|entry| entry.user_id == user_id)
            .map(|entry| entry.payment.clone())
            .collect::<Vec<_>>();
        payments.reverse();
        payments.truncate(limit);
        Ok(payments)
    }

    async fn user_profile(&self, user_id: &str) -> anyhow::Result<Option<Profile>> {
        let Some(user) = self.users.read().await.get(user_id).cloned() else {
            return Ok(None);
        };
        let orders_count = self
            .orders
            .read()
            .await
            .iter()
            .filter(|entry| entry.user_id == user_id)
            .count() as u64;
        let chats_count = self
            .chats
            .read()
            .await
            .values()
            .filter(|chat| chat.user_id == user_id)
            .count() as u64;

        Ok(Some(Profile {
            name: user.name,
            phone: user.phone,
            email: user.email,
            address: user.address,
            orders_count,
            chats_count,
            member_since: user.created_at.to_rfc3339(),
        }))
    }
}

fn cosine_distance(left: &[f32], right: &[f32]) -> f32 {
    let dot = left
        .iter()
        .zip(right)
        .map(|(a, b)| a * b)
        .sum::<f32>();
    let left_norm = left.iter().map(|value| value * value).sum::<f32>().sqrt();
    let right_norm = right.iter().map(|value| value * value).sum::<f32>().sqrt();
    if left_norm == 0.0 || right_norm == 0.0 {
        return 1.0;
    }
    1.0 - dot / (left_norm * right_norm)
}

#[cfg(test)]
mod tests {
    use crate::{
        store::{CatalogStore, ChatStore, NewChatMessage},
        types::{ChatRole, Deal, MessageKind, PaymentMethod, PriceRange},
    };

    use super::InMemoryStore;

    fn deal(id: &str, price: f64) -> Deal {
        Deal {
            id: id.to_owned(),
            title: format!("Deal {id}"),
            description: "test".to_owned(),
            price,
            image_url: None,
        }
    }

    #[tokio::test]
    async fn chats_are_scoped_to_their_owner() {
        let store = InMemoryStore::default();
        let chat = store
            .create_chat("u1", "hello")
            .await
            .expect("create chat should succeed");

        assert!(store
            .find_chat(&chat.id, "u1")
            .await
            .expect("find should succeed")
            .is_some());
        assert!(store
            .find_chat(&chat.id, "u2")
            .await
            .expect("find should succeed")
            .is_none());
        assert!(!store
            .delete_chat(&chat.id, "u2")
            .await
            .expect("delete should succeed"));
    }

    #[tokio::test]
    async fn recent_messages_returns_newest_window_in_order() {
        let store = InMemoryStore::default();
        let chat = store
            .create_chat("u1", "window")
            .await
            .expect("create chat should succeed");
        for index in 0..5 {
            store
                .append_message(NewChatMessage {
                    chat_id: chat.id.clone(),
                    role: ChatRole::User,
                    content: format!("m{index}"),
                    kind: MessageKind::Text,
                    metadata: None,
                })
                .await
                .expect("append should succeed");
        }

        let window = store
            .recent_messages(&chat.id, 3)
            .await
            .expect("recent should succeed");
        let contents = window
            .iter()
            .map(|message| message.content.as_str())
            .collect::<Vec<_>>();
        assert_eq!(contents, vec!["m2", "m3", "m4"]);
    }

    #[tokio::test]
    async fn deleting_a_chat_removes_its_messages() {
        let store = InMemoryStore::default();
        let chat = store
            .create_chat("u1", "bye")
            .await
            .expect("create chat should succeed");
        store
            .append_message(NewChatMessage {
                chat_id: chat.id.clone(),
                role: ChatRole::User,
                content: "hi".to_owned(),
                kind: MessageKind::Text,
                metadata: None,
            })
            .await
            .expect("append should succeed");

        assert!(store
            .delete_chat(&chat.id, "u1")
            .await
            .expect("delete should succeed"));
        assert!(store
            .recent_messages(&chat.id, 10)
            .await
            .expect("recent should succeed")
            .is_empty());
    }

    #[tokio::test]
    async fn similar_deals_orders_by_distance_within_price_range() {
        let store = InMemoryStore::default();
        store.insert_deal(deal("near", 100.0), Some(vec![1.0, 0.0])).await;
        store.insert_deal(deal("far", 100.0), Some(vec![0.0, 1.0])).await;
        store.insert_deal(deal("pricey", 5000.0), Some(vec![1.0, 0.0])).await;

        let deals = store
            .similar_deals(
                &[0.9, 0.1],
                PriceRange {
                    min: None,
                    max: Some(1000.0),
                },
                4,
            )
            .await
            .expect("search should succeed");
        let ids = deals.iter().map(|deal| deal.id.as_str()).collect::<Vec<_>>();
        assert_eq!(ids, vec!["near", "far"]);
    }

    #[tokio::test]
    async fn cash_on_delivery_leaves_full_amount_pending() {
        let store = InMemoryStore::default();
        let listed = deal("d1", 250.0);
        store.insert_deal(listed.clone(), None).await;

        let order = store
            .place_order("u1", &listed, PaymentMethod::Cod)
            .await
            .expect("order should succeed");
        assert_eq!(order.status, "confirmed");

        let payments = store
            .recent_payments("u1", 5)
            .await
            .expect("payments should load");
        assert_eq!(payments.len(), 1);
        assert_eq!(payments[0].amount_paid, 0.0);
        assert_eq!(payments[0].pending_amount, 250.0);
    }
}

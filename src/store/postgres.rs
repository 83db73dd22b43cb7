use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, postgres::PgPoolOptions, types::Json};
use uuid::Uuid;

use crate::types::{
    ChatMessageRecord, ChatRecord, ChatRole, ChatSummary, Deal, MessageKind, Order, Payment,
    PaymentMethod, PriceRange, Profile, TurnMetadata,
};

use super::{CatalogStore, ChatStore, NewChatMessage, ORDER_STATUS_CONFIRMED, initial_payment};

const SCHEMA: &str = include_str!("schema.sql");

type MessageRow = (
    String,
    String,
    String,
    String,
    String,
    Option<Json<TurnMetadata>>,
    DateTime<Utc>,
);

type DealRow = (String, String, String, f64, Option<String>);

#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        sqlx::raw_sql(SCHEMA).execute(&pool).await?;
        Ok(Self { pool })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl ChatStore for PostgresStore {
    async fn find_chat(&self, chat_id: &str, user_id: &str) -> anyhow::Result<Option<ChatRecord>> {
        let chat = sqlx::query_as::<_, (String, String, String, DateTime<Utc>, DateTime<Utc>)>(
            "SELECT id, user_id, title, created_at, updated_at
             FROM chats
             WHERE id = $1 AND user_id = $2",
        )
        .bind(chat_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?
        .map(|(id, user_id, title, created_at, updated_at)| ChatRecord {
            id,
            user_id,
            title,
            created_at,
            updated_at,
        });

        Ok(chat)
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

        sqlx::query(
            "INSERT INTO chats (id, user_id, title, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(&chat.id)
        .bind(&chat.user_id)
        .bind(&chat.title)
        .bind(chat.created_at)
        .bind(chat.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(chat)
    }

    async fn append_message(&self, message: NewChatMessage) -> anyhow::Result<ChatMessageRecord> {
        let record = ChatMessageRecord {
            id: Uuid::new_v4().to_string(),
            chat_id: message.chat_id,
            role: message.role,
            content: message.content,
            kind: message.kind,
            metadata: message.metadata,
            created_at: Utc::now(),
        };

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO messages (id, chat_id, role, content, type, metadata, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(&record.id)
        .bind(&record.chat_id)
        .bind(record.role.as_str())
        .bind(&record.content)
        .bind(record.kind.as_str())
        .bind(record.metadata.clone().map(Json))
        .bind(record.created_at)
        .execute(&mut *tx)
        .await?;
        sqlx::query("UPDATE chats SET updated_at = $2 WHERE id = $1")
            .bind(&record.chat_id)
            .bind(record.created_at)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(record)
    }

    async fn recent_messages(
        &self,
        chat_id: &str,
        limit: usize,
    ) -> anyhow::Result<Vec<ChatMessageRecord>> {
        let limit = limit as i64;

        let mut messages = sqlx::query_as::<_, MessageRow>(
            "SELECT id, chat_id, role, content, type, metadata, created_at
             FROM messages
             WHERE chat_id = $1
             ORDER BY created_at DESC
             LIMIT $2",
        )
        .bind(chat_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(message_from_row)
        .collect::<Vec<_>>();

        messages.reverse();
        Ok(messages)
    }

    async fn list_messages(
        &self,
        chat_id: &str,
        user_id: &str,
    ) -> anyhow::Result<Vec<ChatMessageRecord>> {
        let messages = sqlx::query_as::<_, MessageRow>(
            "SELECT m.id, m.chat_id, m.role, m.content, m.type, m.metadata, m.created_at
             FROM messages m
             JOIN chats c ON c.id = m.chat_id
             WHERE m.chat_id = $1 AND c.user_id = $2
             ORDER BY m.created_at ASC",
        )
        .bind(chat_id)
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(message_from_row)
        .collect();

        Ok(messages)
    }

    async fn list_chats(&self, user_id: &str) -> anyhow::Result<Vec<ChatSummary>> {
        let chats = sqlx::query_as::<_, (String, String, DateTime<Utc>, DateTime<Utc>, i64)>(
            "SELECT c.id, c.title, c.created_at, c.updated_at, COUNT(m.id)::bigint AS message_count
             FROM chats c
             LEFT JOIN messages m ON m.chat_id = c.id
             WHERE c.user_id = $1
             GROUP BY c.id
             ORDER BY c.updated_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(
            |(id, title, created_at, updated_at, message_count)| ChatSummary {
                id,
                title,
                created_at,
                updated_at,
                message_count,
            },
        )
        .collect();

        Ok(chats)
    }

    async fn delete_chat(&self, chat_id: &str, user_id: &str) -> anyhow::Result<bool> {
        let result = sqlx::query("DELETE FROM chats WHERE id = $1 AND user_id = $2")
            .bind(chat_id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl CatalogStore for PostgresStore {
    async fn latest_deals(&self, range: PriceRange, limit: usize) -> anyhow::Result<Vec<Deal>> {
        let deals = sqlx::query_as::<_, DealRow>(
            "SELECT id, title, description, price, image_url
             FROM deals
             WHERE ($1::float8 IS NULL OR price >= $1)
               AND ($2::float8 IS NULL OR price <= $2)
             ORDER BY created_at DESC
             LIMIT $3",
        )
        .bind(range.min)
        .bind(range.max)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(deal_from_row)
        .collect();

        Ok(deals)
    }

    async fn similar_deals(
        &self,
        embedding: &[f32],
        range: PriceRange,
        limit: usize,
    ) -> anyhow::Result<Vec<Deal>> {
        let deals = sqlx::query_as::<_, DealRow>(
            "SELECT id, title, description, price, image_url
             FROM deals
             WHERE embedding IS NOT NULL
               AND ($2::float8 IS NULL OR price >= $2)
               AND ($3::float8 IS NULL OR price <= $3)
             ORDER BY embedding <=> $1::vector
             LIMIT $4",
        )
        .bind(vector_literal(embedding))
        .bind(range.min)
        .bind(range.max)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(deal_from_row)
        .collect();

        Ok(deals)
    }

    async fn find_deal(&self, deal_id: &str) -> anyhow::Result<Option<Deal>> {
        let deal = sqlx::query_as::<_, DealRow>(
            "SELECT id, title, description, price, image_url
             FROM deals
             WHERE id = $1",
        )
        .bind(deal_id)
        .fetch_optional(&self.pool)
        .await?
        .map(deal_from_row);

        Ok(deal)
    }

    async fn place_order(
        &self,
        user_id: &str,
        deal: &Deal,
        method: PaymentMethod,
    ) -> anyhow::Result<Order> {
        let order = Order {
            id: Uuid::new_v4().to_string(),
            product_name: deal.title.clone(),
            status: ORDER_STATUS_CONFIRMED.to_owned(),
            image_url: deal.image_url.clone(),
            payment_url: None,
        };
        let (amount_paid, pending_amount) = initial_payment(deal.price, method);

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO orders (id, user_id, product_name, image_url, status)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(&order.id)
        .bind(user_id)
        .bind(&order.product_name)
        .bind(&order.image_url)
        .bind(&order.status)
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            "INSERT INTO payments (id, order_id, amount_paid, pending_amount)
             VALUES ($1, $2, $3, $4)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&order.id)
        .bind(amount_paid)
        .bind(pending_amount)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(order)
    }

    async fn recent_orders(&self, user_id: &str, limit: usize) -> anyhow::Result<Vec<Order>> {
        let orders = sqlx::query_as::<_, (String, String, String, Option<String>)>(
            "SELECT id, product_name, status, image_url
             FROM orders
             WHERE user_id = $1
             ORDER BY created_at DESC
             LIMIT $2",
        )
        .bind(user_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(|(id, product_name, status, image_url)| Order {
            id,
            product_name,
            status,
            image_url,
            payment_url: None,
        })
        .collect();

        Ok(orders)
    }

    async fn recent_payments(&self, user_id: &str, limit: usize) -> anyhow::Result<Vec<Payment>> {
        let payments = sqlx::query_as::<_, (String, String, String, f64, f64, DateTime<Utc>)>(
            "SELECT p.id, p.order_id, o.product_name, p.amount_paid, p.pending_amount, p.created_at
             FROM payments p
             JOIN orders o ON o.id = p.order_id
             WHERE o.user_id = $1
             ORDER BY p.created_at DESC
             LIMIT $2",
        )
        .bind(user_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(
            |(id, order_id, product_name, amount_paid, pending_amount, created_at)| Payment {
                id,
                order_id,
                product_name,
                amount_paid,
                pending_amount,
                created_at: created_at.to_rfc3339(),
            },
        )
        .collect();

        Ok(payments)
    }

    async fn user_profile(&self, user_id: &str) -> anyhow::Result<Option<Profile>> {
        let profile = sqlx::query_as::<
            _,
            (
                String,
                Option<String>,
                Option<String>,
                Option<String>,
                i64,
                i64,
                DateTime<Utc>,
            ),
        >(
            "SELECT
                 u.name,
                 u.phone,
                 u.email,
                 u.address,
                 (SELECT COUNT(*) FROM orders o WHERE o.user_id = u.id)::bigint AS orders_count,
                 (SELECT COUNT(*) FROM chats c WHERE c.user_id = u.id)::bigint AS chats_count,
                 u.created_at
             FROM users u
             WHERE u.id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?
        .map(
            |(name, phone, email, address, orders_count, chats_count, created_at)| Profile {
                name,
                phone,
                email,
                address,
                orders_count: orders_count.max(0) as u64,
                chats_count: chats_count.max(0) as u64,
                member_since: created_at.to_rfc3339(),
            },
        );

        Ok(profile)
    }
}

fn message_from_row(
    (id, chat_id, role, content, kind, metadata, created_at): MessageRow,
) -> ChatMessageRecord {
    ChatMessageRecord {
        id,
        chat_id,
        role: parse_role(&role),
        content,
        kind: MessageKind::parse(&kind).unwrap_or_default(),
        metadata: metadata.map(|json| json.0),
        created_at,
    }
}

fn deal_from_row((id, title, description, price, image_url): DealRow) -> Deal {
    Deal {
        id,
        title,
        description,
        price,
        image_url,
    }
}

fn parse_role(role: &str) -> ChatRole {
    match role {
        "bot" => ChatRole::Bot,
        _ => ChatRole::User,
    }
}

/// pgvector text form, e.g. `[0.1,0.2]`.
fn vector_literal(embedding: &[f32]) -> String {
    let values = embedding
        .iter()
        .map(f32::to_string)
        .collect::<Vec<_>>()
        .join(",");
    format!("[{values}]")
}

use std::sync::Arc;

use serde_json::json;

use crate::{
    store::CatalogStore,
    types::{MessageKind, PaymentSummary, StructuredOutput},
};

use super::{GET_PAYMENT_STATUS, GET_USER_PROFILE, ToolContext, ToolDefinition};

const RECENT_PAYMENT_LIMIT: usize = 5;

pub struct AccountTool {
    catalog: Arc<dyn CatalogStore>,
}

impl AccountTool {
    pub fn new(catalog: Arc<dyn CatalogStore>) -> Self {
        Self { catalog }
    }

    pub async fn payment_status(&self, ctx: &ToolContext) -> anyhow::Result<StructuredOutput> {
        let payments = self
            .catalog
            .recent_payments(&ctx.user_id, RECENT_PAYMENT_LIMIT)
            .await?;

        if payments.is_empty() {
            return Ok(StructuredOutput::text("No payments found."));
        }

        let summary = PaymentSummary {
            total_paid: payments.iter().map(|payment| payment.amount_paid).sum(),
            total_pending: payments.iter().map(|payment| payment.pending_amount).sum(),
            count: payments.len() as u64,
        };

        Ok(StructuredOutput {
            kind: MessageKind::Payments,
            content: Some("Here is your payment summary.".to_owned()),
            payments: Some(payments),
            summary: Some(summary),
            ..StructuredOutput::default()
        })
    }

    pub async fn profile(&self, ctx: &ToolContext) -> anyhow::Result<StructuredOutput> {
        let Some(mut profile) = self.catalog.user_profile(&ctx.user_id).await? else {
            return Ok(StructuredOutput::text("Profile not found."));
        };

        if profile
            .address
            .as_deref()
            .is_none_or(|address| address.trim().is_empty())
        {
            profile.address = Some("Not set".to_owned());
        }

        Ok(StructuredOutput {
            kind: MessageKind::Profile,
            content: Some("Here is your profile detail.".to_owned()),
            profile: Some(profile),
            ..StructuredOutput::default()
        })
    }
}

pub(super) fn payment_status_definition() -> ToolDefinition {
    ToolDefinition {
        name: GET_PAYMENT_STATUS,
        description: "Get the user's recent payments and a paid/pending summary.",
        parameters: json!({ "type": "object", "properties": {} }),
    }
}

pub(super) fn user_profile_definition() -> ToolDefinition {
    ToolDefinition {
        name: GET_USER_PROFILE,
        description: "Get the user's profile details.",
        parameters: json!({ "type": "object", "properties": {} }),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::{
        store::{CatalogStore, InMemoryStore},
        tools::ToolContext,
        types::{Deal, MessageKind, PaymentMethod},
    };

    use super::AccountTool;

    #[tokio::test]
    async fn summarizes_paid_and_pending_amounts() {
        let store = Arc::new(InMemoryStore::default());
        let deal = |id: &str, price: f64| Deal {
            id: id.to_owned(),
            title: format!("Deal {id}"),
            description: "test".to_owned(),
            price,
            image_url: None,
        };
        store
            .place_order("u1", &deal("a", 100.0), PaymentMethod::Online)
            .await
            .expect("order should succeed");
        store
            .place_order("u1", &deal("b", 40.0), PaymentMethod::Cod)
            .await
            .expect("order should succeed");
        let tool = AccountTool::new(store);

        let output = tool
            .payment_status(&ToolContext {
                user_id: "u1".to_owned(),
            })
            .await
            .expect("payment status should succeed");

        assert_eq!(output.kind, MessageKind::Payments);
        let summary = output.summary.expect("summary should be present");
        assert_eq!(summary.total_paid, 100.0);
        assert_eq!(summary.total_pending, 40.0);
        assert_eq!(summary.count, 2);
        let payments = output.payments.expect("payments should be present");
        assert_eq!(payments[0].product_name, "Deal b");
    }

    #[tokio::test]
    async fn no_payments_is_a_text_reply() {
        let tool = AccountTool::new(Arc::new(InMemoryStore::default()));
        let output = tool
            .payment_status(&ToolContext {
                user_id: "u1".to_owned(),
            })
            .await
            .expect("payment status should succeed");
        assert_eq!(output.kind, MessageKind::Text);
        assert_eq!(output.content.as_deref(), Some("No payments found."));
    }
}

use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;

use crate::{
    store::CatalogStore,
    types::{MessageKind, PaymentMethod, StructuredOutput},
};

use super::{GET_ORDERS, PLACE_ORDER, ToolContext, ToolDefinition};

const RECENT_ORDER_LIMIT: usize = 5;
pub(crate) const ORDER_STATUS_PAYMENT_PENDING: &str = "payment_pending";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaceOrderArgs {
    pub deal_id: String,
    pub payment_method: PaymentMethod,
}

pub struct OrderTool {
    catalog: Arc<dyn CatalogStore>,
    payment_url_base: String,
}

impl OrderTool {
    pub fn new(catalog: Arc<dyn CatalogStore>, payment_url_base: String) -> Self {
        Self {
            catalog,
            payment_url_base: payment_url_base.trim_end_matches('/').to_owned(),
        }
    }

    pub async fn place(
        &self,
        args: PlaceOrderArgs,
        ctx: &ToolContext,
    ) -> anyhow::Result<StructuredOutput> {
        let Some(deal) = self.catalog.find_deal(&args.deal_id).await? else {
            return Ok(StructuredOutput::text("Deal not found or invalid Deal ID."));
        };

        let order = self
            .catalog
            .place_order(&ctx.user_id, &deal, args.payment_method)
            .await?;

        Ok(StructuredOutput {
            kind: MessageKind::Orders,
            content: Some("Order placed successfully!".to_owned()),
            orders: Some(vec![order]),
            ..StructuredOutput::default()
        })
    }

    pub async fn recent(&self, ctx: &ToolContext) -> anyhow::Result<StructuredOutput> {
        let mut orders = self
            .catalog
            .recent_orders(&ctx.user_id, RECENT_ORDER_LIMIT)
            .await?;

        if orders.is_empty() {
            return Ok(StructuredOutput::text("You don't have any orders yet."));
        }

        for order in &mut orders {
            order.payment_url = (order.status == ORDER_STATUS_PAYMENT_PENDING)
                .then(|| format!("{}/{}", self.payment_url_base, order.id));
        }

        Ok(StructuredOutput {
            kind: MessageKind::Orders,
            content: Some("Here are your recent orders:".to_owned()),
            orders: Some(orders),
            ..StructuredOutput::default()
        })
    }
}

pub(super) fn place_order_definition() -> ToolDefinition {
    ToolDefinition {
        name: PLACE_ORDER,
        description: "Place an order for a specific deal. Use only when the user explicitly wants to buy something and has chosen a payment method.",
        parameters: json!({
            "type": "object",
            "properties": {
                "dealId": {
                    "type": "string",
                    "description": "The ID of the deal to order. Must come from a previous deal search."
                },
                "paymentMethod": {
                    "type": "string",
                    "enum": ["COD", "ONLINE"],
                    "description": "'COD' (Cash on Delivery) or 'ONLINE' (Pay Now)."
                }
            },
            "required": ["dealId", "paymentMethod"]
        }),
    }
}

pub(super) fn get_orders_definition() -> ToolDefinition {
    ToolDefinition {
        name: GET_ORDERS,
        description: "Get the user's order history.",
        parameters: json!({ "type": "object", "properties": {} }),
    }
}

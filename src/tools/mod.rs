mod account;
mod deals;
mod orders;

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::{embedding::Embedder, store::CatalogStore, types::StructuredOutput};

pub use account::AccountTool;
pub use deals::{DealSearchTool, GetDealsArgs};
pub use orders::{OrderTool, PlaceOrderArgs};

pub const GET_DEALS: &str = "get_deals";
pub const PLACE_ORDER: &str = "place_order";
pub const GET_ORDERS: &str = "get_orders";
pub const GET_PAYMENT_STATUS: &str = "get_payment_status";
pub const GET_USER_PROFILE: &str = "get_user_profile";

/// Per-turn facts a tool may rely on. The acting user always comes from the
/// authenticated session, never from model-supplied arguments.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub user_id: String,
}

/// Function-tool description handed to the agent.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDefinition {
    pub name: &'static str,
    pub description: &'static str,
    pub parameters: Value,
}

#[async_trait]
pub trait ToolExecutor: Send + Sync {
    fn definitions(&self) -> Vec<ToolDefinition>;

    /// Runs a tool and returns its JSON result text. Data-layer failures are
    /// reported inside the result; only unknown tools and malformed
    /// arguments are errors.
    async fn execute(&self, tool_name: &str, args: Value, ctx: &ToolContext)
    -> anyhow::Result<String>;
}

#[derive(Debug, Clone)]
pub struct ToolSettings {
    pub vector_search_timeout: Duration,
    pub payment_url_base: String,
}

pub struct ToolRegistry {
    deals: DealSearchTool,
    orders: OrderTool,
    account: AccountTool,
}

impl ToolRegistry {
    pub fn new(
        catalog: Arc<dyn CatalogStore>,
        embedder: Option<Arc<dyn Embedder>>,
        settings: ToolSettings,
    ) -> Self {
        Self {
            deals: DealSearchTool::new(catalog.clone(), embedder, settings.vector_search_timeout),
            orders: OrderTool::new(catalog.clone(), settings.payment_url_base),
            account: AccountTool::new(catalog),
        }
    }
}

#[async_trait]
impl ToolExecutor for ToolRegistry {
    fn definitions(&self) -> Vec<ToolDefinition> {
        vec![
            deals::definition(),
            orders::place_order_definition(),
            orders::get_orders_definition(),
            account::payment_status_definition(),
            account::user_profile_definition(),
        ]
    }

    async fn execute(
        &self,
        tool_name: &str,
        args: Value,
        ctx: &ToolContext,
    ) -> anyhow::Result<String> {
        info!(user_id = %ctx.user_id, tool_name, args_json = %args, "tool call start");

        let output = match tool_name {
            GET_DEALS => {
                let args = parse_args::<GetDealsArgs>(args)?;
                self.deals
                    .search(args)
                    .await
                    .unwrap_or_else(|error| failed(tool_name, error, "Error fetching deals."))
            }
            PLACE_ORDER => {
                let args = parse_args::<PlaceOrderArgs>(args)?;
                self.orders.place(args, ctx).await.unwrap_or_else(|error| {
                    failed(tool_name, error, "Failed to place order. Please try again.")
                })
            }
            GET_ORDERS => self
                .orders
                .recent(ctx)
                .await
                .unwrap_or_else(|error| failed(tool_name, error, "Error fetching orders.")),
            GET_PAYMENT_STATUS => self
                .account
                .payment_status(ctx)
                .await
                .unwrap_or_else(|error| failed(tool_name, error, "Error fetching payments.")),
            GET_USER_PROFILE => self
                .account
                .profile(ctx)
                .await
                .unwrap_or_else(|error| failed(tool_name, error, "Error fetching profile.")),
            _ => return Err(anyhow::anyhow!("unknown tool: {tool_name}")),
        };

        info!(
            user_id = %ctx.user_id,
            tool_name,
            result_type = output.kind.as_str(),
            "tool call completed"
        );

        Ok(serde_json::to_string(&output)?)
    }
}

fn parse_args<T: serde::de::DeserializeOwned>(args: Value) -> anyhow::Result<T> {
    // Models sometimes send `null` for tools without parameters.
    let args = if args.is_null() {
        Value::Object(Default::default())
    } else {
        args
    };
    serde_json::from_value(args).map_err(|error| anyhow::anyhow!("invalid tool arguments: {error}"))
}

fn failed(tool_name: &str, error: anyhow::Error, message: &str) -> StructuredOutput {
    warn!(tool_name, ?error, "tool call failed");
    StructuredOutput::text(message)
}

use std::{sync::Arc, time::Duration};

use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::{
    embedding::Embedder,
    store::CatalogStore,
    types::{MessageKind, PriceRange, StructuredOutput},
};

use super::{GET_DEALS, ToolDefinition};

const DEFAULT_LIMIT: usize = 4;
const MAX_LIMIT: usize = 20;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetDealsArgs {
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub min_price: Value,
    #[serde(default)]
    pub max_price: Value,
    #[serde(default)]
    pub limit: Option<u64>,
}

pub struct DealSearchTool {
    catalog: Arc<dyn CatalogStore>,
    embedder: Option<Arc<dyn Embedder>>,
    vector_search_timeout: Duration,
}

impl DealSearchTool {
    pub fn new(
        catalog: Arc<dyn CatalogStore>,
        embedder: Option<Arc<dyn Embedder>>,
        vector_search_timeout: Duration,
    ) -> Self {
        Self {
            catalog,
            embedder,
            vector_search_timeout,
        }
    }

    pub async fn search(&self, args: GetDealsArgs) -> anyhow::Result<StructuredOutput> {
        let range = PriceRange {
            min: parse_price(&args.min_price),
            max: parse_price(&args.max_price),
        };
        let limit = args
            .limit
            .map(|limit| (limit as usize).clamp(1, MAX_LIMIT))
            .unwrap_or(DEFAULT_LIMIT);
        let query = args.query.trim();
        let query_label = if query.is_empty() { "ALL" } else { query };

        info!(
            query = query_label,
            min_price = ?range.min,
            max_price = ?range.max,
            limit,
            "deal search start"
        );

        let deals = match (&self.embedder, query.is_empty()) {
            (Some(embedder), false) => {
                let embedding = embedder.embed(query).await?;
                tokio::time::timeout(
                    self.vector_search_timeout,
                    self.catalog.similar_deals(&embedding, range, limit),
                )
                .await
                .map_err(|_| {
                    anyhow::anyhow!(
                        "vector search timed out after {}ms",
                        self.vector_search_timeout.as_millis()
                    )
                })??
            }
            (None, false) => {
                debug!("no embedder configured; falling back to latest deals");
                self.catalog.latest_deals(range, limit).await?
            }
            (_, true) => self.catalog.latest_deals(range, limit).await?,
        };

        if deals.is_empty() {
            return Ok(StructuredOutput::text(
                "No deals found matching your criteria. Try a different search or price range.",
            ));
        }

        Ok(StructuredOutput {
            kind: MessageKind::Deals,
            content: Some(format!("Found {} deals for you!", deals.len())),
            deals: Some(deals),
            ..StructuredOutput::default()
        })
    }
}

/// Reads a price bound. `"NULL"`, blanks, non-numeric and non-positive
/// values all mean "no bound".
pub(crate) fn parse_price(raw: &Value) -> Option<f64> {
    let price = match raw {
        Value::Number(number) => number.as_f64()?,
        Value::String(text) => {
            let text = text.trim();
            if text.is_empty() || text.eq_ignore_ascii_case("null") {
                return None;
            }
            text.parse::<f64>().ok()?
        }
        _ => return None,
    };

    (price.is_finite() && price > 0.0).then(|| price.trunc())
}

pub(super) fn definition() -> ToolDefinition {
    ToolDefinition {
        name: GET_DEALS,
        description: "Get the latest deals or search for specific products. Supports filtering by price range.",
        parameters: json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Search keyword (e.g. 'phone', 'speakers', 'electronics'). Empty string for all deals."
                },
                "minPrice": {
                    "type": "string",
                    "description": "Minimum price filter. Use 'NULL' if the user did not specify a minimum price, otherwise a number string like '1000'."
                },
                "maxPrice": {
                    "type": "string",
                    "description": "Maximum price filter. Use 'NULL' if the user did not specify a maximum price, otherwise a number string like '1000'."
                },
                "limit": {
                    "type": "integer",
                    "description": "Number of results to return. Defaults to 4."
                }
            },
            "required": ["query", "minPrice", "maxPrice"]
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use async_trait::async_trait;
    use serde_json::json;

    use crate::{
        embedding::Embedder,
        store::{CatalogStore, InMemoryStore},
        tools::{ToolContext, ToolExecutor, ToolRegistry, ToolSettings},
        types::{Deal, MessageKind, Order, Payment, PaymentMethod, PriceRange, Profile},
    };

    use super::{DealSearchTool, GetDealsArgs, parse_price};

    /// A catalog whose similarity search never finishes in time.
    struct StalledCatalog;

    #[async_trait]
    impl CatalogStore for StalledCatalog {
        async fn latest_deals(&self, _range: PriceRange, _limit: usize) -> anyhow::Result<Vec<Deal>> {
            Ok(Vec::new())
        }

        async fn similar_deals(
            &self,
            _embedding: &[f32],
            _range: PriceRange,
            _limit: usize,
        ) -> anyhow::Result<Vec<Deal>> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(vec![deal("late", 100.0)])
        }

        async fn find_deal(&self, _deal_id: &str) -> anyhow::Result<Option<Deal>> {
            Ok(None)
        }

        async fn place_order(
            &self,
            _user_id: &str,
            _deal: &Deal,
            _method: PaymentMethod,
        ) -> anyhow::Result<Order> {
            Err(anyhow::anyhow!("not used"))
        }

        async fn recent_orders(&self, _user_id: &str, _limit: usize) -> anyhow::Result<Vec<Order>> {
            Ok(Vec::new())
        }

        async fn recent_payments(
            &self,
            _user_id: &str,
            _limit: usize,
        ) -> anyhow::Result<Vec<Payment>> {
            Ok(Vec::new())
        }

        async fn user_profile(&self, _user_id: &str) -> anyhow::Result<Option<Profile>> {
            Ok(None)
        }
    }

    struct FixedEmbedder(Vec<f32>);

    #[async_trait]
    impl Embedder for FixedEmbedder {
        async fn embed(&self, _text: &str) -> anyhow::Result<Vec<f32>> {
            Ok(self.0.clone())
        }
    }

    fn deal(id: &str, price: f64) -> Deal {
        Deal {
            id: id.to_owned(),
            title: format!("Deal {id}"),
            description: "test".to_owned(),
            price,
            image_url: None,
        }
    }

    #[test]
    fn null_blank_and_non_positive_prices_are_unset() {
        assert_eq!(parse_price(&json!("NULL")), None);
        assert_eq!(parse_price(&json!("null")), None);
        assert_eq!(parse_price(&json!("  ")), None);
        assert_eq!(parse_price(&json!("0")), None);
        assert_eq!(parse_price(&json!("-5")), None);
        assert_eq!(parse_price(&json!("cheap")), None);
        assert_eq!(parse_price(&json!(null)), None);
        assert_eq!(parse_price(&json!("1500")), Some(1500.0));
        assert_eq!(parse_price(&json!(799.9)), Some(799.0));
    }

    #[tokio::test]
    async fn lists_latest_deals_within_bounds() {
        let store = Arc::new(InMemoryStore::default());
        store.insert_deal(deal("old", 500.0), None).await;
        store.insert_deal(deal("mid", 900.0), None).await;
        store.insert_deal(deal("new", 3000.0), None).await;
        let tool = DealSearchTool::new(store, None, Duration::from_secs(1));

        let output = tool
            .search(GetDealsArgs {
                max_price: json!("1000"),
                min_price: json!("NULL"),
                ..GetDealsArgs::default()
            })
            .await
            .expect("search should succeed");

        assert_eq!(output.kind, MessageKind::Deals);
        assert_eq!(output.content.as_deref(), Some("Found 2 deals for you!"));
        let ids = output
            .deals
            .unwrap_or_default()
            .into_iter()
            .map(|deal| deal.id)
            .collect::<Vec<_>>();
        assert_eq!(ids, vec!["mid", "old"]);
    }

    #[tokio::test]
    async fn query_uses_vector_search_when_embedder_is_configured() {
        let store = Arc::new(InMemoryStore::default());
        store.insert_deal(deal("phone", 100.0), Some(vec![1.0, 0.0])).await;
        store.insert_deal(deal("speaker", 100.0), Some(vec![0.0, 1.0])).await;
        let tool = DealSearchTool::new(
            store,
            Some(Arc::new(FixedEmbedder(vec![0.0, 1.0]))),
            Duration::from_secs(1),
        );

        let output = tool
            .search(GetDealsArgs {
                query: "speakers".to_owned(),
                limit: Some(1),
                ..GetDealsArgs::default()
            })
            .await
            .expect("search should succeed");

        let deals = output.deals.unwrap_or_default();
        assert_eq!(deals.len(), 1);
        assert_eq!(deals[0].id, "speaker");
    }

    #[tokio::test]
    async fn empty_result_is_a_text_reply() {
        let tool = DealSearchTool::new(
            Arc::new(InMemoryStore::default()),
            None,
            Duration::from_secs(1),
        );

        let output = tool
            .search(GetDealsArgs::default())
            .await
            .expect("search should succeed");

        assert_eq!(output.kind, MessageKind::Text);
        assert_eq!(
            output.content.as_deref(),
            Some("No deals found matching your criteria. Try a different search or price range.")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn slow_vector_search_times_out() {
        let tool = DealSearchTool::new(
            Arc::new(StalledCatalog),
            Some(Arc::new(FixedEmbedder(vec![1.0, 0.0]))),
            Duration::from_millis(5_000),
        );

        let error = tool
            .search(GetDealsArgs {
                query: "headphones".to_owned(),
                ..GetDealsArgs::default()
            })
            .await
            .expect_err("search should time out");
        assert!(error.to_string().contains("timed out after 5000ms"));
    }

    #[tokio::test(start_paused = true)]
    async fn registry_reports_a_timed_out_search_as_text() {
        let registry = ToolRegistry::new(
            Arc::new(StalledCatalog),
            Some(Arc::new(FixedEmbedder(vec![1.0, 0.0]))),
            ToolSettings {
                vector_search_timeout: Duration::from_millis(5_000),
                payment_url_base: "https://pay.example.test".to_owned(),
            },
        );

        let raw = registry
            .execute(
                "get_deals",
                json!({ "query": "headphones", "minPrice": "NULL", "maxPrice": "NULL" }),
                &ToolContext {
                    user_id: "u1".to_owned(),
                },
            )
            .await
            .expect("tool call should succeed");
        let output: serde_json::Value =
            serde_json::from_str(&raw).expect("tool output should be json");
        assert_eq!(output["type"], "text");
        assert_eq!(output["content"], "Error fetching deals.");
    }
}

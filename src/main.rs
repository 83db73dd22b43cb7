use std::{sync::Arc, time::Duration};

use dealbot::{
    agent::{Agent, MockAgent, OpenAiAgent},
    auth::SessionVerifier,
    config::AppConfig,
    embedding::{Embedder, OpenAiEmbedder},
    http::{self, AppState},
    orchestrator::ChatOrchestrator,
    pipeline::{HistoryWindow, RetryController},
    store::{CatalogStore, ChatStore, InMemoryStore, PostgresStore},
    tools::{ToolExecutor, ToolRegistry, ToolSettings},
    types::Deal,
};
use reqwest::Client;
use tokio::net::TcpListener;
use tracing::{info, warn};

struct Stores {
    chats: Arc<dyn ChatStore>,
    catalog: Arc<dyn CatalogStore>,
    postgres: Option<Arc<PostgresStore>>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = AppConfig::from_env()?;
    let client = Client::builder().timeout(Duration::from_secs(120)).build()?;

    let stores = build_stores(&config).await?;
    let embedder = build_embedder(&config, &client);
    let tools: Arc<dyn ToolExecutor> = Arc::new(ToolRegistry::new(
        stores.catalog.clone(),
        embedder,
        ToolSettings {
            vector_search_timeout: config.vector_search_timeout,
            payment_url_base: config.payment_url_base.clone(),
        },
    ));
    let agent = build_agent(&config, &client, tools);

    let orchestrator = Arc::new(ChatOrchestrator::new(
        agent,
        stores.chats.clone(),
        RetryController::new(config.chat_max_attempts as usize, config.agent_timeout),
        HistoryWindow {
            max_turns: config.chat_history_window as usize,
            max_chars: config.chat_history_max_chars as usize,
        },
    ));

    let app = http::router(AppState {
        orchestrator,
        sessions: SessionVerifier::new(config.jwt_secret.clone()),
    });
    let listener = TcpListener::bind(config.http_bind).await?;
    info!("dealbot HTTP API listening on {}", config.http_bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(postgres) = stores.postgres {
        postgres.close().await;
        info!("Postgres pool closed");
    }
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .compact()
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            warn!(?error, "failed to listen for Ctrl+C");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(error) => {
                warn!(?error, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}

fn build_agent(config: &AppConfig, client: &Client, tools: Arc<dyn ToolExecutor>) -> Arc<dyn Agent> {
    let provider = config.agent_provider.to_lowercase();
    let openai = |api_key: String| -> Arc<dyn Agent> {
        Arc::new(OpenAiAgent::new(
            client.clone(),
            api_key,
            config.openai_model.clone(),
            config.openai_base_url.clone(),
            tools.clone(),
        ))
    };

    match (provider.as_str(), config.openai_api_key.clone()) {
        ("mock", _) => {
            warn!("AGENT_PROVIDER=mock; using mock agent");
            Arc::new(MockAgent::new(tools.clone()))
        }
        ("openai", Some(api_key)) => {
            info!(model = %config.openai_model, "using OpenAI agent");
            openai(api_key)
        }
        ("openai", None) => {
            warn!("AGENT_PROVIDER=openai but OPENAI_API_KEY is missing; using mock");
            Arc::new(MockAgent::new(tools.clone()))
        }
        (other, api_key) => {
            if other != "auto" {
                warn!(
                    provider = %other,
                    "unknown AGENT_PROVIDER value; valid values are auto|openai|mock; falling back to auto"
                );
            }
            match api_key {
                Some(api_key) => {
                    info!(model = %config.openai_model, "using OpenAI agent (auto mode)");
                    openai(api_key)
                }
                None => {
                    warn!("No OPENAI_API_KEY configured; using mock agent");
                    Arc::new(MockAgent::new(tools.clone()))
                }
            }
        }
    }
}

fn build_embedder(config: &AppConfig, client: &Client) -> Option<Arc<dyn Embedder>> {
    match config.openai_api_key.clone() {
        Some(api_key) => Some(Arc::new(OpenAiEmbedder::new(
            client.clone(),
            api_key,
            config.openai_embedding_model.clone(),
            config.openai_base_url.clone(),
        ))),
        None => {
            warn!("OPENAI_API_KEY not set; deal search falls back to latest deals");
            None
        }
    }
}

async fn build_stores(config: &AppConfig) -> anyhow::Result<Stores> {
    if let Some(database_url) = &config.database_url {
        let store = Arc::new(PostgresStore::connect(database_url).await?);
        info!("Connected to Postgres store");
        Ok(Stores {
            chats: store.clone(),
            catalog: store.clone(),
            postgres: Some(store),
        })
    } else {
        warn!("DATABASE_URL not set; using in-memory store");
        let store = Arc::new(InMemoryStore::default());
        if config.seed_demo_catalog {
            seed_demo_catalog(&store).await;
        }
        Ok(Stores {
            chats: store.clone(),
            catalog: store,
            postgres: None,
        })
    }
}

async fn seed_demo_catalog(store: &InMemoryStore) {
    let deals = [
        ("Wireless Earbuds", "Bluetooth 5.3 earbuds with 30h battery", 1_499.0),
        ("Smart Watch", "AMOLED fitness watch with SpO2 tracking", 2_999.0),
        ("Power Bank 20000mAh", "Fast-charging power bank, 22.5W", 1_199.0),
        ("Mechanical Keyboard", "Hot-swappable keyboard with brown switches", 3_499.0),
        ("USB-C Cable", "1m braided fast-charging cable", 299.0),
    ];
    for (index, (title, description, price)) in deals.into_iter().enumerate() {
        store
            .insert_deal(
                Deal {
                    id: format!("demo-deal-{}", index + 1),
                    title: title.to_owned(),
                    description: description.to_owned(),
                    price,
                    image_url: None,
                },
                None,
            )
            .await;
    }
    info!(count = deals.len(), "seeded demo catalog");
}

use std::{env, net::SocketAddr, time::Duration};

use anyhow::Context;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub http_bind: SocketAddr,
    pub database_url: Option<String>,
    pub agent_provider: String,
    pub openai_api_key: Option<String>,
    pub openai_model: String,
    pub openai_base_url: String,
    pub openai_embedding_model: String,
    pub jwt_secret: String,
    pub chat_max_attempts: u64,
    pub chat_history_window: u64,
    pub chat_history_max_chars: u64,
    pub agent_timeout: Option<Duration>,
    pub vector_search_timeout: Duration,
    pub payment_url_base: String,
    pub seed_demo_catalog: bool,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let port = env::var("PORT").unwrap_or_else(|_| "8080".to_owned());
        let http_bind = env::var("HTTP_BIND").unwrap_or_else(|_| format!("0.0.0.0:{port}"));
        let http_bind = http_bind
            .parse()
            .with_context(|| format!("invalid HTTP_BIND address {http_bind}"))?;

        let agent_timeout = match env_u64("AGENT_TIMEOUT_SECS", 0) {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };

        Ok(Self {
            http_bind,
            database_url: env::var("DATABASE_URL").ok(),
            agent_provider: env::var("AGENT_PROVIDER").unwrap_or_else(|_| "auto".to_owned()),
            openai_api_key: env::var("OPENAI_API_KEY").ok(),
            openai_model: env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_owned()),
            openai_base_url: env::var("OPENAI_BASE_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1".to_owned()),
            openai_embedding_model: env::var("OPENAI_EMBEDDING_MODEL")
                .unwrap_or_else(|_| "text-embedding-3-small".to_owned()),
            jwt_secret: env::var("JWT_SECRET").context("JWT_SECRET must be set")?,
            chat_max_attempts: env_u64("CHAT_MAX_ATTEMPTS", 3),
            chat_history_window: env_u64("CHAT_HISTORY_WINDOW", 8),
            chat_history_max_chars: env_u64("CHAT_HISTORY_MAX_CHARS", 500),
            agent_timeout,
            vector_search_timeout: Duration::from_millis(env_u64("VECTOR_SEARCH_TIMEOUT_MS", 5_000)),
            payment_url_base: env::var("PAYMENT_URL_BASE")
                .unwrap_or_else(|_| "http://localhost:3000/payment".to_owned()),
            seed_demo_catalog: env_bool("SEED_DEMO_CATALOG", true),
        })
    }
}

fn env_bool(name: &str, default: bool) -> bool {
    env::var(name)
        .ok()
        .map(|raw| {
            matches!(
                raw.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            )
        })
        .unwrap_or(default)
}

fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|raw| raw.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

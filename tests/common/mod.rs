//! Shared fixtures for integration tests.
#![allow(dead_code)]

use std::sync::Arc;

use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

use llmpool::adapter::{ApiFamily, Message};
use llmpool::config::{ApiKey, Config, LoggingConfig, RouterConfig, ServerConfig};
use llmpool::pool::{PoolManager, PoolType};
use llmpool::router::Router;
use llmpool::storage::{self, providers, NewProvider, ProviderRecord};

/// In-memory database with migrations applied.
///
/// A single long-lived connection, so every query sees the same database.
pub async fn memory_db() -> SqlitePool {
    let db = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create in-memory SQLite pool");
    storage::migrate(&db).await.expect("Failed to run migrations");
    db
}

/// Router settings for tests: no backoff, no dispatch log.
pub fn router_config(max_retries: u32) -> RouterConfig {
    RouterConfig {
        max_retries,
        request_timeout_secs: 5,
        connect_timeout_secs: 2,
        retry_backoff_ms: 0,
        ..RouterConfig::default()
    }
}

pub fn test_config(max_retries: u32) -> Config {
    Config {
        server: ServerConfig {
            listen: "127.0.0.1:0".to_string(),
        },
        database: None,
        router: router_config(max_retries),
        providers: vec![],
        logging: LoggingConfig {
            level: "debug".to_string(),
            log_dispatches: false,
        },
    }
}

pub fn provider(name: &str, base_url: &str, pool: PoolType, priority: i64) -> NewProvider {
    NewProvider {
        name: name.to_string(),
        base_url: base_url.to_string(),
        api_key: ApiKey::from(format!("sk-{}", name)),
        pool_type: pool,
        api_family: ApiFamily::OpenAi,
        models: vec![format!("{}-model", name)],
        is_primary: false,
        priority,
        weight: 10,
        enabled: true,
    }
}

pub async fn insert(db: &SqlitePool, new: NewProvider) -> ProviderRecord {
    providers::create_provider(db, new)
        .await
        .expect("Failed to create provider")
}

/// Pools and router over `db`, with every pool already built.
pub async fn router(db: &SqlitePool, max_retries: u32) -> Arc<Router> {
    let pools = Arc::new(PoolManager::new(db.clone()));
    pools.rebuild_all().await.expect("Failed to build pools");
    Arc::new(
        Router::new(db.clone(), pools, router_config(max_retries), false)
            .expect("Failed to build router"),
    )
}

pub fn messages() -> Vec<Message> {
    vec![
        Message::system("You extract paper metadata."),
        Message::user("Attention Is All You Need ..."),
    ]
}

/// OpenAI-style chat completion body.
pub fn openai_completion(text: &str) -> serde_json::Value {
    serde_json::json!({
        "id": "chatcmpl-mock",
        "object": "chat.completion",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": text},
            "finish_reason": "stop"
        }]
    })
}

/// OpenAI-style SSE body streaming `fragments`, optionally terminated.
pub fn openai_sse(fragments: &[&str], complete: bool) -> String {
    let mut body = String::new();
    for fragment in fragments {
        let chunk = serde_json::json!({
            "choices": [{"index": 0, "delta": {"content": fragment}, "finish_reason": null}]
        });
        body.push_str(&format!("data: {}\n\n", chunk));
    }
    if complete {
        let last = serde_json::json!({
            "choices": [{"index": 0, "delta": {}, "finish_reason": "stop"}]
        });
        body.push_str(&format!("data: {}\n\n", last));
        body.push_str("data: [DONE]\n\n");
    }
    body
}

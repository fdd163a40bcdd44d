pub mod error;
pub mod handlers;
pub mod state;
pub mod types;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::accounts::ConfigStore;
use crate::aggregate::Aggregator;
use crate::broker::{BrokerApi, QuestradeClient};
use crate::prices::source::BrokerPriceSource;
use crate::prices::{CachedPrices, PriceCache};
use crate::tokens::{QuestradeExchanger, TokenStore};

use state::AppState;

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

/// Wire the stores, broker client, and aggregator from the environment.
/// Shared by the server and the CLI helpers.
pub fn bootstrap() -> Result<AppState> {
    let login_host = env_or("QUESTRADE_LOGIN_HOST", "https://login.questrade.com");
    let token_path = PathBuf::from(env_or("TOKEN_STORE_FILE", "token-store.json"));
    let accounts_path = PathBuf::from(env_or("ACCOUNTS_FILE", "accounts.json"));
    let cache_dir = PathBuf::from(env_or("PRICE_CACHE_DIR", ".cache/yahoo-price-cache"));

    let http = reqwest::Client::new();
    let exchanger = Arc::new(QuestradeExchanger::new(http.clone(), login_host));
    let tokens = Arc::new(
        TokenStore::open(&token_path, exchanger)
            .with_context(|| format!("opening token store {}", token_path.display()))?,
    );
    let broker: Arc<dyn BrokerApi> = Arc::new(QuestradeClient::new(http, Arc::clone(&tokens)));
    let cache = Arc::new(PriceCache::new(cache_dir));
    let source = Arc::new(BrokerPriceSource::new(
        Arc::clone(&broker),
        Arc::clone(&tokens),
    ));
    let prices = Arc::new(CachedPrices::new(cache, source));
    let config = Arc::new(ConfigStore::new(accounts_path));

    let aggregator = Arc::new(Aggregator {
        broker,
        tokens: Arc::clone(&tokens),
        config: Arc::clone(&config),
        prices: Arc::clone(&prices),
    });

    Ok(AppState {
        aggregator,
        tokens,
        config,
        prices,
    })
}

pub async fn serve(host: &str, port: u16) -> Result<()> {
    let state = bootstrap()?;

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/health", get(handlers::health))
        .route("/api/summary", get(handlers::summary::get_summary))
        .route(
            "/api/accounts/{id}/total-pnl-series",
            get(handlers::pnl::total_pnl_series),
        )
        .route("/api/qqq-temperature", get(handlers::temperature::qqq_temperature))
        .route(
            "/api/investment-model-temperature",
            get(handlers::temperature::model_temperature),
        )
        .route(
            "/api/benchmark-returns",
            get(handlers::temperature::benchmark_returns),
        )
        .route(
            "/api/accounts/{id}/mark-rebalanced",
            post(handlers::config::mark_rebalanced),
        )
        .route(
            "/api/accounts/{id}/target-proportions",
            post(handlers::config::set_target_proportions),
        )
        .route(
            "/api/accounts/{id}/symbol-notes",
            post(handlers::config::set_symbol_notes),
        )
        .route(
            "/api/accounts/{id}/planning-context",
            post(handlers::config::set_planning_context),
        )
        .route(
            "/api/accounts/{id}/invest-evenly",
            post(handlers::plan::plan_invest_evenly),
        )
        .route(
            "/api/accounts/{id}/deployment-adjustment",
            post(handlers::plan::plan_deployment_adjustment),
        )
        .layer(cors)
        .with_state(state);

    let addr = format!("{host}:{port}");
    info!("folio-flow API listening on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;
    axum::serve(listener, app).await.context("running server")?;

    Ok(())
}

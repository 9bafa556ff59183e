use axum::{
    Router,
    routing::{any, get, post},
};
use ledger::price::{CoinPriceProvider, StaticPriceProvider};
use ledger::repository::{JsonFileRepository, LedgerRepository, MemoryRepository};
use ledger::store::GameStore;
use ledger::types::LedgerPolicy;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tracing_subscriber::EnvFilter;

mod config;
mod error;
mod middleware;
mod models;
mod price_client;
mod routes;
mod websocket;

use config::Config;
use models::InMemoryStorage;
use price_client::HttpPriceProvider;
use routes::coins::{buy_coin, list_coins, sell_coin};
use routes::games::{create_game, get_game, list_games};
use routes::markets::{default_coins, get_coin, get_markets};
use routes::users::{get_profile, login};
use websocket::{NotificationManager, create_notification_manager, websocket_handler};

// Application state shared by every handler
#[derive(Clone)]
pub struct AppState {
    pub games: Arc<GameStore>,
    pub prices: Arc<dyn CoinPriceProvider>,
    pub storage: InMemoryStorage,
    pub notification_manager: NotificationManager,
    pub config: Arc<Config>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/login", post(login))
        .route("/profile", get(get_profile))
        .route("/users/profile", get(get_profile))
        .route("/users/{user_id}/games", get(list_games).post(create_game))
        .route("/users/{user_id}/games/{game_id}", get(get_game))
        .route(
            "/users/{user_id}/games/{game_id}/coins",
            get(list_coins).put(buy_coin).post(sell_coin),
        )
        .route("/coins/{coin_id}", get(get_coin))
        .route("/markets", get(get_markets))
        .route("/health", get(health_check))
        .route("/notifications", any(websocket_handler))
        .layer(ServiceBuilder::new().layer(CorsLayer::permissive()))
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    // initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("http_server=info,ledger=info")),
        )
        .init();

    let config = Config::from_env();

    let repository: Arc<dyn LedgerRepository> = match &config.data_dir {
        Some(dir) => {
            tracing::info!("Persisting ledgers under {}", dir.display());
            Arc::new(JsonFileRepository::open(dir)?)
        }
        None => {
            tracing::warn!("DATA_DIR not set, ledgers are kept in memory only");
            Arc::new(MemoryRepository::new())
        }
    };

    let policy = LedgerPolicy {
        margin_allowed: config.margin_allowed,
    };
    let games = Arc::new(GameStore::init(repository, policy)?);

    let prices: Arc<dyn CoinPriceProvider> = match &config.price_api_url {
        Some(url) => {
            tracing::info!("Fetching market data from {}", url);
            Arc::new(HttpPriceProvider::new(
                url,
                config.price_api_key.clone(),
                config.price_timeout,
            )?)
        }
        None => {
            tracing::warn!("PRICE_API_URL not set, serving static market data");
            Arc::new(StaticPriceProvider::with_coins(default_coins()))
        }
    };

    let port = config.server_port;
    let state = AppState {
        games: games.clone(),
        prices,
        storage: InMemoryStorage::new(),
        notification_manager: create_notification_manager(),
        config: Arc::new(config),
    };

    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    tracing::info!("Server running on http://0.0.0.0:{}", port);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    games.teardown()?;
    tracing::info!("Server stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
    tracing::info!("Shutdown signal received");
}

// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}

// Root endpoint
async fn root() -> &'static str {
    "Coin Game API - Use POST /login to authenticate, /users/{user_id}/games to manage games, PUT/POST /users/{user_id}/games/{game_id}/coins to buy/sell, WebSocket /notifications for ledger updates"
}

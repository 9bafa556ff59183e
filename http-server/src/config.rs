use std::env;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct Config {
    pub server_port: u16,
    /// Directory for JSON ledger documents; in-memory only when unset
    pub data_dir: Option<PathBuf>,
    pub margin_allowed: bool,
    pub price_api_url: Option<String>,
    pub price_api_key: Option<String>,
    pub price_timeout: Duration,
    /// Coins listed by `GET /markets`
    pub market_coins: Vec<String>,
}

fn non_empty(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl Config {
    pub fn from_env() -> Self {
        let port_str = env::var("PORT").unwrap_or_else(|_| "6957".to_string());
        let server_port = port_str.parse().unwrap_or_else(|_| {
            tracing::warn!("Invalid PORT '{}', defaulting to 6957", port_str);
            6957
        });

        let timeout_str = env::var("PRICE_TIMEOUT_MS").unwrap_or_else(|_| "5000".to_string());
        let price_timeout_ms = timeout_str.parse().unwrap_or_else(|_| {
            tracing::warn!("Invalid PRICE_TIMEOUT_MS '{}', defaulting to 5000", timeout_str);
            5000
        });

        let market_coins = non_empty("MARKET_COINS")
            .map(|v| {
                v.split(',')
                    .map(|coin| coin.trim().to_string())
                    .filter(|coin| !coin.is_empty())
                    .collect()
            })
            .unwrap_or_else(|| {
                vec![
                    "bitcoin".to_string(),
                    "ethereum".to_string(),
                    "solana".to_string(),
                ]
            });

        Self {
            server_port,
            data_dir: non_empty("DATA_DIR").map(PathBuf::from),
            margin_allowed: env::var("MARGIN_ALLOWED")
                .map(|v| v == "true")
                .unwrap_or(false),
            price_api_url: non_empty("PRICE_API_URL"),
            price_api_key: non_empty("PRICE_API_KEY"),
            price_timeout: Duration::from_millis(price_timeout_ms),
            market_coins,
        }
    }
}

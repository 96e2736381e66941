use std::env;
use std::time::Duration;

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Config {
    pub database_url: String,
    pub redis_url: String,
    pub jwt_secret: String,
    pub rate_limit_window_secs: u64,
    pub rate_limit_requests: u32,
    pub server_host: String,
    pub server_port: u16,
    pub api_base_uri: String,
    pub geohash_precision: usize,
    pub daily_swipe_allowance: i32,
    pub min_search_radius: f64,
    pub max_search_radius: f64,
    pub match_notify_url: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, env::VarError> {
        dotenv::dotenv().ok();

        // 存储精度限制在6~9位，6位约1.2km格子，9位约4.8m格子
        let geohash_precision = env::var("GEOHASH_PRECISION")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(8)
            .clamp(6, 9);

        Ok(Config {
            database_url: env::var("DATABASE_URL")?,
            redis_url: env::var("REDIS_URL")?,
            jwt_secret: env::var("JWT_SECRET")?,
            server_host: env::var("SERVER_HOST")?,
            server_port: env::var("SERVER_PORT")?.parse().unwrap_or(3000),
            api_base_uri: env::var("API_BASE_URI").unwrap_or_else(|_| "/api".to_string()),
            rate_limit_window_secs: env::var("RATE_LIMIT_WINDOW")?.parse().unwrap_or(60),
            rate_limit_requests: env::var("RATE_LIMIT_REQUESTS")?.parse().unwrap_or(100),
            geohash_precision,
            daily_swipe_allowance: env::var("DAILY_SWIPE_ALLOWANCE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(100),
            min_search_radius: env::var("MIN_SEARCH_RADIUS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10.0),
            max_search_radius: env::var("MAX_SEARCH_RADIUS")?.parse().unwrap_or(5000.0),
            match_notify_url: env::var("MATCH_NOTIFY_URL").ok(),
        })
    }

    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit_window_secs)
    }
}

use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub google_places_api_key: Option<String>,
    pub yelp_api_key: Option<String>,
    pub google_search_api_key: Option<String>,
    pub google_search_cx: Option<String>,
    pub mock_mode: bool,
    pub places_base_url: String,
    pub yelp_base_url: String,
    pub search_base_url: String,
    pub places_rate_limit: usize,
    pub places_rate_window: Duration,
    pub yelp_rate_limit: usize,
    pub yelp_rate_window: Duration,
    pub max_retries: u32,
    pub retry_base_delay: Duration,
    pub http_timeout: Duration,
    pub batch_concurrency: usize,
    pub batch_shard_size: usize,
}

impl Default for Config {
    /// Production defaults with no credentials configured.
    fn default() -> Self {
        Self {
            port: 3000,
            google_places_api_key: None,
            yelp_api_key: None,
            google_search_api_key: None,
            google_search_cx: None,
            mock_mode: false,
            places_base_url: "https://places.googleapis.com".to_string(),
            yelp_base_url: "https://api.yelp.com".to_string(),
            search_base_url: "https://www.googleapis.com".to_string(),
            places_rate_limit: 600,
            places_rate_window: Duration::from_secs(60),
            yelp_rate_limit: 2,
            yelp_rate_window: Duration::from_secs(1),
            max_retries: 3,
            retry_base_delay: Duration::from_millis(1000),
            http_timeout: Duration::from_secs(15),
            batch_concurrency: 5,
            batch_shard_size: 1000,
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = Self::default();

        let config = Self {
            port: parse_var("PORT", defaults.port)?,
            google_places_api_key: optional_var("GOOGLE_PLACES_API_KEY"),
            yelp_api_key: optional_var("YELP_API_KEY"),
            google_search_api_key: optional_var("GOOGLE_SEARCH_API_KEY"),
            google_search_cx: optional_var("GOOGLE_SEARCH_CX"),
            mock_mode: optional_var("MOCK_MODE")
                .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
                .unwrap_or(false),
            places_base_url: url_var("PLACES_BASE_URL", defaults.places_base_url)?,
            yelp_base_url: url_var("YELP_BASE_URL", defaults.yelp_base_url)?,
            search_base_url: url_var("SEARCH_BASE_URL", defaults.search_base_url)?,
            places_rate_limit: parse_var("PLACES_RATE_LIMIT", defaults.places_rate_limit)?,
            places_rate_window: Duration::from_secs(parse_var(
                "PLACES_RATE_WINDOW_SECS",
                defaults.places_rate_window.as_secs(),
            )?),
            yelp_rate_limit: parse_var("YELP_RATE_LIMIT", defaults.yelp_rate_limit)?,
            yelp_rate_window: Duration::from_secs(parse_var(
                "YELP_RATE_WINDOW_SECS",
                defaults.yelp_rate_window.as_secs(),
            )?),
            max_retries: parse_var("MAX_RETRIES", defaults.max_retries)?,
            retry_base_delay: Duration::from_millis(parse_var(
                "RETRY_BASE_DELAY_MS",
                defaults.retry_base_delay.as_millis() as u64,
            )?),
            http_timeout: Duration::from_secs(parse_var(
                "HTTP_TIMEOUT_SECS",
                defaults.http_timeout.as_secs(),
            )?),
            batch_concurrency: parse_var("BATCH_CONCURRENCY", defaults.batch_concurrency)?,
            batch_shard_size: parse_var("BATCH_SHARD_SIZE", defaults.batch_shard_size)?,
        };

        config.check_limits()?;

        // Log successful configuration load (without sensitive values)
        tracing::info!("Configuration loaded successfully");
        tracing::debug!("Places Base URL: {}", config.places_base_url);
        tracing::debug!("Yelp Base URL: {}", config.yelp_base_url);
        tracing::debug!("Search Base URL: {}", config.search_base_url);
        tracing::debug!(
            "Retries: {} (base delay {:?}), timeout {:?}",
            config.max_retries,
            config.retry_base_delay,
            config.http_timeout
        );
        tracing::debug!(
            "Batch: concurrency {}, shard size {}",
            config.batch_concurrency,
            config.batch_shard_size
        );
        tracing::debug!("Server Port: {}", config.port);

        Ok(config)
    }

    /// Rejects values that would disable rate limiting or stall batches.
    pub fn check_limits(&self) -> anyhow::Result<()> {
        if self.places_rate_limit == 0 || self.yelp_rate_limit == 0 {
            anyhow::bail!("PLACES_RATE_LIMIT and YELP_RATE_LIMIT must be at least 1");
        }
        if self.places_rate_window.is_zero() || self.yelp_rate_window.is_zero() {
            anyhow::bail!("PLACES_RATE_WINDOW_SECS and YELP_RATE_WINDOW_SECS must be at least 1");
        }
        if self.batch_concurrency == 0 {
            anyhow::bail!("BATCH_CONCURRENCY must be at least 1");
        }
        if self.batch_shard_size == 0 {
            anyhow::bail!("BATCH_SHARD_SIZE must be at least 1");
        }
        Ok(())
    }

    /// Reports missing credentials. Never fails: a provider without a key
    /// degrades to "no match" instead of stopping the service.
    pub fn validate(&self) {
        if self.mock_mode {
            tracing::info!("MOCK_MODE is enabled. API keys will be ignored.");
            return;
        }

        let mut missing = Vec::new();
        if self.google_places_api_key.is_none() {
            missing.push("GOOGLE_PLACES_API_KEY");
        }
        if self.yelp_api_key.is_none() {
            missing.push("YELP_API_KEY");
        }

        if !self.search_enabled() {
            tracing::info!(
                "Google Search keys missing. Website Discovery fallback will be disabled."
            );
        }

        if !missing.is_empty() {
            tracing::warn!(
                "Missing API keys: {}. System will run in degraded mode.",
                missing.join(", ")
            );
        }
    }

    pub fn search_enabled(&self) -> bool {
        self.google_search_api_key.is_some() && self.google_search_cx.is_some()
    }
}

fn optional_var(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_var<T: FromStr>(key: &str, default: T) -> anyhow::Result<T> {
    match optional_var(key) {
        Some(raw) => raw
            .parse()
            .map_err(|_| anyhow::anyhow!("{} must be a valid number, got '{}'", key, raw)),
        None => Ok(default),
    }
}

fn url_var(key: &str, default: String) -> anyhow::Result<String> {
    match optional_var(key) {
        Some(url) => {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                anyhow::bail!("{} must start with http:// or https://", key);
            }
            Ok(url.trim_end_matches('/').to_string())
        }
        None => Ok(default),
    }
}

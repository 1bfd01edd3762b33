use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use url::Url;

use crate::api_client::{ApiRequest, Transport};
use crate::config::Config;

/// Directory and social sites that never count as an "official" website.
pub const DIRECTORY_DOMAINS: &[&str] = &[
    "yelp.com",
    "facebook.com",
    "instagram.com",
    "linkedin.com",
    "angi.com",
    "homeadvisor.com",
    "thumbtack.com",
    "bbb.org",
    "yellowpages.com",
    "porch.com",
    "houzz.com",
    "mapquest.com",
    "superpages.com",
];

/// Finds a business's own website from its name and location.
#[async_trait]
pub trait WebsiteFinder: Send + Sync {
    async fn find_website(&self, business_name: &str, city: &str, zip_code: &str)
        -> Option<String>;
}

/// Whether `url` looks like the business's own site rather than a listing.
///
/// The host (minus a leading `www.`) must not contain any blocklisted
/// directory domain.
pub fn is_valid_candidate(url: &str) -> bool {
    let Ok(parsed) = Url::parse(url) else {
        return false;
    };
    let Some(host) = parsed.host_str() else {
        return false;
    };

    let host = host.to_lowercase();
    let domain = host.strip_prefix("www.").unwrap_or(&host);
    !DIRECTORY_DOMAINS
        .iter()
        .any(|blocked| domain.contains(blocked))
}

/// Website discovery through the Google Custom Search JSON API.
///
/// Not rate-limited or retried: any failure just means "no website found".
pub struct GoogleSearchFinder {
    transport: Arc<dyn Transport>,
    base_url: String,
    api_key: Option<String>,
    cx: Option<String>,
    mock_mode: bool,
}

impl GoogleSearchFinder {
    pub fn new(config: &Config, transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            base_url: config.search_base_url.clone(),
            api_key: config.google_search_api_key.clone(),
            cx: config.google_search_cx.clone(),
            mock_mode: config.mock_mode,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.mock_mode || (self.api_key.is_some() && self.cx.is_some())
    }
}

#[async_trait]
impl WebsiteFinder for GoogleSearchFinder {
    async fn find_website(
        &self,
        business_name: &str,
        city: &str,
        zip_code: &str,
    ) -> Option<String> {
        if self.mock_mode {
            let safe_name = business_name.replace(' ', "").to_lowercase();
            return Some(format!("https://www.{}.com", safe_name));
        }

        let (Some(api_key), Some(cx)) = (self.api_key.as_deref(), self.cx.as_deref()) else {
            return None;
        };

        let query = [business_name, city, zip_code]
            .iter()
            .map(|part| part.trim())
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        if query.is_empty() {
            return None;
        }

        tracing::info!("Website search: {}", query);

        let request = ApiRequest::get(format!("{}/customsearch/v1", self.base_url))
            .query("key", api_key)
            .query("cx", cx)
            .query("q", query)
            // Check top 3 results
            .query("num", "3");

        let response = match self.transport.send(&request).await {
            Ok(response) => response,
            Err(e) => {
                tracing::error!("Website Search Error: {}", e);
                return None;
            }
        };

        if !(200..300).contains(&response.status) {
            tracing::error!("Website Search returned status {}", response.status);
            return None;
        }

        let data: Value = match serde_json::from_str(&response.body) {
            Ok(data) => data,
            Err(e) => {
                tracing::error!("Failed to parse Website Search response: {}", e);
                return None;
            }
        };

        let found = data
            .get("items")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(|item| item.get("link").and_then(Value::as_str))
            .find(|link| is_valid_candidate(link))
            .map(str::to_string);

        match found {
            Some(ref link) => tracing::info!("Website search: found {}", link),
            None => tracing::info!("Website search: no official website among results"),
        }
        found
    }
}

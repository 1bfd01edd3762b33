use phonenumber::country::Id as CountryId;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::api_client::{ApiClient, ApiError, ApiRequest, RetryPolicy, Transport};
use crate::config::Config;
use crate::models::{Provider, ProviderMatch};
use crate::rate_limiter::RateLimiter;

const PLACES_FIELD_MASK: &str = "places.displayName,places.formattedAddress,places.id,places.nationalPhoneNumber,places.rating,places.userRatingCount,places.websiteUri";

/// Phone query in the form both directories accept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedPhone {
    pub query: String,
    /// True when the input was rewritten to `+1XXXXXXXXXX`.
    pub is_e164: bool,
}

/// Normalize a free-form phone number to E.164 for US numbers.
///
/// - 10 digits → `+1` prefix
/// - 11 digits starting with `1` → `+` prefix
/// - anything else is passed through as typed (trimmed) and flagged
///
/// Returns `None` for an empty phone: no search is issued for it.
pub fn normalize_phone(raw: &str) -> Option<NormalizedPhone> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    let digits: String = trimmed.chars().filter(|c| c.is_ascii_digit()).collect();
    let normalized = if digits.len() == 10 {
        NormalizedPhone {
            query: format!("+1{}", digits),
            is_e164: true,
        }
    } else if digits.len() == 11 && digits.starts_with('1') {
        NormalizedPhone {
            query: format!("+{}", digits),
            is_e164: true,
        }
    } else {
        tracing::warn!(
            "Phone '{}' is not a 10/11-digit US number; searching as typed",
            trimmed
        );
        NormalizedPhone {
            query: trimmed.to_string(),
            is_e164: false,
        }
    };

    Some(normalized)
}

/// libphonenumber check for a US number. Used for diagnostics only: an
/// invalid number is still searched.
pub fn is_valid_us_phone(raw: &str) -> bool {
    match phonenumber::parse(Some(CountryId::US), raw) {
        Ok(number) => phonenumber::is_valid(&number),
        Err(_) => false,
    }
}

fn first_entry(payload: &Value, key: &str) -> Option<Value> {
    payload
        .get(key)
        .and_then(Value::as_array)
        .and_then(|list| list.first())
        .cloned()
}

/// Google Places (Text Search v1) verifier.
pub struct GooglePlacesVerifier {
    client: ApiClient,
    base_url: String,
    api_key: Option<String>,
    mock_mode: bool,
}

impl GooglePlacesVerifier {
    pub fn new(config: &Config, transport: Arc<dyn Transport>, limiter: Arc<RateLimiter>) -> Self {
        Self {
            client: ApiClient::new(
                Provider::GooglePlaces,
                transport,
                limiter,
                RetryPolicy::from_config(config),
            ),
            base_url: config.places_base_url.clone(),
            api_key: config.google_places_api_key.clone(),
            mock_mode: config.mock_mode,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.mock_mode || self.api_key.is_some()
    }

    /// Find a business strictly by phone number.
    pub async fn search_by_phone(&self, phone: &str) -> Result<Option<ProviderMatch>, ApiError> {
        let Some(normalized) = normalize_phone(phone) else {
            return Ok(None);
        };

        if self.mock_mode {
            return Ok(Some(ProviderMatch::from_places(json!({
                "id": "mock-place-phone",
                "displayName": {"text": "Mock Business Verification"},
                "formattedAddress": "123 Mock Lane, Test City, 90210",
                "nationalPhoneNumber": phone,
                "rating": 4.8,
                "userRatingCount": 150,
                "websiteUri": "https://mock-business.com"
            }))));
        }

        if normalized.is_e164 && !is_valid_us_phone(&normalized.query) {
            tracing::debug!(
                "Google Places: {} is not a valid US number per libphonenumber",
                normalized.query
            );
        }

        tracing::info!("Google Places: Searching by phone: {}", normalized.query);

        // regionCode hints at US businesses when the phone format is ambiguous
        self.search_text(json!({
            "textQuery": normalized.query,
            "regionCode": "US"
        }))
        .await
    }

    /// Fallback search by business name plus city/zip.
    pub async fn search_by_name(
        &self,
        name: &str,
        location: &str,
    ) -> Result<Option<ProviderMatch>, ApiError> {
        let query = format!("{} {}", name.trim(), location.trim())
            .trim()
            .to_string();
        if query.is_empty() {
            return Ok(None);
        }

        if self.mock_mode {
            return Ok(Some(ProviderMatch::from_places(json!({
                "id": "mock-place-text",
                "displayName": {"text": "Mock Business Verification"},
                "formattedAddress": "123 Mock Lane, Test City, 90210",
                "nationalPhoneNumber": "(555) 123-4567",
                "rating": 4.5,
                "userRatingCount": 85,
                "websiteUri": "https://mock-fallback.com"
            }))));
        }

        tracing::info!("Google Places: Searching by text: {}", query);
        self.search_text(json!({ "textQuery": query })).await
    }

    async fn search_text(&self, body: Value) -> Result<Option<ProviderMatch>, ApiError> {
        let Some(ref api_key) = self.api_key else {
            tracing::debug!("Google Places: no API key configured, skipping search");
            return Ok(None);
        };

        let request = ApiRequest::post(format!("{}/v1/places:searchText", self.base_url), body)
            .header("X-Goog-Api-Key", api_key.as_str())
            .header("X-Goog-FieldMask", PLACES_FIELD_MASK);

        let payload = self.client.execute(&request).await?;
        let best = first_entry(&payload, "places").map(ProviderMatch::from_places);

        match best {
            Some(ref place) => tracing::info!(
                "Google Places: Best match '{}'",
                place.name.as_deref().unwrap_or("<unnamed>")
            ),
            None => tracing::info!("Google Places: No match"),
        }
        Ok(best)
    }
}

/// Yelp Fusion business search verifier.
pub struct YelpVerifier {
    client: ApiClient,
    base_url: String,
    api_key: Option<String>,
    mock_mode: bool,
}

impl YelpVerifier {
    pub fn new(config: &Config, transport: Arc<dyn Transport>, limiter: Arc<RateLimiter>) -> Self {
        Self {
            client: ApiClient::new(
                Provider::Yelp,
                transport,
                limiter,
                RetryPolicy::from_config(config),
            ),
            base_url: config.yelp_base_url.clone(),
            api_key: config.yelp_api_key.clone(),
            mock_mode: config.mock_mode,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.mock_mode || self.api_key.is_some()
    }

    pub async fn search_by_phone(&self, phone: &str) -> Result<Option<ProviderMatch>, ApiError> {
        let Some(normalized) = normalize_phone(phone) else {
            return Ok(None);
        };

        if self.mock_mode {
            return Ok(Some(ProviderMatch::from_yelp(json!({
                "id": "mock-yelp-phone",
                "name": "Mock Yelp Business",
                "rating": 4.0,
                "review_count": 50
            }))));
        }

        tracing::info!("Yelp: Searching by phone: {}", normalized.query);

        let request = ApiRequest::get(format!("{}/v3/businesses/search/phone", self.base_url))
            .query("phone", normalized.query);
        self.search(request).await
    }

    /// Term search. Yelp requires a location, so an empty one short-circuits.
    pub async fn search_by_name(
        &self,
        name: &str,
        location: &str,
    ) -> Result<Option<ProviderMatch>, ApiError> {
        let (name, location) = (name.trim(), location.trim());
        if name.is_empty() || location.is_empty() {
            return Ok(None);
        }

        if self.mock_mode {
            return Ok(Some(ProviderMatch::from_yelp(json!({
                "id": "mock-yelp-term",
                "name": name,
                "rating": 3.5,
                "review_count": 20
            }))));
        }

        tracing::info!("Yelp: Searching by term '{}' near {}", name, location);

        let request = ApiRequest::get(format!("{}/v3/businesses/search", self.base_url))
            .query("term", name)
            .query("location", location)
            .query("limit", "1");
        self.search(request).await
    }

    async fn search(&self, request: ApiRequest) -> Result<Option<ProviderMatch>, ApiError> {
        let Some(ref api_key) = self.api_key else {
            tracing::debug!("Yelp: no API key configured, skipping search");
            return Ok(None);
        };

        let request = request.header("Authorization", format!("Bearer {}", api_key));
        let payload = self.client.execute(&request).await?;
        let best = first_entry(&payload, "businesses").map(ProviderMatch::from_yelp);

        match best {
            Some(ref business) => tracing::info!(
                "Yelp: Best match '{}'",
                business.name.as_deref().unwrap_or("<unnamed>")
            ),
            None => tracing::info!("Yelp: No match"),
        }
        Ok(best)
    }
}

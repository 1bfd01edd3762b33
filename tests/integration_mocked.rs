/// Integration tests with mocked external APIs
/// Runs the full scoring workflow over real HTTP against wiremock servers
use lead_quality_api::api_client::HttpTransport;
use lead_quality_api::config::Config;
use lead_quality_api::enrichment::LeadScorer;
use lead_quality_api::models::{Lead, QualityTier, ValidationState};
use lead_quality_api::rate_limiter::ProviderLimiters;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Helper function to create a test config pointing every provider at the mock server
fn create_test_config(base_url: String) -> Config {
    Config {
        google_places_api_key: Some("places-key".to_string()),
        yelp_api_key: Some("yelp-key".to_string()),
        google_search_api_key: Some("search-key".to_string()),
        google_search_cx: Some("search-cx".to_string()),
        places_base_url: base_url.clone(),
        yelp_base_url: base_url.clone(),
        search_base_url: base_url,
        yelp_rate_limit: 100,
        retry_base_delay: Duration::from_millis(10),
        http_timeout: Duration::from_secs(5),
        ..Config::default()
    }
}

fn create_scorer(config: &Config) -> LeadScorer {
    let transport = Arc::new(HttpTransport::new(config.http_timeout).unwrap());
    let limiters = ProviderLimiters::from_config(config);
    LeadScorer::from_config(config, transport, &limiters)
}

fn acme_lead() -> Lead {
    Lead::new(
        "Acme Plumbing",
        "(555) 123-4567",
        "90210",
        "info@acmeplumbing.com",
    )
}

async fn mount_places(server: &MockServer, text_query: &str, body: serde_json::Value) {
    Mock::given(method("POST"))
        .and(path("/v1/places:searchText"))
        .and(header("X-Goog-Api-Key", "places-key"))
        .and(body_partial_json(json!({ "textQuery": text_query })))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

async fn mount_yelp_phone(server: &MockServer, body: serde_json::Value) {
    Mock::given(method("GET"))
        .and(path("/v3/businesses/search/phone"))
        .and(query_param("phone", "+15551234567"))
        .and(header("Authorization", "Bearer yelp-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

async fn mount_yelp_term(server: &MockServer, body: serde_json::Value) {
    Mock::given(method("GET"))
        .and(path("/v3/businesses/search"))
        .and(query_param("term", "Acme Plumbing"))
        .and(query_param("location", "90210"))
        .and(query_param("limit", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_phone_match_scores_high() {
    let mock_server = MockServer::start().await;

    mount_places(
        &mock_server,
        "+15551234567",
        json!({"places": [{
            "id": "places/ChIJacme",
            "displayName": {"text": "Acme Plumbing Co", "languageCode": "en"},
            "formattedAddress": "1 Main St, Beverly Hills, CA 90210, USA",
            "websiteUri": "https://acme.com"
        }]}),
    )
    .await;
    mount_yelp_phone(&mock_server, json!({"businesses": [], "total": 0})).await;
    mount_yelp_term(
        &mock_server,
        json!({"businesses": [{
            "id": "acme-plumbing-beverly-hills",
            "name": "Acme Plumbing",
            "location": {"address1": "1 Main St", "city": "Beverly Hills", "state": "CA", "zip_code": "90210"}
        }]}),
    )
    .await;
    // The profile already supplied a website, so search must not run
    Mock::given(method("GET"))
        .and(path("/customsearch/v1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"items": []})))
        .expect(0)
        .mount(&mock_server)
        .await;

    let config = create_test_config(mock_server.uri());
    let result = create_scorer(&config).score(&acme_lead()).await;

    assert_eq!(result.score, 80);
    assert_eq!(result.quality_tier, QualityTier::High);
    assert_eq!(
        result.verified_business_name.as_deref(),
        Some("Acme Plumbing Co")
    );
    assert_eq!(result.website.as_deref(), Some("https://acme.com"));
    assert_eq!(
        result.address.as_deref(),
        Some("1 Main St, Beverly Hills, CA 90210, USA")
    );
    assert_eq!(
        result.yelp_url.as_deref(),
        Some("https://www.yelp.com/biz/acme-plumbing-beverly-hills")
    );
    assert_eq!(result.google_validated, ValidationState::Validated);
    assert_eq!(result.yelp_validated, ValidationState::Validated);
    assert!(result.api_errors.is_empty());
}

#[tokio::test]
async fn test_website_discovered_when_profiles_have_none() {
    let mock_server = MockServer::start().await;

    mount_places(&mock_server, "+15551234567", json!({})).await;
    mount_places(&mock_server, "Acme Plumbing 90210", json!({"places": []})).await;
    mount_yelp_phone(&mock_server, json!({"businesses": []})).await;
    mount_yelp_term(&mock_server, json!({"businesses": []})).await;
    Mock::given(method("GET"))
        .and(path("/customsearch/v1"))
        .and(query_param("key", "search-key"))
        .and(query_param("cx", "search-cx"))
        .and(query_param("q", "Acme Plumbing 90210"))
        .and(query_param("num", "3"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [
                {"link": "https://www.yelp.com/biz/acme-plumbing"},
                {"link": "https://www.acmeplumbing.com/"}
            ]
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let config = create_test_config(mock_server.uri());
    let result = create_scorer(&config).score(&acme_lead()).await;

    // 20 (discovered website) + 10 (business email)
    assert_eq!(result.score, 30);
    assert_eq!(result.quality_tier, QualityTier::Low);
    assert_eq!(
        result.website.as_deref(),
        Some("https://www.acmeplumbing.com/")
    );
    assert!(result.sources.contains("Google Search"));
    assert_eq!(result.google_validated, ValidationState::NotValidated);
}

#[tokio::test]
async fn test_name_match_website_skips_discovery() {
    let mock_server = MockServer::start().await;

    mount_places(&mock_server, "+15551234567", json!({})).await;
    mount_places(
        &mock_server,
        "Acme Plumbing 90210",
        json!({"places": [{
            "id": "places/ChIJacme",
            "displayName": {"text": "Acme Plumbing Inc", "languageCode": "en"},
            "websiteUri": "https://acmeplumbing.com"
        }]}),
    )
    .await;
    mount_yelp_phone(&mock_server, json!({"businesses": []})).await;
    mount_yelp_term(
        &mock_server,
        json!({"businesses": [{"id": "bakery", "name": "Totally Different Bakery"}]}),
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/customsearch/v1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [{"link": "https://www.other-site.com/"}]
        })))
        .expect(0)
        .mount(&mock_server)
        .await;

    let config = create_test_config(mock_server.uri());
    let result = create_scorer(&config).score(&acme_lead()).await;

    // 30 (Google name) + 20 (profile website) + 10 (business email)
    assert_eq!(result.score, 60);
    assert_eq!(result.quality_tier, QualityTier::Medium);
    assert_eq!(
        result.match_reasons[0],
        "Business Name & Location matched Google Profile (Sim: 0.76)"
    );
    assert!(result.match_reasons[1].starts_with("Rejected Yelp Match 'Totally Different Bakery'"));
    assert_eq!(result.match_reasons[2], "Website Verification (via Profile)");
    assert!(result.sources.contains("Google Maps (Name)"));
    assert!(!result.sources.contains("Google Search"));
    assert_eq!(
        result.verified_business_name.as_deref(),
        Some("Acme Plumbing Inc")
    );
    assert_eq!(result.website.as_deref(), Some("https://acmeplumbing.com"));
    assert_eq!(result.google_validated, ValidationState::Validated);
    assert_eq!(result.yelp_validated, ValidationState::NotValidated);
}

#[tokio::test]
async fn test_rate_limited_twice_then_success() {
    let mock_server = MockServer::start().await;

    mount_places(&mock_server, "+15551234567", json!({"places": []})).await;
    mount_places(&mock_server, "Acme Plumbing 90210", json!({"places": []})).await;
    Mock::given(method("GET"))
        .and(path("/v3/businesses/search/phone"))
        .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
        .up_to_n_times(2)
        .expect(2)
        .mount(&mock_server)
        .await;
    mount_yelp_phone(
        &mock_server,
        json!({"businesses": [{"id": "acme", "name": "Acme Plumbing"}]}),
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/customsearch/v1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&mock_server)
        .await;

    let config = create_test_config(mock_server.uri());
    let result = create_scorer(&config).score(&acme_lead()).await;

    assert_eq!(result.yelp_validated, ValidationState::Validated);
    assert!(result.sources.contains("Yelp (Phone)"));
    // Recovered after retries, so nothing is logged for reprocessing
    assert!(result.api_errors.is_empty());
}

#[tokio::test]
async fn test_unauthorized_is_not_retried() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/places:searchText"))
        .respond_with(ResponseTemplate::new(401).set_body_string("API key not valid"))
        // One attempt for the phone search, one for the name fallback
        .expect(2)
        .mount(&mock_server)
        .await;
    mount_yelp_phone(&mock_server, json!({"businesses": []})).await;
    mount_yelp_term(&mock_server, json!({"businesses": []})).await;
    Mock::given(method("GET"))
        .and(path("/customsearch/v1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&mock_server)
        .await;

    let config = create_test_config(mock_server.uri());
    let result = create_scorer(&config).score(&acme_lead()).await;

    assert_eq!(result.google_validated, ValidationState::Failed);
    assert_eq!(
        result.api_error_strings(),
        vec!["google_places:401", "google_places:401"]
    );
    // Email still counts
    assert_eq!(result.score, 10);
}

#[tokio::test]
async fn test_server_errors_exhaust_retries() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/places:searchText"))
        .respond_with(ResponseTemplate::new(503))
        // 1 attempt + 3 retries, for both the phone and the name search
        .expect(8)
        .mount(&mock_server)
        .await;
    mount_yelp_phone(&mock_server, json!({"businesses": []})).await;
    mount_yelp_term(&mock_server, json!({"businesses": []})).await;
    Mock::given(method("GET"))
        .and(path("/customsearch/v1"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&mock_server)
        .await;

    let config = create_test_config(mock_server.uri());
    let result = create_scorer(&config).score(&acme_lead()).await;

    assert_eq!(result.google_validated, ValidationState::Failed);
    assert_eq!(result.yelp_validated, ValidationState::NotValidated);
    assert_eq!(
        result.api_error_strings(),
        vec!["google_places:503", "google_places:503"]
    );
    // Search failures are swallowed: no website, no tag
    assert_eq!(result.website, None);
}

#[tokio::test]
async fn test_missing_keys_make_no_requests() {
    let mock_server = MockServer::start().await;

    Mock::given(wiremock::matchers::any())
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&mock_server)
        .await;

    let config = Config {
        places_base_url: mock_server.uri(),
        yelp_base_url: mock_server.uri(),
        search_base_url: mock_server.uri(),
        ..Config::default()
    };
    let result = create_scorer(&config).score(&acme_lead()).await;

    // Only the business email counts in degraded mode
    assert_eq!(result.score, 10);
    assert_eq!(result.google_validated, ValidationState::NotValidated);
    assert_eq!(result.yelp_validated, ValidationState::NotValidated);
}

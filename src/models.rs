use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;

// ============ Input ============

/// An unverified business contact submitted for validation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Lead {
    pub business_name: String,
    pub phone: String,
    #[serde(default)]
    pub zip_code: String,
    #[serde(default)]
    pub email: String,
}

impl Lead {
    pub fn new(
        business_name: impl Into<String>,
        phone: impl Into<String>,
        zip_code: impl Into<String>,
        email: impl Into<String>,
    ) -> Self {
        Self {
            business_name: business_name.into(),
            phone: phone.into(),
            zip_code: zip_code.into(),
            email: email.into(),
        }
    }
}

// ============ Providers ============

/// External directory consulted while verifying a lead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    GooglePlaces,
    Yelp,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::GooglePlaces => "google_places",
            Provider::Yelp => "yelp",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Best candidate returned by one provider search.
///
/// The scorer only reads the projected fields; `raw` keeps the full payload
/// for audit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderMatch {
    pub provider: Provider,
    pub name: Option<String>,
    pub address: Option<String>,
    /// Only Google Places profiles carry a website.
    pub website: Option<String>,
    pub id: Option<String>,
    pub raw: Value,
}

impl ProviderMatch {
    /// Projects a Places API `places[]` entry.
    pub fn from_places(raw: Value) -> Self {
        let name = raw
            .get("displayName")
            .and_then(|d| d.get("text"))
            .and_then(Value::as_str)
            .map(str::to_string);
        let address = non_empty_str(&raw, "formattedAddress");
        let website = non_empty_str(&raw, "websiteUri");
        let id = non_empty_str(&raw, "id");

        Self {
            provider: Provider::GooglePlaces,
            name,
            address,
            website,
            id,
            raw,
        }
    }

    /// Projects a Yelp Fusion `businesses[]` entry.
    pub fn from_yelp(raw: Value) -> Self {
        let name = raw.get("name").and_then(Value::as_str).map(str::to_string);
        let id = non_empty_str(&raw, "id");
        let address = raw.get("location").and_then(|loc| {
            let parts: Vec<String> = ["address1", "city", "state", "zip_code"]
                .iter()
                .filter_map(|key| loc.get(*key))
                .filter_map(|v| match v {
                    Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
                    Value::Number(n) => Some(n.to_string()),
                    _ => None,
                })
                .collect();
            if parts.is_empty() {
                None
            } else {
                Some(parts.join(", "))
            }
        });

        Self {
            provider: Provider::Yelp,
            name,
            address,
            website: None,
            id,
            raw,
        }
    }

    /// Canonical public profile URL built from the provider identifier.
    pub fn profile_url(&self) -> Option<String> {
        let id = self.id.as_deref()?;
        match self.provider {
            Provider::GooglePlaces => {
                // The v1 API may return "places/ChIJ..." or just "ChIJ..."
                let place_id = id.trim_start_matches("places/").trim();
                if place_id.is_empty() {
                    None
                } else {
                    Some(format!(
                        "https://www.google.com/maps/place/?q=place_id:{}",
                        place_id
                    ))
                }
            }
            Provider::Yelp => Some(format!("https://www.yelp.com/biz/{}", id)),
        }
    }
}

fn non_empty_str(raw: &Value, key: &str) -> Option<String> {
    raw.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

// ============ Scoring output ============

/// Coarse bucket derived from the numeric score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QualityTier {
    High,
    Medium,
    Low,
    /// Only produced for batch rows whose scoring crashed.
    Error,
}

impl QualityTier {
    pub fn from_score(score: u8) -> Self {
        if score >= 70 {
            QualityTier::High
        } else if score >= 40 {
            QualityTier::Medium
        } else {
            QualityTier::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QualityTier::High => "High",
            QualityTier::Medium => "Medium",
            QualityTier::Low => "Low",
            QualityTier::Error => "Error",
        }
    }
}

impl fmt::Display for QualityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of verifying a lead against one provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValidationState {
    /// The provider contributed score.
    Validated,
    /// Queried (or skipped) without an accepted match.
    NotValidated,
    /// A call to the provider errored or exhausted its retries.
    Failed,
}

impl ValidationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationState::Validated => "Validated",
            ValidationState::NotValidated => "Not Validated",
            ValidationState::Failed => "Failed",
        }
    }
}

impl fmt::Display for ValidationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Similarity between the lead's business name and a provider's candidate name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NameSimilarity {
    pub score: f64,
    pub matched_name: String,
}

/// What went wrong on a terminal provider failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCode {
    Http(u16),
    Network,
    Decode,
}

/// `(provider, status)` pair recorded so a failed row can be reprocessed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApiErrorTag {
    pub provider: Provider,
    pub code: FailureCode,
}

impl fmt::Display for ApiErrorTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            FailureCode::Http(status) => write!(f, "{}:{}", self.provider, status),
            FailureCode::Network => write!(f, "{}:network", self.provider),
            FailureCode::Decode => write!(f, "{}:decode", self.provider),
        }
    }
}

/// Verification outcome for one lead.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnrichmentResult {
    /// Always within 0..=100.
    pub score: u8,
    pub quality_tier: QualityTier,
    pub verified_business_name: Option<String>,
    pub website: Option<String>,
    /// Chronological; one entry per check that produced evidence.
    pub match_reasons: Vec<String>,
    pub sources: BTreeSet<String>,
    pub raw_google: Option<Value>,
    pub raw_yelp: Option<Value>,
    pub google_validated: ValidationState,
    pub yelp_validated: ValidationState,
    pub google_similarity: Option<NameSimilarity>,
    pub yelp_similarity: Option<NameSimilarity>,
    /// Address of an accepted profile, Google Places first.
    pub address: Option<String>,
    /// Profile links, present only when that provider validated the lead.
    pub google_url: Option<String>,
    pub yelp_url: Option<String>,
    pub api_errors: Vec<ApiErrorTag>,
}

impl EnrichmentResult {
    pub fn api_error_strings(&self) -> Vec<String> {
        self.api_errors.iter().map(ToString::to_string).collect()
    }
}

/// Lead verification and scoring
///
/// Checks, in fixed order:
/// 1. Google Places by phone, else by name + zip (similarity guardrail)
/// 2. Yelp by phone, else by name near zip (similarity guardrail)
/// 3. Website discovery when no profile supplied a website
/// 4. Website credit (exactly once) and business email domain
///
/// Later steps read what earlier steps adopted, so the order is part of the
/// result.
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::api_client::{ApiError, Transport};
use crate::config::Config;
use crate::models::{
    ApiErrorTag, EnrichmentResult, Lead, NameSimilarity, ProviderMatch, QualityTier,
    ValidationState,
};
use crate::rate_limiter::ProviderLimiters;
use crate::services::{GooglePlacesVerifier, YelpVerifier};
use crate::website_finder::{GoogleSearchFinder, WebsiteFinder};

/// Minimum similarity for a name-based match to count as verification.
pub const NAME_MATCH_THRESHOLD: f64 = 0.5;

/// Consumer webmail domains that say nothing about the business.
pub const FREE_EMAIL_DOMAINS: &[&str] = &[
    "gmail.com",
    "yahoo.com",
    "hotmail.com",
    "outlook.com",
    "icloud.com",
    "aol.com",
];

const GOOGLE_PHONE_POINTS: u32 = 40;
const GOOGLE_NAME_POINTS: u32 = 30;
const YELP_PHONE_POINTS: u32 = 20;
const YELP_NAME_POINTS: u32 = 10;
const WEBSITE_POINTS: u32 = 20;
const EMAIL_POINTS: u32 = 10;

/// Case-insensitive normalized edit-distance ratio in `[0, 1]`.
///
/// Empty names never match.
pub fn name_similarity(a: &str, b: &str) -> f64 {
    let (a, b) = (a.trim().to_lowercase(), b.trim().to_lowercase());
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    strsim::normalized_levenshtein(&a, &b)
}

/// Lowercased text after the last `@` of a non-empty email.
///
/// Anything outside the free webmail providers counts, including an
/// address with no `@` (the whole string) or nothing after it.
pub fn business_email_domain(email: &str) -> Option<String> {
    let email = email.trim();
    if email.is_empty() {
        return None;
    }
    let domain = email.rsplit('@').next().unwrap_or(email).trim().to_lowercase();
    if FREE_EMAIL_DOMAINS.contains(&domain.as_str()) {
        None
    } else {
        Some(domain)
    }
}

/// Evidence accumulated across the scoring steps of one lead.
#[derive(Default)]
struct Evidence {
    points: u32,
    reasons: Vec<String>,
    sources: BTreeSet<String>,
    verified_name: Option<String>,
    website: Option<String>,
    website_discovered: bool,
    api_errors: Vec<ApiErrorTag>,
}

impl Evidence {
    fn award(&mut self, points: u32, reason: impl Into<String>, source: Option<&str>) {
        self.points += points;
        self.reasons.push(reason.into());
        if let Some(source) = source {
            self.sources.insert(source.to_string());
        }
    }

    fn note(&mut self, reason: impl Into<String>) {
        self.reasons.push(reason.into());
    }

    /// First non-empty name wins.
    fn adopt_name(&mut self, name: Option<&str>) {
        adopt_if_unset(&mut self.verified_name, name);
    }

    /// First non-empty website wins.
    fn adopt_website(&mut self, website: Option<&str>) {
        adopt_if_unset(&mut self.website, website);
    }
}

fn adopt_if_unset(slot: &mut Option<String>, value: Option<&str>) {
    if slot.is_some() {
        return;
    }
    if let Some(value) = value.map(str::trim).filter(|v| !v.is_empty()) {
        *slot = Some(value.to_string());
    }
}

/// What one provider contributed to a lead.
#[derive(Default)]
struct ProviderOutcome {
    accepted: Option<ProviderMatch>,
    failed: bool,
    raw: Option<Value>,
    similarity: Option<NameSimilarity>,
}

impl ProviderOutcome {
    fn state(&self) -> ValidationState {
        if self.accepted.is_some() {
            ValidationState::Validated
        } else if self.failed {
            ValidationState::Failed
        } else {
            ValidationState::NotValidated
        }
    }

    /// Turns a search result into "candidate or nothing", recording failures.
    fn settle(
        &mut self,
        evidence: &mut Evidence,
        result: Result<Option<ProviderMatch>, ApiError>,
    ) -> Option<ProviderMatch> {
        match result {
            Ok(Some(candidate)) => {
                self.raw = Some(candidate.raw.clone());
                Some(candidate)
            }
            Ok(None) => None,
            Err(e) => {
                tracing::warn!("{} lookup failed, continuing without it: {}", e.provider(), e);
                self.failed = true;
                evidence.api_errors.push(e.tag());
                None
            }
        }
    }

    /// Compares the candidate's name with the lead's; returns the
    /// similarity and whether it clears the guardrail.
    fn compare_name(&mut self, business_name: &str, candidate: &ProviderMatch) -> (f64, String) {
        let returned = candidate.name.clone().unwrap_or_default();
        let similarity = name_similarity(business_name, &returned);
        self.similarity = Some(NameSimilarity {
            score: similarity,
            matched_name: returned.clone(),
        });
        (similarity, returned)
    }
}

/// Verifies and scores leads against both directories.
///
/// Holds no per-lead state, so one instance serves every batch worker.
pub struct LeadScorer {
    places: GooglePlacesVerifier,
    yelp: YelpVerifier,
    website_finder: Arc<dyn WebsiteFinder>,
}

impl LeadScorer {
    pub fn new(
        places: GooglePlacesVerifier,
        yelp: YelpVerifier,
        website_finder: Arc<dyn WebsiteFinder>,
    ) -> Self {
        Self {
            places,
            yelp,
            website_finder,
        }
    }

    /// Wires the production verifiers to the shared limiters.
    pub fn from_config(
        config: &Config,
        transport: Arc<dyn Transport>,
        limiters: &ProviderLimiters,
    ) -> Self {
        let places = GooglePlacesVerifier::new(config, transport.clone(), limiters.places.clone());
        let yelp = YelpVerifier::new(config, transport.clone(), limiters.yelp.clone());
        let finder = GoogleSearchFinder::new(config, transport);

        Self::new(places, yelp, Arc::new(finder))
    }

    pub fn places(&self) -> &GooglePlacesVerifier {
        &self.places
    }

    pub fn yelp(&self) -> &YelpVerifier {
        &self.yelp
    }

    /// Verify and score one lead. Provider failures lower the evidence but
    /// never abort scoring.
    pub async fn score(&self, lead: &Lead) -> EnrichmentResult {
        tracing::info!(
            "Scoring lead '{}' (phone: {}, zip: {})",
            lead.business_name,
            lead.phone,
            lead.zip_code
        );

        let mut evidence = Evidence::default();
        let mut google = ProviderOutcome::default();
        let mut yelp = ProviderOutcome::default();

        // 1. Google Places: phone first, then name + zip
        let phone_hit = google.settle(&mut evidence, self.places.search_by_phone(&lead.phone).await);
        if let Some(place) = phone_hit {
            evidence.award(
                GOOGLE_PHONE_POINTS,
                "Phone number matched Google Business Profile",
                Some("Google Maps (Phone)"),
            );
            evidence.adopt_name(place.name.as_deref());
            evidence.adopt_website(place.website.as_deref());
            google.accepted = Some(place);
        } else {
            let result = self
                .places
                .search_by_name(&lead.business_name, &lead.zip_code)
                .await;
            if let Some(place) = google.settle(&mut evidence, result) {
                let (similarity, returned) = google.compare_name(&lead.business_name, &place);
                if similarity >= NAME_MATCH_THRESHOLD {
                    evidence.award(
                        GOOGLE_NAME_POINTS,
                        format!(
                            "Business Name & Location matched Google Profile (Sim: {:.2})",
                            similarity
                        ),
                        Some("Google Maps (Name)"),
                    );
                    evidence.adopt_name(place.name.as_deref());
                    evidence.adopt_website(place.website.as_deref());
                    google.accepted = Some(place);
                } else {
                    evidence.note(format!(
                        "Rejected Google Match '{}' (Low Similarity: {:.2})",
                        returned, similarity
                    ));
                }
            }
        }

        // 2. Yelp: phone first, then name near zip
        let phone_hit = yelp.settle(&mut evidence, self.yelp.search_by_phone(&lead.phone).await);
        if let Some(business) = phone_hit {
            evidence.award(
                YELP_PHONE_POINTS,
                "Phone number matched verified Yelp Business",
                Some("Yelp (Phone)"),
            );
            yelp.accepted = Some(business);
        } else {
            let result = self
                .yelp
                .search_by_name(&lead.business_name, &lead.zip_code)
                .await;
            if let Some(business) = yelp.settle(&mut evidence, result) {
                let (similarity, returned) = yelp.compare_name(&lead.business_name, &business);
                if similarity >= NAME_MATCH_THRESHOLD {
                    // Lower confidence than a phone match
                    evidence.award(
                        YELP_NAME_POINTS,
                        format!("Location matched Yelp Business (Sim: {:.2})", similarity),
                        Some("Yelp (Name)"),
                    );
                    evidence.adopt_name(business.name.as_deref());
                    yelp.accepted = Some(business);
                } else {
                    evidence.note(format!(
                        "Rejected Yelp Match '{}' (Low Similarity: {:.2})",
                        returned, similarity
                    ));
                }
            }
        }

        // 3. Website: discovered now, or credited once for the profile's site
        if evidence.website.is_none() {
            if let Some(site) = self
                .website_finder
                .find_website(&lead.business_name, "", &lead.zip_code)
                .await
            {
                evidence.adopt_website(Some(&site));
                evidence.website_discovered = evidence.website.is_some();
                if evidence.website_discovered {
                    evidence.award(
                        WEBSITE_POINTS,
                        "Official Website Discovered via Search",
                        Some("Google Search"),
                    );
                }
            }
        } else if !evidence.website_discovered {
            evidence.award(WEBSITE_POINTS, "Website Verification (via Profile)", None);
        }

        // 4. Business email domain
        if let Some(domain) = business_email_domain(&lead.email) {
            tracing::debug!("Business email domain: {}", domain);
            evidence.award(EMAIL_POINTS, "Business Email Domain Detected", None);
        }

        let score = evidence.points.min(100) as u8;
        let quality_tier = QualityTier::from_score(score);

        let address = google
            .accepted
            .as_ref()
            .and_then(|m| m.address.clone())
            .or_else(|| yelp.accepted.as_ref().and_then(|m| m.address.clone()));
        let google_url = google.accepted.as_ref().and_then(ProviderMatch::profile_url);
        let yelp_url = yelp.accepted.as_ref().and_then(ProviderMatch::profile_url);

        tracing::info!(
            "Lead '{}' scored {} ({}), sources: {:?}",
            lead.business_name,
            score,
            quality_tier,
            evidence.sources
        );

        EnrichmentResult {
            score,
            quality_tier,
            verified_business_name: evidence.verified_name,
            website: evidence.website,
            match_reasons: evidence.reasons,
            sources: evidence.sources,
            google_validated: google.state(),
            yelp_validated: yelp.state(),
            raw_google: google.raw,
            raw_yelp: yelp.raw,
            google_similarity: google.similarity,
            yelp_similarity: yelp.similarity,
            address,
            google_url,
            yelp_url,
            api_errors: evidence.api_errors,
        }
    }
}

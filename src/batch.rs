use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::ops::Range;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinError;
use tokio::time::Instant;
use tracing::Instrument;
use uuid::Uuid;

use crate::enrichment::LeadScorer;
use crate::models::{EnrichmentResult, Lead, QualityTier, ValidationState};

/// Columns every input row must carry (after key normalization).
pub const REQUIRED_COLUMNS: [&str; 4] = ["business_name", "phone", "zip_code", "email"];

/// Column names produced by scoring. They replace same-named input columns.
pub const RESULT_COLUMNS: [&str; 17] = [
    "score",
    "quality_tier",
    "verified_name",
    "google_website",
    "match_reasons",
    "sources",
    "google_validated",
    "yelp_validated",
    "address",
    "google_url",
    "yelp_url",
    "raw_google",
    "raw_yelp",
    "google_similarity",
    "google_similarity_matched_name",
    "yelp_similarity",
    "yelp_similarity_matched_name",
];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BatchError {
    #[error("Row {row_index} is missing required columns: {}", .columns.join(", "))]
    MissingColumns {
        row_index: usize,
        columns: Vec<&'static str>,
    },
}

/// One input record: a normalized column → value map.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InputRow(BTreeMap<String, String>);

impl InputRow {
    /// Lowercases and trims keys, trims values, and blanks out spreadsheet
    /// placeholders ("nan", "None").
    pub fn new<K, V>(cells: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        Self(
            cells
                .into_iter()
                .map(|(k, v)| (k.as_ref().trim().to_lowercase(), clean_value(v.as_ref())))
                .collect(),
        )
    }

    /// Builds a row from a JSON object. Numbers and booleans are stringified,
    /// `null` becomes empty.
    pub fn from_json(object: &Map<String, Value>) -> Self {
        Self::new(object.iter().map(|(k, v)| {
            let text = match v {
                Value::String(s) => s.clone(),
                Value::Null => String::new(),
                other => other.to_string(),
            };
            (k, text)
        }))
    }

    pub fn get(&self, column: &str) -> &str {
        self.0.get(column).map(String::as_str).unwrap_or("")
    }

    pub fn columns(&self) -> &BTreeMap<String, String> {
        &self.0
    }

    pub fn missing_columns(&self) -> Vec<&'static str> {
        REQUIRED_COLUMNS
            .iter()
            .copied()
            .filter(|column| !self.0.contains_key(*column))
            .collect()
    }

    pub fn to_lead(&self) -> Lead {
        Lead::new(
            self.get("business_name"),
            self.get("phone"),
            self.get("zip_code"),
            self.get("email"),
        )
    }
}

fn clean_value(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.eq_ignore_ascii_case("nan") || trimmed.eq_ignore_ascii_case("none") {
        String::new()
    } else {
        trimmed.to_string()
    }
}

/// Input columns plus the flattened scoring outcome.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultRow {
    #[serde(flatten)]
    pub input: BTreeMap<String, String>,
    pub score: u8,
    pub quality_tier: QualityTier,
    pub verified_name: String,
    pub google_website: String,
    pub match_reasons: String,
    pub sources: String,
    pub google_validated: String,
    pub yelp_validated: String,
    pub address: String,
    pub google_url: String,
    pub yelp_url: String,
    pub raw_google: String,
    pub raw_yelp: String,
    pub google_similarity: String,
    pub google_similarity_matched_name: String,
    pub yelp_similarity: String,
    pub yelp_similarity_matched_name: String,
}

impl ResultRow {
    pub fn from_result(row: &InputRow, result: &EnrichmentResult) -> Self {
        let sources: Vec<&str> = result.sources.iter().map(String::as_str).collect();
        let raw = |payload: &Option<Value>| {
            payload
                .as_ref()
                .map(Value::to_string)
                .unwrap_or_default()
        };

        Self {
            input: passthrough_columns(row),
            score: result.score,
            quality_tier: result.quality_tier,
            verified_name: result.verified_business_name.clone().unwrap_or_default(),
            google_website: result.website.clone().unwrap_or_default(),
            match_reasons: result.match_reasons.join("; "),
            sources: sources.join(", "),
            google_validated: result.google_validated.to_string(),
            yelp_validated: result.yelp_validated.to_string(),
            address: result.address.clone().unwrap_or_default(),
            google_url: result.google_url.clone().unwrap_or_default(),
            yelp_url: result.yelp_url.clone().unwrap_or_default(),
            raw_google: raw(&result.raw_google),
            raw_yelp: raw(&result.raw_yelp),
            google_similarity: result
                .google_similarity
                .as_ref()
                .map(|s| format!("{:.4}", s.score))
                .unwrap_or_default(),
            google_similarity_matched_name: result
                .google_similarity
                .as_ref()
                .map(|s| s.matched_name.clone())
                .unwrap_or_default(),
            yelp_similarity: result
                .yelp_similarity
                .as_ref()
                .map(|s| format!("{:.4}", s.score))
                .unwrap_or_default(),
            yelp_similarity_matched_name: result
                .yelp_similarity
                .as_ref()
                .map(|s| s.matched_name.clone())
                .unwrap_or_default(),
        }
    }

    /// Row for a lead whose scoring crashed.
    pub fn error(row: &InputRow, message: &str) -> Self {
        let failed = ValidationState::Failed.to_string();
        Self {
            input: passthrough_columns(row),
            score: 0,
            quality_tier: QualityTier::Error,
            verified_name: String::new(),
            google_website: String::new(),
            match_reasons: message.to_string(),
            sources: String::new(),
            google_validated: failed.clone(),
            yelp_validated: failed,
            address: String::new(),
            google_url: String::new(),
            yelp_url: String::new(),
            raw_google: String::new(),
            raw_yelp: String::new(),
            google_similarity: String::new(),
            google_similarity_matched_name: String::new(),
            yelp_similarity: String::new(),
            yelp_similarity_matched_name: String::new(),
        }
    }
}

fn passthrough_columns(row: &InputRow) -> BTreeMap<String, String> {
    row.columns()
        .iter()
        .filter(|(k, _)| !RESULT_COLUMNS.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// A row that needs reprocessing, with its error tags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedRow {
    pub row_index: usize,
    pub errors: Vec<String>,
}

/// Contiguous shards covering `start_index..total`.
pub fn shard_ranges(total: usize, shard_size: usize, start_index: usize) -> Vec<Range<usize>> {
    let shard_size = shard_size.max(1);
    (start_index.min(total)..total)
        .step_by(shard_size)
        .map(|start| start..(start + shard_size).min(total))
        .collect()
}

pub type ProgressCallback<'a> = &'a mut (dyn FnMut(usize, usize) + Send);
pub type FailedRowCallback<'a> = &'a mut (dyn FnMut(usize, &[String]) + Send);

/// Scores many rows with bounded parallelism.
///
/// Stateless between calls: each `process` invocation (one shard, say) only
/// shares the scorer and, through it, the provider rate limiters.
pub struct BatchProcessor {
    scorer: Arc<LeadScorer>,
    concurrency: usize,
}

impl BatchProcessor {
    pub fn new(scorer: Arc<LeadScorer>, concurrency: usize) -> Self {
        Self {
            scorer,
            concurrency: concurrency.max(1),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Score every row and return results in input order.
    ///
    /// Fails before any scoring if a row lacks a required column. A row
    /// whose scoring panics becomes an `Error` row; a row with provider
    /// failures is still scored and reported through `on_failed_row`.
    pub async fn process(
        &self,
        rows: &[InputRow],
        mut on_progress: Option<ProgressCallback<'_>>,
        mut on_failed_row: Option<FailedRowCallback<'_>>,
    ) -> Result<Vec<ResultRow>, BatchError> {
        for (row_index, row) in rows.iter().enumerate() {
            let columns = row.missing_columns();
            if !columns.is_empty() {
                return Err(BatchError::MissingColumns { row_index, columns });
            }
        }

        let batch_id = Uuid::new_v4();
        let span = tracing::info_span!("batch", %batch_id);

        let results = async move {
            let total = rows.len();
            let started = Instant::now();
            tracing::info!(
                "Starting batch of {} rows with {} workers",
                total,
                self.concurrency
            );

            let mut slots: Vec<Option<ResultRow>> = (0..total).map(|_| None).collect();
            let mut completed = 0;
            let mut failed = 0;

            let mut outcomes = stream::iter(rows.iter().cloned().enumerate())
                .map(|(index, row)| {
                    let scorer = self.scorer.clone();
                    async move {
                        let lead = row.to_lead();
                        // A panic inside the task surfaces here as a JoinError
                        let outcome = tokio::spawn(async move { scorer.score(&lead).await }).await;
                        (index, row, outcome)
                    }
                })
                .buffer_unordered(self.concurrency);

            while let Some((index, row, outcome)) = outcomes.next().await {
                let (result_row, errors) = match outcome {
                    Ok(result) => (
                        ResultRow::from_result(&row, &result),
                        result.api_error_strings(),
                    ),
                    Err(e) => {
                        let message = join_error_message(e);
                        tracing::error!("Row {} failed: {}", index, message);
                        (
                            ResultRow::error(&row, &message),
                            vec![format!("exception:{}", message)],
                        )
                    }
                };

                if !errors.is_empty() {
                    failed += 1;
                    tracing::warn!("Row {} logged for reprocessing: {:?}", index, errors);
                    if let Some(callback) = on_failed_row.as_deref_mut() {
                        callback(index, &errors);
                    }
                }

                slots[index] = Some(result_row);
                completed += 1;
                if let Some(callback) = on_progress.as_deref_mut() {
                    callback(completed, total);
                }
            }

            tracing::info!(
                "Batch finished: {} rows in {:?}, {} failed",
                total,
                started.elapsed(),
                failed
            );

            slots.into_iter().flatten().collect::<Vec<_>>()
        }
        .instrument(span)
        .await;

        Ok(results)
    }
}

fn join_error_message(error: JoinError) -> String {
    if !error.is_panic() {
        return error.to_string();
    }
    let payload = error.into_panic();
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "scoring task panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api_client::tests::ScriptedTransport;
    use crate::api_client::TransportResponse;
    use crate::config::Config;
    use crate::enrichment::tests::{keyed_config, ok, scorer_with, FixedFinder};
    use crate::website_finder::WebsiteFinder;
    use async_trait::async_trait;
    use serde_json::json;
    use std::time::Duration;

    /// Sleeps for the number of milliseconds in the zip code; panics on "boom".
    struct SlowFinder;

    #[async_trait]
    impl WebsiteFinder for SlowFinder {
        async fn find_website(&self, name: &str, _city: &str, zip: &str) -> Option<String> {
            if name == "boom" {
                panic!("finder exploded");
            }
            let delay: u64 = zip.parse().unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(delay)).await;
            Some(format!("https://{}.example.com", name))
        }
    }

    fn row(name: &str, zip: &str) -> InputRow {
        InputRow::new([
            ("business_name", name),
            ("phone", ""),
            ("zip_code", zip),
            ("email", ""),
        ])
    }

    fn offline_processor(finder: Arc<dyn WebsiteFinder>, concurrency: usize) -> BatchProcessor {
        // No keys: both verifiers skip the network
        let scorer = scorer_with(&Config::default(), ScriptedTransport::new(vec![]), finder);
        BatchProcessor::new(Arc::new(scorer), concurrency)
    }

    #[test]
    fn test_input_row_normalization() {
        let row = InputRow::new([
            ("  Business_Name ", " Acme "),
            ("PHONE", "nan"),
            ("Zip_Code", "None"),
            ("email", " NaN "),
        ]);
        assert_eq!(row.get("business_name"), "Acme");
        assert_eq!(row.get("phone"), "");
        assert_eq!(row.get("zip_code"), "");
        assert_eq!(row.get("email"), "");
        assert!(row.missing_columns().is_empty());
    }

    #[test]
    fn test_input_row_from_json_stringifies() {
        let object = json!({"business_name": "Acme", "zip_code": 90210, "phone": null});
        let row = InputRow::from_json(object.as_object().unwrap());
        assert_eq!(row.get("zip_code"), "90210");
        assert_eq!(row.get("phone"), "");
        assert_eq!(row.missing_columns(), vec!["email"]);
    }

    #[test]
    fn test_shard_ranges() {
        assert_eq!(shard_ranges(2500, 1000, 0), vec![0..1000, 1000..2000, 2000..2500]);
        assert_eq!(shard_ranges(2500, 1000, 1500), vec![1500..2500]);
        assert_eq!(shard_ranges(10, 1000, 0), vec![0..10]);
        assert!(shard_ranges(10, 1000, 10).is_empty());
        assert!(shard_ranges(0, 1000, 0).is_empty());
        assert!(shard_ranges(5, 2, 99).is_empty());
    }

    #[test]
    fn test_result_columns_override_input() {
        let input = InputRow::new([
            ("business_name", "Acme"),
            ("phone", ""),
            ("zip_code", ""),
            ("email", ""),
            ("score", "999"),
            ("owner", "Pat"),
        ]);
        let result_row = ResultRow::error(&input, "boom");

        let value = serde_json::to_value(&result_row).unwrap();
        assert_eq!(value["score"], json!(0));
        assert_eq!(value["owner"], json!("Pat"));
        assert_eq!(value["quality_tier"], json!("Error"));
        assert_eq!(value["google_validated"], json!("Failed"));
        assert_eq!(value["match_reasons"], json!("boom"));
    }

    #[tokio::test]
    async fn test_missing_columns_rejected_before_scoring() {
        let processor = offline_processor(Arc::new(FixedFinder(None)), 2);
        let rows = vec![
            row("Acme", "90210"),
            InputRow::new([("business_name", "No Phone")]),
        ];

        let err = processor.process(&rows, None, None).await.unwrap_err();
        assert_eq!(
            err,
            BatchError::MissingColumns {
                row_index: 1,
                columns: vec!["phone", "zip_code", "email"],
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_output_order_matches_input_order() {
        let processor = offline_processor(Arc::new(SlowFinder), 5);
        // Earlier rows sleep longer, so they finish last
        let rows: Vec<InputRow> = (0..5)
            .map(|i| row(&format!("lead{}", i), &((5 - i) * 10).to_string()))
            .collect();

        let mut finished = Vec::new();
        let mut progress = |done: usize, total: usize| finished.push((done, total));
        let results = processor
            .process(&rows, Some(&mut progress), None)
            .await
            .unwrap();

        let names: Vec<&str> = results
            .iter()
            .map(|r| r.input["business_name"].as_str())
            .collect();
        assert_eq!(names, vec!["lead0", "lead1", "lead2", "lead3", "lead4"]);
        assert_eq!(results[3].google_website, "https://lead3.example.com");
        assert_eq!(
            finished,
            vec![(1, 5), (2, 5), (3, 5), (4, 5), (5, 5)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_row_is_isolated() {
        let processor = offline_processor(Arc::new(SlowFinder), 2);
        let rows = vec![row("first", "5"), row("boom", "0"), row("last", "1")];

        let mut failures = Vec::new();
        let mut on_failed = |index: usize, errors: &[String]| failures.push((index, errors.to_vec()));
        let results = processor
            .process(&rows, None, Some(&mut on_failed))
            .await
            .unwrap();

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].score, 20);
        assert_eq!(results[1].quality_tier, QualityTier::Error);
        assert_eq!(results[1].score, 0);
        assert_eq!(results[1].match_reasons, "finder exploded");
        assert_eq!(results[1].yelp_validated, "Failed");
        assert_eq!(results[2].score, 20);
        assert_eq!(
            failures,
            vec![(1, vec!["exception:finder exploded".to_string()])]
        );
    }

    #[tokio::test]
    async fn test_provider_errors_reported_as_failed_row() {
        let unauthorized = || {
            Ok(TransportResponse {
                status: 401,
                body: "bad key".to_string(),
            })
        };
        let transport = ScriptedTransport::new(vec![
            unauthorized(),
            unauthorized(),
            ok(json!({"businesses": []})),
            ok(json!({"businesses": []})),
        ]);
        let scorer = scorer_with(&keyed_config(), transport, Arc::new(FixedFinder(None)));
        let processor = BatchProcessor::new(Arc::new(scorer), 1);
        let rows = vec![InputRow::new([
            ("business_name", "Acme Plumbing"),
            ("phone", "5551234567"),
            ("zip_code", "90210"),
            ("email", ""),
        ])];

        let mut failures = Vec::new();
        let mut on_failed = |index: usize, errors: &[String]| failures.push((index, errors.to_vec()));
        let results = processor
            .process(&rows, None, Some(&mut on_failed))
            .await
            .unwrap();

        assert_eq!(results[0].google_validated, "Failed");
        assert_eq!(results[0].yelp_validated, "Not Validated");
        assert_eq!(
            failures,
            vec![(
                0,
                vec!["google_places:401".to_string(), "google_places:401".to_string()]
            )]
        );
    }

    #[tokio::test]
    async fn test_repeated_invocations_do_not_share_state() {
        let processor = offline_processor(Arc::new(FixedFinder(Some("https://acme.com".into()))), 3);
        let rows = vec![row("Acme", "90210"), row("Other", "10001")];

        let first = processor.process(&rows[..1], None, None).await.unwrap();
        let second = processor.process(&rows[1..], None, None).await.unwrap();

        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].input["business_name"], "Other");
        assert_eq!(first[0].score, second[0].score);
    }
}

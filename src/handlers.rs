use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;

use crate::batch::{shard_ranges, BatchError, BatchProcessor, FailedRow, InputRow, ResultRow};
use crate::config::Config;
use crate::enrichment::LeadScorer;
use crate::errors::AppError;
use crate::models::{EnrichmentResult, Lead};

/// Shared application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Config,
    /// Single-lead scorer, also used by the batch processor.
    pub scorer: Arc<LeadScorer>,
    pub batch: Arc<BatchProcessor>,
}

impl AppState {
    pub fn new(config: Config, scorer: Arc<LeadScorer>) -> Self {
        let batch = Arc::new(BatchProcessor::new(scorer.clone(), config.batch_concurrency));
        Self {
            config,
            scorer,
            batch,
        }
    }
}

fn provider_status(configured: bool) -> &'static str {
    if configured {
        "configured"
    } else {
        "degraded"
    }
}

/// Health check endpoint.
///
/// Reports per-provider status: "degraded" means the provider's key is missing
/// and every lookup against it is treated as "no match".
pub async fn health(State(state): State<Arc<AppState>>) -> (StatusCode, Json<Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "lead-quality-api",
            "version": env!("CARGO_PKG_VERSION"),
            "mock_mode": state.config.mock_mode,
            "providers": {
                "google_places": provider_status(state.scorer.places().is_configured()),
                "yelp": provider_status(state.scorer.yelp().is_configured()),
                "website_search": provider_status(
                    state.config.mock_mode || state.config.search_enabled()
                ),
            }
        })),
    )
}

/// Body of a single-lead request. Fields default to empty so a missing
/// required field is answered with 400 instead of a deserialization rejection.
#[derive(Debug, Default, Deserialize)]
pub struct ScoreLeadRequest {
    #[serde(default)]
    pub business_name: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub zip_code: String,
    #[serde(default)]
    pub email: String,
}

impl ScoreLeadRequest {
    fn into_lead(self) -> Result<Lead, AppError> {
        if self.business_name.trim().is_empty() || self.phone.trim().is_empty() {
            return Err(AppError::BadRequest(
                "Business Name and Phone are required.".to_string(),
            ));
        }
        Ok(Lead::new(
            self.business_name.trim(),
            self.phone.trim(),
            self.zip_code.trim(),
            self.email.trim(),
        ))
    }
}

/// POST /api/v1/leads/score
pub async fn score_lead(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ScoreLeadRequest>,
) -> Result<Json<EnrichmentResult>, AppError> {
    let lead = payload.into_lead()?;
    tracing::info!("POST /leads/score - business: {}", lead.business_name);

    let result = state.scorer.score(&lead).await;
    Ok(Json(result))
}

#[derive(Debug, Deserialize)]
pub struct BatchRequest {
    pub rows: Vec<Map<String, Value>>,
    /// Resume point: rows before it are skipped.
    #[serde(default)]
    pub start_index: usize,
}

#[derive(Debug, Serialize)]
pub struct BatchResponse {
    pub rows: Vec<ResultRow>,
    pub failed_rows: Vec<FailedRow>,
    pub total: usize,
    pub start_index: usize,
}

/// POST /api/v1/leads/batch
///
/// Processes `rows[start_index..]` shard by shard. Failed-row indices are
/// absolute positions in the submitted `rows`.
pub async fn process_batch(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<BatchRequest>,
) -> Result<Json<BatchResponse>, AppError> {
    let rows: Vec<InputRow> = payload.rows.iter().map(InputRow::from_json).collect();
    let total = rows.len();
    let start_index = payload.start_index.min(total);

    tracing::info!(
        "POST /leads/batch - {} rows, starting at {}",
        total,
        start_index
    );

    // Reject malformed input before any shard is scored
    for (row_index, row) in rows.iter().enumerate().skip(start_index) {
        let columns = row.missing_columns();
        if !columns.is_empty() {
            return Err(BatchError::MissingColumns { row_index, columns }.into());
        }
    }

    let mut results = Vec::with_capacity(total - start_index);
    let mut failed_rows = Vec::new();

    for shard in shard_ranges(total, state.config.batch_shard_size, start_index) {
        let offset = shard.start;
        tracing::info!("Processing shard {}..{} of {}", shard.start, shard.end, total);

        let mut on_progress = |done: usize, _shard_total: usize| {
            tracing::debug!("Batch progress: {}/{}", offset + done, total);
        };
        let mut on_failed_row = |index: usize, errors: &[String]| {
            failed_rows.push(FailedRow {
                row_index: offset + index,
                errors: errors.to_vec(),
            });
        };

        let shard_results = state
            .batch
            .process(&rows[shard], Some(&mut on_progress), Some(&mut on_failed_row))
            .await?;
        results.extend(shard_results);
    }
    failed_rows.sort_by_key(|row| row.row_index);

    tracing::info!(
        "Batch complete: {} rows scored, {} logged for reprocessing",
        results.len(),
        failed_rows.len()
    );

    Ok(Json(BatchResponse {
        rows: results,
        failed_rows,
        total,
        start_index,
    }))
}

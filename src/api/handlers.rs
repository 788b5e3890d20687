//! API request handlers.

use crate::error::ApiError;
use crate::job::RunOptions;
use crate::models::{
    CatalogStatsResponse, DerivativeSummary, DerivativesListResponse, HealthResponse,
    InstrumentDetailResponse, InstrumentSummary, InstrumentsListResponse, ListQuery,
    RunAcceptedResponse, RunRequest, RunSummaryResponse, TickerParseResponse,
};
use crate::state::AppState;
use crate::ticker;
use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use chrono::NaiveDate;
use std::sync::Arc;
use tracing::{error, info};

// ============================================================================
// Health Check
// ============================================================================

/// Health check endpoint.
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse)
    ),
    tag = "Health"
)]
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============================================================================
// Catalog Statistics
// ============================================================================

/// Get catalog statistics.
#[utoipa::path(
    get,
    path = "/api/v1/stats",
    responses(
        (status = 200, description = "Catalog statistics", body = CatalogStatsResponse)
    ),
    tag = "Statistics"
)]
pub async fn get_catalog_stats(
    State(state): State<Arc<AppState>>,
) -> Result<Json<CatalogStatsResponse>, ApiError> {
    let base_instrument_count = state.store.count_base_instruments().await?;
    let derivative_counts = state
        .store
        .count_derivatives()
        .await?
        .into_iter()
        .map(|(kind, n)| (kind.to_string(), n))
        .collect();
    let last_run = state.last_run.read().as_ref().map(RunSummaryResponse::from);

    Ok(Json(CatalogStatsResponse {
        base_instrument_count,
        derivative_counts,
        run_in_progress: state.is_running(),
        last_run,
    }))
}

// ============================================================================
// Instruments
// ============================================================================

/// List base instruments ordered by ticker.
#[utoipa::path(
    get,
    path = "/api/v1/instruments",
    params(ListQuery),
    responses(
        (status = 200, description = "Page of base instruments", body = InstrumentsListResponse)
    ),
    tag = "Instruments"
)]
pub async fn list_instruments(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<InstrumentsListResponse>, ApiError> {
    let (offset, limit) = query.resolve();
    let instruments = state.store.list_base_instruments(offset, limit).await?;
    let total = state.store.count_base_instruments().await?;

    Ok(Json(InstrumentsListResponse {
        instruments: instruments.iter().map(InstrumentSummary::from).collect(),
        total,
        offset,
        limit,
    }))
}

/// Get a base instrument.
#[utoipa::path(
    get,
    path = "/api/v1/instruments/{ticker}",
    params(
        ("ticker" = String, Path, description = "Base ticker, e.g. BTMN.39.HER.1")
    ),
    responses(
        (status = 200, description = "Base instrument", body = InstrumentDetailResponse),
        (status = 400, description = "Malformed ticker"),
        (status = 404, description = "Instrument not found")
    ),
    tag = "Instruments"
)]
pub async fn get_instrument(
    State(state): State<Arc<AppState>>,
    Path(ticker): Path<String>,
) -> Result<Json<InstrumentDetailResponse>, ApiError> {
    ticker::parse(&ticker)?;
    let base = state
        .store
        .get_base_instrument_by_ticker(&ticker)
        .await?
        .ok_or(ApiError::InstrumentNotFound(ticker))?;
    Ok(Json(InstrumentDetailResponse::from(&base)))
}

/// List derivatives referencing a base instrument.
#[utoipa::path(
    get,
    path = "/api/v1/instruments/{ticker}/derivatives",
    params(
        ("ticker" = String, Path, description = "Base ticker")
    ),
    responses(
        (status = 200, description = "Derivatives of the instrument", body = DerivativesListResponse),
        (status = 400, description = "Malformed ticker"),
        (status = 404, description = "Instrument not found")
    ),
    tag = "Instruments"
)]
pub async fn list_derivatives(
    State(state): State<Arc<AppState>>,
    Path(ticker): Path<String>,
) -> Result<Json<DerivativesListResponse>, ApiError> {
    ticker::parse(&ticker)?;
    if state.store.get_base_instrument_by_ticker(&ticker).await?.is_none() {
        return Err(ApiError::InstrumentNotFound(ticker));
    }
    let derivatives = state.store.list_derivatives_for_base(&ticker).await?;

    Ok(Json(DerivativesListResponse {
        derivatives: derivatives.iter().map(DerivativeSummary::from).collect(),
        base_ticker: ticker,
    }))
}

/// Decompose a base or derivative ticker.
#[utoipa::path(
    get,
    path = "/api/v1/tickers/{ticker}",
    params(
        ("ticker" = String, Path, description = "Any ticker")
    ),
    responses(
        (status = 200, description = "Ticker components", body = TickerParseResponse),
        (status = 400, description = "Malformed ticker")
    ),
    tag = "Tickers"
)]
pub async fn parse_ticker(Path(ticker): Path<String>) -> Result<Json<TickerParseResponse>, ApiError> {
    if let Ok(base) = ticker::parse(&ticker) {
        return Ok(Json(TickerParseResponse::from_base(&ticker, &base)));
    }
    let derivative = ticker::parse_derivative(&ticker)?;
    Ok(Json(TickerParseResponse::from_derivative(&ticker, &derivative)))
}

// ============================================================================
// Runs
// ============================================================================

/// Start a catalog run in the background.
#[utoipa::path(
    post,
    path = "/api/v1/runs",
    request_body = RunRequest,
    responses(
        (status = 202, description = "Run started", body = RunAcceptedResponse),
        (status = 400, description = "Invalid request"),
        (status = 409, description = "A run is already in progress")
    ),
    tag = "Runs"
)]
pub async fn start_run(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<(StatusCode, Json<RunAcceptedResponse>), ApiError> {
    let request: RunRequest = if body.is_empty() {
        RunRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::InvalidRequest(format!("invalid run request: {e}")))?
    };
    let Some(job) = state.job.clone() else {
        return Err(ApiError::InvalidRequest(
            "this server has no catalog job configured".to_string(),
        ));
    };
    let as_of = request
        .as_of
        .as_deref()
        .map(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d"))
        .transpose()
        .map_err(|e| ApiError::InvalidRequest(format!("asOf must be YYYY-MM-DD: {e}")))?;
    let options = RunOptions {
        provider_quotas: request.provider_quotas,
        as_of,
    };

    let guard = state.try_begin_run().ok_or(ApiError::RunInProgress)?;
    info!(quotas = ?options.provider_quotas, "Run requested over the API");

    tokio::spawn(async move {
        let summary = match job.run(&options, guard.token()).await {
            Ok(summary) => Some(summary),
            Err(e) => {
                error!(error = %e, "Catalog run failed");
                None
            }
        };
        guard.finish(summary);
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(RunAcceptedResponse {
            status: "started".to_string(),
        }),
    ))
}

/// Cancel the current run at the next entity boundary.
#[utoipa::path(
    post,
    path = "/api/v1/runs/cancel",
    responses(
        (status = 202, description = "Cancellation requested", body = RunAcceptedResponse),
        (status = 400, description = "No run in progress")
    ),
    tag = "Runs"
)]
pub async fn cancel_run(
    State(state): State<Arc<AppState>>,
) -> Result<(StatusCode, Json<RunAcceptedResponse>), ApiError> {
    if !state.cancel_run() {
        return Err(ApiError::InvalidRequest("no run in progress".to_string()));
    }
    Ok((
        StatusCode::ACCEPTED,
        Json(RunAcceptedResponse {
            status: "cancelling".to_string(),
        }),
    ))
}

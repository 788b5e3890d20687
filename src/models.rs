//! Request and response models for the REST API.

use crate::instrument::{BaseInstrument, BasketWeight, DerivativeInstrument};
use crate::job::RunSummary;
use crate::ticker::{BaseTicker, DerivativeTicker};
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use utoipa::{IntoParams, ToSchema};

/// Default page size for instrument listings.
pub const DEFAULT_PAGE_LIMIT: usize = 50;
/// Largest page size a client may request.
pub const MAX_PAGE_LIMIT: usize = 500;

/// Health check response.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// Service status.
    pub status: String,
    /// Service version.
    pub version: String,
}

/// Catalog statistics.
#[derive(Debug, Serialize, ToSchema)]
pub struct CatalogStatsResponse {
    /// Number of base instruments.
    pub base_instrument_count: u64,
    /// Derivative counts keyed by kind (`option`, `leap`, `bond`, `etf`).
    pub derivative_counts: BTreeMap<String, u64>,
    /// Whether a run is executing right now.
    pub run_in_progress: bool,
    /// Summary of the most recent finished run.
    pub last_run: Option<RunSummaryResponse>,
}

/// Pagination parameters.
#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct ListQuery {
    /// Records to skip.
    pub offset: Option<usize>,
    /// Records to return (default 50, max 500).
    pub limit: Option<usize>,
}

impl ListQuery {
    /// Effective `(offset, limit)`.
    #[must_use]
    pub fn resolve(&self) -> (usize, usize) {
        (
            self.offset.unwrap_or(0),
            self.limit.unwrap_or(DEFAULT_PAGE_LIMIT).clamp(1, MAX_PAGE_LIMIT),
        )
    }
}

/// Base instrument summary.
#[derive(Debug, Serialize, ToSchema)]
pub struct InstrumentSummary {
    /// Base ticker.
    pub ticker: String,
    /// Display name.
    pub name: String,
    /// Category code.
    pub category: String,
    /// Entity type.
    pub entity_type: String,
    /// Price in dollars.
    pub price: f64,
    /// Outstanding shares.
    pub share_count: u64,
    /// Market capitalization in dollars.
    pub market_cap: f64,
}

impl From<&BaseInstrument> for InstrumentSummary {
    fn from(base: &BaseInstrument) -> Self {
        Self {
            ticker: base.ticker.clone(),
            name: base.name.clone(),
            category: base.category.code().to_string(),
            entity_type: base.entity_type.to_string(),
            price: base.price.to_f64().unwrap_or_default(),
            share_count: base.share_count,
            market_cap: base.market_cap().to_f64().unwrap_or_default(),
        }
    }
}

/// Paginated list of base instruments.
#[derive(Debug, Serialize, ToSchema)]
pub struct InstrumentsListResponse {
    /// Instruments on this page, ordered by ticker.
    pub instruments: Vec<InstrumentSummary>,
    /// Total instruments in the catalog.
    pub total: u64,
    /// Offset of this page.
    pub offset: usize,
    /// Page size.
    pub limit: usize,
}

/// Full base instrument.
#[derive(Debug, Serialize, ToSchema)]
pub struct InstrumentDetailResponse {
    /// Instrument id.
    pub id: String,
    /// Stable upstream key.
    pub upstream_id: String,
    /// Base ticker.
    pub ticker: String,
    /// Display name.
    pub name: String,
    /// Series code.
    pub series_code: String,
    /// First-appearance year.
    pub year: u16,
    /// Whether the year was taken from the default era.
    pub year_estimated: bool,
    /// Category code.
    pub category: String,
    /// Per-series index.
    pub index: u64,
    /// Entity type.
    pub entity_type: String,
    /// Price in dollars.
    pub price: f64,
    /// Outstanding shares.
    pub share_count: u64,
    /// Market capitalization in dollars.
    pub market_cap: f64,
    /// Upstream metadata keyed by provider.
    #[schema(value_type = Object)]
    pub source_metadata: serde_json::Value,
}

impl From<&BaseInstrument> for InstrumentDetailResponse {
    fn from(base: &BaseInstrument) -> Self {
        Self {
            id: base.id.to_string(),
            upstream_id: base.upstream_id.clone(),
            ticker: base.ticker.clone(),
            name: base.name.clone(),
            series_code: base.series_code.clone(),
            year: base.year,
            year_estimated: base.year_estimated,
            category: base.category.code().to_string(),
            index: base.index,
            entity_type: base.entity_type.to_string(),
            price: base.price.to_f64().unwrap_or_default(),
            share_count: base.share_count,
            market_cap: base.market_cap().to_f64().unwrap_or_default(),
            source_metadata: serde_json::to_value(&base.source_metadata).unwrap_or_default(),
        }
    }
}

/// One ETF constituent.
#[derive(Debug, Serialize, ToSchema)]
pub struct BasketWeightResponse {
    /// Constituent base ticker.
    pub ticker: String,
    /// Weight in [0, 1].
    pub weight: f64,
}

impl From<&BasketWeight> for BasketWeightResponse {
    fn from(w: &BasketWeight) -> Self {
        Self {
            ticker: w.ticker.clone(),
            weight: w.weight,
        }
    }
}

/// Derivative instrument.
#[derive(Debug, Serialize, ToSchema)]
pub struct DerivativeSummary {
    /// Derivative ticker.
    pub ticker: String,
    /// Referenced base ticker.
    pub base_ticker: String,
    /// `option`, `leap`, `bond` or `etf`.
    pub kind: String,
    /// Strike in dollars.
    pub strike: Option<f64>,
    /// `C` or `P`.
    pub right: Option<String>,
    /// Expiry or maturity month code.
    pub expiry_month: Option<String>,
    /// Expiry or maturity year.
    pub expiry_year: Option<u16>,
    /// Coupon rate in percent.
    pub coupon_rate: Option<f64>,
    /// ETF constituents.
    pub basket: Option<Vec<BasketWeightResponse>>,
}

impl From<&DerivativeInstrument> for DerivativeSummary {
    fn from(d: &DerivativeInstrument) -> Self {
        Self {
            ticker: d.ticker.clone(),
            base_ticker: d.base_ticker.clone(),
            kind: d.kind.to_string(),
            strike: d.strike.and_then(|s| s.to_f64()),
            right: d.right.map(|r| r.code().to_string()),
            expiry_month: d.expiry_month.map(|m| m.code().to_string()),
            expiry_year: d.expiry_year,
            coupon_rate: d.coupon_rate.and_then(|c| c.to_f64()),
            basket: d
                .basket_weights
                .as_ref()
                .map(|ws| ws.iter().map(BasketWeightResponse::from).collect()),
        }
    }
}

/// Derivatives referencing one base instrument.
#[derive(Debug, Serialize, ToSchema)]
pub struct DerivativesListResponse {
    /// Base ticker.
    pub base_ticker: String,
    /// Derivatives ordered by ticker.
    pub derivatives: Vec<DerivativeSummary>,
}

/// Decomposed ticker.
#[derive(Debug, Default, Serialize, ToSchema)]
pub struct TickerParseResponse {
    /// Input ticker.
    pub ticker: String,
    /// `base`, `option`, `leap`, `bond` or `etf`.
    pub kind: String,
    /// Series code (base and non-ETF derivatives).
    pub series_code: Option<String>,
    /// Two-digit year code (base tickers).
    pub year_code: Option<String>,
    /// Category code (base tickers).
    pub category: Option<String>,
    /// Index (base tickers).
    pub index: Option<u64>,
    /// Month code (options, LEAPs, bonds).
    pub month: Option<String>,
    /// Four-digit year (options, LEAPs, bonds).
    pub year: Option<u16>,
    /// Strike in dollars (options, LEAPs).
    pub strike: Option<u64>,
    /// `C` or `P` (options, LEAPs).
    pub right: Option<String>,
    /// Coupon rate in percent (bonds).
    pub coupon_rate: Option<f64>,
    /// Group code (ETFs).
    pub group: Option<String>,
}

impl TickerParseResponse {
    /// Response for a base ticker.
    #[must_use]
    pub fn from_base(ticker: &str, parsed: &BaseTicker) -> Self {
        Self {
            ticker: ticker.to_string(),
            kind: "base".to_string(),
            series_code: Some(parsed.series_code.clone()),
            year_code: Some(parsed.year.to_string()),
            category: Some(parsed.category.code().to_string()),
            index: Some(parsed.index),
            ..Self::default()
        }
    }

    /// Response for a derivative ticker.
    #[must_use]
    pub fn from_derivative(ticker: &str, parsed: &DerivativeTicker) -> Self {
        let mut out = Self {
            ticker: ticker.to_string(),
            ..Self::default()
        };
        match parsed {
            DerivativeTicker::Option {
                series_code,
                month,
                year,
                strike,
                right,
                leap,
            } => {
                out.kind = if *leap { "leap" } else { "option" }.to_string();
                out.series_code = Some(series_code.clone());
                out.month = Some(month.code().to_string());
                out.year = Some(*year);
                out.strike = Some(*strike);
                out.right = Some(right.code().to_string());
            }
            DerivativeTicker::Bond {
                series_code,
                month,
                year,
                coupon_rate,
            } => {
                out.kind = "bond".to_string();
                out.series_code = Some(series_code.clone());
                out.month = Some(month.code().to_string());
                out.year = Some(*year);
                out.coupon_rate = coupon_rate.to_f64();
            }
            DerivativeTicker::Etf { group } => {
                out.kind = "etf".to_string();
                out.group = Some(group.clone());
            }
        }
        out
    }
}

/// Request to start a catalog run.
#[derive(Debug, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RunRequest {
    /// Records to fetch per provider; empty uses the configured quotas.
    #[serde(default)]
    pub provider_quotas: BTreeMap<String, usize>,
    /// Synthesis date `YYYY-MM-DD`.
    #[serde(default)]
    pub as_of: Option<String>,
}

/// Acknowledgement of a started or cancelled run.
#[derive(Debug, Serialize, ToSchema)]
pub struct RunAcceptedResponse {
    /// `started` or `cancelling`.
    pub status: String,
}

/// Outcome of a catalog run.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RunSummaryResponse {
    /// Run identifier.
    pub run_id: String,
    /// Start time (RFC 3339).
    pub started_at: String,
    /// End time (RFC 3339).
    pub finished_at: String,
    /// Synthesis date.
    pub as_of: String,
    /// Raw records fetched.
    pub fetched: usize,
    /// Records folded into another record.
    pub duplicates: usize,
    /// New tickers minted.
    pub minted: usize,
    /// Existing instruments refreshed.
    pub refreshed: usize,
    /// Entities skipped as unusable.
    pub skipped_invalid: usize,
    /// Provider pages skipped after retries.
    pub skipped_provider: usize,
    /// Stored tickers failing the grammar.
    pub integrity_warnings: usize,
    /// Entities that failed otherwise.
    pub failed: usize,
    /// Derivatives published per kind.
    pub derivatives: BTreeMap<String, usize>,
    /// Derivatives that could not be published.
    pub derivative_failures: usize,
    /// Whether the run stopped early.
    pub cancelled: bool,
}

impl From<&RunSummary> for RunSummaryResponse {
    fn from(s: &RunSummary) -> Self {
        Self {
            run_id: s.run_id.to_string(),
            started_at: s.started_at.to_rfc3339(),
            finished_at: s.finished_at.to_rfc3339(),
            as_of: s.as_of.to_string(),
            fetched: s.fetched,
            duplicates: s.duplicates,
            minted: s.minted,
            refreshed: s.refreshed,
            skipped_invalid: s.skipped_invalid,
            skipped_provider: s.skipped_provider,
            integrity_warnings: s.integrity_warnings,
            failed: s.failed,
            derivatives: s
                .derivatives
                .iter()
                .map(|(k, v)| (k.to_string(), *v))
                .collect(),
            derivative_failures: s.derivative_failures,
            cancelled: s.cancelled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ticker;

    #[test]
    fn test_list_query_limits() {
        assert_eq!(ListQuery::default().resolve(), (0, DEFAULT_PAGE_LIMIT));
        let q = ListQuery {
            offset: Some(10),
            limit: Some(10_000),
        };
        assert_eq!(q.resolve(), (10, MAX_PAGE_LIMIT));
    }

    #[test]
    fn test_run_request_camel_case() {
        let req: RunRequest =
            serde_json::from_str(r#"{"providerQuotas": {"comicvine": 25}, "asOf": "2025-01-01"}"#).unwrap();
        assert_eq!(req.provider_quotas.get("comicvine"), Some(&25));
        assert_eq!(req.as_of.as_deref(), Some("2025-01-01"));
    }

    #[test]
    fn test_ticker_parse_response() {
        let parsed = ticker::parse_derivative("BTMN.JAN.2026.150.C.LEAP").unwrap();
        let resp = TickerParseResponse::from_derivative("BTMN.JAN.2026.150.C.LEAP", &parsed);
        assert_eq!(resp.kind, "leap");
        assert_eq!(resp.strike, Some(150));
        assert_eq!(resp.right.as_deref(), Some("C"));

        let base = ticker::parse("BTM2.39.HER.1").unwrap();
        let resp = TickerParseResponse::from_base("BTM2.39.HER.1", &base);
        assert_eq!(resp.series_code.as_deref(), Some("BTM2"));
        assert_eq!(resp.year_code.as_deref(), Some("39"));
    }
}

//! Database row types and their conversion into catalog types.

use crate::error::CatalogError;
use crate::instrument::{
    BaseInstrument, BasketWeight, Category, DerivativeInstrument, DerivativeKind, EntityType,
    MonthCode, OptionRight, SourceMetadata,
};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use sqlx::FromRow;
use sqlx::types::Json;
use uuid::Uuid;

/// Base instrument record from the database.
#[derive(Debug, Clone, FromRow)]
pub struct BaseInstrumentRow {
    /// Unique identifier.
    pub id: Uuid,
    /// Stable upstream key.
    pub upstream_id: String,
    /// Base ticker.
    pub ticker: String,
    /// Series code.
    pub series_code: String,
    /// Four-digit year.
    pub year: i16,
    /// Whether the year was estimated.
    pub year_estimated: bool,
    /// Category code (`HER`, ...).
    pub category: String,
    /// Ticker index.
    pub ticker_index: i64,
    /// Display name.
    pub name: String,
    /// Entity type.
    pub entity_type: String,
    /// Price in cents (to avoid floating point issues).
    pub price_cents: i64,
    /// Outstanding shares.
    pub share_count: i64,
    /// Upstream metadata per provider.
    pub source_metadata: Json<SourceMetadata>,
}

/// Derivative instrument record from the database.
#[derive(Debug, Clone, FromRow)]
pub struct DerivativeInstrumentRow {
    /// Unique identifier.
    pub id: Uuid,
    /// Derivative ticker.
    pub ticker: String,
    /// Referenced base ticker.
    pub base_ticker: String,
    /// Kind (`option`, `leap`, `bond`, `etf`).
    pub kind: String,
    /// Strike in cents.
    pub strike_cents: Option<i64>,
    /// `C` or `P`.
    pub option_right: Option<String>,
    /// Month code.
    pub expiry_month: Option<String>,
    /// Expiry or maturity year.
    pub expiry_year: Option<i16>,
    /// Coupon rate in basis points.
    pub coupon_bps: Option<i64>,
    /// ETF constituents.
    pub basket_weights: Option<Json<Vec<BasketWeight>>>,
}

fn corrupt(field: &str, value: impl std::fmt::Display) -> CatalogError {
    CatalogError::Store(format!("corrupt {field} in catalog row: {value}"))
}

/// Decimal to integer hundredths.
pub(crate) fn to_hundredths(value: Decimal) -> Result<i64, CatalogError> {
    (value * Decimal::ONE_HUNDRED)
        .round()
        .to_i64()
        .ok_or_else(|| corrupt("amount", value))
}

impl TryFrom<BaseInstrumentRow> for BaseInstrument {
    type Error = CatalogError;

    fn try_from(row: BaseInstrumentRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            upstream_id: row.upstream_id,
            ticker: row.ticker,
            series_code: row.series_code,
            year: u16::try_from(row.year).map_err(|_| corrupt("year", row.year))?,
            year_estimated: row.year_estimated,
            category: Category::from_code(&row.category)
                .ok_or_else(|| corrupt("category", &row.category))?,
            index: u64::try_from(row.ticker_index).map_err(|_| corrupt("index", row.ticker_index))?,
            name: row.name,
            entity_type: row.entity_type.parse::<EntityType>().map_err(|e| corrupt("entity_type", e))?,
            price: Decimal::new(row.price_cents, 2),
            share_count: u64::try_from(row.share_count)
                .map_err(|_| corrupt("share_count", row.share_count))?,
            source_metadata: row.source_metadata.0,
        })
    }
}

impl TryFrom<DerivativeInstrumentRow> for DerivativeInstrument {
    type Error = CatalogError;

    fn try_from(row: DerivativeInstrumentRow) -> Result<Self, Self::Error> {
        let right = match row.option_right.as_deref() {
            None => None,
            Some("C") => Some(OptionRight::Call),
            Some("P") => Some(OptionRight::Put),
            Some(other) => return Err(corrupt("option_right", other)),
        };
        let expiry_month = row
            .expiry_month
            .as_deref()
            .map(str::parse::<MonthCode>)
            .transpose()
            .map_err(|e| corrupt("expiry_month", e))?;
        let expiry_year = row
            .expiry_year
            .map(u16::try_from)
            .transpose()
            .map_err(|e| corrupt("expiry_year", e))?;

        Ok(Self {
            id: row.id,
            ticker: row.ticker,
            base_ticker: row.base_ticker,
            kind: row.kind.parse::<DerivativeKind>().map_err(|e| corrupt("kind", e))?,
            strike: row.strike_cents.map(|c| Decimal::new(c, 2).normalize()),
            right,
            expiry_month,
            expiry_year,
            coupon_rate: row.coupon_bps.map(|bps| Decimal::new(bps, 2).round_dp(1)),
            basket_weights: row.basket_weights.map(|w| w.0),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_base_row_conversion() {
        let row = BaseInstrumentRow {
            id: Uuid::nil(),
            upstream_id: "comicvine:1699".to_string(),
            ticker: "BTMN.39.HER.1".to_string(),
            series_code: "BTMN".to_string(),
            year: 1939,
            year_estimated: false,
            category: "HER".to_string(),
            ticker_index: 1,
            name: "Batman".to_string(),
            entity_type: "character".to_string(),
            price_cents: 225_050,
            share_count: 40_000,
            source_metadata: Json(SourceMetadata::new()),
        };
        let base = BaseInstrument::try_from(row).unwrap();
        assert_eq!(base.price, dec!(2250.50));
        assert_eq!(base.category, Category::Hero);
        assert_eq!(base.entity_type, EntityType::Character);
    }

    #[test]
    fn test_corrupt_category_rejected() {
        let row = BaseInstrumentRow {
            id: Uuid::nil(),
            upstream_id: "x:1".to_string(),
            ticker: "X.00.ZZZ.1".to_string(),
            series_code: "X".to_string(),
            year: 2000,
            year_estimated: false,
            category: "ZZZ".to_string(),
            ticker_index: 1,
            name: "X".to_string(),
            entity_type: "other".to_string(),
            price_cents: 5000,
            share_count: 1,
            source_metadata: Json(SourceMetadata::new()),
        };
        assert!(matches!(BaseInstrument::try_from(row), Err(CatalogError::Store(_))));
    }

    #[test]
    fn test_derivative_row_conversion() {
        let row = DerivativeInstrumentRow {
            id: Uuid::nil(),
            ticker: "BTMN.DEC.2025.5.0".to_string(),
            base_ticker: "BTMN.39.HER.1".to_string(),
            kind: "bond".to_string(),
            strike_cents: None,
            option_right: None,
            expiry_month: Some("DEC".to_string()),
            expiry_year: Some(2025),
            coupon_bps: Some(500),
            basket_weights: None,
        };
        let d = DerivativeInstrument::try_from(row).unwrap();
        assert_eq!(d.kind, DerivativeKind::Bond);
        assert_eq!(d.coupon_rate, Some(dec!(5.0)));
        assert_eq!(d.expiry_month, Some(MonthCode::Dec));
        assert_eq!(to_hundredths(dec!(5.0)).unwrap(), 500);
    }
}

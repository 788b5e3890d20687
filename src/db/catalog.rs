//! PostgreSQL catalog store.

use super::pool::DatabasePool;
use super::schema::{BaseInstrumentRow, DerivativeInstrumentRow, to_hundredths};
use crate::allocator::SeriesKey;
use crate::error::CatalogError;
use crate::instrument::{BaseInstrument, DerivativeInstrument, DerivativeKind};
use crate::series_code::SeriesCodeRegistry;
use crate::store::CatalogStore;
use async_trait::async_trait;
use sqlx::PgPool;
use sqlx::types::Json;
use std::collections::BTreeMap;
use tracing::debug;

const SERIALIZATION_FAILURE: &str = "40001";
const DEADLOCK_DETECTED: &str = "40P01";
const FOREIGN_KEY_VIOLATION: &str = "23503";
const UNIQUE_VIOLATION: &str = "23505";

const BASE_COLUMNS: &str = "id, upstream_id, ticker, series_code, year, year_estimated, category, \
     ticker_index, name, entity_type, price_cents, share_count, source_metadata";

const DERIVATIVE_COLUMNS: &str = "id, ticker, base_ticker, kind, strike_cents, option_right, \
     expiry_month, expiry_year, coupon_bps, basket_weights";

fn sql_state(err: &sqlx::Error) -> Option<String> {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().map(|c| c.into_owned()),
        _ => None,
    }
}

fn to_i64(value: u64, field: &str) -> Result<i64, CatalogError> {
    i64::try_from(value).map_err(|_| CatalogError::Store(format!("{field} out of range: {value}")))
}

/// Catalog store backed by PostgreSQL.
///
/// Index allocation is a single `INSERT … ON CONFLICT DO UPDATE … RETURNING`
/// statement, so concurrent runs in different processes serialize on the
/// counter row.
#[derive(Clone)]
pub struct PgCatalogStore {
    pool: PgPool,
}

impl PgCatalogStore {
    /// Creates a store over an established pool.
    #[must_use]
    pub fn new(db: &DatabasePool) -> Self {
        Self {
            pool: db.pool().clone(),
        }
    }
}

#[async_trait]
impl CatalogStore for PgCatalogStore {
    async fn upsert_base_instrument(&self, instrument: &BaseInstrument) -> Result<(), CatalogError> {
        let result = sqlx::query(
            r#"
            INSERT INTO base_instruments (
                id, upstream_id, ticker, series_code, year, year_estimated, category,
                ticker_index, name, entity_type, price_cents, share_count, source_metadata
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (upstream_id) DO UPDATE SET
                ticker = EXCLUDED.ticker,
                series_code = EXCLUDED.series_code,
                year = EXCLUDED.year,
                year_estimated = EXCLUDED.year_estimated,
                category = EXCLUDED.category,
                ticker_index = EXCLUDED.ticker_index,
                name = EXCLUDED.name,
                entity_type = EXCLUDED.entity_type,
                price_cents = EXCLUDED.price_cents,
                share_count = EXCLUDED.share_count,
                source_metadata = EXCLUDED.source_metadata,
                updated_at = NOW()
            "#,
        )
        .bind(instrument.id)
        .bind(&instrument.upstream_id)
        .bind(&instrument.ticker)
        .bind(&instrument.series_code)
        .bind(i16::try_from(instrument.year).map_err(|_| CatalogError::Store(format!("year out of range: {}", instrument.year)))?)
        .bind(instrument.year_estimated)
        .bind(instrument.category.code())
        .bind(to_i64(instrument.index, "index")?)
        .bind(&instrument.name)
        .bind(instrument.entity_type.to_string())
        .bind(to_hundredths(instrument.price)?)
        .bind(to_i64(instrument.share_count, "share_count")?)
        .bind(Json(&instrument.source_metadata))
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if sql_state(&e).as_deref() == Some(UNIQUE_VIOLATION) => Err(CatalogError::Store(
                format!("ticker {} already belongs to another entity", instrument.ticker),
            )),
            Err(e) => Err(e.into()),
        }
    }

    async fn insert_base_instrument_if_absent(
        &self,
        instrument: &BaseInstrument,
    ) -> Result<Option<BaseInstrument>, CatalogError> {
        let inserted: Result<Option<uuid::Uuid>, sqlx::Error> = sqlx::query_scalar(
            r#"
            INSERT INTO base_instruments (
                id, upstream_id, ticker, series_code, year, year_estimated, category,
                ticker_index, name, entity_type, price_cents, share_count, source_metadata
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (upstream_id) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(instrument.id)
        .bind(&instrument.upstream_id)
        .bind(&instrument.ticker)
        .bind(&instrument.series_code)
        .bind(i16::try_from(instrument.year).map_err(|_| CatalogError::Store(format!("year out of range: {}", instrument.year)))?)
        .bind(instrument.year_estimated)
        .bind(instrument.category.code())
        .bind(to_i64(instrument.index, "index")?)
        .bind(&instrument.name)
        .bind(instrument.entity_type.to_string())
        .bind(to_hundredths(instrument.price)?)
        .bind(to_i64(instrument.share_count, "share_count")?)
        .bind(Json(&instrument.source_metadata))
        .fetch_optional(&self.pool)
        .await;

        match inserted {
            Ok(Some(_)) => Ok(None),
            // Another writer owns the upstream key; hand back its row.
            Ok(None) => self
                .get_base_instrument_by_upstream_id(&instrument.upstream_id)
                .await?
                .map(Some)
                .ok_or_else(|| {
                    CatalogError::Store(format!(
                        "{} vanished after a conflicting insert",
                        instrument.upstream_id
                    ))
                }),
            Err(e) if sql_state(&e).as_deref() == Some(UNIQUE_VIOLATION) => Err(CatalogError::Store(
                format!("ticker {} already belongs to another entity", instrument.ticker),
            )),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_base_instrument_by_upstream_id(
        &self,
        upstream_id: &str,
    ) -> Result<Option<BaseInstrument>, CatalogError> {
        let row: Option<BaseInstrumentRow> = sqlx::query_as(&format!(
            "SELECT {BASE_COLUMNS} FROM base_instruments WHERE upstream_id = $1"
        ))
        .bind(upstream_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(BaseInstrument::try_from).transpose()
    }

    async fn get_base_instrument_by_ticker(
        &self,
        ticker: &str,
    ) -> Result<Option<BaseInstrument>, CatalogError> {
        let row: Option<BaseInstrumentRow> = sqlx::query_as(&format!(
            "SELECT {BASE_COLUMNS} FROM base_instruments WHERE ticker = $1"
        ))
        .bind(ticker)
        .fetch_optional(&self.pool)
        .await?;
        row.map(BaseInstrument::try_from).transpose()
    }

    async fn list_base_instruments(
        &self,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<BaseInstrument>, CatalogError> {
        let rows: Vec<BaseInstrumentRow> = sqlx::query_as(&format!(
            "SELECT {BASE_COLUMNS} FROM base_instruments ORDER BY ticker OFFSET $1 LIMIT $2"
        ))
        .bind(i64::try_from(offset).unwrap_or(i64::MAX))
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(BaseInstrument::try_from).collect()
    }

    async fn count_base_instruments(&self) -> Result<u64, CatalogError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM base_instruments")
            .fetch_one(&self.pool)
            .await?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    async fn upsert_derivative_instrument(
        &self,
        instrument: &DerivativeInstrument,
    ) -> Result<(), CatalogError> {
        let strike_cents = instrument.strike.map(to_hundredths).transpose()?;
        let coupon_bps = instrument.coupon_rate.map(to_hundredths).transpose()?;
        let expiry_year = instrument
            .expiry_year
            .map(i16::try_from)
            .transpose()
            .map_err(|e| CatalogError::Store(e.to_string()))?;

        let result = sqlx::query(
            r#"
            INSERT INTO derivative_instruments (
                id, ticker, base_ticker, kind, strike_cents, option_right,
                expiry_month, expiry_year, coupon_bps, basket_weights
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (ticker) DO UPDATE SET
                base_ticker = EXCLUDED.base_ticker,
                kind = EXCLUDED.kind,
                strike_cents = EXCLUDED.strike_cents,
                option_right = EXCLUDED.option_right,
                expiry_month = EXCLUDED.expiry_month,
                expiry_year = EXCLUDED.expiry_year,
                coupon_bps = EXCLUDED.coupon_bps,
                basket_weights = EXCLUDED.basket_weights,
                updated_at = NOW()
            "#,
        )
        .bind(instrument.id)
        .bind(&instrument.ticker)
        .bind(&instrument.base_ticker)
        .bind(instrument.kind.to_string())
        .bind(strike_cents)
        .bind(instrument.right.map(|r| r.code()))
        .bind(instrument.expiry_month.map(|m| m.code()))
        .bind(expiry_year)
        .bind(coupon_bps)
        .bind(instrument.basket_weights.as_ref().map(Json))
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if sql_state(&e).as_deref() == Some(FOREIGN_KEY_VIOLATION) => {
                Err(CatalogError::DerivativeReference(instrument.base_ticker.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_derivatives_for_base(&self, base_ticker: &str) -> Result<u64, CatalogError> {
        let result = sqlx::query("DELETE FROM derivative_instruments WHERE base_ticker = $1")
            .bind(base_ticker)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn list_derivatives_for_base(
        &self,
        base_ticker: &str,
    ) -> Result<Vec<DerivativeInstrument>, CatalogError> {
        let rows: Vec<DerivativeInstrumentRow> = sqlx::query_as(&format!(
            "SELECT {DERIVATIVE_COLUMNS} FROM derivative_instruments WHERE base_ticker = $1 ORDER BY ticker"
        ))
        .bind(base_ticker)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(DerivativeInstrument::try_from).collect()
    }

    async fn count_derivatives(&self) -> Result<BTreeMap<DerivativeKind, u64>, CatalogError> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT kind, COUNT(*) FROM derivative_instruments GROUP BY kind")
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter()
            .map(|(kind, count)| {
                let kind = kind.parse::<DerivativeKind>().map_err(CatalogError::Store)?;
                Ok((kind, u64::try_from(count).unwrap_or(0)))
            })
            .collect()
    }

    async fn allocate_next_index(&self, key: &SeriesKey) -> Result<u64, CatalogError> {
        let result: Result<i64, sqlx::Error> = sqlx::query_scalar(
            r#"
            INSERT INTO series_counters (series_code, year_code, category, last_index)
            VALUES ($1, $2, $3, 1)
            ON CONFLICT (series_code, year_code, category) DO UPDATE SET
                last_index = series_counters.last_index + 1
            RETURNING last_index
            "#,
        )
        .bind(&key.series_code)
        .bind(i16::from(key.year.value()))
        .bind(key.category.code())
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(index) => {
                debug!(key = %key, index, "Counter advanced");
                u64::try_from(index).map_err(|_| CatalogError::Store(format!("negative counter for {key}")))
            }
            Err(e)
                if matches!(
                    sql_state(&e).as_deref(),
                    Some(SERIALIZATION_FAILURE | DEADLOCK_DETECTED)
                ) =>
            {
                Err(CatalogError::AllocationConflict(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl SeriesCodeRegistry for PgCatalogStore {
    async fn lookup_series_code(&self, entity_key: &str) -> Result<Option<String>, CatalogError> {
        let code: Option<String> =
            sqlx::query_scalar("SELECT code FROM series_codes WHERE entity_key = $1")
                .bind(entity_key)
                .fetch_optional(&self.pool)
                .await?;
        Ok(code)
    }

    async fn claim_series_code(
        &self,
        entity_key: &str,
        code: &str,
    ) -> Result<Option<String>, CatalogError> {
        // Either unique constraint (code or entity) makes the insert a no-op.
        sqlx::query("INSERT INTO series_codes (code, entity_key) VALUES ($1, $2) ON CONFLICT DO NOTHING")
            .bind(code)
            .bind(entity_key)
            .execute(&self.pool)
            .await?;
        self.lookup_series_code(entity_key).await
    }
}

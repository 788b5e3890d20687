//! In-memory catalog store.

use super::CatalogStore;
use crate::allocator::{CounterTable, SeriesKey};
use crate::error::CatalogError;
use crate::instrument::{BaseInstrument, DerivativeInstrument, DerivativeKind};
use crate::series_code::{CodeRegistry, SeriesCodeRegistry};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Default)]
struct BaseTables {
    by_key: HashMap<String, BaseInstrument>,
    by_ticker: BTreeMap<String, String>,
}

/// Catalog store kept entirely in process memory.
///
/// Also serves as the series-code registry, so one instance carries every
/// piece of state a catalog run needs.
#[derive(Debug, Default)]
pub struct MemoryCatalogStore {
    bases: RwLock<BaseTables>,
    derivatives: DashMap<String, DerivativeInstrument>,
    counters: CounterTable,
    codes: CodeRegistry,
}

impl MemoryCatalogStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every derivative, ordered by ticker.
    #[must_use]
    pub fn all_derivatives(&self) -> Vec<DerivativeInstrument> {
        let mut all: Vec<DerivativeInstrument> =
            self.derivatives.iter().map(|e| e.value().clone()).collect();
        all.sort_by(|a, b| a.ticker.cmp(&b.ticker));
        all
    }
}

#[async_trait]
impl CatalogStore for MemoryCatalogStore {
    async fn upsert_base_instrument(&self, instrument: &BaseInstrument) -> Result<(), CatalogError> {
        let mut tables = self.bases.write();
        if let Some(owner) = tables.by_ticker.get(&instrument.ticker)
            && owner != &instrument.upstream_id
        {
            return Err(CatalogError::Store(format!(
                "ticker {} already belongs to {owner}",
                instrument.ticker
            )));
        }
        if let Some(previous) = tables.by_key.get(&instrument.upstream_id)
            && previous.ticker != instrument.ticker
        {
            let stale = previous.ticker.clone();
            tables.by_ticker.remove(&stale);
        }
        tables
            .by_ticker
            .insert(instrument.ticker.clone(), instrument.upstream_id.clone());
        tables
            .by_key
            .insert(instrument.upstream_id.clone(), instrument.clone());
        Ok(())
    }

    async fn insert_base_instrument_if_absent(
        &self,
        instrument: &BaseInstrument,
    ) -> Result<Option<BaseInstrument>, CatalogError> {
        let mut tables = self.bases.write();
        if let Some(existing) = tables.by_key.get(&instrument.upstream_id) {
            return Ok(Some(existing.clone()));
        }
        if let Some(owner) = tables.by_ticker.get(&instrument.ticker) {
            return Err(CatalogError::Store(format!(
                "ticker {} already belongs to {owner}",
                instrument.ticker
            )));
        }
        tables
            .by_ticker
            .insert(instrument.ticker.clone(), instrument.upstream_id.clone());
        tables
            .by_key
            .insert(instrument.upstream_id.clone(), instrument.clone());
        Ok(None)
    }

    async fn get_base_instrument_by_upstream_id(
        &self,
        upstream_id: &str,
    ) -> Result<Option<BaseInstrument>, CatalogError> {
        Ok(self.bases.read().by_key.get(upstream_id).cloned())
    }

    async fn get_base_instrument_by_ticker(
        &self,
        ticker: &str,
    ) -> Result<Option<BaseInstrument>, CatalogError> {
        let tables = self.bases.read();
        Ok(tables
            .by_ticker
            .get(ticker)
            .and_then(|key| tables.by_key.get(key))
            .cloned())
    }

    async fn list_base_instruments(
        &self,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<BaseInstrument>, CatalogError> {
        let tables = self.bases.read();
        Ok(tables
            .by_ticker
            .values()
            .skip(offset)
            .take(limit)
            .filter_map(|key| tables.by_key.get(key).cloned())
            .collect())
    }

    async fn count_base_instruments(&self) -> Result<u64, CatalogError> {
        Ok(self.bases.read().by_key.len() as u64)
    }

    async fn upsert_derivative_instrument(
        &self,
        instrument: &DerivativeInstrument,
    ) -> Result<(), CatalogError> {
        if !self
            .bases
            .read()
            .by_ticker
            .contains_key(&instrument.base_ticker)
        {
            return Err(CatalogError::DerivativeReference(instrument.base_ticker.clone()));
        }
        self.derivatives
            .insert(instrument.ticker.clone(), instrument.clone());
        Ok(())
    }

    async fn delete_derivatives_for_base(&self, base_ticker: &str) -> Result<u64, CatalogError> {
        let before = self.derivatives.len();
        self.derivatives.retain(|_, d| d.base_ticker != base_ticker);
        Ok((before - self.derivatives.len()) as u64)
    }

    async fn list_derivatives_for_base(
        &self,
        base_ticker: &str,
    ) -> Result<Vec<DerivativeInstrument>, CatalogError> {
        let mut list: Vec<DerivativeInstrument> = self
            .derivatives
            .iter()
            .filter(|e| e.value().base_ticker == base_ticker)
            .map(|e| e.value().clone())
            .collect();
        list.sort_by(|a, b| a.ticker.cmp(&b.ticker));
        Ok(list)
    }

    async fn count_derivatives(&self) -> Result<BTreeMap<DerivativeKind, u64>, CatalogError> {
        let mut counts = BTreeMap::new();
        for entry in &self.derivatives {
            *counts.entry(entry.value().kind).or_insert(0) += 1;
        }
        Ok(counts)
    }

    async fn allocate_next_index(&self, key: &SeriesKey) -> Result<u64, CatalogError> {
        Ok(self.counters.next(key))
    }
}

#[async_trait]
impl SeriesCodeRegistry for MemoryCatalogStore {
    async fn lookup_series_code(&self, entity_key: &str) -> Result<Option<String>, CatalogError> {
        self.codes.lookup_series_code(entity_key).await
    }

    async fn claim_series_code(
        &self,
        entity_key: &str,
        code: &str,
    ) -> Result<Option<String>, CatalogError> {
        self.codes.claim_series_code(entity_key, code).await
    }
}

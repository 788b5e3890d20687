//! Catalog store collaborator interface and its in-memory implementation.

mod memory;

pub use memory::MemoryCatalogStore;

use crate::allocator::SeriesKey;
use crate::error::CatalogError;
use crate::instrument::{BaseInstrument, DerivativeInstrument, DerivativeKind};
use async_trait::async_trait;
use std::collections::BTreeMap;

/// Persistent catalog of base and derivative instruments.
///
/// Base instruments are keyed by their stable upstream key; tickers are
/// unique across the catalog. Derivatives reference an existing base ticker.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Inserts or replaces the instrument stored under `instrument.upstream_id`.
    ///
    /// # Errors
    /// [`CatalogError::Store`] if the ticker belongs to another upstream key.
    async fn upsert_base_instrument(&self, instrument: &BaseInstrument) -> Result<(), CatalogError>;

    /// Inserts `instrument` only if nothing is stored under its upstream key.
    ///
    /// Returns `None` when the insert took effect, otherwise the instrument
    /// that was already stored. An existing ticker is never overwritten.
    ///
    /// # Errors
    /// [`CatalogError::Store`] if the ticker belongs to another upstream key.
    async fn insert_base_instrument_if_absent(
        &self,
        instrument: &BaseInstrument,
    ) -> Result<Option<BaseInstrument>, CatalogError>;

    /// Looks up a base instrument by its upstream key.
    async fn get_base_instrument_by_upstream_id(
        &self,
        upstream_id: &str,
    ) -> Result<Option<BaseInstrument>, CatalogError>;

    /// Looks up a base instrument by ticker.
    async fn get_base_instrument_by_ticker(
        &self,
        ticker: &str,
    ) -> Result<Option<BaseInstrument>, CatalogError>;

    /// Base instruments ordered by ticker.
    async fn list_base_instruments(
        &self,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<BaseInstrument>, CatalogError>;

    /// Number of base instruments.
    async fn count_base_instruments(&self) -> Result<u64, CatalogError>;

    /// Inserts or replaces a derivative by ticker.
    ///
    /// # Errors
    /// [`CatalogError::DerivativeReference`] if the base ticker does not exist.
    async fn upsert_derivative_instrument(
        &self,
        instrument: &DerivativeInstrument,
    ) -> Result<(), CatalogError>;

    /// Removes every derivative referencing `base_ticker`; returns how many.
    async fn delete_derivatives_for_base(&self, base_ticker: &str) -> Result<u64, CatalogError>;

    /// Derivatives referencing `base_ticker`, ordered by ticker.
    async fn list_derivatives_for_base(
        &self,
        base_ticker: &str,
    ) -> Result<Vec<DerivativeInstrument>, CatalogError>;

    /// Derivative counts per kind.
    async fn count_derivatives(&self) -> Result<BTreeMap<DerivativeKind, u64>, CatalogError>;

    /// Atomically increments and returns the counter for `key`, starting at 1.
    ///
    /// # Errors
    /// May return [`CatalogError::AllocationConflict`] when a concurrent
    /// update was detected; callers retry.
    async fn allocate_next_index(&self, key: &SeriesKey) -> Result<u64, CatalogError>;
}

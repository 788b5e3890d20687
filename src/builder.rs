//! Asset catalog builder: mints or refreshes one base instrument per entity.

use crate::allocator::TicketIndexAllocator;
use crate::classifier::CategoryClassifier;
use crate::error::CatalogError;
use crate::instrument::{BaseInstrument, ResolvedEntity, stable_id};
use crate::job::CancelToken;
use crate::pricing::PricingEngine;
use crate::series_code::SeriesCodeCompressor;
use crate::store::CatalogStore;
use crate::ticker;
use crate::year::YearExtractor;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// What happened to one entity.
#[derive(Debug, Clone, PartialEq)]
pub enum EntityOutcome {
    /// A new ticker was minted.
    Minted(BaseInstrument),
    /// An existing instrument had its mutable fields refreshed.
    Refreshed {
        /// The instrument after refresh.
        instrument: BaseInstrument,
        /// The stored ticker failed to parse.
        integrity_warning: bool,
    },
}

impl EntityOutcome {
    /// The resulting instrument.
    #[must_use]
    pub fn instrument(&self) -> &BaseInstrument {
        match self {
            Self::Minted(i) | Self::Refreshed { instrument: i, .. } => i,
        }
    }
}

/// Counters for one build pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildReport {
    /// Entities that received a new ticker.
    pub minted: usize,
    /// Entities that already had one.
    pub refreshed: usize,
    /// Entities skipped as unusable (no name).
    pub skipped_invalid: usize,
    /// Stored tickers that failed to parse.
    pub integrity_warnings: usize,
    /// Entities that failed for any other reason.
    pub failed: usize,
    /// Set when the pass stopped early.
    pub cancelled: bool,
}

/// Components the builder drives.
pub struct BuilderComponents {
    /// Series code derivation.
    pub compressor: SeriesCodeCompressor,
    /// Year extraction.
    pub years: YearExtractor,
    /// Classification.
    pub classifier: CategoryClassifier,
    /// Index allocation.
    pub allocator: TicketIndexAllocator,
    /// Pricing.
    pub pricing: PricingEngine,
}

/// Orchestrates minting for a batch of resolved entities.
pub struct AssetCatalogBuilder {
    store: Arc<dyn CatalogStore>,
    components: BuilderComponents,
}

impl AssetCatalogBuilder {
    /// Creates a builder writing to `store`.
    #[must_use]
    pub fn new(store: Arc<dyn CatalogStore>, components: BuilderComponents) -> Self {
        Self { store, components }
    }

    /// Pricing engine in use.
    #[must_use]
    pub fn pricing(&self) -> &PricingEngine {
        &self.components.pricing
    }

    /// Finds an instrument stored under any of the entity's keys.
    ///
    /// `alias_keys` normally lead with the entity key; the key is only looked
    /// up separately when it is missing from them.
    ///
    /// # Errors
    /// Store failures.
    pub async fn find_existing(
        &self,
        entity: &ResolvedEntity,
    ) -> Result<Option<BaseInstrument>, CatalogError> {
        let missing_key = (!entity.alias_keys.contains(&entity.key)).then_some(&entity.key);
        for key in missing_key.into_iter().chain(entity.alias_keys.iter()) {
            if let Some(found) = self.store.get_base_instrument_by_upstream_id(key).await? {
                return Ok(Some(found));
            }
        }
        Ok(None)
    }

    /// Mints or refreshes the instrument for one entity.
    ///
    /// The mint-or-skip decision and the upsert form one unit: nothing is
    /// written for an entity unless its instrument is complete.
    ///
    /// # Errors
    /// [`CatalogError::InvalidInput`] for entities without a name; component
    /// and store failures otherwise.
    pub async fn process_entity(&self, entity: &ResolvedEntity) -> Result<EntityOutcome, CatalogError> {
        let name = entity
            .name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .ok_or_else(|| CatalogError::InvalidInput(format!("entity {} has no name", entity.key)))?;

        if let Some(existing) = self.find_existing(entity).await? {
            return self.refresh(existing, name, entity).await;
        }

        let c = &self.components;
        let series_code = c
            .compressor
            .compress(&entity.key, name, entity.entity_type)
            .await?;
        let (year, year_estimated) = c.pricing.resolve_year(c.years.extract(&entity.sources));
        let category = c.classifier.classify(entity);
        let index = c.allocator.allocate(&series_code, year, category).await?;
        let ticker = ticker::compose(&series_code, year, category, index)?;
        let quote = c.pricing.price(entity, category, year);

        let instrument = BaseInstrument {
            id: stable_id("base", &entity.key),
            upstream_id: entity.key.clone(),
            ticker,
            series_code,
            year,
            year_estimated,
            category,
            index,
            name: name.to_string(),
            entity_type: entity.entity_type,
            price: quote.price,
            share_count: quote.share_count,
            source_metadata: entity.sources.clone(),
        };
        if let Some(winner) = self.store.insert_base_instrument_if_absent(&instrument).await? {
            // A concurrent run minted this key first; its ticker stands.
            debug!(
                upstream_id = %winner.upstream_id,
                ticker = %winner.ticker,
                discarded = %instrument.ticker,
                "Lost mint race"
            );
            return self.refresh(winner, name, entity).await;
        }

        debug!(
            upstream_id = %instrument.upstream_id,
            ticker = %instrument.ticker,
            price = %instrument.price,
            shares = instrument.share_count,
            era = %quote.era,
            year_estimated,
            "Minted instrument"
        );
        Ok(EntityOutcome::Minted(instrument))
    }

    /// Rewrites the mutable fields of a stored instrument. Ticker and index
    /// never change here.
    async fn refresh(
        &self,
        mut existing: BaseInstrument,
        name: &str,
        entity: &ResolvedEntity,
    ) -> Result<EntityOutcome, CatalogError> {
        let integrity_warning = match ticker::parse(&existing.ticker) {
            Ok(_) => false,
            Err(e) => {
                warn!(upstream_id = %existing.upstream_id, error = %e, "Stored ticker failed integrity check");
                true
            }
        };
        existing.name = name.to_string();
        existing.source_metadata = entity.sources.clone();
        self.store.upsert_base_instrument(&existing).await?;
        debug!(upstream_id = %existing.upstream_id, ticker = %existing.ticker, "Refreshed instrument");
        Ok(EntityOutcome::Refreshed {
            instrument: existing,
            integrity_warning,
        })
    }

    /// Processes entities in order, stopping between entities on cancellation.
    ///
    /// No single entity can fail the batch.
    pub async fn build(&self, entities: &[ResolvedEntity], cancel: &CancelToken) -> BuildReport {
        let mut report = BuildReport::default();

        for entity in entities {
            if cancel.is_cancelled() {
                info!(remaining = entities.len() - report.processed(), "Build cancelled");
                report.cancelled = true;
                break;
            }

            match self.process_entity(entity).await {
                Ok(EntityOutcome::Minted(_)) => report.minted += 1,
                Ok(EntityOutcome::Refreshed {
                    integrity_warning, ..
                }) => {
                    report.refreshed += 1;
                    if integrity_warning {
                        report.integrity_warnings += 1;
                    }
                }
                Err(CatalogError::InvalidInput(reason)) => {
                    warn!(upstream_id = %entity.key, reason = %reason, "Skipping entity");
                    report.skipped_invalid += 1;
                }
                Err(e @ CatalogError::Store(_)) => {
                    error!(upstream_id = %entity.key, error = %e, "Store failure, entity skipped");
                    report.failed += 1;
                }
                Err(e) => {
                    warn!(upstream_id = %entity.key, error = %e, "Entity failed, skipped");
                    report.failed += 1;
                }
            }
        }

        info!(
            minted = report.minted,
            refreshed = report.refreshed,
            skipped_invalid = report.skipped_invalid,
            failed = report.failed,
            "Build pass finished"
        );
        report
    }
}

impl BuildReport {
    /// Entities handled so far, whatever the outcome.
    #[must_use]
    pub fn processed(&self) -> usize {
        self.minted + self.refreshed + self.skipped_invalid + self.failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::{BaseInstrument, Category, EntityType, SourceMetadata};
    use crate::pricing::PricingConfig;
    use crate::allocator::SeriesKey;
    use crate::instrument::{DerivativeInstrument, DerivativeKind};
    use crate::store::MemoryCatalogStore;
    use crate::year::default_year_rules;
    use async_trait::async_trait;
    use serde_json::{Value, json};
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn builder(store: Arc<MemoryCatalogStore>) -> AssetCatalogBuilder {
        builder_over(store.clone(), store)
    }

    fn builder_over(store: Arc<dyn CatalogStore>, codes: Arc<MemoryCatalogStore>) -> AssetCatalogBuilder {
        let components = BuilderComponents {
            compressor: SeriesCodeCompressor::new(codes),
            years: YearExtractor::new(default_year_rules(), 2026),
            classifier: CategoryClassifier::default(),
            allocator: TicketIndexAllocator::new(store.clone()),
            pricing: PricingEngine::new(&PricingConfig::default(), "modern").unwrap(),
        };
        AssetCatalogBuilder::new(store, components)
    }

    /// Store whose upstream lookups always miss, as seen by a run that read
    /// the catalog before another run committed its mint.
    struct StaleReadStore {
        inner: Arc<MemoryCatalogStore>,
        lookups: AtomicUsize,
    }

    impl StaleReadStore {
        fn new(inner: Arc<MemoryCatalogStore>) -> Self {
            Self {
                inner,
                lookups: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl CatalogStore for StaleReadStore {
        async fn upsert_base_instrument(&self, instrument: &BaseInstrument) -> Result<(), CatalogError> {
            self.inner.upsert_base_instrument(instrument).await
        }

        async fn insert_base_instrument_if_absent(
            &self,
            instrument: &BaseInstrument,
        ) -> Result<Option<BaseInstrument>, CatalogError> {
            self.inner.insert_base_instrument_if_absent(instrument).await
        }

        async fn get_base_instrument_by_upstream_id(
            &self,
            _upstream_id: &str,
        ) -> Result<Option<BaseInstrument>, CatalogError> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            Ok(None)
        }

        async fn get_base_instrument_by_ticker(
            &self,
            ticker: &str,
        ) -> Result<Option<BaseInstrument>, CatalogError> {
            self.inner.get_base_instrument_by_ticker(ticker).await
        }

        async fn list_base_instruments(
            &self,
            offset: usize,
            limit: usize,
        ) -> Result<Vec<BaseInstrument>, CatalogError> {
            self.inner.list_base_instruments(offset, limit).await
        }

        async fn count_base_instruments(&self) -> Result<u64, CatalogError> {
            self.inner.count_base_instruments().await
        }

        async fn upsert_derivative_instrument(
            &self,
            instrument: &DerivativeInstrument,
        ) -> Result<(), CatalogError> {
            self.inner.upsert_derivative_instrument(instrument).await
        }

        async fn delete_derivatives_for_base(&self, base_ticker: &str) -> Result<u64, CatalogError> {
            self.inner.delete_derivatives_for_base(base_ticker).await
        }

        async fn list_derivatives_for_base(
            &self,
            base_ticker: &str,
        ) -> Result<Vec<DerivativeInstrument>, CatalogError> {
            self.inner.list_derivatives_for_base(base_ticker).await
        }

        async fn count_derivatives(&self) -> Result<BTreeMap<DerivativeKind, u64>, CatalogError> {
            self.inner.count_derivatives().await
        }

        async fn allocate_next_index(&self, key: &SeriesKey) -> Result<u64, CatalogError> {
            self.inner.allocate_next_index(key).await
        }
    }

    fn entity(key: &str, name: Option<&str>, metadata: Value) -> ResolvedEntity {
        let provider = key.split(':').next().unwrap().to_string();
        let mut sources = SourceMetadata::new();
        sources.insert(provider, metadata.as_object().cloned().unwrap_or_default());
        ResolvedEntity {
            key: key.to_string(),
            alias_keys: vec![key.to_string()],
            name: name.map(str::to_string),
            entity_type: EntityType::Character,
            sources,
        }
    }

    #[tokio::test]
    async fn test_mint_batman() {
        let store = Arc::new(MemoryCatalogStore::new());
        let b = builder(store.clone());
        let batman = entity(
            "marvel:1",
            Some("Batman"),
            json!({"firstAppearanceYear": 1939, "role": "hero"}),
        );
        let outcome = b.process_entity(&batman).await.unwrap();
        let instrument = outcome.instrument();
        assert!(matches!(outcome, EntityOutcome::Minted(_)));
        assert_eq!(instrument.ticker, "BTMN.39.HER.1");
        assert_eq!(instrument.category, Category::Hero);
        assert!(!instrument.year_estimated);
    }

    #[tokio::test]
    async fn test_rerun_refreshes_same_ticker() {
        let store = Arc::new(MemoryCatalogStore::new());
        let b = builder(store.clone());
        let first = entity("comicvine:1699", Some("Batman"), json!({"start_year": 1939, "role": "hero"}));
        let again = entity("comicvine:1699", Some("The Batman"), json!({"start_year": 1939, "role": "hero"}));
        let minted = b.process_entity(&first).await.unwrap();
        let refreshed = b.process_entity(&again).await.unwrap();
        assert_eq!(minted.instrument().ticker, refreshed.instrument().ticker);
        assert_eq!(refreshed.instrument().name, "The Batman");
        assert_eq!(store.count_base_instruments().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_unknown_year_uses_default_era() {
        let store = Arc::new(MemoryCatalogStore::new());
        let b = builder(store);
        let e = entity("comicvine:5", Some("Mystery Man"), json!({"start_year": "sometime"}));
        let outcome = b.process_entity(&e).await.unwrap();
        let instrument = outcome.instrument();
        assert!(instrument.year_estimated);
        assert_eq!(instrument.year, 2010);
        assert_eq!(instrument.ticker, "MYST.10.HER.1");
    }

    #[tokio::test]
    async fn test_batch_skips_nameless_and_continues() {
        let store = Arc::new(MemoryCatalogStore::new());
        let b = builder(store.clone());
        let entities = vec![
            entity("comicvine:1", None, json!({})),
            entity("comicvine:2", Some("Joker"), json!({"role": "villain", "start_year": 1940})),
        ];
        let report = b.build(&entities, &CancelToken::new()).await;
        assert_eq!(report.skipped_invalid, 1);
        assert_eq!(report.minted, 1);
        assert_eq!(report.processed(), 2);
    }

    #[tokio::test]
    async fn test_cancel_stops_between_entities() {
        let store = Arc::new(MemoryCatalogStore::new());
        let b = builder(store.clone());
        let cancel = CancelToken::new();
        cancel.cancel();
        let entities = vec![entity("comicvine:1", Some("Joker"), json!({}))];
        let report = b.build(&entities, &cancel).await;
        assert!(report.cancelled);
        assert_eq!(report.processed(), 0);
        assert_eq!(store.count_base_instruments().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_malformed_stored_ticker_is_warning() {
        let store = Arc::new(MemoryCatalogStore::new());
        let stored = BaseInstrument {
            id: stable_id("base", "comicvine:9"),
            upstream_id: "comicvine:9".to_string(),
            ticker: "legacy-ticker".to_string(),
            series_code: "LGCY".to_string(),
            year: 1970,
            year_estimated: false,
            category: Category::Other,
            index: 1,
            name: "Legacy".to_string(),
            entity_type: EntityType::Character,
            price: rust_decimal_macros::dec!(100),
            share_count: 10,
            source_metadata: SourceMetadata::new(),
        };
        store.upsert_base_instrument(&stored).await.unwrap();
        let b = builder(store);
        let report = b
            .build(&[entity("comicvine:9", Some("Legacy"), json!({}))], &CancelToken::new())
            .await;
        assert_eq!(report.refreshed, 1);
        assert_eq!(report.integrity_warnings, 1);
    }

    #[tokio::test]
    async fn test_overlapping_runs_keep_first_ticker() {
        let memory = Arc::new(MemoryCatalogStore::new());
        let stale: Arc<dyn CatalogStore> = Arc::new(StaleReadStore::new(memory.clone()));
        let first_run = builder_over(stale.clone(), memory.clone());
        let second_run = builder_over(stale, memory.clone());
        let batman = entity("comicvine:1699", Some("Batman"), json!({"start_year": 1939, "role": "hero"}));

        let first = first_run.process_entity(&batman).await.unwrap();
        let second = second_run.process_entity(&batman).await.unwrap();

        assert!(matches!(first, EntityOutcome::Minted(_)));
        assert_eq!(first.instrument().ticker, "BTMN.39.HER.1");
        assert!(matches!(second, EntityOutcome::Refreshed { .. }));
        assert_eq!(second.instrument().ticker, "BTMN.39.HER.1");

        let stored = memory
            .get_base_instrument_by_upstream_id("comicvine:1699")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.ticker, "BTMN.39.HER.1");
        assert_eq!(stored.index, 1);
        assert_eq!(memory.count_base_instruments().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_find_existing_visits_each_key_once() {
        let memory = Arc::new(MemoryCatalogStore::new());
        let stale = Arc::new(StaleReadStore::new(memory.clone()));
        let b = builder_over(stale.clone(), memory);

        let mut merged = entity("metron:55", Some("Batman"), json!({}));
        merged.alias_keys.push("comicvine:1699".to_string());
        assert!(b.find_existing(&merged).await.unwrap().is_none());
        assert_eq!(stale.lookups.load(Ordering::SeqCst), 2);

        // Entity key absent from the aliases is still consulted.
        let mut detached = entity("metron:56", Some("Robin"), json!({}));
        detached.alias_keys = vec!["comicvine:1700".to_string()];
        b.find_existing(&detached).await.unwrap();
        assert_eq!(stale.lookups.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_non_latin_name_is_minted() {
        let store = Arc::new(MemoryCatalogStore::new());
        let b = builder(store.clone());
        let godzilla = entity("comicvine:77", Some("ゴジラ"), json!({"start_year": 1954, "role": "villain"}));
        let outcome = b.process_entity(&godzilla).await.unwrap();
        assert!(matches!(outcome, EntityOutcome::Minted(_)));
        assert!(ticker::parse(&outcome.instrument().ticker).is_ok());
        assert_eq!(outcome.instrument().name, "ゴジラ");
    }
}

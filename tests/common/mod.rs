//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::NaiveDate;
use hierarchical_ticker_engine::config::Config;
use hierarchical_ticker_engine::instrument::{EntityType, RawEntity};
use hierarchical_ticker_engine::job::CatalogJob;
use hierarchical_ticker_engine::providers::{
    EntityPage, EntityProvider, FixtureProvider, PageRequest, ProviderError, ProviderHandle,
    RetryPolicy,
};
use hierarchical_ticker_engine::store::MemoryCatalogStore;
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Synthesis date pinned for every scenario.
pub fn as_of() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 10, 1).unwrap()
}

/// Default configuration with a pinned date and an instant retry policy.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.run.as_of = Some(as_of());
    config.run.retry = RetryPolicy::new(3, 0);
    config.run.page_size = 2;
    config
}

pub fn record(id: &str, name: &str, entity_type: EntityType, metadata: Value) -> RawEntity {
    RawEntity {
        provider: String::new(),
        upstream_id: id.to_string(),
        name: Some(name.to_string()),
        entity_type,
        metadata: metadata.as_object().cloned().unwrap_or_default(),
    }
}

/// A small cross-publisher roster.
pub fn roster() -> Vec<RawEntity> {
    use serde_json::json;
    vec![
        record(
            "1699",
            "Batman",
            EntityType::Character,
            json!({"role": "hero", "publisher": "DC Comics", "start_year": 1939}),
        ),
        record(
            "1807",
            "Superman",
            EntityType::Character,
            json!({"role": "hero", "publisher": "DC Comics", "start_year": 1938}),
        ),
        record(
            "1702",
            "Joker",
            EntityType::Character,
            json!({"role": "villain", "publisher": "DC Comics", "start_year": 1940}),
        ),
        record(
            "1443",
            "Spider-Man",
            EntityType::Character,
            json!({"role": "hero", "publisher": "Marvel", "start_year": 1962}),
        ),
        record(
            "1455",
            "Wolverine",
            EntityType::Character,
            json!({"role": "hero", "publisher": "Marvel", "start_year": 1974}),
        ),
    ]
}

pub fn fixture(name: &str, records: Vec<RawEntity>) -> ProviderHandle {
    ProviderHandle::new(
        Arc::new(FixtureProvider::new(name, records)),
        Duration::ZERO,
        100,
    )
}

pub fn job(store: &Arc<MemoryCatalogStore>, providers: Vec<ProviderHandle>) -> CatalogJob {
    CatalogJob::from_config(&test_config(), store.clone(), store.clone(), providers).unwrap()
}

/// Fails the first `failures` calls with a transport error, then serves
/// its records.
pub struct FlakyProvider {
    pub inner: FixtureProvider,
    pub failures: usize,
    pub calls: AtomicUsize,
}

impl FlakyProvider {
    pub fn new(name: &str, records: Vec<RawEntity>, failures: usize) -> Self {
        Self {
            inner: FixtureProvider::new(name, records),
            failures,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl EntityProvider for FlakyProvider {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn fetch_page(&self, request: PageRequest) -> Result<EntityPage, ProviderError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
            return Err(ProviderError::Transport("connection reset".to_string()));
        }
        self.inner.fetch_page(request).await
    }
}

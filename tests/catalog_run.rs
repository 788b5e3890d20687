//! End-to-end catalog runs over fixture providers and the in-memory store.

mod common;

use common::{FlakyProvider, fixture, job, record, roster};
use hierarchical_ticker_engine::instrument::{DerivativeKind, EntityType};
use hierarchical_ticker_engine::job::{CancelToken, RunOptions};
use hierarchical_ticker_engine::providers::{FixtureProvider, ProviderHandle};
use hierarchical_ticker_engine::store::{CatalogStore, MemoryCatalogStore};
use hierarchical_ticker_engine::ticker;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

async fn tickers(store: &MemoryCatalogStore) -> Vec<String> {
    store
        .list_base_instruments(0, 1000)
        .await
        .unwrap()
        .into_iter()
        .map(|b| b.ticker)
        .collect()
}

async fn derivative_tickers(store: &MemoryCatalogStore) -> Vec<String> {
    let mut out: Vec<String> = store
        .all_derivatives()
        .into_iter()
        .map(|d| d.ticker)
        .collect();
    out.sort();
    out
}

#[tokio::test]
async fn test_run_mints_and_publishes() {
    let store = Arc::new(MemoryCatalogStore::new());
    let job = job(&store, vec![fixture("comicvine", roster())]);

    let summary = job.run(&RunOptions::default(), &CancelToken::new()).await.unwrap();

    assert_eq!(summary.fetched, 5);
    assert_eq!(summary.minted, 5);
    assert_eq!(summary.refreshed, 0);
    assert!(!summary.cancelled);
    assert_eq!(summary.derivative_failures, 0);
    assert!(tickers(&store).await.contains(&"BTMN.39.HER.1".to_string()));
    for t in tickers(&store).await {
        ticker::parse(&t).unwrap();
    }
    assert!(summary.derivatives[&DerivativeKind::Option] > 0);
    assert!(summary.derivatives[&DerivativeKind::Bond] > 0);
}

#[tokio::test]
async fn test_rerun_is_idempotent() {
    let store = Arc::new(MemoryCatalogStore::new());
    let job = job(&store, vec![fixture("comicvine", roster())]);

    let first = job.run(&RunOptions::default(), &CancelToken::new()).await.unwrap();
    let bases_after_first = tickers(&store).await;
    let derivatives_after_first = derivative_tickers(&store).await;

    let second = job.run(&RunOptions::default(), &CancelToken::new()).await.unwrap();

    assert_eq!(second.minted, 0);
    assert_eq!(second.refreshed, first.minted);
    assert_eq!(tickers(&store).await, bases_after_first);
    assert_eq!(derivative_tickers(&store).await, derivatives_after_first);
    assert_eq!(first.derivatives, second.derivatives);
}

#[tokio::test]
async fn test_new_lead_provider_keeps_existing_ticker() {
    let store = Arc::new(MemoryCatalogStore::new());
    let batman = || {
        record(
            "1699",
            "Batman",
            EntityType::Character,
            json!({"role": "hero", "start_year": 1939}),
        )
    };

    let first = job(&store, vec![fixture("comicvine", vec![batman()])])
        .run(&RunOptions::default(), &CancelToken::new())
        .await
        .unwrap();
    assert_eq!(first.minted, 1);
    assert_eq!(tickers(&store).await, vec!["BTMN.39.HER.1"]);

    // A more authoritative provider now leads the merged entity and links
    // back to the comicvine record.
    let metron = ProviderHandle::new(
        Arc::new(FixtureProvider::new(
            "metron",
            vec![record(
                "55",
                "The Batman",
                EntityType::Character,
                json!({"cv_id": 1699, "role": "hero", "start_year": 1939}),
            )],
        )),
        Duration::ZERO,
        1,
    );
    let second = job(&store, vec![metron, fixture("comicvine", vec![batman()])])
        .run(&RunOptions::default(), &CancelToken::new())
        .await
        .unwrap();

    assert_eq!(second.minted, 0);
    assert_eq!(second.refreshed, 1);
    assert_eq!(tickers(&store).await, vec!["BTMN.39.HER.1"]);
    let stored = store
        .get_base_instrument_by_ticker("BTMN.39.HER.1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.upstream_id, "comicvine:1699");
    assert_eq!(stored.name, "The Batman");
}

#[tokio::test]
async fn test_identical_inputs_give_identical_catalogs() {
    let a = Arc::new(MemoryCatalogStore::new());
    let b = Arc::new(MemoryCatalogStore::new());
    job(&a, vec![fixture("comicvine", roster())])
        .run(&RunOptions::default(), &CancelToken::new())
        .await
        .unwrap();
    job(&b, vec![fixture("comicvine", roster())])
        .run(&RunOptions::default(), &CancelToken::new())
        .await
        .unwrap();

    assert_eq!(tickers(&a).await, tickers(&b).await);
    assert_eq!(derivative_tickers(&a).await, derivative_tickers(&b).await);
    let prices_a: Vec<_> = a.list_base_instruments(0, 100).await.unwrap().into_iter().map(|i| i.price).collect();
    let prices_b: Vec<_> = b.list_base_instruments(0, 100).await.unwrap().into_iter().map(|i| i.price).collect();
    assert_eq!(prices_a, prices_b);
}

#[tokio::test]
async fn test_etf_weights_sum_to_one() {
    let store = Arc::new(MemoryCatalogStore::new());
    let summary = job(&store, vec![fixture("comicvine", roster())])
        .run(&RunOptions::default(), &CancelToken::new())
        .await
        .unwrap();

    assert_eq!(summary.derivatives.get(&DerivativeKind::Etf), Some(&2));
    let etfs: Vec<_> = store
        .all_derivatives()
        .into_iter()
        .filter(|d| d.kind == DerivativeKind::Etf)
        .collect();
    assert_eq!(etfs.len(), 2);
    for etf in etfs {
        let weights = etf.basket_weights.unwrap();
        let total: f64 = weights.iter().map(|w| w.weight).sum();
        assert!((total - 1.0).abs() < 1e-9, "{} sums to {total}", etf.ticker);
        assert!(weights.iter().all(|w| w.weight > 0.0));
    }
}

#[tokio::test]
async fn test_quota_limits_fetch() {
    let store = Arc::new(MemoryCatalogStore::new());
    let job = job(
        &store,
        vec![
            fixture("comicvine", roster()),
            fixture(
                "metron",
                vec![record("9", "Storm", EntityType::Character, json!({"cover_date": "1975-05-01"}))],
            ),
        ],
    );
    let options = RunOptions {
        provider_quotas: BTreeMap::from([("comicvine".to_string(), 3)]),
        ..RunOptions::default()
    };

    let summary = job.run(&options, &CancelToken::new()).await.unwrap();

    assert_eq!(summary.fetched, 3);
    assert_eq!(summary.minted, 3);
    assert_eq!(store.count_base_instruments().await.unwrap(), 3);
}

#[tokio::test]
async fn test_flaky_provider_recovers_within_retries() {
    let store = Arc::new(MemoryCatalogStore::new());
    let flaky = Arc::new(FlakyProvider::new("comicvine", roster(), 2));
    let job = job(&store, vec![ProviderHandle::new(flaky, Duration::ZERO, 100)]);

    let summary = job.run(&RunOptions::default(), &CancelToken::new()).await.unwrap();

    assert_eq!(summary.skipped_provider, 0);
    assert_eq!(summary.minted, 5);
}

#[tokio::test]
async fn test_dead_provider_does_not_fail_run() {
    let store = Arc::new(MemoryCatalogStore::new());
    let dead = Arc::new(FlakyProvider::new("metron", roster(), usize::MAX));
    let job = job(
        &store,
        vec![
            ProviderHandle::new(dead, Duration::ZERO, 1),
            fixture(
                "comicvine",
                vec![record("1699", "Batman", EntityType::Character, json!({"role": "hero", "start_year": 1939}))],
            ),
        ],
    );

    let summary = job.run(&RunOptions::default(), &CancelToken::new()).await.unwrap();

    assert!(summary.skipped_provider >= 1);
    assert_eq!(summary.minted, 1);
    assert_eq!(tickers(&store).await, vec!["BTMN.39.HER.1".to_string()]);
}

#[tokio::test]
async fn test_cancelled_run_mints_nothing() {
    let store = Arc::new(MemoryCatalogStore::new());
    let job = job(&store, vec![fixture("comicvine", roster())]);
    let cancel = CancelToken::new();
    cancel.cancel();

    let summary = job.run(&RunOptions::default(), &cancel).await.unwrap();

    assert!(summary.cancelled);
    assert_eq!(summary.minted, 0);
    assert_eq!(store.count_base_instruments().await.unwrap(), 0);
    assert!(store.all_derivatives().is_empty());
}

#[tokio::test]
async fn test_same_name_in_two_publishers_is_disambiguated() {
    let store = Arc::new(MemoryCatalogStore::new());
    let job = job(
        &store,
        vec![fixture(
            "comicvine",
            vec![
                record("1", "Batman", EntityType::Character, json!({"role": "hero", "publisher": "DC", "start_year": 1939})),
                record("2", "Batman", EntityType::Character, json!({"role": "hero", "publisher": "Elseworlds", "start_year": 1939})),
            ],
        )],
    );

    let summary = job.run(&RunOptions::default(), &CancelToken::new()).await.unwrap();

    assert_eq!(summary.minted, 2);
    assert_eq!(
        tickers(&store).await,
        vec!["BTM2.39.HER.1".to_string(), "BTMN.39.HER.1".to_string()]
    );
}

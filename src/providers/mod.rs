//! Upstream metadata providers and the bounded-concurrency fetcher.

mod fixture;
mod rate_limit;

pub use fixture::FixtureProvider;
pub use rate_limit::{RateLimiter, RetryPolicy};

use crate::error::CatalogError;
use crate::instrument::RawEntity;
use crate::job::CancelToken;
use async_trait::async_trait;
use futures::StreamExt;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Consecutive failed pages after which a provider is abandoned for the run.
const MAX_CONSECUTIVE_FAILED_PAGES: usize = 2;

/// Errors returned by provider implementations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    /// Provider asked us to slow down.
    #[error("rate limited")]
    RateLimited {
        /// Server-suggested wait, if any.
        retry_after: Option<Duration>,
    },
    /// Network or server failure.
    #[error("transport error: {0}")]
    Transport(String),
    /// Response could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),
}

impl ProviderError {
    /// Whether retrying may help.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        !matches!(self, Self::Decode(_))
    }

    /// Converts into the catalog taxonomy.
    #[must_use]
    pub fn into_catalog(self, provider: &str) -> CatalogError {
        match self {
            Self::RateLimited { .. } => CatalogError::ProviderRateLimit {
                provider: provider.to_string(),
            },
            other => CatalogError::Provider {
                provider: provider.to_string(),
                message: other.to_string(),
            },
        }
    }
}

/// One page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    /// Zero-based record offset.
    pub offset: usize,
    /// Maximum records to return.
    pub limit: usize,
}

/// One page of records.
#[derive(Debug, Clone, Default)]
pub struct EntityPage {
    /// Records on this page.
    pub entities: Vec<RawEntity>,
    /// Offset of the next page, `None` when exhausted.
    pub next_offset: Option<usize>,
}

/// A paginated source of raw entity records.
#[async_trait]
pub trait EntityProvider: Send + Sync {
    /// Provider name; also the namespace of its upstream ids.
    fn name(&self) -> &str;

    /// Fetches one page.
    async fn fetch_page(&self, request: PageRequest) -> Result<EntityPage, ProviderError>;
}

/// A provider with its rate limiter and authority rank.
pub struct ProviderHandle {
    provider: Arc<dyn EntityProvider>,
    limiter: RateLimiter,
    priority: u32,
}

impl ProviderHandle {
    /// Wraps a provider. Lower `priority` is more authoritative.
    #[must_use]
    pub fn new(provider: Arc<dyn EntityProvider>, min_interval: Duration, priority: u32) -> Self {
        Self {
            provider,
            limiter: RateLimiter::new(min_interval),
            priority,
        }
    }

    /// Provider name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.provider.name()
    }
}

/// Per-provider fetch outcome.
#[derive(Debug, Clone, Default)]
pub struct ProviderReport {
    /// Provider name.
    pub provider: String,
    /// Records returned.
    pub fetched: usize,
    /// Pages fetched successfully.
    pub pages: usize,
    /// Pages skipped after retries ran out.
    pub failed_pages: usize,
    /// Last error seen, if any.
    pub last_error: Option<CatalogError>,
}

/// Records from every selected provider, in provider-priority order.
#[derive(Debug, Clone, Default)]
pub struct FetchOutcome {
    /// Raw records.
    pub records: Vec<RawEntity>,
    /// One report per provider that was fetched.
    pub reports: Vec<ProviderReport>,
}

/// Fetches from many providers with bounded concurrency.
pub struct ProviderFetcher {
    handles: Vec<Arc<ProviderHandle>>,
    retry: RetryPolicy,
    page_size: usize,
    max_concurrent: usize,
}

impl ProviderFetcher {
    /// Creates a fetcher.
    #[must_use]
    pub fn new(
        mut handles: Vec<ProviderHandle>,
        retry: RetryPolicy,
        page_size: usize,
        max_concurrent: usize,
    ) -> Self {
        handles.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.name().cmp(b.name())));
        Self {
            handles: handles.into_iter().map(Arc::new).collect(),
            retry,
            page_size: page_size.max(1),
            max_concurrent: max_concurrent.max(1),
        }
    }

    /// Provider names, most authoritative first.
    #[must_use]
    pub fn priority_order(&self) -> Vec<String> {
        self.handles.iter().map(|h| h.name().to_string()).collect()
    }

    /// Fetches from the providers selected by `quotas`.
    ///
    /// An empty quota map selects every provider without a cap; otherwise
    /// only the named providers are fetched, each up to its count.
    pub async fn fetch(&self, quotas: &BTreeMap<String, usize>, cancel: &CancelToken) -> FetchOutcome {
        let selected: Vec<(usize, Arc<ProviderHandle>, Option<usize>)> = self
            .handles
            .iter()
            .enumerate()
            .filter_map(|(rank, h)| {
                if quotas.is_empty() {
                    Some((rank, Arc::clone(h), None))
                } else {
                    quotas.get(h.name()).map(|q| (rank, Arc::clone(h), Some(*q)))
                }
            })
            .collect();

        for name in quotas.keys() {
            if !self.handles.iter().any(|h| h.name() == name) {
                warn!(provider = %name, "Quota names an unconfigured provider");
            }
        }

        let mut results: Vec<(usize, Vec<RawEntity>, ProviderReport)> =
            futures::stream::iter(selected)
                .map(|(rank, handle, quota)| async move {
                    let (records, report) = self.fetch_provider(&handle, quota, cancel).await;
                    (rank, records, report)
                })
                .buffer_unordered(self.max_concurrent)
                .collect()
                .await;
        results.sort_by_key(|(rank, _, _)| *rank);

        let mut outcome = FetchOutcome::default();
        for (_, records, report) in results {
            outcome.records.extend(records);
            outcome.reports.push(report);
        }
        outcome
    }

    async fn fetch_provider(
        &self,
        handle: &ProviderHandle,
        quota: Option<usize>,
        cancel: &CancelToken,
    ) -> (Vec<RawEntity>, ProviderReport) {
        let name = handle.name().to_string();
        let mut report = ProviderReport {
            provider: name.clone(),
            ..ProviderReport::default()
        };
        let mut records = Vec::new();
        let mut offset = 0;
        let mut consecutive_failures = 0;

        while quota.is_none_or(|q| records.len() < q) && !cancel.is_cancelled() {
            let limit = quota.map_or(self.page_size, |q| self.page_size.min(q - records.len()));
            let request = PageRequest { offset, limit };

            let page = self
                .retry
                .run(|attempt| async move {
                    handle.limiter.acquire().await;
                    let result = handle.provider.fetch_page(request).await;
                    if let Err(ProviderError::RateLimited {
                        retry_after: Some(after),
                    }) = &result
                    {
                        handle.limiter.defer(*after).await;
                    }
                    if let Err(e) = &result {
                        debug!(provider = %handle.name(), offset, attempt, error = %e, "Page fetch failed");
                    }
                    result
                })
                .await;

            match page {
                Ok(page) => {
                    consecutive_failures = 0;
                    report.pages += 1;
                    let returned = page.entities.len();
                    for mut entity in page.entities {
                        if entity.provider.is_empty() {
                            entity.provider.clone_from(&name);
                        }
                        records.push(entity);
                    }
                    match page.next_offset {
                        Some(next) if next > offset && returned > 0 => offset = next,
                        _ => break,
                    }
                }
                Err(e) => {
                    consecutive_failures += 1;
                    report.failed_pages += 1;
                    let err = e.into_catalog(&name);
                    warn!(provider = %name, offset, error = %err, "Skipping page after retries");
                    report.last_error = Some(err);
                    if consecutive_failures >= MAX_CONSECUTIVE_FAILED_PAGES {
                        warn!(provider = %name, "Abandoning provider for this run");
                        break;
                    }
                    offset += limit;
                }
            }
        }

        if let Some(q) = quota {
            records.truncate(q);
        }
        report.fetched = records.len();
        info!(
            provider = %name,
            fetched = report.fetched,
            failed_pages = report.failed_pages,
            "Provider fetch finished"
        );
        (records, report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::EntityType;
    use parking_lot::Mutex;

    fn entity(id: usize) -> RawEntity {
        RawEntity {
            provider: String::new(),
            upstream_id: id.to_string(),
            name: Some(format!("Entity {id}")),
            entity_type: EntityType::Character,
            metadata: Default::default(),
        }
    }

    /// Fails the first `failures` calls at each offset listed in `flaky`.
    struct FlakyProvider {
        name: String,
        total: usize,
        flaky: Vec<usize>,
        failures: u32,
        seen: Mutex<BTreeMap<usize, u32>>,
    }

    #[async_trait]
    impl EntityProvider for FlakyProvider {
        fn name(&self) -> &str {
            &self.name
        }

        async fn fetch_page(&self, request: PageRequest) -> Result<EntityPage, ProviderError> {
            if self.flaky.contains(&request.offset) {
                let mut seen = self.seen.lock();
                let count = seen.entry(request.offset).or_insert(0);
                *count += 1;
                if *count <= self.failures {
                    return Err(ProviderError::RateLimited { retry_after: None });
                }
            }
            let end = (request.offset + request.limit).min(self.total);
            let entities = (request.offset..end).map(entity).collect();
            Ok(EntityPage {
                entities,
                next_offset: (end < self.total).then_some(end),
            })
        }
    }

    fn flaky(name: &str, total: usize, flaky: Vec<usize>, failures: u32) -> ProviderHandle {
        ProviderHandle::new(
            Arc::new(FlakyProvider {
                name: name.to_string(),
                total,
                flaky,
                failures,
                seen: Mutex::new(BTreeMap::new()),
            }),
            Duration::from_millis(10),
            0,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_paginates_and_tags_provider() {
        let fetcher = ProviderFetcher::new(vec![flaky("gcd", 25, vec![], 0)], RetryPolicy::new(3, 50), 10, 2);
        let outcome = fetcher.fetch(&BTreeMap::new(), &CancelToken::new()).await;
        assert_eq!(outcome.records.len(), 25);
        assert!(outcome.records.iter().all(|r| r.provider == "gcd"));
        assert_eq!(outcome.reports[0].pages, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_recovers() {
        let fetcher = ProviderFetcher::new(vec![flaky("cv", 20, vec![10], 2)], RetryPolicy::new(3, 50), 10, 1);
        let outcome = fetcher.fetch(&BTreeMap::new(), &CancelToken::new()).await;
        assert_eq!(outcome.records.len(), 20);
        assert_eq!(outcome.reports[0].failed_pages, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_skip_page() {
        let fetcher = ProviderFetcher::new(vec![flaky("cv", 30, vec![10], 5)], RetryPolicy::new(2, 50), 10, 1);
        let outcome = fetcher.fetch(&BTreeMap::new(), &CancelToken::new()).await;
        assert_eq!(outcome.records.len(), 20);
        assert_eq!(outcome.reports[0].failed_pages, 1);
        assert!(matches!(
            outcome.reports[0].last_error,
            Some(CatalogError::ProviderRateLimit { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_quotas_select_and_cap() {
        let fetcher = ProviderFetcher::new(
            vec![flaky("a", 50, vec![], 0), flaky("b", 50, vec![], 0)],
            RetryPolicy::default(),
            20,
            2,
        );
        let quotas = BTreeMap::from([("b".to_string(), 25usize)]);
        let outcome = fetcher.fetch(&quotas, &CancelToken::new()).await;
        assert_eq!(outcome.records.len(), 25);
        assert_eq!(outcome.reports.len(), 1);
        assert_eq!(outcome.reports[0].provider, "b");
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_fetch_returns_nothing() {
        let fetcher = ProviderFetcher::new(vec![flaky("a", 50, vec![], 0)], RetryPolicy::default(), 10, 1);
        let cancel = CancelToken::new();
        cancel.cancel();
        let outcome = fetcher.fetch(&BTreeMap::new(), &cancel).await;
        assert!(outcome.records.is_empty());
    }

    #[test]
    fn test_error_conversion() {
        let err = ProviderError::RateLimited { retry_after: None }.into_catalog("marvel");
        assert_eq!(
            err,
            CatalogError::ProviderRateLimit {
                provider: "marvel".to_string()
            }
        );
        let err = ProviderError::Transport("502".to_string()).into_catalog("marvel");
        assert!(matches!(err, CatalogError::Provider { .. }));
        assert!(!ProviderError::Decode("x".to_string()).is_transient());
    }
}

//! Catalog job: fetch, resolve, mint, synthesize and publish in one run.

use crate::builder::{AssetCatalogBuilder, BuildReport, BuilderComponents};
use crate::classifier::CategoryClassifier;
use crate::allocator::TicketIndexAllocator;
use crate::config::{Config, ProviderConfig};
use crate::derivatives::{DerivativeSynthesizer, SynthesisContext};
use crate::error::CatalogError;
use crate::identity::IdentityResolver;
use crate::instrument::{BaseInstrument, DerivativeInstrument, DerivativeKind};
use crate::pricing::PricingEngine;
use crate::providers::{EntityProvider, FixtureProvider, ProviderFetcher, ProviderHandle};
use crate::series_code::{SeriesCodeCompressor, SeriesCodeRegistry};
use crate::store::CatalogStore;
use crate::year::YearExtractor;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

const SNAPSHOT_PAGE: usize = 500;

/// Cooperative cancellation flag shared between a run and its controller.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Creates an un-cancelled token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. The run stops at the next entity or page boundary.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Per-run overrides.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Records to fetch per provider. Empty uses the configured quotas.
    pub provider_quotas: BTreeMap<String, usize>,
    /// Synthesis date. Falls back to the configured date, then today.
    pub as_of: Option<NaiveDate>,
}

/// Outcome of one run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    /// Run identifier.
    pub run_id: Uuid,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run finished.
    pub finished_at: DateTime<Utc>,
    /// Date derivatives were synthesized for.
    pub as_of: NaiveDate,
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
    /// Provider pages skipped after retries ran out.
    pub skipped_provider: usize,
    /// Stored tickers that failed to parse.
    pub integrity_warnings: usize,
    /// Entities that failed for other reasons.
    pub failed: usize,
    /// Derivatives published, per kind.
    pub derivatives: BTreeMap<DerivativeKind, usize>,
    /// Derivatives that could not be published.
    pub derivative_failures: usize,
    /// Whether the run stopped early.
    pub cancelled: bool,
}

#[derive(Debug, Default)]
struct PublishReport {
    published: BTreeMap<DerivativeKind, usize>,
    failures: usize,
    integrity_warnings: usize,
    cancelled: bool,
}

/// A fully wired catalog run.
pub struct CatalogJob {
    store: Arc<dyn CatalogStore>,
    fetcher: ProviderFetcher,
    resolver: IdentityResolver,
    builder: AssetCatalogBuilder,
    synthesizer: DerivativeSynthesizer,
    default_quotas: BTreeMap<String, usize>,
    default_as_of: Option<NaiveDate>,
}

impl CatalogJob {
    /// Wires a job from configuration.
    ///
    /// # Arguments
    /// * `config` - Validated configuration
    /// * `store` - Catalog store
    /// * `registry` - Series code registry, usually the same backend as `store`
    /// * `providers` - Upstream providers with their rate limits
    ///
    /// # Errors
    /// [`CatalogError::InvalidInput`] if the pricing section is unusable.
    pub fn from_config(
        config: &Config,
        store: Arc<dyn CatalogStore>,
        registry: Arc<dyn SeriesCodeRegistry>,
        providers: Vec<ProviderHandle>,
    ) -> Result<Self, CatalogError> {
        let fetcher = ProviderFetcher::new(
            providers,
            config.run.retry,
            config.run.page_size,
            config.run.max_concurrent_providers,
        );
        let resolver = IdentityResolver::new(config.identity.clone(), fetcher.priority_order());
        let pricing = PricingEngine::new(&config.pricing, &config.run.default_era)
            .map_err(CatalogError::InvalidInput)?;
        let components = BuilderComponents {
            compressor: SeriesCodeCompressor::new(registry),
            years: YearExtractor::with_current_year(config.year_rules.clone()),
            classifier: CategoryClassifier::default(),
            allocator: TicketIndexAllocator::new(Arc::clone(&store)),
            pricing,
        };

        Ok(Self {
            builder: AssetCatalogBuilder::new(Arc::clone(&store), components),
            store,
            fetcher,
            resolver,
            synthesizer: DerivativeSynthesizer::new(config.derivatives.clone()),
            default_quotas: config.run.provider_quotas.clone(),
            default_as_of: config.run.as_of,
        })
    }

    /// Runs the whole pipeline once.
    ///
    /// Individual records, entities and derivatives never fail the run; only
    /// a store failure while reading the catalog snapshot does.
    ///
    /// # Errors
    /// Store failures while reading the base catalog.
    pub async fn run(&self, options: &RunOptions, cancel: &CancelToken) -> Result<RunSummary, CatalogError> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let as_of = options
            .as_of
            .or(self.default_as_of)
            .unwrap_or_else(|| started_at.date_naive());
        let quotas = if options.provider_quotas.is_empty() {
            &self.default_quotas
        } else {
            &options.provider_quotas
        };
        info!(%run_id, %as_of, providers = ?quotas, "Catalog run started");

        let fetched = self.fetcher.fetch(quotas, cancel).await;
        let skipped_provider = fetched.reports.iter().map(|r| r.failed_pages).sum();
        for report in fetched.reports.iter().filter(|r| r.last_error.is_some()) {
            warn!(provider = %report.provider, failed_pages = report.failed_pages, error = ?report.last_error, "Provider had failures");
        }
        let fetched_count = fetched.records.len();

        let resolution = self.resolver.resolve(fetched.records);
        info!(
            fetched = fetched_count,
            entities = resolution.entities.len(),
            duplicates = resolution.duplicates,
            "Identity resolution finished"
        );

        let build = if cancel.is_cancelled() {
            BuildReport {
                cancelled: true,
                ..BuildReport::default()
            }
        } else {
            self.builder.build(&resolution.entities, cancel).await
        };

        let publish = if cancel.is_cancelled() {
            PublishReport {
                cancelled: true,
                ..PublishReport::default()
            }
        } else {
            let bases = self.snapshot().await?;
            self.publish(&bases, &SynthesisContext { as_of }, cancel).await
        };

        let summary = RunSummary {
            run_id,
            started_at,
            finished_at: Utc::now(),
            as_of,
            fetched: fetched_count,
            duplicates: resolution.duplicates,
            minted: build.minted,
            refreshed: build.refreshed,
            skipped_invalid: build.skipped_invalid,
            skipped_provider,
            integrity_warnings: build.integrity_warnings + publish.integrity_warnings,
            failed: build.failed,
            derivatives: publish.published,
            derivative_failures: publish.failures,
            cancelled: build.cancelled || publish.cancelled || cancel.is_cancelled(),
        };
        info!(
            %run_id,
            minted = summary.minted,
            refreshed = summary.refreshed,
            derivatives = summary.derivatives.values().sum::<usize>(),
            cancelled = summary.cancelled,
            "Catalog run finished"
        );
        Ok(summary)
    }

    /// Every base instrument in the catalog, ordered by ticker.
    ///
    /// # Errors
    /// Store failures.
    pub async fn snapshot(&self) -> Result<Vec<BaseInstrument>, CatalogError> {
        let mut bases = Vec::new();
        loop {
            let page = self
                .store
                .list_base_instruments(bases.len(), SNAPSHOT_PAGE)
                .await?;
            let done = page.len() < SNAPSHOT_PAGE;
            bases.extend(page);
            if done {
                return Ok(bases);
            }
        }
    }

    async fn publish(
        &self,
        bases: &[BaseInstrument],
        ctx: &SynthesisContext,
        cancel: &CancelToken,
    ) -> PublishReport {
        let output = self.synthesizer.synthesize(bases, ctx);
        let mut report = PublishReport {
            integrity_warnings: output.skipped.len(),
            ..PublishReport::default()
        };

        for (base_ticker, derivatives) in &output.per_base {
            if cancel.is_cancelled() {
                report.cancelled = true;
                return report;
            }
            if let Err(e) = self.store.delete_derivatives_for_base(base_ticker).await {
                error!(base_ticker = %base_ticker, error = %e, "Could not clear derivatives");
                report.failures += derivatives.len();
                continue;
            }
            self.publish_all(derivatives, &mut report).await;
        }
        self.publish_all(&output.etfs, &mut report).await;
        report
    }

    async fn publish_all(&self, derivatives: &[DerivativeInstrument], report: &mut PublishReport) {
        for derivative in derivatives {
            match self.store.upsert_derivative_instrument(derivative).await {
                Ok(()) => *report.published.entry(derivative.kind).or_default() += 1,
                Err(e @ CatalogError::DerivativeReference(_)) => {
                    warn!(ticker = %derivative.ticker, base_ticker = %derivative.base_ticker, error = %e, "Derivative skipped");
                    report.failures += 1;
                }
                Err(e) => {
                    error!(ticker = %derivative.ticker, error = %e, "Derivative upsert failed");
                    report.failures += 1;
                }
            }
        }
    }
}

/// Loads the JSON fixture providers named in configuration.
///
/// # Errors
/// [`CatalogError::Provider`] if a fixture cannot be read or decoded.
pub async fn load_providers(configs: &[ProviderConfig]) -> Result<Vec<ProviderHandle>, CatalogError> {
    let mut handles = Vec::with_capacity(configs.len());
    for config in configs {
        let provider = FixtureProvider::from_file(config.name.clone(), &config.path)
            .await
            .map_err(|e| e.into_catalog(&config.name))?;
        info!(provider = %config.name, records = provider.len(), "Loaded provider fixture");
        let provider: Arc<dyn EntityProvider> = Arc::new(provider);
        handles.push(ProviderHandle::new(
            provider,
            Duration::from_millis(config.min_interval_ms),
            config.priority,
        ));
    }
    Ok(handles)
}

//! Hierarchical Ticker Engine Server
//!
//! Runs the catalog job once at startup and serves the catalog over REST.

use anyhow::Context;
use hierarchical_ticker_engine::api::create_router;
use hierarchical_ticker_engine::config::Config;
use hierarchical_ticker_engine::db::{DatabasePool, PgCatalogStore};
use hierarchical_ticker_engine::job::{CatalogJob, RunOptions, load_providers};
use hierarchical_ticker_engine::series_code::SeriesCodeRegistry;
use hierarchical_ticker_engine::state::AppState;
use hierarchical_ticker_engine::store::{CatalogStore, MemoryCatalogStore};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use hierarchical_ticker_engine::models::{
    BasketWeightResponse, CatalogStatsResponse, DerivativeSummary, DerivativesListResponse,
    HealthResponse, InstrumentDetailResponse, InstrumentSummary, InstrumentsListResponse,
    RunAcceptedResponse, RunRequest, RunSummaryResponse, TickerParseResponse,
};

/// OpenAPI documentation.
#[derive(OpenApi)]
#[openapi(
    paths(
        hierarchical_ticker_engine::api::handlers::health_check,
        hierarchical_ticker_engine::api::handlers::get_catalog_stats,
        hierarchical_ticker_engine::api::handlers::list_instruments,
        hierarchical_ticker_engine::api::handlers::get_instrument,
        hierarchical_ticker_engine::api::handlers::list_derivatives,
        hierarchical_ticker_engine::api::handlers::parse_ticker,
        hierarchical_ticker_engine::api::handlers::start_run,
        hierarchical_ticker_engine::api::handlers::cancel_run,
    ),
    components(
        schemas(
            HealthResponse,
            CatalogStatsResponse,
            InstrumentsListResponse,
            InstrumentSummary,
            InstrumentDetailResponse,
            DerivativesListResponse,
            DerivativeSummary,
            BasketWeightResponse,
            TickerParseResponse,
            RunRequest,
            RunAcceptedResponse,
            RunSummaryResponse,
        )
    ),
    tags(
        (name = "Health", description = "Health check endpoints"),
        (name = "Statistics", description = "Catalog statistics"),
        (name = "Instruments", description = "Base and derivative instruments"),
        (name = "Tickers", description = "Ticker decomposition"),
        (name = "Runs", description = "Catalog run control"),
    ),
    info(
        title = "Hierarchical Ticker Engine API",
        version = "0.2.0",
        description = "REST API over the synthetic instrument catalog",
        license(name = "MIT"),
        contact(name = "Joaquin Bejar", email = "jb@taunais.com")
    )
)]
struct ApiDoc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match std::env::var("CONFIG_PATH") {
        Ok(path) => Config::load(&path).with_context(|| format!("loading {path}"))?,
        Err(_) => {
            info!("CONFIG_PATH not set, using default configuration");
            Config::default()
        }
    };

    // Pick the catalog backend
    let (store, registry): (Arc<dyn CatalogStore>, Arc<dyn SeriesCodeRegistry>) =
        match std::env::var("DATABASE_URL") {
            Ok(url) => {
                let db = DatabasePool::connect(&url, &config.database).await?;
                db.run_migrations().await?;
                let pg = Arc::new(PgCatalogStore::new(&db));
                (pg.clone(), pg)
            }
            Err(_) => {
                info!("DATABASE_URL not set, using in-memory catalog");
                let memory = Arc::new(MemoryCatalogStore::new());
                (memory.clone(), memory)
            }
        };

    let providers = load_providers(&config.providers).await?;
    let job = CatalogJob::from_config(&config, Arc::clone(&store), registry, providers)?;
    let state = Arc::new(AppState::with_job(store, job));

    // Initial run in the background; the API serves whatever is published so far
    if !config.providers.is_empty()
        && let Some(job) = state.job.clone()
        && let Some(guard) = state.try_begin_run()
    {
        tokio::spawn(async move {
            let summary = match job.run(&RunOptions::default(), guard.token()).await {
                Ok(summary) => Some(summary),
                Err(e) => {
                    error!(error = %e, "Initial catalog run failed");
                    None
                }
            };
            guard.finish(summary);
        });
    }

    // Get host and port from environment or configuration
    let host = std::env::var("HOST").unwrap_or_else(|_| config.server.host.clone());
    let port: u16 = match std::env::var("PORT") {
        Ok(p) => p.parse().context("PORT must be a valid number")?,
        Err(_) => config.server.port,
    };

    info!("Starting Hierarchical Ticker Engine on {}:{}", host, port);
    info!("Swagger UI available at http://{}:{}/swagger-ui/", host, port);

    // Configure CORS
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Build the router
    let app = create_router(state)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    // Start the server
    let addr = format!("{}:{}", host, port);
    let listener = TcpListener::bind(&addr).await?;
    info!("Listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

//! # Hierarchical Ticker Engine
//!
//! Mints deterministic, human-readable tickers for catalogued comic entities
//! (characters, creators, issues, teams, locations, objects, publishers),
//! prices them inside a fixed band, and synthesizes derivative instruments
//! (options, LEAPs, bonds and thematic ETFs) on top of them.
//!
//! Built with [Axum](https://crates.io/crates/axum) for the read API,
//! [sqlx](https://crates.io/crates/sqlx) for the PostgreSQL catalog and
//! [utoipa](https://crates.io/crates/utoipa) for OpenAPI documentation.
//!
//! ## Ticker Grammar
//!
//! ```text
//! base ticker:   SERIES.YY.CAT.INDEX                 BTMN.39.HER.1
//! option:        BASE.MON.YYYY.STRIKE.{C|P}          BTMN.JAN.2025.100.C
//! LEAP:          BASE.MON.YYYY.STRIKE.{C|P}.LEAP     BTMN.JAN.2026.150.C.LEAP
//! bond:          BASE.MON.YYYY.RATE                  BTMN.DEC.2025.5.0
//! ETF:           GROUP.ETF                           MRV.ETF
//! ```
//!
//! ## Pipeline
//!
//! ```text
//! providers ──► identity ──► builder ──────────────────────────► store
//!  (paged,       (dedup)      series_code → year → classifier      ▲
//!   rate-                      → allocator → ticker → pricing       │
//!   limited)                                                        │
//!                              derivatives (pure, per snapshot) ────┘
//! ```
//!
//! ## Module Structure
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`instrument`] | Raw entities, base and derivative instruments |
//! | [`ticker`] | Ticker composition and parsing |
//! | [`series_code`] | Series code derivation and registry |
//! | [`year`] | First-appearance year extraction |
//! | [`classifier`] | Ordered category rules |
//! | [`allocator`] | Atomic per-series index allocation |
//! | [`pricing`] | Era buckets, popularity and price clamping |
//! | [`identity`] | Cross-provider deduplication |
//! | [`providers`] | Provider trait, rate limiting, bounded retry |
//! | [`builder`] | Per-entity mint-or-refresh |
//! | [`derivatives`] | Option, LEAP, bond and ETF synthesis |
//! | [`job`] | One full catalog run |
//! | [`store`] | Catalog store trait and in-memory store |
//! | [`db`] | PostgreSQL catalog store |
//! | [`config`] | TOML configuration |
//! | [`api`] | Route handlers and router configuration |
//! | [`error`] | Error taxonomy and API errors |
//! | [`models`] | Request/response DTOs with OpenAPI schemas |
//! | [`state`] | Application state management |
//!
//! ## API Endpoints
//!
//! | Method | Endpoint | Description |
//! |--------|----------|-------------|
//! | GET | `/health` | Health check |
//! | GET | `/api/v1/stats` | Catalog statistics |
//! | GET | `/api/v1/instruments` | List base instruments |
//! | GET | `/api/v1/instruments/{ticker}` | Base instrument details |
//! | GET | `/api/v1/instruments/{ticker}/derivatives` | Derivatives of a base |
//! | GET | `/api/v1/tickers/{ticker}` | Decompose a ticker |
//! | POST | `/api/v1/runs` | Start a catalog run |
//! | POST | `/api/v1/runs/cancel` | Cancel the current run |
//!
//! ## Example Usage
//!
//! ```bash
//! # In-memory catalog, run once at startup
//! CONFIG_PATH=catalog.toml cargo run
//!
//! # PostgreSQL catalog
//! DATABASE_URL=postgres://localhost/catalog CONFIG_PATH=catalog.toml cargo run
//!
//! # Trigger a run limited to one provider
//! curl -X POST http://localhost:8080/api/v1/runs \
//!   -H "Content-Type: application/json" \
//!   -d '{"providerQuotas": {"comicvine": 200}}'
//! ```

pub mod allocator;
pub mod api;
pub mod builder;
pub mod classifier;
pub mod config;
pub mod db;
pub mod derivatives;
pub mod error;
pub mod identity;
pub mod instrument;
pub mod job;
pub mod models;
pub mod pricing;
pub mod providers;
pub mod series_code;
pub mod state;
pub mod store;
pub mod ticker;
pub mod year;

//! Derivative synthesis: options, LEAPs, bonds and ETFs.
//!
//! Every function here is a pure function of the base catalog snapshot and
//! an explicit as-of date, so re-running synthesis on the same snapshot
//! yields identical derivative sets.

mod bonds;
mod etf;
mod options;

pub use bonds::synthesize_bonds;
pub use etf::{synthesize_etfs, theme_of};
pub use options::{expiries, strike_ladder, synthesize_leaps, synthesize_options};

use crate::instrument::{BaseInstrument, DerivativeInstrument, MonthCode};
use crate::ticker;
use chrono::NaiveDate;
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::warn;

/// Derivative generation parameters.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DerivativesConfig {
    /// Option strike offsets relative to the base price (5-9 entries).
    pub option_offsets: Vec<f64>,
    /// Number of upcoming option expiries (2-4).
    pub expiry_count: u32,
    /// Months between consecutive expiries.
    pub expiry_interval_months: u32,
    /// LEAP strike offsets (5-9 entries).
    pub leap_offsets: Vec<f64>,
    /// LEAP expiries, in years after the as-of year.
    pub leap_years_out: Vec<u16>,
    /// LEAP expiry month.
    pub leap_month: MonthCode,
    /// Bond coupon tiers in percent (1-3 entries, each in (0, 20)).
    pub bond_coupons: Vec<f64>,
    /// Bond maturity month.
    pub bond_maturity_month: MonthCode,
    /// Metadata path of the ETF theme tag; the publisher when unset.
    pub etf_tag_field: Option<String>,
    /// Fixed group codes per normalized theme (`marvel` → `MRV`).
    pub etf_groups: BTreeMap<String, String>,
    /// Minimum constituents for an ETF.
    pub etf_min_members: usize,
}

impl Default for DerivativesConfig {
    fn default() -> Self {
        Self {
            option_offsets: vec![-0.40, -0.20, -0.10, -0.05, 0.0, 0.05, 0.10, 0.20, 0.40],
            expiry_count: 3,
            expiry_interval_months: 3,
            leap_offsets: vec![-0.40, -0.20, 0.0, 0.20, 0.50],
            leap_years_out: vec![2],
            leap_month: MonthCode::Jan,
            bond_coupons: vec![3.0, 5.0, 8.0],
            bond_maturity_month: MonthCode::Dec,
            etf_tag_field: None,
            etf_groups: BTreeMap::from([
                ("marvel".to_string(), "MRV".to_string()),
                ("dc".to_string(), "DC".to_string()),
            ]),
            etf_min_members: 2,
        }
    }
}

/// Inputs that vary between runs but must be fixed within one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SynthesisContext {
    /// Date expiries and maturities are counted from.
    pub as_of: NaiveDate,
}

/// Derivatives for a whole catalog snapshot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SynthesisOutput {
    /// Options, LEAPs and bonds per base ticker.
    pub per_base: BTreeMap<String, Vec<DerivativeInstrument>>,
    /// ETFs across the snapshot.
    pub etfs: Vec<DerivativeInstrument>,
    /// Base tickers skipped because they no longer parse.
    pub skipped: Vec<String>,
}

impl SynthesisOutput {
    /// Total number of derivatives.
    #[must_use]
    pub fn len(&self) -> usize {
        self.per_base.values().map(Vec::len).sum::<usize>() + self.etfs.len()
    }

    /// Whether nothing was generated.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Generates derivative instruments from base instruments.
#[derive(Debug, Clone, Default)]
pub struct DerivativeSynthesizer {
    config: DerivativesConfig,
}

impl DerivativeSynthesizer {
    /// Creates a synthesizer.
    #[must_use]
    pub fn new(config: DerivativesConfig) -> Self {
        Self { config }
    }

    /// Options, LEAPs and bonds for one base instrument, ordered by ticker.
    #[must_use]
    pub fn synthesize_for_base(
        &self,
        base: &BaseInstrument,
        ctx: &SynthesisContext,
    ) -> Vec<DerivativeInstrument> {
        let mut out = synthesize_options(base, ctx, &self.config);
        out.extend(synthesize_leaps(base, ctx, &self.config));
        out.extend(synthesize_bonds(base, ctx, &self.config));
        out.sort_by(|a, b| a.ticker.cmp(&b.ticker));
        out.dedup_by(|a, b| a.ticker == b.ticker);
        out
    }

    /// ETFs over a snapshot.
    #[must_use]
    pub fn synthesize_etfs(&self, bases: &[BaseInstrument]) -> Vec<DerivativeInstrument> {
        synthesize_etfs(bases, &self.config)
    }

    /// Every derivative for a snapshot.
    ///
    /// Bases whose stored ticker no longer parses are reported as integrity
    /// warnings and left out, both of per-base generation and of ETF baskets.
    #[must_use]
    pub fn synthesize(&self, bases: &[BaseInstrument], ctx: &SynthesisContext) -> SynthesisOutput {
        let mut output = SynthesisOutput::default();
        let mut valid = Vec::with_capacity(bases.len());
        for base in bases {
            if let Err(e) = ticker::parse(&base.ticker) {
                warn!(ticker = %base.ticker, upstream_id = %base.upstream_id, error = %e, "Stored ticker failed integrity check");
                output.skipped.push(base.ticker.clone());
                continue;
            }
            output
                .per_base
                .insert(base.ticker.clone(), self.synthesize_for_base(base, ctx));
            valid.push(base.clone());
        }
        output.etfs = self.synthesize_etfs(&valid);
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::{Category, EntityType, SourceMetadata, stable_id};
    use rust_decimal_macros::dec;

    fn base(ticker: &str, series: &str) -> BaseInstrument {
        BaseInstrument {
            id: stable_id("base", ticker),
            upstream_id: format!("cv:{ticker}"),
            ticker: ticker.to_string(),
            series_code: series.to_string(),
            year: 1939,
            year_estimated: false,
            category: Category::Hero,
            index: 1,
            name: series.to_string(),
            entity_type: EntityType::Character,
            price: dec!(100),
            share_count: 1_000_000,
            source_metadata: SourceMetadata::new(),
        }
    }

    fn ctx() -> SynthesisContext {
        SynthesisContext {
            as_of: NaiveDate::from_ymd_opt(2024, 12, 1).unwrap(),
        }
    }

    #[test]
    fn test_synthesis_is_deterministic() {
        let synth = DerivativeSynthesizer::default();
        let bases = vec![base("BTMN.39.HER.1", "BTMN"), base("SPRM.38.HER.1", "SPRM")];
        let a = synth.synthesize(&bases, &ctx());
        let b = synth.synthesize(&bases, &ctx());
        assert_eq!(a, b);
        // 9 strikes × 3 expiries × 2 rights + 5 strikes × 2 rights + 3 bonds
        assert_eq!(a.per_base["BTMN.39.HER.1"].len(), 54 + 10 + 3);
    }

    #[test]
    fn test_malformed_base_skipped() {
        let synth = DerivativeSynthesizer::default();
        let bases = vec![base("BTMN.39.HER.1", "BTMN"), base("broken", "BRKN")];
        let out = synth.synthesize(&bases, &ctx());
        assert_eq!(out.skipped, vec!["broken".to_string()]);
        assert_eq!(out.per_base.len(), 1);
    }

    #[test]
    fn test_every_derivative_references_its_base() {
        let synth = DerivativeSynthesizer::default();
        let b = base("BTMN.39.HER.1", "BTMN");
        for d in synth.synthesize_for_base(&b, &ctx()) {
            assert_eq!(d.base_ticker, "BTMN.39.HER.1");
            assert!(ticker::parse_derivative(&d.ticker).is_ok(), "{}", d.ticker);
        }
    }
}

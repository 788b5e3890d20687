//! Era-aware banded pricing and covariant share counts.
//!
//! `raw = era.base_price × popularity_weight`, clamped into
//! [`MIN_PRICE`, `MAX_PRICE`]; `shares = round(capitalization / price)`
//! with a floor of one share. Older eras carry a higher base price and a
//! lower capitalization target, so they end up with fewer, pricier shares.

use crate::instrument::{Category, ResolvedEntity};
use crate::year::ExtractedYear;
use rust_decimal::Decimal;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Lower bound of the global price band, USD.
pub const MIN_PRICE: Decimal = dec!(50);
/// Upper bound of the global price band, USD.
pub const MAX_PRICE: Decimal = dec!(6000);

/// Neutral popularity score used when no provider reports anything.
const DEFAULT_POPULARITY: f64 = 50.0;
const MIN_WEIGHT: f64 = 0.5;
const MAX_WEIGHT: f64 = 2.0;
/// Allowed relative deviation of `price × shares` from the target.
const CAP_TOLERANCE: Decimal = dec!(0.5);

/// A historical range with baseline pricing parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EraBucket {
    /// Bucket name, referenced by `run.default_era`.
    pub name: String,
    /// First year (inclusive); open-ended when absent.
    #[serde(default)]
    pub start_year: Option<u16>,
    /// Last year (inclusive); open-ended when absent.
    #[serde(default)]
    pub end_year: Option<u16>,
    /// Base price midpoint, USD.
    pub base_price: f64,
    /// Base capitalization target, USD.
    pub capitalization: f64,
    /// Year stamped on entities whose first appearance is unknown.
    pub representative_year: u16,
}

impl EraBucket {
    /// Whether `year` falls inside this bucket.
    #[must_use]
    pub fn contains(&self, year: u16) -> bool {
        self.start_year.is_none_or(|s| year >= s) && self.end_year.is_none_or(|e| year <= e)
    }
}

/// Pricing configuration section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PricingConfig {
    /// Era buckets, oldest first.
    pub eras: Vec<EraBucket>,
    /// Capitalization multiplier per category code (`HER`, `VIL`, ...).
    pub category_multipliers: BTreeMap<String, f64>,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            eras: default_eras(),
            category_multipliers: default_category_multipliers(),
        }
    }
}

fn era(name: &str, start: Option<u16>, end: Option<u16>, price: f64, cap: f64, rep: u16) -> EraBucket {
    EraBucket {
        name: name.to_string(),
        start_year: start,
        end_year: end,
        base_price: price,
        capitalization: cap,
        representative_year: rep,
    }
}

/// Golden, Silver/Bronze, Copper and Modern age buckets.
#[must_use]
pub fn default_eras() -> Vec<EraBucket> {
    vec![
        era("golden", None, Some(1959), 1800.0, 90_000_000.0, 1950),
        era("silver_bronze", Some(1960), Some(1984), 600.0, 120_000_000.0, 1972),
        era("copper", Some(1985), Some(1999), 180.0, 150_000_000.0, 1992),
        era("modern", Some(2000), None, 75.0, 180_000_000.0, 2010),
    ]
}

/// Default capitalization multipliers.
#[must_use]
pub fn default_category_multipliers() -> BTreeMap<String, f64> {
    [
        (Category::Hero, 1.0),
        (Category::Villain, 0.8),
        (Category::Gadget, 0.5),
        (Category::Location, 0.4),
        (Category::KeyIssue, 0.6),
        (Category::Sidekick, 0.5),
        (Category::Henchman, 0.3),
        (Category::Team, 1.2),
        (Category::CreatorWriter, 0.7),
        (Category::CreatorArtist, 0.7),
        (Category::Publisher, 2.0),
        (Category::Other, 0.3),
    ]
    .into_iter()
    .map(|(c, m)| (c.code().to_string(), m))
    .collect()
}

/// Capitalization band implied by era and category.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CapTier {
    /// Target capitalization.
    pub target: Decimal,
    /// Lower bound (inclusive).
    pub low: Decimal,
    /// Upper bound (inclusive).
    pub high: Decimal,
}

impl CapTier {
    fn around(target: Decimal) -> Self {
        Self {
            target,
            low: target * (Decimal::ONE - CAP_TOLERANCE),
            high: target * (Decimal::ONE + CAP_TOLERANCE),
        }
    }

    /// Whether a market capitalization lies within the tier.
    #[must_use]
    pub fn contains(&self, market_cap: Decimal) -> bool {
        market_cap >= self.low && market_cap <= self.high
    }
}

/// Result of pricing one instrument.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceQuote {
    /// Banded price, two decimal places.
    pub price: Decimal,
    /// Outstanding shares, at least 1.
    pub share_count: u64,
    /// Pre-clamp price.
    pub raw_price: Decimal,
    /// Era bucket that supplied the parameters.
    pub era: String,
    /// Popularity score, 1..=100.
    pub popularity: u8,
    /// Capitalization band the quote was sized against.
    pub tier: CapTier,
}

/// Computes price and share count for base instruments.
#[derive(Debug, Clone)]
pub struct PricingEngine {
    eras: Vec<EraBucket>,
    default_era: usize,
    multipliers: BTreeMap<Category, f64>,
}

impl PricingEngine {
    /// Creates an engine; `default_era` must name one of `config.eras`.
    ///
    /// # Errors
    /// Returns a description of the problem when the default era is unknown.
    pub fn new(config: &PricingConfig, default_era: &str) -> Result<Self, String> {
        let default_era = config
            .eras
            .iter()
            .position(|e| e.name == default_era)
            .ok_or_else(|| format!("default era '{default_era}' is not configured"))?;
        let multipliers = config
            .category_multipliers
            .iter()
            .filter_map(|(code, m)| Category::from_code(code).map(|c| (c, *m)))
            .collect();
        Ok(Self {
            eras: config.eras.clone(),
            default_era,
            multipliers,
        })
    }

    /// The bucket used when a year is unknown or falls outside every bucket.
    #[must_use]
    pub fn default_era(&self) -> &EraBucket {
        &self.eras[self.default_era]
    }

    /// Bucket for a year.
    #[must_use]
    pub fn era_for(&self, year: u16) -> &EraBucket {
        self.eras
            .iter()
            .find(|e| e.contains(year))
            .unwrap_or_else(|| self.default_era())
    }

    /// Turns an extraction result into `(year, estimated)`.
    #[must_use]
    pub fn resolve_year(&self, year: ExtractedYear) -> (u16, bool) {
        match year {
            ExtractedYear::Known(y) => (y, false),
            ExtractedYear::Unknown => (self.default_era().representative_year, true),
        }
    }

    /// Capitalization band for a category in a year.
    #[must_use]
    pub fn cap_tier(&self, category: Category, year: u16) -> CapTier {
        let multiplier = self.multipliers.get(&category).copied().unwrap_or(1.0);
        let target = self.era_for(year).capitalization * multiplier;
        CapTier::around(Decimal::from_f64(target).unwrap_or(Decimal::ZERO).round())
    }

    /// Prices an entity.
    #[must_use]
    pub fn price(&self, entity: &ResolvedEntity, category: Category, year: u16) -> PriceQuote {
        let era = self.era_for(year);
        let popularity = popularity_score(entity);
        let raw = era.base_price * popularity_weight(popularity);
        let raw_price = Decimal::from_f64(raw).unwrap_or(Decimal::ZERO);
        let tier = self.cap_tier(category, year);
        let price = clamp_price(raw_price);
        PriceQuote {
            price,
            share_count: share_count(tier.target, price),
            raw_price,
            era: era.name.clone(),
            popularity,
            tier,
        }
    }
}

/// Clamps into the global band and rounds to cents.
#[must_use]
pub fn clamp_price(raw: Decimal) -> Decimal {
    raw.clamp(MIN_PRICE, MAX_PRICE).round_dp(2)
}

/// `round(target / price)`, never below one share.
#[must_use]
pub fn share_count(target: Decimal, price: Decimal) -> u64 {
    if price <= Decimal::ZERO {
        return 1;
    }
    (target / price).round().to_u64().unwrap_or(1).max(1)
}

/// Maps a 1..=100 score linearly onto [0.5, 2.0].
#[must_use]
pub fn popularity_weight(score: u8) -> f64 {
    let s = f64::from(score.clamp(1, 100)) / 100.0;
    (MIN_WEIGHT + s * (MAX_WEIGHT - MIN_WEIGHT)).clamp(MIN_WEIGHT, MAX_WEIGHT)
}

/// Popularity score in 1..=100 from whatever the providers report.
///
/// An explicit `popularity` field wins. Otherwise each provider's counts
/// produce a score and the best one is used, plus a bonus for the two
/// major publishers.
#[must_use]
pub fn popularity_score(entity: &ResolvedEntity) -> u8 {
    let mut best: Option<f64> = None;
    let mut major_publisher = false;

    for (provider, meta) in &entity.sources {
        if let Some(p) = meta.get("popularity").and_then(number) {
            return p.clamp(1.0, 100.0).round() as u8;
        }

        let score = match provider.as_str() {
            "marvel" => {
                let comics = path_number(meta, &["comics", "available"]).unwrap_or(0.0);
                let series = path_number(meta, &["series", "available"]).unwrap_or(0.0);
                Some(60.0 + (comics / 20.0).min(20.0) + (series / 5.0).min(15.0))
            }
            "superhero" => meta.get("powerstats").and_then(Value::as_object).map(|stats| {
                let total: f64 = stats.values().filter_map(number).sum();
                55.0 + (total / 30.0).min(25.0)
            }),
            _ => meta
                .get("count_of_issue_appearances")
                .and_then(number)
                .map(|n| DEFAULT_POPULARITY + (n / 10.0).min(30.0)),
        };
        if let Some(s) = score {
            best = Some(best.map_or(s, |b: f64| b.max(s)));
        }

        let publisher = meta
            .get("publisher")
            .and_then(|p| p.as_str().or_else(|| p.get("name").and_then(Value::as_str)))
            .or_else(|| {
                meta.get("biography")
                    .and_then(|b| b.get("publisher"))
                    .and_then(Value::as_str)
            })
            .unwrap_or_default()
            .to_ascii_lowercase();
        if publisher.contains("marvel") || publisher.starts_with("dc") {
            major_publisher = true;
        }
    }

    let mut score = best.unwrap_or(DEFAULT_POPULARITY);
    if major_publisher {
        score += 15.0;
    }
    score.clamp(1.0, 100.0).round() as u8
}

fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn path_number(meta: &crate::instrument::Metadata, path: &[&str]) -> Option<f64> {
    let (first, rest) = path.split_first()?;
    let mut value = meta.get(*first)?;
    for part in rest {
        value = value.get(*part)?;
    }
    number(value)
}

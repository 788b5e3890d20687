//! Core catalog types: raw entities, base instruments and derivatives.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Opaque per-provider metadata bag, exactly as the provider returned it.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Metadata of a (possibly merged) entity, keyed by provider name.
pub type SourceMetadata = BTreeMap<String, Metadata>;

/// Kind of real-world entity an upstream record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    /// Comic character.
    Character,
    /// Writer, artist or other creator.
    Creator,
    /// Single comic issue.
    Issue,
    /// Fictional location.
    Location,
    /// Team or group of characters.
    Team,
    /// Object, weapon or gadget.
    Object,
    /// Publishing house.
    Publisher,
    /// Anything else.
    #[serde(other)]
    Other,
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Character => "character",
            Self::Creator => "creator",
            Self::Issue => "issue",
            Self::Location => "location",
            Self::Team => "team",
            Self::Object => "object",
            Self::Publisher => "publisher",
            Self::Other => "other",
        };
        f.write_str(s)
    }
}

impl FromStr for EntityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "character" => Ok(Self::Character),
            "creator" => Ok(Self::Creator),
            "issue" => Ok(Self::Issue),
            "location" => Ok(Self::Location),
            "team" => Ok(Self::Team),
            "object" => Ok(Self::Object),
            "publisher" => Ok(Self::Publisher),
            "other" => Ok(Self::Other),
            other => Err(format!("unknown entity type: {other}")),
        }
    }
}

/// Closed category set. The ticker code of a category is part of the ticker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Category {
    /// Heroic character.
    Hero,
    /// Villainous character.
    Villain,
    /// Object or gadget.
    Gadget,
    /// Location.
    Location,
    /// Key comic issue.
    KeyIssue,
    /// Sidekick character.
    Sidekick,
    /// Henchman or minion.
    Henchman,
    /// Team or group.
    Team,
    /// Writer.
    CreatorWriter,
    /// Artist (penciller, inker, colorist, ...).
    CreatorArtist,
    /// Publisher.
    Publisher,
    /// Anything unclassifiable.
    Other,
}

impl Category {
    /// All categories in declaration order.
    pub const ALL: [Category; 12] = [
        Self::Hero,
        Self::Villain,
        Self::Gadget,
        Self::Location,
        Self::KeyIssue,
        Self::Sidekick,
        Self::Henchman,
        Self::Team,
        Self::CreatorWriter,
        Self::CreatorArtist,
        Self::Publisher,
        Self::Other,
    ];

    /// Ticker segment for this category (2-4 uppercase letters).
    #[must_use]
    pub fn code(self) -> &'static str {
        match self {
            Self::Hero => "HER",
            Self::Villain => "VIL",
            Self::Gadget => "GAD",
            Self::Location => "LOC",
            Self::KeyIssue => "KEY",
            Self::Sidekick => "SDK",
            Self::Henchman => "HNC",
            Self::Team => "TEAM",
            Self::CreatorWriter => "WRT",
            Self::CreatorArtist => "ART",
            Self::Publisher => "PUB",
            Self::Other => "OTH",
        }
    }

    /// Looks up a category by its ticker segment.
    #[must_use]
    pub fn from_code(code: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.code() == code)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Raw entity record as returned by an upstream metadata provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEntity {
    /// Provider that produced this record. Filled in by the fetcher when absent.
    #[serde(default)]
    pub provider: String,
    /// Identifier in the provider's own scheme.
    pub upstream_id: String,
    /// Display name. Records without a usable name are skipped.
    #[serde(default)]
    pub name: Option<String>,
    /// Entity type.
    pub entity_type: EntityType,
    /// Provider-specific metadata.
    #[serde(default)]
    pub metadata: Metadata,
}

impl RawEntity {
    /// Stable key of this record in its provider's namespace.
    #[must_use]
    pub fn source_key(&self) -> String {
        format!("{}:{}", self.provider, self.upstream_id)
    }

    /// Trimmed display name, if present and non-empty.
    #[must_use]
    pub fn display_name(&self) -> Option<&str> {
        self.name.as_deref().map(str::trim).filter(|n| !n.is_empty())
    }
}

/// A deduplicated entity ready for minting.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedEntity {
    /// Stable key used for idempotent upserts (most authoritative member).
    pub key: String,
    /// Every member key, most authoritative first.
    pub alias_keys: Vec<String>,
    /// Display name of the most authoritative member with a name.
    pub name: Option<String>,
    /// Entity type.
    pub entity_type: EntityType,
    /// Merged metadata, one bag per contributing provider.
    pub sources: SourceMetadata,
}

impl ResolvedEntity {
    /// Iterates metadata bags, most authoritative provider first.
    pub fn metadata_in<'a>(
        &'a self,
        priority: &'a [String],
    ) -> impl Iterator<Item = (&'a str, &'a Metadata)> + 'a {
        let ranked = priority
            .iter()
            .filter_map(|p| self.sources.get_key_value(p.as_str()));
        let rest = self
            .sources
            .iter()
            .filter(move |(p, _)| !priority.iter().any(|q| q == *p));
        ranked.chain(rest).map(|(p, m)| (p.as_str(), m))
    }
}

/// A primary synthetic instrument for one catalogued entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaseInstrument {
    /// Identifier derived from the upstream key.
    pub id: Uuid,
    /// Stable upstream key this instrument was minted for.
    pub upstream_id: String,
    /// `SERIES.YY.CAT.INDEX`.
    pub ticker: String,
    /// Series code segment.
    pub series_code: String,
    /// Four-digit first-appearance year.
    pub year: u16,
    /// Whether `year` came from the default era bucket rather than metadata.
    pub year_estimated: bool,
    /// Category.
    pub category: Category,
    /// Per-(series, year, category) index, starting at 1.
    pub index: u64,
    /// Display name.
    pub name: String,
    /// Entity type.
    pub entity_type: EntityType,
    /// Price in USD, two decimal places, within the global band.
    pub price: Decimal,
    /// Outstanding shares, at least 1.
    pub share_count: u64,
    /// Upstream metadata, per provider.
    pub source_metadata: SourceMetadata,
}

impl BaseInstrument {
    /// Market capitalization (`price × shareCount`).
    #[must_use]
    pub fn market_cap(&self) -> Decimal {
        self.price * Decimal::from(self.share_count)
    }
}

/// Three-letter month code used in derivative tickers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MonthCode {
    Jan,
    Feb,
    Mar,
    Apr,
    May,
    Jun,
    Jul,
    Aug,
    Sep,
    Oct,
    Nov,
    Dec,
}

impl MonthCode {
    const ALL: [MonthCode; 12] = [
        Self::Jan,
        Self::Feb,
        Self::Mar,
        Self::Apr,
        Self::May,
        Self::Jun,
        Self::Jul,
        Self::Aug,
        Self::Sep,
        Self::Oct,
        Self::Nov,
        Self::Dec,
    ];

    /// Month from its 1-based calendar number.
    #[must_use]
    pub fn from_number(month: u32) -> Option<Self> {
        let idx = usize::try_from(month).ok()?.checked_sub(1)?;
        Self::ALL.get(idx).copied()
    }

    /// 1-based calendar number.
    #[must_use]
    pub fn number(self) -> u32 {
        self as u32 + 1
    }

    /// Ticker segment (`JAN` .. `DEC`).
    #[must_use]
    pub fn code(self) -> &'static str {
        match self {
            Self::Jan => "JAN",
            Self::Feb => "FEB",
            Self::Mar => "MAR",
            Self::Apr => "APR",
            Self::May => "MAY",
            Self::Jun => "JUN",
            Self::Jul => "JUL",
            Self::Aug => "AUG",
            Self::Sep => "SEP",
            Self::Oct => "OCT",
            Self::Nov => "NOV",
            Self::Dec => "DEC",
        }
    }
}

impl fmt::Display for MonthCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for MonthCode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|m| m.code().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("invalid month code: {s}"))
    }
}

/// Call or put.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum OptionRight {
    /// Call option (`C`).
    #[serde(rename = "C")]
    Call,
    /// Put option (`P`).
    #[serde(rename = "P")]
    Put,
}

impl OptionRight {
    /// Ticker segment.
    #[must_use]
    pub fn code(self) -> &'static str {
        match self {
            Self::Call => "C",
            Self::Put => "P",
        }
    }
}

impl fmt::Display for OptionRight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Derivative kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DerivativeKind {
    Option,
    Leap,
    Bond,
    Etf,
}

impl fmt::Display for DerivativeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Option => "option",
            Self::Leap => "leap",
            Self::Bond => "bond",
            Self::Etf => "etf",
        };
        f.write_str(s)
    }
}

impl FromStr for DerivativeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "option" => Ok(Self::Option),
            "leap" => Ok(Self::Leap),
            "bond" => Ok(Self::Bond),
            "etf" => Ok(Self::Etf),
            other => Err(format!("unknown derivative kind: {other}")),
        }
    }
}

/// One constituent of an ETF basket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasketWeight {
    /// Constituent base ticker.
    pub ticker: String,
    /// Weight in [0, 1]; weights of a basket sum to 1.
    pub weight: f64,
}

/// A secondary instrument referencing a base instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivativeInstrument {
    /// Identifier derived from the ticker.
    pub id: Uuid,
    /// Derivative ticker.
    pub ticker: String,
    /// Referenced base ticker. For ETFs, the largest constituent.
    pub base_ticker: String,
    /// Kind.
    pub kind: DerivativeKind,
    /// Strike in whole dollars (options and LEAPs).
    pub strike: Option<Decimal>,
    /// Call or put (options and LEAPs).
    pub right: Option<OptionRight>,
    /// Expiry or maturity month.
    pub expiry_month: Option<MonthCode>,
    /// Expiry or maturity year.
    pub expiry_year: Option<u16>,
    /// Coupon rate in percent (bonds).
    pub coupon_rate: Option<Decimal>,
    /// Basket constituents (ETFs).
    pub basket_weights: Option<Vec<BasketWeight>>,
}

/// Derives a UUID from a namespace and a stable key.
///
/// The same inputs always produce the same id, which keeps re-runs idempotent.
#[must_use]
pub fn stable_id(namespace: &str, key: &str) -> Uuid {
    let mut hasher = Sha256::new();
    hasher.update(namespace.as_bytes());
    hasher.update(b":");
    hasher.update(key.as_bytes());
    let digest = hasher.finalize();
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    Uuid::from_bytes(bytes)
}

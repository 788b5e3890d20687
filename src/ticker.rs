//! Ticker grammars.
//!
//! ```text
//! base ticker:   SERIES.YY.CAT.INDEX              BTMN.39.HER.1
//! option:        BASE.MON.YYYY.STRIKE.{C|P}       BTMN.JAN.2025.100.C
//! LEAP:          BASE.MON.YYYY.STRIKE.{C|P}.LEAP  BTMN.JAN.2026.150.C.LEAP
//! bond:          BASE.MON.YYYY.RATE               BTMN.DEC.2025.5.0
//! ETF:           GROUP.ETF                        MRV.ETF
//! ```
//!
//! `SERIES` is 1-6 uppercase letters, optionally followed by a numeric
//! disambiguator (`BTM2`). Every function here is pure and total.

use crate::error::CatalogError;
use crate::instrument::{Category, MonthCode, OptionRight};
use rust_decimal::Decimal;
use std::fmt;


/// Largest numeric disambiguator a series code may carry.
pub const MAX_DISAMBIGUATOR: u32 = 99;

/// Two-digit year segment of a base ticker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct YearCode(u8);

impl YearCode {
    /// Year code of a four-digit year.
    #[must_use]
    pub fn from_year(year: u16) -> Self {
        Self((year % 100) as u8)
    }

    /// Raw two-digit value.
    #[must_use]
    pub fn value(self) -> u8 {
        self.0
    }

    /// Expands to a four-digit year: codes up to the pivot's own two digits
    /// land in the pivot's century, later codes in the century before.
    #[must_use]
    pub fn expand(self, pivot_year: u16) -> u16 {
        let century = pivot_year - pivot_year % 100;
        let candidate = century + u16::from(self.0);
        if candidate > pivot_year {
            candidate.saturating_sub(100)
        } else {
            candidate
        }
    }
}

impl fmt::Display for YearCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}", self.0)
    }
}

/// Components of a base ticker.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BaseTicker {
    /// Series code segment.
    pub series_code: String,
    /// Two-digit year segment.
    pub year: YearCode,
    /// Category segment.
    pub category: Category,
    /// Index segment, starting at 1.
    pub index: u64,
}

impl BaseTicker {
    /// Validates and assembles base ticker components.
    ///
    /// # Errors
    /// Returns [`CatalogError::MalformedTicker`] if the series code is invalid
    /// or the index is zero.
    pub fn new(
        series_code: &str,
        year: u16,
        category: Category,
        index: u64,
    ) -> Result<Self, CatalogError> {
        if !is_valid_series_code(series_code) {
            return Err(CatalogError::malformed(
                series_code,
                "series code must be 1-6 uppercase letters with an optional 2-99 suffix",
            ));
        }
        if index == 0 {
            return Err(CatalogError::malformed(series_code, "index must be positive"));
        }
        Ok(Self {
            series_code: series_code.to_string(),
            year: YearCode::from_year(year),
            category,
            index,
        })
    }
}

impl fmt::Display for BaseTicker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}",
            self.series_code,
            self.year,
            self.category.code(),
            self.index
        )
    }
}

/// Composes a base ticker string.
///
/// # Errors
/// See [`BaseTicker::new`].
pub fn compose(
    series_code: &str,
    year: u16,
    category: Category,
    index: u64,
) -> Result<String, CatalogError> {
    BaseTicker::new(series_code, year, category, index).map(|t| t.to_string())
}

/// Parses a base ticker string.
///
/// # Errors
/// Returns [`CatalogError::MalformedTicker`] on any deviation from the grammar.
pub fn parse(ticker: &str) -> Result<BaseTicker, CatalogError> {
    let segments: Vec<&str> = ticker.split('.').collect();
    let [series, yy, cat, index] = segments.as_slice() else {
        return Err(CatalogError::malformed(ticker, "expected 4 segments"));
    };

    if !is_valid_series_code(series) {
        return Err(CatalogError::malformed(ticker, "invalid series code"));
    }

    if yy.len() != 2 || !is_digits(yy) {
        return Err(CatalogError::malformed(ticker, "year must be 2 digits"));
    }
    let year = yy
        .parse::<u8>()
        .map_err(|e| CatalogError::malformed(ticker, e.to_string()))?;

    if !(2..=4).contains(&cat.len()) || !cat.bytes().all(|b| b.is_ascii_uppercase()) {
        return Err(CatalogError::malformed(ticker, "category must be 2-4 letters"));
    }
    let category = Category::from_code(cat)
        .ok_or_else(|| CatalogError::malformed(ticker, format!("unknown category {cat}")))?;

    let index = parse_positive(index)
        .ok_or_else(|| CatalogError::malformed(ticker, "index must be a positive integer"))?;

    Ok(BaseTicker {
        series_code: (*series).to_string(),
        year: YearCode(year),
        category,
        index,
    })
}

/// Components of a derivative ticker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DerivativeTicker {
    /// Option or LEAP.
    Option {
        /// Series code of the base instrument.
        series_code: String,
        /// Expiry month.
        month: MonthCode,
        /// Expiry year.
        year: u16,
        /// Strike in whole dollars.
        strike: u64,
        /// Call or put.
        right: OptionRight,
        /// `.LEAP` suffix present.
        leap: bool,
    },
    /// Bond.
    Bond {
        /// Series code of the base instrument.
        series_code: String,
        /// Maturity month.
        month: MonthCode,
        /// Maturity year.
        year: u16,
        /// Coupon rate in percent, one decimal place.
        coupon_rate: Decimal,
    },
    /// ETF.
    Etf {
        /// Group code.
        group: String,
    },
}

/// Composes an option (or LEAP) ticker.
#[must_use]
pub fn compose_option(
    series_code: &str,
    month: MonthCode,
    year: u16,
    strike: u64,
    right: OptionRight,
    leap: bool,
) -> String {
    let base = format!("{series_code}.{month}.{year}.{strike}.{right}");
    if leap { format!("{base}.LEAP") } else { base }
}

/// Composes a bond ticker. The rate is written with one decimal place.
#[must_use]
pub fn compose_bond(series_code: &str, month: MonthCode, year: u16, coupon_rate: Decimal) -> String {
    format!("{series_code}.{month}.{year}.{}", format_rate(coupon_rate))
}

/// Composes an ETF ticker.
#[must_use]
pub fn compose_etf(group: &str) -> String {
    format!("{group}.ETF")
}

/// Parses any derivative ticker.
///
/// # Errors
/// Returns [`CatalogError::MalformedTicker`] on any deviation from the grammars.
pub fn parse_derivative(ticker: &str) -> Result<DerivativeTicker, CatalogError> {
    let segments: Vec<&str> = ticker.split('.').collect();
    match segments.as_slice() {
        [group, "ETF"] => {
            if is_valid_series_code(group) {
                Ok(DerivativeTicker::Etf {
                    group: (*group).to_string(),
                })
            } else {
                Err(CatalogError::malformed(ticker, "invalid ETF group code"))
            }
        }
        [series, mon, yyyy, strike, right, "LEAP"] => {
            parse_option(ticker, series, mon, yyyy, strike, right, true)
        }
        [series, mon, yyyy, strike, right @ ("C" | "P")] => {
            parse_option(ticker, series, mon, yyyy, strike, right, false)
        }
        [series, mon, yyyy, whole, frac] => {
            let (series_code, month, year) = parse_prefix(ticker, series, mon, yyyy)?;
            if whole.is_empty() || !is_digits(whole) || frac.len() != 1 || !is_digits(frac) {
                return Err(CatalogError::malformed(ticker, "invalid coupon rate"));
            }
            let coupon_rate: Decimal = format!("{whole}.{frac}")
                .parse()
                .map_err(|_| CatalogError::malformed(ticker, "invalid coupon rate"))?;
            if format_rate(coupon_rate) != format!("{whole}.{frac}") {
                return Err(CatalogError::malformed(ticker, "non-canonical coupon rate"));
            }
            Ok(DerivativeTicker::Bond {
                series_code,
                month,
                year,
                coupon_rate,
            })
        }
        _ => Err(CatalogError::malformed(ticker, "unrecognised derivative grammar")),
    }
}

fn parse_option(
    ticker: &str,
    series: &str,
    mon: &str,
    yyyy: &str,
    strike: &str,
    right: &str,
    leap: bool,
) -> Result<DerivativeTicker, CatalogError> {
    let (series_code, month, year) = parse_prefix(ticker, series, mon, yyyy)?;
    let strike = parse_positive(strike)
        .ok_or_else(|| CatalogError::malformed(ticker, "strike must be a positive integer"))?;
    let right = match right {
        "C" => OptionRight::Call,
        "P" => OptionRight::Put,
        _ => return Err(CatalogError::malformed(ticker, "option right must be C or P")),
    };
    Ok(DerivativeTicker::Option {
        series_code,
        month,
        year,
        strike,
        right,
        leap,
    })
}

fn parse_prefix(
    ticker: &str,
    series: &str,
    mon: &str,
    yyyy: &str,
) -> Result<(String, MonthCode, u16), CatalogError> {
    if !is_valid_series_code(series) {
        return Err(CatalogError::malformed(ticker, "invalid series code"));
    }
    if mon.len() != 3 || !mon.bytes().all(|b| b.is_ascii_uppercase()) {
        return Err(CatalogError::malformed(ticker, "month must be 3 uppercase letters"));
    }
    let month = mon
        .parse::<MonthCode>()
        .map_err(|e| CatalogError::malformed(ticker, e))?;
    if yyyy.len() != 4 || !is_digits(yyyy) || yyyy.starts_with('0') {
        return Err(CatalogError::malformed(ticker, "year must be 4 digits"));
    }
    let year = yyyy
        .parse::<u16>()
        .map_err(|e| CatalogError::malformed(ticker, e.to_string()))?;
    Ok((series.to_string(), month, year))
}

/// Checks the series-code grammar: `[A-Z]{1,6}` plus an optional `2..=99` suffix.
#[must_use]
pub fn is_valid_series_code(code: &str) -> bool {
    let letters = code.bytes().take_while(u8::is_ascii_uppercase).count();
    if !(1..=6).contains(&letters) {
        return false;
    }
    let suffix = &code[letters..];
    if suffix.is_empty() {
        return true;
    }
    if !is_digits(suffix) || suffix.starts_with('0') {
        return false;
    }
    suffix
        .parse::<u32>()
        .is_ok_and(|n| (2..=MAX_DISAMBIGUATOR).contains(&n))
}

fn format_rate(rate: Decimal) -> String {
    let mut rounded = rate.round_dp(1);
    rounded.rescale(1);
    rounded.to_string()
}

fn is_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

fn parse_positive(s: &str) -> Option<u64> {
    if !is_digits(s) || s.starts_with('0') {
        return None;
    }
    s.parse::<u64>().ok().filter(|n| *n > 0)
}

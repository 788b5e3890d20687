//! Option and LEAP strike ladders and expiry schedules.

use super::{DerivativesConfig, SynthesisContext};
use crate::instrument::{
    BaseInstrument, DerivativeInstrument, DerivativeKind, MonthCode, OptionRight, stable_id,
};
use crate::ticker::compose_option;
use chrono::Datelike;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal, RoundingStrategy};

const RIGHTS: [OptionRight; 2] = [OptionRight::Call, OptionRight::Put];

/// Whole-dollar strikes at `price × (1 + offset)`, ascending, deduplicated,
/// strictly positive.
#[must_use]
pub fn strike_ladder(price: Decimal, offsets: &[f64]) -> Vec<u64> {
    let mut strikes: Vec<u64> = offsets
        .iter()
        .filter_map(|offset| Decimal::from_f64(1.0 + offset))
        .filter_map(|factor| {
            (price * factor)
                .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
                .to_u64()
        })
        .filter(|strike| *strike > 0)
        .collect();
    strikes.sort_unstable();
    strikes.dedup();
    strikes
}

/// The `count` expiries spaced `interval` months apart, starting one
/// interval after the as-of month.
#[must_use]
pub fn expiries(ctx: &SynthesisContext, count: u32, interval: u32) -> Vec<(MonthCode, u16)> {
    let start = ctx.as_of.year() * 12 + ctx.as_of.month0() as i32;
    (1..=count)
        .filter_map(|k| {
            let months = start + (k * interval) as i32;
            let year = u16::try_from(months.div_euclid(12)).ok()?;
            let month = MonthCode::from_number(months.rem_euclid(12) as u32 + 1)?;
            Some((month, year))
        })
        .collect()
}

fn option(
    base: &BaseInstrument,
    month: MonthCode,
    year: u16,
    strike: u64,
    right: OptionRight,
    leap: bool,
) -> DerivativeInstrument {
    let ticker = compose_option(&base.series_code, month, year, strike, right, leap);
    DerivativeInstrument {
        id: stable_id("derivative", &ticker),
        ticker,
        base_ticker: base.ticker.clone(),
        kind: if leap {
            DerivativeKind::Leap
        } else {
            DerivativeKind::Option
        },
        strike: Some(Decimal::from(strike)),
        right: Some(right),
        expiry_month: Some(month),
        expiry_year: Some(year),
        coupon_rate: None,
        basket_weights: None,
    }
}

/// Standard options: ladder × expiries × {call, put}.
#[must_use]
pub fn synthesize_options(
    base: &BaseInstrument,
    ctx: &SynthesisContext,
    config: &DerivativesConfig,
) -> Vec<DerivativeInstrument> {
    let strikes = strike_ladder(base.price, &config.option_offsets);
    let mut out = Vec::new();
    for (month, year) in expiries(ctx, config.expiry_count, config.expiry_interval_months) {
        if year < base.year {
            continue;
        }
        for &strike in &strikes {
            for right in RIGHTS {
                out.push(option(base, month, year, strike, right, false));
            }
        }
    }
    out
}

/// LEAPs: long-dated expiries at least a year past the base year.
#[must_use]
pub fn synthesize_leaps(
    base: &BaseInstrument,
    ctx: &SynthesisContext,
    config: &DerivativesConfig,
) -> Vec<DerivativeInstrument> {
    let strikes = strike_ladder(base.price, &config.leap_offsets);
    let as_of_year = u16::try_from(ctx.as_of.year()).unwrap_or(u16::MAX);
    let mut out = Vec::new();
    for &years_out in &config.leap_years_out {
        let year = as_of_year.saturating_add(years_out);
        if year < base.year.saturating_add(1) {
            continue;
        }
        for &strike in &strikes {
            for right in RIGHTS {
                out.push(option(base, config.leap_month, year, strike, right, true));
            }
        }
    }
    out
}

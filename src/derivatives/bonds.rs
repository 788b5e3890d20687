//! Corporate bond synthesis: one bond per coupon tier, maturing a year apart.

use super::{DerivativesConfig, SynthesisContext};
use crate::instrument::{BaseInstrument, DerivativeInstrument, DerivativeKind, stable_id};
use crate::ticker::compose_bond;
use chrono::Datelike;
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal::prelude::FromPrimitive;

/// One bond per coupon tier; tier `i` matures `i + 1` years after the as-of year.
#[must_use]
pub fn synthesize_bonds(
    base: &BaseInstrument,
    ctx: &SynthesisContext,
    config: &DerivativesConfig,
) -> Vec<DerivativeInstrument> {
    let as_of_year = u16::try_from(ctx.as_of.year()).unwrap_or(u16::MAX);
    config
        .bond_coupons
        .iter()
        .zip(1u16..)
        .filter_map(|(&rate, years_out)| {
            let coupon = Decimal::from_f64(rate)?
                .round_dp_with_strategy(1, RoundingStrategy::MidpointAwayFromZero);
            if coupon <= Decimal::ZERO || coupon >= Decimal::from(20) {
                return None;
            }
            let year = as_of_year.saturating_add(years_out);
            let ticker = compose_bond(&base.series_code, config.bond_maturity_month, year, coupon);
            Some(DerivativeInstrument {
                id: stable_id("derivative", &ticker),
                ticker,
                base_ticker: base.ticker.clone(),
                kind: DerivativeKind::Bond,
                strike: None,
                right: None,
                expiry_month: Some(config.bond_maturity_month),
                expiry_year: Some(year),
                coupon_rate: Some(coupon),
                basket_weights: None,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::{Category, EntityType, MonthCode, SourceMetadata};
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn batman() -> BaseInstrument {
        BaseInstrument {
            id: stable_id("base", "cv:1699"),
            upstream_id: "cv:1699".to_string(),
            ticker: "BTMN.39.HER.1".to_string(),
            series_code: "BTMN".to_string(),
            year: 1939,
            year_estimated: false,
            category: Category::Hero,
            index: 1,
            name: "Batman".to_string(),
            entity_type: EntityType::Character,
            price: dec!(2250),
            share_count: 40_000,
            source_metadata: SourceMetadata::new(),
        }
    }

    #[test]
    fn test_bond_ladder() {
        let ctx = SynthesisContext {
            as_of: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
        };
        let bonds = synthesize_bonds(&batman(), &ctx, &DerivativesConfig::default());
        let tickers: Vec<&str> = bonds.iter().map(|b| b.ticker.as_str()).collect();
        assert_eq!(
            tickers,
            vec!["BTMN.DEC.2025.3.0", "BTMN.DEC.2026.5.0", "BTMN.DEC.2027.8.0"]
        );
        assert!(bonds.iter().all(|b| b.expiry_month == Some(MonthCode::Dec)));
        assert_eq!(bonds[1].coupon_rate, Some(dec!(5.0)));
    }

    #[test]
    fn test_out_of_range_coupons_dropped() {
        let ctx = SynthesisContext {
            as_of: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
        };
        let config = DerivativesConfig {
            bond_coupons: vec![0.0, 4.25, 25.0],
            ..DerivativesConfig::default()
        };
        let bonds = synthesize_bonds(&batman(), &ctx, &config);
        assert_eq!(bonds.len(), 1);
        assert_eq!(bonds[0].ticker, "BTMN.DEC.2026.4.3");
    }
}

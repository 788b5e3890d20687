//! Thematic baskets weighted by market capitalization.

use super::DerivativesConfig;
use crate::identity::{canonicalize_name, lookup, publisher_of};
use crate::instrument::{BaseInstrument, BasketWeight, DerivativeInstrument, DerivativeKind, stable_id};
use crate::series_code::{candidates, derive_group_code};
use crate::ticker::{compose_etf, is_valid_series_code};
use rust_decimal::prelude::ToPrimitive;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Thematic tag of a base instrument.
///
/// With a configured `tag_field` the first non-empty value at that metadata
/// path is used, canonicalized; otherwise the normalized publisher.
#[must_use]
pub fn theme_of(base: &BaseInstrument, tag_field: Option<&str>) -> Option<String> {
    match tag_field {
        Some(path) => base.source_metadata.values().find_map(|m| {
            let value = lookup(m, path)?;
            let text = value
                .as_str()
                .or_else(|| value.get("name").and_then(|n| n.as_str()))?;
            Some(canonicalize_name(text)).filter(|t| !t.is_empty())
        }),
        None => base.source_metadata.values().find_map(publisher_of),
    }
}

/// Builds one ETF per theme with at least `etf_min_members` constituents.
///
/// Output depends only on the set of instruments passed in, not their order.
#[must_use]
pub fn synthesize_etfs(bases: &[BaseInstrument], config: &DerivativesConfig) -> Vec<DerivativeInstrument> {
    let mut themes: BTreeMap<String, Vec<&BaseInstrument>> = BTreeMap::new();
    for base in bases {
        if let Some(theme) = theme_of(base, config.etf_tag_field.as_deref()) {
            themes.entry(theme).or_default().push(base);
        }
    }
    themes.retain(|_, members| members.len() >= config.etf_min_members.max(1));

    let mut used: BTreeSet<String> = BTreeSet::new();
    let mut out = Vec::new();
    for (theme, mut members) in themes {
        let Some(group) = group_code(&theme, config, &mut used) else {
            debug!(theme = %theme, "No group code available for theme");
            continue;
        };
        members.sort_by(|a, b| a.ticker.cmp(&b.ticker));
        if let Some(etf) = basket(&group, &members) {
            out.push(etf);
        }
    }
    out
}

fn group_code(theme: &str, config: &DerivativesConfig, used: &mut BTreeSet<String>) -> Option<String> {
    if let Some(code) = config.etf_groups.get(theme)
        && is_valid_series_code(code)
        && used.insert(code.clone())
    {
        return Some(code.clone());
    }
    let base = derive_group_code(theme).ok()?;
    candidates(&base).find(|c| !config.etf_groups.values().any(|v| v == c) && used.insert(c.clone()))
}

fn basket(group: &str, members: &[&BaseInstrument]) -> Option<DerivativeInstrument> {
    let caps: Vec<f64> = members
        .iter()
        .map(|m| m.market_cap().to_f64().unwrap_or(0.0).max(0.0))
        .collect();
    let total: f64 = caps.iter().sum();
    if members.is_empty() {
        return None;
    }

    let weights: Vec<BasketWeight> = members
        .iter()
        .zip(&caps)
        .map(|(m, cap)| BasketWeight {
            ticker: m.ticker.clone(),
            weight: if total > 0.0 {
                cap / total
            } else {
                1.0 / members.len() as f64
            },
        })
        .collect();

    // Largest constituent anchors the ETF; ties go to the first ticker.
    let anchor = members
        .iter()
        .zip(&caps)
        .fold(None::<(&BaseInstrument, f64)>, |best, (m, &cap)| match best {
            Some((_, best_cap)) if best_cap >= cap => best,
            _ => Some((*m, cap)),
        })
        .map(|(m, _)| m)?;

    let ticker = compose_etf(group);
    Some(DerivativeInstrument {
        id: stable_id("derivative", &ticker),
        ticker,
        base_ticker: anchor.ticker.clone(),
        kind: DerivativeKind::Etf,
        strike: None,
        right: None,
        expiry_month: None,
        expiry_year: None,
        coupon_rate: None,
        basket_weights: Some(weights),
    })
}

//! Rate Calculator
//!
//! Currency conversion over the venue's current quotes. Resolves a direct
//! pair, its inverse, or a single hop through a shared quoted intermediate
//! (typically USD). Conversion failure is fatal to the run: bookkeeping
//! must never settle a fill it cannot value.

use crate::errors::BacktestError;
use crate::types::Currency;
use std::collections::HashMap;

/// Which side of the quote to convert at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriceType {
    Bid,
    Ask,
    Mid,
}

/// Stateless conversion resolver. Quote maps are keyed by pair symbol in
/// `"BASE/QUOTE"` notation and carry the current best bid/ask per pair.
#[derive(Debug, Clone, Default)]
pub struct RateCalculator;

impl RateCalculator {
    pub fn new() -> Self {
        Self
    }

    /// Resolve the conversion rate `from -> to`.
    pub fn rate(
        &self,
        from: &Currency,
        to: &Currency,
        price_type: PriceType,
        bid_quotes: &HashMap<String, f64>,
        ask_quotes: &HashMap<String, f64>,
    ) -> Result<f64, BacktestError> {
        if from.code == to.code {
            return Ok(1.0);
        }

        // Collapse both sides into one effective rate per pair.
        let mut rates: HashMap<(String, String), f64> = HashMap::new();
        let symbols: Vec<&String> = bid_quotes.keys().chain(ask_quotes.keys()).collect();
        for symbol in symbols {
            let Some((base, quote)) = split_pair(symbol) else {
                continue;
            };
            if rates.contains_key(&(base.to_string(), quote.to_string())) {
                continue;
            }
            let bid = bid_quotes.get(symbol).copied();
            let ask = ask_quotes.get(symbol).copied();
            let rate = match price_type {
                PriceType::Bid => bid.or(ask),
                PriceType::Ask => ask.or(bid),
                PriceType::Mid => match (bid, ask) {
                    (Some(b), Some(a)) => Some((b + a) / 2.0),
                    (b, a) => b.or(a),
                },
            };
            let Some(rate) = rate else { continue };
            if rate <= 0.0 {
                continue;
            }
            rates.insert((base.to_string(), quote.to_string()), rate);
        }

        let lookup = |a: &str, b: &str| -> Option<f64> {
            if let Some(&r) = rates.get(&(a.to_string(), b.to_string())) {
                return Some(r);
            }
            rates
                .get(&(b.to_string(), a.to_string()))
                .map(|&r| 1.0 / r)
        };

        // Direct or inverse pair.
        if let Some(rate) = lookup(&from.code, &to.code) {
            return Ok(rate);
        }

        // One hop through a shared intermediate, deterministically ordered.
        let mut intermediates: Vec<String> = rates
            .keys()
            .flat_map(|(a, b)| [a.clone(), b.clone()])
            .collect();
        intermediates.sort();
        intermediates.dedup();
        for mid in &intermediates {
            if mid == &from.code || mid == &to.code {
                continue;
            }
            if let (Some(first), Some(second)) =
                (lookup(&from.code, mid), lookup(mid, &to.code))
            {
                return Ok(first * second);
            }
        }

        Err(BacktestError::RateUnavailable {
            from: from.code.clone(),
            to: to.code.clone(),
        })
    }
}

/// Split `"BASE/QUOTE"` into its currency codes.
fn split_pair(symbol: &str) -> Option<(&str, &str)> {
    let mut parts = symbol.splitn(2, '/');
    let base = parts.next()?;
    let quote = parts.next()?;
    if base.is_empty() || quote.is_empty() {
        None
    } else {
        Some((base, quote))
    }
}

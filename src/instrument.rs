//! Instrument Definitions
//!
//! Immutable tradable-instrument descriptors: precisions, tick size, size
//! limits, currencies, and the commission schedule. Registered with the
//! engine once, before any data referencing them.

use crate::identifiers::InstrumentId;
use crate::types::{Currency, Money, Price, Quantity};
use serde::{Deserialize, Serialize};

/// Side of a fill relative to resting liquidity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LiquiditySide {
    /// Posted resting liquidity.
    Maker,
    /// Consumed liquidity.
    Taker,
}

/// Per-instrument commission schedule as notional fractions.
/// A negative maker rate models a rebate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CommissionSchedule {
    pub maker_rate: f64,
    pub taker_rate: f64,
}

impl Default for CommissionSchedule {
    fn default() -> Self {
        Self {
            maker_rate: 0.0002,
            taker_rate: 0.0005,
        }
    }
}

impl CommissionSchedule {
    pub fn zero() -> Self {
        Self {
            maker_rate: 0.0,
            taker_rate: 0.0,
        }
    }

    #[inline]
    pub fn rate(&self, liquidity: LiquiditySide) -> f64 {
        match liquidity {
            LiquiditySide::Maker => self.maker_rate,
            LiquiditySide::Taker => self.taker_rate,
        }
    }
}

/// Immutable instrument descriptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instrument {
    pub id: InstrumentId,
    pub price_precision: u8,
    pub size_precision: u8,
    /// Minimum price movement (one tick).
    pub price_increment: Price,
    /// Minimum size movement.
    pub size_increment: Quantity,
    pub min_quantity: Option<Quantity>,
    pub max_quantity: Option<Quantity>,
    /// Base asset for currency pairs, `None` for equities and futures.
    pub base_currency: Option<Currency>,
    pub quote_currency: Currency,
    pub settlement_currency: Currency,
    /// Contract multiplier applied to PnL and notional.
    pub multiplier: f64,
    /// Inverse instruments settle in the base currency.
    pub is_inverse: bool,
    pub commission: CommissionSchedule,
}

impl Instrument {
    /// Equity-style instrument quoted and settled in one currency.
    pub fn equity(
        id: InstrumentId,
        price_precision: u8,
        tick_size: f64,
        currency: Currency,
    ) -> Self {
        Self {
            id,
            price_precision,
            size_precision: 0,
            price_increment: Price::new(tick_size, price_precision),
            size_increment: Quantity::new(1.0, 0),
            min_quantity: Some(Quantity::new(1.0, 0)),
            max_quantity: None,
            base_currency: None,
            settlement_currency: currency.clone(),
            quote_currency: currency,
            multiplier: 1.0,
            is_inverse: false,
            commission: CommissionSchedule::default(),
        }
    }

    /// Spot currency pair such as `EUR/USD`.
    pub fn currency_pair(
        id: InstrumentId,
        price_precision: u8,
        size_precision: u8,
        base: Currency,
        quote: Currency,
    ) -> Self {
        Self {
            id,
            price_precision,
            size_precision,
            price_increment: Price::from_raw(
                crate::types::pow10(crate::types::FIXED_PRECISION - price_precision),
                price_precision,
            ),
            size_increment: Quantity::from_raw(
                crate::types::pow10(crate::types::FIXED_PRECISION - size_precision) as u64,
                size_precision,
            ),
            min_quantity: None,
            max_quantity: None,
            base_currency: Some(base),
            settlement_currency: quote.clone(),
            quote_currency: quote,
            multiplier: 1.0,
            is_inverse: false,
            commission: CommissionSchedule::default(),
        }
    }

    pub fn with_commission(mut self, commission: CommissionSchedule) -> Self {
        self.commission = commission;
        self
    }

    pub fn with_quantity_limits(
        mut self,
        min: Option<Quantity>,
        max: Option<Quantity>,
    ) -> Self {
        self.min_quantity = min;
        self.max_quantity = max;
        self
    }

    /// Build a price conforming to this instrument's precision.
    #[inline]
    pub fn make_price(&self, value: f64) -> Price {
        Price::new(value, self.price_precision)
    }

    /// Build a quantity conforming to this instrument's precision.
    #[inline]
    pub fn make_qty(&self, value: f64) -> Quantity {
        Quantity::new(value, self.size_precision)
    }

    /// Currency commissions and fill notionals are expressed in.
    #[inline]
    pub fn cost_currency(&self) -> &Currency {
        if self.is_inverse {
            self.base_currency
                .as_ref()
                .unwrap_or(&self.settlement_currency)
        } else {
            &self.quote_currency
        }
    }

    /// Notional value of a fill.
    pub fn notional_value(&self, quantity: Quantity, price: Price) -> Money {
        let notional = if self.is_inverse {
            quantity.as_f64() * self.multiplier / price.as_f64()
        } else {
            quantity.as_f64() * self.multiplier * price.as_f64()
        };
        Money::new(notional, self.cost_currency().clone())
    }

    /// Commission for a fill under the schedule. Returned in the
    /// instrument's cost currency; bookkeeping converts as needed.
    pub fn calculate_commission(
        &self,
        quantity: Quantity,
        price: Price,
        liquidity: LiquiditySide,
    ) -> Money {
        let notional = self.notional_value(quantity, price);
        Money::new(
            notional.as_f64() * self.commission.rate(liquidity),
            notional.currency,
        )
    }

    /// Quantity within the instrument's configured limits?
    pub fn quantity_in_limits(&self, quantity: Quantity) -> Result<(), String> {
        if let Some(min) = self.min_quantity {
            if quantity < min {
                return Err(format!(
                    "quantity {} below instrument minimum {}",
                    quantity, min
                ));
            }
        }
        if let Some(max) = self.max_quantity {
            if quantity > max {
                return Err(format!(
                    "quantity {} above instrument maximum {}",
                    quantity, max
                ));
            }
        }
        Ok(())
    }
}

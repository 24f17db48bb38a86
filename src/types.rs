//! Value Types
//!
//! Fixed-point decimals for prices, quantities, and monetary amounts.
//! All arithmetic and comparisons operate on integer raw values scaled to
//! nine decimal places; the declared precision only governs rounding and
//! display. This keeps bookkeeping exact and runs bit-reproducible.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};

/// Number of decimal places carried by every raw value.
pub const FIXED_PRECISION: u8 = 9;

/// Scaling factor for raw values: 1.0 == 1_000_000_000 raw units.
pub const FIXED_SCALE: i64 = 1_000_000_000;

/// Power of ten lookup for precisions 0..=9.
#[inline]
pub const fn pow10(precision: u8) -> i64 {
    const POW10: [i64; 10] = [
        1,
        10,
        100,
        1_000,
        10_000,
        100_000,
        1_000_000,
        10_000_000,
        100_000_000,
        1_000_000_000,
    ];
    POW10[precision as usize]
}

/// Round a floating value to `precision` decimals and scale to raw units.
#[inline]
fn f64_to_raw(value: f64, precision: u8) -> i64 {
    debug_assert!(
        precision <= FIXED_PRECISION,
        "precision {} exceeds maximum {}",
        precision,
        FIXED_PRECISION
    );
    let units = (value * pow10(precision) as f64).round() as i64;
    units * pow10(FIXED_PRECISION - precision)
}

// =============================================================================
// CURRENCY
// =============================================================================

/// Classification used by the rate calculator when searching for a
/// conversion path through a quoted intermediate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CurrencyKind {
    /// Fiat currency with an ISO 4217 code.
    Iso,
    /// Crypto asset.
    Crypto,
}

/// Symbolic currency code with display precision and classification.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Currency {
    pub code: String,
    pub precision: u8,
    pub kind: CurrencyKind,
}

impl Currency {
    pub fn new(code: impl Into<String>, precision: u8, kind: CurrencyKind) -> Self {
        Self {
            code: code.into(),
            precision,
            kind,
        }
    }

    pub fn usd() -> Self {
        Self::new("USD", 2, CurrencyKind::Iso)
    }

    pub fn eur() -> Self {
        Self::new("EUR", 2, CurrencyKind::Iso)
    }

    pub fn gbp() -> Self {
        Self::new("GBP", 2, CurrencyKind::Iso)
    }

    pub fn jpy() -> Self {
        Self::new("JPY", 0, CurrencyKind::Iso)
    }

    pub fn aud() -> Self {
        Self::new("AUD", 2, CurrencyKind::Iso)
    }

    pub fn btc() -> Self {
        Self::new("BTC", 8, CurrencyKind::Crypto)
    }

    pub fn eth() -> Self {
        Self::new("ETH", 8, CurrencyKind::Crypto)
    }

    pub fn usdt() -> Self {
        Self::new("USDT", 8, CurrencyKind::Crypto)
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code)
    }
}

// =============================================================================
// PRICE
// =============================================================================

/// Fixed-point price. `raw` is scaled to nine decimals regardless of the
/// declared precision, so prices of different precisions compare exactly.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Price {
    pub raw: i64,
    pub precision: u8,
}

impl Price {
    #[inline]
    pub fn new(value: f64, precision: u8) -> Self {
        Self {
            raw: f64_to_raw(value, precision),
            precision,
        }
    }

    #[inline]
    pub const fn from_raw(raw: i64, precision: u8) -> Self {
        Self { raw, precision }
    }

    #[inline]
    pub fn as_f64(&self) -> f64 {
        self.raw as f64 / FIXED_SCALE as f64
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.raw == 0
    }
}

impl PartialEq for Price {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl Eq for Price {}

impl PartialOrd for Price {
    #[inline]
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Price {
    #[inline]
    fn cmp(&self, other: &Self) -> Ordering {
        self.raw.cmp(&other.raw)
    }
}

impl std::hash::Hash for Price {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.raw.hash(state);
    }
}

impl Add for Price {
    type Output = Price;

    #[inline]
    fn add(self, rhs: Price) -> Price {
        Price {
            raw: self.raw + rhs.raw,
            precision: self.precision.max(rhs.precision),
        }
    }
}

impl Sub for Price {
    type Output = Price;

    #[inline]
    fn sub(self, rhs: Price) -> Price {
        Price {
            raw: self.raw - rhs.raw,
            precision: self.precision.max(rhs.precision),
        }
    }
}

impl Neg for Price {
    type Output = Price;

    #[inline]
    fn neg(self) -> Price {
        Price {
            raw: -self.raw,
            precision: self.precision,
        }
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.*}", self.precision as usize, self.as_f64())
    }
}

// =============================================================================
// QUANTITY
// =============================================================================

/// Fixed-point non-negative quantity.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Quantity {
    pub raw: u64,
    pub precision: u8,
}

impl Quantity {
    #[inline]
    pub fn new(value: f64, precision: u8) -> Self {
        debug_assert!(value >= 0.0, "quantity must be non-negative, got {}", value);
        Self {
            raw: f64_to_raw(value, precision) as u64,
            precision,
        }
    }

    #[inline]
    pub const fn from_raw(raw: u64, precision: u8) -> Self {
        Self { raw, precision }
    }

    #[inline]
    pub const fn zero(precision: u8) -> Self {
        Self { raw: 0, precision }
    }

    #[inline]
    pub fn as_f64(&self) -> f64 {
        self.raw as f64 / FIXED_SCALE as f64
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.raw == 0
    }

    /// Smaller of two quantities.
    #[inline]
    pub fn min(self, other: Quantity) -> Quantity {
        if self.raw <= other.raw {
            self
        } else {
            other
        }
    }
}

impl PartialEq for Quantity {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl Eq for Quantity {}

impl PartialOrd for Quantity {
    #[inline]
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Quantity {
    #[inline]
    fn cmp(&self, other: &Self) -> Ordering {
        self.raw.cmp(&other.raw)
    }
}

impl std::hash::Hash for Quantity {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.raw.hash(state);
    }
}

impl Add for Quantity {
    type Output = Quantity;

    #[inline]
    fn add(self, rhs: Quantity) -> Quantity {
        Quantity {
            raw: self.raw + rhs.raw,
            precision: self.precision.max(rhs.precision),
        }
    }
}

impl AddAssign for Quantity {
    #[inline]
    fn add_assign(&mut self, rhs: Quantity) {
        self.raw += rhs.raw;
        self.precision = self.precision.max(rhs.precision);
    }
}

impl Sub for Quantity {
    type Output = Quantity;

    #[inline]
    fn sub(self, rhs: Quantity) -> Quantity {
        debug_assert!(
            self.raw >= rhs.raw,
            "quantity subtraction underflow: {} - {}",
            self,
            rhs
        );
        Quantity {
            raw: self.raw - rhs.raw,
            precision: self.precision.max(rhs.precision),
        }
    }
}

impl SubAssign for Quantity {
    #[inline]
    fn sub_assign(&mut self, rhs: Quantity) {
        debug_assert!(self.raw >= rhs.raw);
        self.raw -= rhs.raw;
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.*}", self.precision as usize, self.as_f64())
    }
}

// =============================================================================
// MONEY
// =============================================================================

/// Fixed-point monetary amount in a specific currency. Raw value is scaled
/// to nine decimals; display uses the currency precision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Money {
    pub raw: i64,
    pub currency: Currency,
}

impl Money {
    #[inline]
    pub fn new(value: f64, currency: Currency) -> Self {
        Self {
            raw: f64_to_raw(value, currency.precision.min(FIXED_PRECISION)),
            currency,
        }
    }

    #[inline]
    pub fn from_raw(raw: i64, currency: Currency) -> Self {
        Self { raw, currency }
    }

    #[inline]
    pub fn zero(currency: Currency) -> Self {
        Self { raw: 0, currency }
    }

    #[inline]
    pub fn as_f64(&self) -> f64 {
        self.raw as f64 / FIXED_SCALE as f64
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.raw == 0
    }

    /// Add an amount of the same currency.
    #[inline]
    pub fn add(&self, other: &Money) -> Money {
        debug_assert_eq!(
            self.currency.code, other.currency.code,
            "currency mismatch in Money::add"
        );
        Money {
            raw: self.raw + other.raw,
            currency: self.currency.clone(),
        }
    }

    /// Subtract an amount of the same currency.
    #[inline]
    pub fn sub(&self, other: &Money) -> Money {
        debug_assert_eq!(
            self.currency.code, other.currency.code,
            "currency mismatch in Money::sub"
        );
        Money {
            raw: self.raw - other.raw,
            currency: self.currency.clone(),
        }
    }
}

impl PartialEq for Money {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw && self.currency.code == other.currency.code
    }
}

impl Eq for Money {}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:.*} {}",
            self.currency.precision as usize,
            self.as_f64(),
            self.currency.code
        )
    }
}

//! Engine Configuration
//!
//! Venue registration parameters and engine-level options. Everything a
//! venue needs is fixed at registration time; nothing is discovered at run
//! time.

use crate::account::AccountType;
use crate::book::BookLevelKind;
use crate::fill_model::FillModelConfig;
use crate::identifiers::Venue;
use crate::latency::LatencyModel;
use crate::types::{Currency, Money};
use serde::{Deserialize, Serialize};

/// Order management discipline for a venue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OmsType {
    /// One open position per instrument; per-fill position ids are hidden
    /// from the strategy surface.
    Netting,
    /// A new position per entry fill/bracket; fill events carry their
    /// position id.
    Hedging,
}

/// Per-venue registration config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VenueConfig {
    pub venue: Venue,
    pub oms_type: OmsType,
    pub account_type: AccountType,
    /// Single-asset accounts convert PnL/commissions into this currency.
    pub base_currency: Option<Currency>,
    pub starting_balances: Vec<Money>,
    pub book_level: BookLevelKind,
    pub fill_model: FillModelConfig,
    /// Frozen accounts ignore balance adjustments.
    pub frozen_account: bool,
    /// Reject stop orders whose trigger is already marketable.
    pub reject_stop_orders_in_market: bool,
    /// Honor GTD expiry times; otherwise expiry is ignored.
    pub support_gtd_orders: bool,
    /// Optional command latency; `None` delivers in the same step.
    pub latency_model: Option<LatencyModel>,
}

impl VenueConfig {
    /// A venue with defaults: L1 book, netting OMS, cash account.
    pub fn new(venue: Venue, starting_balances: Vec<Money>) -> Self {
        Self {
            venue,
            oms_type: OmsType::Netting,
            account_type: AccountType::Cash,
            base_currency: None,
            starting_balances,
            book_level: BookLevelKind::L1,
            fill_model: FillModelConfig::default(),
            frozen_account: false,
            reject_stop_orders_in_market: true,
            support_gtd_orders: true,
            latency_model: None,
        }
    }

    pub fn with_oms_type(mut self, oms_type: OmsType) -> Self {
        self.oms_type = oms_type;
        self
    }

    pub fn with_account_type(mut self, account_type: AccountType) -> Self {
        self.account_type = account_type;
        self
    }

    pub fn with_base_currency(mut self, currency: Currency) -> Self {
        self.base_currency = Some(currency);
        self
    }

    pub fn with_book_level(mut self, level: BookLevelKind) -> Self {
        self.book_level = level;
        self
    }

    pub fn with_fill_model(mut self, fill_model: FillModelConfig) -> Self {
        self.fill_model = fill_model;
        self
    }

    pub fn with_frozen_account(mut self, frozen: bool) -> Self {
        self.frozen_account = frozen;
        self
    }

    pub fn with_latency_model(mut self, model: LatencyModel) -> Self {
        self.latency_model = Some(model);
        self
    }
}

//! Execution Ledger
//!
//! Per-venue account and position bookkeeping. Every fill resolves a
//! position id under the venue's OMS type, computes commission and any
//! realized PnL, converts both into the account's base currency through the
//! rate calculator, adjusts the balance, and emits position and account
//! state events.

use crate::account::{Account, AccountType};
use crate::clock::Nanos;
use crate::config::OmsType;
use crate::data::OrderSide;
use crate::errors::BacktestError;
use crate::events::ExecutionEvent;
use crate::identifiers::{AccountId, InstrumentId, PositionId, StrategyId, Venue};
use crate::instrument::{Instrument, LiquiditySide};
use crate::position::Position;
use crate::rates::{PriceType, RateCalculator};
use crate::types::{Currency, Money, Price, Quantity};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

/// Bookkeeping statistics for run diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LedgerStats {
    pub fills_settled: u64,
    pub positions_opened: u64,
    pub positions_closed: u64,
}

/// Result of settling one fill.
pub struct FillSettlement {
    /// Commission charged, in the instrument's cost currency.
    pub commission: Money,
    /// Position id the fill was booked against.
    pub position_id: PositionId,
    /// Position/account events to emit, in order.
    pub events: Vec<ExecutionEvent>,
    /// Set when this fill brought the position to flat.
    pub closed_position: Option<PositionId>,
}

/// Account + position bookkeeping for one venue.
#[derive(Debug)]
pub struct ExecutionLedger {
    venue: Venue,
    oms_type: OmsType,
    account: Account,
    rate_calculator: RateCalculator,
    positions: HashMap<PositionId, Position>,
    /// Open position per (strategy, instrument) under NETTING.
    open_index: HashMap<(StrategyId, InstrumentId), PositionId>,
    position_count: u64,
    pub stats: LedgerStats,
}

impl ExecutionLedger {
    pub fn new(
        venue: Venue,
        oms_type: OmsType,
        account_type: AccountType,
        base_currency: Option<Currency>,
        starting_balances: Vec<Money>,
        frozen: bool,
    ) -> Result<Self, BacktestError> {
        let account = Account::new(
            AccountId::new(format!("{}-001", venue)),
            account_type,
            base_currency,
            starting_balances,
            frozen,
        )?;
        Ok(Self {
            venue,
            oms_type,
            account,
            rate_calculator: RateCalculator::new(),
            positions: HashMap::new(),
            open_index: HashMap::new(),
            position_count: 0,
            stats: LedgerStats::default(),
        })
    }

    #[inline]
    pub fn account(&self) -> &Account {
        &self.account
    }

    #[inline]
    pub fn oms_type(&self) -> OmsType {
        self.oms_type
    }

    pub fn position(&self, id: &PositionId) -> Option<&Position> {
        self.positions.get(id)
    }

    pub fn open_position_id(
        &self,
        strategy_id: &StrategyId,
        instrument_id: &InstrumentId,
    ) -> Option<&PositionId> {
        self.open_index
            .get(&(strategy_id.clone(), instrument_id.clone()))
    }

    /// Pre-allocate a position id (used by bracket submission so both exits
    /// share the entry's position before any fill exists).
    pub fn generate_position_id(&mut self) -> PositionId {
        self.position_count += 1;
        PositionId::new(format!("{}-P-{}", self.venue, self.position_count))
    }

    /// Resolve the position id a fill books against, honoring an explicit
    /// hint (bracket linkage) before the OMS discipline.
    fn resolve_position_id(
        &mut self,
        hint: Option<&PositionId>,
        strategy_id: &StrategyId,
        instrument_id: &InstrumentId,
    ) -> PositionId {
        if let Some(id) = hint {
            return id.clone();
        }
        match self.oms_type {
            OmsType::Netting => self
                .open_index
                .get(&(strategy_id.clone(), instrument_id.clone()))
                .cloned()
                .unwrap_or_else(|| self.generate_position_id()),
            OmsType::Hedging => self.generate_position_id(),
        }
    }

    /// Settle one fill: position resolution, commission, PnL, conversion,
    /// balance adjustment, and event emission.
    #[allow(clippy::too_many_arguments)]
    pub fn settle_fill(
        &mut self,
        instrument: &Instrument,
        strategy_id: &StrategyId,
        side: OrderSide,
        fill_qty: Quantity,
        fill_px: Price,
        liquidity: LiquiditySide,
        position_id_hint: Option<&PositionId>,
        bid_quotes: &HashMap<String, f64>,
        ask_quotes: &HashMap<String, f64>,
        ts: Nanos,
    ) -> Result<FillSettlement, BacktestError> {
        let commission = instrument.calculate_commission(fill_qty, fill_px, liquidity);
        let position_id = self.resolve_position_id(position_id_hint, strategy_id, &instrument.id);

        let mut events = Vec::new();
        let mut closed_position = None;

        // PnL realizes only on the closing portion of an existing position.
        let has_open = self
            .positions
            .get(&position_id)
            .map_or(false, |p| p.is_open());
        let (pnl, position_event) = if has_open {
            let (realized, snapshot, closed) = {
                let position = self.positions.get_mut(&position_id).expect("open position");
                let realized = position.apply_fill(side, fill_qty, fill_px, ts);
                position.add_commission(&commission);
                (realized, position.snapshot(), position.is_closed())
            };
            if closed {
                self.stats.positions_closed += 1;
                self.open_index
                    .remove(&(strategy_id.clone(), instrument.id.clone()));
                closed_position = Some(position_id.clone());
                (realized, ExecutionEvent::PositionClosed { position: snapshot, ts })
            } else {
                (realized, ExecutionEvent::PositionChanged { position: snapshot, ts })
            }
        } else {
            let mut position = Position::new(
                instrument,
                position_id.clone(),
                strategy_id.clone(),
                side,
                fill_qty,
                fill_px,
                ts,
            );
            position.add_commission(&commission);
            let snapshot = position.snapshot();
            self.positions.insert(position_id.clone(), position);
            self.open_index.insert(
                (strategy_id.clone(), instrument.id.clone()),
                position_id.clone(),
            );
            self.stats.positions_opened += 1;
            (
                Money::zero(instrument.settlement_currency.clone()),
                ExecutionEvent::PositionOpened { position: snapshot, ts },
            )
        };

        // Cash accounts move the fill notional (buys pay, sells receive);
        // margin accounts move realized PnL only. Commission is charged
        // either way.
        let flow = match self.account.account_type {
            AccountType::Cash => {
                let notional = instrument.notional_value(fill_qty, fill_px);
                let signed = match side {
                    OrderSide::Buy => -notional.raw,
                    OrderSide::Sell => notional.raw,
                };
                Money::from_raw(signed, notional.currency)
            }
            AccountType::Margin => pnl.clone(),
        };

        // Convert flows into the account's base currency for single-asset
        // accounts; multi-currency accounts settle natively.
        let price_type = match side {
            OrderSide::Sell => PriceType::Bid,
            OrderSide::Buy => PriceType::Ask,
        };
        let (flow_adj, commission_adj) = match self.account.base_currency.clone() {
            Some(base) => {
                let flow_conv = self.convert(&flow, &base, price_type, bid_quotes, ask_quotes)?;
                let fee_conv =
                    self.convert(&commission, &base, price_type, bid_quotes, ask_quotes)?;
                (flow_conv, fee_conv)
            }
            None => (flow, commission.clone()),
        };

        debug!(
            instrument = %instrument.id,
            position = %position_id,
            %fill_qty,
            %fill_px,
            flow = %flow_adj,
            commission = %commission_adj,
            "fill settled"
        );

        // total += flow - commission, free mirrors total (frozen accounts
        // skip the adjustment but keep the commission totals).
        self.account.record_commission(&commission);
        if flow_adj.currency.code == commission_adj.currency.code {
            self.account.adjust(&flow_adj.sub(&commission_adj));
        } else {
            self.account.adjust(&flow_adj);
            self.account
                .adjust(&Money::from_raw(-commission_adj.raw, commission_adj.currency));
        }

        events.push(position_event);
        events.push(self.account.state_event(ts));
        self.stats.fills_settled += 1;

        Ok(FillSettlement {
            commission,
            position_id,
            events,
            closed_position,
        })
    }

    fn convert(
        &self,
        amount: &Money,
        into: &Currency,
        price_type: PriceType,
        bid_quotes: &HashMap<String, f64>,
        ask_quotes: &HashMap<String, f64>,
    ) -> Result<Money, BacktestError> {
        if amount.currency.code == into.code {
            return Ok(amount.clone());
        }
        if amount.is_zero() {
            return Ok(Money::zero(into.clone()));
        }
        let rate = self.rate_calculator.rate(
            &amount.currency,
            into,
            price_type,
            bid_quotes,
            ask_quotes,
        )?;
        Ok(Money::new(amount.as_f64() * rate, into.clone()))
    }

    /// Emit the initial account state (run start).
    pub fn initial_state_event(&mut self, ts: Nanos) -> ExecutionEvent {
        self.account.state_event(ts)
    }

    pub fn positions(&self) -> impl Iterator<Item = &Position> {
        self.positions.values()
    }

    pub fn reset(&mut self, starting_balances: Vec<Money>) -> Result<(), BacktestError> {
        self.account = Account::new(
            self.account.id.clone(),
            self.account.account_type,
            self.account.base_currency.clone(),
            starting_balances,
            self.account.frozen,
        )?;
        self.positions.clear();
        self.open_index.clear();
        self.position_count = 0;
        self.stats = LedgerStats::default();
        Ok(())
    }
}

//! Accounts
//!
//! Per-venue account with per-currency balances. `free = total - locked`
//! after every adjustment. Frozen accounts ignore balance adjustments but
//! still accumulate commission totals.

use crate::clock::Nanos;
use crate::errors::BacktestError;
use crate::events::{BalanceSnapshot, ExecutionEvent};
use crate::identifiers::AccountId;
use crate::types::{Currency, Money};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Account classification. Margin accounts share the cash bookkeeping; the
/// distinction is carried for downstream consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountType {
    Cash,
    Margin,
}

/// Balance for one currency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountBalance {
    pub total: Money,
    pub locked: Money,
    pub free: Money,
}

impl AccountBalance {
    pub fn new(total: Money) -> Self {
        let currency = total.currency.clone();
        Self {
            locked: Money::zero(currency.clone()),
            free: total.clone(),
            total,
        }
    }
}

/// Simulated venue account.
#[derive(Debug, Clone)]
pub struct Account {
    pub id: AccountId,
    pub account_type: AccountType,
    /// Single-asset accounts convert all flows into this currency.
    pub base_currency: Option<Currency>,
    balances: BTreeMap<String, AccountBalance>,
    /// Commission totals per currency, accumulated even when frozen.
    commissions: BTreeMap<String, Money>,
    pub frozen: bool,
    version: u64,
}

impl Account {
    pub fn new(
        id: AccountId,
        account_type: AccountType,
        base_currency: Option<Currency>,
        starting_balances: Vec<Money>,
        frozen: bool,
    ) -> Result<Self, BacktestError> {
        if starting_balances.is_empty() {
            return Err(BacktestError::MissingStartingBalance(id.to_string()));
        }
        let mut balances = BTreeMap::new();
        for money in starting_balances {
            balances.insert(money.currency.code.clone(), AccountBalance::new(money));
        }
        Ok(Self {
            id,
            account_type,
            base_currency,
            balances,
            commissions: BTreeMap::new(),
            frozen,
            version: 0,
        })
    }

    pub fn balance(&self, currency: &Currency) -> Option<&AccountBalance> {
        self.balances.get(&currency.code)
    }

    pub fn balances(&self) -> impl Iterator<Item = &AccountBalance> {
        self.balances.values()
    }

    pub fn commissions(&self) -> &BTreeMap<String, Money> {
        &self.commissions
    }

    /// Apply a signed adjustment to the currency's total. `free` mirrors
    /// `total` less whatever is locked. Frozen accounts ignore the change.
    pub fn adjust(&mut self, delta: &Money) {
        if self.frozen {
            return;
        }
        let entry = self
            .balances
            .entry(delta.currency.code.clone())
            .or_insert_with(|| AccountBalance::new(Money::zero(delta.currency.clone())));
        entry.total = entry.total.add(delta);
        entry.free = entry.total.sub(&entry.locked);
    }

    /// Record a commission total. Frozen accounts keep accumulating here
    /// even though their balance never moves.
    pub fn record_commission(&mut self, commission: &Money) {
        if commission.is_zero() {
            return;
        }
        let entry = self
            .commissions
            .entry(commission.currency.code.clone())
            .or_insert_with(|| Money::zero(commission.currency.clone()));
        *entry = entry.add(commission);
    }

    /// Build an ACCOUNT_STATE event with all balances, bumping the
    /// per-account version.
    pub fn state_event(&mut self, ts: Nanos) -> ExecutionEvent {
        self.version += 1;
        ExecutionEvent::AccountState {
            account_id: self.id.clone(),
            balances: self
                .balances
                .values()
                .map(|b| BalanceSnapshot {
                    total: b.total.clone(),
                    locked: b.locked.clone(),
                    free: b.free.clone(),
                })
                .collect(),
            version: self.version,
            ts,
        }
    }
}

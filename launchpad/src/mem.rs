//! Deterministic in-memory collaborators: ledger, farm and clock.
//!
//! Used by the test-suites and by local simulations; no real time passes and
//! every balance is inspectable.

use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
};

use parking_lot::RwLock;

use crate::{
    backend::{Clock, TokenLedger, YieldFarm},
    error::BackendError,
    Address, AssetId, Balance, Timestamp,
};

/// Manually driven clock.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(now: Timestamp) -> Self {
        Self { now: AtomicU64::new(now) }
    }

    pub fn set(&self, t: Timestamp) {
        self.now.store(t, Ordering::SeqCst);
    }

    pub fn advance(&self, secs: u64) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_unix(&self) -> Timestamp {
        self.now.load(Ordering::SeqCst)
    }
}

/// Multi-asset balance book with allowances.
///
/// Allowance of `Balance::MAX` is treated as unlimited and never decremented.
/// Frozen accounts reject any transfer touching them, which lets tests inject
/// ledger failures.
#[derive(Debug, Default)]
pub struct MemLedger {
    balances: RwLock<HashMap<(AssetId, Address), Balance>>,
    allowances: RwLock<HashMap<(AssetId, Address, Address), Balance>>,
    frozen: RwLock<HashSet<Address>>,
}

impl MemLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mint(&self, asset: AssetId, to: Address, amount: Balance) {
        let mut m = self.balances.write();
        *m.entry((asset, to)).or_default() += amount;
    }

    pub fn allowance(&self, asset: AssetId, owner: Address, spender: Address) -> Balance {
        *self.allowances.read().get(&(asset, owner, spender)).unwrap_or(&0)
    }

    pub fn freeze(&self, who: Address) {
        self.frozen.write().insert(who);
    }

    pub fn unfreeze(&self, who: Address) {
        self.frozen.write().remove(&who);
    }

    fn move_balance(
        &self,
        asset: AssetId,
        from: Address,
        to: Address,
        amount: Balance,
    ) -> Result<(), BackendError> {
        {
            let frozen = self.frozen.read();
            if frozen.contains(&from) || frozen.contains(&to) {
                return Err(BackendError::Rejected("account frozen".into()));
            }
        }
        let mut m = self.balances.write();
        let fb = m.entry((asset, from)).or_default();
        if *fb < amount {
            return Err(BackendError::Insufficient);
        }
        *fb -= amount;
        *m.entry((asset, to)).or_default() += amount;
        Ok(())
    }
}

impl TokenLedger for MemLedger {
    fn transfer(
        &self,
        asset: AssetId,
        from: Address,
        to: Address,
        amount: Balance,
    ) -> Result<(), BackendError> {
        self.move_balance(asset, from, to, amount)
    }

    fn transfer_from(
        &self,
        asset: AssetId,
        spender: Address,
        from: Address,
        to: Address,
        amount: Balance,
    ) -> Result<(), BackendError> {
        if spender != from {
            let allowed = self.allowance(asset, from, spender);
            if allowed < amount {
                return Err(BackendError::AllowanceExceeded);
            }
            self.move_balance(asset, from, to, amount)?;
            if allowed != Balance::MAX {
                self.allowances.write().insert((asset, from, spender), allowed - amount);
            }
            return Ok(());
        }
        self.move_balance(asset, from, to, amount)
    }

    fn approve(
        &self,
        asset: AssetId,
        owner: Address,
        spender: Address,
        amount: Balance,
    ) -> Result<(), BackendError> {
        self.allowances.write().insert((asset, owner, spender), amount);
        Ok(())
    }

    fn balance_of(&self, asset: AssetId, who: Address) -> Balance {
        *self.balances.read().get(&(asset, who)).unwrap_or(&0)
    }
}

/// Single-pool farm paying rewards in the staked asset.
///
/// Rewards only appear through [`MemFarm::accrue`], which mints them into the
/// farm's own account and books them as pending for a depositor.
#[derive(Debug)]
pub struct MemFarm {
    address: Address,
    asset: AssetId,
    ledger: Arc<MemLedger>,
    staked: RwLock<HashMap<Address, Balance>>,
    pending: RwLock<HashMap<Address, Balance>>,
    failing: AtomicBool,
}

impl MemFarm {
    pub fn new(address: Address, asset: AssetId, ledger: Arc<MemLedger>) -> Self {
        Self {
            address,
            asset,
            ledger,
            staked: RwLock::new(HashMap::new()),
            pending: RwLock::new(HashMap::new()),
            failing: AtomicBool::new(false),
        }
    }

    /// Book `amount` of reward for `depositor`.
    pub fn accrue(&self, depositor: Address, amount: Balance) {
        self.ledger.mint(self.asset, self.address, amount);
        *self.pending.write().entry(depositor).or_default() += amount;
    }

    /// Make every subsequent mutating call fail until reset.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check_alive(&self) -> Result<(), BackendError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(BackendError::Rejected("farm unavailable".into()));
        }
        Ok(())
    }

    fn pay_pending(&self, depositor: Address) -> Result<Balance, BackendError> {
        let owed = self.pending_reward(depositor);
        if owed == 0 {
            return Ok(0);
        }
        self.ledger.transfer(self.asset, self.address, depositor, owed)?;
        self.pending.write().remove(&depositor);
        Ok(owed)
    }
}

impl YieldFarm for MemFarm {
    fn address(&self) -> Address {
        self.address
    }

    fn deposit(&self, depositor: Address, amount: Balance) -> Result<(), BackendError> {
        self.check_alive()?;
        self.pay_pending(depositor)?;
        if amount > 0 {
            self.ledger
                .transfer_from(self.asset, self.address, depositor, self.address, amount)?;
            *self.staked.write().entry(depositor).or_default() += amount;
        }
        Ok(())
    }

    fn withdraw(&self, depositor: Address, amount: Balance) -> Result<(), BackendError> {
        self.check_alive()?;
        if self.staked(depositor) < amount {
            return Err(BackendError::Insufficient);
        }
        self.pay_pending(depositor)?;
        if amount > 0 {
            self.ledger.transfer(self.asset, self.address, depositor, amount)?;
            *self.staked.write().entry(depositor).or_default() -= amount;
        }
        Ok(())
    }

    fn harvest(&self, depositor: Address) -> Result<Balance, BackendError> {
        self.check_alive()?;
        self.pay_pending(depositor)
    }

    fn staked(&self, depositor: Address) -> Balance {
        *self.staked.read().get(&depositor).unwrap_or(&0)
    }

    fn pending_reward(&self, depositor: Address) -> Balance {
        *self.pending.read().get(&depositor).unwrap_or(&0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOKEN: AssetId = AssetId(7);

    #[test]
    fn transfer_from_consumes_allowance() {
        let l = MemLedger::new();
        let (a, b, s) = (Address::from_byte(1), Address::from_byte(2), Address::from_byte(3));
        l.mint(TOKEN, a, 100);
        assert_eq!(l.transfer_from(TOKEN, s, a, b, 10), Err(BackendError::AllowanceExceeded));
        l.approve(TOKEN, a, s, 30).unwrap();
        l.transfer_from(TOKEN, s, a, b, 20).unwrap();
        assert_eq!(l.allowance(TOKEN, a, s), 10);
        assert_eq!(l.balance_of(TOKEN, a), 80);
        assert_eq!(l.balance_of(TOKEN, b), 20);
    }

    #[test]
    fn frozen_account_rejects_and_keeps_balances() {
        let l = MemLedger::new();
        let (a, b) = (Address::from_byte(1), Address::from_byte(2));
        l.mint(TOKEN, a, 5);
        l.freeze(b);
        assert!(l.transfer(TOKEN, a, b, 5).is_err());
        assert_eq!(l.balance_of(TOKEN, a), 5);
        l.unfreeze(b);
        l.transfer(TOKEN, a, b, 5).unwrap();
        assert_eq!(l.balance_of(TOKEN, b), 5);
    }

    #[test]
    fn farm_pays_pending_on_withdraw() {
        let l = Arc::new(MemLedger::new());
        let farm_addr = Address::from_byte(0xFA);
        let farm = MemFarm::new(farm_addr, TOKEN, l.clone());
        let v = Address::from_byte(9);
        l.mint(TOKEN, v, 50);
        l.approve(TOKEN, v, farm_addr, Balance::MAX).unwrap();

        farm.deposit(v, 50).unwrap();
        farm.accrue(v, 7);
        assert_eq!(farm.pending_reward(v), 7);
        farm.withdraw(v, 20).unwrap();
        assert_eq!(l.balance_of(TOKEN, v), 27);
        assert_eq!(farm.staked(v), 30);
        assert_eq!(farm.pending_reward(v), 0);
        assert_eq!(l.allowance(TOKEN, v, farm_addr), Balance::MAX);
    }
}

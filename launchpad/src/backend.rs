//! Collaborator interfaces: fungible ledger, yield farm, clock and tier-score source.
//!
//! All monetary side-effects go through these traits. A failed call aborts the
//! calling operation before any internal state is written.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::{error::BackendError, Address, AssetId, Balance, Result, Timestamp};

/// Source of wall-clock time (UNIX seconds).
pub trait Clock: Send + Sync + 'static {
    fn now_unix(&self) -> Timestamp;
}

/// Clock backed by the host system time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_unix(&self) -> Timestamp {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}

/// ERC20-like ledger. `Ok(())` plays the role of a `true` return value.
pub trait TokenLedger: Send + Sync + 'static {
    /// Move `amount` of `asset` owned by `from` to `to`, authorized by `from` itself.
    fn transfer(
        &self,
        asset: AssetId,
        from: Address,
        to: Address,
        amount: Balance,
    ) -> std::result::Result<(), BackendError>;

    /// Move `amount` from `from` to `to` on behalf of `spender`, consuming allowance.
    fn transfer_from(
        &self,
        asset: AssetId,
        spender: Address,
        from: Address,
        to: Address,
        amount: Balance,
    ) -> std::result::Result<(), BackendError>;

    /// Set the allowance `owner` grants to `spender`.
    fn approve(
        &self,
        asset: AssetId,
        owner: Address,
        spender: Address,
        amount: Balance,
    ) -> std::result::Result<(), BackendError>;

    fn balance_of(&self, asset: AssetId, who: Address) -> Balance;
}

/// Reward farm the vault delegates principal to.
///
/// Rewards are paid in the staking token. Every `deposit`/`withdraw` first pays
/// the depositor's pending reward, like a MasterChef pool.
pub trait YieldFarm: Send + Sync + 'static {
    /// Account that pulls deposits; the depositor must approve it on the ledger.
    fn address(&self) -> Address;

    fn deposit(&self, depositor: Address, amount: Balance) -> std::result::Result<(), BackendError>;

    fn withdraw(&self, depositor: Address, amount: Balance)
        -> std::result::Result<(), BackendError>;

    /// Pay out pending rewards without touching principal. Returns the amount paid.
    fn harvest(&self, depositor: Address) -> std::result::Result<Balance, BackendError>;

    /// Principal currently staked by `depositor`.
    fn staked(&self, depositor: Address) -> Balance;

    fn pending_reward(&self, depositor: Address) -> Balance;
}

/// Point-in-time tier scores, read by a sale at snapshot.
pub trait TierScoreSource: Send + Sync + 'static {
    fn tier_score_of(&self, user: Address) -> Result<Balance>;

    /// Every account holding a nonzero score right now.
    fn scored_accounts(&self) -> Result<Vec<(Address, Balance)>>;
}

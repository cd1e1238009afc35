//! Staking vault: pooled shares over a yield farm, per-user locks, tier scores.
//!
//! Pool model:
//! - underlying = idle staking tokens held by the vault + principal staked in the farm
//! - deposit mints `amount * total_shares / underlying` (1:1 into an empty pool)
//! - withdrawal pays `shares * underlying / total_shares`
//! - farm rewards land in the idle balance and raise the exchange rate; `harvest`
//!   takes the fees and compounds the remainder back into the farm
//!
//! Both conversions floor, so rounding never lowers the exchange rate.

use std::{collections::BTreeMap, fmt, sync::Arc};

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::{
    access::{AccessControl, Role},
    backend::{Clock, TierScoreSource, TokenLedger, YieldFarm},
    error::LaunchpadError,
    events::LaunchpadEvent,
    math::{self, bps_of, checked_add, checked_sub},
    Address, AssetId, Balance, Result, Timestamp,
};

pub const MAX_PERFORMANCE_FEE_BPS: u16 = 500;
pub const MAX_CALL_FEE_BPS: u16 = 100;

/// Fixed-point scale of [`PoolInfo::price_per_full_share`].
pub const PRICE_SCALE: u128 = 1_000_000_000_000_000_000;

/// Static vault parameters.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultSettings {
    /// Account holding idle stake and depositing into the farm.
    pub address: Address,
    pub staking_asset: AssetId,
    /// Receives the performance fee on harvest.
    pub treasury: Address,
    pub performance_fee_bps: u16,
    pub call_fee_bps: u16,
    pub max_lock_secs: u64,
}

impl VaultSettings {
    pub fn validate(&self) -> Result<()> {
        validate_fees(self.performance_fee_bps, self.call_fee_bps)?;
        if self.address.is_zero() {
            return Err(LaunchpadError::InvalidConfig("vault address must be set".into()));
        }
        Ok(())
    }
}

fn validate_fees(performance: u16, call: u16) -> Result<()> {
    if performance > MAX_PERFORMANCE_FEE_BPS {
        return Err(LaunchpadError::InvalidConfig(format!(
            "performance fee {performance} bps > {MAX_PERFORMANCE_FEE_BPS}"
        )));
    }
    if call > MAX_CALL_FEE_BPS {
        return Err(LaunchpadError::InvalidConfig(format!(
            "call fee {call} bps > {MAX_CALL_FEE_BPS}"
        )));
    }
    Ok(())
}

/// One user's claim on the pool.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakePosition {
    pub shares: Balance,
    /// Cumulative amount staked; informational only.
    pub principal_deposited: Balance,
    pub last_action_time: Timestamp,
    /// Underlying value of the position right after the last stake/unstake.
    pub underlying_at_last_action: Balance,
    pub lock_start: Timestamp,
    pub lock_duration: u64,
}

impl StakePosition {
    pub fn unlock_time(&self) -> Timestamp {
        self.lock_start.saturating_add(self.lock_duration)
    }
}

/// Read view of a user's position.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UserInfo {
    pub position: StakePosition,
    pub unlock_time: Timestamp,
    /// Current underlying value of the shares; the value sales read as tier score.
    pub tier_score: Balance,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PoolInfo {
    pub total_shares: Balance,
    pub total_underlying: Balance,
    pub idle: Balance,
    pub staked_in_farm: Balance,
    /// Underlying per share scaled by [`PRICE_SCALE`].
    pub price_per_full_share: Balance,
    pub paused: bool,
}

#[derive(Debug, Default)]
struct VaultState {
    total_shares: Balance,
    positions: BTreeMap<Address, StakePosition>,
    paused: bool,
    performance_fee_bps: u16,
    call_fee_bps: u16,
}

pub struct StakingVault {
    settings: VaultSettings,
    ledger: Arc<dyn TokenLedger>,
    farm: Arc<dyn YieldFarm>,
    clock: Arc<dyn Clock>,
    acl: Arc<AccessControl>,
    exec: Mutex<()>,
    state: RwLock<VaultState>,
    events_tx: broadcast::Sender<LaunchpadEvent>,
}

impl fmt::Debug for StakingVault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let st = self.state.read();
        f.debug_struct("StakingVault")
            .field("address", &self.settings.address)
            .field("total_shares", &st.total_shares)
            .field("stakers", &st.positions.len())
            .finish()
    }
}

impl StakingVault {
    /// Build the vault and grant the farm an unlimited allowance over its idle balance.
    pub fn new(
        settings: VaultSettings,
        ledger: Arc<dyn TokenLedger>,
        farm: Arc<dyn YieldFarm>,
        clock: Arc<dyn Clock>,
        acl: Arc<AccessControl>,
        event_capacity: usize,
    ) -> Result<Arc<Self>> {
        settings.validate()?;
        ledger.approve(settings.staking_asset, settings.address, farm.address(), Balance::MAX)?;
        let (tx, _) = broadcast::channel(event_capacity.max(1));
        let state = VaultState {
            performance_fee_bps: settings.performance_fee_bps,
            call_fee_bps: settings.call_fee_bps,
            ..VaultState::default()
        };
        Ok(Arc::new(Self {
            settings,
            ledger,
            farm,
            clock,
            acl,
            exec: Mutex::new(()),
            state: RwLock::new(state),
            events_tx: tx,
        }))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LaunchpadEvent> {
        self.events_tx.subscribe()
    }

    pub fn settings(&self) -> &VaultSettings {
        &self.settings
    }

    fn now(&self) -> Timestamp {
        self.clock.now_unix()
    }

    fn idle(&self) -> Balance {
        self.ledger.balance_of(self.settings.staking_asset, self.settings.address)
    }

    /// Idle balance plus principal parked in the farm.
    pub fn total_underlying(&self) -> Result<Balance> {
        checked_add(self.idle(), self.farm.staked(self.settings.address))
    }

    /// Stake `amount` and lock the position for at least `lock_secs` from now.
    ///
    /// The caller must have approved the vault address for `amount`.
    /// Returns the shares minted.
    pub fn stake(&self, user: Address, amount: Balance, lock_secs: u64) -> Result<Balance> {
        if amount == 0 {
            return Err(LaunchpadError::ZeroAmount);
        }
        if lock_secs > self.settings.max_lock_secs {
            return Err(LaunchpadError::LockTooLong {
                max: self.settings.max_lock_secs,
                requested: lock_secs,
            });
        }
        let _ex = self.exec.lock();
        if self.state.read().paused {
            return Err(LaunchpadError::Paused);
        }

        let now = self.now();
        let pool = self.total_underlying()?;
        let total_shares = self.state.read().total_shares;
        let minted = math::shares_for_deposit(amount, total_shares, pool)?;
        if minted == 0 {
            return Err(LaunchpadError::ZeroAmount);
        }

        let asset = self.settings.staking_asset;
        let vault = self.settings.address;
        self.ledger.transfer_from(asset, vault, user, vault, amount)?;
        if let Err(e) = self.farm.deposit(vault, amount) {
            warn!(
                target: "launchpad::vault",
                %user,
                amount,
                error = %e,
                "farm deposit failed, returning stake"
            );
            self.ledger.transfer(asset, vault, user, amount)?;
            return Err(e.into());
        }

        let mut st = self.state.write();
        let new_total = checked_add(st.total_shares, minted)?;
        let pos = st.positions.entry(user).or_default();
        let remaining = pos.unlock_time().saturating_sub(now);
        pos.shares = checked_add(pos.shares, minted)?;
        pos.principal_deposited = checked_add(pos.principal_deposited, amount)?;
        pos.last_action_time = now;
        pos.lock_start = now;
        pos.lock_duration = remaining.max(lock_secs);
        let shares = pos.shares;
        let unlock_time = pos.unlock_time();
        st.total_shares = new_total;
        let underlying = self.total_underlying()?;
        let value = math::underlying_for_shares(shares, new_total, underlying)?;
        if let Some(p) = st.positions.get_mut(&user) {
            p.underlying_at_last_action = value;
        }
        drop(st);

        info!(target: "launchpad::vault", %user, amount, minted, unlock_time, "staked");
        let _ = self
            .events_tx
            .send(LaunchpadEvent::Staked { user, amount, shares: minted, unlock_time });
        Ok(minted)
    }

    /// Re-lock the position to end `extra_lock_secs` from now. The new unlock time
    /// may not be earlier than the current one.
    pub fn restake(&self, user: Address, extra_lock_secs: u64) -> Result<Timestamp> {
        if extra_lock_secs > self.settings.max_lock_secs {
            return Err(LaunchpadError::LockTooLong {
                max: self.settings.max_lock_secs,
                requested: extra_lock_secs,
            });
        }
        let _ex = self.exec.lock();
        let now = self.now();
        let mut st = self.state.write();
        let pos = st
            .positions
            .get_mut(&user)
            .filter(|p| p.shares > 0)
            .ok_or(LaunchpadError::NoStake)?;
        let current = pos.unlock_time();
        let requested = now.saturating_add(extra_lock_secs);
        if requested < current {
            return Err(LaunchpadError::LockShortened { current, requested });
        }
        pos.lock_start = now;
        pos.lock_duration = extra_lock_secs;
        pos.last_action_time = now;
        drop(st);

        info!(target: "launchpad::vault", %user, unlock_time = requested, "restaked");
        let _ = self.events_tx.send(LaunchpadEvent::Restaked { user, unlock_time: requested });
        Ok(requested)
    }

    /// Burn `shares` and pay out their underlying value. Returns the amount paid.
    pub fn unstake(&self, user: Address, shares: Balance) -> Result<Balance> {
        if shares == 0 {
            return Err(LaunchpadError::ZeroAmount);
        }
        let _ex = self.exec.lock();
        self.unstake_locked(user, Some(shares))
    }

    pub fn unstake_all(&self, user: Address) -> Result<Balance> {
        let _ex = self.exec.lock();
        self.unstake_locked(user, None)
    }

    fn unstake_locked(&self, user: Address, shares: Option<Balance>) -> Result<Balance> {
        let now = self.now();
        let (pos, total_shares) = {
            let st = self.state.read();
            let pos = *st.positions.get(&user).ok_or(LaunchpadError::NoStake)?;
            (pos, st.total_shares)
        };
        let shares = shares.unwrap_or(pos.shares);
        if shares == 0 {
            return Err(LaunchpadError::NoStake);
        }
        if shares > pos.shares {
            return Err(LaunchpadError::InsufficientShares);
        }
        if now < pos.unlock_time() {
            return Err(LaunchpadError::LockedStake { unlock_time: pos.unlock_time() });
        }

        let asset = self.settings.staking_asset;
        let vault = self.settings.address;
        let amount = math::underlying_for_shares(shares, total_shares, self.total_underlying()?)?;

        let idle = self.idle();
        if idle < amount {
            let need = (amount - idle).min(self.farm.staked(vault));
            debug!(target: "launchpad::vault", need, "withdrawing from farm");
            self.farm.withdraw(vault, need)?;
        }
        if amount > 0 {
            self.ledger.transfer(asset, vault, user, amount)?;
        }

        let mut st = self.state.write();
        st.total_shares = checked_sub(st.total_shares, shares)?;
        let remaining = {
            let p = st.positions.get_mut(&user).ok_or(LaunchpadError::NoStake)?;
            p.shares = checked_sub(p.shares, shares)?;
            p.last_action_time = now;
            p.shares
        };
        if remaining == 0 {
            st.positions.remove(&user);
        } else {
            let underlying = self.total_underlying()?;
            let value = math::underlying_for_shares(remaining, st.total_shares, underlying)?;
            if let Some(p) = st.positions.get_mut(&user) {
                p.underlying_at_last_action = value;
            }
        }
        drop(st);

        info!(target: "launchpad::vault", %user, shares, amount, "unstaked");
        let _ = self.events_tx.send(LaunchpadEvent::Unstaked { user, shares, amount });
        Ok(amount)
    }

    /// Collect farm rewards, pay fees and compound the rest.
    /// Returns the reward net of fees.
    pub fn harvest(&self, caller: Address) -> Result<Balance> {
        let _ex = self.exec.lock();
        let (paused, perf_bps, call_bps) = {
            let st = self.state.read();
            (st.paused, st.performance_fee_bps, st.call_fee_bps)
        };
        if paused {
            return Err(LaunchpadError::Paused);
        }
        let asset = self.settings.staking_asset;
        let vault = self.settings.address;

        let reward = self.farm.harvest(vault)?;
        let performance_fee = bps_of(reward, perf_bps)?;
        let call_fee = bps_of(reward, call_bps)?;
        if performance_fee > 0 {
            self.ledger.transfer(asset, vault, self.settings.treasury, performance_fee)?;
        }
        if call_fee > 0 {
            self.ledger.transfer(asset, vault, caller, call_fee)?;
        }
        let idle = self.idle();
        if idle > 0 {
            self.farm.deposit(vault, idle)?;
        }

        let net = reward - performance_fee - call_fee;
        info!(target: "launchpad::vault", %caller, reward, performance_fee, call_fee, "harvested");
        let _ = self
            .events_tx
            .send(LaunchpadEvent::Harvested { caller, reward, performance_fee, call_fee });
        Ok(net)
    }

    pub fn set_fees(
        &self,
        caller: Address,
        performance_fee_bps: u16,
        call_fee_bps: u16,
    ) -> Result<()> {
        self.acl.require(caller, Role::Admin)?;
        validate_fees(performance_fee_bps, call_fee_bps)?;
        let mut st = self.state.write();
        st.performance_fee_bps = performance_fee_bps;
        st.call_fee_bps = call_fee_bps;
        info!(target: "launchpad::vault", performance_fee_bps, call_fee_bps, "fees updated");
        Ok(())
    }

    pub fn set_paused(&self, caller: Address, paused: bool) -> Result<()> {
        self.acl.require(caller, Role::Admin)?;
        self.state.write().paused = paused;
        info!(target: "launchpad::vault", paused, "pause switched");
        let _ = self.events_tx.send(LaunchpadEvent::VaultPaused { paused });
        Ok(())
    }

    /// Underlying value of a user's shares.
    pub fn stake_amount(&self, user: Address) -> Result<Balance> {
        let st = self.state.read();
        let shares = st.positions.get(&user).map(|p| p.shares).unwrap_or(0);
        math::underlying_for_shares(shares, st.total_shares, self.total_underlying()?)
    }

    pub fn user_info(&self, user: Address) -> Result<UserInfo> {
        let position = self.state.read().positions.get(&user).copied().unwrap_or_default();
        Ok(UserInfo {
            position,
            unlock_time: position.unlock_time(),
            tier_score: self.stake_amount(user)?,
        })
    }

    pub fn pool_info(&self) -> Result<PoolInfo> {
        let st = self.state.read();
        let idle = self.idle();
        let staked_in_farm = self.farm.staked(self.settings.address);
        let total_underlying = checked_add(idle, staked_in_farm)?;
        let price_per_full_share = if st.total_shares == 0 {
            PRICE_SCALE
        } else {
            math::mul_div(total_underlying, PRICE_SCALE, st.total_shares)?
        };
        Ok(PoolInfo {
            total_shares: st.total_shares,
            total_underlying,
            idle,
            staked_in_farm,
            price_per_full_share,
            paused: st.paused,
        })
    }

    pub fn staker_count(&self) -> usize {
        self.state.read().positions.len()
    }
}

impl TierScoreSource for StakingVault {
    fn tier_score_of(&self, user: Address) -> Result<Balance> {
        self.stake_amount(user)
    }

    fn scored_accounts(&self) -> Result<Vec<(Address, Balance)>> {
        let st = self.state.read();
        let underlying = self.total_underlying()?;
        let mut out = Vec::with_capacity(st.positions.len());
        for (addr, p) in st.positions.iter() {
            let score = math::underlying_for_shares(p.shares, st.total_shares, underlying)?;
            if score > 0 {
                out.push((*addr, score));
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::{ManualClock, MemFarm, MemLedger};

    const WOOF: AssetId = AssetId(1);
    const T0: Timestamp = 1_700_000_000;

    fn addr(x: u8) -> Address {
        Address::from_byte(x)
    }

    struct Fixture {
        ledger: Arc<MemLedger>,
        farm: Arc<MemFarm>,
        clock: Arc<ManualClock>,
        vault: Arc<StakingVault>,
    }

    fn settings() -> VaultSettings {
        VaultSettings {
            address: addr(0xEE),
            staking_asset: WOOF,
            treasury: addr(0xFE),
            performance_fee_bps: 200,
            call_fee_bps: 25,
            max_lock_secs: 365 * 86_400,
        }
    }

    fn fixture() -> Fixture {
        let ledger = Arc::new(MemLedger::new());
        let farm = Arc::new(MemFarm::new(addr(0xFA), WOOF, ledger.clone()));
        let clock = Arc::new(ManualClock::new(T0));
        let acl = Arc::new(AccessControl::new(addr(0xAD)));
        let vault =
            StakingVault::new(settings(), ledger.clone(), farm.clone(), clock.clone(), acl, 64)
                .unwrap();
        for u in [0x10, 0x11, 0x12] {
            ledger.mint(WOOF, addr(u), 1_000_000);
            ledger.approve(WOOF, addr(u), addr(0xEE), Balance::MAX).unwrap();
        }
        Fixture { ledger, farm, clock, vault }
    }

    #[test]
    fn stake_forwards_principal_to_farm() {
        let f = fixture();
        let big = addr(0x10);
        let minted = f.vault.stake(big, 10, 10).unwrap();
        assert_eq!(minted, 10);
        assert_eq!(f.ledger.balance_of(WOOF, addr(0xEE)), 0);
        assert_eq!(f.ledger.balance_of(WOOF, addr(0xFA)), 10);
        assert_eq!(f.ledger.balance_of(WOOF, big), 1_000_000 - 10);
        assert_eq!(f.vault.stake_amount(big).unwrap(), 10);
    }

    #[test]
    fn locked_stake_cannot_be_withdrawn() {
        let f = fixture();
        let big = addr(0x10);
        f.vault.stake(big, 10, 10).unwrap();
        assert!(matches!(
            f.vault.unstake_all(big),
            Err(LaunchpadError::LockedStake { unlock_time }) if unlock_time == T0 + 10
        ));
        f.clock.advance(9);
        assert!(matches!(f.vault.unstake(big, 1), Err(LaunchpadError::LockedStake { .. })));

        f.clock.advance(1);
        let shares = f.vault.user_info(big).unwrap().position.shares;
        assert_eq!(f.vault.unstake(big, shares).unwrap(), 10);
        assert_eq!(f.ledger.balance_of(WOOF, big), 1_000_000);
        assert_eq!(f.ledger.balance_of(WOOF, addr(0xFA)), 0);
        assert_eq!(f.vault.staker_count(), 0);
    }

    #[test]
    fn restake_extends_from_now_and_never_shortens() {
        let f = fixture();
        let big = addr(0x10);
        f.vault.stake(big, 10, 30).unwrap();

        f.clock.advance(20);
        let unlock = f.vault.restake(big, 20).unwrap();
        assert_eq!(unlock, T0 + 40);
        assert_eq!(f.vault.user_info(big).unwrap().unlock_time, T0 + 40);

        // 20s remaining now; asking for 5 would move the unlock earlier
        assert!(matches!(
            f.vault.restake(big, 5),
            Err(LaunchpadError::LockShortened { current, .. }) if current == T0 + 40
        ));

        f.clock.advance(10);
        assert!(matches!(f.vault.unstake_all(big), Err(LaunchpadError::LockedStake { .. })));
        f.clock.advance(10);
        assert_eq!(f.vault.unstake_all(big).unwrap(), 10);
        assert_eq!(f.ledger.balance_of(WOOF, big), 1_000_000);
    }

    #[test]
    fn restake_requires_position() {
        let f = fixture();
        assert!(matches!(f.vault.restake(addr(0x10), 10), Err(LaunchpadError::NoStake)));
    }

    #[test]
    fn stake_keeps_longer_remaining_lock() {
        let f = fixture();
        let u = addr(0x10);
        f.vault.stake(u, 100, 1_000).unwrap();
        f.clock.advance(100);
        f.vault.stake(u, 100, 10).unwrap();
        // remaining 900 > 10
        assert_eq!(f.vault.user_info(u).unwrap().unlock_time, T0 + 1_000);
        f.vault.stake(u, 100, 5_000).unwrap();
        assert_eq!(f.vault.user_info(u).unwrap().unlock_time, T0 + 100 + 5_000);
    }

    #[test]
    fn lock_longer_than_max_rejected() {
        let f = fixture();
        assert!(matches!(
            f.vault.stake(addr(0x10), 10, 365 * 86_400 + 1),
            Err(LaunchpadError::LockTooLong { .. })
        ));
    }

    #[test]
    fn harvest_compounds_and_pays_fees() {
        let f = fixture();
        let (a, b, keeper) = (addr(0x10), addr(0x11), addr(0x12));
        f.vault.stake(a, 1_000, 0).unwrap();
        let before = f.vault.pool_info().unwrap().price_per_full_share;

        f.farm.accrue(addr(0xEE), 10_000);
        let net = f.vault.harvest(keeper).unwrap();
        // 2% performance + 0.25% call
        assert_eq!(net, 10_000 - 200 - 25);
        assert_eq!(f.ledger.balance_of(WOOF, addr(0xFE)), 200);
        assert_eq!(f.ledger.balance_of(WOOF, keeper), 1_000_000 + 25);

        let info = f.vault.pool_info().unwrap();
        assert_eq!(info.idle, 0);
        assert_eq!(info.total_underlying, 1_000 + net);
        assert!(info.price_per_full_share > before);
        assert_eq!(f.vault.stake_amount(a).unwrap(), 1_000 + net);

        // later depositor buys in at the higher rate
        let minted = f.vault.stake(b, 1_000, 0).unwrap();
        assert_eq!(minted, 1_000 * 1_000 / (1_000 + net));
    }

    #[test]
    fn exchange_rate_is_monotonic_over_stake_and_unstake() {
        let f = fixture();
        let users = [addr(0x10), addr(0x11), addr(0x12)];
        let mut last = f.vault.pool_info().unwrap().price_per_full_share;
        let mut check = |v: &StakingVault| {
            let p = v.pool_info().unwrap().price_per_full_share;
            assert!(p >= last, "rate dropped: {p} < {last}");
            last = p;
        };

        f.vault.stake(users[0], 333, 0).unwrap();
        check(&*f.vault);
        f.farm.accrue(addr(0xEE), 77);
        f.vault.harvest(users[2]).unwrap();
        check(&*f.vault);
        f.vault.stake(users[1], 1_001, 0).unwrap();
        check(&*f.vault);
        f.vault.unstake(users[0], 100).unwrap();
        check(&*f.vault);
        f.vault.stake(users[2], 7, 0).unwrap();
        check(&*f.vault);
        f.vault.unstake_all(users[1]).unwrap();
        check(&*f.vault);
        f.vault.unstake_all(users[0]).unwrap();
        check(&*f.vault);
    }

    #[test]
    fn unstake_collects_unharvested_rewards_for_the_pool() {
        let f = fixture();
        let (a, b) = (addr(0x10), addr(0x11));
        f.vault.stake(a, 500, 0).unwrap();
        f.vault.stake(b, 500, 0).unwrap();
        f.farm.accrue(addr(0xEE), 100);
        // pending reward is not yet part of the pool value
        assert_eq!(f.vault.unstake_all(a).unwrap(), 500);
        // the withdrawal pulled the reward into idle; b now owns all of it
        assert_eq!(f.vault.stake_amount(b).unwrap(), 600);
        assert_eq!(f.vault.unstake_all(b).unwrap(), 600);
    }

    #[test]
    fn farm_failure_leaves_no_trace() {
        let f = fixture();
        let u = addr(0x10);
        f.farm.set_failing(true);
        assert!(matches!(f.vault.stake(u, 50, 0), Err(LaunchpadError::Backend(_))));
        assert_eq!(f.ledger.balance_of(WOOF, u), 1_000_000);
        assert_eq!(f.vault.pool_info().unwrap().total_shares, 0);
        assert_eq!(f.vault.staker_count(), 0);
    }

    #[test]
    fn pause_blocks_stake_but_not_unstake() {
        let f = fixture();
        let u = addr(0x10);
        f.vault.stake(u, 50, 0).unwrap();
        assert!(matches!(f.vault.set_paused(u, true), Err(LaunchpadError::Unauthorized { .. })));
        f.vault.set_paused(addr(0xAD), true).unwrap();
        assert!(matches!(f.vault.stake(u, 50, 0), Err(LaunchpadError::Paused)));
        assert!(matches!(f.vault.harvest(u), Err(LaunchpadError::Paused)));
        assert_eq!(f.vault.unstake_all(u).unwrap(), 50);
    }

    #[test]
    fn fee_caps_enforced() {
        let f = fixture();
        assert!(f.vault.set_fees(addr(0xAD), 501, 0).is_err());
        assert!(f.vault.set_fees(addr(0xAD), 0, 101).is_err());
        f.vault.set_fees(addr(0xAD), 0, 0).unwrap();
        f.vault.stake(addr(0x10), 10, 0).unwrap();
        f.farm.accrue(addr(0xEE), 10);
        assert_eq!(f.vault.harvest(addr(0x11)).unwrap(), 10);
    }

    #[test]
    fn scored_accounts_reflect_live_value() {
        let f = fixture();
        f.vault.stake(addr(0x10), 10, 0).unwrap();
        f.vault.stake(addr(0x11), 30, 0).unwrap();
        let mut scores = f.vault.scored_accounts().unwrap();
        scores.sort();
        assert_eq!(scores, vec![(addr(0x10), 10), (addr(0x11), 30)]);

        f.farm.accrue(addr(0xEE), 40);
        f.vault.set_fees(addr(0xAD), 0, 0).unwrap();
        f.vault.harvest(addr(0x12)).unwrap();
        assert_eq!(f.vault.tier_score_of(addr(0x10)).unwrap(), 20);
        assert_eq!(f.vault.tier_score_of(addr(0x11)).unwrap(), 60);
    }

    #[test]
    fn insufficient_shares_and_events() {
        let f = fixture();
        let mut rx = f.vault.subscribe();
        let u = addr(0x10);
        f.vault.stake(u, 10, 0).unwrap();
        assert!(matches!(f.vault.unstake(u, 11), Err(LaunchpadError::InsufficientShares)));
        assert!(matches!(f.vault.unstake(u, 0), Err(LaunchpadError::ZeroAmount)));
        assert!(matches!(
            rx.try_recv().unwrap(),
            LaunchpadEvent::Staked { amount: 10, shares: 10, .. }
        ));
    }
}

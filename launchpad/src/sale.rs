//! Per-sale state machine.
//!
//! Timeline (see [`crate::phase`]):
//! Draft -> Snapshot -> UserContribution -> Overflow1 -> Overflow2 -> GeneralSale
//! -> Distribution -> Settled | Cancelled
//!
//! - Snapshot: one-time capture of every scored vault account; each tier's weight
//!   (bps of `total_supply`) is split evenly across that tier's accounts and
//!   converted to contribution units. Frozen afterwards.
//! - UserContribution: KYC'd users contribute up to their snapshot allocation.
//! - Overflow rounds: unused allocation is pooled and granted pro-rata by snapshot
//!   allocation to users who exhausted their cap and asked for more.
//! - GeneralSale: first come first served against the unsold remainder.
//! - Distribution: softcap met -> claims + developer settlement; otherwise cancelled
//!   and every contributor can take their funds back. Decided once, lazily.
//!
//! All mutating calls run under the sale's execute mutex. Checks happen before any
//! transfer and state is written only after the transfer succeeded. Lazy passes
//! (overflow allocation, softcap outcome) run on a staged copy of the state that is
//! committed together with the call, so a failed call leaves nothing behind.

use std::{collections::BTreeMap, fmt, sync::Arc};

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::{
    access::{AccessControl, Role},
    backend::{Clock, TierScoreSource, TokenLedger},
    error::LaunchpadError,
    events::LaunchpadEvent,
    math::{self, checked_add},
    phase::{phase_of, Phase, SaleTimes},
    tier::{Tier, TierTable, TierWeights},
    Address, AssetId, Balance, Result, SaleId, Timestamp,
};

/// Number of overflow rounds.
pub const OVERFLOW_ROUNDS: usize = 2;

/// Collaborators shared by the registry and all of its sales.
pub(crate) struct SaleContext {
    pub(crate) ledger: Arc<dyn TokenLedger>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) scores: Arc<dyn TierScoreSource>,
    pub(crate) acl: Arc<AccessControl>,
    pub(crate) tiers: RwLock<TierTable>,
    /// Used by snapshots that are not given weights of their own.
    pub(crate) default_weights: RwLock<Option<TierWeights>>,
    pub(crate) events_tx: broadcast::Sender<LaunchpadEvent>,
}

/// Commercial terms of a sale.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleTerms {
    pub developer: Address,
    pub sale_token: AssetId,
    pub contribution_token: AssetId,
    /// Decimal scale of the contribution token.
    pub contribution_decimals: u8,
    /// Sale tokens offered (held in custody).
    pub total_supply: Balance,
    /// Minimum size of a user's first contribution, in contribution units.
    pub min_contribution: Balance,
    pub soft_cap: Balance,
    /// Sale-token base units per whole contribution token. Zero until scheduled.
    pub rate: Balance,
}

/// Draft-time changes applied through the registry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectUpdate {
    pub contribution_token: AssetId,
    pub contribution_decimals: u8,
    pub min_contribution: Balance,
    pub soft_cap: Balance,
    pub rate: Balance,
    pub times: SaleTimes,
}

/// One user's position in one sale.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAllocation {
    /// Allocation cap fixed at snapshot, in contribution units.
    pub snapshot_amount: Balance,
    pub tier: Option<Tier>,
    /// Extra allocation asked for across both overflow rounds.
    pub overflow_requested: Balance,
    pub overflow_granted: [Balance; OVERFLOW_ROUNDS],
    /// Contributed during the user-contribution window.
    pub base_contributed: Balance,
    pub overflow_contributed: [Balance; OVERFLOW_ROUNDS],
    pub general_contributed: Balance,
    pub kyc_approved: bool,
    pub claimed: bool,
    pub refunded: bool,
}

impl UserAllocation {
    /// Total contributed across every phase.
    pub fn contributed_amount(&self) -> Balance {
        self.allocated_contributed().saturating_add(self.general_contributed)
    }

    /// Snapshot allocation plus every overflow grant received.
    pub fn allocation_cap(&self) -> Balance {
        self.cap_before_round(OVERFLOW_ROUNDS)
    }

    /// Contributions counted against the allocation cap.
    pub fn allocated_contributed(&self) -> Balance {
        self.overflow_contributed
            .iter()
            .fold(self.base_contributed, |acc, v| acc.saturating_add(*v))
    }

    fn cap_before_round(&self, round: usize) -> Balance {
        self.overflow_granted[..round]
            .iter()
            .fold(self.snapshot_amount, |acc, v| acc.saturating_add(*v))
    }

    fn outstanding_demand(&self, round: usize) -> Balance {
        let granted = self.overflow_granted[..round]
            .iter()
            .fold(0u128, |acc, v| acc.saturating_add(*v));
        self.overflow_requested.saturating_sub(granted)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct SnapshotRecord {
    taken_at: Timestamp,
    weights: TierWeights,
    table: TierTable,
    tier_members: [usize; 5],
    participants: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Outcome {
    Succeeded,
    Cancelled,
}

/// `getProjectBalance` view.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProjectBalance {
    pub total_supply: Balance,
    pub total_claimed: Balance,
    pub total_contributed: Balance,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SaleSummary {
    pub id: SaleId,
    pub phase: Phase,
    pub custody: Address,
    pub terms: SaleTerms,
    pub times: Option<SaleTimes>,
    pub snapshot_taken_at: Option<Timestamp>,
    pub snapshot_weights: Option<TierWeights>,
    /// Accounts captured at snapshot, per tier (Basic..Divine), and in total.
    pub tier_members: [usize; 5],
    pub snapshot_accounts: usize,
    /// Accounts that contributed anything.
    pub participants: usize,
    pub total_contributed: Balance,
    pub total_claimed: Balance,
    pub total_returned: Balance,
    pub overflow_pools: [Option<Balance>; OVERFLOW_ROUNDS],
}

#[derive(Clone, Debug)]
struct SaleState {
    terms: SaleTerms,
    times: Option<SaleTimes>,
    snapshot: Option<SnapshotRecord>,
    allocations: BTreeMap<Address, UserAllocation>,
    total_contributed: Balance,
    total_claimed: Balance,
    total_returned: Balance,
    /// Pool redistributed in each overflow round; `None` until that round's pass ran.
    overflow_pools: [Option<Balance>; OVERFLOW_ROUNDS],
    outcome: Option<Outcome>,
    settled: bool,
}

/// State with the due lazy passes applied, and the events they produced.
type Staged = Option<(SaleState, Vec<LaunchpadEvent>)>;

impl SaleState {
    fn phase(&self, now: Timestamp) -> Phase {
        phase_of(
            self.times.as_ref(),
            self.outcome == Some(Outcome::Cancelled),
            self.settled,
            now,
        )
    }

    fn sale_capacity(&self) -> Result<Balance> {
        math::contribution_for_tokens(
            self.terms.total_supply,
            self.terms.rate,
            self.terms.contribution_decimals,
        )
    }

    fn unsold(&self) -> Result<Balance> {
        Ok(self.sale_capacity()?.saturating_sub(self.total_contributed))
    }

    fn check_first_contribution(&self, a: &UserAllocation, amount: Balance) -> Result<()> {
        if a.contributed_amount() == 0 && amount < self.terms.min_contribution {
            return Err(LaunchpadError::BelowMinimumContribution {
                min: self.terms.min_contribution,
                amount,
            });
        }
        Ok(())
    }

    fn pass_due(&self, now: Timestamp) -> bool {
        match self.phase(now) {
            Phase::Overflow1 => self.overflow_pools[0].is_none(),
            Phase::Overflow2 => self.overflow_pools[1].is_none(),
            Phase::Distribution => self.outcome.is_none(),
            _ => false,
        }
    }

    /// Copy of the state with the pass due at `now` applied, or `None` when
    /// nothing is pending. The committed state is untouched.
    fn staged(&self, now: Timestamp, id: SaleId) -> Result<Staged> {
        if !self.pass_due(now) {
            return Ok(None);
        }
        let mut next = self.clone();
        let mut events = Vec::new();
        match next.phase(now) {
            Phase::Overflow1 => {
                next.ensure_overflow_round(0, id, &mut events)?;
            }
            Phase::Overflow2 => {
                next.ensure_overflow_round(1, id, &mut events)?;
            }
            _ => {
                next.resolve(now, id, &mut events)?;
            }
        }
        Ok(Some((next, events)))
    }

    /// Pool unused allocation and grant it to exhausted requesters, once per round.
    /// Inputs are frozen from the moment the round opens, so the pass is the same
    /// whichever call triggers it. Returns the pool size.
    ///
    /// Grants of an earlier round lapse when it closes. The pool is the snapshot
    /// total not yet contributed under allocation, bounded by the unsold capacity.
    fn ensure_overflow_round(
        &mut self,
        round: usize,
        id: SaleId,
        events: &mut Vec<LaunchpadEvent>,
    ) -> Result<Balance> {
        if let Some(pool) = self.overflow_pools[round] {
            return Ok(pool);
        }
        if round > 0 {
            self.ensure_overflow_round(round - 1, id, events)?;
        }

        let mut allocated: Balance = 0;
        let mut used: Balance = 0;
        for a in self.allocations.values() {
            allocated = checked_add(allocated, a.snapshot_amount)?;
            used = checked_add(used, a.allocated_contributed())?;
        }
        let pool = allocated.saturating_sub(used).min(self.unsold()?);

        let eligible: Vec<Address> = self
            .allocations
            .iter()
            .filter(|(_, a)| {
                a.kyc_approved
                    && a.snapshot_amount > 0
                    && a.outstanding_demand(round) > 0
                    && a.allocated_contributed() == a.cap_before_round(round)
            })
            .map(|(addr, _)| *addr)
            .collect();
        let weight: Balance = eligible
            .iter()
            .filter_map(|addr| self.allocations.get(addr))
            .fold(0u128, |acc, a| acc.saturating_add(a.snapshot_amount));

        let mut granted: Balance = 0;
        if pool > 0 && weight > 0 {
            for addr in &eligible {
                if let Some(a) = self.allocations.get_mut(addr) {
                    let share = math::mul_div(pool, a.snapshot_amount, weight)?;
                    let grant = share.min(a.outstanding_demand(round));
                    a.overflow_granted[round] = grant;
                    granted = checked_add(granted, grant)?;
                }
            }
        }
        self.overflow_pools[round] = Some(pool);

        debug!(
            target: "launchpad::sale",
            sale = %id,
            round = round + 1,
            pool,
            granted,
            requesters = eligible.len(),
            "overflow pass staged"
        );
        let round = round as u8 + 1;
        events.push(LaunchpadEvent::OverflowAllocated { id, round, pool, granted });
        Ok(pool)
    }

    /// Decide the softcap outcome the first time the sale is touched after
    /// distribution time. Returns the resulting phase.
    fn resolve(
        &mut self,
        now: Timestamp,
        id: SaleId,
        events: &mut Vec<LaunchpadEvent>,
    ) -> Result<Phase> {
        let phase = self.phase(now);
        match phase {
            Phase::Settled | Phase::Cancelled => Ok(phase),
            Phase::Distribution => {
                if self.outcome.is_none() {
                    if self.total_contributed < self.terms.soft_cap {
                        self.outcome = Some(Outcome::Cancelled);
                        events.push(LaunchpadEvent::SaleCancelled {
                            id,
                            total_contributed: self.total_contributed,
                        });
                    } else {
                        self.outcome = Some(Outcome::Succeeded);
                    }
                }
                Ok(self.phase(now))
            }
            actual => Err(LaunchpadError::PhaseMismatch { expected: Phase::Distribution, actual }),
        }
    }
}

/// Swap in the staged state, if any, and hand back the events it produced.
fn commit(st: &mut SaleState, staged: Staged) -> Vec<LaunchpadEvent> {
    match staged {
        Some((next, events)) => {
            *st = next;
            events
        }
        None => Vec::new(),
    }
}

pub struct Sale {
    id: SaleId,
    custody: Address,
    ctx: Arc<SaleContext>,
    exec: Mutex<()>,
    state: RwLock<SaleState>,
}

impl fmt::Debug for Sale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sale")
            .field("id", &self.id)
            .field("custody", &self.custody)
            .field("phase", &self.phase())
            .finish()
    }
}

impl Sale {
    pub(crate) fn new(
        id: SaleId,
        custody: Address,
        terms: SaleTerms,
        ctx: Arc<SaleContext>,
    ) -> Self {
        Self {
            id,
            custody,
            ctx,
            exec: Mutex::new(()),
            state: RwLock::new(SaleState {
                terms,
                times: None,
                snapshot: None,
                allocations: BTreeMap::new(),
                total_contributed: 0,
                total_claimed: 0,
                total_returned: 0,
                overflow_pools: [None; OVERFLOW_ROUNDS],
                outcome: None,
                settled: false,
            }),
        }
    }

    pub fn id(&self) -> SaleId {
        self.id
    }

    /// Account holding the sale tokens and the collected contributions.
    pub fn custody(&self) -> Address {
        self.custody
    }

    fn now(&self) -> Timestamp {
        self.ctx.clock.now_unix()
    }

    fn emit(&self, ev: LaunchpadEvent) {
        let _ = self.ctx.events_tx.send(ev);
    }

    /// Emit the events of a committed lazy pass.
    fn publish(&self, events: Vec<LaunchpadEvent>) {
        for ev in events {
            match &ev {
                LaunchpadEvent::OverflowAllocated { round, pool, granted, .. } => {
                    info!(
                        target: "launchpad::sale",
                        sale = %self.id,
                        round = *round,
                        pool = *pool,
                        granted = *granted,
                        "overflow round allocated"
                    );
                }
                LaunchpadEvent::SaleCancelled { total_contributed, .. } => {
                    info!(
                        target: "launchpad::sale",
                        sale = %self.id,
                        total = *total_contributed,
                        "softcap missed, sale cancelled"
                    );
                }
                _ => {}
            }
            self.emit(ev);
        }
    }

    pub fn phase(&self) -> Phase {
        self.state.read().phase(self.now())
    }

    pub fn terms(&self) -> SaleTerms {
        self.state.read().terms.clone()
    }

    /// `getProjectTimes`: the six boundaries, or `None` while unscheduled.
    pub fn project_times(&self) -> Option<SaleTimes> {
        self.state.read().times
    }

    /// `getProjectBalance`.
    pub fn project_balance(&self) -> ProjectBalance {
        let st = self.state.read();
        ProjectBalance {
            total_supply: st.terms.total_supply,
            total_claimed: st.total_claimed,
            total_contributed: st.total_contributed,
        }
    }

    /// `getUserInfo`: a zeroed record for accounts the sale has never seen.
    pub fn user_info(&self, user: Address) -> UserAllocation {
        self.state.read().allocations.get(&user).copied().unwrap_or_default()
    }

    pub fn snapshot_taken(&self) -> bool {
        self.state.read().snapshot.is_some()
    }

    /// Tier table frozen into this sale at snapshot.
    pub fn snapshot_tier_table(&self) -> Option<TierTable> {
        self.state.read().snapshot.as_ref().map(|s| s.table)
    }

    pub fn summary(&self) -> SaleSummary {
        let st = self.state.read();
        let snapshot = st.snapshot.as_ref();
        SaleSummary {
            id: self.id,
            phase: st.phase(self.now()),
            custody: self.custody,
            terms: st.terms.clone(),
            times: st.times,
            snapshot_taken_at: snapshot.map(|s| s.taken_at),
            snapshot_weights: snapshot.map(|s| s.weights),
            tier_members: snapshot.map(|s| s.tier_members).unwrap_or_default(),
            snapshot_accounts: snapshot.map(|s| s.participants).unwrap_or(0),
            participants: st
                .allocations
                .values()
                .filter(|a| a.contributed_amount() > 0)
                .count(),
            total_contributed: st.total_contributed,
            total_claimed: st.total_claimed,
            total_returned: st.total_returned,
            overflow_pools: st.overflow_pools,
        }
    }

    /// Apply Draft-time changes. Only reachable through the registry.
    pub(crate) fn apply_update(&self, update: ProjectUpdate) -> Result<()> {
        let _ex = self.exec.lock();
        let now = self.now();
        let mut st = self.state.write();
        if st.snapshot.is_some() {
            return Err(LaunchpadError::AlreadySnapshotted);
        }
        let phase = st.phase(now);
        if phase != Phase::Draft {
            return Err(LaunchpadError::PhaseMismatch { expected: Phase::Draft, actual: phase });
        }
        if update.rate == 0 {
            return Err(LaunchpadError::InvalidConfig("rate must be > 0".into()));
        }
        update.times.validate(now)?;
        let capacity = math::contribution_for_tokens(
            st.terms.total_supply,
            update.rate,
            update.contribution_decimals,
        )?;
        if update.soft_cap > capacity {
            return Err(LaunchpadError::InvalidConfig(format!(
                "soft cap {} exceeds sale capacity {capacity}",
                update.soft_cap
            )));
        }

        st.terms.contribution_token = update.contribution_token;
        st.terms.contribution_decimals = update.contribution_decimals;
        st.terms.min_contribution = update.min_contribution;
        st.terms.soft_cap = update.soft_cap;
        st.terms.rate = update.rate;
        st.times = Some(update.times);
        drop(st);

        info!(
            target: "launchpad::sale",
            sale = %self.id,
            snapshot = update.times.snapshot,
            distribution = update.times.distribution,
            "project updated"
        );
        self.emit(LaunchpadEvent::ProjectUpdated { id: self.id });
        Ok(())
    }

    /// Capture every scored vault account and fix its allocation. Admin only,
    /// once, within `[snapshot, user_contribution)`. Without explicit `weights`
    /// the registry's default weights apply. Returns the number of accounts
    /// captured.
    pub fn take_snapshot_and_allocate(
        &self,
        caller: Address,
        weights: Option<TierWeights>,
    ) -> Result<usize> {
        self.ctx.acl.require(caller, Role::Admin)?;
        let weights = match weights {
            Some(w) => w,
            None => (*self.ctx.default_weights.read()).ok_or_else(|| {
                LaunchpadError::InvalidConfig("no tier weights given and no default set".into())
            })?,
        };
        weights.validate()?;
        let _ex = self.exec.lock();
        let now = self.now();
        let mut st = self.state.write();
        if st.snapshot.is_some() {
            return Err(LaunchpadError::AlreadySnapshotted);
        }
        let phase = st.phase(now);
        if phase != Phase::Snapshot {
            return Err(LaunchpadError::PhaseMismatch { expected: Phase::Snapshot, actual: phase });
        }

        let table = *self.ctx.tiers.read();
        let scored = self.ctx.scores.scored_accounts()?;

        let mut tier_members = [0usize; 5];
        let tiered: Vec<(Address, Option<Tier>)> = scored
            .iter()
            .map(|(addr, score)| (*addr, table.tier_of(*score)))
            .collect();
        for t in tiered.iter().filter_map(|(_, t)| *t) {
            tier_members[t.index()] += 1;
        }

        let mut per_member = [0u128; 5];
        for t in Tier::ALL {
            let members = tier_members[t.index()] as u128;
            if members == 0 {
                continue;
            }
            let tier_tokens = math::bps_of(st.terms.total_supply, weights.weight(t))?;
            let member_tokens = tier_tokens / members;
            per_member[t.index()] = math::contribution_for_tokens(
                member_tokens,
                st.terms.rate,
                st.terms.contribution_decimals,
            )?;
        }

        for (addr, tier) in &tiered {
            let a = st.allocations.entry(*addr).or_default();
            a.tier = *tier;
            a.snapshot_amount = tier.map(|t| per_member[t.index()]).unwrap_or(0);
            debug!(
                target: "launchpad::sale",
                sale = %self.id,
                user = %addr,
                ?tier,
                amount = a.snapshot_amount,
                "allocation fixed"
            );
        }
        let participants = tiered.len();
        st.snapshot = Some(SnapshotRecord {
            taken_at: now,
            weights,
            table,
            tier_members,
            participants,
        });
        drop(st);

        info!(
            target: "launchpad::sale",
            sale = %self.id,
            participants,
            ?tier_members,
            "snapshot taken"
        );
        self.emit(LaunchpadEvent::SnapshotTaken { id: self.id, weights, participants });
        Ok(participants)
    }

    /// Toggle KYC approval for `user`. Allowed until distribution.
    pub fn set_kyc(&self, caller: Address, user: Address, approved: bool) -> Result<()> {
        self.set_kyc_batch(caller, &[user], approved)
    }

    /// An open overflow round is allocated before any approval changes.
    pub fn set_kyc_batch(&self, caller: Address, users: &[Address], approved: bool) -> Result<()> {
        self.ctx.acl.require(caller, Role::KycOperator)?;
        let _ex = self.exec.lock();
        let now = self.now();
        let mut st = self.state.write();
        let phase = st.phase(now);
        if phase >= Phase::Distribution {
            return Err(LaunchpadError::PhaseMismatch {
                expected: Phase::GeneralSale,
                actual: phase,
            });
        }
        let staged = st.staged(now, self.id)?;
        let events = commit(&mut st, staged);
        for user in users {
            st.allocations.entry(*user).or_default().kyc_approved = approved;
        }
        drop(st);

        self.publish(events);
        for user in users {
            debug!(target: "launchpad::sale", sale = %self.id, %user, approved, "kyc updated");
            self.emit(LaunchpadEvent::KycUpdated { id: self.id, user: *user, approved });
        }
        Ok(())
    }

    /// Ask for `amount` more allocation in the overflow rounds. Open during the
    /// user-contribution window and the first overflow round.
    pub fn request_overflow(&self, user: Address, amount: Balance) -> Result<Balance> {
        if amount == 0 {
            return Err(LaunchpadError::ZeroAmount);
        }
        let _ex = self.exec.lock();
        let now = self.now();
        let mut st = self.state.write();
        let phase = st.phase(now);
        if !matches!(phase, Phase::UserContribution | Phase::Overflow1) {
            return Err(LaunchpadError::PhaseMismatch {
                expected: Phase::UserContribution,
                actual: phase,
            });
        }
        let current = st
            .allocations
            .get(&user)
            .copied()
            .filter(|a| a.snapshot_amount > 0)
            .ok_or(LaunchpadError::AllocationExceeded { available: 0, requested: amount })?;
        if !current.kyc_approved {
            return Err(LaunchpadError::NotKycApproved);
        }
        let total = checked_add(current.overflow_requested, amount)?;

        let staged = st.staged(now, self.id)?;
        let events = commit(&mut st, staged);
        if let Some(a) = st.allocations.get_mut(&user) {
            a.overflow_requested = total;
        }
        drop(st);

        self.publish(events);
        info!(
            target: "launchpad::sale",
            sale = %self.id,
            %user,
            amount,
            total,
            "overflow requested"
        );
        self.emit(LaunchpadEvent::OverflowRequested { id: self.id, user, amount });
        Ok(total)
    }

    /// Run the allocation pass of the current overflow round if nobody has yet.
    /// Anyone may call. Returns that round's pool.
    pub fn allocate_overflow(&self) -> Result<Balance> {
        let _ex = self.exec.lock();
        let now = self.now();
        let mut st = self.state.write();
        let round = match st.phase(now) {
            Phase::Overflow1 => 0,
            Phase::Overflow2 => 1,
            actual => {
                return Err(LaunchpadError::PhaseMismatch { expected: Phase::Overflow1, actual });
            }
        };
        let staged = st.staged(now, self.id)?;
        let events = commit(&mut st, staged);
        let pool = st.overflow_pools[round].unwrap_or(0);
        drop(st);

        self.publish(events);
        Ok(pool)
    }

    /// Contribute `amount` of the contribution token. What the user may put in
    /// depends on the phase: snapshot allocation, overflow grant, or the unsold
    /// remainder during the general sale. Never more than the unsold capacity.
    /// The caller must have approved the sale's custody account.
    pub fn contribute(&self, user: Address, amount: Balance) -> Result<Balance> {
        if amount == 0 {
            return Err(LaunchpadError::ZeroAmount);
        }
        let _ex = self.exec.lock();
        let now = self.now();
        let mut st = self.state.write();
        let phase = st.phase(now);
        let round = match phase {
            Phase::UserContribution | Phase::GeneralSale => None,
            Phase::Overflow1 => Some(0),
            Phase::Overflow2 => Some(1),
            actual if actual < Phase::UserContribution => {
                return Err(LaunchpadError::PhaseMismatch {
                    expected: Phase::UserContribution,
                    actual,
                });
            }
            actual => {
                return Err(LaunchpadError::PhaseMismatch { expected: Phase::GeneralSale, actual });
            }
        };
        let current = st.allocations.get(&user).copied().unwrap_or_default();
        if !current.kyc_approved {
            return Err(LaunchpadError::NotKycApproved);
        }
        st.check_first_contribution(&current, amount)?;

        let staged = st.staged(now, self.id)?;
        let view = staged.as_ref().map_or(&*st, |(next, _)| next);
        let current = view.allocations.get(&user).copied().unwrap_or_default();
        let allowance = match (phase, round) {
            (Phase::UserContribution, _) => {
                current.snapshot_amount.saturating_sub(current.base_contributed)
            }
            (_, Some(r)) => {
                current.overflow_granted[r].saturating_sub(current.overflow_contributed[r])
            }
            _ => Balance::MAX,
        };
        let available = allowance.min(view.unsold()?);
        if amount > available {
            return Err(LaunchpadError::AllocationExceeded { available, requested: amount });
        }
        let new_total = checked_add(view.total_contributed, amount)?;

        self.ctx.ledger.transfer_from(
            view.terms.contribution_token,
            self.custody,
            user,
            self.custody,
            amount,
        )?;

        let events = commit(&mut st, staged);
        let a = st.allocations.entry(user).or_default();
        match round {
            None if phase == Phase::UserContribution => {
                a.base_contributed = checked_add(a.base_contributed, amount)?;
            }
            Some(r) => a.overflow_contributed[r] = checked_add(a.overflow_contributed[r], amount)?,
            None => a.general_contributed = checked_add(a.general_contributed, amount)?,
        }
        let user_total = a.contributed_amount();
        st.total_contributed = new_total;
        drop(st);

        self.publish(events);
        info!(
            target: "launchpad::sale",
            sale = %self.id,
            %user,
            amount,
            ?phase,
            user_total,
            total = new_total,
            "contribution accepted"
        );
        self.emit(LaunchpadEvent::Contributed { id: self.id, user, amount, phase });
        Ok(user_total)
    }

    /// Decide the softcap outcome if distribution time has passed. Anyone may call.
    pub fn resolve(&self) -> Result<Phase> {
        let _ex = self.exec.lock();
        let now = self.now();
        let mut st = self.state.write();
        let phase = st.phase(now);
        if phase < Phase::Distribution {
            return Err(LaunchpadError::PhaseMismatch {
                expected: Phase::Distribution,
                actual: phase,
            });
        }
        let staged = st.staged(now, self.id)?;
        let events = commit(&mut st, staged);
        let phase = st.phase(now);
        drop(st);

        self.publish(events);
        Ok(phase)
    }

    /// Pay the caller's sale tokens: `contributed * rate / 10^decimals`. Once.
    pub fn claim_tokens(&self, user: Address) -> Result<Balance> {
        let _ex = self.exec.lock();
        let now = self.now();
        let mut st = self.state.write();
        let staged = st.staged(now, self.id)?;
        let view = staged.as_ref().map_or(&*st, |(next, _)| next);
        match view.phase(now) {
            Phase::Distribution | Phase::Settled => {}
            Phase::Cancelled => return Err(LaunchpadError::CancelledSale),
            actual => {
                return Err(LaunchpadError::PhaseMismatch { expected: Phase::Distribution, actual });
            }
        }
        let a = view.allocations.get(&user).copied().unwrap_or_default();
        if a.claimed {
            return Err(LaunchpadError::AlreadyClaimed);
        }
        let contributed = a.contributed_amount();
        if contributed == 0 {
            return Err(LaunchpadError::NothingToClaim);
        }
        let tokens = math::tokens_for_contribution(
            contributed,
            view.terms.rate,
            view.terms.contribution_decimals,
        )?;
        let total_claimed = checked_add(view.total_claimed, tokens)?;
        if tokens > 0 {
            self.ctx.ledger.transfer(view.terms.sale_token, self.custody, user, tokens)?;
        }

        let events = commit(&mut st, staged);
        if let Some(a) = st.allocations.get_mut(&user) {
            a.claimed = true;
        }
        st.total_claimed = total_claimed;
        drop(st);

        self.publish(events);
        info!(target: "launchpad::sale", sale = %self.id, %user, tokens, "tokens claimed");
        self.emit(LaunchpadEvent::TokensClaimed { id: self.id, user, amount: tokens });
        Ok(tokens)
    }

    /// Refund the caller's full contribution from a cancelled sale. Once.
    pub fn return_back(&self, user: Address) -> Result<Balance> {
        let _ex = self.exec.lock();
        let now = self.now();
        let mut st = self.state.write();
        let staged = st.staged(now, self.id)?;
        let view = staged.as_ref().map_or(&*st, |(next, _)| next);
        match view.phase(now) {
            Phase::Cancelled => {}
            Phase::Distribution | Phase::Settled => return Err(LaunchpadError::NotCancelled),
            actual => {
                return Err(LaunchpadError::PhaseMismatch { expected: Phase::Distribution, actual });
            }
        }
        let a = view.allocations.get(&user).copied().unwrap_or_default();
        let amount = a.contributed_amount();
        if a.refunded || amount == 0 {
            return Err(LaunchpadError::NothingToReturn);
        }
        let total_returned = checked_add(view.total_returned, amount)?;
        self.ctx
            .ledger
            .transfer(view.terms.contribution_token, self.custody, user, amount)?;

        let events = commit(&mut st, staged);
        if let Some(a) = st.allocations.get_mut(&user) {
            a.refunded = true;
        }
        st.total_returned = total_returned;
        drop(st);

        self.publish(events);
        info!(target: "launchpad::sale", sale = %self.id, %user, amount, "contribution returned");
        self.emit(LaunchpadEvent::ContributionReturned { id: self.id, user, amount });
        Ok(amount)
    }

    /// Pay everything collected to the developer. Admin only, once, softcap met.
    pub fn settlement(&self, caller: Address) -> Result<Balance> {
        self.ctx.acl.require(caller, Role::Admin)?;
        let _ex = self.exec.lock();
        let now = self.now();
        let mut st = self.state.write();
        let staged = st.staged(now, self.id)?;
        let view = staged.as_ref().map_or(&*st, |(next, _)| next);
        match view.phase(now) {
            Phase::Distribution => {}
            Phase::Cancelled => return Err(LaunchpadError::CancelledSale),
            Phase::Settled => return Err(LaunchpadError::AlreadySettled),
            actual => {
                return Err(LaunchpadError::PhaseMismatch { expected: Phase::Distribution, actual });
            }
        }
        let amount = view.total_contributed;
        let developer = view.terms.developer;
        if amount > 0 {
            self.ctx
                .ledger
                .transfer(view.terms.contribution_token, self.custody, developer, amount)?;
        }

        let events = commit(&mut st, staged);
        st.settled = true;
        drop(st);

        self.publish(events);
        info!(target: "launchpad::sale", sale = %self.id, %developer, amount, "sale settled");
        self.emit(LaunchpadEvent::Settled { id: self.id, developer, amount });
        Ok(amount)
    }

    /// Sum of snapshot allocations; never exceeds the sale capacity.
    pub fn total_allocated(&self) -> Result<Balance> {
        let st = self.state.read();
        st.allocations
            .values()
            .try_fold(0u128, |acc, a| checked_add(acc, a.snapshot_amount))
    }

    /// Unsold capacity left for the general sale, in contribution units.
    pub fn remaining_capacity(&self) -> Result<Balance> {
        self.state.read().unsold()
    }
}

//! Sale registry: sequential ids, sale-token custody, Draft-only updates.

use std::{collections::BTreeMap, fmt, sync::Arc};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::broadcast;
use tracing::info;

use crate::{
    access::{AccessControl, Role},
    backend::{Clock, TierScoreSource, TokenLedger},
    error::LaunchpadError,
    events::LaunchpadEvent,
    math::MAX_DECIMALS,
    sale::{ProjectUpdate, Sale, SaleContext, SaleTerms},
    tier::{TierTable, TierWeights},
    Address, AssetId, Balance, Result, SaleId,
};

const CUSTODY_DOMAIN: &[u8] = b"ido-launchpad/sale-custody";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrySettings {
    /// Account that pulls sale tokens from the caller of `add_project`.
    pub address: Address,
    pub event_capacity: usize,
    /// Tier weights for snapshots taken without explicit weights.
    #[serde(default)]
    pub default_weights: Option<TierWeights>,
}

/// Custody account of sale `id`: first 20 bytes of
/// `sha256(domain || registry || id_be)`.
pub fn custody_address(registry: Address, id: SaleId) -> Address {
    let mut h = Sha256::new();
    h.update(CUSTODY_DOMAIN);
    h.update(registry.0);
    h.update(id.0.to_be_bytes());
    let digest = h.finalize();
    let mut out = [0u8; 20];
    out.copy_from_slice(&digest[..20]);
    Address(out)
}

pub struct SaleRegistry {
    settings: RegistrySettings,
    ctx: Arc<SaleContext>,
    next_id: RwLock<u64>,
    sales: RwLock<BTreeMap<SaleId, Arc<Sale>>>,
}

impl fmt::Debug for SaleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SaleRegistry")
            .field("address", &self.settings.address)
            .field("next_id", &*self.next_id.read())
            .finish()
    }
}

impl SaleRegistry {
    pub fn new(
        settings: RegistrySettings,
        tiers: TierTable,
        ledger: Arc<dyn TokenLedger>,
        clock: Arc<dyn Clock>,
        scores: Arc<dyn TierScoreSource>,
        acl: Arc<AccessControl>,
    ) -> Result<Arc<Self>> {
        if settings.address.is_zero() {
            return Err(LaunchpadError::InvalidConfig("registry address must be set".into()));
        }
        if let Some(w) = &settings.default_weights {
            w.validate()?;
        }
        let (tx, _rx) = broadcast::channel(settings.event_capacity.max(1));
        let ctx = Arc::new(SaleContext {
            ledger,
            clock,
            scores,
            acl,
            tiers: RwLock::new(tiers),
            default_weights: RwLock::new(settings.default_weights),
            events_tx: tx,
        });
        Ok(Arc::new(Self {
            settings,
            ctx,
            next_id: RwLock::new(1),
            sales: RwLock::new(BTreeMap::new()),
        }))
    }

    /// Events of the registry and every sale it created.
    pub fn subscribe(&self) -> broadcast::Receiver<LaunchpadEvent> {
        self.ctx.events_tx.subscribe()
    }

    pub fn settings(&self) -> &RegistrySettings {
        &self.settings
    }

    /// Register a sale and move `total_supply` sale tokens from `caller` into its
    /// custody. The caller must have approved the registry address.
    pub fn add_project(
        &self,
        caller: Address,
        developer: Address,
        sale_token: AssetId,
        contribution_token: AssetId,
        contribution_decimals: u8,
        total_supply: Balance,
        soft_cap: Balance,
    ) -> Result<SaleId> {
        self.ctx.acl.require(caller, Role::Admin)?;
        if total_supply == 0 {
            return Err(LaunchpadError::ZeroAmount);
        }
        if developer.is_zero() {
            return Err(LaunchpadError::InvalidConfig("developer must be set".into()));
        }
        if contribution_decimals > MAX_DECIMALS {
            return Err(LaunchpadError::InvalidConfig(format!(
                "contribution decimals {contribution_decimals} > {MAX_DECIMALS}"
            )));
        }

        let mut next = self.next_id.write();
        let id = SaleId(*next);
        let custody = custody_address(self.settings.address, id);
        self.ctx.ledger.transfer_from(
            sale_token,
            self.settings.address,
            caller,
            custody,
            total_supply,
        )?;

        let terms = SaleTerms {
            developer,
            sale_token,
            contribution_token,
            contribution_decimals,
            total_supply,
            min_contribution: 0,
            soft_cap,
            rate: 0,
        };
        let sale = Arc::new(Sale::new(id, custody, terms, self.ctx.clone()));
        self.sales.write().insert(id, sale);
        *next = next.saturating_add(1);
        drop(next);

        info!(
            target: "launchpad::registry",
            sale = %id,
            %developer,
            %custody,
            total_supply,
            "project added"
        );
        let _ = self
            .ctx
            .events_tx
            .send(LaunchpadEvent::ProjectAdded { id, developer, total_supply });
        Ok(id)
    }

    /// Set the schedule and the remaining terms. Admin only, while `Draft`.
    pub fn update_project(&self, caller: Address, id: SaleId, update: ProjectUpdate) -> Result<()> {
        self.ctx.acl.require(caller, Role::Admin)?;
        if update.contribution_decimals > MAX_DECIMALS {
            return Err(LaunchpadError::InvalidConfig(format!(
                "contribution decimals {} > {MAX_DECIMALS}",
                update.contribution_decimals
            )));
        }
        self.project(id)?.apply_update(update)
    }

    pub fn project(&self, id: SaleId) -> Result<Arc<Sale>> {
        self.sales.read().get(&id).cloned().ok_or(LaunchpadError::NotFound)
    }

    pub fn project_count(&self) -> usize {
        self.sales.read().len()
    }

    pub fn projects(&self) -> Vec<Arc<Sale>> {
        self.sales.read().values().cloned().collect()
    }

    pub fn tier_table(&self) -> TierTable {
        *self.ctx.tiers.read()
    }

    /// Replace the tier table. Sales that already took their snapshot keep theirs.
    pub fn set_tier_table(&self, caller: Address, table: TierTable) -> Result<()> {
        self.ctx.acl.require(caller, Role::Admin)?;
        *self.ctx.tiers.write() = table;
        let thresholds = table.thresholds();
        info!(target: "launchpad::registry", ?thresholds, "tier table updated");
        Ok(())
    }

    pub fn default_weights(&self) -> Option<TierWeights> {
        *self.ctx.default_weights.read()
    }

    /// Replace or clear the snapshot fallback weights. Admin only.
    pub fn set_default_weights(&self, caller: Address, weights: Option<TierWeights>) -> Result<()> {
        self.ctx.acl.require(caller, Role::Admin)?;
        if let Some(w) = &weights {
            w.validate()?;
        }
        *self.ctx.default_weights.write() = weights;
        info!(target: "launchpad::registry", ?weights, "default tier weights updated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        mem::{ManualClock, MemLedger},
        phase::{Phase, SaleTimes},
    };

    const T0: u64 = 1_700_000_000;
    const PAPER: AssetId = AssetId(1);
    const USDT: AssetId = AssetId(2);

    fn addr(x: u8) -> Address {
        Address::from_byte(x)
    }

    struct NoScores;

    impl TierScoreSource for NoScores {
        fn tier_score_of(&self, _user: Address) -> Result<Balance> {
            Ok(0)
        }

        fn scored_accounts(&self) -> Result<Vec<(Address, Balance)>> {
            Ok(Vec::new())
        }
    }

    struct Fixture {
        ledger: Arc<MemLedger>,
        clock: Arc<ManualClock>,
        registry: Arc<SaleRegistry>,
    }

    const REGISTRY: u8 = 0xCC;
    const ADMIN: u8 = 0xAD;
    const DEV: u8 = 0xDE;

    fn settings() -> RegistrySettings {
        RegistrySettings { address: addr(REGISTRY), event_capacity: 64, default_weights: None }
    }

    fn fixture() -> Fixture {
        let ledger = Arc::new(MemLedger::new());
        let clock = Arc::new(ManualClock::new(T0));
        let acl = Arc::new(AccessControl::new(addr(ADMIN)));
        let tiers = TierTable::new([15, 25, 35, 45, 55]).unwrap();
        let registry = SaleRegistry::new(
            settings(),
            tiers,
            ledger.clone(),
            clock.clone(),
            Arc::new(NoScores),
            acl,
        )
        .unwrap();
        ledger.mint(PAPER, addr(ADMIN), 1_000_000);
        ledger.approve(PAPER, addr(ADMIN), addr(REGISTRY), Balance::MAX).unwrap();
        Fixture { ledger, clock, registry }
    }

    fn times(start: u64) -> SaleTimes {
        SaleTimes {
            snapshot: start,
            user_contribution: start + 10,
            overflow1: start + 20,
            overflow2: start + 30,
            general_sale: start + 40,
            distribution: start + 50,
        }
    }

    fn update(start: u64) -> ProjectUpdate {
        ProjectUpdate {
            contribution_token: USDT,
            contribution_decimals: 0,
            min_contribution: 0,
            soft_cap: 1000,
            rate: 1,
            times: times(start),
        }
    }

    fn add(f: &Fixture, total_supply: Balance) -> Result<SaleId> {
        f.registry.add_project(addr(ADMIN), addr(DEV), PAPER, USDT, 0, total_supply, 0)
    }

    #[test]
    fn add_project_assigns_sequential_ids_and_takes_custody() {
        let f = fixture();
        let a = add(&f, 10_000).unwrap();
        let b = add(&f, 20_000).unwrap();
        assert_eq!(a, SaleId(1));
        assert_eq!(b, SaleId(2));
        assert_eq!(f.registry.project_count(), 2);

        let sale = f.registry.project(a).unwrap();
        assert_ne!(sale.custody(), f.registry.project(b).unwrap().custody());
        assert_eq!(f.ledger.balance_of(PAPER, sale.custody()), 10_000);
        assert_eq!(f.ledger.balance_of(PAPER, addr(ADMIN)), 1_000_000 - 30_000);
        assert_eq!(sale.phase(), Phase::Draft);
        assert_eq!(sale.project_times(), None);
        let bal = sale.project_balance();
        assert_eq!((bal.total_supply, bal.total_claimed), (10_000, 0));
    }

    #[test]
    fn failed_custody_transfer_consumes_no_id() {
        let f = fixture();
        let err = add(&f, 5_000_000).unwrap_err();
        assert_eq!(err, LaunchpadError::Backend(crate::BackendError::Insufficient));
        assert_eq!(f.registry.project_count(), 0);
        assert_eq!(add(&f, 10_000).unwrap(), SaleId(1));
    }

    #[test]
    fn add_project_requires_admin() {
        let f = fixture();
        let err = f
            .registry
            .add_project(addr(0x10), addr(DEV), PAPER, USDT, 0, 10_000, 1000)
            .unwrap_err();
        assert_eq!(err, LaunchpadError::Unauthorized { role: Role::Admin });
    }

    #[test]
    fn update_project_sets_schedule_and_terms() {
        let f = fixture();
        let id = add(&f, 10_000).unwrap();
        f.registry.update_project(addr(ADMIN), id, update(T0 + 100)).unwrap();

        let sale = f.registry.project(id).unwrap();
        assert_eq!(
            sale.project_times().unwrap().as_array(),
            [T0 + 100, T0 + 110, T0 + 120, T0 + 130, T0 + 140, T0 + 150]
        );
        let terms = sale.terms();
        assert_eq!((terms.rate, terms.soft_cap, terms.contribution_token), (1, 1000, USDT));
        assert_eq!(sale.phase(), Phase::Draft);
        f.clock.set(T0 + 100);
        assert_eq!(sale.phase(), Phase::Snapshot);
    }

    #[test]
    fn update_project_rejected_outside_draft() {
        let f = fixture();
        let id = add(&f, 10_000).unwrap();
        f.registry.update_project(addr(ADMIN), id, update(T0 + 100)).unwrap();
        f.clock.set(T0 + 105);
        let err = f.registry.update_project(addr(ADMIN), id, update(T0 + 200)).unwrap_err();
        assert_eq!(
            err,
            LaunchpadError::PhaseMismatch { expected: Phase::Draft, actual: Phase::Snapshot }
        );
    }

    #[test]
    fn update_project_validates_input() {
        let f = fixture();
        let id = add(&f, 10_000).unwrap();
        let rejected = |u: ProjectUpdate| {
            matches!(
                f.registry.update_project(addr(ADMIN), id, u),
                Err(LaunchpadError::InvalidConfig(_))
            )
        };

        let mut bad = update(T0 + 100);
        bad.times.overflow2 = bad.times.overflow1;
        assert!(rejected(bad));
        assert!(rejected(update(T0)));

        let mut zero_rate = update(T0 + 100);
        zero_rate.rate = 0;
        assert!(rejected(zero_rate));

        let mut big_cap = update(T0 + 100);
        big_cap.soft_cap = 10_001;
        assert!(rejected(big_cap));

        assert_eq!(
            f.registry.update_project(addr(ADMIN), SaleId(9), update(T0 + 100)).unwrap_err(),
            LaunchpadError::NotFound
        );
        assert_eq!(f.registry.project(id).unwrap().project_times(), None);
    }

    #[test]
    fn custody_address_is_stable_and_distinct() {
        let a = custody_address(addr(1), SaleId(1));
        assert_eq!(a, custody_address(addr(1), SaleId(1)));
        assert_ne!(a, custody_address(addr(1), SaleId(2)));
        assert_ne!(a, custody_address(addr(2), SaleId(1)));
        assert!(!a.is_zero());
    }

    #[test]
    fn tier_table_update_is_admin_only() {
        let f = fixture();
        let t = TierTable::new([1, 2, 3, 4, 5]).unwrap();
        assert!(f.registry.set_tier_table(addr(0x10), t).is_err());
        f.registry.set_tier_table(addr(ADMIN), t).unwrap();
        assert_eq!(f.registry.tier_table(), t);
    }

    #[test]
    fn default_weights_are_validated_and_admin_only() {
        let f = fixture();
        assert_eq!(f.registry.default_weights(), None);
        let w = TierWeights([1000, 1500, 2000, 2500, 3000]);
        assert!(f.registry.set_default_weights(addr(0x10), Some(w)).is_err());
        assert!(matches!(
            f.registry.set_default_weights(addr(ADMIN), Some(TierWeights([5000, 5001, 0, 0, 0]))),
            Err(LaunchpadError::InvalidConfig(_))
        ));
        f.registry.set_default_weights(addr(ADMIN), Some(w)).unwrap();
        assert_eq!(f.registry.default_weights(), Some(w));

        let mut bad = settings();
        bad.default_weights = Some(TierWeights([10_000, 1, 0, 0, 0]));
        let built = SaleRegistry::new(
            bad,
            TierTable::new([15, 25, 35, 45, 55]).unwrap(),
            f.ledger.clone(),
            f.clock.clone(),
            Arc::new(NoScores),
            Arc::new(AccessControl::new(addr(ADMIN))),
        );
        assert!(matches!(built, Err(LaunchpadError::InvalidConfig(_))));
    }

    #[test]
    fn events_are_broadcast() {
        let f = fixture();
        let mut rx = f.registry.subscribe();
        let id = add(&f, 10_000).unwrap();
        f.registry.update_project(addr(ADMIN), id, update(T0 + 100)).unwrap();
        assert_eq!(
            rx.try_recv().unwrap(),
            LaunchpadEvent::ProjectAdded { id, developer: addr(DEV), total_supply: 10_000 }
        );
        assert_eq!(rx.try_recv().unwrap(), LaunchpadEvent::ProjectUpdated { id });
    }
}

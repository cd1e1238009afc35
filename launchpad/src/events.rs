//! Business events broadcast by the vault and the registry.

use crate::{phase::Phase, tier::TierWeights, Address, Balance, SaleId, Timestamp};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LaunchpadEvent {
    Staked { user: Address, amount: Balance, shares: Balance, unlock_time: Timestamp },
    Restaked { user: Address, unlock_time: Timestamp },
    Unstaked { user: Address, shares: Balance, amount: Balance },
    Harvested { caller: Address, reward: Balance, performance_fee: Balance, call_fee: Balance },
    VaultPaused { paused: bool },

    ProjectAdded { id: SaleId, developer: Address, total_supply: Balance },
    ProjectUpdated { id: SaleId },
    SnapshotTaken { id: SaleId, weights: TierWeights, participants: usize },
    KycUpdated { id: SaleId, user: Address, approved: bool },
    OverflowRequested { id: SaleId, user: Address, amount: Balance },
    OverflowAllocated { id: SaleId, round: u8, pool: Balance, granted: Balance },
    Contributed { id: SaleId, user: Address, amount: Balance, phase: Phase },
    SaleCancelled { id: SaleId, total_contributed: Balance },
    TokensClaimed { id: SaleId, user: Address, amount: Balance },
    ContributionReturned { id: SaleId, user: Address, amount: Balance },
    Settled { id: SaleId, developer: Address, amount: Balance },
}

//! Allocation tiers derived from vault value.

use serde::{Deserialize, Serialize};

use crate::{error::LaunchpadError, math::BPS_DENOM, Balance, Result};

/// Allocation tiers in ascending order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Tier {
    Basic,
    Premium,
    Elite,
    Royal,
    Divine,
}

impl Tier {
    pub const ALL: [Tier; 5] = [Tier::Basic, Tier::Premium, Tier::Elite, Tier::Royal, Tier::Divine];

    pub fn index(self) -> usize {
        self as usize
    }
}

/// Minimum tier score per tier, strictly ascending from Basic to Divine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierTable {
    thresholds: [Balance; 5],
}

impl TierTable {
    pub fn new(thresholds: [Balance; 5]) -> Result<Self> {
        if thresholds[0] == 0 {
            return Err(LaunchpadError::InvalidConfig("basic threshold must be > 0".into()));
        }
        if thresholds.windows(2).any(|w| w[0] >= w[1]) {
            return Err(LaunchpadError::InvalidConfig(
                "tier thresholds must be strictly ascending".into(),
            ));
        }
        Ok(Self { thresholds })
    }

    pub fn thresholds(&self) -> [Balance; 5] {
        self.thresholds
    }

    pub fn threshold(&self, tier: Tier) -> Balance {
        self.thresholds[tier.index()]
    }

    /// Highest tier whose threshold `score` reaches; `None` below Basic.
    pub fn tier_of(&self, score: Balance) -> Option<Tier> {
        Tier::ALL
            .iter()
            .rev()
            .copied()
            .find(|t| score >= self.thresholds[t.index()])
    }
}

/// Share of the offered supply per tier, in basis points. Sum must not exceed 10_000.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierWeights(pub [u16; 5]);

impl TierWeights {
    pub fn validate(&self) -> Result<()> {
        let sum: u128 = self.0.iter().map(|w| *w as u128).sum();
        if sum > BPS_DENOM {
            return Err(LaunchpadError::InvalidConfig(format!(
                "tier weights sum to {sum} bps (> {BPS_DENOM})"
            )));
        }
        Ok(())
    }

    pub fn weight(&self, tier: Tier) -> u16 {
        self.0[tier.index()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_boundaries() {
        let t = TierTable::new([15, 25, 35, 45, 55]).unwrap();
        assert_eq!(t.tier_of(0), None);
        assert_eq!(t.tier_of(14), None);
        assert_eq!(t.tier_of(15), Some(Tier::Basic));
        assert_eq!(t.tier_of(30), Some(Tier::Premium));
        assert_eq!(t.tier_of(54), Some(Tier::Royal));
        assert_eq!(t.tier_of(10_000), Some(Tier::Divine));
    }

    #[test]
    fn rejects_unordered_thresholds() {
        assert!(TierTable::new([1, 2, 2, 4, 5]).is_err());
        assert!(TierTable::new([0, 2, 3, 4, 5]).is_err());
    }

    #[test]
    fn weights_capped_at_full_supply() {
        assert!(TierWeights([2_000; 5]).validate().is_ok());
        assert!(TierWeights([2_001, 2_000, 2_000, 2_000, 2_000]).validate().is_err());
    }
}

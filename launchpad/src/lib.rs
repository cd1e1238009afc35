//! IDO Launchpad: tier-weighted token sale core
//! Features:
//! - Staking vault: pool shares over a yield farm, per-user lock windows, compounding harvest
//! - Tier scoring: vault value -> Basic/Premium/Elite/Royal/Divine via ascending thresholds
//! - Sale registry: sequential ids, sale-token custody, Draft-only term updates
//! - Sale state machine: snapshot -> user contribution -> overflow x2 -> general sale
//!   -> distribution
//! - Softcap dichotomy: settle (claim + developer payout) or cancel (full refunds), exactly once
//! - Safety: checked arithmetic, all-or-nothing operations, explicit role checks
//! - Concurrency: parking_lot RwLock + per-sale execute mutex
//! - Events: tokio::broadcast
//! - Tests: in-memory ledger, farm and clock
//!
//! Notes:
//! - Address/AssetId/Balance are placeholders; integrate with chain primitives in your node.
//! - `TokenLedger` and `YieldFarm` abstract the external token and farming contracts.

#![forbid(unsafe_code)]
#![allow(clippy::too_many_arguments)]

use std::{fmt, str::FromStr};

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

pub mod access;
pub mod backend;
pub mod config;
pub mod error;
pub mod events;
pub mod math;
pub mod mem;
pub mod phase;
pub mod registry;
pub mod sale;
pub mod telemetry;
pub mod tier;
pub mod vault;

pub use access::{AccessControl, Role};
pub use backend::{Clock, SystemClock, TierScoreSource, TokenLedger, YieldFarm};
pub use config::{ConfigError, LaunchpadConfig};
pub use error::{BackendError, LaunchpadError, Result};
pub use events::LaunchpadEvent;
pub use phase::{phase_of, Phase, SaleTimes};
pub use registry::{RegistrySettings, SaleRegistry};
pub use sale::{ProjectBalance, ProjectUpdate, Sale, SaleSummary, SaleTerms, UserAllocation};
pub use telemetry::LoggingConfig;
pub use tier::{Tier, TierTable, TierWeights};
pub use vault::{PoolInfo, StakePosition, StakingVault, VaultSettings};

// ---------- Primitives ----------

/// 20-byte address placeholder; replace with chain primitive.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Address(pub [u8; 20]);

impl Address {
    pub const ZERO: Address = Address([0u8; 20]);

    /// Convenience constructor used by fixtures and configs: first byte set, rest zero.
    pub const fn from_byte(b: u8) -> Self {
        let mut a = [0u8; 20];
        a[0] = b;
        Address(a)
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 20]
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl FromStr for Address {
    type Err = LaunchpadError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let raw = s.trim();
        let raw = raw.strip_prefix("0x").unwrap_or(raw);
        let bytes = hex::decode(raw)
            .map_err(|e| LaunchpadError::InvalidConfig(format!("address `{s}`: {e}")))?;
        let arr: [u8; 20] = bytes
            .try_into()
            .map_err(|_| LaunchpadError::InvalidConfig(format!("address `{s}` must be 20 bytes")))?;
        Ok(Address(arr))
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        s.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        s.parse().map_err(de::Error::custom)
    }
}

/// Asset identifier (staking, sale or contribution token).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug, Serialize, Deserialize)]
pub struct AssetId(pub u32);

/// Smallest unit balance.
pub type Balance = u128;

/// UNIX time in seconds.
pub type Timestamp = u64;

/// Sale identifier. Ids are 1-based; 0 is reserved and never assigned.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug, Serialize, Deserialize)]
pub struct SaleId(pub u64);

impl SaleId {
    pub const INVALID: SaleId = SaleId(0);
}

impl fmt::Display for SaleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_parses_with_and_without_prefix() {
        let a: Address = "0x0100000000000000000000000000000000000000".parse().unwrap();
        assert_eq!(a, Address::from_byte(1));
        let b: Address = "0100000000000000000000000000000000000000".parse().unwrap();
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "0x0100000000000000000000000000000000000000");
    }

    #[test]
    fn address_rejects_wrong_length() {
        assert!(matches!("0x0102".parse::<Address>(), Err(LaunchpadError::InvalidConfig(_))));
        assert!(matches!("0xzz".parse::<Address>(), Err(LaunchpadError::InvalidConfig(_))));
    }
}

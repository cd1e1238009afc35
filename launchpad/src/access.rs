//! Explicit role table consulted by every administrative operation.
//!
//! Callers pass their identity into each operation; the component looks the
//! identity up here instead of relying on a single mutable owner slot.

use std::collections::{BTreeMap, BTreeSet};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{error::LaunchpadError, Address, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Role {
    /// Registers projects, takes snapshots, settles, configures vault fees.
    Admin,
    /// May toggle KYC approval on sales.
    KycOperator,
}

#[derive(Debug, Default)]
pub struct AccessControl {
    grants: RwLock<BTreeMap<Address, BTreeSet<Role>>>,
}

impl AccessControl {
    pub fn new(admin: Address) -> Self {
        let mut m = BTreeMap::new();
        m.insert(admin, BTreeSet::from([Role::Admin]));
        Self { grants: RwLock::new(m) }
    }

    /// Admins implicitly hold every role.
    pub fn has_role(&self, who: Address, role: Role) -> bool {
        self.grants
            .read()
            .get(&who)
            .map(|r| r.contains(&role) || r.contains(&Role::Admin))
            .unwrap_or(false)
    }

    pub fn require(&self, who: Address, role: Role) -> Result<()> {
        if self.has_role(who, role) {
            Ok(())
        } else {
            Err(LaunchpadError::Unauthorized { role })
        }
    }

    pub fn grant(&self, caller: Address, who: Address, role: Role) -> Result<()> {
        self.require(caller, Role::Admin)?;
        self.grants.write().entry(who).or_default().insert(role);
        info!(target: "launchpad::access", %who, ?role, "role granted");
        Ok(())
    }

    /// Revoke a role. The last remaining admin cannot be removed.
    pub fn revoke(&self, caller: Address, who: Address, role: Role) -> Result<()> {
        self.require(caller, Role::Admin)?;
        let mut g = self.grants.write();
        if role == Role::Admin {
            let admins = g.values().filter(|r| r.contains(&Role::Admin)).count();
            let target_is_admin = g.get(&who).map(|r| r.contains(&Role::Admin)).unwrap_or(false);
            if target_is_admin && admins == 1 {
                return Err(LaunchpadError::InvalidConfig("cannot revoke the last admin".into()));
            }
        }
        if let Some(r) = g.get_mut(&who) {
            r.remove(&role);
            if r.is_empty() {
                g.remove(&who);
            }
        }
        info!(target: "launchpad::access", %who, ?role, "role revoked");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_implies_every_role() {
        let acl = AccessControl::new(Address::from_byte(1));
        assert!(acl.has_role(Address::from_byte(1), Role::KycOperator));
        assert!(matches!(
            acl.require(Address::from_byte(2), Role::Admin),
            Err(LaunchpadError::Unauthorized { role: Role::Admin })
        ));
    }

    #[test]
    fn grant_and_revoke() {
        let admin = Address::from_byte(1);
        let op = Address::from_byte(2);
        let acl = AccessControl::new(admin);
        assert!(acl.grant(op, op, Role::KycOperator).is_err());
        acl.grant(admin, op, Role::KycOperator).unwrap();
        assert!(acl.has_role(op, Role::KycOperator));
        assert!(!acl.has_role(op, Role::Admin));
        acl.revoke(admin, op, Role::KycOperator).unwrap();
        assert!(!acl.has_role(op, Role::KycOperator));
        assert!(acl.revoke(admin, admin, Role::Admin).is_err());
    }
}

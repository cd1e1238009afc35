//! Sale phases as a pure function of the clock, the schedule and the terminal flags.

use serde::{Deserialize, Serialize};

use crate::{error::LaunchpadError, Result, Timestamp};

/// Sale phase, in strict forward order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Phase {
    /// Registered; terms mutable, schedule unset or snapshot time not reached.
    Draft,
    /// `[snapshot, user_contribution)`: snapshot may be taken.
    Snapshot,
    /// `[user_contribution, overflow1)`: contributions up to the snapshot allocation.
    UserContribution,
    /// `[overflow1, overflow2)`: first redistribution round.
    Overflow1,
    /// `[overflow2, general_sale)`: second redistribution round.
    Overflow2,
    /// `[general_sale, distribution)`: first come first served for everyone.
    GeneralSale,
    /// `>= distribution`, outcome not yet acted upon (or softcap met, not settled).
    Distribution,
    Settled,
    Cancelled,
}

/// The six phase boundaries of a sale. Strictly increasing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleTimes {
    pub snapshot: Timestamp,
    pub user_contribution: Timestamp,
    pub overflow1: Timestamp,
    pub overflow2: Timestamp,
    pub general_sale: Timestamp,
    pub distribution: Timestamp,
}

impl SaleTimes {
    pub fn as_array(&self) -> [Timestamp; 6] {
        [
            self.snapshot,
            self.user_contribution,
            self.overflow1,
            self.overflow2,
            self.general_sale,
            self.distribution,
        ]
    }

    /// Boundaries must be strictly increasing and all strictly after `now`.
    pub fn validate(&self, now: Timestamp) -> Result<()> {
        let ts = self.as_array();
        if ts.windows(2).any(|w| w[0] >= w[1]) {
            return Err(LaunchpadError::InvalidConfig(
                "phase timestamps must be strictly increasing".into(),
            ));
        }
        if self.snapshot <= now {
            return Err(LaunchpadError::InvalidConfig(format!(
                "snapshot time {} is not in the future (now {now})",
                self.snapshot
            )));
        }
        Ok(())
    }
}

/// Phase of a sale at `now`.
///
/// A sale without a schedule is always `Draft`. Terminal flags win over the clock.
pub fn phase_of(
    times: Option<&SaleTimes>,
    cancelled: bool,
    settled: bool,
    now: Timestamp,
) -> Phase {
    if cancelled {
        return Phase::Cancelled;
    }
    if settled {
        return Phase::Settled;
    }
    let t = match times {
        Some(t) => t,
        None => return Phase::Draft,
    };
    if now < t.snapshot {
        Phase::Draft
    } else if now < t.user_contribution {
        Phase::Snapshot
    } else if now < t.overflow1 {
        Phase::UserContribution
    } else if now < t.overflow2 {
        Phase::Overflow1
    } else if now < t.general_sale {
        Phase::Overflow2
    } else if now < t.distribution {
        Phase::GeneralSale
    } else {
        Phase::Distribution
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn times() -> SaleTimes {
        SaleTimes {
            snapshot: 10,
            user_contribution: 20,
            overflow1: 30,
            overflow2: 40,
            general_sale: 50,
            distribution: 60,
        }
    }

    #[test]
    fn walks_every_phase_in_order() {
        let t = times();
        let seen: Vec<Phase> = [0, 10, 19, 20, 30, 40, 50, 59, 60, 1_000]
            .iter()
            .map(|now| phase_of(Some(&t), false, false, *now))
            .collect();
        assert_eq!(
            seen,
            vec![
                Phase::Draft,
                Phase::Snapshot,
                Phase::Snapshot,
                Phase::UserContribution,
                Phase::Overflow1,
                Phase::Overflow2,
                Phase::GeneralSale,
                Phase::GeneralSale,
                Phase::Distribution,
                Phase::Distribution,
            ]
        );
    }

    #[test]
    fn unscheduled_and_terminal() {
        assert_eq!(phase_of(None, false, false, u64::MAX), Phase::Draft);
        assert_eq!(phase_of(Some(&times()), true, false, 70), Phase::Cancelled);
        assert_eq!(phase_of(Some(&times()), false, true, 70), Phase::Settled);
    }

    #[test]
    fn schedule_validation() {
        assert!(times().validate(5).is_ok());
        assert!(times().validate(10).is_err());
        let mut t = times();
        t.overflow2 = t.overflow1;
        assert!(t.validate(0).is_err());
    }
}

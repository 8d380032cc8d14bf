//! Block-boundary-triggered session scheduling.
//!
//! Grounded on `dkg-cli`'s `wait_for_phase` block-polling loop, generalized from "poll
//! until a phase deadline" into "fire a decision each time the chain crosses an interval
//! boundary." The very first block ever observed only seeds `last_boundary` — it never
//! triggers a session, since there is no prior state to compare it against.

use parking_lot::Mutex;

/// What kind of session a node should run at a triggered boundary, decided from whether
/// any epoch has ever been finalized network-wide and whether this node currently holds
/// an active share.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionRole {
    /// No prior epoch exists anywhere: every operator deals a fresh random polynomial.
    GenesisDealer,
    /// A prior epoch exists and this node held an active share in it: deal a resharing
    /// polynomial with `a_0` fixed to the current share.
    ReshareDealer,
    /// A prior epoch exists but this node did not hold a share in it: receive shares from
    /// the dealers without dealing one itself.
    ReshareJoiner,
}

pub fn decide_role(network_has_prior_epoch: bool, local_has_active_share: bool) -> SessionRole {
    if !network_has_prior_epoch {
        SessionRole::GenesisDealer
    } else if local_has_active_share {
        SessionRole::ReshareDealer
    } else {
        SessionRole::ReshareJoiner
    }
}

/// Tracks the last block-interval boundary a node has acted on, so the same boundary is
/// never scheduled twice even if the block stream delivers it more than once (a reorg
/// replay, or a restart resuming from a persisted `last_boundary`).
pub struct Scheduler {
    interval: u64,
    last_boundary: Mutex<Option<u64>>,
}

impl Scheduler {
    pub fn new(interval: u64) -> Self {
        assert!(interval > 0, "scheduler interval must be positive");
        Self {
            interval,
            last_boundary: Mutex::new(None),
        }
    }

    /// Resumes a scheduler that already persisted a `last_boundary` from a prior run.
    pub fn resume(interval: u64, last_boundary: u64) -> Self {
        Self {
            interval,
            last_boundary: Mutex::new(Some(last_boundary)),
        }
    }

    /// Feeds one observed block number. Returns `Some(block)` exactly when `block` is a
    /// fresh interval boundary distinct from the last one acted on; the caller should
    /// persist `block` as the new `last_boundary` before launching a session (§4.5).
    pub fn observe_block(&self, block: u64) -> Option<u64> {
        let mut guard = self.last_boundary.lock();
        match *guard {
            None => {
                *guard = Some(block);
                None
            }
            Some(last) => {
                if block % self.interval == 0 && block != last {
                    *guard = Some(block);
                    Some(block)
                } else {
                    None
                }
            }
        }
    }

    pub fn last_boundary(&self) -> Option<u64> {
        *self.last_boundary.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_observed_block_never_triggers() {
        let scheduler = Scheduler::new(100);
        assert_eq!(scheduler.observe_block(100), None);
        assert_eq!(scheduler.last_boundary(), Some(100));
    }

    #[test]
    fn subsequent_boundary_triggers_once() {
        let scheduler = Scheduler::new(100);
        scheduler.observe_block(50);
        assert_eq!(scheduler.observe_block(100), Some(100));
        assert_eq!(scheduler.observe_block(100), None);
        assert_eq!(scheduler.observe_block(150), None);
        assert_eq!(scheduler.observe_block(200), Some(200));
    }

    #[test]
    fn resumed_scheduler_does_not_retrigger_its_own_boundary() {
        let scheduler = Scheduler::resume(100, 200);
        assert_eq!(scheduler.observe_block(200), None);
        assert_eq!(scheduler.observe_block(300), Some(300));
    }

    #[test]
    fn role_decision_matrix() {
        assert_eq!(decide_role(false, false), SessionRole::GenesisDealer);
        assert_eq!(decide_role(false, true), SessionRole::GenesisDealer);
        assert_eq!(decide_role(true, true), SessionRole::ReshareDealer);
        assert_eq!(decide_role(true, false), SessionRole::ReshareJoiner);
    }
}

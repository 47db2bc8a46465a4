// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Arbiter vote tally shared by both chain runtimes

use crate::error::{EscrowError, EscrowResult};
use escrow_types::{DisputeOutcome, DISPUTE_QUORUM};
use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispute<A> {
    pub initiator: A,
    pub reason: String,
    pub milestone_index: usize,
    pub votes_for_client: u32,
    pub votes_for_freelancer: u32,
    pub voters: BTreeSet<A>,
    /// Permanent once set
    pub resolved: bool,
    /// `None` for a dispute closed by an emergency refund
    pub outcome: Option<DisputeOutcome>,
    pub opened_at: u64,
}

impl<A: Ord + Clone> Dispute<A> {
    pub fn open(initiator: A, milestone_index: usize, reason: String, now: u64) -> Self {
        Self {
            initiator,
            reason,
            milestone_index,
            votes_for_client: 0,
            votes_for_freelancer: 0,
            voters: BTreeSet::new(),
            resolved: false,
            outcome: None,
            opened_at: now,
        }
    }

    pub fn is_open(&self) -> bool {
        !self.resolved
    }

    pub fn total_votes(&self) -> u32 {
        self.votes_for_client + self.votes_for_freelancer
    }

    /// Validates a vote without recording it
    pub fn check_vote(&self, voter: &A) -> EscrowResult<()> {
        if self.resolved {
            return Err(EscrowError::invalid_state("dispute already resolved"));
        }
        if self.voters.contains(voter) {
            return Err(EscrowError::AlreadyVoted);
        }
        Ok(())
    }

    /// Records a vote. Returns the outcome when this vote reaches the quorum.
    pub fn record_vote(&mut self, voter: A, for_client: bool) -> EscrowResult<Option<DisputeOutcome>> {
        self.check_vote(&voter)?;
        let (for_c, for_f) = if for_client {
            (self.votes_for_client + 1, self.votes_for_freelancer)
        } else {
            (self.votes_for_client, self.votes_for_freelancer + 1)
        };
        let outcome = if for_c + for_f >= DISPUTE_QUORUM {
            // odd quorum, one vote at a time: the tally cannot be tied here
            Some(
                DisputeOutcome::from_tally(for_c, for_f)
                    .ok_or_else(|| EscrowError::invalid_state("tied dispute tally"))?,
            )
        } else {
            None
        };

        self.voters.insert(voter);
        self.votes_for_client = for_c;
        self.votes_for_freelancer = for_f;
        if outcome.is_some() {
            self.resolved = true;
            self.outcome = outcome;
        }
        Ok(outcome)
    }

    /// Closes the dispute without an outcome
    pub fn close(&mut self) {
        self.resolved = true;
    }
}

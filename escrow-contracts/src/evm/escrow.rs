// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! EVM milestone escrow contract.
//!
//! Mirrors the Solidity deployment: sequential `uint256` escrow IDs starting
//! at 1, `U256` amounts, block timestamps in seconds and ABI-encoded logs.
//! Every entry point validates fully before mutating, so a reverted call
//! leaves storage and the event buffer untouched.

use super::abi::EvmEscrowEvent;
use crate::bridge::{BridgeTransfer, BridgeTransferTracker, EvmBridge};
use crate::config::DeploymentConfig;
use crate::dispute::Dispute;
use crate::error::{EscrowError, EscrowResult};
use escrow_types::{DisputeOutcome, EscrowStatus, FeeSplit, MilestoneStatus, TransferId};
use ethers::types::{Address, U256};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Transaction context of a call: `msg.sender`, `msg.value`, `block.timestamp`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallContext {
    pub sender: Address,
    pub value: U256,
    pub timestamp: u64,
}

impl CallContext {
    pub fn new(sender: Address, timestamp: u64) -> Self {
        Self {
            sender,
            value: U256::zero(),
            timestamp,
        }
    }

    pub fn with_value(mut self, value: U256) -> Self {
        self.value = value;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvmMilestone {
    pub description: String,
    pub amount: U256,
    pub deadline: Option<u64>,
    pub status: MilestoneStatus,
    pub submission_note: String,
    pub submitted_at: Option<u64>,
    pub approved_at: Option<u64>,
    pub released_at: Option<u64>,
    pub bridge_transfer_id: Option<TransferId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvmEscrow {
    pub id: U256,
    pub client: Address,
    pub freelancer: Address,
    pub title: String,
    pub description: String,
    pub token_symbol: String,
    pub total_amount: U256,
    pub balance: U256,
    pub status: EscrowStatus,
    pub cross_chain_recipient: Option<String>,
    pub milestones: Vec<EvmMilestone>,
    pub dispute: Option<Dispute<Address>>,
    pub created_at: u64,
    pub updated_at: u64,
}

impl EvmEscrow {
    pub fn is_cross_chain(&self) -> bool {
        self.cross_chain_recipient.is_some()
    }

    pub fn open_dispute(&self) -> Option<&Dispute<Address>> {
        self.dispute.as_ref().filter(|d| d.is_open())
    }
}

/// Arguments of `createEscrow`. Milestone data arrives as parallel arrays.
#[derive(Debug, Clone, Default)]
pub struct CreateEscrowParams {
    pub freelancer: Address,
    pub title: String,
    pub description: String,
    pub token_symbol: String,
    pub milestone_amounts: Vec<U256>,
    pub milestone_descriptions: Vec<String>,
    /// Empty for no deadlines, otherwise one entry per milestone (0 = none)
    pub milestone_deadlines: Vec<u64>,
    pub cross_chain_recipient: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreatedEscrow {
    pub escrow_id: U256,
    /// Payment above the milestone total, returned to the caller
    pub excess: U256,
}

fn to_u128(v: U256) -> EscrowResult<u128> {
    if v > U256::from(u128::MAX) {
        return Err(EscrowError::InvalidAmount(format!("{} exceeds u128", v)));
    }
    Ok(v.as_u128())
}

pub struct EvmEscrowContract {
    address: Address,
    config: DeploymentConfig<Address>,
    next_escrow_id: U256,
    escrows: BTreeMap<U256, EvmEscrow>,
    bridge: BridgeTransferTracker<EvmBridge>,
    /// Credited withdrawals per account (pull payments)
    payouts: BTreeMap<Address, U256>,
    events: Vec<EvmEscrowEvent>,
}

impl EvmEscrowContract {
    pub fn new(address: Address, config: DeploymentConfig<Address>) -> EscrowResult<Self> {
        config.validate()?;
        Ok(Self {
            address,
            config,
            next_escrow_id: U256::one(),
            escrows: BTreeMap::new(),
            bridge: BridgeTransferTracker::new(),
            payouts: BTreeMap::new(),
            events: vec![],
        })
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn config(&self) -> &DeploymentConfig<Address> {
        &self.config
    }

    pub fn escrow(&self, id: U256) -> Option<&EvmEscrow> {
        self.escrows.get(&id)
    }

    pub fn escrow_count(&self) -> usize {
        self.escrows.len()
    }

    pub fn bridge_transfer(&self, id: &TransferId) -> Option<&BridgeTransfer<Address>> {
        self.bridge.get(id)
    }

    /// Total credited to `account` so far
    pub fn payout(&self, account: Address) -> U256 {
        self.payouts.get(&account).copied().unwrap_or_default()
    }

    /// Drains the events emitted since the last call
    pub fn take_events(&mut self) -> Vec<EvmEscrowEvent> {
        std::mem::take(&mut self.events)
    }

    fn credit(&mut self, account: Address, amount: U256) {
        if amount.is_zero() {
            return;
        }
        *self.payouts.entry(account).or_default() += amount;
    }

    fn non_payable(ctx: &CallContext) -> EscrowResult<()> {
        if !ctx.value.is_zero() {
            return Err(EscrowError::InvalidAmount("function is not payable".into()));
        }
        Ok(())
    }

    fn escrow_ref(&self, id: U256) -> EscrowResult<&EvmEscrow> {
        self.escrows
            .get(&id)
            .ok_or_else(|| EscrowError::NotFound(format!("escrow {}", id)))
    }

    /// Escrow must accept milestone operations and the index must exist
    fn milestone_ref(&self, id: U256, index: u64) -> EscrowResult<(&EvmEscrow, usize)> {
        let escrow = self.escrow_ref(id)?;
        if escrow.status.is_terminal() {
            return Err(EscrowError::invalid_state(format!(
                "escrow {} is {}",
                id, escrow.status
            )));
        }
        let idx = index as usize;
        if idx >= escrow.milestones.len() {
            return Err(EscrowError::NotFound(format!("milestone {} of escrow {}", index, id)));
        }
        Ok((escrow, idx))
    }

    pub fn create_escrow(
        &mut self,
        ctx: &CallContext,
        params: CreateEscrowParams,
    ) -> EscrowResult<CreatedEscrow> {
        let n = params.milestone_amounts.len();
        if n == 0 {
            return Err(EscrowError::InvalidMilestoneSet("no milestones".into()));
        }
        if params.milestone_descriptions.len() != n {
            return Err(EscrowError::InvalidMilestoneSet(format!(
                "{} amounts but {} descriptions",
                n,
                params.milestone_descriptions.len()
            )));
        }
        if !params.milestone_deadlines.is_empty() && params.milestone_deadlines.len() != n {
            return Err(EscrowError::InvalidMilestoneSet(format!(
                "{} amounts but {} deadlines",
                n,
                params.milestone_deadlines.len()
            )));
        }
        if params.milestone_amounts.iter().any(|a| a.is_zero()) {
            return Err(EscrowError::InvalidMilestoneSet("zero milestone amount".into()));
        }
        if params.freelancer.is_zero() {
            return Err(EscrowError::InvalidRecipient);
        }
        if let Some(recipient) = &params.cross_chain_recipient {
            if recipient.trim().is_empty() {
                return Err(EscrowError::InvalidRecipient);
            }
        }
        let mut total = U256::zero();
        for amount in &params.milestone_amounts {
            total = total
                .checked_add(*amount)
                .ok_or_else(|| EscrowError::InvalidAmount("milestone total overflows".into()))?;
        }
        // bridge accounting is u128
        to_u128(total)?;
        if ctx.value < total {
            return Err(EscrowError::InvalidAmount(format!(
                "payment {} below milestone total {}",
                ctx.value, total
            )));
        }

        let id = self.next_escrow_id;
        self.next_escrow_id += U256::one();
        let excess = ctx.value - total;
        let milestones = params
            .milestone_amounts
            .iter()
            .zip(params.milestone_descriptions)
            .enumerate()
            .map(|(i, (amount, description))| EvmMilestone {
                description,
                amount: *amount,
                deadline: params.milestone_deadlines.get(i).copied().filter(|d| *d != 0),
                status: MilestoneStatus::Pending,
                submission_note: String::new(),
                submitted_at: None,
                approved_at: None,
                released_at: None,
                bridge_transfer_id: None,
            })
            .collect();
        let escrow = EvmEscrow {
            id,
            client: ctx.sender,
            freelancer: params.freelancer,
            title: params.title.clone(),
            description: params.description,
            token_symbol: params.token_symbol.clone(),
            total_amount: total,
            balance: total,
            status: EscrowStatus::Active,
            cross_chain_recipient: params.cross_chain_recipient.clone(),
            milestones,
            dispute: None,
            created_at: ctx.timestamp,
            updated_at: ctx.timestamp,
        };
        self.escrows.insert(id, escrow);
        self.credit(ctx.sender, excess);
        self.events.push(EvmEscrowEvent::EscrowCreated {
            escrow_id: id,
            client: ctx.sender,
            freelancer: params.freelancer,
            total_amount: total,
            milestone_amounts: params.milestone_amounts,
            is_cross_chain: params.cross_chain_recipient.is_some(),
            cross_chain_recipient: params.cross_chain_recipient.unwrap_or_default(),
            token_symbol: params.token_symbol,
            title: params.title,
        });
        info!("[EVM] Escrow {} created total={} excess={}", id, total, excess);
        Ok(CreatedEscrow {
            escrow_id: id,
            excess,
        })
    }

    pub fn start_milestone(&mut self, ctx: &CallContext, id: U256, index: u64) -> EscrowResult<()> {
        Self::non_payable(ctx)?;
        let (escrow, idx) = self.milestone_ref(id, index)?;
        if ctx.sender != escrow.freelancer {
            return Err(EscrowError::NotAuthorized);
        }
        if escrow.milestones[idx].status != MilestoneStatus::Pending {
            return Err(EscrowError::invalid_state("milestone is not pending"));
        }

        let escrow = self.escrow_mut(id)?;
        escrow.milestones[idx].status = MilestoneStatus::InProgress;
        escrow.updated_at = ctx.timestamp;
        self.events.push(EvmEscrowEvent::MilestoneStarted {
            escrow_id: id,
            milestone_index: index,
        });
        Ok(())
    }

    pub fn submit_milestone(
        &mut self,
        ctx: &CallContext,
        id: U256,
        index: u64,
        note: &str,
    ) -> EscrowResult<()> {
        Self::non_payable(ctx)?;
        let (escrow, idx) = self.milestone_ref(id, index)?;
        if ctx.sender != escrow.freelancer {
            return Err(EscrowError::NotAuthorized);
        }
        if !matches!(
            escrow.milestones[idx].status,
            MilestoneStatus::Pending | MilestoneStatus::InProgress
        ) {
            return Err(EscrowError::invalid_state(format!(
                "cannot submit a {} milestone",
                escrow.milestones[idx].status
            )));
        }

        let escrow = self.escrow_mut(id)?;
        let milestone = &mut escrow.milestones[idx];
        milestone.status = MilestoneStatus::Submitted;
        milestone.submission_note = note.to_string();
        milestone.submitted_at = Some(ctx.timestamp);
        escrow.updated_at = ctx.timestamp;
        self.events.push(EvmEscrowEvent::MilestoneSubmitted {
            escrow_id: id,
            milestone_index: index,
            note: note.to_string(),
        });
        Ok(())
    }

    pub fn approve_milestone(&mut self, ctx: &CallContext, id: U256, index: u64) -> EscrowResult<()> {
        Self::non_payable(ctx)?;
        let (escrow, idx) = self.milestone_ref(id, index)?;
        if ctx.sender != escrow.client {
            return Err(EscrowError::NotAuthorized);
        }
        if escrow.milestones[idx].status != MilestoneStatus::Submitted {
            return Err(EscrowError::invalid_state("milestone is not submitted"));
        }

        let escrow = self.escrow_mut(id)?;
        escrow.milestones[idx].status = MilestoneStatus::Approved;
        escrow.milestones[idx].approved_at = Some(ctx.timestamp);
        escrow.updated_at = ctx.timestamp;
        self.events.push(EvmEscrowEvent::MilestoneApproved {
            escrow_id: id,
            milestone_index: index,
        });
        Ok(())
    }

    pub fn release_milestone(&mut self, ctx: &CallContext, id: U256, index: u64) -> EscrowResult<()> {
        Self::non_payable(ctx)?;
        let (escrow, idx) = self.milestone_ref(id, index)?;
        if ctx.sender != escrow.client && !self.config.is_admin(&ctx.sender) {
            return Err(EscrowError::NotAuthorized);
        }
        if escrow.milestones[idx].status != MilestoneStatus::Approved {
            return Err(EscrowError::invalid_state("milestone is not approved"));
        }

        let events = self.settle_release(id, idx, ctx.timestamp)?;
        self.events.extend(events);
        self.check_completion(id, ctx.timestamp);
        Ok(())
    }

    /// Pays out a milestone: fee to the treasury, the rest to the freelancer
    /// or into a bridge transfer. Validates before touching state; callers
    /// check the milestone status.
    fn settle_release(
        &mut self,
        id: U256,
        idx: usize,
        now: u64,
    ) -> EscrowResult<Vec<EvmEscrowEvent>> {
        let escrow = self.escrow_ref(id)?;
        let amount = escrow.milestones[idx].amount;
        if escrow.balance < amount {
            return Err(EscrowError::InsufficientBalance);
        }
        let split = FeeSplit::new(to_u128(amount)?, self.config.fee_bps);
        let freelancer = escrow.freelancer;
        let recipient = escrow.cross_chain_recipient.clone();
        let treasury = self.config.treasury;

        let mut events = vec![];
        let bridge_id = match recipient {
            Some(recipient) if split.recipient_amount > 0 => {
                let out = self.bridge.initiate(
                    freelancer,
                    &recipient,
                    split.recipient_amount,
                    split.recipient_amount,
                    now,
                )?;
                events.push(EvmEscrowEvent::BridgeTransferInitiated {
                    transfer_id: *out.transfer_id.as_bytes(),
                    sender: freelancer,
                    recipient,
                    amount: U256::from(split.recipient_amount),
                    timestamp: now,
                    nonce: out.nonce,
                });
                Some(out.transfer_id)
            }
            _ => {
                self.credit(freelancer, U256::from(split.recipient_amount));
                None
            }
        };
        self.credit(treasury, U256::from(split.fee));

        let escrow = self.escrow_mut(id)?;
        escrow.balance -= amount;
        escrow.updated_at = now;
        let milestone = &mut escrow.milestones[idx];
        milestone.status = MilestoneStatus::Released;
        milestone.released_at = Some(now);
        milestone.bridge_transfer_id = bridge_id;
        events.push(EvmEscrowEvent::MilestoneReleased {
            escrow_id: id,
            milestone_index: idx as u64,
            recipient_amount: U256::from(split.recipient_amount),
            fee: U256::from(split.fee),
            bridge_transfer_id: bridge_id.map(|t| t.0).unwrap_or_default(),
        });
        info!(
            "[EVM] Escrow {} milestone {} released: recipient={} fee={} bridged={}",
            id,
            idx,
            split.recipient_amount,
            split.fee,
            bridge_id.is_some()
        );
        Ok(events)
    }

    /// Marks the escrow Completed once every milestone is terminal
    fn check_completion(&mut self, id: U256, now: u64) {
        let Some(escrow) = self.escrows.get_mut(&id) else {
            return;
        };
        if escrow.status.is_terminal() || !escrow.milestones.iter().all(|m| m.status.is_terminal())
        {
            return;
        }
        escrow.status = EscrowStatus::Completed;
        escrow.updated_at = now;
        self.events.push(EvmEscrowEvent::EscrowCompleted { escrow_id: id });
        info!("[EVM] Escrow {} completed", id);
    }

    pub fn initiate_dispute(
        &mut self,
        ctx: &CallContext,
        id: U256,
        index: u64,
        reason: &str,
    ) -> EscrowResult<()> {
        Self::non_payable(ctx)?;
        let (escrow, idx) = self.milestone_ref(id, index)?;
        if ctx.sender != escrow.client && ctx.sender != escrow.freelancer {
            return Err(EscrowError::NotAuthorized);
        }
        if escrow.open_dispute().is_some() {
            return Err(EscrowError::DisputeExists);
        }
        if escrow.status != EscrowStatus::Active {
            return Err(EscrowError::invalid_state(format!("escrow {} is {}", id, escrow.status)));
        }
        if !matches!(
            escrow.milestones[idx].status,
            MilestoneStatus::Submitted | MilestoneStatus::Approved
        ) {
            return Err(EscrowError::invalid_state(format!(
                "cannot dispute a {} milestone",
                escrow.milestones[idx].status
            )));
        }

        let escrow = self.escrow_mut(id)?;
        escrow.milestones[idx].status = MilestoneStatus::Disputed;
        escrow.status = EscrowStatus::Disputed;
        escrow.dispute = Some(Dispute::open(ctx.sender, idx, reason.to_string(), ctx.timestamp));
        escrow.updated_at = ctx.timestamp;
        self.events.push(EvmEscrowEvent::DisputeInitiated {
            escrow_id: id,
            initiator: ctx.sender,
            milestone_index: index,
            reason: reason.to_string(),
        });
        info!("[EVM] Dispute opened on escrow {} milestone {}", id, index);
        Ok(())
    }

    /// Casts an arbiter vote. Returns the outcome when the vote resolves the
    /// dispute.
    pub fn vote_on_dispute(
        &mut self,
        ctx: &CallContext,
        id: U256,
        vote_for_client: bool,
    ) -> EscrowResult<Option<DisputeOutcome>> {
        Self::non_payable(ctx)?;
        if !self.config.is_arbiter(&ctx.sender) {
            return Err(EscrowError::NotAuthorized);
        }
        let escrow = self.escrow_ref(id)?;
        let mut tally = escrow
            .open_dispute()
            .cloned()
            .ok_or_else(|| EscrowError::invalid_state(format!("escrow {} has no open dispute", id)))?;
        let outcome = tally.record_vote(ctx.sender, vote_for_client)?;
        let idx = tally.milestone_index;
        let amount = escrow.milestones[idx].amount;
        let balance = escrow.balance;
        let client = escrow.client;

        let mut resolution_events = vec![];
        match outcome {
            None => {}
            Some(DisputeOutcome::Freelancer) => {
                resolution_events = self.settle_release(id, idx, ctx.timestamp)?;
            }
            Some(DisputeOutcome::Client) => {
                if balance < amount {
                    return Err(EscrowError::InsufficientBalance);
                }
                self.credit(client, amount);
                let escrow = self.escrow_mut(id)?;
                escrow.balance -= amount;
                escrow.milestones[idx].status = MilestoneStatus::Refunded;
                resolution_events.push(EvmEscrowEvent::MilestoneRefunded {
                    escrow_id: id,
                    milestone_index: idx as u64,
                    amount,
                });
            }
        }

        let (for_client, for_freelancer) = (tally.votes_for_client, tally.votes_for_freelancer);
        let escrow = self.escrow_mut(id)?;
        escrow.dispute = Some(tally);
        escrow.updated_at = ctx.timestamp;
        if outcome.is_some() && escrow.status == EscrowStatus::Disputed {
            escrow.status = EscrowStatus::Active;
        }
        self.events.push(EvmEscrowEvent::DisputeVoteCast {
            escrow_id: id,
            arbiter: ctx.sender,
            milestone_index: idx as u64,
            vote_for_client,
            votes_for_client: for_client as u64,
            votes_for_freelancer: for_freelancer as u64,
        });
        debug!(
            "[EVM] Vote on escrow {} dispute: client={} freelancer={}",
            id, for_client, for_freelancer
        );
        if let Some(outcome) = outcome {
            self.events.push(EvmEscrowEvent::DisputeResolved {
                escrow_id: id,
                milestone_index: idx as u64,
                favour_client: outcome.favours_client(),
                votes_for_client: for_client as u64,
                votes_for_freelancer: for_freelancer as u64,
            });
            self.events.extend(resolution_events);
            info!("[EVM] Dispute on escrow {} resolved for {}", id, outcome);
            self.check_completion(id, ctx.timestamp);
        }
        Ok(outcome)
    }

    /// Client cancels before any work started; the whole balance returns
    pub fn cancel_escrow(&mut self, ctx: &CallContext, id: U256) -> EscrowResult<U256> {
        Self::non_payable(ctx)?;
        let escrow = self.escrow_ref(id)?;
        if ctx.sender != escrow.client {
            return Err(EscrowError::NotAuthorized);
        }
        if escrow.status != EscrowStatus::Active || escrow.open_dispute().is_some() {
            return Err(EscrowError::invalid_state(format!("escrow {} is {}", id, escrow.status)));
        }
        if escrow
            .milestones
            .iter()
            .any(|m| m.status != MilestoneStatus::Pending)
        {
            return Err(EscrowError::invalid_state("work has started on a milestone"));
        }

        let refund = escrow.balance;
        let client = escrow.client;
        let events = self.refund_open_milestones(id, EscrowStatus::Cancelled, ctx.timestamp)?;
        self.credit(client, refund);
        self.events.extend(events);
        self.events.push(EvmEscrowEvent::EscrowCancelled {
            escrow_id: id,
            refund_amount: refund,
        });
        info!("[EVM] Escrow {} cancelled, refunded {}", id, refund);
        Ok(refund)
    }

    /// Admin returns the remaining balance to the client and closes the
    /// escrow, whatever state its milestones are in
    pub fn emergency_refund(&mut self, ctx: &CallContext, id: U256) -> EscrowResult<U256> {
        Self::non_payable(ctx)?;
        if !self.config.is_admin(&ctx.sender) {
            return Err(EscrowError::NotAuthorized);
        }
        let escrow = self.escrow_ref(id)?;
        if escrow.status.is_terminal() {
            return Err(EscrowError::invalid_state(format!("escrow {} is {}", id, escrow.status)));
        }

        let refund = escrow.balance;
        let client = escrow.client;
        let events = self.refund_open_milestones(id, EscrowStatus::Refunded, ctx.timestamp)?;
        self.credit(client, refund);
        if let Some(dispute) = self.escrow_mut(id)?.dispute.as_mut() {
            dispute.close();
        }
        self.events.extend(events);
        self.events.push(EvmEscrowEvent::EscrowRefunded {
            escrow_id: id,
            amount: refund,
        });
        info!("[EVM] Emergency refund of escrow {}: {}", id, refund);
        Ok(refund)
    }

    /// Moves every non-terminal milestone to Refunded, zeroes the balance
    /// and sets the closing status
    fn refund_open_milestones(
        &mut self,
        id: U256,
        closing: EscrowStatus,
        now: u64,
    ) -> EscrowResult<Vec<EvmEscrowEvent>> {
        let escrow = self.escrow_mut(id)?;
        let mut events = vec![];
        for (idx, milestone) in escrow.milestones.iter_mut().enumerate() {
            if milestone.status.is_terminal() {
                continue;
            }
            milestone.status = MilestoneStatus::Refunded;
            events.push(EvmEscrowEvent::MilestoneRefunded {
                escrow_id: id,
                milestone_index: idx as u64,
                amount: milestone.amount,
            });
        }
        escrow.balance = U256::zero();
        escrow.status = closing;
        escrow.updated_at = now;
        Ok(events)
    }

    fn escrow_mut(&mut self, id: U256) -> EscrowResult<&mut EvmEscrow> {
        self.escrows
            .get_mut(&id)
            .ok_or_else(|| EscrowError::NotFound(format!("escrow {}", id)))
    }

    /// `initiateBridgeTransfer(recipient, amount)` payable
    pub fn initiate_bridge_transfer(
        &mut self,
        ctx: &CallContext,
        recipient: &str,
        amount: U256,
    ) -> EscrowResult<TransferId> {
        let out = self.bridge.initiate(
            ctx.sender,
            recipient,
            to_u128(amount)?,
            to_u128(ctx.value)?,
            ctx.timestamp,
        )?;
        self.credit(ctx.sender, U256::from(out.excess));
        self.events.push(EvmEscrowEvent::BridgeTransferInitiated {
            transfer_id: out.transfer_id.0,
            sender: ctx.sender,
            recipient: recipient.to_string(),
            amount,
            timestamp: ctx.timestamp,
            nonce: out.nonce,
        });
        Ok(out.transfer_id)
    }

    /// Relayer confirmation; returns the confirmation count
    pub fn confirm_bridge_transfer(
        &mut self,
        ctx: &CallContext,
        transfer_id: &TransferId,
    ) -> EscrowResult<u32> {
        Self::non_payable(ctx)?;
        let out = self
            .bridge
            .confirm(&self.config, &ctx.sender, transfer_id, ctx.timestamp)?;
        self.events.push(EvmEscrowEvent::BridgeTransferConfirmed {
            transfer_id: transfer_id.0,
            relayer: ctx.sender,
            confirmations: out.confirmations as u64,
        });
        if out.executed {
            if let Some(transfer) = self.bridge.get(transfer_id) {
                self.events.push(EvmEscrowEvent::BridgeTransferExecuted {
                    transfer_id: transfer_id.0,
                    recipient: transfer.recipient.clone(),
                    amount: U256::from(transfer.amount),
                });
            }
        }
        Ok(out.confirmations)
    }

    /// Anyone may trigger the refund; funds go to the recorded sender
    pub fn refund_bridge_transfer(
        &mut self,
        ctx: &CallContext,
        transfer_id: &TransferId,
    ) -> EscrowResult<U256> {
        Self::non_payable(ctx)?;
        let out = self
            .bridge
            .refund(transfer_id, self.config.refund_timeout, ctx.timestamp)?;
        let amount = U256::from(out.amount);
        self.credit(out.sender, amount);
        self.events.push(EvmEscrowEvent::BridgeTransferRefunded {
            transfer_id: transfer_id.0,
            sender: out.sender,
            amount,
        });
        Ok(amount)
    }

    pub fn mark_bridge_transfer_failed(
        &mut self,
        ctx: &CallContext,
        transfer_id: &TransferId,
        reason: &str,
    ) -> EscrowResult<()> {
        Self::non_payable(ctx)?;
        self.bridge
            .mark_failed(&self.config, &ctx.sender, transfer_id, reason)?;
        self.events.push(EvmEscrowEvent::BridgeTransferFailed {
            transfer_id: transfer_id.0,
            reason: reason.to_string(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use escrow_types::EVM_BRIDGE_REFUND_TIMEOUT_SECS;

    const T0: u64 = 1_700_000_000;

    fn addr(b: u8) -> Address {
        Address::repeat_byte(b)
    }

    fn client() -> Address {
        addr(0xc1)
    }

    fn freelancer() -> Address {
        addr(0xf1)
    }

    fn admin() -> Address {
        addr(0xad)
    }

    fn treasury() -> Address {
        addr(0x7e)
    }

    fn contract() -> EvmEscrowContract {
        EvmEscrowContract::new(
            addr(0xee),
            DeploymentConfig {
                admin: admin(),
                treasury: treasury(),
                fee_bps: 100,
                arbiters: vec![addr(0xa1), addr(0xa2), addr(0xa3)],
                relayers: vec![addr(0xb1), addr(0xb2)],
                required_confirmations: 2,
                refund_timeout: EVM_BRIDGE_REFUND_TIMEOUT_SECS,
            },
        )
        .unwrap()
    }

    fn params(amounts: &[u64]) -> CreateEscrowParams {
        CreateEscrowParams {
            freelancer: freelancer(),
            title: "Website".into(),
            description: "Landing page".into(),
            token_symbol: "ETH".into(),
            milestone_amounts: amounts.iter().map(|a| U256::from(*a)).collect(),
            milestone_descriptions: amounts.iter().map(|a| format!("m{}", a)).collect(),
            milestone_deadlines: vec![],
            cross_chain_recipient: None,
        }
    }

    fn at(sender: Address) -> CallContext {
        CallContext::new(sender, T0)
    }

    fn create(c: &mut EvmEscrowContract, amounts: &[u64]) -> U256 {
        let total: u64 = amounts.iter().sum();
        c.create_escrow(&at(client()).with_value(U256::from(total)), params(amounts))
            .unwrap()
            .escrow_id
    }

    #[test]
    fn test_ids_are_sequential_from_one() {
        let mut c = contract();
        assert_eq!(create(&mut c, &[10]), U256::one());
        assert_eq!(create(&mut c, &[10]), U256::from(2u64));
    }

    #[test]
    fn test_create_rejects_bad_milestone_sets() {
        let mut c = contract();
        let ctx = at(client()).with_value(U256::from(100u64));
        assert!(matches!(
            c.create_escrow(&ctx, params(&[])),
            Err(EscrowError::InvalidMilestoneSet(_))
        ));
        assert!(matches!(
            c.create_escrow(&ctx, params(&[50, 0])),
            Err(EscrowError::InvalidMilestoneSet(_))
        ));
        let mut p = params(&[50, 50]);
        p.milestone_descriptions.pop();
        assert!(matches!(
            c.create_escrow(&ctx, p),
            Err(EscrowError::InvalidMilestoneSet(_))
        ));
        let mut p = params(&[50, 50]);
        p.milestone_deadlines = vec![T0 + 10];
        assert!(matches!(
            c.create_escrow(&ctx, p),
            Err(EscrowError::InvalidMilestoneSet(_))
        ));
        assert!(matches!(
            c.create_escrow(&ctx, params(&[60, 50])),
            Err(EscrowError::InvalidAmount(_))
        ));
        let mut p = params(&[50]);
        p.cross_chain_recipient = Some(" ".into());
        assert_eq!(c.create_escrow(&ctx, p), Err(EscrowError::InvalidRecipient));
        assert_eq!(c.escrow_count(), 0);
        assert!(c.take_events().is_empty());
    }

    #[test]
    fn test_deadlines_are_optional_per_milestone() {
        let mut c = contract();
        let mut p = params(&[10, 20]);
        p.milestone_deadlines = vec![T0 + 100, 0];
        let id = c
            .create_escrow(&at(client()).with_value(U256::from(30u64)), p)
            .unwrap()
            .escrow_id;
        let escrow = c.escrow(id).unwrap();
        assert_eq!(escrow.milestones[0].deadline, Some(T0 + 100));
        assert_eq!(escrow.milestones[1].deadline, None);
    }

    #[test]
    fn test_failed_call_emits_nothing() {
        let mut c = contract();
        let id = create(&mut c, &[100]);
        c.take_events();
        assert_eq!(
            c.approve_milestone(&at(client()), id, 0),
            Err(EscrowError::InvalidState("milestone is not submitted".into()))
        );
        assert_eq!(c.submit_milestone(&at(client()), id, 0, "x"), Err(EscrowError::NotAuthorized));
        assert!(matches!(
            c.submit_milestone(&at(freelancer()), id, 5, "x"),
            Err(EscrowError::NotFound(_))
        ));
        assert!(c.take_events().is_empty());
        assert_eq!(c.escrow(id).unwrap().milestones[0].status, MilestoneStatus::Pending);
    }

    #[test]
    fn test_admin_may_release() {
        let mut c = contract();
        let id = create(&mut c, &[1000]);
        c.start_milestone(&at(freelancer()), id, 0).unwrap();
        c.submit_milestone(&at(freelancer()), id, 0, "done").unwrap();
        c.approve_milestone(&at(client()), id, 0).unwrap();
        assert_eq!(c.release_milestone(&at(freelancer()), id, 0), Err(EscrowError::NotAuthorized));
        c.release_milestone(&at(admin()), id, 0).unwrap();
        let escrow = c.escrow(id).unwrap();
        assert_eq!(escrow.status, EscrowStatus::Completed);
        assert_eq!(escrow.balance, U256::zero());
        assert_eq!(c.payout(freelancer()), U256::from(990u64));
        assert_eq!(c.payout(treasury()), U256::from(10u64));
        assert_eq!(
            c.release_milestone(&at(client()), id, 0),
            Err(EscrowError::InvalidState("escrow 1 is completed".into()))
        );
    }

    #[test]
    fn test_cross_chain_release_opens_bridge_transfer() {
        let mut c = contract();
        let mut p = params(&[3000]);
        p.cross_chain_recipient = Some("0x5u1".into());
        let id = c
            .create_escrow(&at(client()).with_value(U256::from(3000u64)), p)
            .unwrap()
            .escrow_id;
        c.submit_milestone(&at(freelancer()), id, 0, "done").unwrap();
        c.approve_milestone(&at(client()), id, 0).unwrap();
        c.take_events();
        c.release_milestone(&at(client()), id, 0).unwrap();

        let milestone = &c.escrow(id).unwrap().milestones[0];
        let transfer_id = milestone.bridge_transfer_id.unwrap();
        let transfer = c.bridge_transfer(&transfer_id).unwrap();
        assert_eq!(transfer.amount, 2970);
        assert_eq!(transfer.sender, freelancer());
        assert_eq!(transfer.recipient, "0x5u1");
        assert_eq!(c.payout(freelancer()), U256::zero());
        assert_eq!(c.payout(treasury()), U256::from(30u64));

        let kinds: Vec<_> = c.take_events().iter().map(|e| e.kind().name()).collect();
        assert_eq!(
            kinds,
            vec!["BridgeTransferInitiated", "MilestoneReleased", "EscrowCompleted"]
        );
    }

    #[test]
    fn test_dispute_requires_submitted_work_and_single_open_dispute() {
        let mut c = contract();
        let id = create(&mut c, &[100, 200]);
        assert!(matches!(
            c.initiate_dispute(&at(client()), id, 0, "nothing delivered"),
            Err(EscrowError::InvalidState(_))
        ));
        c.submit_milestone(&at(freelancer()), id, 0, "a").unwrap();
        c.submit_milestone(&at(freelancer()), id, 1, "b").unwrap();
        assert_eq!(
            c.initiate_dispute(&at(addr(0x99)), id, 0, "x"),
            Err(EscrowError::NotAuthorized)
        );
        c.initiate_dispute(&at(client()), id, 0, "poor quality").unwrap();
        assert_eq!(c.escrow(id).unwrap().status, EscrowStatus::Disputed);
        assert_eq!(
            c.initiate_dispute(&at(freelancer()), id, 1, "x"),
            Err(EscrowError::DisputeExists)
        );
        // other milestones keep moving while disputed
        c.approve_milestone(&at(client()), id, 1).unwrap();
    }

    #[test]
    fn test_freelancer_majority_releases_with_fee() {
        let mut c = contract();
        let id = create(&mut c, &[1000, 500]);
        c.submit_milestone(&at(freelancer()), id, 0, "a").unwrap();
        c.initiate_dispute(&at(freelancer()), id, 0, "client silent").unwrap();
        assert_eq!(c.vote_on_dispute(&at(addr(0xa1)), id, false).unwrap(), None);
        assert_eq!(c.vote_on_dispute(&at(addr(0xa1)), id, true), Err(EscrowError::AlreadyVoted));
        assert_eq!(c.vote_on_dispute(&at(addr(0x01)), id, true), Err(EscrowError::NotAuthorized));
        assert_eq!(c.vote_on_dispute(&at(addr(0xa2)), id, true).unwrap(), None);
        assert_eq!(
            c.vote_on_dispute(&at(addr(0xa3)), id, false).unwrap(),
            Some(DisputeOutcome::Freelancer)
        );
        let escrow = c.escrow(id).unwrap();
        assert_eq!(escrow.milestones[0].status, MilestoneStatus::Released);
        assert_eq!(escrow.status, EscrowStatus::Active);
        assert_eq!(escrow.balance, U256::from(500u64));
        assert_eq!(c.payout(freelancer()), U256::from(990u64));
        assert!(matches!(
            c.vote_on_dispute(&at(addr(0xa1)), id, true),
            Err(EscrowError::InvalidState(_))
        ));
    }

    #[test]
    fn test_cancel_only_before_work() {
        let mut c = contract();
        let id = create(&mut c, &[100, 200]);
        assert_eq!(c.cancel_escrow(&at(freelancer()), id), Err(EscrowError::NotAuthorized));
        let refund = c.cancel_escrow(&at(client()), id).unwrap();
        assert_eq!(refund, U256::from(300u64));
        let escrow = c.escrow(id).unwrap();
        assert_eq!(escrow.status, EscrowStatus::Cancelled);
        assert!(escrow
            .milestones
            .iter()
            .all(|m| m.status == MilestoneStatus::Refunded));
        assert_eq!(c.payout(client()), U256::from(300u64));

        let id = create(&mut c, &[100]);
        c.start_milestone(&at(freelancer()), id, 0).unwrap();
        assert!(matches!(
            c.cancel_escrow(&at(client()), id),
            Err(EscrowError::InvalidState(_))
        ));
    }

    #[test]
    fn test_emergency_refund_closes_dispute() {
        let mut c = contract();
        let id = create(&mut c, &[100, 200]);
        c.submit_milestone(&at(freelancer()), id, 0, "a").unwrap();
        c.approve_milestone(&at(client()), id, 0).unwrap();
        c.release_milestone(&at(client()), id, 0).unwrap();
        c.submit_milestone(&at(freelancer()), id, 1, "b").unwrap();
        c.initiate_dispute(&at(client()), id, 1, "late").unwrap();

        assert_eq!(c.emergency_refund(&at(client()), id), Err(EscrowError::NotAuthorized));
        c.take_events();
        assert_eq!(c.emergency_refund(&at(admin()), id).unwrap(), U256::from(200u64));
        let escrow = c.escrow(id).unwrap();
        assert_eq!(escrow.status, EscrowStatus::Refunded);
        assert_eq!(escrow.milestones[0].status, MilestoneStatus::Released);
        assert_eq!(escrow.milestones[1].status, MilestoneStatus::Refunded);
        assert!(escrow.open_dispute().is_none());
        let kinds: Vec<_> = c.take_events().iter().map(|e| e.kind().name()).collect();
        assert_eq!(kinds, vec!["MilestoneRefunded", "EscrowRefunded"]);
        assert!(c.emergency_refund(&at(admin()), id).is_err());
    }

    #[test]
    fn test_direct_bridge_transfer_lifecycle() {
        let mut c = contract();
        let sender = addr(0x55);
        let ctx = at(sender).with_value(U256::from(1500u64));
        let id = c.initiate_bridge_transfer(&ctx, "0xdest", U256::from(1000u64)).unwrap();
        assert_eq!(c.payout(sender), U256::from(500u64));
        assert_eq!(id, TransferId::evm("0xdest", U256::from(1000u64), T0, 0));

        assert_eq!(
            c.mark_bridge_transfer_failed(&at(sender), &id, "stuck"),
            Err(EscrowError::NotAuthorized)
        );
        c.mark_bridge_transfer_failed(&at(admin()), &id, "stuck").unwrap();
        assert_eq!(c.refund_bridge_transfer(&at(addr(0x01)), &id).unwrap(), U256::from(1000u64));
        assert_eq!(c.payout(sender), U256::from(1500u64));
        assert_eq!(c.confirm_bridge_transfer(&at(addr(0xb1)), &id), Err(EscrowError::AlreadyFinal));
    }

    #[test]
    fn test_non_payable_entry_points() {
        let mut c = contract();
        let id = create(&mut c, &[100]);
        let ctx = at(freelancer()).with_value(U256::one());
        assert!(matches!(
            c.submit_milestone(&ctx, id, 0, "x"),
            Err(EscrowError::InvalidAmount(_))
        ));
    }
}

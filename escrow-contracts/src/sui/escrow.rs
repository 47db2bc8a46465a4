// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Sui milestone escrow module.
//!
//! Mirrors the Move package: each escrow is a shared object with a 32-byte
//! object ID, amounts are `u64` coin values and the clock is in milliseconds.
//! A Move abort rolls back the whole transaction; here every entry function
//! validates before it mutates, which gives the same result.

use super::events::*;
use super::types::{ObjectId, SuiAddress};
use crate::bridge::{BridgeTransfer, BridgeTransferTracker, SuiBridge};
use crate::config::DeploymentConfig;
use crate::dispute::Dispute;
use crate::error::{EscrowError, EscrowResult};
use escrow_types::{DisputeOutcome, EscrowStatus, FeeSplit, MilestoneStatus, TransferId};
use ethers::utils::keccak256;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// `TxContext` plus the `Clock` reading of the executing transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxContext {
    pub sender: SuiAddress,
    pub digest: String,
    pub timestamp_ms: u64,
}

impl TxContext {
    pub fn new(sender: SuiAddress, digest: impl Into<String>, timestamp_ms: u64) -> Self {
        Self {
            sender,
            digest: digest.into(),
            timestamp_ms,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuiMilestone {
    pub description: String,
    pub amount: u64,
    pub deadline_ms: Option<u64>,
    pub status: MilestoneStatus,
    pub submission_note: String,
    pub submitted_at_ms: Option<u64>,
    pub approved_at_ms: Option<u64>,
    pub released_at_ms: Option<u64>,
    pub bridge_transfer_id: Option<TransferId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuiEscrow {
    pub id: ObjectId,
    pub client: SuiAddress,
    pub freelancer: SuiAddress,
    pub title: String,
    pub description: String,
    pub token_symbol: String,
    pub total_amount: u64,
    /// `Balance<T>` held by the shared object
    pub balance: u64,
    pub status: EscrowStatus,
    pub cross_chain_recipient: Option<String>,
    pub milestones: Vec<SuiMilestone>,
    pub dispute: Option<Dispute<SuiAddress>>,
    pub created_at_ms: u64,
    pub updated_at_ms: u64,
}

impl SuiEscrow {
    pub fn open_dispute(&self) -> Option<&Dispute<SuiAddress>> {
        self.dispute.as_ref().filter(|d| d.is_open())
    }
}

#[derive(Debug, Clone, Default)]
pub struct CreateEscrowArgs {
    pub freelancer: SuiAddress,
    pub title: String,
    pub description: String,
    pub token_symbol: String,
    pub milestone_amounts: Vec<u64>,
    pub milestone_descriptions: Vec<String>,
    /// Empty for no deadlines, otherwise one entry per milestone (0 = none)
    pub milestone_deadlines_ms: Vec<u64>,
    pub cross_chain_recipient: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreatedEscrow {
    pub escrow_id: ObjectId,
    /// Change returned from the payment coin
    pub excess: u64,
}

pub struct SuiEscrowModule {
    package_id: ObjectId,
    config: DeploymentConfig<SuiAddress>,
    escrows: BTreeMap<ObjectId, SuiEscrow>,
    bridge: BridgeTransferTracker<SuiBridge>,
    /// Coins transferred to each address
    payouts: BTreeMap<SuiAddress, u64>,
    objects_created: u64,
    events: Vec<SuiEscrowEvent>,
}

impl SuiEscrowModule {
    pub fn new(package_id: ObjectId, config: DeploymentConfig<SuiAddress>) -> EscrowResult<Self> {
        config.validate()?;
        Ok(Self {
            package_id,
            config,
            escrows: BTreeMap::new(),
            bridge: BridgeTransferTracker::new(),
            payouts: BTreeMap::new(),
            objects_created: 0,
            events: vec![],
        })
    }

    pub fn package_id(&self) -> ObjectId {
        self.package_id
    }

    pub fn config(&self) -> &DeploymentConfig<SuiAddress> {
        &self.config
    }

    pub fn escrow(&self, id: &ObjectId) -> Option<&SuiEscrow> {
        self.escrows.get(id)
    }

    pub fn bridge_transfer(&self, id: &TransferId) -> Option<&BridgeTransfer<SuiAddress>> {
        self.bridge.get(id)
    }

    pub fn payout(&self, account: &SuiAddress) -> u64 {
        self.payouts.get(account).copied().unwrap_or_default()
    }

    pub fn take_events(&mut self) -> Vec<SuiEscrowEvent> {
        std::mem::take(&mut self.events)
    }

    fn transfer(&mut self, to: SuiAddress, amount: u64) {
        if amount > 0 {
            *self.payouts.entry(to).or_default() += amount;
        }
    }

    /// Fresh object ID derived from the transaction digest, like
    /// `object::new(ctx)`
    fn new_object_id(&mut self, ctx: &TxContext) -> ObjectId {
        self.objects_created += 1;
        let mut seed = ctx.digest.as_bytes().to_vec();
        seed.extend_from_slice(&self.objects_created.to_le_bytes());
        ObjectId(keccak256(seed))
    }

    fn borrow(&self, id: &ObjectId) -> EscrowResult<&SuiEscrow> {
        self.escrows
            .get(id)
            .ok_or_else(|| EscrowError::NotFound(format!("escrow {}", id)))
    }

    fn borrow_mut(&mut self, id: &ObjectId) -> EscrowResult<&mut SuiEscrow> {
        self.escrows
            .get_mut(id)
            .ok_or_else(|| EscrowError::NotFound(format!("escrow {}", id)))
    }

    fn borrow_milestone(&self, id: &ObjectId, index: u64) -> EscrowResult<(&SuiEscrow, usize)> {
        let escrow = self.borrow(id)?;
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
        ctx: &TxContext,
        payment: u64,
        args: CreateEscrowArgs,
    ) -> EscrowResult<CreatedEscrow> {
        let n = args.milestone_amounts.len();
        if n == 0 {
            return Err(EscrowError::InvalidMilestoneSet("no milestones".into()));
        }
        if args.milestone_descriptions.len() != n
            || (!args.milestone_deadlines_ms.is_empty() && args.milestone_deadlines_ms.len() != n)
        {
            return Err(EscrowError::InvalidMilestoneSet(
                "milestone vectors differ in length".into(),
            ));
        }
        if args.milestone_amounts.contains(&0) {
            return Err(EscrowError::InvalidMilestoneSet("zero milestone amount".into()));
        }
        if args.freelancer.is_zero() {
            return Err(EscrowError::InvalidRecipient);
        }
        if matches!(&args.cross_chain_recipient, Some(r) if r.trim().is_empty()) {
            return Err(EscrowError::InvalidRecipient);
        }
        let total = args
            .milestone_amounts
            .iter()
            .try_fold(0u64, |acc, a| acc.checked_add(*a))
            .ok_or_else(|| EscrowError::InvalidAmount("milestone total overflows".into()))?;
        if payment < total {
            return Err(EscrowError::InvalidAmount(format!(
                "payment {} below milestone total {}",
                payment, total
            )));
        }

        let id = self.new_object_id(ctx);
        let excess = payment - total;
        let milestones = args
            .milestone_amounts
            .iter()
            .zip(args.milestone_descriptions)
            .enumerate()
            .map(|(i, (amount, description))| SuiMilestone {
                description,
                amount: *amount,
                deadline_ms: args.milestone_deadlines_ms.get(i).copied().filter(|d| *d != 0),
                status: MilestoneStatus::Pending,
                submission_note: String::new(),
                submitted_at_ms: None,
                approved_at_ms: None,
                released_at_ms: None,
                bridge_transfer_id: None,
            })
            .collect();
        self.escrows.insert(
            id,
            SuiEscrow {
                id,
                client: ctx.sender,
                freelancer: args.freelancer,
                title: args.title.clone(),
                description: args.description,
                token_symbol: args.token_symbol.clone(),
                total_amount: total,
                balance: total,
                status: EscrowStatus::Active,
                cross_chain_recipient: args.cross_chain_recipient.clone(),
                milestones,
                dispute: None,
                created_at_ms: ctx.timestamp_ms,
                updated_at_ms: ctx.timestamp_ms,
            },
        );
        self.transfer(ctx.sender, excess);
        self.events
            .push(SuiEscrowEvent::EscrowCreated(MoveEscrowCreatedEvent {
                escrow_id: id,
                client: ctx.sender,
                freelancer: args.freelancer,
                total_amount: total,
                milestone_amounts: args.milestone_amounts,
                is_cross_chain: args.cross_chain_recipient.is_some(),
                cross_chain_recipient: args.cross_chain_recipient.unwrap_or_default(),
                token_symbol: args.token_symbol,
                title: args.title,
            }));
        info!("[SUI] Escrow {} created total={} excess={}", id, total, excess);
        Ok(CreatedEscrow {
            escrow_id: id,
            excess,
        })
    }

    pub fn start_milestone(&mut self, ctx: &TxContext, id: &ObjectId, index: u64) -> EscrowResult<()> {
        let (escrow, idx) = self.borrow_milestone(id, index)?;
        if ctx.sender != escrow.freelancer {
            return Err(EscrowError::NotAuthorized);
        }
        if escrow.milestones[idx].status != MilestoneStatus::Pending {
            return Err(EscrowError::invalid_state("milestone is not pending"));
        }

        let escrow = self.borrow_mut(id)?;
        escrow.milestones[idx].status = MilestoneStatus::InProgress;
        escrow.updated_at_ms = ctx.timestamp_ms;
        self.events
            .push(SuiEscrowEvent::MilestoneStarted(MoveMilestoneStartedEvent {
                escrow_id: *id,
                milestone_index: index,
            }));
        Ok(())
    }

    pub fn submit_milestone(
        &mut self,
        ctx: &TxContext,
        id: &ObjectId,
        index: u64,
        note: &str,
    ) -> EscrowResult<()> {
        let (escrow, idx) = self.borrow_milestone(id, index)?;
        if ctx.sender != escrow.freelancer {
            return Err(EscrowError::NotAuthorized);
        }
        let status = escrow.milestones[idx].status;
        if status != MilestoneStatus::Pending && status != MilestoneStatus::InProgress {
            return Err(EscrowError::invalid_state(format!(
                "cannot submit a {} milestone",
                status
            )));
        }

        let escrow = self.borrow_mut(id)?;
        let milestone = &mut escrow.milestones[idx];
        milestone.status = MilestoneStatus::Submitted;
        milestone.submission_note = note.to_string();
        milestone.submitted_at_ms = Some(ctx.timestamp_ms);
        escrow.updated_at_ms = ctx.timestamp_ms;
        self.events
            .push(SuiEscrowEvent::MilestoneSubmitted(MoveMilestoneSubmittedEvent {
                escrow_id: *id,
                milestone_index: index,
                note: note.to_string(),
            }));
        Ok(())
    }

    pub fn approve_milestone(&mut self, ctx: &TxContext, id: &ObjectId, index: u64) -> EscrowResult<()> {
        let (escrow, idx) = self.borrow_milestone(id, index)?;
        if ctx.sender != escrow.client {
            return Err(EscrowError::NotAuthorized);
        }
        if escrow.milestones[idx].status != MilestoneStatus::Submitted {
            return Err(EscrowError::invalid_state("milestone is not submitted"));
        }

        let escrow = self.borrow_mut(id)?;
        escrow.milestones[idx].status = MilestoneStatus::Approved;
        escrow.milestones[idx].approved_at_ms = Some(ctx.timestamp_ms);
        escrow.updated_at_ms = ctx.timestamp_ms;
        self.events
            .push(SuiEscrowEvent::MilestoneApproved(MoveMilestoneApprovedEvent {
                escrow_id: *id,
                milestone_index: index,
            }));
        Ok(())
    }

    /// Client, or the admin acting as system agent
    pub fn release_milestone(&mut self, ctx: &TxContext, id: &ObjectId, index: u64) -> EscrowResult<()> {
        let (escrow, idx) = self.borrow_milestone(id, index)?;
        if ctx.sender != escrow.client && !self.config.is_admin(&ctx.sender) {
            return Err(EscrowError::NotAuthorized);
        }
        if escrow.milestones[idx].status != MilestoneStatus::Approved {
            return Err(EscrowError::invalid_state("milestone is not approved"));
        }

        let events = self.pay_out_milestone(id, idx, ctx.timestamp_ms)?;
        self.events.extend(events);
        self.complete_if_done(id, ctx.timestamp_ms);
        Ok(())
    }

    /// Splits the milestone amount between treasury and freelancer, bridging
    /// the freelancer's share for cross-chain escrows
    fn pay_out_milestone(
        &mut self,
        id: &ObjectId,
        idx: usize,
        now_ms: u64,
    ) -> EscrowResult<Vec<SuiEscrowEvent>> {
        let escrow = self.borrow(id)?;
        let amount = escrow.milestones[idx].amount;
        if escrow.balance < amount {
            return Err(EscrowError::InsufficientBalance);
        }
        let split = FeeSplit::new(amount as u128, self.config.fee_bps);
        // the split of a u64 stays within u64
        let (net, fee) = (split.recipient_amount as u64, split.fee as u64);
        let freelancer = escrow.freelancer;
        let cross_chain = escrow.cross_chain_recipient.clone();

        let mut events = vec![];
        let bridge_id = match cross_chain {
            Some(recipient) if net > 0 => {
                let out = self
                    .bridge
                    .initiate(freelancer, &recipient, net as u128, net as u128, now_ms)?;
                events.push(SuiEscrowEvent::BridgeTransferInitiated(
                    MoveBridgeTransferInitiatedEvent {
                        transfer_id: out.transfer_id.0.to_vec(),
                        sender: freelancer,
                        recipient,
                        amount: net,
                        timestamp_ms: now_ms,
                        nonce: out.nonce,
                    },
                ));
                Some(out.transfer_id)
            }
            _ => {
                self.transfer(freelancer, net);
                None
            }
        };
        let treasury = self.config.treasury;
        self.transfer(treasury, fee);

        let escrow = self.borrow_mut(id)?;
        escrow.balance -= amount;
        escrow.updated_at_ms = now_ms;
        let milestone = &mut escrow.milestones[idx];
        milestone.status = MilestoneStatus::Released;
        milestone.released_at_ms = Some(now_ms);
        milestone.bridge_transfer_id = bridge_id;
        events.push(SuiEscrowEvent::MilestoneReleased(MoveMilestoneReleasedEvent {
            escrow_id: *id,
            milestone_index: idx as u64,
            recipient_amount: net,
            fee,
            bridge_transfer_id: bridge_id.map(|t| t.0.to_vec()).unwrap_or_default(),
        }));
        info!(
            "[SUI] Escrow {} milestone {} released: recipient={} fee={} bridged={}",
            id,
            idx,
            net,
            fee,
            bridge_id.is_some()
        );
        Ok(events)
    }

    fn complete_if_done(&mut self, id: &ObjectId, now_ms: u64) {
        let Some(escrow) = self.escrows.get_mut(id) else {
            return;
        };
        if escrow.status.is_terminal() {
            return;
        }
        if escrow.milestones.iter().all(|m| m.status.is_terminal()) {
            escrow.status = EscrowStatus::Completed;
            escrow.updated_at_ms = now_ms;
            self.events
                .push(SuiEscrowEvent::EscrowCompleted(MoveEscrowCompletedEvent {
                    escrow_id: *id,
                }));
            info!("[SUI] Escrow {} completed", id);
        }
    }

    pub fn initiate_dispute(
        &mut self,
        ctx: &TxContext,
        id: &ObjectId,
        index: u64,
        reason: &str,
    ) -> EscrowResult<()> {
        let (escrow, idx) = self.borrow_milestone(id, index)?;
        if ctx.sender != escrow.client && ctx.sender != escrow.freelancer {
            return Err(EscrowError::NotAuthorized);
        }
        if escrow.open_dispute().is_some() {
            return Err(EscrowError::DisputeExists);
        }
        if escrow.status != EscrowStatus::Active {
            return Err(EscrowError::invalid_state(format!("escrow {} is {}", id, escrow.status)));
        }
        let status = escrow.milestones[idx].status;
        if status != MilestoneStatus::Submitted && status != MilestoneStatus::Approved {
            return Err(EscrowError::invalid_state(format!(
                "cannot dispute a {} milestone",
                status
            )));
        }

        let escrow = self.borrow_mut(id)?;
        escrow.milestones[idx].status = MilestoneStatus::Disputed;
        escrow.status = EscrowStatus::Disputed;
        escrow.dispute = Some(Dispute::open(
            ctx.sender,
            idx,
            reason.to_string(),
            ctx.timestamp_ms,
        ));
        escrow.updated_at_ms = ctx.timestamp_ms;
        self.events
            .push(SuiEscrowEvent::DisputeInitiated(MoveDisputeInitiatedEvent {
                escrow_id: *id,
                initiator: ctx.sender,
                milestone_index: index,
                reason: reason.to_string(),
            }));
        info!("[SUI] Dispute opened on escrow {} milestone {}", id, index);
        Ok(())
    }

    pub fn vote_on_dispute(
        &mut self,
        ctx: &TxContext,
        id: &ObjectId,
        vote_for_client: bool,
    ) -> EscrowResult<Option<DisputeOutcome>> {
        if !self.config.is_arbiter(&ctx.sender) {
            return Err(EscrowError::NotAuthorized);
        }
        let escrow = self.borrow(id)?;
        let Some(open) = escrow.open_dispute() else {
            return Err(EscrowError::invalid_state(format!("escrow {} has no open dispute", id)));
        };
        let mut dispute = open.clone();
        let outcome = dispute.record_vote(ctx.sender, vote_for_client)?;
        let idx = dispute.milestone_index;
        let amount = escrow.milestones[idx].amount;
        let balance = escrow.balance;
        let client = escrow.client;

        let resolution = match outcome {
            None => vec![],
            Some(DisputeOutcome::Freelancer) => self.pay_out_milestone(id, idx, ctx.timestamp_ms)?,
            Some(DisputeOutcome::Client) => {
                if balance < amount {
                    return Err(EscrowError::InsufficientBalance);
                }
                self.transfer(client, amount);
                let escrow = self.borrow_mut(id)?;
                escrow.balance -= amount;
                escrow.milestones[idx].status = MilestoneStatus::Refunded;
                vec![SuiEscrowEvent::MilestoneRefunded(MoveMilestoneRefundedEvent {
                    escrow_id: *id,
                    milestone_index: idx as u64,
                    amount,
                })]
            }
        };

        let for_client = dispute.votes_for_client as u64;
        let for_freelancer = dispute.votes_for_freelancer as u64;
        let escrow = self.borrow_mut(id)?;
        escrow.dispute = Some(dispute);
        escrow.updated_at_ms = ctx.timestamp_ms;
        if outcome.is_some() && escrow.status == EscrowStatus::Disputed {
            escrow.status = EscrowStatus::Active;
        }
        self.events
            .push(SuiEscrowEvent::DisputeVoteCast(MoveDisputeVoteCastEvent {
                escrow_id: *id,
                arbiter: ctx.sender,
                milestone_index: idx as u64,
                vote_for_client,
                votes_for_client: for_client,
                votes_for_freelancer: for_freelancer,
            }));
        debug!(
            "[SUI] Vote on escrow {} dispute: client={} freelancer={}",
            id, for_client, for_freelancer
        );
        if let Some(outcome) = outcome {
            self.events
                .push(SuiEscrowEvent::DisputeResolved(MoveDisputeResolvedEvent {
                    escrow_id: *id,
                    milestone_index: idx as u64,
                    favour_client: outcome.favours_client(),
                    votes_for_client: for_client,
                    votes_for_freelancer: for_freelancer,
                }));
            self.events.extend(resolution);
            info!("[SUI] Dispute on escrow {} resolved for {}", id, outcome);
            self.complete_if_done(id, ctx.timestamp_ms);
        }
        Ok(outcome)
    }

    pub fn cancel_escrow(&mut self, ctx: &TxContext, id: &ObjectId) -> EscrowResult<u64> {
        let escrow = self.borrow(id)?;
        if ctx.sender != escrow.client {
            return Err(EscrowError::NotAuthorized);
        }
        if escrow.status != EscrowStatus::Active || escrow.open_dispute().is_some() {
            return Err(EscrowError::invalid_state(format!("escrow {} is {}", id, escrow.status)));
        }
        if !escrow
            .milestones
            .iter()
            .all(|m| m.status == MilestoneStatus::Pending)
        {
            return Err(EscrowError::invalid_state("work has started on a milestone"));
        }

        let (refund, client) = (escrow.balance, escrow.client);
        let events = self.close_with_refund(id, EscrowStatus::Cancelled, ctx.timestamp_ms)?;
        self.transfer(client, refund);
        self.events.extend(events);
        self.events
            .push(SuiEscrowEvent::EscrowCancelled(MoveEscrowCancelledEvent {
                escrow_id: *id,
                refund_amount: refund,
            }));
        info!("[SUI] Escrow {} cancelled, refunded {}", id, refund);
        Ok(refund)
    }

    pub fn emergency_refund(&mut self, ctx: &TxContext, id: &ObjectId) -> EscrowResult<u64> {
        if !self.config.is_admin(&ctx.sender) {
            return Err(EscrowError::NotAuthorized);
        }
        let escrow = self.borrow(id)?;
        if escrow.status.is_terminal() {
            return Err(EscrowError::invalid_state(format!("escrow {} is {}", id, escrow.status)));
        }

        let (refund, client) = (escrow.balance, escrow.client);
        let events = self.close_with_refund(id, EscrowStatus::Refunded, ctx.timestamp_ms)?;
        self.transfer(client, refund);
        if let Some(dispute) = self.borrow_mut(id)?.dispute.as_mut() {
            dispute.close();
        }
        self.events.extend(events);
        self.events
            .push(SuiEscrowEvent::EscrowRefunded(MoveEscrowRefundedEvent {
                escrow_id: *id,
                amount: refund,
            }));
        info!("[SUI] Emergency refund of escrow {}: {}", id, refund);
        Ok(refund)
    }

    fn close_with_refund(
        &mut self,
        id: &ObjectId,
        closing: EscrowStatus,
        now_ms: u64,
    ) -> EscrowResult<Vec<SuiEscrowEvent>> {
        let escrow = self.borrow_mut(id)?;
        let mut events = vec![];
        for (idx, milestone) in escrow.milestones.iter_mut().enumerate() {
            if !milestone.status.is_terminal() {
                milestone.status = MilestoneStatus::Refunded;
                events.push(SuiEscrowEvent::MilestoneRefunded(MoveMilestoneRefundedEvent {
                    escrow_id: *id,
                    milestone_index: idx as u64,
                    amount: milestone.amount,
                }));
            }
        }
        escrow.balance = 0;
        escrow.status = closing;
        escrow.updated_at_ms = now_ms;
        Ok(events)
    }

    pub fn initiate_bridge_transfer(
        &mut self,
        ctx: &TxContext,
        payment: u64,
        recipient: &str,
        amount: u64,
    ) -> EscrowResult<TransferId> {
        let out = self.bridge.initiate(
            ctx.sender,
            recipient,
            amount as u128,
            payment as u128,
            ctx.timestamp_ms,
        )?;
        self.transfer(ctx.sender, out.excess as u64);
        self.events.push(SuiEscrowEvent::BridgeTransferInitiated(
            MoveBridgeTransferInitiatedEvent {
                transfer_id: out.transfer_id.0.to_vec(),
                sender: ctx.sender,
                recipient: recipient.to_string(),
                amount,
                timestamp_ms: ctx.timestamp_ms,
                nonce: out.nonce,
            },
        ));
        Ok(out.transfer_id)
    }

    pub fn confirm_bridge_transfer(
        &mut self,
        ctx: &TxContext,
        transfer_id: &TransferId,
    ) -> EscrowResult<u32> {
        let out = self
            .bridge
            .confirm(&self.config, &ctx.sender, transfer_id, ctx.timestamp_ms)?;
        self.events.push(SuiEscrowEvent::BridgeTransferConfirmed(
            MoveBridgeTransferConfirmedEvent {
                transfer_id: transfer_id.0.to_vec(),
                relayer: ctx.sender,
                confirmations: out.confirmations as u64,
            },
        ));
        if out.executed {
            if let Some(transfer) = self.bridge.get(transfer_id) {
                self.events.push(SuiEscrowEvent::BridgeTransferExecuted(
                    MoveBridgeTransferExecutedEvent {
                        transfer_id: transfer_id.0.to_vec(),
                        recipient: transfer.recipient.clone(),
                        amount: transfer.amount as u64,
                    },
                ));
            }
        }
        Ok(out.confirmations)
    }

    pub fn refund_bridge_transfer(
        &mut self,
        ctx: &TxContext,
        transfer_id: &TransferId,
    ) -> EscrowResult<u64> {
        let out = self
            .bridge
            .refund(transfer_id, self.config.refund_timeout, ctx.timestamp_ms)?;
        let amount = out.amount as u64;
        self.transfer(out.sender, amount);
        self.events.push(SuiEscrowEvent::BridgeTransferRefunded(
            MoveBridgeTransferRefundedEvent {
                transfer_id: transfer_id.0.to_vec(),
                sender: out.sender,
                amount,
            },
        ));
        Ok(amount)
    }

    pub fn mark_bridge_transfer_failed(
        &mut self,
        ctx: &TxContext,
        transfer_id: &TransferId,
        reason: &str,
    ) -> EscrowResult<()> {
        self.bridge
            .mark_failed(&self.config, &ctx.sender, transfer_id, reason)?;
        self.events.push(SuiEscrowEvent::BridgeTransferFailed(
            MoveBridgeTransferFailedEvent {
                transfer_id: transfer_id.0.to_vec(),
                reason: reason.to_string(),
            },
        ));
        Ok(())
    }
}

// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Bridge transfer lifecycle
//!
//! Tracks value locked on the source chain until either a quorum of relayers
//! confirms delivery (execution) or the refund path opens (timeout or an
//! admin failure mark). Execution and refund are mutually exclusive.

use crate::config::DeploymentConfig;
use crate::error::{EscrowError, EscrowResult};
use escrow_types::{BridgeTransferStatus, TransferId};
use ethers::types::U256;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::marker::PhantomData;
use tracing::{debug, info};

/// Chain-specific parts of the bridge: address type and transfer-ID scheme
pub trait BridgeChain {
    type Address: Clone + Ord + fmt::Debug;

    fn transfer_id(recipient: &str, amount: u128, timestamp: u64, nonce: u64) -> TransferId;
}

/// EVM flavour: keccak over packed words, second timestamps
pub struct EvmBridge;

impl BridgeChain for EvmBridge {
    type Address = ethers::types::Address;

    fn transfer_id(recipient: &str, amount: u128, timestamp: u64, nonce: u64) -> TransferId {
        TransferId::evm(recipient, U256::from(amount), timestamp, nonce)
    }
}

/// Sui flavour: keccak over BCS, millisecond timestamps
pub struct SuiBridge;

impl BridgeChain for SuiBridge {
    type Address = crate::sui::SuiAddress;

    fn transfer_id(recipient: &str, amount: u128, timestamp: u64, nonce: u64) -> TransferId {
        // Sui amounts enter the tracker from u64 coins
        TransferId::sui(recipient, amount as u64, timestamp, nonce)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeTransfer<A> {
    pub id: TransferId,
    /// Recorded at initiation; refunds always go here
    pub sender: A,
    pub recipient: String,
    pub amount: u128,
    pub nonce: u64,
    pub initiated_at: u64,
    pub status: BridgeTransferStatus,
    pub confirmed_by: BTreeSet<A>,
    /// Set together with the Completed status, never cleared
    pub executed: bool,
    pub completed_at: Option<u64>,
    pub failure_reason: Option<String>,
}

impl<A> BridgeTransfer<A> {
    pub fn confirmations(&self) -> u32 {
        self.confirmed_by.len() as u32
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitiateOutcome {
    pub transfer_id: TransferId,
    pub nonce: u64,
    /// Attached value above the amount, returned to the caller
    pub excess: u128,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmOutcome {
    pub confirmations: u32,
    pub executed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefundOutcome<A> {
    pub sender: A,
    pub amount: u128,
}

pub struct BridgeTransferTracker<C: BridgeChain> {
    transfers: BTreeMap<TransferId, BridgeTransfer<C::Address>>,
    next_nonce: u64,
    /// Value held for transfers that are neither executed nor refunded
    locked: u128,
    _chain: PhantomData<C>,
}

impl<C: BridgeChain> Default for BridgeTransferTracker<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: BridgeChain> BridgeTransferTracker<C> {
    pub fn new() -> Self {
        Self {
            transfers: BTreeMap::new(),
            next_nonce: 0,
            locked: 0,
            _chain: PhantomData,
        }
    }

    pub fn get(&self, id: &TransferId) -> Option<&BridgeTransfer<C::Address>> {
        self.transfers.get(id)
    }

    pub fn locked_liquidity(&self) -> u128 {
        self.locked
    }

    pub fn len(&self) -> usize {
        self.transfers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transfers.is_empty()
    }

    /// Locks `amount` for delivery to `recipient` on the other chain
    pub fn initiate(
        &mut self,
        sender: C::Address,
        recipient: &str,
        amount: u128,
        attached: u128,
        now: u64,
    ) -> EscrowResult<InitiateOutcome> {
        if recipient.trim().is_empty() {
            return Err(EscrowError::InvalidRecipient);
        }
        if amount == 0 {
            return Err(EscrowError::InvalidAmount("bridge amount must be positive".into()));
        }
        if attached < amount {
            return Err(EscrowError::InvalidAmount(format!(
                "attached value {} below transfer amount {}",
                attached, amount
            )));
        }
        let nonce = self.next_nonce;
        let id = C::transfer_id(recipient, amount, now, nonce);
        if self.transfers.contains_key(&id) {
            return Err(EscrowError::invalid_state(format!(
                "transfer {} already exists",
                id
            )));
        }

        self.next_nonce += 1;
        self.locked += amount;
        self.transfers.insert(
            id,
            BridgeTransfer {
                id,
                sender,
                recipient: recipient.to_string(),
                amount,
                nonce,
                initiated_at: now,
                status: BridgeTransferStatus::Initiated,
                confirmed_by: BTreeSet::new(),
                executed: false,
                completed_at: None,
                failure_reason: None,
            },
        );
        info!("[Bridge] Initiated transfer {} amount={} nonce={}", id, amount, nonce);
        Ok(InitiateOutcome {
            transfer_id: id,
            nonce,
            excess: attached - amount,
        })
    }

    /// Records a relayer confirmation and executes at the threshold
    pub fn confirm(
        &mut self,
        config: &DeploymentConfig<C::Address>,
        relayer: &C::Address,
        id: &TransferId,
        now: u64,
    ) -> EscrowResult<ConfirmOutcome> {
        if !config.is_relayer(relayer) {
            return Err(EscrowError::NotAuthorized);
        }
        let transfer = self
            .transfers
            .get_mut(id)
            .ok_or_else(|| EscrowError::NotFound(format!("transfer {}", id)))?;
        if transfer.confirmed_by.contains(relayer) {
            return Err(EscrowError::AlreadyConfirmed);
        }
        if !transfer.status.accepts_confirmations() {
            return Err(EscrowError::AlreadyFinal);
        }

        transfer.confirmed_by.insert(relayer.clone());
        transfer.status = BridgeTransferStatus::Confirming;
        let confirmations = transfer.confirmations();
        debug!(
            "[Bridge] Transfer {} confirmation {}/{}",
            id, confirmations, config.required_confirmations
        );

        let mut executed = false;
        if confirmations >= config.required_confirmations && !transfer.executed {
            transfer.executed = true;
            transfer.status = BridgeTransferStatus::Completed;
            transfer.completed_at = Some(now);
            self.locked -= transfer.amount;
            executed = true;
            info!("[Bridge] Transfer {} executed after {} confirmations", id, confirmations);
        }
        Ok(ConfirmOutcome {
            confirmations,
            executed,
        })
    }

    /// Returns the locked amount to the recorded sender
    pub fn refund(
        &mut self,
        id: &TransferId,
        refund_timeout: u64,
        now: u64,
    ) -> EscrowResult<RefundOutcome<C::Address>> {
        let transfer = self
            .transfers
            .get_mut(id)
            .ok_or_else(|| EscrowError::NotFound(format!("transfer {}", id)))?;
        if transfer.executed || transfer.status.is_final() {
            return Err(EscrowError::AlreadyFinal);
        }
        let timed_out = now > transfer.initiated_at.saturating_add(refund_timeout);
        if !timed_out && transfer.status != BridgeTransferStatus::Failed {
            return Err(EscrowError::NotTimedOut);
        }
        if self.locked < transfer.amount {
            return Err(EscrowError::InsufficientLiquidity);
        }

        self.locked -= transfer.amount;
        transfer.status = BridgeTransferStatus::Refunded;
        transfer.completed_at = Some(now);
        info!("[Bridge] Transfer {} refunded amount={}", id, transfer.amount);
        Ok(RefundOutcome {
            sender: transfer.sender.clone(),
            amount: transfer.amount,
        })
    }

    /// Admin-only failure mark; the transfer becomes refundable immediately
    pub fn mark_failed(
        &mut self,
        config: &DeploymentConfig<C::Address>,
        caller: &C::Address,
        id: &TransferId,
        reason: &str,
    ) -> EscrowResult<()> {
        if !config.is_admin(caller) {
            return Err(EscrowError::NotAuthorized);
        }
        let transfer = self
            .transfers
            .get_mut(id)
            .ok_or_else(|| EscrowError::NotFound(format!("transfer {}", id)))?;
        if !transfer.status.accepts_confirmations() {
            return Err(EscrowError::AlreadyFinal);
        }
        transfer.status = BridgeTransferStatus::Failed;
        transfer.failure_reason = Some(reason.to_string());
        info!("[Bridge] Transfer {} marked failed: {}", id, reason);
        Ok(())
    }
}

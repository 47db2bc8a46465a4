// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Mirror rows. Amounts are minor units; timestamps are unix milliseconds.

use escrow_types::{
    BridgeTransferStatus, ChainKind, DisputeOutcome, EscrowStatus, MilestoneStatus, TransferId,
    DEFAULT_REQUIRED_CONFIRMATIONS,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowRecord {
    pub id: Uuid,
    pub chain: ChainKind,
    /// Decimal `uint256` on EVM, object ID hex on Sui; `None` until observed
    pub chain_escrow_id: Option<String>,
    pub creation_tx_hash: Option<String>,
    pub client: String,
    pub freelancer: Option<String>,
    pub title: String,
    pub description: String,
    pub token_symbol: String,
    pub total_amount: u128,
    /// Last known on-chain balance
    pub balance: u128,
    pub is_cross_chain: bool,
    pub cross_chain_recipient: Option<String>,
    pub status: EscrowStatus,
    pub milestones: Vec<MilestoneRecord>,
    pub dispute: Option<DisputeRecord>,
    pub created_at_ms: u64,
    pub updated_at_ms: u64,
}

impl EscrowRecord {
    /// A pending row for an escrow whose creation transaction was just
    /// submitted. The indexer pins the chain ID when it sees the event.
    pub fn pending(
        chain: ChainKind,
        creation_tx_hash: impl Into<String>,
        client: impl Into<String>,
        milestones: Vec<MilestoneRecord>,
        now_ms: u64,
    ) -> Self {
        let total: u128 = milestones.iter().map(|m| m.amount).sum();
        Self {
            id: Uuid::new_v4(),
            chain,
            chain_escrow_id: None,
            creation_tx_hash: Some(creation_tx_hash.into()),
            client: client.into(),
            freelancer: None,
            title: String::new(),
            description: String::new(),
            token_symbol: String::new(),
            total_amount: total,
            balance: total,
            is_cross_chain: false,
            cross_chain_recipient: None,
            status: EscrowStatus::Active,
            milestones,
            dispute: None,
            created_at_ms: now_ms,
            updated_at_ms: now_ms,
        }
    }

    pub fn milestone(&self, index: u32) -> Option<&MilestoneRecord> {
        self.milestones.get(index as usize)
    }

    pub fn open_dispute(&self) -> Option<&DisputeRecord> {
        self.dispute.as_ref().filter(|d| !d.resolved)
    }

    pub fn milestone_total(&self) -> u128 {
        self.milestones.iter().map(|m| m.amount).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MilestoneRecord {
    pub index: u32,
    pub description: String,
    pub amount: u128,
    pub deadline_ms: Option<u64>,
    pub status: MilestoneStatus,
    pub submission_note: Option<String>,
    pub submitted_at_ms: Option<u64>,
    pub approved_at_ms: Option<u64>,
    pub released_at_ms: Option<u64>,
    pub release_tx_hash: Option<String>,
    pub bridge_transfer_id: Option<TransferId>,
}

impl MilestoneRecord {
    pub fn new(index: u32, description: impl Into<String>, amount: u128) -> Self {
        Self {
            index,
            description: description.into(),
            amount,
            deadline_ms: None,
            status: MilestoneStatus::Pending,
            submission_note: None,
            submitted_at_ms: None,
            approved_at_ms: None,
            released_at_ms: None,
            release_tx_hash: None,
            bridge_transfer_id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisputeRecord {
    pub initiator: String,
    pub reason: String,
    pub milestone_index: u32,
    pub votes_for_client: u32,
    pub votes_for_freelancer: u32,
    pub voters: BTreeSet<String>,
    pub resolved: bool,
    pub outcome: Option<DisputeOutcome>,
    pub opened_at_ms: u64,
}

impl DisputeRecord {
    pub fn open(
        initiator: impl Into<String>,
        milestone_index: u32,
        reason: impl Into<String>,
        opened_at_ms: u64,
    ) -> Self {
        Self {
            initiator: initiator.into(),
            reason: reason.into(),
            milestone_index,
            votes_for_client: 0,
            votes_for_freelancer: 0,
            voters: BTreeSet::new(),
            resolved: false,
            outcome: None,
            opened_at_ms,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeTransferRecord {
    pub transfer_id: TransferId,
    pub source_chain: ChainKind,
    pub destination_chain: ChainKind,
    pub sender: String,
    pub recipient: String,
    pub amount: u128,
    pub token_symbol: String,
    pub status: BridgeTransferStatus,
    pub confirmations: u32,
    pub confirmed_by: BTreeSet<String>,
    pub required_confirmations: u32,
    pub source_tx_hash: Option<String>,
    pub destination_tx_hash: Option<String>,
    pub initiated_at_ms: u64,
    pub completed_at_ms: Option<u64>,
    pub failure_reason: Option<String>,
    /// Escrow milestone whose release opened this transfer
    pub escrow_id: Option<Uuid>,
    pub milestone_index: Option<u32>,
}

impl BridgeTransferRecord {
    pub fn initiated(
        transfer_id: TransferId,
        source_chain: ChainKind,
        sender: impl Into<String>,
        recipient: impl Into<String>,
        amount: u128,
        initiated_at_ms: u64,
    ) -> Self {
        Self {
            transfer_id,
            source_chain,
            destination_chain: source_chain.counterpart(),
            sender: sender.into(),
            recipient: recipient.into(),
            amount,
            token_symbol: String::new(),
            status: BridgeTransferStatus::Initiated,
            confirmations: 0,
            confirmed_by: BTreeSet::new(),
            required_confirmations: DEFAULT_REQUIRED_CONFIRMATIONS,
            source_tx_hash: None,
            destination_tx_hash: None,
            initiated_at_ms,
            completed_at_ms: None,
            failure_reason: None,
            escrow_id: None,
            milestone_index: None,
        }
    }
}

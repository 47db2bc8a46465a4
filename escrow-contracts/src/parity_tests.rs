// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! The same scenarios driven against both deployments; each must land in
//! the same observable state.

use crate::config::DeploymentConfig;
use crate::error::{EscrowError, EscrowResult};
use crate::evm::{CreateEscrowParams, EvmEscrowContract};
use crate::local_chain::{LocalEvmChain, LocalSuiChain};
use crate::sui::{CreateEscrowArgs, ObjectId, SuiAddress, SuiEscrowModule};
use escrow_types::{
    BridgeTransferStatus, DisputeOutcome, EscrowStatus, MilestoneStatus, TransferId,
};
use ethers::types::{Address, U256};

#[derive(Debug, Clone, Copy)]
enum Who {
    Client,
    Freelancer,
    Admin,
    Treasury,
    Arbiter(u8),
    Relayer(u8),
    Stranger,
}

impl Who {
    fn byte(self) -> u8 {
        match self {
            Who::Client => 0xc1,
            Who::Freelancer => 0xf1,
            Who::Admin => 0xad,
            Who::Treasury => 0x7e,
            Who::Arbiter(i) => 0xa0 + i,
            Who::Relayer(i) => 0xb0 + i,
            Who::Stranger => 0x55,
        }
    }
}

fn config<A>(addr: impl Fn(u8) -> A, fee_bps: u16, refund_timeout: u64) -> DeploymentConfig<A> {
    DeploymentConfig {
        admin: addr(Who::Admin.byte()),
        treasury: addr(Who::Treasury.byte()),
        fee_bps,
        arbiters: (1..=3).map(|i| addr(Who::Arbiter(i).byte())).collect(),
        relayers: (1..=3).map(|i| addr(Who::Relayer(i).byte())).collect(),
        required_confirmations: 2,
        refund_timeout,
    }
}

trait Harness {
    type Id: Clone;

    fn with_fee(fee_bps: u16) -> Self;
    fn create(&self, payment: u128, amounts: &[u128], cross_chain: Option<&str>) -> EscrowResult<Self::Id>;
    fn start(&self, who: Who, id: &Self::Id, index: u64) -> EscrowResult<()>;
    fn submit(&self, who: Who, id: &Self::Id, index: u64) -> EscrowResult<()>;
    fn approve(&self, who: Who, id: &Self::Id, index: u64) -> EscrowResult<()>;
    fn release(&self, who: Who, id: &Self::Id, index: u64) -> EscrowResult<()>;
    fn dispute(&self, who: Who, id: &Self::Id, index: u64) -> EscrowResult<()>;
    fn vote(&self, who: Who, id: &Self::Id, for_client: bool) -> EscrowResult<Option<DisputeOutcome>>;
    fn escrow_status(&self, id: &Self::Id) -> EscrowStatus;
    fn milestone_status(&self, id: &Self::Id, index: usize) -> MilestoneStatus;
    fn milestone_bridge_id(&self, id: &Self::Id, index: usize) -> Option<TransferId>;
    fn balance(&self, id: &Self::Id) -> u128;
    fn payout(&self, who: Who) -> u128;
    fn bridge_initiate(&self, who: Who, payment: u128, recipient: &str, amount: u128) -> EscrowResult<TransferId>;
    fn bridge_confirm(&self, who: Who, id: &TransferId) -> EscrowResult<u32>;
    fn bridge_refund(&self, who: Who, id: &TransferId) -> EscrowResult<u128>;
    fn bridge_status(&self, id: &TransferId) -> Option<BridgeTransferStatus>;
    fn advance_hours(&self, hours: u64);

    fn drive_to_approved(&self, id: &Self::Id, index: u64) {
        self.start(Who::Freelancer, id, index).unwrap();
        self.submit(Who::Freelancer, id, index).unwrap();
        self.approve(Who::Client, id, index).unwrap();
    }
}

struct Evm(LocalEvmChain);

impl Evm {
    fn call<R>(
        &self,
        who: Who,
        value: u128,
        f: impl FnOnce(&mut EvmEscrowContract, &crate::evm::CallContext) -> EscrowResult<R>,
    ) -> EscrowResult<R> {
        self.0
            .execute(Address::repeat_byte(who.byte()), U256::from(value), f)
            .map(|r| r.output)
    }
}

impl Harness for Evm {
    type Id = U256;

    fn with_fee(fee_bps: u16) -> Self {
        let contract =
            EvmEscrowContract::new(Address::repeat_byte(0xee), config(Address::repeat_byte, fee_bps, 86_400))
                .unwrap();
        Evm(LocalEvmChain::new(contract, 1_700_000_000))
    }

    fn create(&self, payment: u128, amounts: &[u128], cross_chain: Option<&str>) -> EscrowResult<U256> {
        let params = CreateEscrowParams {
            freelancer: Address::repeat_byte(Who::Freelancer.byte()),
            title: "site".into(),
            token_symbol: "ETH".into(),
            milestone_amounts: amounts.iter().map(|a| U256::from(*a)).collect(),
            milestone_descriptions: amounts.iter().map(|_| "work".to_string()).collect(),
            cross_chain_recipient: cross_chain.map(str::to_string),
            ..Default::default()
        };
        self.call(Who::Client, payment, |c, ctx| c.create_escrow(ctx, params))
            .map(|created| created.escrow_id)
    }

    fn start(&self, who: Who, id: &U256, index: u64) -> EscrowResult<()> {
        self.call(who, 0, |c, ctx| c.start_milestone(ctx, *id, index))
    }

    fn submit(&self, who: Who, id: &U256, index: u64) -> EscrowResult<()> {
        self.call(who, 0, |c, ctx| c.submit_milestone(ctx, *id, index, "done"))
    }

    fn approve(&self, who: Who, id: &U256, index: u64) -> EscrowResult<()> {
        self.call(who, 0, |c, ctx| c.approve_milestone(ctx, *id, index))
    }

    fn release(&self, who: Who, id: &U256, index: u64) -> EscrowResult<()> {
        self.call(who, 0, |c, ctx| c.release_milestone(ctx, *id, index))
    }

    fn dispute(&self, who: Who, id: &U256, index: u64) -> EscrowResult<()> {
        self.call(who, 0, |c, ctx| c.initiate_dispute(ctx, *id, index, "late"))
    }

    fn vote(&self, who: Who, id: &U256, for_client: bool) -> EscrowResult<Option<DisputeOutcome>> {
        self.call(who, 0, |c, ctx| c.vote_on_dispute(ctx, *id, for_client))
    }

    fn escrow_status(&self, id: &U256) -> EscrowStatus {
        self.0.read(|c| c.escrow(*id).map(|e| e.status)).unwrap()
    }

    fn milestone_status(&self, id: &U256, index: usize) -> MilestoneStatus {
        self.0
            .read(|c| c.escrow(*id).map(|e| e.milestones[index].status))
            .unwrap()
    }

    fn milestone_bridge_id(&self, id: &U256, index: usize) -> Option<TransferId> {
        self.0
            .read(|c| c.escrow(*id).and_then(|e| e.milestones[index].bridge_transfer_id))
    }

    fn balance(&self, id: &U256) -> u128 {
        self.0.read(|c| c.escrow(*id).map(|e| e.balance.as_u128())).unwrap()
    }

    fn payout(&self, who: Who) -> u128 {
        self.0
            .read(|c| c.payout(Address::repeat_byte(who.byte())))
            .as_u128()
    }

    fn bridge_initiate(&self, who: Who, payment: u128, recipient: &str, amount: u128) -> EscrowResult<TransferId> {
        self.call(who, payment, |c, ctx| {
            c.initiate_bridge_transfer(ctx, recipient, U256::from(amount))
        })
    }

    fn bridge_confirm(&self, who: Who, id: &TransferId) -> EscrowResult<u32> {
        self.call(who, 0, |c, ctx| c.confirm_bridge_transfer(ctx, id))
    }

    fn bridge_refund(&self, who: Who, id: &TransferId) -> EscrowResult<u128> {
        self.call(who, 0, |c, ctx| c.refund_bridge_transfer(ctx, id))
            .map(|a| a.as_u128())
    }

    fn bridge_status(&self, id: &TransferId) -> Option<BridgeTransferStatus> {
        self.0.read(|c| c.bridge_transfer(id).map(|t| t.status))
    }

    fn advance_hours(&self, hours: u64) {
        self.0.advance_time(hours * 3600);
    }
}

struct Sui(LocalSuiChain);

impl Sui {
    fn call<R>(
        &self,
        who: Who,
        f: impl FnOnce(&mut SuiEscrowModule, &crate::sui::TxContext) -> EscrowResult<R>,
    ) -> EscrowResult<R> {
        self.0
            .execute(SuiAddress::repeat_byte(who.byte()), f)
            .map(|r| r.output)
    }
}

impl Harness for Sui {
    type Id = ObjectId;

    fn with_fee(fee_bps: u16) -> Self {
        let module = SuiEscrowModule::new(
            ObjectId::repeat_byte(0x0a),
            config(SuiAddress::repeat_byte, fee_bps, 86_400_000),
        )
        .unwrap();
        Sui(LocalSuiChain::new(module, 1_700_000_000_000))
    }

    fn create(&self, payment: u128, amounts: &[u128], cross_chain: Option<&str>) -> EscrowResult<ObjectId> {
        let args = CreateEscrowArgs {
            freelancer: SuiAddress::repeat_byte(Who::Freelancer.byte()),
            title: "site".into(),
            token_symbol: "SUI".into(),
            milestone_amounts: amounts.iter().map(|a| *a as u64).collect(),
            milestone_descriptions: amounts.iter().map(|_| "work".to_string()).collect(),
            cross_chain_recipient: cross_chain.map(str::to_string),
            ..Default::default()
        };
        self.call(Who::Client, |m, ctx| m.create_escrow(ctx, payment as u64, args))
            .map(|created| created.escrow_id)
    }

    fn start(&self, who: Who, id: &ObjectId, index: u64) -> EscrowResult<()> {
        self.call(who, |m, ctx| m.start_milestone(ctx, id, index))
    }

    fn submit(&self, who: Who, id: &ObjectId, index: u64) -> EscrowResult<()> {
        self.call(who, |m, ctx| m.submit_milestone(ctx, id, index, "done"))
    }

    fn approve(&self, who: Who, id: &ObjectId, index: u64) -> EscrowResult<()> {
        self.call(who, |m, ctx| m.approve_milestone(ctx, id, index))
    }

    fn release(&self, who: Who, id: &ObjectId, index: u64) -> EscrowResult<()> {
        self.call(who, |m, ctx| m.release_milestone(ctx, id, index))
    }

    fn dispute(&self, who: Who, id: &ObjectId, index: u64) -> EscrowResult<()> {
        self.call(who, |m, ctx| m.initiate_dispute(ctx, id, index, "late"))
    }

    fn vote(&self, who: Who, id: &ObjectId, for_client: bool) -> EscrowResult<Option<DisputeOutcome>> {
        self.call(who, |m, ctx| m.vote_on_dispute(ctx, id, for_client))
    }

    fn escrow_status(&self, id: &ObjectId) -> EscrowStatus {
        self.0.read(|m| m.escrow(id).map(|e| e.status)).unwrap()
    }

    fn milestone_status(&self, id: &ObjectId, index: usize) -> MilestoneStatus {
        self.0
            .read(|m| m.escrow(id).map(|e| e.milestones[index].status))
            .unwrap()
    }

    fn milestone_bridge_id(&self, id: &ObjectId, index: usize) -> Option<TransferId> {
        self.0
            .read(|m| m.escrow(id).and_then(|e| e.milestones[index].bridge_transfer_id))
    }

    fn balance(&self, id: &ObjectId) -> u128 {
        self.0.read(|m| m.escrow(id).map(|e| e.balance as u128)).unwrap()
    }

    fn payout(&self, who: Who) -> u128 {
        self.0
            .read(|m| m.payout(&SuiAddress::repeat_byte(who.byte()))) as u128
    }

    fn bridge_initiate(&self, who: Who, payment: u128, recipient: &str, amount: u128) -> EscrowResult<TransferId> {
        self.call(who, |m, ctx| {
            m.initiate_bridge_transfer(ctx, payment as u64, recipient, amount as u64)
        })
    }

    fn bridge_confirm(&self, who: Who, id: &TransferId) -> EscrowResult<u32> {
        self.call(who, |m, ctx| m.confirm_bridge_transfer(ctx, id))
    }

    fn bridge_refund(&self, who: Who, id: &TransferId) -> EscrowResult<u128> {
        self.call(who, |m, ctx| m.refund_bridge_transfer(ctx, id))
            .map(|a| a as u128)
    }

    fn bridge_status(&self, id: &TransferId) -> Option<BridgeTransferStatus> {
        self.0.read(|m| m.bridge_transfer(id).map(|t| t.status))
    }

    fn advance_hours(&self, hours: u64) {
        self.0.advance_clock(hours * 3_600_000);
    }
}

fn funding_and_overpay<H: Harness>() {
    let h = H::with_fee(100);
    let id = h.create(10_000, &[3000, 4000, 3000], None).unwrap();
    assert_eq!(h.balance(&id), 10_000);
    assert_eq!(h.escrow_status(&id), EscrowStatus::Active);
    assert_eq!(h.payout(Who::Client), 0);

    let over = h.create(12_000, &[3000, 4000, 3000], None).unwrap();
    assert_eq!(h.balance(&over), 10_000);
    assert_eq!(h.payout(Who::Client), 2000);

    assert!(matches!(
        h.create(9_999, &[3000, 4000, 3000], None),
        Err(EscrowError::InvalidAmount(_))
    ));
    assert!(matches!(
        h.create(100, &[], None),
        Err(EscrowError::InvalidMilestoneSet(_))
    ));
}

fn release_with_fee<H: Harness>() {
    let h = H::with_fee(100);
    let id = h.create(3000, &[3000], None).unwrap();
    h.start(Who::Freelancer, &id, 0).unwrap();
    h.submit(Who::Freelancer, &id, 0).unwrap();
    assert!(matches!(
        h.approve(Who::Freelancer, &id, 0),
        Err(EscrowError::NotAuthorized)
    ));
    h.approve(Who::Client, &id, 0).unwrap();
    assert!(matches!(
        h.release(Who::Stranger, &id, 0),
        Err(EscrowError::NotAuthorized)
    ));
    h.release(Who::Client, &id, 0).unwrap();
    assert_eq!(h.payout(Who::Freelancer), 2970);
    assert_eq!(h.payout(Who::Treasury), 30);
    assert_eq!(h.balance(&id), 0);
    assert_eq!(h.milestone_status(&id, 0), MilestoneStatus::Released);
    assert_eq!(h.escrow_status(&id), EscrowStatus::Completed);
    assert!(matches!(
        h.release(Who::Client, &id, 0),
        Err(EscrowError::InvalidState(_))
    ));
}

fn open_dispute_on_second<H: Harness>(h: &H, cross_chain: Option<&str>) -> H::Id {
    let id = h.create(10_000, &[3000, 4000, 3000], cross_chain).unwrap();
    h.start(Who::Freelancer, &id, 1).unwrap();
    h.submit(Who::Freelancer, &id, 1).unwrap();
    h.dispute(Who::Client, &id, 1).unwrap();
    assert_eq!(h.escrow_status(&id), EscrowStatus::Disputed);
    assert_eq!(h.milestone_status(&id, 1), MilestoneStatus::Disputed);
    id
}

fn dispute_majority_for_client<H: Harness>() {
    let h = H::with_fee(100);
    let id = open_dispute_on_second(&h, None);
    assert!(matches!(
        h.dispute(Who::Freelancer, &id, 1),
        Err(EscrowError::DisputeExists)
    ));

    assert!(matches!(
        h.vote(Who::Stranger, &id, true),
        Err(EscrowError::NotAuthorized)
    ));
    assert_eq!(h.vote(Who::Arbiter(1), &id, true).unwrap(), None);
    assert!(matches!(
        h.vote(Who::Arbiter(1), &id, true),
        Err(EscrowError::AlreadyVoted)
    ));
    assert_eq!(h.vote(Who::Arbiter(2), &id, true).unwrap(), None);
    assert_eq!(
        h.vote(Who::Arbiter(3), &id, false).unwrap(),
        Some(DisputeOutcome::Client)
    );

    assert_eq!(h.milestone_status(&id, 1), MilestoneStatus::Refunded);
    assert_eq!(h.escrow_status(&id), EscrowStatus::Active);
    assert_eq!(h.payout(Who::Client), 4000);
    assert_eq!(h.payout(Who::Freelancer), 0);
    assert_eq!(h.payout(Who::Treasury), 0);
    assert_eq!(h.balance(&id), 6000);
    assert_eq!(h.milestone_status(&id, 0), MilestoneStatus::Pending);
    assert_eq!(h.milestone_status(&id, 2), MilestoneStatus::Pending);
}

fn dispute_majority_for_freelancer<H: Harness>() {
    let h = H::with_fee(100);
    let id = open_dispute_on_second(&h, None);
    assert_eq!(h.vote(Who::Arbiter(1), &id, false).unwrap(), None);
    assert_eq!(h.vote(Who::Arbiter(2), &id, true).unwrap(), None);
    assert_eq!(
        h.vote(Who::Arbiter(3), &id, false).unwrap(),
        Some(DisputeOutcome::Freelancer)
    );

    assert_eq!(h.milestone_status(&id, 1), MilestoneStatus::Released);
    assert_eq!(h.escrow_status(&id), EscrowStatus::Active);
    assert_eq!(h.payout(Who::Freelancer), 3960);
    assert_eq!(h.payout(Who::Treasury), 40);
    assert_eq!(h.payout(Who::Client), 0);
    assert_eq!(h.balance(&id), 6000);
    assert!(h.milestone_bridge_id(&id, 1).is_none());
    assert!(matches!(
        h.vote(Who::Arbiter(2), &id, true),
        Err(EscrowError::InvalidState(_))
    ));
}

fn dispute_for_freelancer_bridges_cross_chain<H: Harness>() {
    let h = H::with_fee(100);
    let id = open_dispute_on_second(&h, Some("0xabc"));
    h.vote(Who::Arbiter(1), &id, false).unwrap();
    h.vote(Who::Arbiter(2), &id, false).unwrap();
    assert_eq!(
        h.vote(Who::Arbiter(3), &id, true).unwrap(),
        Some(DisputeOutcome::Freelancer)
    );

    assert_eq!(h.milestone_status(&id, 1), MilestoneStatus::Released);
    assert_eq!(h.payout(Who::Freelancer), 0);
    assert_eq!(h.payout(Who::Treasury), 40);
    assert_eq!(h.balance(&id), 6000);
    let transfer = h.milestone_bridge_id(&id, 1).unwrap();
    assert_eq!(h.bridge_status(&transfer), Some(BridgeTransferStatus::Initiated));

    // the bridged amount is the net payout
    h.advance_hours(25);
    assert_eq!(h.bridge_refund(Who::Stranger, &transfer).unwrap(), 3960);
    assert_eq!(h.payout(Who::Freelancer), 3960);
}

fn bridge_confirm_threshold<H: Harness>() {
    let h = H::with_fee(100);
    let id = h
        .bridge_initiate(Who::Stranger, 1000, "0xrecipient", 1000)
        .unwrap();
    assert_eq!(h.bridge_status(&id), Some(BridgeTransferStatus::Initiated));
    assert!(matches!(
        h.bridge_confirm(Who::Stranger, &id),
        Err(EscrowError::NotAuthorized)
    ));
    assert_eq!(h.bridge_confirm(Who::Relayer(1), &id).unwrap(), 1);
    assert_eq!(h.bridge_status(&id), Some(BridgeTransferStatus::Confirming));
    assert!(matches!(
        h.bridge_confirm(Who::Relayer(1), &id),
        Err(EscrowError::AlreadyConfirmed)
    ));
    assert_eq!(h.bridge_confirm(Who::Relayer(2), &id).unwrap(), 2);
    assert_eq!(h.bridge_status(&id), Some(BridgeTransferStatus::Completed));
    assert!(matches!(
        h.bridge_confirm(Who::Relayer(1), &id),
        Err(EscrowError::AlreadyConfirmed)
    ));
    assert!(matches!(
        h.bridge_confirm(Who::Relayer(3), &id),
        Err(EscrowError::AlreadyFinal)
    ));
    assert!(matches!(
        h.bridge_refund(Who::Stranger, &id),
        Err(EscrowError::AlreadyFinal)
    ));
}

fn bridge_refund_after_timeout<H: Harness>() {
    let h = H::with_fee(100);
    let id = h
        .bridge_initiate(Who::Client, 1000, "0xrecipient", 1000)
        .unwrap();
    h.bridge_confirm(Who::Relayer(1), &id).unwrap();
    assert!(matches!(
        h.bridge_refund(Who::Stranger, &id),
        Err(EscrowError::NotTimedOut)
    ));
    h.advance_hours(25);
    assert_eq!(h.bridge_refund(Who::Stranger, &id).unwrap(), 1000);
    assert_eq!(h.payout(Who::Client), 1000);
    assert_eq!(h.payout(Who::Stranger), 0);
    assert_eq!(h.bridge_status(&id), Some(BridgeTransferStatus::Refunded));
    assert!(matches!(
        h.bridge_confirm(Who::Relayer(2), &id),
        Err(EscrowError::AlreadyFinal)
    ));
}

fn cross_chain_release_opens_transfer<H: Harness>() {
    let h = H::with_fee(100);
    let id = h.create(3000, &[3000], Some("0xabc")).unwrap();
    h.drive_to_approved(&id, 0);
    h.release(Who::Client, &id, 0).unwrap();
    assert_eq!(h.payout(Who::Freelancer), 0);
    assert_eq!(h.payout(Who::Treasury), 30);
    let transfer = h.milestone_bridge_id(&id, 0).unwrap();
    assert_eq!(h.bridge_status(&transfer), Some(BridgeTransferStatus::Initiated));

    h.advance_hours(25);
    assert_eq!(h.bridge_refund(Who::Stranger, &transfer).unwrap(), 2970);
    assert_eq!(h.payout(Who::Freelancer), 2970);
}

macro_rules! parity {
    ($($name:ident),* $(,)?) => {
        mod evm {
            $(#[test] fn $name() { super::$name::<super::Evm>(); })*
        }
        mod sui {
            $(#[test] fn $name() { super::$name::<super::Sui>(); })*
        }
    };
}

parity!(
    funding_and_overpay,
    release_with_fee,
    dispute_majority_for_client,
    dispute_majority_for_freelancer,
    dispute_for_freelancer_bridges_cross_chain,
    bridge_confirm_threshold,
    bridge_refund_after_timeout,
    cross_chain_release_opens_transfer,
);

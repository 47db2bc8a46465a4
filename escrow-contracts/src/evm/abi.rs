// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! ABI layout of the escrow contract's events.
//!
//! `topic0` is `keccak256` of the event signature; correlation fields
//! (escrow ID, parties, transfer ID) are indexed and travel in the remaining
//! topics, everything else is ABI-encoded in the log data. Small integers
//! (indices, counters, timestamps) are `uint256` on the wire.

use escrow_types::EventKind;
use ethers::abi::{self, long_signature, ParamType, Token};
use ethers::types::{Address, Bytes, Log, H256, U256};

#[derive(Debug, thiserror::Error)]
pub enum AbiEventError {
    #[error("{event}: expected {expected} topics, got {actual}")]
    TopicCount {
        event: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("abi decode failed: {0}")]
    Abi(#[from] abi::Error),
    #[error("{0}: unexpected or missing token")]
    UnexpectedToken(&'static str),
    #[error("{0}: value out of range")]
    OutOfRange(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvmEscrowEvent {
    EscrowCreated {
        escrow_id: U256,
        client: Address,
        freelancer: Address,
        total_amount: U256,
        milestone_amounts: Vec<U256>,
        is_cross_chain: bool,
        cross_chain_recipient: String,
        token_symbol: String,
        title: String,
    },
    MilestoneStarted {
        escrow_id: U256,
        milestone_index: u64,
    },
    MilestoneSubmitted {
        escrow_id: U256,
        milestone_index: u64,
        note: String,
    },
    MilestoneApproved {
        escrow_id: U256,
        milestone_index: u64,
    },
    MilestoneReleased {
        escrow_id: U256,
        milestone_index: u64,
        recipient_amount: U256,
        fee: U256,
        /// All zeroes for a same-chain release
        bridge_transfer_id: [u8; 32],
    },
    MilestoneRefunded {
        escrow_id: U256,
        milestone_index: u64,
        amount: U256,
    },
    DisputeInitiated {
        escrow_id: U256,
        initiator: Address,
        milestone_index: u64,
        reason: String,
    },
    DisputeVoteCast {
        escrow_id: U256,
        arbiter: Address,
        milestone_index: u64,
        vote_for_client: bool,
        votes_for_client: u64,
        votes_for_freelancer: u64,
    },
    DisputeResolved {
        escrow_id: U256,
        milestone_index: u64,
        favour_client: bool,
        votes_for_client: u64,
        votes_for_freelancer: u64,
    },
    EscrowCompleted {
        escrow_id: U256,
    },
    EscrowCancelled {
        escrow_id: U256,
        refund_amount: U256,
    },
    EscrowRefunded {
        escrow_id: U256,
        amount: U256,
    },
    BridgeTransferInitiated {
        transfer_id: [u8; 32],
        sender: Address,
        recipient: String,
        amount: U256,
        timestamp: u64,
        nonce: u64,
    },
    BridgeTransferConfirmed {
        transfer_id: [u8; 32],
        relayer: Address,
        confirmations: u64,
    },
    BridgeTransferExecuted {
        transfer_id: [u8; 32],
        recipient: String,
        amount: U256,
    },
    BridgeTransferRefunded {
        transfer_id: [u8; 32],
        sender: Address,
        amount: U256,
    },
    BridgeTransferFailed {
        transfer_id: [u8; 32],
        reason: String,
    },
}

fn uint() -> ParamType {
    ParamType::Uint(256)
}

fn bytes32() -> ParamType {
    ParamType::FixedBytes(32)
}

/// (indexed params, data params) in declaration order
fn schema(kind: EventKind) -> (Vec<ParamType>, Vec<ParamType>) {
    use ParamType::{Address as Addr, Bool, String as Str};
    match kind {
        EventKind::EscrowCreated => (
            vec![uint(), Addr, Addr],
            vec![
                uint(),
                ParamType::Array(Box::new(uint())),
                Bool,
                Str,
                Str,
                Str,
            ],
        ),
        EventKind::MilestoneStarted | EventKind::MilestoneApproved => (vec![uint()], vec![uint()]),
        EventKind::MilestoneSubmitted => (vec![uint()], vec![uint(), Str]),
        EventKind::MilestoneReleased => (vec![uint()], vec![uint(), uint(), uint(), bytes32()]),
        EventKind::MilestoneRefunded => (vec![uint()], vec![uint(), uint()]),
        EventKind::DisputeInitiated => (vec![uint(), Addr], vec![uint(), Str]),
        EventKind::DisputeVoteCast => (vec![uint(), Addr], vec![uint(), Bool, uint(), uint()]),
        EventKind::DisputeResolved => (vec![uint()], vec![uint(), Bool, uint(), uint()]),
        EventKind::EscrowCompleted => (vec![uint()], vec![]),
        EventKind::EscrowCancelled | EventKind::EscrowRefunded => (vec![uint()], vec![uint()]),
        EventKind::BridgeTransferInitiated => {
            (vec![bytes32(), Addr], vec![Str, uint(), uint(), uint()])
        }
        EventKind::BridgeTransferConfirmed => (vec![bytes32(), Addr], vec![uint()]),
        EventKind::BridgeTransferExecuted => (vec![bytes32()], vec![Str, uint()]),
        EventKind::BridgeTransferRefunded => (vec![bytes32(), Addr], vec![uint()]),
        EventKind::BridgeTransferFailed => (vec![bytes32()], vec![Str]),
    }
}

/// `keccak256("Name(type,...)")` for an event kind
pub fn event_topic(kind: EventKind) -> H256 {
    let (mut params, data) = schema(kind);
    params.extend(data);
    long_signature(kind.name(), &params)
}

fn kind_for_topic(topic: &H256) -> Option<EventKind> {
    EventKind::ALL
        .iter()
        .copied()
        .find(|kind| &event_topic(*kind) == topic)
}

fn topic_from_u256(v: U256) -> H256 {
    let mut word = [0u8; 32];
    v.to_big_endian(&mut word);
    H256(word)
}

fn topic_from_address(a: Address) -> H256 {
    let mut word = [0u8; 32];
    word[12..].copy_from_slice(a.as_bytes());
    H256(word)
}

fn u256_from_topic(h: &H256) -> U256 {
    U256::from_big_endian(h.as_bytes())
}

fn address_from_topic(h: &H256) -> Address {
    Address::from_slice(&h.as_bytes()[12..])
}

impl EvmEscrowEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            EvmEscrowEvent::EscrowCreated { .. } => EventKind::EscrowCreated,
            EvmEscrowEvent::MilestoneStarted { .. } => EventKind::MilestoneStarted,
            EvmEscrowEvent::MilestoneSubmitted { .. } => EventKind::MilestoneSubmitted,
            EvmEscrowEvent::MilestoneApproved { .. } => EventKind::MilestoneApproved,
            EvmEscrowEvent::MilestoneReleased { .. } => EventKind::MilestoneReleased,
            EvmEscrowEvent::MilestoneRefunded { .. } => EventKind::MilestoneRefunded,
            EvmEscrowEvent::DisputeInitiated { .. } => EventKind::DisputeInitiated,
            EvmEscrowEvent::DisputeVoteCast { .. } => EventKind::DisputeVoteCast,
            EvmEscrowEvent::DisputeResolved { .. } => EventKind::DisputeResolved,
            EvmEscrowEvent::EscrowCompleted { .. } => EventKind::EscrowCompleted,
            EvmEscrowEvent::EscrowCancelled { .. } => EventKind::EscrowCancelled,
            EvmEscrowEvent::EscrowRefunded { .. } => EventKind::EscrowRefunded,
            EvmEscrowEvent::BridgeTransferInitiated { .. } => EventKind::BridgeTransferInitiated,
            EvmEscrowEvent::BridgeTransferConfirmed { .. } => EventKind::BridgeTransferConfirmed,
            EvmEscrowEvent::BridgeTransferExecuted { .. } => EventKind::BridgeTransferExecuted,
            EvmEscrowEvent::BridgeTransferRefunded { .. } => EventKind::BridgeTransferRefunded,
            EvmEscrowEvent::BridgeTransferFailed { .. } => EventKind::BridgeTransferFailed,
        }
    }

    /// Indexed topics (excluding topic0) and data tokens
    fn encode_parts(&self) -> (Vec<H256>, Vec<Token>) {
        let u = |v: u64| Token::Uint(U256::from(v));
        let fixed = |b: &[u8; 32]| Token::FixedBytes(b.to_vec());
        match self.clone() {
            EvmEscrowEvent::EscrowCreated {
                escrow_id,
                client,
                freelancer,
                total_amount,
                milestone_amounts,
                is_cross_chain,
                cross_chain_recipient,
                token_symbol,
                title,
            } => (
                vec![
                    topic_from_u256(escrow_id),
                    topic_from_address(client),
                    topic_from_address(freelancer),
                ],
                vec![
                    Token::Uint(total_amount),
                    Token::Array(milestone_amounts.into_iter().map(Token::Uint).collect()),
                    Token::Bool(is_cross_chain),
                    Token::String(cross_chain_recipient),
                    Token::String(token_symbol),
                    Token::String(title),
                ],
            ),
            EvmEscrowEvent::MilestoneStarted {
                escrow_id,
                milestone_index,
            }
            | EvmEscrowEvent::MilestoneApproved {
                escrow_id,
                milestone_index,
            } => (vec![topic_from_u256(escrow_id)], vec![u(milestone_index)]),
            EvmEscrowEvent::MilestoneSubmitted {
                escrow_id,
                milestone_index,
                note,
            } => (
                vec![topic_from_u256(escrow_id)],
                vec![u(milestone_index), Token::String(note)],
            ),
            EvmEscrowEvent::MilestoneReleased {
                escrow_id,
                milestone_index,
                recipient_amount,
                fee,
                bridge_transfer_id,
            } => (
                vec![topic_from_u256(escrow_id)],
                vec![
                    u(milestone_index),
                    Token::Uint(recipient_amount),
                    Token::Uint(fee),
                    fixed(&bridge_transfer_id),
                ],
            ),
            EvmEscrowEvent::MilestoneRefunded {
                escrow_id,
                milestone_index,
                amount,
            } => (
                vec![topic_from_u256(escrow_id)],
                vec![u(milestone_index), Token::Uint(amount)],
            ),
            EvmEscrowEvent::DisputeInitiated {
                escrow_id,
                initiator,
                milestone_index,
                reason,
            } => (
                vec![topic_from_u256(escrow_id), topic_from_address(initiator)],
                vec![u(milestone_index), Token::String(reason)],
            ),
            EvmEscrowEvent::DisputeVoteCast {
                escrow_id,
                arbiter,
                milestone_index,
                vote_for_client,
                votes_for_client,
                votes_for_freelancer,
            } => (
                vec![topic_from_u256(escrow_id), topic_from_address(arbiter)],
                vec![
                    u(milestone_index),
                    Token::Bool(vote_for_client),
                    u(votes_for_client),
                    u(votes_for_freelancer),
                ],
            ),
            EvmEscrowEvent::DisputeResolved {
                escrow_id,
                milestone_index,
                favour_client,
                votes_for_client,
                votes_for_freelancer,
            } => (
                vec![topic_from_u256(escrow_id)],
                vec![
                    u(milestone_index),
                    Token::Bool(favour_client),
                    u(votes_for_client),
                    u(votes_for_freelancer),
                ],
            ),
            EvmEscrowEvent::EscrowCompleted { escrow_id } => {
                (vec![topic_from_u256(escrow_id)], vec![])
            }
            EvmEscrowEvent::EscrowCancelled {
                escrow_id,
                refund_amount: amount,
            }
            | EvmEscrowEvent::EscrowRefunded { escrow_id, amount } => {
                (vec![topic_from_u256(escrow_id)], vec![Token::Uint(amount)])
            }
            EvmEscrowEvent::BridgeTransferInitiated {
                transfer_id,
                sender,
                recipient,
                amount,
                timestamp,
                nonce,
            } => (
                vec![H256(transfer_id), topic_from_address(sender)],
                vec![
                    Token::String(recipient),
                    Token::Uint(amount),
                    u(timestamp),
                    u(nonce),
                ],
            ),
            EvmEscrowEvent::BridgeTransferConfirmed {
                transfer_id,
                relayer,
                confirmations,
            } => (
                vec![H256(transfer_id), topic_from_address(relayer)],
                vec![u(confirmations)],
            ),
            EvmEscrowEvent::BridgeTransferExecuted {
                transfer_id,
                recipient,
                amount,
            } => (
                vec![H256(transfer_id)],
                vec![Token::String(recipient), Token::Uint(amount)],
            ),
            EvmEscrowEvent::BridgeTransferRefunded {
                transfer_id,
                sender,
                amount,
            } => (
                vec![H256(transfer_id), topic_from_address(sender)],
                vec![Token::Uint(amount)],
            ),
            EvmEscrowEvent::BridgeTransferFailed {
                transfer_id,
                reason,
            } => (vec![H256(transfer_id)], vec![Token::String(reason)]),
        }
    }

    /// Encodes the event as a log emitted by `contract`. Block and
    /// transaction fields are filled in by the chain.
    pub fn to_log(&self, contract: Address) -> Log {
        let (indexed, data) = self.encode_parts();
        let mut topics = Vec::with_capacity(indexed.len() + 1);
        topics.push(event_topic(self.kind()));
        topics.extend(indexed);
        Log {
            address: contract,
            topics,
            data: Bytes::from(abi::encode(&data)),
            ..Default::default()
        }
    }

    /// Decodes an escrow contract log. Logs with an unknown `topic0` yield
    /// `Ok(None)`.
    pub fn from_log(log: &Log) -> Result<Option<Self>, AbiEventError> {
        let Some(topic0) = log.topics.first() else {
            return Ok(None);
        };
        let Some(kind) = kind_for_topic(topic0) else {
            return Ok(None);
        };
        let (indexed, data_params) = schema(kind);
        if log.topics.len() != indexed.len() + 1 {
            return Err(AbiEventError::TopicCount {
                event: kind.name(),
                expected: indexed.len() + 1,
                actual: log.topics.len(),
            });
        }
        let topics = &log.topics[1..];
        let mut data = TokenReader::new(kind.name(), abi::decode(&data_params, &log.data)?);

        let event = match kind {
            EventKind::EscrowCreated => EvmEscrowEvent::EscrowCreated {
                escrow_id: u256_from_topic(&topics[0]),
                client: address_from_topic(&topics[1]),
                freelancer: address_from_topic(&topics[2]),
                total_amount: data.uint()?,
                milestone_amounts: data.uint_array()?,
                is_cross_chain: data.boolean()?,
                cross_chain_recipient: data.string()?,
                token_symbol: data.string()?,
                title: data.string()?,
            },
            EventKind::MilestoneStarted => EvmEscrowEvent::MilestoneStarted {
                escrow_id: u256_from_topic(&topics[0]),
                milestone_index: data.small()?,
            },
            EventKind::MilestoneSubmitted => EvmEscrowEvent::MilestoneSubmitted {
                escrow_id: u256_from_topic(&topics[0]),
                milestone_index: data.small()?,
                note: data.string()?,
            },
            EventKind::MilestoneApproved => EvmEscrowEvent::MilestoneApproved {
                escrow_id: u256_from_topic(&topics[0]),
                milestone_index: data.small()?,
            },
            EventKind::MilestoneReleased => EvmEscrowEvent::MilestoneReleased {
                escrow_id: u256_from_topic(&topics[0]),
                milestone_index: data.small()?,
                recipient_amount: data.uint()?,
                fee: data.uint()?,
                bridge_transfer_id: data.bytes32()?,
            },
            EventKind::MilestoneRefunded => EvmEscrowEvent::MilestoneRefunded {
                escrow_id: u256_from_topic(&topics[0]),
                milestone_index: data.small()?,
                amount: data.uint()?,
            },
            EventKind::DisputeInitiated => EvmEscrowEvent::DisputeInitiated {
                escrow_id: u256_from_topic(&topics[0]),
                initiator: address_from_topic(&topics[1]),
                milestone_index: data.small()?,
                reason: data.string()?,
            },
            EventKind::DisputeVoteCast => EvmEscrowEvent::DisputeVoteCast {
                escrow_id: u256_from_topic(&topics[0]),
                arbiter: address_from_topic(&topics[1]),
                milestone_index: data.small()?,
                vote_for_client: data.boolean()?,
                votes_for_client: data.small()?,
                votes_for_freelancer: data.small()?,
            },
            EventKind::DisputeResolved => EvmEscrowEvent::DisputeResolved {
                escrow_id: u256_from_topic(&topics[0]),
                milestone_index: data.small()?,
                favour_client: data.boolean()?,
                votes_for_client: data.small()?,
                votes_for_freelancer: data.small()?,
            },
            EventKind::EscrowCompleted => EvmEscrowEvent::EscrowCompleted {
                escrow_id: u256_from_topic(&topics[0]),
            },
            EventKind::EscrowCancelled => EvmEscrowEvent::EscrowCancelled {
                escrow_id: u256_from_topic(&topics[0]),
                refund_amount: data.uint()?,
            },
            EventKind::EscrowRefunded => EvmEscrowEvent::EscrowRefunded {
                escrow_id: u256_from_topic(&topics[0]),
                amount: data.uint()?,
            },
            EventKind::BridgeTransferInitiated => EvmEscrowEvent::BridgeTransferInitiated {
                transfer_id: topics[0].0,
                sender: address_from_topic(&topics[1]),
                recipient: data.string()?,
                amount: data.uint()?,
                timestamp: data.small()?,
                nonce: data.small()?,
            },
            EventKind::BridgeTransferConfirmed => EvmEscrowEvent::BridgeTransferConfirmed {
                transfer_id: topics[0].0,
                relayer: address_from_topic(&topics[1]),
                confirmations: data.small()?,
            },
            EventKind::BridgeTransferExecuted => EvmEscrowEvent::BridgeTransferExecuted {
                transfer_id: topics[0].0,
                recipient: data.string()?,
                amount: data.uint()?,
            },
            EventKind::BridgeTransferRefunded => EvmEscrowEvent::BridgeTransferRefunded {
                transfer_id: topics[0].0,
                sender: address_from_topic(&topics[1]),
                amount: data.uint()?,
            },
            EventKind::BridgeTransferFailed => EvmEscrowEvent::BridgeTransferFailed {
                transfer_id: topics[0].0,
                reason: data.string()?,
            },
        };
        Ok(Some(event))
    }
}

struct TokenReader {
    event: &'static str,
    tokens: std::vec::IntoIter<Token>,
}

impl TokenReader {
    fn new(event: &'static str, tokens: Vec<Token>) -> Self {
        Self {
            event,
            tokens: tokens.into_iter(),
        }
    }

    fn next(&mut self) -> Result<Token, AbiEventError> {
        self.tokens
            .next()
            .ok_or(AbiEventError::UnexpectedToken(self.event))
    }

    fn uint(&mut self) -> Result<U256, AbiEventError> {
        self.next()?
            .into_uint()
            .ok_or(AbiEventError::UnexpectedToken(self.event))
    }

    /// uint256 that must fit in a u64
    fn small(&mut self) -> Result<u64, AbiEventError> {
        let v = self.uint()?;
        if v > U256::from(u64::MAX) {
            return Err(AbiEventError::OutOfRange(self.event));
        }
        Ok(v.low_u64())
    }

    fn boolean(&mut self) -> Result<bool, AbiEventError> {
        self.next()?
            .into_bool()
            .ok_or(AbiEventError::UnexpectedToken(self.event))
    }

    fn string(&mut self) -> Result<String, AbiEventError> {
        self.next()?
            .into_string()
            .ok_or(AbiEventError::UnexpectedToken(self.event))
    }

    fn bytes32(&mut self) -> Result<[u8; 32], AbiEventError> {
        let bytes = self
            .next()?
            .into_fixed_bytes()
            .ok_or(AbiEventError::UnexpectedToken(self.event))?;
        bytes
            .try_into()
            .map_err(|_| AbiEventError::UnexpectedToken(self.event))
    }

    fn uint_array(&mut self) -> Result<Vec<U256>, AbiEventError> {
        let items = self
            .next()?
            .into_array()
            .ok_or(AbiEventError::UnexpectedToken(self.event))?;
        items
            .into_iter()
            .map(|t| t.into_uint().ok_or(AbiEventError::UnexpectedToken(self.event)))
            .collect()
    }
}

// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

/// Errors returned by the on-chain state machines. A call that returns an
/// error leaves no state change behind and emits no events.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EscrowError {
    #[error("caller is not authorized for this operation")]
    NotAuthorized,
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("invalid amount: {0}")]
    InvalidAmount(String),
    #[error("invalid milestone set: {0}")]
    InvalidMilestoneSet(String),
    #[error("invalid recipient")]
    InvalidRecipient,
    #[error("arbiter has already voted")]
    AlreadyVoted,
    #[error("relayer has already confirmed this transfer")]
    AlreadyConfirmed,
    #[error("not found: {0}")]
    NotFound(String),
    #[error("escrow balance is below the milestone amount")]
    InsufficientBalance,
    #[error("bridge liquidity is below the transfer amount")]
    InsufficientLiquidity,
    #[error("transfer has not timed out yet")]
    NotTimedOut,
    #[error("escrow already has an open dispute")]
    DisputeExists,
    #[error("transfer is already final")]
    AlreadyFinal,
}

impl EscrowError {
    /// Returns a short string identifying the error type for metrics labels
    pub fn error_type(&self) -> &'static str {
        match self {
            EscrowError::NotAuthorized => "not_authorized",
            EscrowError::InvalidState(_) => "invalid_state",
            EscrowError::InvalidAmount(_) => "invalid_amount",
            EscrowError::InvalidMilestoneSet(_) => "invalid_milestone_set",
            EscrowError::InvalidRecipient => "invalid_recipient",
            EscrowError::AlreadyVoted => "already_voted",
            EscrowError::AlreadyConfirmed => "already_confirmed",
            EscrowError::NotFound(_) => "not_found",
            EscrowError::InsufficientBalance => "insufficient_balance",
            EscrowError::InsufficientLiquidity => "insufficient_liquidity",
            EscrowError::NotTimedOut => "not_timed_out",
            EscrowError::DisputeExists => "dispute_exists",
            EscrowError::AlreadyFinal => "already_final",
        }
    }

    pub(crate) fn invalid_state(msg: impl Into<String>) -> Self {
        EscrowError::InvalidState(msg.into())
    }
}

pub type EscrowResult<T> = Result<T, EscrowError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn all_variants() -> Vec<EscrowError> {
        vec![
            EscrowError::NotAuthorized,
            EscrowError::InvalidState("test".to_string()),
            EscrowError::InvalidAmount("test".to_string()),
            EscrowError::InvalidMilestoneSet("test".to_string()),
            EscrowError::InvalidRecipient,
            EscrowError::AlreadyVoted,
            EscrowError::AlreadyConfirmed,
            EscrowError::NotFound("test".to_string()),
            EscrowError::InsufficientBalance,
            EscrowError::InsufficientLiquidity,
            EscrowError::NotTimedOut,
            EscrowError::DisputeExists,
            EscrowError::AlreadyFinal,
        ]
    }

    #[test]
    fn test_error_type_string_variants() {
        // Payload must not leak into the label
        assert_eq!(
            EscrowError::InvalidState("a".into()).error_type(),
            EscrowError::InvalidState("b".into()).error_type()
        );
        assert_eq!(
            EscrowError::NotFound("escrow 7".into()).error_type(),
            "not_found"
        );
    }

    /// Test that error_type returns valid Prometheus label values
    #[test]
    fn test_error_type_valid_prometheus_labels() {
        for error in all_variants() {
            let label = error.error_type();
            assert!(!label.is_empty());
            assert!(
                label.chars().all(|c| c.is_ascii_lowercase() || c == '_'),
                "label '{}' contains invalid characters",
                label
            );
            assert!(!label.starts_with('_'));
        }
    }

    #[test]
    fn test_error_type_labels_unique() {
        let mut labels: Vec<_> = all_variants().iter().map(|e| e.error_type()).collect();
        let count = labels.len();
        labels.sort();
        labels.dedup();
        assert_eq!(labels.len(), count);
    }

    #[test]
    fn test_display_includes_detail() {
        let err = EscrowError::InvalidMilestoneSet("empty milestone list".into());
        assert_eq!(err.to_string(), "invalid milestone set: empty milestone list");
    }
}

//! Error taxonomy for the orchestrator.
//!
//! Every failure a plan step can produce is a [`DeployError`]. Steps never swallow
//! errors: they unwind to the [`Restorer`](crate::Restorer), which flushes the
//! environment and hands the error back unchanged.

use std::time::Duration;

use alloy_core::primitives::{Address, TxHash};
use thiserror::Error;

/// Errors produced by a [`Ledger`](crate::Ledger) implementation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// The node could not be reached or returned something unreadable.
    #[error("ledger transport error: {0}")]
    Transport(String),

    /// The node refused the request (estimation revert, bad nonce, ...).
    #[error("rejected by the ledger: {0}")]
    Rejected(String),

    /// The transaction is known to have been submitted but no receipt is visible yet.
    #[error("transaction {0} is not confirmed yet")]
    Pending(TxHash),
}

impl LedgerError {
    /// Whether polling for the same receipt again may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Pending(_) | Self::Transport(_))
    }
}

/// Main error type for the orchestrator.
#[derive(Error, Debug)]
pub enum DeployError {
    /// Missing override, malformed parameter or unmet dependency. Raised before
    /// any transaction is submitted.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The transaction reverted, ran out of gas or was rejected by the node.
    #[error("transaction for {context} failed: {reason}")]
    TransactionFailure {
        context: String,
        tx_hash: Option<TxHash>,
        reason: String,
    },

    /// The transaction was submitted but its confirmation was not observed in time.
    /// The outcome is unknown: inspect the ledger before retrying.
    #[error(
        "transaction {tx_hash} for {context} was not confirmed within {waited:?}; \
         inspect the ledger before retrying"
    )]
    ConfirmationTimeout {
        context: String,
        tx_hash: TxHash,
        waited: Duration,
    },

    /// A component deployment failed. The record for the component is untouched.
    #[error("deployment of {component} failed")]
    DeploymentFailure {
        component: String,
        #[source]
        source: Box<DeployError>,
    },

    /// The sender is not allowed to repoint the proxy.
    #[error("{sender} cannot upgrade {component}: proxy admin {admin} is owned by {owner}")]
    Unauthorized {
        component: String,
        admin: Address,
        owner: Address,
        sender: Address,
    },

    /// The registry assigned a version number that does not follow the recorded ones.
    #[error("registry {registry} reported version {reported}, expected a number above {previous}")]
    VersionOrder {
        registry: String,
        previous: u64,
        reported: u64,
    },

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// Environment file could not be read or written.
    #[error("environment store IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Environment file or artifact is not valid JSON.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for orchestrator operations.
pub type Result<T> = std::result::Result<T, DeployError>;

impl DeployError {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Wrap a failure as a deployment failure of `component`.
    pub fn deployment(component: impl Into<String>, source: DeployError) -> Self {
        Self::DeploymentFailure {
            component: component.into(),
            source: Box::new(source),
        }
    }

    /// Whether the error was raised before anything was submitted to the ledger.
    pub fn is_configuration(&self) -> bool {
        match self {
            Self::Configuration(_) => true,
            Self::DeploymentFailure { source, .. } => source.is_configuration(),
            _ => false,
        }
    }

    /// Whether the outcome on the ledger is unknown and needs reconciliation.
    pub fn is_ambiguous(&self) -> bool {
        match self {
            Self::ConfirmationTimeout { .. } => true,
            Self::DeploymentFailure { source, .. } => source.is_ambiguous(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DeployError::config("no override for WETH9");
        assert_eq!(err.to_string(), "configuration error: no override for WETH9");

        let err = DeployError::TransactionFailure {
            context: "PoolCreator.initialize".to_string(),
            tx_hash: None,
            reason: "execution reverted".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "transaction for PoolCreator.initialize failed: execution reverted"
        );
    }

    #[test]
    fn test_deployment_failure_classification() {
        let timeout = DeployError::ConfirmationTimeout {
            context: "Broker".to_string(),
            tx_hash: TxHash::ZERO,
            waited: Duration::from_secs(30),
        };
        let err = DeployError::deployment("Broker", timeout);
        assert!(err.is_ambiguous());
        assert!(!err.is_configuration());

        let err = DeployError::deployment("Reader", DeployError::config("unlinked library"));
        assert!(err.is_configuration());
        assert!(!err.is_ambiguous());
    }

    #[test]
    fn test_ledger_error_retryable() {
        assert!(LedgerError::Pending(TxHash::ZERO).is_retryable());
        assert!(LedgerError::Transport("connection reset".into()).is_retryable());
        assert!(!LedgerError::Rejected("nonce too low".into()).is_retryable());
    }
}

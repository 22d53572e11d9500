use thiserror::Error;

use crate::provider::ProviderError;
use crate::state::ActionKind;

/// Errors surfaced by the mint client.
///
/// None of these are fatal: the client stays interactive after any of them.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The wallet prompt (connect or signature) was declined.
    #[error("request rejected in wallet")]
    UserRejected,
    /// The wallet is on a different chain than the sale contract.
    #[error("change the network to {network} (expected chain {expected}, wallet is on {actual})")]
    WrongNetwork {
        network: String,
        expected: u64,
        actual: u64,
    },
    #[error("wallet is not connected")]
    NotConnected,
    /// Transient failure reading contract state.
    #[error("failed to read {method}: {reason}")]
    ReadFailure { method: &'static str, reason: String },
    /// The ledger refused or dropped a state-changing call.
    #[error("{action} failed: {reason}")]
    WriteFailure { action: ActionKind, reason: String },
    #[error("{0} is still pending, wait for it to confirm")]
    ActionPending(ActionKind),
    #[error("operation cancelled")]
    Cancelled,
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type ClientResult<T> = Result<T, ClientError>;

impl ClientError {
    pub(crate) fn read(method: &'static str, err: ProviderError) -> Self {
        match err {
            ProviderError::UserRejected => Self::UserRejected,
            other => Self::ReadFailure {
                method,
                reason: other.to_string(),
            },
        }
    }

    pub(crate) fn write(action: ActionKind, err: ProviderError) -> Self {
        match err {
            ProviderError::UserRejected => Self::UserRejected,
            ProviderError::Reverted(data) => Self::WriteFailure {
                action,
                reason: crate::abi::describe_revert(&data),
            },
            other => Self::WriteFailure {
                action,
                reason: other.to_string(),
            },
        }
    }

    /// Wrong network blocks every ledger interaction until the wallet switches.
    pub fn is_wrong_network(&self) -> bool {
        matches!(self, Self::WrongNetwork { .. })
    }
}

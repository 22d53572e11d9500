//! Wallet provider seam.
//!
//! The subset of an EIP-1193 provider the mint client needs: account access, chain
//! identity, read calls, and transaction submission with receipts.

use std::fmt;

use alloy_primitives::{Address, Bytes, TxHash, U256};
use async_trait::async_trait;
use thiserror::Error;

/// A read-only contract call (`eth_call`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallRequest {
    pub from: Option<Address>,
    pub to: Address,
    pub data: Bytes,
}

/// A state-changing call the wallet signs and broadcasts (`eth_sendTransaction`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransactionRequest {
    pub from: Address,
    pub to: Address,
    pub value: U256,
    pub data: Bytes,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransactionReceipt {
    pub transaction_hash: TxHash,
    pub block_number: u64,
    /// `false` when execution reverted on chain.
    pub status: bool,
    pub revert_data: Bytes,
}

impl fmt::Display for TransactionReceipt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "tx={}, block={}, status={}",
            self.transaction_hash,
            self.block_number,
            if self.status { "ok" } else { "reverted" }
        )
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ProviderError {
    /// EIP-1193 code 4001.
    #[error("user rejected the request")]
    UserRejected,
    /// Execution reverted; carries the raw revert data.
    #[error("execution reverted")]
    Reverted(Bytes),
    /// EIP-1193 code 4100: the account is not authorized by the wallet.
    #[error("account {0} is not authorized by the wallet")]
    Unauthorized(Address),
    #[error("provider disconnected")]
    Disconnected,
    #[error("transport error: {0}")]
    Transport(String),
}

#[async_trait]
pub trait WalletProvider: Send + Sync {
    /// Prompts the user to expose their accounts.
    async fn request_accounts(&self) -> Result<Vec<String>, ProviderError>;

    /// Accounts already exposed to the client; never prompts.
    async fn accounts(&self) -> Result<Vec<String>, ProviderError>;

    async fn chain_id(&self) -> Result<u64, ProviderError>;

    async fn call(&self, request: &CallRequest) -> Result<Bytes, ProviderError>;

    /// Signs and broadcasts; resolves once the transaction is accepted, not mined.
    async fn send_transaction(
        &self,
        request: &TransactionRequest,
    ) -> Result<TxHash, ProviderError>;

    /// Resolves once the transaction is included in a block.
    async fn wait_for_receipt(&self, hash: TxHash) -> Result<TransactionReceipt, ProviderError>;
}

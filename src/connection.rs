//! Wallet session and contract handles.
//!
//! Nothing about the wallet is trusted across calls: every handle acquisition re-checks the
//! chain identity and the wallet's active account.

use std::str::FromStr;
use std::sync::Arc;

use alloy_primitives::{Address, Bytes, TxHash, U256};
use alloy_sol_types::SolCall;
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::abi::{saturating_u64, ICryptoDevs};
use crate::config::NetworkConfig;
use crate::errors::{ClientError, ClientResult};
use crate::provider::{CallRequest, TransactionReceipt, TransactionRequest, WalletProvider};
use crate::state::ActionKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    ReadOnly,
    ReadWrite,
}

/// A validated view of the wallet session at one point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Connection {
    pub account: Address,
    pub chain_id: u64,
    pub capability: Capability,
}

pub struct ConnectionManager {
    provider: Arc<dyn WalletProvider>,
    contract: Address,
    network: NetworkConfig,
    session: Mutex<Option<Address>>,
    connected: watch::Sender<Option<Address>>,
}

impl ConnectionManager {
    pub fn new(
        provider: Arc<dyn WalletProvider>,
        contract: Address,
        network: NetworkConfig,
    ) -> Self {
        let (connected, _) = watch::channel(None);
        Self {
            provider,
            contract,
            network,
            session: Mutex::new(None),
            connected,
        }
    }

    /// Yields the session account; the first `Some` marks the first successful connect.
    pub fn subscribe(&self) -> watch::Receiver<Option<Address>> {
        self.connected.subscribe()
    }

    pub fn account(&self) -> Option<Address> {
        *self.session.lock()
    }

    pub fn is_connected(&self) -> bool {
        self.account().is_some()
    }

    pub fn network(&self) -> &NetworkConfig {
        &self.network
    }

    /// Prompts the wallet for an account and checks it is on the sale's network.
    pub async fn connect(&self) -> ClientResult<Connection> {
        let accounts = self
            .provider
            .request_accounts()
            .await
            .map_err(|err| ClientError::read("eth_requestAccounts", err))?;
        let account = match accounts.first() {
            Some(raw) => parse_account(raw)?,
            None => return Err(ClientError::NotConnected),
        };
        let chain_id = self.ensure_network().await?;

        let first = {
            let mut session = self.session.lock();
            let first = session.is_none();
            *session = Some(account);
            first
        };
        self.connected.send_replace(Some(account));
        if first {
            info!(%account, chain_id, "wallet connected");
        } else {
            debug!(%account, chain_id, "wallet reconnected");
        }

        Ok(Connection {
            account,
            chain_id,
            capability: Capability::ReadWrite,
        })
    }

    /// Forgets the session. Polling observers see `None`.
    pub fn disconnect(&self) {
        if self.session.lock().take().is_some() {
            self.connected.send_replace(None);
            info!("wallet disconnected");
        }
    }

    /// Read-only contract access, connecting first if there is no session yet.
    pub async fn reader(&self) -> ClientResult<ReadHandle> {
        let connection = if self.is_connected() {
            self.revalidate(Capability::ReadOnly).await?
        } else {
            Connection {
                capability: Capability::ReadOnly,
                ..self.connect().await?
            }
        };
        Ok(ReadHandle {
            provider: Arc::clone(&self.provider),
            contract: self.contract,
            connection,
        })
    }

    /// Write access. Requires an established session.
    pub async fn writer(&self) -> ClientResult<WriteHandle> {
        if !self.is_connected() {
            return Err(ClientError::NotConnected);
        }
        let connection = self.revalidate(Capability::ReadWrite).await?;
        Ok(WriteHandle {
            provider: Arc::clone(&self.provider),
            contract: self.contract,
            connection,
        })
    }

    async fn ensure_network(&self) -> ClientResult<u64> {
        let actual = self
            .provider
            .chain_id()
            .await
            .map_err(|err| ClientError::read("eth_chainId", err))?;
        if actual != self.network.chain_id {
            warn!(
                expected = self.network.chain_id,
                actual, "wallet is on the wrong network"
            );
            return Err(ClientError::WrongNetwork {
                network: self.network.name.clone(),
                expected: self.network.chain_id,
                actual,
            });
        }
        Ok(actual)
    }

    async fn revalidate(&self, capability: Capability) -> ClientResult<Connection> {
        let chain_id = self.ensure_network().await?;
        let accounts = self
            .provider
            .accounts()
            .await
            .map_err(|err| ClientError::read("eth_accounts", err))?;
        let Some(raw) = accounts.first() else {
            self.disconnect();
            return Err(ClientError::NotConnected);
        };
        let account = parse_account(raw)?;

        let changed = {
            let mut session = self.session.lock();
            let changed = *session != Some(account);
            *session = Some(account);
            changed
        };
        if changed {
            info!(%account, "wallet switched account");
            self.connected.send_replace(Some(account));
        }

        Ok(Connection {
            account,
            chain_id,
            capability,
        })
    }
}

/// Wallets report accounts in whatever letter case they like; the bytes are what count.
fn parse_account(raw: &str) -> ClientResult<Address> {
    Address::from_str(raw.trim()).map_err(|err| ClientError::ReadFailure {
        method: "eth_accounts",
        reason: format!("malformed account {raw:?}: {err}"),
    })
}

/// Read-only contract accessor.
#[derive(Clone)]
pub struct ReadHandle {
    provider: Arc<dyn WalletProvider>,
    contract: Address,
    connection: Connection,
}

impl ReadHandle {
    pub fn account(&self) -> Address {
        self.connection.account
    }

    pub fn capability(&self) -> Capability {
        self.connection.capability
    }

    /// The session as validated when this handle was issued.
    pub fn connection(&self) -> Connection {
        self.connection
    }

    pub async fn presale_started(&self) -> ClientResult<bool> {
        Ok(self.read(ICryptoDevs::presaleStartedCall {}).await?._0)
    }

    /// Presale end as unix seconds; zero until the presale starts.
    pub async fn presale_ended(&self) -> ClientResult<u64> {
        let end = self.read(ICryptoDevs::presaleEndedCall {}).await?._0;
        Ok(saturating_u64(end))
    }

    pub async fn token_ids(&self) -> ClientResult<u64> {
        let minted = self.read(ICryptoDevs::tokenIdsCall {}).await?._0;
        Ok(saturating_u64(minted))
    }

    pub async fn owner(&self) -> ClientResult<Address> {
        Ok(self.read(ICryptoDevs::ownerCall {}).await?._0)
    }

    async fn read<C: SolCall>(&self, call: C) -> ClientResult<C::Return> {
        let request = CallRequest {
            from: Some(self.connection.account),
            to: self.contract,
            data: call.abi_encode().into(),
        };
        let output = self
            .provider
            .call(&request)
            .await
            .map_err(|err| ClientError::read(C::SIGNATURE, err))?;
        C::abi_decode_returns(&output, true).map_err(|err| ClientError::ReadFailure {
            method: C::SIGNATURE,
            reason: format!("undecodable response: {err}"),
        })
    }
}

/// Write-capable contract accessor.
pub struct WriteHandle {
    provider: Arc<dyn WalletProvider>,
    contract: Address,
    connection: Connection,
}

impl WriteHandle {
    pub fn account(&self) -> Address {
        self.connection.account
    }

    pub fn capability(&self) -> Capability {
        self.connection.capability
    }

    pub fn connection(&self) -> Connection {
        self.connection
    }

    pub async fn start_presale(&self) -> ClientResult<PendingTransaction> {
        self.submit(
            ActionKind::StartPresale,
            ICryptoDevs::startPresaleCall {},
            U256::ZERO,
        )
        .await
    }

    pub async fn presale_mint(&self, value: U256) -> ClientResult<PendingTransaction> {
        self.submit(ActionKind::PresaleMint, ICryptoDevs::presaleMintCall {}, value)
            .await
    }

    pub async fn mint(&self, value: U256) -> ClientResult<PendingTransaction> {
        self.submit(ActionKind::PublicMint, ICryptoDevs::mintCall {}, value)
            .await
    }

    async fn submit<C: SolCall>(
        &self,
        action: ActionKind,
        call: C,
        value: U256,
    ) -> ClientResult<PendingTransaction> {
        let request = TransactionRequest {
            from: self.connection.account,
            to: self.contract,
            value,
            data: Bytes::from(call.abi_encode()),
        };
        let hash = self
            .provider
            .send_transaction(&request)
            .await
            .map_err(|err| ClientError::write(action, err))?;
        debug!(%hash, %action, "transaction submitted");
        Ok(PendingTransaction {
            provider: Arc::clone(&self.provider),
            hash,
            action,
        })
    }
}

/// A broadcast transaction that has not been confirmed yet.
pub struct PendingTransaction {
    provider: Arc<dyn WalletProvider>,
    hash: TxHash,
    action: ActionKind,
}

impl PendingTransaction {
    pub fn hash(&self) -> TxHash {
        self.hash
    }

    /// Waits for inclusion. A reverted receipt is a `WriteFailure`.
    pub async fn confirmed(self) -> ClientResult<TransactionReceipt> {
        let receipt = self
            .provider
            .wait_for_receipt(self.hash)
            .await
            .map_err(|err| ClientError::write(self.action, err))?;
        if !receipt.status {
            return Err(ClientError::WriteFailure {
                action: self.action,
                reason: crate::abi::describe_revert(&receipt.revert_data),
            });
        }
        Ok(receipt)
    }
}

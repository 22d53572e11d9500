//! A scriptable wallet provider in front of a [`SimulatedLedger`].
//!
//! Lets tests and the demo play the user's part: declining prompts, switching network or
//! account, flaky RPC reads, slow nodes and blocks mined on demand.

use std::collections::HashMap;
use std::time::Duration;

use alloy_primitives::{keccak256, Address, Bytes, TxHash, U256};
use async_trait::async_trait;
use hex_literal::hex;
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::debug;

use super::ledger::SimulatedLedger;
use crate::provider::{
    CallRequest, ProviderError, TransactionReceipt, TransactionRequest, WalletProvider,
};

/// Where the simulated sale contract is deployed.
pub const SIMULATED_CONTRACT: Address = Address::new(hex!("5fbdb2315678afecb367f032d93f642f64180aa3"));

/// How the wallet spells account addresses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AccountCase {
    #[default]
    Lower,
    Upper,
    Checksum,
}

impl AccountCase {
    fn render(self, account: Address) -> String {
        match self {
            Self::Lower => format!("0x{}", hex::encode(account)),
            Self::Upper => format!("0x{}", hex::encode_upper(account)),
            Self::Checksum => account.to_checksum(None),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mining {
    /// A block is produced `block_time` after someone waits on a receipt.
    Auto(Duration),
    /// Blocks are produced only by [`SimulatedWallet::mine`].
    Manual,
}

struct QueuedTransaction {
    hash: TxHash,
    from: Address,
    value: U256,
    data: Bytes,
}

struct WalletInner {
    ledger: SimulatedLedger,
    chain_id: u64,
    accounts: Vec<Address>,
    active: usize,
    authorized: bool,
    account_case: AccountCase,
    reject_next: bool,
    failing_reads: u32,
    failure_rate: Option<(f64, fastrand::Rng)>,
    drop_next_receipt: bool,
    read_latency: Duration,
    mining: Mining,
    mempool: Vec<QueuedTransaction>,
    receipts: HashMap<TxHash, TransactionReceipt>,
    nonce: u64,
    block_number: u64,
    read_calls: u64,
    sent_transactions: u64,
}

impl WalletInner {
    fn rendered_accounts(&self) -> Vec<String> {
        let mut accounts = Vec::with_capacity(self.accounts.len());
        if let Some(active) = self.accounts.get(self.active) {
            accounts.push(self.account_case.render(*active));
        }
        for (idx, account) in self.accounts.iter().enumerate() {
            if idx != self.active {
                accounts.push(self.account_case.render(*account));
            }
        }
        accounts
    }

    fn active_account(&self) -> Option<Address> {
        self.accounts.get(self.active).copied()
    }

    fn read_fails(&mut self) -> bool {
        if self.failing_reads > 0 {
            self.failing_reads -= 1;
            return true;
        }
        match &mut self.failure_rate {
            Some((rate, rng)) => rng.f64() < *rate,
            None => false,
        }
    }
}

pub struct SimulatedWallet {
    contract: Address,
    inner: Mutex<WalletInner>,
    blocks: watch::Sender<u64>,
}

impl SimulatedWallet {
    pub fn new(ledger: SimulatedLedger, chain_id: u64, accounts: Vec<Address>) -> Self {
        let (blocks, _) = watch::channel(0);
        Self {
            contract: SIMULATED_CONTRACT,
            inner: Mutex::new(WalletInner {
                ledger,
                chain_id,
                accounts,
                active: 0,
                authorized: false,
                account_case: AccountCase::default(),
                reject_next: false,
                failing_reads: 0,
                failure_rate: None,
                drop_next_receipt: false,
                read_latency: Duration::ZERO,
                mining: Mining::Auto(Duration::from_secs(1)),
                mempool: Vec::new(),
                receipts: HashMap::new(),
                nonce: 0,
                block_number: 0,
                read_calls: 0,
                sent_transactions: 0,
            }),
            blocks,
        }
    }

    pub fn contract_address(&self) -> Address {
        self.contract
    }

    /// Inspects the ledger behind the wallet.
    pub fn ledger<R>(&self, f: impl FnOnce(&SimulatedLedger) -> R) -> R {
        f(&self.inner.lock().ledger)
    }

    /// Changes ledger state directly, bypassing transactions.
    pub fn ledger_mut<R>(&self, f: impl FnOnce(&mut SimulatedLedger) -> R) -> R {
        f(&mut self.inner.lock().ledger)
    }

    /// The user declines the next prompt (connect or signature).
    pub fn reject_next_request(&self) {
        self.inner.lock().reject_next = true;
    }

    pub fn switch_chain(&self, chain_id: u64) {
        self.inner.lock().chain_id = chain_id;
    }

    pub fn add_account(&self, account: Address) {
        self.inner.lock().accounts.push(account);
    }

    /// Makes `account` the active one, adding it if the wallet does not hold it yet.
    pub fn select_account(&self, account: Address) {
        let mut inner = self.inner.lock();
        match inner.accounts.iter().position(|known| *known == account) {
            Some(idx) => inner.active = idx,
            None => {
                inner.accounts.push(account);
                inner.active = inner.accounts.len() - 1;
            }
        }
    }

    /// Revokes the site's access, as locking the wallet would.
    pub fn lock(&self) {
        self.inner.lock().authorized = false;
    }

    pub fn set_account_case(&self, case: AccountCase) {
        self.inner.lock().account_case = case;
    }

    /// The next `count` contract reads fail with a transport error.
    pub fn fail_next_reads(&self, count: u32) {
        self.inner.lock().failing_reads = count;
    }

    /// Fails each read with probability `rate`, reproducibly for a given seed.
    pub fn set_read_failure_rate(&self, rate: f64, seed: u64) {
        self.inner.lock().failure_rate = Some((rate, fastrand::Rng::with_seed(seed)));
    }

    /// The next receipt wait loses its connection to the node.
    pub fn drop_next_receipt(&self) {
        self.inner.lock().drop_next_receipt = true;
    }

    /// Delay applied to every contract read. State is sampled before the delay.
    pub fn set_read_latency(&self, latency: Duration) {
        self.inner.lock().read_latency = latency;
    }

    pub fn set_mining(&self, mining: Mining) {
        self.inner.lock().mining = mining;
    }

    pub fn pending_transactions(&self) -> usize {
        self.inner.lock().mempool.len()
    }

    pub fn read_calls(&self) -> u64 {
        self.inner.lock().read_calls
    }

    /// Transactions the wallet accepted for broadcast.
    pub fn sent_transactions(&self) -> u64 {
        self.inner.lock().sent_transactions
    }

    pub fn block_number(&self) -> u64 {
        self.inner.lock().block_number
    }

    /// Includes every queued transaction in a new block. Returns how many were included.
    pub fn mine(&self) -> usize {
        let (block_number, included) = {
            let mut inner = self.inner.lock();
            if inner.mempool.is_empty() {
                return 0;
            }
            inner.block_number += 1;
            let block_number = inner.block_number;
            let queued = std::mem::take(&mut inner.mempool);
            let included = queued.len();
            for tx in queued {
                let outcome = inner.ledger.transact(tx.from, tx.value, &tx.data);
                let receipt = TransactionReceipt {
                    transaction_hash: tx.hash,
                    block_number,
                    status: outcome.is_ok(),
                    revert_data: outcome.err().unwrap_or_default(),
                };
                inner.receipts.insert(tx.hash, receipt);
            }
            (block_number, included)
        };
        debug!(block_number, included, "mined block");
        self.blocks.send_replace(block_number);
        included
    }
}

#[async_trait]
impl WalletProvider for SimulatedWallet {
    async fn request_accounts(&self) -> Result<Vec<String>, ProviderError> {
        let mut inner = self.inner.lock();
        if std::mem::take(&mut inner.reject_next) {
            return Err(ProviderError::UserRejected);
        }
        inner.authorized = true;
        Ok(inner.rendered_accounts())
    }

    async fn accounts(&self) -> Result<Vec<String>, ProviderError> {
        let inner = self.inner.lock();
        if !inner.authorized {
            return Ok(Vec::new());
        }
        Ok(inner.rendered_accounts())
    }

    async fn chain_id(&self) -> Result<u64, ProviderError> {
        Ok(self.inner.lock().chain_id)
    }

    async fn call(&self, request: &CallRequest) -> Result<Bytes, ProviderError> {
        let (outcome, latency) = {
            let mut inner = self.inner.lock();
            inner.read_calls += 1;
            let outcome = if request.to != self.contract {
                Ok(Bytes::new())
            } else if inner.read_fails() {
                Err(ProviderError::Transport("node request timed out".into()))
            } else {
                inner
                    .ledger
                    .call(&request.data)
                    .map_err(ProviderError::Reverted)
            };
            (outcome, inner.read_latency)
        };
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        outcome
    }

    async fn send_transaction(
        &self,
        request: &TransactionRequest,
    ) -> Result<TxHash, ProviderError> {
        let mut inner = self.inner.lock();
        if std::mem::take(&mut inner.reject_next) {
            return Err(ProviderError::UserRejected);
        }
        if !inner.authorized || inner.active_account() != Some(request.from) {
            return Err(ProviderError::Unauthorized(request.from));
        }
        // Gas estimation: a call that would revert right now never reaches the mempool.
        inner
            .ledger
            .preflight(request.from, request.value, &request.data)
            .map_err(ProviderError::Reverted)?;

        inner.nonce += 1;
        let mut preimage = request.from.to_vec();
        preimage.extend_from_slice(&inner.nonce.to_be_bytes());
        let hash = keccak256(&preimage);
        inner.mempool.push(QueuedTransaction {
            hash,
            from: request.from,
            value: request.value,
            data: request.data.clone(),
        });
        inner.sent_transactions += 1;
        debug!(%hash, from = %request.from, "transaction queued");
        Ok(hash)
    }

    async fn wait_for_receipt(&self, hash: TxHash) -> Result<TransactionReceipt, ProviderError> {
        let mut blocks = self.blocks.subscribe();
        loop {
            let mining = {
                let mut inner = self.inner.lock();
                if std::mem::take(&mut inner.drop_next_receipt) {
                    return Err(ProviderError::Disconnected);
                }
                if let Some(receipt) = inner.receipts.get(&hash) {
                    return Ok(receipt.clone());
                }
                if !inner.mempool.iter().any(|tx| tx.hash == hash) {
                    return Err(ProviderError::Transport(format!(
                        "unknown transaction {hash}"
                    )));
                }
                inner.mining
            };
            match mining {
                Mining::Auto(block_time) => {
                    tokio::time::sleep(block_time).await;
                    self.mine();
                }
                Mining::Manual => {
                    blocks
                        .changed()
                        .await
                        .map_err(|_| ProviderError::Disconnected)?;
                }
            }
        }
    }
}

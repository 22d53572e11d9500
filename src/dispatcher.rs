//! User-initiated writes.
//!
//! Each action claims the single pending slot, submits through the wallet, waits for the
//! receipt and then asks the phase controller for an immediate refresh. Failures are
//! surfaced once and never retried: resubmitting a mint could buy a second token.
//!
//! The write runs on a task owned by the dispatcher. A caller that stops waiting (timeout,
//! navigation) does not release the slot; only the transaction's outcome does.

use std::sync::Arc;

use alloy_primitives::{TxHash, U256};
use tokio::sync::watch;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

use crate::connection::ConnectionManager;
use crate::errors::{ClientError, ClientResult};
use crate::notify::Notifier;
use crate::phase::PhaseController;
use crate::provider::TransactionReceipt;
use crate::state::{ActionKind, PendingAction, PendingStage};

pub struct ActionDispatcher {
    connection: Arc<ConnectionManager>,
    phase: Arc<PhaseController>,
    notifier: Notifier,
    price: U256,
    max_supply: u64,
    pending: Arc<watch::Sender<Option<PendingAction>>>,
    writes: TaskTracker,
}

/// Occupies the pending slot until dropped.
struct PendingSlot {
    pending: Arc<watch::Sender<Option<PendingAction>>>,
}

impl PendingSlot {
    fn awaiting(&self, hash: TxHash) {
        self.pending.send_modify(|slot| {
            if let Some(action) = slot {
                action.stage = PendingStage::AwaitingConfirmation(hash);
            }
        });
    }
}

impl Drop for PendingSlot {
    fn drop(&mut self) {
        self.pending.send_replace(None);
    }
}

impl ActionDispatcher {
    pub fn new(
        connection: Arc<ConnectionManager>,
        phase: Arc<PhaseController>,
        notifier: Notifier,
        price: U256,
        max_supply: u64,
    ) -> Self {
        Self {
            connection,
            phase,
            notifier,
            price,
            max_supply,
            pending: Arc::new(watch::channel(None).0),
            writes: TaskTracker::new(),
        }
    }

    pub fn pending(&self) -> Option<PendingAction> {
        *self.pending.borrow()
    }

    pub fn subscribe_pending(&self) -> watch::Receiver<Option<PendingAction>> {
        self.pending.subscribe()
    }

    /// Writes whose outcome is still unknown, whether or not anyone is waiting on them.
    pub fn writes_in_flight(&self) -> usize {
        self.writes.len()
    }

    pub async fn start_presale(self: &Arc<Self>) -> ClientResult<TransactionReceipt> {
        self.dispatch(ActionKind::StartPresale).await
    }

    pub async fn presale_mint(self: &Arc<Self>) -> ClientResult<TransactionReceipt> {
        self.dispatch(ActionKind::PresaleMint).await
    }

    pub async fn public_mint(self: &Arc<Self>) -> ClientResult<TransactionReceipt> {
        self.dispatch(ActionKind::PublicMint).await
    }

    async fn dispatch(self: &Arc<Self>, kind: ActionKind) -> ClientResult<TransactionReceipt> {
        let slot = match self.claim(kind) {
            Ok(slot) => slot,
            Err(err) => {
                self.notifier.warning(err.to_string());
                return Err(err);
            }
        };

        let sale = self.phase.snapshot();
        if !kind.permitted_by(&sale, self.max_supply) {
            warn!(
                action = %kind,
                started = sale.presale_started,
                ended = sale.presale_ended,
                minted = sale.tokens_minted,
                is_owner = sale.is_owner,
                "sale state does not allow this action, submitting anyway"
            );
        }

        let write = self.writes.spawn(Arc::clone(self).run(kind, slot));
        match write.await {
            Ok(result) => result,
            Err(err) => {
                warn!(action = %kind, error = %err, "write task ended abnormally");
                Err(ClientError::WriteFailure {
                    action: kind,
                    reason: err.to_string(),
                })
            }
        }
    }

    async fn run(
        self: Arc<Self>,
        kind: ActionKind,
        slot: PendingSlot,
    ) -> ClientResult<TransactionReceipt> {
        let result = self.execute(kind, &slot).await;
        drop(slot);

        match result {
            Ok(receipt) => {
                info!(
                    action = %kind,
                    hash = %receipt.transaction_hash,
                    block = receipt.block_number,
                    "transaction confirmed"
                );
                self.notifier.success(success_message(kind));
                self.phase.refresh().await;
                Ok(receipt)
            }
            Err(err) => {
                match &err {
                    ClientError::WrongNetwork { .. } => self.notifier.warning(err.to_string()),
                    ClientError::UserRejected => self.notifier.info(format!("{kind}: {err}")),
                    _ => self.notifier.error(err.to_string()),
                }
                Err(err)
            }
        }
    }

    fn claim(&self, kind: ActionKind) -> ClientResult<PendingSlot> {
        let mut occupied = None;
        self.pending.send_if_modified(|slot| match slot {
            Some(current) => {
                occupied = Some(current.kind);
                false
            }
            None => {
                *slot = Some(PendingAction {
                    kind,
                    stage: PendingStage::Submitting,
                });
                true
            }
        });
        match occupied {
            Some(current) => Err(ClientError::ActionPending(current)),
            None => Ok(PendingSlot {
                pending: Arc::clone(&self.pending),
            }),
        }
    }

    async fn execute(
        &self,
        kind: ActionKind,
        slot: &PendingSlot,
    ) -> ClientResult<TransactionReceipt> {
        let writer = self.connection.writer().await?;
        let submitted = match kind {
            ActionKind::StartPresale => writer.start_presale().await?,
            ActionKind::PresaleMint => writer.presale_mint(self.price).await?,
            ActionKind::PublicMint => writer.mint(self.price).await?,
        };
        slot.awaiting(submitted.hash());
        info!(action = %kind, hash = %submitted.hash(), "awaiting confirmation");
        submitted.confirmed().await
    }
}

fn success_message(kind: ActionKind) -> &'static str {
    match kind {
        ActionKind::StartPresale => "Presale started!",
        ActionKind::PresaleMint | ActionKind::PublicMint => {
            "You have successfully minted a Crypto Dev!"
        }
    }
}

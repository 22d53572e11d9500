//! Sale-phase polling.
//!
//! Two cadences run off one scheduler: presale start/end detection, which stops for good
//! once the presale has ended, and the minted-token count, which never stops. A tick that
//! fires while the previous poll of its cadence is unresolved is skipped. Every cycle takes
//! a sequence number when it starts and may only commit if nothing newer has committed.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use alloy_primitives::Address;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::PollingConfig;
use crate::connection::ConnectionManager;
use crate::errors::{ClientError, ClientResult};
use crate::notify::Notifier;
use crate::state::{PollerState, SaleState};

/// `true` once the presale end timestamp has been reached. Inclusive at `end`.
pub fn presale_has_ended(end: u64, now: u64) -> bool {
    end != 0 && end <= now
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cadence {
    Phase,
    Tokens,
}

impl Cadence {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Phase => "phase",
            Self::Tokens => "tokens",
        }
    }
}

/// What happened to one poll cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Applied,
    /// A cycle that started later already committed.
    Stale,
    /// Nothing to do: no wallet session, or phase polling already stopped.
    Skipped,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CadenceStats {
    pub started: u64,
    pub skipped_ticks: u64,
    pub stale: u64,
    pub failed: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Refresh {
    /// `None` when phase polling has already stopped.
    pub phase: Option<PollOutcome>,
    pub tokens: PollOutcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PhaseObservation {
    NotStarted { is_owner: bool },
    Started { ended: bool },
}

/// Marks one cadence as having a poll in flight.
#[derive(Clone, Default)]
struct PollGuard(Arc<AtomicBool>);

struct InFlight(Arc<AtomicBool>);

impl PollGuard {
    fn try_enter(&self) -> Option<InFlight> {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| InFlight(Arc::clone(&self.0)))
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[derive(Default)]
struct CycleSequencer {
    issued: AtomicU64,
    committed: Mutex<u64>,
    started: AtomicU64,
    skipped_ticks: AtomicU64,
    stale: AtomicU64,
    failed: AtomicU64,
}

impl CycleSequencer {
    fn begin(&self) -> u64 {
        self.started.fetch_add(1, Ordering::Relaxed);
        self.issued.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn stats(&self) -> CadenceStats {
        CadenceStats {
            started: self.started.load(Ordering::Relaxed),
            skipped_ticks: self.skipped_ticks.load(Ordering::Relaxed),
            stale: self.stale.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

pub struct PhaseController {
    connection: Arc<ConnectionManager>,
    clock: Arc<dyn Clock>,
    notifier: Notifier,
    polling: PollingConfig,
    state: watch::Sender<SaleState>,
    lifecycle: watch::Sender<PollerState>,
    phase_cycles: CycleSequencer,
    token_cycles: CycleSequencer,
    phase_guard: PollGuard,
    token_guard: PollGuard,
    shutdown: CancellationToken,
    phase_stop: CancellationToken,
    tasks: TaskTracker,
}

impl PhaseController {
    pub fn new(
        connection: Arc<ConnectionManager>,
        clock: Arc<dyn Clock>,
        notifier: Notifier,
        polling: PollingConfig,
    ) -> Self {
        let shutdown = CancellationToken::new();
        let phase_stop = shutdown.child_token();
        Self {
            connection,
            clock,
            notifier,
            polling,
            state: watch::channel(SaleState::default()).0,
            lifecycle: watch::channel(PollerState::Idle).0,
            phase_cycles: CycleSequencer::default(),
            token_cycles: CycleSequencer::default(),
            phase_guard: PollGuard::default(),
            token_guard: PollGuard::default(),
            shutdown,
            phase_stop,
            tasks: TaskTracker::new(),
        }
    }

    pub fn snapshot(&self) -> SaleState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SaleState> {
        self.state.subscribe()
    }

    pub fn poller_state(&self) -> PollerState {
        *self.lifecycle.borrow()
    }

    pub fn stats(&self, cadence: Cadence) -> CadenceStats {
        match cadence {
            Cadence::Phase => self.phase_cycles.stats(),
            Cadence::Tokens => self.token_cycles.stats(),
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Starts the scheduler. It idles until the wallet first connects.
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let controller = Arc::clone(self);
        let connected = self.connection.subscribe();
        self.tasks.spawn(async move { controller.run(connected).await })
    }

    async fn run(self: Arc<Self>, mut connected: watch::Receiver<Option<Address>>) {
        let ready = tokio::select! {
            _ = self.shutdown.cancelled() => false,
            seen = connected.wait_for(Option::is_some) => seen.is_ok(),
        };
        if !ready {
            return;
        }
        let began = self.lifecycle.send_if_modified(|state| {
            if *state == PollerState::Idle {
                *state = PollerState::Polling;
                true
            } else {
                false
            }
        });
        if began {
            info!(
                phase_interval_ms = self.polling.phase_interval_ms,
                token_interval_ms = self.polling.token_interval_ms,
                "sale polling started"
            );
        }

        let mut phase_ticker = time::interval(self.polling.phase_interval());
        phase_ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut token_ticker = time::interval(self.polling.token_interval());
        token_ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                _ = phase_ticker.tick(), if !self.phase_stop.is_cancelled() => {
                    self.fire(Cadence::Phase);
                }
                _ = token_ticker.tick() => self.fire(Cadence::Tokens),
            }
        }
        debug!("sale polling scheduler exited");
    }

    fn fire(self: &Arc<Self>, cadence: Cadence) {
        if cadence == Cadence::Phase && self.phase_stop.is_cancelled() {
            return;
        }
        let (guard, cycles) = match cadence {
            Cadence::Phase => (&self.phase_guard, &self.phase_cycles),
            Cadence::Tokens => (&self.token_guard, &self.token_cycles),
        };
        let Some(in_flight) = guard.try_enter() else {
            cycles.skipped_ticks.fetch_add(1, Ordering::Relaxed);
            debug!(
                cadence = cadence.as_str(),
                "previous poll unresolved, skipping tick"
            );
            return;
        };
        let controller = Arc::clone(self);
        self.tasks.spawn(async move {
            let _in_flight = in_flight;
            match cadence {
                Cadence::Phase => controller.poll_phase().await,
                Cadence::Tokens => controller.poll_tokens().await,
            };
        });
    }

    /// Polls both cadences now, outside the schedule. Used after a confirmed write.
    pub async fn refresh(&self) -> Refresh {
        let phase = async {
            if self.poller_state() == PollerState::Stopped {
                None
            } else {
                Some(self.poll_phase().await)
            }
        };
        let (phase, tokens) = tokio::join!(phase, self.poll_tokens());
        Refresh { phase, tokens }
    }

    /// One presale start/end detection cycle.
    pub async fn poll_phase(&self) -> PollOutcome {
        if !self.connection.is_connected() {
            return PollOutcome::Skipped;
        }
        let seq = self.phase_cycles.begin();
        let cancel = self.shutdown.clone();
        match self.observe_phase(&cancel).await {
            Ok(observation) => self.commit_phase(seq, observation, &cancel),
            Err(err) => self.report(Cadence::Phase, err),
        }
    }

    /// One minted-count cycle.
    pub async fn poll_tokens(&self) -> PollOutcome {
        if !self.connection.is_connected() {
            return PollOutcome::Skipped;
        }
        let seq = self.token_cycles.begin();
        let cancel = self.shutdown.clone();
        match self.observe_tokens(&cancel).await {
            Ok(minted) => self.commit_tokens(seq, minted, &cancel),
            Err(err) => self.report(Cadence::Tokens, err),
        }
    }

    async fn observe_tokens(&self, cancel: &CancellationToken) -> ClientResult<u64> {
        let reader = until_cancelled(cancel, self.connection.reader()).await?;
        until_cancelled(cancel, reader.token_ids()).await
    }

    async fn observe_phase(&self, cancel: &CancellationToken) -> ClientResult<PhaseObservation> {
        let reader = until_cancelled(cancel, self.connection.reader()).await?;
        let started = until_cancelled(cancel, reader.presale_started()).await?;
        if !started {
            let owner = until_cancelled(cancel, reader.owner()).await?;
            return Ok(PhaseObservation::NotStarted {
                is_owner: owner == reader.account(),
            });
        }
        let end = until_cancelled(cancel, reader.presale_ended()).await?;
        let now = self.clock.unix_seconds();
        Ok(PhaseObservation::Started {
            ended: presale_has_ended(end, now),
        })
    }

    fn commit_phase(
        &self,
        seq: u64,
        observation: PhaseObservation,
        cancel: &CancellationToken,
    ) -> PollOutcome {
        if cancel.is_cancelled() {
            return PollOutcome::Cancelled;
        }
        let ended = {
            let mut committed = self.phase_cycles.committed.lock();
            if seq <= *committed {
                self.phase_cycles.stale.fetch_add(1, Ordering::Relaxed);
                debug!(seq, latest = *committed, "discarding stale phase poll");
                return PollOutcome::Stale;
            }
            *committed = seq;
            self.state.send_if_modified(|state| {
                let before = *state;
                match observation {
                    PhaseObservation::NotStarted { is_owner } => {
                        if state.presale_started {
                            warn!("ledger reports presale not started after it was observed started");
                        }
                        state.is_owner = is_owner;
                    }
                    // An end implies a start even if the start was never observed.
                    PhaseObservation::Started { ended } => {
                        state.presale_started = true;
                        state.presale_ended |= ended;
                    }
                }
                if *state != before {
                    debug!(
                        seq,
                        started = state.presale_started,
                        ended = state.presale_ended,
                        is_owner = state.is_owner,
                        "sale phase updated"
                    );
                    true
                } else {
                    false
                }
            });
            self.state.borrow().presale_ended
        };
        if ended {
            self.stop_phase_polling();
        }
        PollOutcome::Applied
    }

    fn commit_tokens(&self, seq: u64, minted: u64, cancel: &CancellationToken) -> PollOutcome {
        if cancel.is_cancelled() {
            return PollOutcome::Cancelled;
        }
        let mut committed = self.token_cycles.committed.lock();
        if seq <= *committed {
            self.token_cycles.stale.fetch_add(1, Ordering::Relaxed);
            debug!(seq, latest = *committed, "discarding stale token poll");
            return PollOutcome::Stale;
        }
        *committed = seq;
        self.state.send_if_modified(|state| {
            if state.tokens_minted == minted {
                return false;
            }
            debug!(seq, minted, "minted count updated");
            state.tokens_minted = minted;
            true
        });
        PollOutcome::Applied
    }

    fn report(&self, cadence: Cadence, err: ClientError) -> PollOutcome {
        match &err {
            ClientError::Cancelled => return PollOutcome::Cancelled,
            ClientError::NotConnected => {
                debug!(cadence = cadence.as_str(), "wallet went away, poll skipped");
                return PollOutcome::Skipped;
            }
            ClientError::WrongNetwork { .. } => self.notifier.warning(err.to_string()),
            _ => {
                warn!(cadence = cadence.as_str(), error = %err, "sale poll failed");
                self.notifier.error(err.to_string());
            }
        }
        let cycles = match cadence {
            Cadence::Phase => &self.phase_cycles,
            Cadence::Tokens => &self.token_cycles,
        };
        cycles.failed.fetch_add(1, Ordering::Relaxed);
        PollOutcome::Failed
    }

    /// Ends presale-phase polling. One-way; calling it again does nothing.
    pub fn stop_phase_polling(&self) {
        let stopped = self.lifecycle.send_if_modified(|state| {
            if *state == PollerState::Stopped {
                false
            } else {
                *state = PollerState::Stopped;
                true
            }
        });
        self.phase_stop.cancel();
        if stopped {
            info!("presale ended, phase polling stopped");
        }
    }

    /// Cancels both cadences without waiting for in-flight polls.
    pub fn cancel(&self) {
        self.shutdown.cancel();
        self.tasks.close();
    }

    /// Cancels both cadences and waits for in-flight polls to unwind.
    pub async fn shutdown(&self) {
        self.cancel();
        self.tasks.wait().await;
        debug!("sale polling shut down");
    }
}

async fn until_cancelled<T>(
    cancel: &CancellationToken,
    work: impl Future<Output = ClientResult<T>>,
) -> ClientResult<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ClientError::Cancelled),
        result = work => result,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::ClientConfig;
    use crate::notify::ToastKind;
    use crate::sim::{AccountCase, SimulatedSale, PRESALE_DURATION_SECS};

    fn controller(sale: &SimulatedSale) -> Arc<PhaseController> {
        let config = ClientConfig::default();
        let connection = Arc::new(ConnectionManager::new(
            sale.wallet.clone(),
            sale.wallet.contract_address(),
            config.network.clone(),
        ));
        Arc::new(PhaseController::new(
            connection,
            sale.clock.clone(),
            Notifier::new(),
            config.polling,
        ))
    }

    async fn connected(sale: &SimulatedSale) -> Arc<PhaseController> {
        let controller = controller(sale);
        controller.connection.connect().await.unwrap();
        controller
    }

    #[test]
    fn presale_end_is_inclusive() {
        let end = 1_700_000_300;
        assert!(!presale_has_ended(end, end - 1));
        assert!(presale_has_ended(end, end));
        assert!(presale_has_ended(end, end + 1));
        assert!(!presale_has_ended(0, end));
    }

    #[test]
    fn guard_admits_one_poll_at_a_time() {
        let guard = PollGuard::default();
        let first = guard.try_enter();
        assert!(first.is_some());
        assert!(guard.try_enter().is_none());
        drop(first);
        assert!(guard.try_enter().is_some());
    }

    #[tokio::test]
    async fn owner_detected_before_presale() {
        let sale = SimulatedSale::with_defaults();
        sale.wallet.select_account(sale.owner);
        let controller = connected(&sale).await;
        assert_eq!(controller.poll_phase().await, PollOutcome::Applied);

        let state = controller.snapshot();
        assert!(state.is_owner);
        assert!(!state.presale_started);
    }

    #[tokio::test]
    async fn owner_comparison_ignores_letter_case() {
        let sale = SimulatedSale::with_defaults();
        sale.wallet.select_account(sale.owner);
        sale.wallet.set_account_case(AccountCase::Upper);
        let controller = connected(&sale).await;
        controller.poll_phase().await;
        assert!(controller.snapshot().is_owner);

        sale.wallet.set_account_case(AccountCase::Checksum);
        controller.poll_phase().await;
        assert!(controller.snapshot().is_owner);
    }

    #[tokio::test]
    async fn other_accounts_are_not_owner() {
        let sale = SimulatedSale::with_defaults();
        sale.wallet.select_account(sale.buyers[0]);
        let controller = connected(&sale).await;
        controller.poll_phase().await;
        assert!(!controller.snapshot().is_owner);
    }

    #[tokio::test]
    async fn phase_progresses_with_wall_clock() {
        let sale = SimulatedSale::with_defaults();
        let controller = connected(&sale).await;
        sale.start_presale_directly();

        controller.poll_phase().await;
        let state = controller.snapshot();
        assert!(state.presale_started && !state.presale_ended);

        sale.clock.advance(PRESALE_DURATION_SECS - 1);
        controller.poll_phase().await;
        assert!(!controller.snapshot().presale_ended);

        sale.clock.advance(1);
        controller.poll_phase().await;
        assert!(controller.snapshot().presale_ended);
        assert_eq!(controller.poller_state(), PollerState::Stopped);
    }

    #[tokio::test]
    async fn read_failures_keep_last_known_state() {
        let sale = SimulatedSale::with_defaults();
        let controller = connected(&sale).await;
        let mut toasts = controller.notifier.subscribe();
        sale.start_presale_directly();
        controller.poll_phase().await;
        let before = controller.snapshot();

        sale.clock.advance(PRESALE_DURATION_SECS);
        sale.wallet.fail_next_reads(2);
        assert_eq!(controller.poll_phase().await, PollOutcome::Failed);
        assert_eq!(controller.poll_tokens().await, PollOutcome::Failed);
        assert_eq!(controller.snapshot(), before);
        assert_eq!(toasts.try_recv().unwrap().kind, ToastKind::Error);
        assert_eq!(controller.stats(Cadence::Phase).failed, 1);

        assert_eq!(controller.poll_phase().await, PollOutcome::Applied);
        assert!(controller.snapshot().presale_ended);
    }

    #[tokio::test]
    async fn wrong_network_aborts_cycle_with_warning() {
        let sale = SimulatedSale::with_defaults();
        let controller = connected(&sale).await;
        let mut toasts = controller.notifier.subscribe();
        sale.start_presale_directly();
        sale.wallet.switch_chain(1);
        let reads = sale.wallet.read_calls();

        assert_eq!(controller.poll_phase().await, PollOutcome::Failed);
        assert_eq!(sale.wallet.read_calls(), reads);
        assert!(!controller.snapshot().presale_started);
        let toast = toasts.try_recv().unwrap();
        assert_eq!(toast.kind, ToastKind::Warning);
        assert!(toast.message.contains("rinkeby"));
    }

    #[tokio::test]
    async fn progression_never_regresses() {
        let sale = SimulatedSale::with_defaults();
        let controller = connected(&sale).await;
        let cancel = CancellationToken::new();
        let seq = controller.phase_cycles.begin();
        controller.commit_phase(seq, PhaseObservation::Started { ended: true }, &cancel);
        let seq = controller.phase_cycles.begin();
        controller.commit_phase(seq, PhaseObservation::Started { ended: false }, &cancel);
        let seq = controller.phase_cycles.begin();
        controller.commit_phase(
            seq,
            PhaseObservation::NotStarted { is_owner: false },
            &cancel,
        );

        let state = controller.snapshot();
        assert!(state.presale_started);
        assert!(state.presale_ended);
    }

    #[tokio::test(start_paused = true)]
    async fn superseded_cycle_is_discarded() {
        let sale = SimulatedSale::with_defaults();
        let controller = connected(&sale).await;
        sale.wallet.set_read_latency(Duration::from_secs(10));

        let slow = {
            let controller = Arc::clone(&controller);
            tokio::spawn(async move { controller.poll_tokens().await })
        };
        // Let the slow cycle sample the ledger before it changes.
        tokio::task::yield_now().await;

        sale.start_presale_directly();
        sale.clock.advance(PRESALE_DURATION_SECS);
        sale.mint_directly(sale.buyers[0]);
        sale.wallet.set_read_latency(Duration::from_secs(1));
        assert_eq!(controller.poll_tokens().await, PollOutcome::Applied);
        assert_eq!(controller.snapshot().tokens_minted, 1);

        assert_eq!(slow.await.unwrap(), PollOutcome::Stale);
        assert_eq!(controller.snapshot().tokens_minted, 1);
        assert_eq!(controller.stats(Cadence::Tokens).stale, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn scheduler_waits_for_connection() {
        let sale = SimulatedSale::with_defaults();
        let controller = controller(&sale);
        let _scheduler = controller.spawn();

        time::sleep(Duration::from_secs(12)).await;
        assert_eq!(controller.poller_state(), PollerState::Idle);
        assert_eq!(sale.wallet.read_calls(), 0);

        controller.connection.connect().await.unwrap();
        time::sleep(Duration::from_secs(1)).await;
        assert_eq!(controller.poller_state(), PollerState::Polling);
        assert!(sale.wallet.read_calls() > 0);
        controller.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn overlapping_ticks_are_skipped() {
        let sale = SimulatedSale::with_defaults();
        let controller = controller(&sale);
        sale.wallet.set_read_latency(Duration::from_secs(12));
        controller.connection.connect().await.unwrap();
        let _scheduler = controller.spawn();

        time::sleep(Duration::from_secs(31)).await;
        let tokens = controller.stats(Cadence::Tokens);
        assert!(tokens.skipped_ticks >= 2, "{tokens:?}");
        assert!(tokens.started <= 3, "{tokens:?}");
        assert_eq!(tokens.stale, 0);
        controller.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn phase_polling_stops_but_token_polling_continues() {
        let sale = SimulatedSale::with_defaults();
        let controller = controller(&sale);
        controller.connection.connect().await.unwrap();
        let _scheduler = controller.spawn();
        sale.start_presale_directly();
        sale.clock.advance(PRESALE_DURATION_SECS);

        time::sleep(Duration::from_secs(6)).await;
        assert_eq!(controller.poller_state(), PollerState::Stopped);
        let phase_polls = controller.stats(Cadence::Phase).started;

        sale.mint_directly(sale.buyers[1]);
        time::sleep(Duration::from_secs(11)).await;
        assert_eq!(controller.snapshot().tokens_minted, 1);
        assert_eq!(controller.stats(Cadence::Phase).started, phase_polls);

        // Stopping again is harmless.
        controller.stop_phase_polling();
        assert_eq!(controller.poller_state(), PollerState::Stopped);
        controller.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_clears_both_cadences() {
        let sale = SimulatedSale::with_defaults();
        let controller = controller(&sale);
        controller.connection.connect().await.unwrap();
        let scheduler = controller.spawn();
        time::sleep(Duration::from_secs(11)).await;

        controller.shutdown().await;
        scheduler.await.unwrap();
        let reads = sale.wallet.read_calls();
        time::sleep(Duration::from_secs(30)).await;
        assert_eq!(sale.wallet.read_calls(), reads);
        assert_eq!(controller.poll_tokens().await, PollOutcome::Cancelled);
    }
}

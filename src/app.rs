//! Composition root: wires connection, polling, dispatch and rendering together.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::ClientConfig;
use crate::connection::{Connection, ConnectionManager};
use crate::dispatcher::ActionDispatcher;
use crate::errors::{ClientError, ClientResult};
use crate::notify::{Notification, Notifier};
use crate::phase::PhaseController;
use crate::provider::WalletProvider;
use crate::state::SaleState;
use crate::view::{render, Rendered, UserAction, ViewModel};

pub struct MintClient {
    config: ClientConfig,
    notifier: Notifier,
    connection: Arc<ConnectionManager>,
    phase: Arc<PhaseController>,
    dispatcher: Arc<ActionDispatcher>,
    scheduler: Mutex<Option<JoinHandle<()>>>,
}

impl MintClient {
    pub fn new(
        config: ClientConfig,
        provider: Arc<dyn WalletProvider>,
        clock: Arc<dyn Clock>,
    ) -> ClientResult<Self> {
        config.validate()?;
        let price = config.mint_price_wei()?;
        let notifier = Notifier::new();
        let connection = Arc::new(ConnectionManager::new(
            provider,
            config.contract.address,
            config.network.clone(),
        ));
        let phase = Arc::new(PhaseController::new(
            Arc::clone(&connection),
            clock,
            notifier.clone(),
            config.polling.clone(),
        ));
        let dispatcher = Arc::new(ActionDispatcher::new(
            Arc::clone(&connection),
            Arc::clone(&phase),
            notifier.clone(),
            price,
            config.contract.max_supply,
        ));
        Ok(Self {
            config,
            notifier,
            connection,
            phase,
            dispatcher,
            scheduler: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    pub fn phase(&self) -> &PhaseController {
        &self.phase
    }

    pub fn dispatcher(&self) -> &Arc<ActionDispatcher> {
        &self.dispatcher
    }

    /// Starts the poll scheduler. Must be called from within a tokio runtime; calling it
    /// again is a no-op.
    pub fn start(&self) {
        let mut scheduler = self.scheduler.lock();
        if scheduler.is_none() {
            *scheduler = Some(self.phase.spawn());
            debug!("mint client started");
        }
    }

    pub async fn connect(&self) -> ClientResult<Connection> {
        match self.connection.connect().await {
            Ok(connection) => Ok(connection),
            Err(err) => {
                match &err {
                    ClientError::WrongNetwork { network, .. } => {
                        self.notifier
                            .warning(format!("Change the network to {network}"))
                    }
                    ClientError::UserRejected => self.notifier.info(err.to_string()),
                    _ => self.notifier.error(err.to_string()),
                }
                Err(err)
            }
        }
    }

    /// Runs the interaction a rendered affordance handed back.
    pub async fn handle(&self, action: UserAction) -> ClientResult<()> {
        debug!(?action, "user action");
        match action {
            UserAction::Connect => self.connect().await.map(drop),
            UserAction::StartPresale => self.dispatcher.start_presale().await.map(drop),
            UserAction::PresaleMint => self.dispatcher.presale_mint().await.map(drop),
            UserAction::PublicMint => self.dispatcher.public_mint().await.map(drop),
        }
    }

    pub fn view_model(&self) -> ViewModel {
        ViewModel {
            connected: self.connection.is_connected(),
            pending: self.dispatcher.pending(),
            sale: self.phase.snapshot(),
            max_supply: self.config.contract.max_supply,
        }
    }

    pub fn view(&self) -> Rendered {
        render(&self.view_model())
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SaleState> {
        self.phase.subscribe()
    }

    pub fn subscribe_notifications(&self) -> broadcast::Receiver<Notification> {
        self.notifier.subscribe()
    }

    /// Stops both poll cadences and waits for in-flight polls to unwind.
    pub async fn shutdown(&self) {
        self.phase.shutdown().await;
        let scheduler = self.scheduler.lock().take();
        if let Some(scheduler) = scheduler {
            if let Err(err) = scheduler.await {
                warn!(error = %err, "poll scheduler ended abnormally");
            }
        }
        info!("mint client shut down");
    }
}

impl Drop for MintClient {
    fn drop(&mut self) {
        self.phase.cancel();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::notify::ToastKind;
    use crate::sim::SimulatedSale;
    use crate::state::UiPhase;
    use crate::view::Affordance;

    fn client(sale: &SimulatedSale) -> MintClient {
        let mut config = ClientConfig::default();
        config.contract.address = sale.wallet.contract_address();
        MintClient::new(config, sale.wallet.clone(), sale.clock.clone()).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn connect_then_poll_renders_owner_view() {
        let sale = SimulatedSale::with_defaults();
        let client = client(&sale);
        client.start();
        assert_eq!(client.view().affordance, Affordance::ConnectWallet);

        client.handle(UserAction::Connect).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(client.view().phase, UiPhase::OwnerCanStart);
        client.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn wrong_network_prompts_switch() {
        let sale = SimulatedSale::with_defaults();
        sale.wallet.switch_chain(1);
        let client = client(&sale);
        let mut toasts = client.subscribe_notifications();

        assert!(client.connect().await.unwrap_err().is_wrong_network());
        let toast = toasts.try_recv().unwrap();
        assert_eq!(toast.kind, ToastKind::Warning);
        assert_eq!(toast.message, "Change the network to rinkeby");
        assert_eq!(client.view().affordance, Affordance::ConnectWallet);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_client_stops_polling() {
        let sale = SimulatedSale::with_defaults();
        let client = client(&sale);
        client.start();
        client.connect().await.unwrap();
        tokio::time::sleep(Duration::from_secs(6)).await;
        drop(client);

        tokio::time::sleep(Duration::from_millis(10)).await;
        let reads = sale.wallet.read_calls();
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(sale.wallet.read_calls(), reads);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_joins_the_scheduler() {
        let sale = SimulatedSale::with_defaults();
        let client = client(&sale);
        client.start();
        client.connect().await.unwrap();
        tokio::time::sleep(Duration::from_secs(6)).await;

        client.shutdown().await;
        assert!(client.scheduler.lock().is_none());
        assert!(client.phase().is_shut_down());
        let reads = sale.wallet.read_calls();
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(sale.wallet.read_calls(), reads);

        client.shutdown().await;
    }

    #[test]
    fn invalid_config_is_refused() {
        let sale = SimulatedSale::with_defaults();
        let mut config = ClientConfig::default();
        config.polling.token_interval_ms = 0;
        assert!(matches!(
            MintClient::new(config, sale.wallet.clone(), sale.clock.clone()),
            Err(ClientError::Config(_))
        ));
    }
}

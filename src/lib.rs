//
// Crypto Devs mint client
//

//! Follows a Crypto Devs sale (not started, presale, public) from a connected wallet and
//! submits mints in the right phase.
//!
//! [`MintClient`] wires the pieces together: [`ConnectionManager`] for the wallet session,
//! [`PhaseController`] for polled sale state, [`ActionDispatcher`] for writes and
//! [`view::render`] for what the user is offered. The [`sim`] module provides an in-process
//! ledger and wallet to run all of it against.

pub mod abi;
pub mod app;
pub mod clock;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod errors;
pub mod notify;
pub mod phase;
pub mod provider;
pub mod sim;
pub mod state;
pub mod view;

pub use app::MintClient;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::ClientConfig;
pub use connection::{Connection, ConnectionManager};
pub use dispatcher::ActionDispatcher;
pub use errors::{ClientError, ClientResult};
pub use notify::{Notification, Notifier, ToastKind};
pub use phase::{PhaseController, PollOutcome};
pub use provider::WalletProvider;
pub use state::{ActionKind, PendingAction, PollerState, SaleState, UiPhase};
pub use view::{Affordance, Rendered, UserAction, ViewModel};

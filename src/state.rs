//! Sale state and the phases derived from it.

use std::fmt;

use alloy_primitives::TxHash;

/// Contract state as last observed by the phase controller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SaleState {
    pub presale_started: bool,
    pub presale_ended: bool,
    pub tokens_minted: u64,
    pub is_owner: bool,
}

impl SaleState {
    pub fn is_sold_out(&self, max_supply: u64) -> bool {
        self.tokens_minted >= max_supply
    }
}

/// What the client should offer, derived from state on every render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UiPhase {
    Disconnected,
    /// A write is in flight.
    Loading,
    OwnerCanStart,
    WaitingForPresale,
    PresaleOpen,
    PublicOpen,
    SoldOut,
}

impl UiPhase {
    /// Precedence: disconnected, loading, then sale progress.
    ///
    /// An ended presale is public even if its start was never observed.
    pub fn derive(connected: bool, pending: bool, sale: &SaleState, max_supply: u64) -> Self {
        if !connected {
            return Self::Disconnected;
        }
        if pending {
            return Self::Loading;
        }
        if sale.presale_ended {
            return if sale.is_sold_out(max_supply) {
                Self::SoldOut
            } else {
                Self::PublicOpen
            };
        }
        if !sale.presale_started {
            return if sale.is_owner {
                Self::OwnerCanStart
            } else {
                Self::WaitingForPresale
            };
        }
        if sale.is_sold_out(max_supply) {
            Self::SoldOut
        } else {
            Self::PresaleOpen
        }
    }
}

/// State-changing operations a user can trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    StartPresale,
    PresaleMint,
    PublicMint,
}

impl ActionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::StartPresale => "start presale",
            Self::PresaleMint => "presale mint",
            Self::PublicMint => "public mint",
        }
    }

    pub fn is_payable(self) -> bool {
        !matches!(self, Self::StartPresale)
    }

    /// Client-side gate. Advisory only; the ledger has the final word.
    pub fn permitted_by(self, sale: &SaleState, max_supply: u64) -> bool {
        match self {
            Self::StartPresale => sale.is_owner && !sale.presale_started,
            Self::PresaleMint => {
                sale.presale_started && !sale.presale_ended && !sale.is_sold_out(max_supply)
            }
            Self::PublicMint => {
                sale.presale_started && sale.presale_ended && !sale.is_sold_out(max_supply)
            }
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingStage {
    /// Waiting on the wallet to sign and broadcast.
    Submitting,
    AwaitingConfirmation(TxHash),
}

/// The single write allowed in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingAction {
    pub kind: ActionKind,
    pub stage: PendingStage,
}

/// Lifecycle of the presale-phase cadence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PollerState {
    /// Waiting for the first wallet connection.
    #[default]
    Idle,
    Polling,
    /// Presale end observed; phase polling is over for good.
    Stopped,
}

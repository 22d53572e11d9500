//! Rendering. Pure: everything here is a function of the view model.

use std::fmt;

use crate::state::{PendingAction, PendingStage, SaleState, UiPhase};

/// Everything a render needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewModel {
    pub connected: bool,
    pub pending: Option<PendingAction>,
    pub sale: SaleState,
    pub max_supply: u64,
}

impl ViewModel {
    pub fn phase(&self) -> UiPhase {
        UiPhase::derive(
            self.connected,
            self.pending.is_some(),
            &self.sale,
            self.max_supply,
        )
    }
}

/// Interactions a rendered view can hand back to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UserAction {
    Connect,
    StartPresale,
    PresaleMint,
    PublicMint,
}

/// The one thing the user is offered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Affordance {
    ConnectWallet,
    Loading(Option<PendingAction>),
    StartPresale,
    PresaleNotStarted,
    PresaleMint,
    PublicMint,
    SoldOut,
}

impl Affordance {
    pub fn action(&self) -> Option<UserAction> {
        match self {
            Self::ConnectWallet => Some(UserAction::Connect),
            Self::StartPresale => Some(UserAction::StartPresale),
            Self::PresaleMint => Some(UserAction::PresaleMint),
            Self::PublicMint => Some(UserAction::PublicMint),
            Self::Loading(_) | Self::PresaleNotStarted | Self::SoldOut => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendered {
    pub phase: UiPhase,
    pub headline: String,
    pub affordance: Affordance,
}

pub fn render(model: &ViewModel) -> Rendered {
    let phase = model.phase();
    let affordance = match phase {
        UiPhase::Disconnected => Affordance::ConnectWallet,
        UiPhase::Loading => Affordance::Loading(model.pending),
        UiPhase::OwnerCanStart => Affordance::StartPresale,
        UiPhase::WaitingForPresale => Affordance::PresaleNotStarted,
        UiPhase::PresaleOpen => Affordance::PresaleMint,
        UiPhase::PublicOpen => Affordance::PublicMint,
        UiPhase::SoldOut => Affordance::SoldOut,
    };
    Rendered {
        phase,
        headline: format!(
            "{}/{} have been minted",
            model.sale.tokens_minted, model.max_supply
        ),
        affordance,
    }
}

impl fmt::Display for Rendered {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Welcome to Crypto Devs!")?;
        writeln!(f, "Its an NFT collection for developers in Crypto.")?;
        writeln!(f, "{}", self.headline)?;
        match self.affordance {
            Affordance::ConnectWallet => write!(f, "[ Connect your wallet ]"),
            Affordance::Loading(Some(PendingAction {
                stage: PendingStage::AwaitingConfirmation(hash),
                ..
            })) => write!(f, "Loading... (waiting for {hash})"),
            Affordance::Loading(_) => write!(f, "Loading..."),
            Affordance::StartPresale => write!(f, "[ Start Presale! ]"),
            Affordance::PresaleNotStarted => write!(f, "Presale hasn't started!"),
            Affordance::PresaleMint => {
                writeln!(
                    f,
                    "Presale has started!!! If your address is whitelisted, Mint a Crypto Dev 🥳"
                )?;
                write!(f, "[ Presale Mint 🚀 ]")
            }
            Affordance::PublicMint => write!(f, "[ Public Mint 🚀 ]"),
            Affordance::SoldOut => write!(f, "All Crypto Devs have been minted."),
        }
    }
}

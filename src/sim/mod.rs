//! In-process ledger and wallet for tests and the terminal demo.

mod ledger;
mod wallet;

use std::sync::Arc;

use alloy_primitives::{Address, U256};
use hex_literal::hex;

pub use ledger::{LedgerError, SimulatedLedger, PRESALE_DURATION_SECS};
pub use wallet::{AccountCase, Mining, SimulatedWallet, SIMULATED_CONTRACT};

use crate::abi::mint_price;
use crate::clock::ManualClock;
use crate::config::ClientConfig;
use crate::errors::ClientResult;

/// Wall-clock time the simulated sale opens at.
pub const SALE_EPOCH: u64 = 1_700_000_000;

const DEPLOYER: Address = Address::new(hex!("f39fd6e51aad88f6f4ce6ab8827279cfffb92266"));
const BUYERS: [Address; 3] = [
    Address::new(hex!("70997970c51812dc3a010c7d01b50e0d17dc79c8")),
    Address::new(hex!("3c44cdddb6a900fa2b585dd299e03d12fa4293bc")),
    Address::new(hex!("90f79bf6eb2c4f870365e785982e1f101e93b906")),
];

/// A deployed sale: ledger, wallet and the clock both of them read.
///
/// The wallet holds the deployer (active) and three buyers. The first two buyers are
/// whitelisted for the presale; the third is not.
pub struct SimulatedSale {
    pub clock: Arc<ManualClock>,
    pub wallet: Arc<SimulatedWallet>,
    pub owner: Address,
    pub buyers: Vec<Address>,
}

impl SimulatedSale {
    /// Deploys a sale matching `config`.
    pub fn new(config: &ClientConfig) -> ClientResult<Self> {
        let price = config.mint_price_wei()?;
        Ok(Self::deploy(
            config.contract.max_supply,
            price,
            config.network.chain_id,
        ))
    }

    pub fn with_defaults() -> Self {
        let defaults = ClientConfig::default();
        Self::deploy(
            defaults.contract.max_supply,
            mint_price(),
            defaults.network.chain_id,
        )
    }

    fn deploy(max_supply: u64, price: U256, chain_id: u64) -> Self {
        let clock = Arc::new(ManualClock::new(SALE_EPOCH));
        let mut ledger = SimulatedLedger::new(DEPLOYER, max_supply, price, clock.clone());
        ledger.whitelist(BUYERS[0]);
        ledger.whitelist(BUYERS[1]);

        let mut accounts = vec![DEPLOYER];
        accounts.extend(BUYERS);
        let wallet = Arc::new(SimulatedWallet::new(ledger, chain_id, accounts));
        Self {
            clock,
            wallet,
            owner: DEPLOYER,
            buyers: BUYERS.to_vec(),
        }
    }

    /// Opens the presale on the ledger without going through the wallet.
    pub fn start_presale_directly(&self) {
        let owner = self.owner;
        let started = self.wallet.ledger_mut(|ledger| ledger.start_presale(owner));
        if started.is_err() {
            tracing::debug!("presale was already started");
        }
    }

    /// Mints one token for `to` at the sale price, as another user's transaction would.
    /// Returns the new token id, or `None` if the ledger refused.
    pub fn mint_directly(&self, to: Address) -> Option<u64> {
        self.wallet.ledger_mut(|ledger| {
            let price = ledger.price();
            if ledger.presale_ended() != 0 && ledger.presale_ended() <= ledger.now() {
                ledger.mint(to, price).ok()
            } else {
                ledger.presale_mint(to, price).ok()
            }
        })
    }
}

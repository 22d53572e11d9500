//! In-memory stand-in for the Crypto Devs sale contract.
//!
//! Follows the deployed contract: the owner opens a presale window of fixed length,
//! whitelisted accounts mint during the window, anyone mints after it. Supply and price
//! are fixed at construction.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use alloy_primitives::{Address, Bytes, U256};
use alloy_sol_types::{SolError, SolInterface, SolValue};

use crate::abi::ICryptoDevs::{
    ICryptoDevsCalls, IncorrectPayment, MaxSupplyExceeded, NotWhitelisted,
    OwnableUnauthorizedAccount, PresaleAlreadyStarted, PresaleNotEnded, PresaleNotRunning,
};
use crate::clock::Clock;

/// Presale length set by `startPresale`.
pub const PRESALE_DURATION_SECS: u64 = 5 * 60;

pub enum LedgerError {
    PresaleAlreadyStarted(PresaleAlreadyStarted),
    PresaleNotRunning(PresaleNotRunning),
    PresaleNotEnded(PresaleNotEnded),
    NotWhitelisted(NotWhitelisted),
    MaxSupplyExceeded(MaxSupplyExceeded),
    IncorrectPayment(IncorrectPayment),
    OwnableUnauthorizedAccount(OwnableUnauthorizedAccount),
    /// Call to a non-payable function carried value, or an unknown selector.
    Bare,
}

impl From<LedgerError> for Bytes {
    fn from(err: LedgerError) -> Self {
        let encoded = match err {
            LedgerError::PresaleAlreadyStarted(err) => SolError::abi_encode(&err),
            LedgerError::PresaleNotRunning(err) => SolError::abi_encode(&err),
            LedgerError::PresaleNotEnded(err) => SolError::abi_encode(&err),
            LedgerError::NotWhitelisted(err) => SolError::abi_encode(&err),
            LedgerError::MaxSupplyExceeded(err) => SolError::abi_encode(&err),
            LedgerError::IncorrectPayment(err) => SolError::abi_encode(&err),
            LedgerError::OwnableUnauthorizedAccount(err) => SolError::abi_encode(&err),
            LedgerError::Bare => Vec::new(),
        };
        Bytes::from(encoded)
    }
}

type Result<T, E = LedgerError> = core::result::Result<T, E>;

#[derive(Clone)]
pub struct SimulatedLedger {
    owner: Address,
    max_supply: u64,
    price: U256,
    presale_duration: u64,
    clock: Arc<dyn Clock>,
    whitelist: HashSet<Address>,
    presale_started: bool,
    presale_ended: u64,
    token_ids: u64,
    owners: HashMap<u64, Address>,
    balance: HashMap<Address, u64>,
    collected: U256,
}

impl SimulatedLedger {
    pub fn new(owner: Address, max_supply: u64, price: U256, clock: Arc<dyn Clock>) -> Self {
        Self {
            owner,
            max_supply,
            price,
            presale_duration: PRESALE_DURATION_SECS,
            clock,
            whitelist: HashSet::new(),
            presale_started: false,
            presale_ended: 0,
            token_ids: 0,
            owners: HashMap::new(),
            balance: HashMap::new(),
            collected: U256::ZERO,
        }
    }

    pub fn with_presale_duration(mut self, secs: u64) -> Self {
        self.presale_duration = secs;
        self
    }

    pub fn whitelist(&mut self, account: Address) {
        self.whitelist.insert(account);
    }

    pub fn owner(&self) -> Address {
        self.owner
    }

    pub fn presale_started(&self) -> bool {
        self.presale_started
    }

    pub fn presale_ended(&self) -> u64 {
        self.presale_ended
    }

    pub fn token_ids(&self) -> u64 {
        self.token_ids
    }

    pub fn balance_of(&self, account: Address) -> u64 {
        self.balance.get(&account).copied().unwrap_or_default()
    }

    pub fn owner_of(&self, token_id: u64) -> Option<Address> {
        self.owners.get(&token_id).copied()
    }

    pub fn max_supply(&self) -> u64 {
        self.max_supply
    }

    pub fn price(&self) -> U256 {
        self.price
    }

    /// Ether paid into the contract so far.
    pub fn collected(&self) -> U256 {
        self.collected
    }

    pub fn now(&self) -> u64 {
        self.clock.unix_seconds()
    }

    fn require_owner(&self, sender: Address) -> Result<()> {
        if sender != self.owner {
            return Err(LedgerError::OwnableUnauthorizedAccount(
                OwnableUnauthorizedAccount { account: sender },
            ));
        }
        Ok(())
    }

    pub fn start_presale(&mut self, sender: Address) -> Result<()> {
        self.require_owner(sender)?;
        if self.presale_started {
            return Err(LedgerError::PresaleAlreadyStarted(PresaleAlreadyStarted {}));
        }
        self.presale_started = true;
        self.presale_ended = self.now() + self.presale_duration;
        Ok(())
    }

    pub fn presale_mint(&mut self, sender: Address, value: U256) -> Result<u64> {
        if !self.presale_started || self.now() >= self.presale_ended {
            return Err(LedgerError::PresaleNotRunning(PresaleNotRunning {}));
        }
        if !self.whitelist.contains(&sender) {
            return Err(LedgerError::NotWhitelisted(NotWhitelisted { account: sender }));
        }
        self.mint_to(sender, value)
    }

    pub fn mint(&mut self, sender: Address, value: U256) -> Result<u64> {
        if !self.presale_started || self.now() < self.presale_ended {
            return Err(LedgerError::PresaleNotEnded(PresaleNotEnded {}));
        }
        self.mint_to(sender, value)
    }

    fn mint_to(&mut self, to: Address, value: U256) -> Result<u64> {
        if self.token_ids >= self.max_supply {
            return Err(LedgerError::MaxSupplyExceeded(MaxSupplyExceeded {
                max_supply: U256::from(self.max_supply),
            }));
        }
        if value < self.price {
            return Err(LedgerError::IncorrectPayment(IncorrectPayment {
                sent: value,
                price: self.price,
            }));
        }
        self.token_ids += 1;
        let token_id = self.token_ids;
        self.owners.insert(token_id, to);
        *self.balance.entry(to).or_default() += 1;
        self.collected += value;
        Ok(token_id)
    }

    /// Serves an `eth_call`. Returns ABI-encoded output or revert data.
    pub fn call(&self, data: &[u8]) -> Result<Bytes, Bytes> {
        let call = ICryptoDevsCalls::abi_decode(data, true).map_err(|_| Bytes::new())?;
        let output = match call {
            ICryptoDevsCalls::presaleStarted(_) => self.presale_started.abi_encode(),
            ICryptoDevsCalls::presaleEnded(_) => U256::from(self.presale_ended).abi_encode(),
            ICryptoDevsCalls::tokenIds(_) => U256::from(self.token_ids).abi_encode(),
            ICryptoDevsCalls::owner(_) => self.owner.abi_encode(),
            // A state-changing function called read-only: simulate on a scratch copy.
            _ => {
                return self
                    .clone()
                    .transact(Address::ZERO, U256::ZERO, data)
                    .map(|_| Bytes::new())
            }
        };
        Ok(Bytes::from(output))
    }

    /// Executes a transaction, mutating state only on success.
    pub fn transact(&mut self, sender: Address, value: U256, data: &[u8]) -> Result<(), Bytes> {
        let call = ICryptoDevsCalls::abi_decode(data, true).map_err(|_| Bytes::new())?;
        let payable = matches!(
            call,
            ICryptoDevsCalls::presaleMint(_) | ICryptoDevsCalls::mint(_)
        );
        if !payable && !value.is_zero() {
            return Err(LedgerError::Bare.into());
        }
        let outcome = match call {
            ICryptoDevsCalls::startPresale(_) => self.start_presale(sender),
            ICryptoDevsCalls::presaleMint(_) => self.presale_mint(sender, value).map(drop),
            ICryptoDevsCalls::mint(_) => self.mint(sender, value).map(drop),
            // Views cost gas but change nothing.
            _ => Ok(()),
        };
        outcome.map_err(Bytes::from)
    }

    /// Dry run used by wallets to estimate gas before signing.
    pub fn preflight(&self, sender: Address, value: U256, data: &[u8]) -> Result<(), Bytes> {
        self.clone().transact(sender, value, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::{describe_revert, mint_price, ICryptoDevs};
    use crate::clock::ManualClock;
    use alloy_sol_types::SolCall;

    const START: u64 = 1_700_000_000;

    fn ledger() -> (SimulatedLedger, Arc<ManualClock>, Address, Address) {
        let owner = Address::repeat_byte(1);
        let buyer = Address::repeat_byte(2);
        let clock = Arc::new(ManualClock::new(START));
        let mut ledger = SimulatedLedger::new(owner, 3, mint_price(), clock.clone());
        ledger.whitelist(buyer);
        (ledger, clock, owner, buyer)
    }

    fn revert_of<T>(result: Result<T>) -> String {
        match result {
            Ok(_) => panic!("expected a revert"),
            Err(err) => describe_revert(&Bytes::from(err)),
        }
    }

    #[test]
    fn only_owner_starts_presale_once() {
        let (mut ledger, _clock, owner, buyer) = ledger();
        assert!(revert_of(ledger.start_presale(buyer)).contains("not the contract owner"));
        assert!(ledger.start_presale(owner).is_ok());
        assert!(ledger.presale_started());
        assert_eq!(ledger.presale_ended(), START + PRESALE_DURATION_SECS);
        assert_eq!(
            revert_of(ledger.start_presale(owner)),
            "presale has already started"
        );
    }

    #[test]
    fn presale_mint_needs_running_presale_and_whitelist() {
        let (mut ledger, clock, owner, buyer) = ledger();
        assert_eq!(
            revert_of(ledger.presale_mint(buyer, mint_price())),
            "presale is not running"
        );
        assert!(ledger.start_presale(owner).is_ok());
        assert!(revert_of(ledger.presale_mint(owner, mint_price())).contains("not whitelisted"));
        assert!(revert_of(ledger.presale_mint(buyer, U256::from(1))).contains("not correct"));
        assert_eq!(ledger.presale_mint(buyer, mint_price()).ok(), Some(1));
        assert_eq!(ledger.owner_of(1), Some(buyer));

        clock.advance(PRESALE_DURATION_SECS);
        assert_eq!(
            revert_of(ledger.presale_mint(buyer, mint_price())),
            "presale is not running"
        );
    }

    #[test]
    fn public_mint_opens_at_presale_end() {
        let (mut ledger, clock, owner, _buyer) = ledger();
        let anyone = Address::repeat_byte(9);
        assert!(ledger.start_presale(owner).is_ok());
        clock.advance(PRESALE_DURATION_SECS - 1);
        assert_eq!(
            revert_of(ledger.mint(anyone, mint_price())),
            "presale has not ended yet"
        );
        clock.advance(1);
        assert_eq!(ledger.mint(anyone, mint_price()).ok(), Some(1));
        assert_eq!(ledger.balance_of(anyone), 1);
        assert_eq!(ledger.collected(), mint_price());
    }

    #[test]
    fn supply_is_capped() {
        let (mut ledger, clock, owner, _buyer) = ledger();
        let anyone = Address::repeat_byte(9);
        assert!(ledger.start_presale(owner).is_ok());
        clock.advance(PRESALE_DURATION_SECS);
        for _ in 0..3 {
            ledger.mint(anyone, mint_price()).ok().unwrap();
        }
        assert!(revert_of(ledger.mint(anyone, mint_price())).contains("maximum"));
        assert_eq!(ledger.token_ids(), 3);
    }

    #[test]
    fn calldata_dispatch() {
        let (mut ledger, _clock, owner, _buyer) = ledger();
        let out = ledger
            .call(&ICryptoDevs::ownerCall {}.abi_encode())
            .ok()
            .unwrap();
        let decoded = ICryptoDevs::ownerCall::abi_decode_returns(&out, true).unwrap();
        assert_eq!(decoded._0, owner);

        let start = ICryptoDevs::startPresaleCall {}.abi_encode();
        assert!(ledger.preflight(owner, U256::from(1), &start).is_err());
        assert!(ledger.preflight(owner, U256::ZERO, &start).is_ok());
        assert!(!ledger.presale_started());
        assert!(ledger.transact(owner, U256::ZERO, &start).is_ok());
        assert!(ledger.presale_started());

        assert!(ledger.call(&[0xde, 0xad, 0xbe, 0xef]).is_err());
    }
}

//! Solidity interface of the Crypto Devs sale contract.

use alloy_primitives::U256;
use alloy_sol_types::{sol, Revert, SolError, SolInterface};

sol! {
    interface ICryptoDevs {
        error PresaleAlreadyStarted();
        error PresaleNotRunning();
        error PresaleNotEnded();
        error NotWhitelisted(address account);
        error MaxSupplyExceeded(uint256 max_supply);
        error IncorrectPayment(uint256 sent, uint256 price);
        error OwnableUnauthorizedAccount(address account);

        function presaleStarted() external view returns (bool);
        function presaleEnded() external view returns (uint256);
        function tokenIds() external view returns (uint256);
        function owner() external view returns (address);
        function startPresale() external;
        function presaleMint() external payable;
        function mint() external payable;
    }
}

pub use ICryptoDevs::{ICryptoDevsCalls, ICryptoDevsErrors};

/// Price of one token: 0.01 ether.
pub const MINT_PRICE_WEI: u64 = 10_000_000_000_000_000;

pub fn mint_price() -> U256 {
    U256::from(MINT_PRICE_WEI)
}

/// Clamps a `uint256` read into the `u64` range used by the client state.
pub fn saturating_u64(value: U256) -> u64 {
    u64::try_from(value).unwrap_or(u64::MAX)
}

/// Turns revert data into a message fit for a toast.
pub fn describe_revert(data: &[u8]) -> String {
    if data.is_empty() {
        return "transaction reverted".into();
    }
    if let Ok(err) = ICryptoDevsErrors::abi_decode(data, true) {
        return match err {
            ICryptoDevsErrors::PresaleAlreadyStarted(_) => "presale has already started".into(),
            ICryptoDevsErrors::PresaleNotRunning(_) => "presale is not running".into(),
            ICryptoDevsErrors::PresaleNotEnded(_) => "presale has not ended yet".into(),
            ICryptoDevsErrors::NotWhitelisted(e) => {
                format!("{} is not whitelisted", e.account)
            }
            ICryptoDevsErrors::MaxSupplyExceeded(e) => {
                format!("exceeded maximum Crypto Devs supply of {}", e.max_supply)
            }
            ICryptoDevsErrors::IncorrectPayment(e) => {
                format!("ether sent is not correct: sent {} wei, price {} wei", e.sent, e.price)
            }
            ICryptoDevsErrors::OwnableUnauthorizedAccount(e) => {
                format!("{} is not the contract owner", e.account)
            }
        };
    }
    if let Ok(revert) = Revert::abi_decode(data, true) {
        return revert.reason;
    }
    format!("transaction reverted with data 0x{}", hex::encode(data))
}

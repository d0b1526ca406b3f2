//! Contract bindings
//!
//! Calls are encoded here and submitted through [`super::ChainClient`], so the
//! bindings stay provider-agnostic.

use alloy::primitives::{address, Address, Bytes, U256};
use alloy::sol;
use alloy::sol_types::SolCall;
use eyre::{Result, WrapErr};

use super::ContractCall;

/// LBTC token on Ethereum mainnet.
pub const LBTC_ADDRESS: Address = address!("8236a87084f8b84306f72007f36f2618a5634494");

sol! {
    /// LBTC token: mint from a notarized deposit plus ERC20 surface
    interface ILbtc {
        function mint(bytes calldata payload, bytes calldata proof) external;

        function balanceOf(address account) external view returns (uint256);

        function approve(address spender, uint256 amount) external returns (bool);
    }

    /// Teller that accepts LBTC into the DeFi vault
    interface IVaultTeller {
        function deposit(address depositAsset, uint256 depositAmount, uint256 minimumMint) external returns (uint256 shares);
    }
}

/// Decode a `0x`-prefixed (or bare) hex blob from the deposit service.
pub fn decode_hex_blob(field: &str, raw: &str) -> Result<Bytes> {
    let trimmed = raw.strip_prefix("0x").unwrap_or(raw);
    let bytes = hex::decode(trimmed).wrap_err_with(|| format!("{field} is not valid hex"))?;
    Ok(Bytes::from(bytes))
}

pub fn mint_call(payload: Bytes, proof: Bytes) -> ContractCall {
    let data = ILbtc::mintCall { payload, proof }.abi_encode();
    ContractCall::new("lbtc_mint", LBTC_ADDRESS, data)
}

pub fn approve_call(token: Address, spender: Address, amount: U256) -> ContractCall {
    let data = ILbtc::approveCall { spender, amount }.abi_encode();
    ContractCall::new("erc20_approve", token, data)
}

pub fn balance_of_data(account: Address) -> Bytes {
    Bytes::from(ILbtc::balanceOfCall { account }.abi_encode())
}

pub fn decode_balance(raw: &Bytes) -> Result<U256> {
    let decoded = ILbtc::balanceOfCall::abi_decode_returns(raw, true)
        .wrap_err("Failed to decode balanceOf return data")?;
    Ok(decoded._0)
}

pub fn vault_deposit_call(teller: Address, token: Address, amount: U256) -> ContractCall {
    let data = IVaultTeller::depositCall {
        depositAsset: token,
        depositAmount: amount,
        minimumMint: U256::ZERO,
    }
    .abi_encode();
    ContractCall::new("vault_deposit", teller, data)
}

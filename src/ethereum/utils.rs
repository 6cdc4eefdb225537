use alloy::{
    eips::{BlockId, BlockNumberOrTag},
    primitives::{
        utils::{parse_units, ParseUnits},
        Address, U256,
    },
};
use anyhow::{anyhow, Result};
use std::str::FromStr;

use super::error::BindingError;

/// Validates and normalizes an Ethereum address
pub fn validate_address(address: &str) -> Result<Address> {
    let address = address.trim();

    if address.is_empty() {
        return Err(anyhow!("Address cannot be empty"));
    }

    if !address.starts_with("0x") && !address.starts_with("0X") {
        return Err(anyhow!(
            "Invalid address format: '{}'. Ethereum addresses must start with '0x'",
            address
        ));
    }

    if address.len() != 42 {
        return Err(anyhow!(
            "Invalid address length: '{}'. Ethereum addresses must be exactly 42 characters (0x + 40 hex characters)",
            address
        ));
    }

    let hex_part = &address[2..];
    if !hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(anyhow!(
            "Invalid address format: '{}'. Contains non-hexadecimal characters",
            address
        ));
    }

    Address::from_str(address)
        .map_err(|e| anyhow!("Invalid Ethereum address: '{}'. Error: {}", address, e))
}

/// Validates network name
pub fn validate_network(network: &str, available_networks: &[String]) -> Result<()> {
    if network.is_empty() {
        return Err(anyhow!("Network name cannot be empty"));
    }

    if !available_networks.iter().any(|n| n == network) {
        return Err(anyhow!(
            "Unknown network: '{}'. Available networks: {}",
            network,
            available_networks.join(", ")
        ));
    }

    Ok(())
}

/// Validates a function or event reference: a bare Solidity identifier or a
/// full signature such as `transfer(address,uint256)`.
pub fn validate_member_name(name: &str) -> Result<()> {
    let identifier = match name.split_once('(') {
        Some((identifier, rest)) => {
            if !rest.ends_with(')') {
                return Err(anyhow!(
                    "Invalid signature: '{}'. Expected the form name(type1,type2,...)",
                    name
                ));
            }
            identifier
        }
        None => name,
    };

    let Some(first) = identifier.chars().next() else {
        return Err(anyhow!("Function or event name cannot be empty"));
    };

    if !first.is_ascii_alphabetic() && first != '_' && first != '$' {
        return Err(anyhow!(
            "Invalid name: '{}'. Names must start with a letter or underscore",
            identifier
        ));
    }

    if !identifier
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
    {
        return Err(anyhow!(
            "Invalid name: '{}'. Names can only contain letters, numbers, and underscores",
            identifier
        ));
    }

    Ok(())
}

/// Parses a transaction value: decimal wei, `0x` hex wei, or a decimal
/// amount with a unit suffix (`1.5ether`, `20 gwei`).
pub fn parse_value(value_str: &str) -> Result<U256> {
    let value_str = value_str.trim();
    if value_str.is_empty() {
        return Err(anyhow!("Value cannot be empty"));
    }

    if let Some(hex) = value_str
        .strip_prefix("0x")
        .or_else(|| value_str.strip_prefix("0X"))
    {
        return U256::from_str_radix(hex, 16)
            .map_err(|_| anyhow!("Invalid hexadecimal value: '{}'", value_str));
    }

    for unit in ["ether", "gwei", "wei"] {
        if let Some(amount) = value_str.strip_suffix(unit) {
            let parsed: ParseUnits = parse_units(amount.trim(), unit)
                .map_err(|e| anyhow!("Invalid amount '{}': {}", value_str, e))?;
            return Ok(parsed.get_absolute());
        }
    }

    U256::from_str_radix(value_str, 10).map_err(|_| {
        anyhow!(
            "Invalid numeric value: '{}'. Use decimal wei, '0x' prefixed hex, or a unit such as '1ether'",
            value_str
        )
    })
}

/// Parses a block reference: a tag (`latest`, `pending`, `earliest`, `safe`,
/// `finalized`), a decimal number or a `0x` hex number.
pub fn parse_block_id(block: &str) -> Result<BlockId> {
    let block = block.trim();
    if let Ok(number) = block.parse::<u64>() {
        return Ok(BlockId::number(number));
    }

    BlockNumberOrTag::from_str(block)
        .map(BlockId::from)
        .map_err(|_| anyhow!("Invalid block reference: '{}'", block))
}

/// Validates an inclusive block range
pub fn validate_block_range(from: u64, to: Option<u64>) -> Result<()> {
    match to {
        Some(to) if to < from => Err(anyhow!(
            "Invalid block range: end block {} is before start block {}",
            to,
            from
        )),
        _ => Ok(()),
    }
}

/// Creates user-friendly error messages for common RPC errors
pub fn interpret_rpc_error(error: &str) -> String {
    if error.contains("execution reverted") {
        format!(
            "Transaction failed: The contract function reverted execution. {}",
            if error.contains("revert") {
                "This usually means the function's requirements were not met or an assertion failed."
            } else {
                "Check your parameters and try again."
            }
        )
    } else if error.contains("insufficient funds") {
        "Transaction failed: Insufficient funds to cover gas costs. Make sure your account has enough ETH for gas fees.".to_string()
    } else if error.contains("gas required exceeds allowance") {
        "Transaction failed: Gas limit too low. Try increasing the gas limit for this transaction."
            .to_string()
    } else if error.contains("nonce too low") {
        "Transaction failed: Nonce too low. This usually means another transaction was already mined with this nonce.".to_string()
    } else if error.contains("replacement transaction underpriced") {
        "Transaction failed: Gas price too low to replace pending transaction. Increase the gas price.".to_string()
    } else if error.contains("connection refused") || error.contains("network unreachable") {
        "Network error: Cannot connect to RPC endpoint. Check your internet connection and RPC URL configuration.".to_string()
    } else if error.contains("timeout") {
        "Network error: Request timed out. The RPC endpoint may be overloaded or unreachable."
            .to_string()
    } else if error.contains("rate limit") {
        "Rate limit error: Too many requests to the RPC endpoint. Try again in a few moments or use a different endpoint.".to_string()
    } else if error.contains("method not found") {
        "RPC error: The requested method is not supported by this RPC endpoint. Try using a different endpoint.".to_string()
    } else {
        format!("RPC error: {}", error)
    }
}

/// Creates user-friendly error messages for ABI-related errors
pub fn interpret_abi_error(error: &str, contract_address: &str) -> String {
    if error.contains("404") || error.contains("not verified") {
        format!(
            "Contract verification not found: The contract at {} is not verified on Etherscan. Pass --abi with a local ABI or artifact file instead.",
            contract_address
        )
    } else if error.contains("rate limit") || error.contains("429") {
        "API rate limit: Too many requests to Etherscan API. Try again in a few moments or provide your own ETHERSCAN_API_KEY.".to_string()
    } else if error.contains("invalid API key") || error.contains("403") {
        "API authentication error: Invalid Etherscan API key. Check your ETHERSCAN_API_KEY environment variable.".to_string()
    } else if error.contains("network") || error.contains("connection") {
        "Network error: Cannot connect to Etherscan API. Check your internet connection."
            .to_string()
    } else if error.contains("timeout") {
        "Timeout error: Request to Etherscan API timed out. Try again in a few moments.".to_string()
    } else {
        format!("ABI resolution error: {}", error)
    }
}

/// A user-facing description of a binding failure.
pub fn describe_error(err: &BindingError) -> String {
    match err {
        BindingError::Transport(e) => interpret_rpc_error(&format!("{:#}", e)),
        BindingError::Subscription(message) => {
            format!("Live feed stopped: {}", interpret_rpc_error(message))
        }
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_address() {
        assert!(validate_address("0x742d35Cc6435C9c1c72c5E7b18BaB7e1DB7a5d6e").is_ok());
        assert!(validate_address("0x0000000000000000000000000000000000000000").is_ok());

        assert!(validate_address("").is_err());
        assert!(validate_address("not_an_address").is_err());
        assert!(validate_address("0x123").is_err()); // Too short
        assert!(validate_address("742d35Cc6435C9c1c72c5E7b18BaB7e1DB7a5d6e").is_err()); // Missing 0x
        assert!(validate_address("0xgg2d35Cc6435C9c1c72c5E7b18BaB7e1DB7a5d6e").is_err());
    }

    #[test]
    fn test_validate_network() {
        let networks = vec!["ethereum".to_string(), "sepolia".to_string()];

        assert!(validate_network("ethereum", &networks).is_ok());
        assert!(validate_network("sepolia", &networks).is_ok());
        assert!(validate_network("invalid", &networks).is_err());
        assert!(validate_network("", &networks).is_err());
    }

    #[test]
    fn test_validate_member_name() {
        assert!(validate_member_name("setMessage").is_ok());
        assert!(validate_member_name("_lastSeen").is_ok());
        assert!(validate_member_name("getMetas(uint256,uint256)").is_ok());

        assert!(validate_member_name("").is_err());
        assert!(validate_member_name("123invalid").is_err());
        assert!(validate_member_name("invalid-name").is_err());
        assert!(validate_member_name("getMetas(uint256").is_err());
    }

    #[test]
    fn test_parse_value() {
        assert_eq!(parse_value("1000").unwrap(), U256::from(1000));
        assert_eq!(parse_value("0x10").unwrap(), U256::from(16));
        assert_eq!(parse_value("2gwei").unwrap(), U256::from(2_000_000_000u64));
        assert_eq!(
            parse_value("1.5 ether").unwrap(),
            U256::from(1_500_000_000_000_000_000u128)
        );
        assert!(parse_value("").is_err());
        assert!(parse_value("lots").is_err());
    }

    #[test]
    fn test_parse_block_id() {
        assert_eq!(parse_block_id("latest").unwrap(), BlockId::latest());
        assert_eq!(parse_block_id("pending").unwrap(), BlockId::pending());
        assert_eq!(parse_block_id("1234").unwrap(), BlockId::number(1234));
        assert_eq!(parse_block_id("0x10").unwrap(), BlockId::number(16));
        assert!(parse_block_id("tomorrow").is_err());
    }

    #[test]
    fn test_validate_block_range() {
        assert!(validate_block_range(5, Some(5)).is_ok());
        assert!(validate_block_range(5, None).is_ok());
        assert!(validate_block_range(6, Some(5)).is_err());
    }

    #[test]
    fn test_describe_error() {
        let err = BindingError::transport(anyhow!("insufficient funds for gas * price + value"));
        assert!(describe_error(&err).contains("Insufficient funds"));
        assert_eq!(
            describe_error(&BindingError::NoDeployCode),
            BindingError::NoDeployCode.to_string()
        );
    }
}

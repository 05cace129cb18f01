//! Contract ABIs
//!
//! Signatures are kept in human-readable form; selectors and argument order
//! must match the deployed contracts exactly.

use ethers::abi::{parse_abi, Abi, Event, Function, RawLog, Token};
use ethers::types::{Bytes, Log, H256};
use once_cell::sync::OnceCell;

use super::ChainError;

/// ERC-20 subset used for approvals and balances
pub const ERC20_SIGNATURES: &[&str] = &[
    "function approve(address spender, uint256 amount) external returns (bool)",
    "function balanceOf(address account) external view returns (uint256)",
    "function decimals() external view returns (uint8)",
    "event Transfer(address indexed from, address indexed to, uint256 value)",
];

/// Unified bridge on the source chain
pub const BRIDGE_SIGNATURES: &[&str] = &[
    "function bridgeAsset(uint32 destinationNetwork, address destinationAddress, uint256 amount, address token, bool forceUpdateGlobalExitRoot, bytes permitData) external",
    "function claimAsset(bytes32[32] smtProofLocalExitRoot, bytes32[32] smtProofRollupExitRoot, uint256 globalIndex, bytes32 mainnetExitRoot, bytes32 rollupExitRoot, uint32 originNetwork, address originTokenAddress, uint32 destinationNetwork, address destinationAddress, uint256 amount, bytes metadata) external",
    "event BridgeEvent(uint8 leafType, uint32 originNetwork, address originAddress, uint32 destinationNetwork, address destinationAddress, uint256 amount, bytes metadata, uint32 depositCount)",
];

/// Vault-bridge: native deposit + bridge in one call
pub const VAULT_BRIDGE_SIGNATURES: &[&str] = &[
    "function depositGasTokenAndBridge(address destinationAddress, uint32 destinationNetworkId, bool forceUpdateGlobalExitRoot) external",
];

/// Vault contract on the destination chain
pub const VAULT_SIGNATURES: &[&str] = &[
    "function requestWithdraw(uint256 amount, uint32 destinationNetwork, address destinationAddress, address token, bool forceUpdateGlobalExitRoot, bytes permitData) external",
    "function ADMIN_ADDRESS() external view returns (address)",
    "function VAULT_ADDRESS() external view returns (address)",
    "function WETH_ADDRESS() external view returns (address)",
    "function BRIDGE_ADDRESS() external view returns (address)",
    "function checkBalance(address user) external view returns (uint256)",
];

/// Claim recipient that forwards claimed funds into the vault
pub const PAYOUT_SIGNATURES: &[&str] = &[
    "function executeToVault(uint256 amount, address user) external",
    "function wrapEthToWeth() external",
];

/// Operator claim entry point
pub const BANK_SIGNATURES: &[&str] = &[
    "function claimAndRedeem(bytes32[32] smtProofLocalExitRoot, bytes32[32] smtProofRollupExitRoot, uint256 globalIndex, bytes32 mainnetExitRoot, bytes32 rollupExitRoot, address destinationAddress, uint256 amount, address originTokenAddress, bytes metadata) external",
];

fn cached(cell: &'static OnceCell<Abi>, signatures: &[&str]) -> Result<&'static Abi, ChainError> {
    cell.get_or_try_init(|| parse_abi(signatures).map_err(|e| ChainError::Abi(e.to_string())))
}

pub fn erc20() -> Result<&'static Abi, ChainError> {
    static CELL: OnceCell<Abi> = OnceCell::new();
    cached(&CELL, ERC20_SIGNATURES)
}

pub fn bridge() -> Result<&'static Abi, ChainError> {
    static CELL: OnceCell<Abi> = OnceCell::new();
    cached(&CELL, BRIDGE_SIGNATURES)
}

pub fn vault_bridge() -> Result<&'static Abi, ChainError> {
    static CELL: OnceCell<Abi> = OnceCell::new();
    cached(&CELL, VAULT_BRIDGE_SIGNATURES)
}

pub fn vault() -> Result<&'static Abi, ChainError> {
    static CELL: OnceCell<Abi> = OnceCell::new();
    cached(&CELL, VAULT_SIGNATURES)
}

pub fn payout() -> Result<&'static Abi, ChainError> {
    static CELL: OnceCell<Abi> = OnceCell::new();
    cached(&CELL, PAYOUT_SIGNATURES)
}

pub fn bank() -> Result<&'static Abi, ChainError> {
    static CELL: OnceCell<Abi> = OnceCell::new();
    cached(&CELL, BANK_SIGNATURES)
}

pub fn function<'a>(abi: &'a Abi, name: &str) -> Result<&'a Function, ChainError> {
    abi.function(name)
        .map_err(|e| ChainError::Abi(format!("Unknown function {}: {}", name, e)))
}

pub fn event<'a>(abi: &'a Abi, name: &str) -> Result<&'a Event, ChainError> {
    abi.event(name)
        .map_err(|e| ChainError::Abi(format!("Unknown event {}: {}", name, e)))
}

/// 4-byte selector of a function
pub fn selector(abi: &Abi, name: &str) -> Result<[u8; 4], ChainError> {
    Ok(function(abi, name)?.short_signature())
}

/// Encode calldata (selector + arguments)
pub fn encode_call(abi: &Abi, name: &str, args: &[Token]) -> Result<Bytes, ChainError> {
    let data = function(abi, name)?
        .encode_input(args)
        .map_err(|e| ChainError::Abi(format!("Failed to encode {}: {}", name, e)))?;
    Ok(Bytes::from(data))
}

/// Decode the return data of a call
pub fn decode_output(abi: &Abi, name: &str, data: &[u8]) -> Result<Vec<Token>, ChainError> {
    function(abi, name)?
        .decode_output(data)
        .map_err(|e| ChainError::Abi(format!("Failed to decode {} output: {}", name, e)))
}

/// Decode calldata of `name`. Returns `Ok(None)` when the selector belongs to another function.
pub fn decode_call(abi: &Abi, name: &str, input: &[u8]) -> Result<Option<Vec<Token>>, ChainError> {
    let function = function(abi, name)?;
    if input.len() < 4 || input[..4] != function.short_signature() {
        return Ok(None);
    }
    function
        .decode_input(&input[4..])
        .map(Some)
        .map_err(|e| ChainError::Abi(format!("Failed to decode {} input: {}", name, e)))
}

/// Decode a receipt log against `event`, skipping logs with another topic0
pub fn decode_log(event: &Event, log: &Log) -> Option<ethers::abi::Log> {
    if log.topics.first() != Some(&event.signature()) {
        return None;
    }
    event
        .parse_log(RawLog {
            topics: log.topics.clone(),
            data: log.data.to_vec(),
        })
        .ok()
}

/// Topic0 of `BridgeEvent`
pub fn bridge_event_topic() -> Result<H256, ChainError> {
    Ok(event(bridge()?, "BridgeEvent")?.signature())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::types::{Address, U256};
    use ethers::utils::{hex, id};

    #[test]
    fn test_all_abis_parse() {
        assert!(erc20().is_ok());
        assert!(bridge().is_ok());
        assert!(vault_bridge().is_ok());
        assert!(vault().is_ok());
        assert!(payout().is_ok());
        assert!(bank().is_ok());
    }

    #[test]
    fn test_known_selectors() {
        let erc20 = erc20().unwrap();
        assert_eq!(hex::encode(selector(erc20, "approve").unwrap()), "095ea7b3");
        assert_eq!(hex::encode(selector(erc20, "balanceOf").unwrap()), "70a08231");
        assert_eq!(hex::encode(selector(erc20, "decimals").unwrap()), "313ce567");
    }

    #[test]
    fn test_selectors_match_canonical_signatures() {
        let cases = [
            (bridge().unwrap(), "bridgeAsset", "bridgeAsset(uint32,address,uint256,address,bool,bytes)"),
            (
                bridge().unwrap(),
                "claimAsset",
                "claimAsset(bytes32[32],bytes32[32],uint256,bytes32,bytes32,uint32,address,uint32,address,uint256,bytes)",
            ),
            (
                vault_bridge().unwrap(),
                "depositGasTokenAndBridge",
                "depositGasTokenAndBridge(address,uint32,bool)",
            ),
            (
                vault().unwrap(),
                "requestWithdraw",
                "requestWithdraw(uint256,uint32,address,address,bool,bytes)",
            ),
            (vault().unwrap(), "ADMIN_ADDRESS", "ADMIN_ADDRESS()"),
            (vault().unwrap(), "checkBalance", "checkBalance(address)"),
            (payout().unwrap(), "executeToVault", "executeToVault(uint256,address)"),
            (
                bank().unwrap(),
                "claimAndRedeem",
                "claimAndRedeem(bytes32[32],bytes32[32],uint256,bytes32,bytes32,address,uint256,address,bytes)",
            ),
        ];

        for (abi, name, canonical) in cases {
            let expected = &id(canonical)[..4];
            assert_eq!(&selector(abi, name).unwrap()[..], expected, "{}", canonical);
        }
    }

    #[test]
    fn test_bridge_event_topic() {
        assert_eq!(
            format!("{:?}", bridge_event_topic().unwrap()),
            "0x501781209a1f8899323b96b4ef08b168df93e0a90c673d1e4cce39366cb62f9b"
        );
    }

    #[test]
    fn test_decode_call_checks_selector() {
        let erc20 = erc20().unwrap();
        let spender = Address::repeat_byte(0x11);
        let data = encode_call(
            erc20,
            "approve",
            &[Token::Address(spender), Token::Uint(U256::from(5u64))],
        )
        .unwrap();

        let decoded = decode_call(erc20, "approve", &data).unwrap().unwrap();
        assert_eq!(decoded[0], Token::Address(spender));
        assert!(decode_call(erc20, "balanceOf", &data).unwrap().is_none());
        assert!(decode_call(erc20, "approve", &[0x09]).unwrap().is_none());
    }
}

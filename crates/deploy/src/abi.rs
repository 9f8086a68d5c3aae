//! Calldata for the handful of contract methods the orchestrator calls itself.

use alloy_core::dyn_abi::{DynSolType, DynSolValue};
use alloy_core::primitives::{Address, Bytes, U256, keccak256};

use crate::error::{DeployError, Result};

/// `ProxyAdmin.owner()`.
pub const OWNER: &str = "owner()";
/// `ProxyAdmin.upgrade(proxy, implementation)`.
pub const UPGRADE: &str = "upgrade(address,address)";
/// `Registry.addVersion(modules, governor, compatibility, note)`.
pub const ADD_VERSION: &str = "addVersion(address[],address,uint256,string)";
/// `Registry.getVersionCount()`.
pub const VERSION_COUNT: &str = "getVersionCount()";

/// First four bytes of the keccak hash of a canonical signature.
pub fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

/// Encode a call: selector followed by the ABI-encoded arguments.
pub fn encode_call(signature: &str, args: Vec<DynSolValue>) -> Bytes {
    let mut data = selector(signature).to_vec();
    data.extend(DynSolValue::Tuple(args).abi_encode_params());
    data.into()
}

/// ABI-encode constructor arguments (no selector).
pub fn encode_args(args: &[DynSolValue]) -> Vec<u8> {
    if args.is_empty() {
        return Vec::new();
    }
    DynSolValue::Tuple(args.to_vec()).abi_encode_params()
}

/// Whether `data` is a call to `signature`.
pub fn is_call_to(data: &[u8], signature: &str) -> bool {
    data.len() >= 4 && data[..4] == selector(signature)
}

/// Decode the arguments of a call to a method taking `types`.
pub fn decode_call_args(data: &[u8], types: Vec<DynSolType>) -> Result<Vec<DynSolValue>> {
    if data.len() < 4 {
        return Err(DeployError::config("calldata is shorter than a selector"));
    }
    decode_values(&data[4..], types)
}

/// Decode a single returned `address`.
pub fn decode_address(data: &[u8]) -> Result<Address> {
    match decode_values(data, vec![DynSolType::Address])?.as_slice() {
        [DynSolValue::Address(address)] => Ok(*address),
        other => Err(DeployError::config(format!("expected an address, got {other:?}"))),
    }
}

/// Decode a single returned `uint256`.
pub fn decode_uint(data: &[u8]) -> Result<U256> {
    match decode_values(data, vec![DynSolType::Uint(256)])?.as_slice() {
        [DynSolValue::Uint(value, _)] => Ok(*value),
        other => Err(DeployError::config(format!("expected a uint256, got {other:?}"))),
    }
}

/// Encode return values the way a contract would.
pub fn encode_return(values: Vec<DynSolValue>) -> Bytes {
    DynSolValue::Tuple(values).abi_encode_params().into()
}

fn decode_values(data: &[u8], types: Vec<DynSolType>) -> Result<Vec<DynSolValue>> {
    let decoded = DynSolType::Tuple(types)
        .abi_decode_params(data)
        .map_err(|e| DeployError::config(format!("malformed ABI data: {e}")))?;

    match decoded {
        DynSolValue::Tuple(values) => Ok(values),
        other => Ok(vec![other]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_selectors() {
        // transfer(address,uint256)
        assert_eq!(selector("transfer(address,uint256)"), [0xa9, 0x05, 0x9c, 0xbb]);
        // owner()
        assert_eq!(selector(OWNER), [0x8d, 0xa5, 0xcb, 0x5b]);
    }

    #[test]
    fn test_call_args_decode() {
        let proxy = Address::repeat_byte(0x01);
        let implementation = Address::repeat_byte(0x02);
        let data = encode_call(
            UPGRADE,
            vec![DynSolValue::Address(proxy), DynSolValue::Address(implementation)],
        );

        assert!(is_call_to(&data, UPGRADE));
        assert!(!is_call_to(&data, ADD_VERSION));

        let args = decode_call_args(&data, vec![DynSolType::Address, DynSolType::Address]).unwrap();
        assert_eq!(
            args,
            vec![DynSolValue::Address(proxy), DynSolValue::Address(implementation)]
        );
    }

    #[test]
    fn test_return_values() {
        let owner = Address::repeat_byte(0x42);
        let data = encode_return(vec![DynSolValue::Address(owner)]);
        assert_eq!(decode_address(&data).unwrap(), owner);

        let data = encode_return(vec![DynSolValue::Uint(U256::from(7u64), 256)]);
        assert_eq!(decode_uint(&data).unwrap(), U256::from(7u64));
    }

    #[test]
    fn test_empty_constructor_args() {
        assert!(encode_args(&[]).is_empty());
        assert_eq!(encode_args(&[DynSolValue::Bool(true)]).len(), 32);
    }

    #[test]
    fn test_truncated_return_is_rejected() {
        assert!(decode_address(&[0u8; 4]).is_err());
    }
}

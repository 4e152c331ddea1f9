use bytes::Bytes;
use ethereum_types::{Address, U256};
use keccak_hash::keccak;
use serde::{Deserialize, Serialize};

use crate::errors::CalldataEncodeError;

/// Struct representing the possible solidity types for function arguments
/// - `Uint` -> `uint256`
/// - `Address` -> `address`
/// - `Bool` -> `bool`
/// - `Bytes` -> `bytes`
/// - `String` -> `string`
/// - `Array` -> `T[]`
/// - `Tuple` -> `(X_1, ..., X_k)`
/// - `FixedBytes` -> `bytesN`
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
pub enum Value {
    Address(Address),
    Uint(U256),
    Int(U256),
    Bool(bool),
    Bytes(Bytes),
    String(String),
    Array(Vec<Value>),
    Tuple(Vec<Value>),
    FixedBytes(Bytes),
}

/// Encodes a function call as selector + ABI-encoded arguments.
///
/// `signature` is the canonical solidity signature, e.g.
/// `setDungeonMaster(address)`. The argument count is checked against the
/// signature; argument types are trusted from the `Value` tags.
pub fn encode_calldata(signature: &str, values: &[Value]) -> Result<Vec<u8>, CalldataEncodeError> {
    let expected_args = count_signature_params(signature)?;
    if expected_args != values.len() {
        return Err(CalldataEncodeError::WrongArgumentLength(format!(
            "{signature} expects {expected_args} arguments, got {}",
            values.len()
        )));
    }

    let mut calldata = compute_function_selector(signature).to_vec();
    calldata.extend_from_slice(&encode_values(values)?);
    Ok(calldata)
}

/// ABI-encodes constructor arguments, which are appended to init code
/// without a selector.
pub fn encode_constructor_args(values: &[Value]) -> Result<Vec<u8>, CalldataEncodeError> {
    encode_values(values)
}

/// First four bytes of the keccak hash of the canonical signature.
pub fn compute_function_selector(signature: &str) -> [u8; 4] {
    let hash = keccak(signature.as_bytes());
    let mut selector = [0u8; 4];
    selector.copy_from_slice(&hash.as_bytes()[..4]);
    selector
}

fn count_signature_params(signature: &str) -> Result<usize, CalldataEncodeError> {
    let open = signature
        .find('(')
        .ok_or_else(|| CalldataEncodeError::ParseError(signature.to_string()))?;
    let inner = signature
        .get(open + 1..signature.len().saturating_sub(1))
        .ok_or_else(|| CalldataEncodeError::ParseError(signature.to_string()))?;
    if !signature.ends_with(')') {
        return Err(CalldataEncodeError::ParseError(signature.to_string()));
    }
    if inner.is_empty() {
        return Ok(0);
    }
    // Top-level commas only; tuples and fixed arrays nest.
    let mut depth = 0usize;
    let mut count = 1usize;
    for c in inner.chars() {
        match c {
            '(' | '[' => depth += 1,
            ')' | ']' => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| CalldataEncodeError::ParseError(signature.to_string()))?
            }
            ',' if depth == 0 => count += 1,
            _ => {}
        }
    }
    Ok(count)
}

fn is_dynamic(value: &Value) -> bool {
    match value {
        Value::Bytes(_) | Value::String(_) | Value::Array(_) => true,
        Value::Tuple(values) => values.iter().any(is_dynamic),
        _ => false,
    }
}

fn static_size(value: &Value) -> usize {
    match value {
        Value::Tuple(values) if !is_dynamic(value) => values.iter().map(static_size).sum(),
        _ => 32,
    }
}

/// Head/tail ABI encoding of an argument list.
fn encode_values(values: &[Value]) -> Result<Vec<u8>, CalldataEncodeError> {
    let head_size: usize = values
        .iter()
        .map(|value| {
            if is_dynamic(value) {
                32
            } else {
                static_size(value)
            }
        })
        .sum();

    let mut head = Vec::new();
    let mut tail = Vec::new();
    for value in values {
        if is_dynamic(value) {
            head.extend_from_slice(&encode_word(U256::from(head_size + tail.len())));
            tail.extend_from_slice(&encode_dynamic(value)?);
        } else {
            head.extend_from_slice(&encode_static(value)?);
        }
    }
    head.extend_from_slice(&tail);
    Ok(head)
}

fn encode_word(value: U256) -> [u8; 32] {
    value.to_big_endian()
}

fn encode_static(value: &Value) -> Result<Vec<u8>, CalldataEncodeError> {
    match value {
        Value::Address(address) => {
            let mut word = [0u8; 32];
            word[12..].copy_from_slice(address.as_bytes());
            Ok(word.to_vec())
        }
        Value::Uint(value) | Value::Int(value) => Ok(encode_word(*value).to_vec()),
        Value::Bool(value) => Ok(encode_word(U256::from(u8::from(*value))).to_vec()),
        Value::FixedBytes(bytes) => {
            if bytes.len() > 32 {
                return Err(CalldataEncodeError::WrongArgumentLength(format!(
                    "bytes{} exceeds a single word",
                    bytes.len()
                )));
            }
            let mut word = [0u8; 32];
            word[..bytes.len()].copy_from_slice(bytes);
            Ok(word.to_vec())
        }
        Value::Tuple(values) => {
            let mut encoded = Vec::new();
            for value in values {
                encoded.extend_from_slice(&encode_static(value)?);
            }
            Ok(encoded)
        }
        Value::Bytes(_) | Value::String(_) | Value::Array(_) => {
            Err(CalldataEncodeError::InternalError)
        }
    }
}

fn encode_dynamic(value: &Value) -> Result<Vec<u8>, CalldataEncodeError> {
    match value {
        Value::Bytes(bytes) => Ok(encode_length_prefixed(bytes)),
        Value::String(string) => Ok(encode_length_prefixed(string.as_bytes())),
        Value::Array(values) => {
            let mut encoded = encode_word(U256::from(values.len())).to_vec();
            encoded.extend_from_slice(&encode_values(values)?);
            Ok(encoded)
        }
        Value::Tuple(values) => encode_values(values),
        _ => Err(CalldataEncodeError::InternalError),
    }
}

fn encode_length_prefixed(data: &[u8]) -> Vec<u8> {
    let mut encoded = encode_word(U256::from(data.len())).to_vec();
    encoded.extend_from_slice(data);
    let padding = (32 - data.len() % 32) % 32;
    encoded.extend_from_slice(&vec![0u8; padding]);
    encoded
}

/// Parses the 32-byte word an address getter returns via `eth_call`.
pub fn decode_address_word(response: &str) -> Result<Address, CalldataEncodeError> {
    let hex_data = response
        .strip_prefix("0x")
        .ok_or_else(|| CalldataEncodeError::ParseError(response.to_string()))?;
    if hex_data.len() != 64 {
        return Err(CalldataEncodeError::ParseError(format!(
            "expected a 32-byte return word, got {} hex chars",
            hex_data.len()
        )));
    }
    let bytes =
        hex::decode(hex_data).map_err(|_| CalldataEncodeError::ParseError(response.to_string()))?;
    Ok(Address::from_slice(&bytes[12..]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn known_selectors() {
        assert_eq!(
            compute_function_selector("transfer(address,uint256)"),
            [0xa9, 0x05, 0x9c, 0xbb]
        );
        assert_eq!(
            compute_function_selector("owner()"),
            [0x8d, 0xa5, 0xcb, 0x5b]
        );
        assert_eq!(
            compute_function_selector("balanceOf(address)"),
            [0x70, 0xa0, 0x82, 0x31]
        );
    }

    #[test]
    fn encodes_address_and_uint() {
        let to = Address::from_str("0x000000000000000000000000000000000000beef").unwrap();
        let calldata = encode_calldata(
            "transfer(address,uint256)",
            &[Value::Address(to), Value::Uint(U256::from(1000))],
        )
        .unwrap();

        assert_eq!(calldata.len(), 4 + 32 + 32);
        assert_eq!(&calldata[..4], &[0xa9, 0x05, 0x9c, 0xbb]);
        assert_eq!(&calldata[16..36], to.as_bytes());
        assert_eq!(calldata[67], 0xe8);
        assert_eq!(calldata[66], 0x03);
    }

    #[test]
    fn encodes_dynamic_string() {
        let calldata =
            encode_calldata("setBaseURI(string)", &[Value::String("ipfs://x".into())]).unwrap();

        // selector + offset word + length word + one padded data word
        assert_eq!(calldata.len(), 4 + 32 + 32 + 32);
        assert_eq!(calldata[35], 0x20);
        assert_eq!(calldata[67], 8);
        assert_eq!(&calldata[68..76], b"ipfs://x");
    }

    #[test]
    fn rejects_wrong_argument_count() {
        let err = encode_calldata("owner()", &[Value::Bool(true)]).unwrap_err();
        assert!(matches!(err, CalldataEncodeError::WrongArgumentLength(_)));
    }

    #[test]
    fn decodes_address_return_word() {
        let word = "0x000000000000000000000000000000000000000000000000000000000000beef";
        let address = decode_address_word(word).unwrap();
        assert_eq!(
            address,
            Address::from_str("0x000000000000000000000000000000000000beef").unwrap()
        );
        assert!(decode_address_word("0x1234").is_err());
    }
}

use ethereum_types::U256;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::EthClientError;

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RpcRequestId {
    Number(u64),
    String(String),
}

#[derive(Serialize, Deserialize, Debug)]
pub struct RpcRequest {
    pub id: RpcRequestId,
    pub jsonrpc: String,
    pub method: String,
    pub params: Option<Vec<Value>>,
}

impl RpcRequest {
    pub fn new(method: &str, params: Option<Vec<Value>>) -> Self {
        RpcRequest {
            id: RpcRequestId::Number(1),
            jsonrpc: "2.0".to_string(),
            method: method.to_string(),
            params,
        }
    }
}

#[derive(Serialize, Deserialize, Debug)]
pub struct RpcErrorMetadata {
    pub code: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    pub message: String,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct RpcSuccessResponse {
    pub id: RpcRequestId,
    pub jsonrpc: String,
    pub result: Value,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct RpcErrorResponse {
    pub id: RpcRequestId,
    pub jsonrpc: String,
    pub error: RpcErrorMetadata,
}

/// Decodes the reason string out of `Error(String)` revert data.
pub fn get_message_from_revert_data(data: &str) -> Result<String, EthClientError> {
    if data == "0x" {
        Ok("Execution reverted without a reason string.".to_owned())
    // 4 byte function signature 0xXXXXXXXX
    } else if data.len() == 10 {
        Ok(data.to_owned())
    } else {
        let abi_decoded_error_data =
            hex::decode(data.strip_prefix("0x").ok_or(EthClientError::Custom(
                "Failed to strip_prefix when getting message from revert data".to_owned(),
            ))?)
            .map_err(|_| {
                EthClientError::Custom(
                    "Failed to hex::decode when getting message from revert data".to_owned(),
                )
            })?;
        let string_length = U256::from_big_endian(abi_decoded_error_data.get(36..68).ok_or(
            EthClientError::Custom(
                "Failed to slice index abi_decoded_error_data when getting message from revert data"
                    .to_owned(),
            ),
        )?);
        let string_len = if string_length > usize::MAX.into() {
            return Err(EthClientError::Custom(
                "Failed to convert string_length to usize when getting message from revert data"
                    .to_owned(),
            ));
        } else {
            string_length.as_usize()
        };
        let string_data = abi_decoded_error_data.get(68..68 + string_len).ok_or(
            EthClientError::Custom(
                "Failed to slice index abi_decoded_error_data when getting message from revert data"
                    .to_owned(),
            ),
        )?;
        String::from_utf8(string_data.to_vec()).map_err(|_| {
            EthClientError::Custom(
                "Failed to String::from_utf8 when getting message from revert data".to_owned(),
            )
        })
    }
}

pub mod serde_utils {
    pub mod u64 {
        pub mod hex_str {
            use serde::{Deserialize, Deserializer, Serializer, de::Error};

            pub fn deserialize<'de, D>(d: D) -> Result<u64, D::Error>
            where
                D: Deserializer<'de>,
            {
                let value = String::deserialize(d)?;
                u64::from_str_radix(value.trim_start_matches("0x"), 16)
                    .map_err(|_| D::Error::custom("Failed to deserialize u64 value"))
            }

            pub fn serialize<S>(value: &u64, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: Serializer,
            {
                serializer.serialize_str(&format!("{value:#x}"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_error_string_revert_data() {
        // Error(String) with the message "insufficient soul shards"
        let mut data = vec![0x08, 0xc3, 0x79, 0xa0];
        let mut offset = [0u8; 32];
        offset[31] = 0x20;
        data.extend_from_slice(&offset);
        let message = b"insufficient soul shards";
        let mut length = [0u8; 32];
        length[31] = message.len() as u8;
        data.extend_from_slice(&length);
        data.extend_from_slice(message);
        data.extend_from_slice(&vec![0u8; 32 - message.len()]);

        let decoded = get_message_from_revert_data(&format!("0x{}", hex::encode(data))).unwrap();
        assert_eq!(decoded, "insufficient soul shards");
    }

    #[test]
    fn empty_revert_data_has_placeholder_reason() {
        let decoded = get_message_from_revert_data("0x").unwrap();
        assert!(decoded.contains("without a reason"));
    }
}

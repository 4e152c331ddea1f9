use ethereum_types::{Address, H256};
use serde::{Deserialize, Serialize};

use crate::utils::serde_utils;

/// The subset of `eth_getTransactionReceipt` this tool consumes.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct RpcReceipt {
    pub transaction_hash: H256,
    pub block_hash: H256,
    #[serde(with = "serde_utils::u64::hex_str")]
    pub block_number: u64,
    #[serde(with = "serde_utils::u64::hex_str")]
    pub status: u64,
    #[serde(with = "serde_utils::u64::hex_str")]
    pub gas_used: u64,
    #[serde(default)]
    pub contract_address: Option<Address>,
}

impl RpcReceipt {
    pub fn succeeded(&self) -> bool {
        self.status == 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_node_receipt_json() {
        let raw = r#"{
            "transactionHash": "0x58e5a0fc7fbc849eddc100d44e86276168a8c7baaa5604e44ba6f5eb8ba1b7eb",
            "blockHash": "0x8243343df08b9751f5ca0c5f8c9c0460d8a9b6351066fae0acbd4d3e776de8bb",
            "blockNumber": "0x429d3b",
            "status": "0x1",
            "gasUsed": "0x5208",
            "contractAddress": null,
            "logs": []
        }"#;

        let receipt: RpcReceipt = serde_json::from_str(raw).unwrap();
        assert_eq!(receipt.block_number, 4365627);
        assert!(receipt.succeeded());
        assert!(receipt.contract_address.is_none());
    }

    #[test]
    fn status_zero_is_a_failure() {
        let raw = r#"{
            "transactionHash": "0x58e5a0fc7fbc849eddc100d44e86276168a8c7baaa5604e44ba6f5eb8ba1b7eb",
            "blockHash": "0x8243343df08b9751f5ca0c5f8c9c0460d8a9b6351066fae0acbd4d3e776de8bb",
            "blockNumber": "0x1",
            "status": "0x0",
            "gasUsed": "0x5208"
        }"#;

        let receipt: RpcReceipt = serde_json::from_str(raw).unwrap();
        assert!(!receipt.succeeded());
    }
}

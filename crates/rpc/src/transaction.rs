use bytes::Bytes;
use ethereum_types::{Address, H256, U256};

use crate::rlp::{Encoder, RLPEncode};

pub type AccessList = Vec<(Address, Vec<H256>)>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum TxKind {
    Call(Address),
    #[default]
    Create,
}

/// The only transaction type this tool submits. Typed envelope 0x02.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct EIP1559Transaction {
    pub chain_id: u64,
    pub nonce: u64,
    pub max_priority_fee_per_gas: u64,
    pub max_fee_per_gas: u64,
    pub gas_limit: u64,
    pub to: TxKind,
    pub value: U256,
    pub data: Bytes,
    pub access_list: AccessList,
    pub signature_y_parity: bool,
    pub signature_r: U256,
    pub signature_s: U256,
}

impl EIP1559Transaction {
    /// The unsigned payload whose keccak hash gets signed, including the
    /// type byte prefix.
    pub fn encode_payload_to_vec(&self) -> Vec<u8> {
        let mut payload = vec![0x02];
        Encoder::new(&mut payload)
            .encode_field(&self.chain_id)
            .encode_field(&self.nonce)
            .encode_field(&self.max_priority_fee_per_gas)
            .encode_field(&self.max_fee_per_gas)
            .encode_field(&self.gas_limit)
            .encode_field(&self.to)
            .encode_field(&self.value)
            .encode_field(&self.data)
            .encode_field(&self.access_list)
            .finish();
        payload
    }

    /// The signed wire form submitted via `eth_sendRawTransaction`.
    pub fn encode_canonical_to_vec(&self) -> Vec<u8> {
        let mut encoded = vec![0x02];
        Encoder::new(&mut encoded)
            .encode_field(&self.chain_id)
            .encode_field(&self.nonce)
            .encode_field(&self.max_priority_fee_per_gas)
            .encode_field(&self.max_fee_per_gas)
            .encode_field(&self.gas_limit)
            .encode_field(&self.to)
            .encode_field(&self.value)
            .encode_field(&self.data)
            .encode_field(&self.access_list)
            .encode_field(&self.signature_y_parity)
            .encode_field(&self.signature_r)
            .encode_field(&self.signature_s)
            .finish();
        encoded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_and_canonical_forms_share_prefix() {
        let tx = EIP1559Transaction {
            chain_id: 56,
            nonce: 7,
            max_priority_fee_per_gas: 1_000_000_000,
            max_fee_per_gas: 3_000_000_000,
            gas_limit: 500_000,
            to: TxKind::Call(Address::repeat_byte(0x42)),
            value: U256::zero(),
            data: Bytes::from_static(&[0xa9, 0x05, 0x9c, 0xbb]),
            ..Default::default()
        };

        let payload = tx.encode_payload_to_vec();
        let canonical = tx.encode_canonical_to_vec();

        assert_eq!(payload[0], 0x02);
        assert_eq!(canonical[0], 0x02);
        // The signed form carries three extra fields, so it is strictly longer.
        assert!(canonical.len() > payload.len());
    }
}

use bytes::{BufMut, Bytes};
use ethereum_types::{Address, H256, U256};

use crate::transaction::TxKind;

/// Minimal RLP encoding, covering exactly what signed EIP-1559 payloads and
/// created-address derivation need.
pub trait RLPEncode {
    fn encode(&self, buf: &mut dyn BufMut);

    fn encode_to_vec(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.encode(&mut buf);
        buf
    }
}

/// Builds the RLP encoding of a list field by field.
pub struct Encoder<'a> {
    buf: &'a mut dyn BufMut,
    temp: Vec<u8>,
}

impl<'a> Encoder<'a> {
    pub fn new(buf: &'a mut dyn BufMut) -> Self {
        Self {
            buf,
            temp: Vec::new(),
        }
    }

    pub fn encode_field<T: RLPEncode>(mut self, value: &T) -> Self {
        value.encode(&mut self.temp);
        self
    }

    pub fn finish(self) {
        encode_list_header(self.buf, self.temp.len());
        self.buf.put_slice(&self.temp);
    }
}

fn encode_list_header(buf: &mut dyn BufMut, payload_len: usize) {
    if payload_len <= 55 {
        buf.put_u8(0xc0 + payload_len as u8);
    } else {
        let len_bytes = minimal_be_bytes(payload_len as u64);
        buf.put_u8(0xf7 + len_bytes.len() as u8);
        buf.put_slice(&len_bytes);
    }
}

fn encode_bytes(buf: &mut dyn BufMut, bytes: &[u8]) {
    if bytes.len() == 1 && bytes[0] < 0x80 {
        buf.put_u8(bytes[0]);
    } else if bytes.len() <= 55 {
        buf.put_u8(0x80 + bytes.len() as u8);
        buf.put_slice(bytes);
    } else {
        let len_bytes = minimal_be_bytes(bytes.len() as u64);
        buf.put_u8(0xb7 + len_bytes.len() as u8);
        buf.put_slice(&len_bytes);
        buf.put_slice(bytes);
    }
}

fn minimal_be_bytes(value: u64) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let start = bytes.iter().position(|byte| *byte != 0).unwrap_or(7);
    bytes[start..].to_vec()
}

impl RLPEncode for u64 {
    fn encode(&self, buf: &mut dyn BufMut) {
        if *self == 0 {
            buf.put_u8(0x80);
        } else {
            encode_bytes(buf, &minimal_be_bytes(*self));
        }
    }
}

impl RLPEncode for U256 {
    fn encode(&self, buf: &mut dyn BufMut) {
        if self.is_zero() {
            buf.put_u8(0x80);
        } else {
            let bytes = self.to_big_endian();
            let start = bytes
                .iter()
                .position(|byte| *byte != 0)
                .unwrap_or(bytes.len() - 1);
            encode_bytes(buf, &bytes[start..]);
        }
    }
}

impl RLPEncode for bool {
    fn encode(&self, buf: &mut dyn BufMut) {
        if *self {
            buf.put_u8(0x01);
        } else {
            buf.put_u8(0x80);
        }
    }
}

impl RLPEncode for Address {
    fn encode(&self, buf: &mut dyn BufMut) {
        encode_bytes(buf, self.as_bytes());
    }
}

impl RLPEncode for H256 {
    fn encode(&self, buf: &mut dyn BufMut) {
        encode_bytes(buf, self.as_bytes());
    }
}

impl RLPEncode for Bytes {
    fn encode(&self, buf: &mut dyn BufMut) {
        encode_bytes(buf, self);
    }
}

impl RLPEncode for &[u8] {
    fn encode(&self, buf: &mut dyn BufMut) {
        encode_bytes(buf, self);
    }
}

impl RLPEncode for TxKind {
    fn encode(&self, buf: &mut dyn BufMut) {
        match self {
            TxKind::Call(address) => encode_bytes(buf, address.as_bytes()),
            TxKind::Create => buf.put_u8(0x80),
        }
    }
}

impl<T: RLPEncode> RLPEncode for Vec<T> {
    fn encode(&self, buf: &mut dyn BufMut) {
        let mut payload = Vec::new();
        for item in self {
            item.encode(&mut payload);
        }
        encode_list_header(buf, payload.len());
        buf.put_slice(&payload);
    }
}

impl RLPEncode for (Address, Vec<H256>) {
    fn encode(&self, buf: &mut dyn BufMut) {
        Encoder::new(buf)
            .encode_field(&self.0)
            .encode_field(&self.1)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_short_string() {
        let mut buf = Vec::new();
        encode_bytes(&mut buf, b"dog");
        assert_eq!(buf, vec![0x83, b'd', b'o', b'g']);
    }

    #[test]
    fn encodes_integers() {
        assert_eq!(0u64.encode_to_vec(), vec![0x80]);
        assert_eq!(15u64.encode_to_vec(), vec![0x0f]);
        assert_eq!(1024u64.encode_to_vec(), vec![0x82, 0x04, 0x00]);
        assert_eq!(U256::from(1024).encode_to_vec(), vec![0x82, 0x04, 0x00]);
    }

    #[test]
    fn encodes_empty_values() {
        let mut buf = Vec::new();
        encode_bytes(&mut buf, &[]);
        assert_eq!(buf, vec![0x80]);

        let empty_list: Vec<u64> = vec![];
        assert_eq!(empty_list.encode_to_vec(), vec![0xc0]);
    }

    #[test]
    fn encodes_list_of_strings() {
        let mut buf = Vec::new();
        Encoder::new(&mut buf)
            .encode_field(&b"cat".as_slice())
            .encode_field(&b"dog".as_slice())
            .finish();
        assert_eq!(
            buf,
            vec![0xc8, 0x83, b'c', b'a', b't', 0x83, b'd', b'o', b'g']
        );
    }

    #[test]
    fn create_kind_encodes_as_empty() {
        assert_eq!(TxKind::Create.encode_to_vec(), vec![0x80]);
    }
}

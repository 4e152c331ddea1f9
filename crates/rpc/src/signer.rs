use bytes::Bytes;
use ethereum_types::{Address, H520, U256};
use keccak_hash::keccak;
use reqwest::{Client, StatusCode, Url};
use secp256k1::{Message, PublicKey, SECP256K1, SecretKey};
use url::ParseError;

use crate::transaction::EIP1559Transaction;

pub type Signature = H520;

/// Key custody is injected: a run either signs locally with a secret key or
/// delegates to a web3signer-style HTTP service. Everything downstream takes
/// the enum.
#[derive(Clone, Debug)]
pub enum Signer {
    Local(LocalSigner),
    Remote(RemoteSigner),
}

impl Signer {
    pub async fn sign(&self, data: Bytes) -> Result<Signature, SignerError> {
        match self {
            Self::Local(signer) => Ok(signer.sign(data)),
            Self::Remote(signer) => signer.sign(data).await,
        }
    }

    pub fn address(&self) -> Address {
        match self {
            Self::Local(signer) => signer.address,
            Self::Remote(signer) => signer.address,
        }
    }
}

impl From<LocalSigner> for Signer {
    fn from(value: LocalSigner) -> Self {
        Self::Local(value)
    }
}

impl From<RemoteSigner> for Signer {
    fn from(value: RemoteSigner) -> Self {
        Self::Remote(value)
    }
}

#[derive(Clone, Debug)]
pub struct LocalSigner {
    pub private_key: SecretKey,
    pub address: Address,
}

impl LocalSigner {
    pub fn new(private_key: SecretKey) -> Self {
        let address = address_from_public_key(&private_key.public_key(SECP256K1));
        Self {
            private_key,
            address,
        }
    }

    pub fn sign(&self, data: Bytes) -> Signature {
        let hash = keccak(data);
        let msg = Message::from_digest(hash.0);
        let (recovery_id, signature) = SECP256K1
            .sign_ecdsa_recoverable(&msg, &self.private_key)
            .serialize_compact();

        Signature::from_slice(
            &[
                signature.as_slice(),
                &[recovery_id.to_i32() as u8],
            ]
            .concat(),
        )
    }
}

#[derive(Clone, Debug)]
pub struct RemoteSigner {
    pub url: Url,
    pub public_key: PublicKey,
    pub address: Address,
}

impl RemoteSigner {
    pub fn new(url: Url, public_key: PublicKey) -> Self {
        let address = address_from_public_key(&public_key);
        Self {
            url,
            public_key,
            address,
        }
    }

    pub async fn sign(&self, data: Bytes) -> Result<Signature, SignerError> {
        let url = self
            .url
            .join("api/v1/eth1/sign/")?
            .join(&hex::encode(&self.public_key.serialize_uncompressed()[1..]))?;
        let body = format!("{{\"data\": \"0x{}\"}}", hex::encode(data));

        let client = Client::new();
        let response = client
            .post(url)
            .body(body)
            .header("content-type", "application/json")
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => response
                .text()
                .await?
                .trim_start_matches("0x")
                .parse::<Signature>()
                .map_err(SignerError::FromHexError),
            StatusCode::NOT_FOUND => Err(SignerError::RemoteSignerError(
                "Private key not found in remote signer".to_string(),
            )),
            StatusCode::BAD_REQUEST => Err(SignerError::RemoteSignerError(
                "Bad request format".to_string(),
            )),
            status => Err(SignerError::RemoteSignerError(format!(
                "Remote signer returned {status}"
            ))),
        }
    }
}

pub fn address_from_public_key(public_key: &PublicKey) -> Address {
    let hash = keccak(&public_key.serialize_uncompressed()[1..]);
    Address::from_slice(&hash.as_bytes()[12..])
}

pub fn get_address_from_secret_key(secret_key: &SecretKey) -> Address {
    address_from_public_key(&secret_key.public_key(SECP256K1))
}

#[derive(Debug, thiserror::Error)]
pub enum SignerError {
    #[error("Url Parse Error: {0}")]
    ParseError(#[from] ParseError),
    #[error("Failed with a reqwest error: {0}")]
    ReqwestError(#[from] reqwest::Error),
    #[error("Failed to parse value: {0}")]
    FromHexError(#[from] rustc_hex::FromHexError),
    #[error("Remote signer error: {0}")]
    RemoteSignerError(String),
}

fn parse_signature(signature: Signature) -> (U256, U256, bool) {
    let r = U256::from_big_endian(&signature[..32]);
    let s = U256::from_big_endian(&signature[32..64]);
    let y_parity = signature[64] != 0 && signature[64] != 27;

    (r, s, y_parity)
}

pub trait Signable {
    fn sign(
        &self,
        signer: &Signer,
    ) -> impl std::future::Future<Output = Result<Self, SignerError>> + Send
    where
        Self: Sized + Sync + Send + Clone,
    {
        async {
            let mut signable = self.clone();
            signable.sign_inplace(signer).await?;
            Ok(signable)
        }
    }

    fn sign_inplace(
        &mut self,
        signer: &Signer,
    ) -> impl std::future::Future<Output = Result<(), SignerError>> + Send;
}

impl Signable for EIP1559Transaction {
    async fn sign_inplace(&mut self, signer: &Signer) -> Result<(), SignerError> {
        let payload = self.encode_payload_to_vec();

        let signature = signer.sign(payload.into()).await?;
        (self.signature_r, self.signature_s, self.signature_y_parity) = parse_signature(signature);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn derives_address_from_secret_key() {
        // The address of secret key 0x...01 is a fixed, well-known value.
        let secret_key = SecretKey::from_slice(&{
            let mut key = [0u8; 32];
            key[31] = 1;
            key
        })
        .unwrap();

        assert_eq!(
            get_address_from_secret_key(&secret_key),
            Address::from_str("0x7e5f4552091a69125d5dfcb7b8c2659029395bdf").unwrap()
        );
    }

    #[test]
    fn signature_parity_is_extracted() {
        let mut raw = [0u8; 65];
        raw[63] = 0x05;
        raw[64] = 1;
        let (_, s, y_parity) = parse_signature(Signature::from_slice(&raw));
        assert_eq!(s, U256::from(5));
        assert!(y_parity);
    }
}

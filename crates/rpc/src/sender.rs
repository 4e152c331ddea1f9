use bytes::Bytes;
use ethereum_types::{Address, H256};
use keccak_hash::keccak;
use tracing::warn;

use crate::{
    client::{BlockIdentifier, EthClient, Overrides},
    errors::EthClientError,
    receipt::RpcReceipt,
    rlp::Encoder,
    signer::{Signable, Signer},
    transaction::{EIP1559Transaction, TxKind},
};

const WAIT_TIME_FOR_RECEIPT_SECONDS: u64 = 2;

impl EthClient {
    /// Fills in everything `overrides` leaves unset by asking the node:
    /// chain id, nonce, EIP-1559 fees (bumped 20% over the quoted price) and
    /// a gas estimate.
    pub async fn build_eip1559_transaction(
        &self,
        to: Address,
        from: Address,
        calldata: Bytes,
        overrides: Overrides,
    ) -> Result<EIP1559Transaction, EthClientError> {
        let chain_id = match overrides.chain_id {
            Some(chain_id) => chain_id,
            None => self.get_chain_id().await?.try_into().map_err(|_| {
                EthClientError::InternalError("Failed to convert chain_id to u64".to_owned())
            })?,
        };

        let nonce = match overrides.nonce {
            Some(nonce) => nonce,
            None => self.get_nonce(from, BlockIdentifier::Latest).await?,
        };

        let mut max_fee_per_gas = match overrides.max_fee_per_gas {
            Some(fee) => fee,
            None => self
                .get_gas_price_with_extra(20)
                .await?
                .try_into()
                .map_err(|_| {
                    EthClientError::InternalError("Failed to convert gas_price to u64".to_owned())
                })?,
        };
        if let Some(maximum) = self.maximum_allowed_max_fee_per_gas {
            if max_fee_per_gas > maximum {
                warn!("max_fee_per_gas exceeds the allowed limit, adjusting it to {maximum}");
                max_fee_per_gas = maximum;
            }
        }

        let max_priority_fee_per_gas = match overrides.max_priority_fee_per_gas {
            Some(fee) => fee,
            None => self
                .get_max_priority_fee()
                .await
                .ok()
                .and_then(|fee| fee.try_into().ok())
                .unwrap_or(max_fee_per_gas),
        }
        .min(max_fee_per_gas);

        let mut tx = EIP1559Transaction {
            chain_id,
            nonce,
            max_priority_fee_per_gas,
            max_fee_per_gas,
            gas_limit: 0,
            to: overrides.to.unwrap_or(TxKind::Call(to)),
            value: overrides.value.unwrap_or_default(),
            data: calldata,
            access_list: overrides.access_list,
            ..Default::default()
        };

        tx.gas_limit = match overrides.gas_limit {
            Some(gas_limit) => gas_limit,
            None => self.estimate_gas(&tx, from).await?,
        };

        Ok(tx)
    }

    pub async fn send_eip1559_transaction(
        &self,
        tx: &EIP1559Transaction,
        signer: &Signer,
    ) -> Result<H256, EthClientError> {
        let signed_tx = tx
            .sign(signer)
            .await
            .map_err(|err| EthClientError::FailedToSignPayload(err.to_string()))?;

        self.send_raw_transaction(&signed_tx.encode_canonical_to_vec())
            .await
    }

    /// Blocks until the transaction has `min_confirmations` blocks on top of
    /// it, or `max_wait_seconds` elapse.
    pub async fn wait_for_transaction_receipt(
        &self,
        tx_hash: H256,
        min_confirmations: u64,
        max_wait_seconds: u64,
    ) -> Result<RpcReceipt, EthClientError> {
        let mut elapsed_seconds = 0;

        loop {
            if let Some(receipt) = self.get_transaction_receipt(tx_hash).await? {
                if !receipt.succeeded() {
                    return Err(EthClientError::Reverted {
                        tx_hash,
                        reason: "transaction was mined with status 0".to_owned(),
                    });
                }

                let current_block: u64 =
                    self.get_block_number().await?.try_into().map_err(|_| {
                        EthClientError::InternalError(
                            "Failed to convert block number to u64".to_owned(),
                        )
                    })?;
                let confirmations = current_block.saturating_sub(receipt.block_number) + 1;
                if confirmations >= min_confirmations {
                    return Ok(receipt);
                }
            }

            if elapsed_seconds >= max_wait_seconds {
                return Err(EthClientError::ConfirmationTimeout {
                    tx_hash,
                    min_confirmations,
                    elapsed_seconds,
                });
            }

            tokio::time::sleep(std::time::Duration::from_secs(
                WAIT_TIME_FOR_RECEIPT_SECONDS,
            ))
            .await;
            elapsed_seconds += WAIT_TIME_FOR_RECEIPT_SECONDS;
        }
    }
}

/// Raises both fee caps by `bump_percentage` so a replacement transaction
/// with the same nonce outbids the stuck one.
pub fn bump_gas(tx: &mut EIP1559Transaction, bump_percentage: u64) {
    tx.max_fee_per_gas = (tx.max_fee_per_gas * (100 + bump_percentage)) / 100;
    tx.max_priority_fee_per_gas = (tx.max_priority_fee_per_gas * (100 + bump_percentage)) / 100;
}

/// `keccak(rlp([sender, nonce]))[12..]`, the address a CREATE lands at.
pub fn compute_created_address(sender: Address, nonce: u64) -> Address {
    let mut encoded = vec![];
    Encoder::new(&mut encoded)
        .encode_field(&sender)
        .encode_field(&nonce)
        .finish();

    Address::from_slice(&keccak(encoded).as_bytes()[12..])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn created_address_matches_known_vectors() {
        let sender = Address::from_str("0x6ac7ea33f8831ea9dcc53393aaa88b25a785dbf0").unwrap();

        assert_eq!(
            compute_created_address(sender, 0),
            Address::from_str("0xcd234a471b72ba2f1ccf0a70fcaba648a5eecd8d").unwrap()
        );
        assert_eq!(
            compute_created_address(sender, 1),
            Address::from_str("0x343c43a37d37dff08ae8c4a11544c718abb4fcf8").unwrap()
        );
    }

    #[test]
    fn gas_bump_raises_both_fees() {
        let mut tx = EIP1559Transaction {
            max_fee_per_gas: 1_000,
            max_priority_fee_per_gas: 100,
            ..Default::default()
        };
        bump_gas(&mut tx, 30);
        assert_eq!(tx.max_fee_per_gas, 1_300);
        assert_eq!(tx.max_priority_fee_per_gas, 130);
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EthClientError {
    #[error("reqwest error: {0}")]
    ReqwestError(#[from] reqwest::Error),
    #[error("eth_call request error: {0}")]
    CallError(#[from] CallError),
    #[error("eth_estimateGas request error: {0}")]
    EstimateGasError(#[from] EstimateGasError),
    #[error("eth_gasPrice request error: {0}")]
    GetGasPriceError(#[from] GetGasPriceError),
    #[error("eth_maxPriorityFeePerGas request error: {0}")]
    GetMaxPriorityFeeError(#[from] GetMaxPriorityFeeError),
    #[error("eth_sendRawTransaction request error: {0}")]
    SendRawTransactionError(#[from] SendRawTransactionError),
    #[error("eth_getTransactionCount request error: {0}")]
    GetNonceError(#[from] GetNonceError),
    #[error("eth_blockNumber request error: {0}")]
    GetBlockNumberError(#[from] GetBlockNumberError),
    #[error("eth_chainId request error: {0}")]
    GetChainIdError(#[from] GetChainIdError),
    #[error("eth_getBalance request error: {0}")]
    GetBalanceError(#[from] GetBalanceError),
    #[error("eth_getCode request error: {0}")]
    GetCodeError(#[from] GetCodeError),
    #[error("eth_getTransactionReceipt request error: {0}")]
    GetTransactionReceiptError(#[from] GetTransactionReceiptError),
    #[error("Failed to serialize request body: {0}")]
    FailedToSerializeRequestBody(String),
    #[error("Failed to sign payload: {0}")]
    FailedToSignPayload(String),
    #[error("Nonce collision: {0}")]
    NonceCollision(String),
    #[error(
        "Transaction {tx_hash:#x} not confirmed after waiting {elapsed_seconds}s for {min_confirmations} confirmation(s)"
    )]
    ConfirmationTimeout {
        tx_hash: ethereum_types::H256,
        min_confirmations: u64,
        elapsed_seconds: u64,
    },
    #[error("Transaction {tx_hash:#x} reverted: {reason}")]
    Reverted {
        tx_hash: ethereum_types::H256,
        reason: String,
    },
    #[error("All RPC calls failed: {0}")]
    FailedAllRPC(String),
    #[error("Parse Url Error. {0}")]
    ParseUrlError(String),
    #[error("Internal Error. This is most likely a bug: {0}")]
    InternalError(String),
    #[error("Error: {0}")]
    Custom(String),
}

impl EthClientError {
    /// Transport-level failures are retryable with backoff; everything the
    /// node actually answered (reverts, nonce collisions, decode failures)
    /// is not.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            EthClientError::ReqwestError(_) | EthClientError::FailedAllRPC(_)
        )
    }
}

/// Messages nodes use to reject a transaction whose nonce was already
/// consumed or is already represented in the mempool.
pub(crate) const NONCE_COLLISION_MARKERS: [&str; 4] = [
    "nonce too low",
    "already known",
    "known transaction",
    "replacement transaction underpriced",
];

pub(crate) fn is_nonce_collision(message: &str) -> bool {
    let lowered = message.to_lowercase();
    NONCE_COLLISION_MARKERS
        .iter()
        .any(|marker| lowered.contains(marker))
}

#[derive(Debug, thiserror::Error)]
pub enum CallError {
    #[error("{0}")]
    ReqwestError(#[from] reqwest::Error),
    #[error("{0}")]
    SerdeJSONError(#[from] serde_json::Error),
    #[error("{0}")]
    RPCError(String),
}

#[derive(Debug, thiserror::Error)]
pub enum EstimateGasError {
    #[error("{0}")]
    ReqwestError(#[from] reqwest::Error),
    #[error("{0}")]
    SerdeJSONError(#[from] serde_json::Error),
    #[error("{0}")]
    RPCError(String),
    #[error("{0}")]
    ParseIntError(#[from] std::num::ParseIntError),
    #[error("{0}")]
    Custom(String),
}

#[derive(Debug, thiserror::Error)]
pub enum GetGasPriceError {
    #[error("{0}")]
    SerdeJSONError(#[from] serde_json::Error),
    #[error("{0}")]
    RPCError(String),
}

#[derive(Debug, thiserror::Error)]
pub enum GetMaxPriorityFeeError {
    #[error("{0}")]
    SerdeJSONError(#[from] serde_json::Error),
    #[error("{0}")]
    RPCError(String),
}

#[derive(Debug, thiserror::Error)]
pub enum SendRawTransactionError {
    #[error("{0}")]
    SerdeJSONError(#[from] serde_json::Error),
    #[error("{0}")]
    RPCError(String),
}

#[derive(Debug, thiserror::Error)]
pub enum GetNonceError {
    #[error("{0}")]
    SerdeJSONError(#[from] serde_json::Error),
    #[error("{0}")]
    RPCError(String),
    #[error("{0}")]
    ParseIntError(#[from] std::num::ParseIntError),
}

#[derive(Debug, thiserror::Error)]
pub enum GetBlockNumberError {
    #[error("{0}")]
    SerdeJSONError(#[from] serde_json::Error),
    #[error("{0}")]
    RPCError(String),
}

#[derive(Debug, thiserror::Error)]
pub enum GetChainIdError {
    #[error("{0}")]
    SerdeJSONError(#[from] serde_json::Error),
    #[error("{0}")]
    RPCError(String),
}

#[derive(Debug, thiserror::Error)]
pub enum GetBalanceError {
    #[error("{0}")]
    SerdeJSONError(#[from] serde_json::Error),
    #[error("{0}")]
    RPCError(String),
}

#[derive(Debug, thiserror::Error)]
pub enum GetCodeError {
    #[error("{0}")]
    SerdeJSONError(#[from] serde_json::Error),
    #[error("{0}")]
    RPCError(String),
    #[error("{0}")]
    NotHexError(#[from] hex::FromHexError),
}

#[derive(Debug, thiserror::Error)]
pub enum GetTransactionReceiptError {
    #[error("{0}")]
    SerdeJSONError(#[from] serde_json::Error),
    #[error("{0}")]
    RPCError(String),
}

#[derive(Debug, thiserror::Error)]
pub enum CalldataEncodeError {
    #[error("Failed to parse function signature: {0}")]
    ParseError(String),
    #[error("Wrong number of arguments provided for calldata: {0}")]
    WrongArgumentLength(String),
    #[error("Internal Calldata encoding error. This is most likely a bug")]
    InternalError,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nonce_collision_messages_are_classified() {
        assert!(is_nonce_collision("nonce too low"));
        assert!(is_nonce_collision("Known Transaction: 0xabc"));
        assert!(is_nonce_collision("replacement transaction underpriced"));
        assert!(!is_nonce_collision("execution reverted: not owner"));
        assert!(!is_nonce_collision("insufficient funds for gas"));
    }

    #[test]
    fn transient_classification() {
        let err = EthClientError::FailedAllRPC("connection refused".into());
        assert!(err.is_transient());

        let err = EthClientError::NonceCollision("nonce too low".into());
        assert!(!err.is_transient());
    }
}

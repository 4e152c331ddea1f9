use std::path::PathBuf;

use dungeon_rpc::errors::{CalldataEncodeError, EthClientError};
use ethereum_types::H256;

#[derive(Debug, thiserror::Error)]
pub enum OpsError {
    #[error("Missing configuration: {0} not set")]
    MissingConfiguration(String),
    #[error("No registry snapshot for network {network} at {path}")]
    RegistryNotFound { network: String, path: PathBuf },
    #[error("Another run already holds the registry lock for {network}: {detail}")]
    ConcurrentRunDetected { network: String, detail: String },
    #[error("Dependency cycle in deploy plan involving contract {0}")]
    CyclicDependency(String),
    #[error("Contract {0} is referenced by the plan but declared nowhere")]
    UnknownContract(String),
    #[error("Invalid deploy plan: {0}")]
    InvalidPlan(String),
    #[error("{contract}: {operation} reverted: {reason}")]
    Reverted {
        contract: String,
        operation: String,
        reason: String,
    },
    #[error(
        "{contract}: {operation} not confirmed ({tx_hash:#x}); outcome recorded as unknown for manual follow-up"
    )]
    Timeout {
        contract: String,
        operation: String,
        tx_hash: H256,
    },
    #[error(
        "Link {from} -> {to} could not be wired after {attempts} attempt(s): {reason}. Operator intervention required"
    )]
    LinkWiringFailed {
        from: String,
        to: String,
        attempts: u64,
        reason: String,
    },
    #[error("Run cancelled by operator before completion")]
    Cancelled,
    #[error("{context}: {source}")]
    EthClient {
        context: String,
        source: EthClientError,
    },
    #[error("Failed to encode calldata: {0}")]
    CalldataEncodeError(#[from] CalldataEncodeError),
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse {path}: {source}")]
    Serde {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("Internal error: {0}")]
    Internal(String),
}

impl OpsError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        OpsError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn serde(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        OpsError::Serde {
            path: path.into(),
            source,
        }
    }

    /// Wraps a client error with the contract and operation it happened on,
    /// so every failure the operator sees names both.
    pub fn chain(contract: &str, operation: &str, source: EthClientError) -> Self {
        match source {
            EthClientError::Reverted { reason, .. } => OpsError::Reverted {
                contract: contract.to_string(),
                operation: operation.to_string(),
                reason,
            },
            EthClientError::ConfirmationTimeout { tx_hash, .. } => OpsError::Timeout {
                contract: contract.to_string(),
                operation: operation.to_string(),
                tx_hash,
            },
            source => OpsError::EthClient {
                context: format!("{contract}: {operation}"),
                source,
            },
        }
    }
}

pub mod calldata;
pub mod client;
pub mod errors;
pub mod receipt;
pub mod rlp;
pub mod sender;
pub mod signer;
pub mod transaction;
pub mod utils;

pub use client::{BlockIdentifier, EthClient, Overrides, RpcResponse};
pub use errors::EthClientError;
pub use receipt::RpcReceipt;
pub use sender::{bump_gas, compute_created_address};
pub use signer::{LocalSigner, RemoteSigner, Signer};
pub use transaction::{EIP1559Transaction, TxKind};

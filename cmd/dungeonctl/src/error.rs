use dungeon_ops::OpsError;
use dungeon_rpc::EthClientError;

#[derive(Debug, thiserror::Error)]
pub enum DungeonctlError {
    #[error("{0}")]
    Ops(#[from] OpsError),
    #[error("EthClient error: {0}")]
    EthClient(#[from] EthClientError),
    #[error("Verification finished with {failed} failed check(s)")]
    VerificationFailed { failed: usize },
}

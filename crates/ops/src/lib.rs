pub mod deploy;
pub mod errors;
pub mod plan;
pub mod registry;
pub mod sync;
pub mod verify;

pub use deploy::{ContractState, Orchestrator, OrchestratorOptions, contracts_to_deploy};
pub use errors::OpsError;
pub use plan::{ArgSpec, ContractSpec, DeployPlan, LinkSpec};
pub use registry::{AppliedLink, ContractRecord, Registry, RegistryChange, RunLock};
pub use sync::{SyncSummary, SyncTarget, load_targets, propagate};
pub use verify::{Finding, Report, verify, verify_ownership};

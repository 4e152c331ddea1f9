use std::{
    collections::BTreeMap,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use dungeon_rpc::{
    BlockIdentifier, EthClient, Overrides, RpcReceipt, Signer, TxKind,
    calldata::{Value, decode_address_word, encode_calldata},
    errors::EthClientError,
    sender::{bump_gas, compute_created_address},
    transaction::EIP1559Transaction,
};
use ethereum_types::{Address, H256};
use tracing::{debug, info, warn};

use crate::{
    errors::OpsError,
    plan::{ContractSpec, DeployPlan, LinkSpec},
    registry::{AppliedLink, ContractRecord, Registry},
};

const TRANSFER_OWNERSHIP_SIGNATURE: &str = "transferOwnership(address)";
const OWNER_SIGNATURE: &str = "owner()";
const LINK_GAS_BUMP_PERCENTAGE: u64 = 30;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContractState {
    Pending,
    Deploying,
    Deployed,
    Configuring,
    Linked,
    Verified,
    Failed,
}

#[derive(Clone, Copy, Debug)]
pub struct OrchestratorOptions {
    /// Blocks on top of a transaction before it counts as confirmed.
    pub confirmations: u64,
    /// Ceiling on waiting for any single confirmation.
    pub confirmation_timeout_seconds: u64,
    /// Wiring attempts per link before giving up.
    pub max_link_attempts: u64,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            confirmations: 1,
            confirmation_timeout_seconds: 600,
            max_link_attempts: 3,
        }
    }
}

/// Drives a deploy plan to completion: deploy in dependency order, wire
/// links, transfer ownership. One signer, strictly sequential transactions,
/// nonce owned here.
pub struct Orchestrator<'a> {
    client: &'a EthClient,
    signer: &'a Signer,
    options: OrchestratorOptions,
    cancel: Arc<AtomicBool>,
    next_nonce: u64,
    states: BTreeMap<String, ContractState>,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        client: &'a EthClient,
        signer: &'a Signer,
        options: OrchestratorOptions,
        cancel: Arc<AtomicBool>,
    ) -> Self {
        Self {
            client,
            signer,
            options,
            cancel,
            next_nonce: 0,
            states: BTreeMap::new(),
        }
    }

    pub fn state_of(&self, contract: &str) -> ContractState {
        self.states
            .get(contract)
            .copied()
            .unwrap_or(ContractState::Pending)
    }

    fn set_state(&mut self, contract: &str, state: ContractState) {
        debug!(contract, ?state, "Contract state transition");
        self.states.insert(contract.to_string(), state);
    }

    fn check_cancelled(&self) -> Result<(), OpsError> {
        if self.cancel.load(Ordering::SeqCst) {
            return Err(OpsError::Cancelled);
        }
        Ok(())
    }

    /// Runs the whole plan. Re-running against a registry that already has
    /// everything recorded performs zero sends.
    pub async fn deploy_all(
        &mut self,
        plan: &DeployPlan,
        registry: &mut Registry,
    ) -> Result<(), OpsError> {
        self.resolve_pending_txs(plan, registry).await?;

        let order: Vec<String> = plan
            .plan_order()?
            .into_iter()
            .map(|spec| spec.name.clone())
            .collect();
        info!(sequence = %order.join(" -> "), "Deployment order planned");
        for name in &order {
            self.set_state(name, ContractState::Pending);
        }

        self.next_nonce = self
            .client
            .get_nonce(self.signer.address(), BlockIdentifier::Latest)
            .await
            .map_err(|err| OpsError::chain("(signer)", "eth_getTransactionCount", err))?;

        for name in &order {
            self.check_cancelled()?;
            let spec = plan
                .contract(name)
                .ok_or_else(|| OpsError::UnknownContract(name.clone()))?;

            if registry.get(name).is_some() {
                info!(contract = %name, "Already recorded in registry, skipping deployment");
                self.set_state(name, ContractState::Deployed);
            } else {
                self.deploy_contract(spec, registry).await?;
            }

            // First pass: wire every link both of whose endpoints exist now.
            self.apply_ready_links(plan, registry).await?;
        }

        // Second pass for links that were deferred because their target
        // deployed later in the sequence.
        self.apply_ready_links(plan, registry).await?;

        for link in &plan.links {
            let expected = registry
                .address_of(&link.to_contract)
                .ok_or_else(|| OpsError::UnknownContract(link.to_contract.clone()))?;
            if !registry.link_applied(&link.from_contract, &link.setter, expected) {
                return Err(OpsError::LinkWiringFailed {
                    from: link.from_contract.clone(),
                    to: link.to_contract.clone(),
                    attempts: 0,
                    reason: "link was never applied".to_string(),
                });
            }
        }

        for name in &order {
            self.check_cancelled()?;
            let spec = plan
                .contract(name)
                .ok_or_else(|| OpsError::UnknownContract(name.clone()))?;
            self.transfer_ownership(spec, registry).await?;
            self.set_state(name, ContractState::Verified);
        }

        info!("Deploy plan completed");
        Ok(())
    }

    /// Leftover journal entries from a previous run are settled before any
    /// new transaction goes out: resolved if the chain knows the outcome,
    /// flagged unknown otherwise.
    async fn resolve_pending_txs(
        &mut self,
        plan: &DeployPlan,
        registry: &mut Registry,
    ) -> Result<(), OpsError> {
        let pending = registry.pending_txs.clone();
        for entry in pending {
            let receipt = self
                .client
                .get_transaction_receipt(entry.tx_hash)
                .await
                .map_err(|err| OpsError::chain(&entry.contract, &entry.operation, err))?;

            match receipt {
                Some(receipt) => {
                    info!(
                        contract = %entry.contract,
                        operation = %entry.operation,
                        tx_hash = %format!("{:#x}", entry.tx_hash),
                        status = receipt.status,
                        "Resolved transaction left over from a previous run"
                    );
                    if entry.operation == "deploy"
                        && receipt.succeeded()
                        && registry.get(&entry.contract).is_none()
                    {
                        if let (Some(address), Some(spec)) =
                            (receipt.contract_address, plan.contract(&entry.contract))
                        {
                            registry.record_deployment(ContractRecord {
                                name: entry.contract.clone(),
                                address,
                                abi: spec.abi.clone(),
                                network: registry.network.clone(),
                                deployed_at_block: Some(receipt.block_number),
                                deploy_tx_hash: Some(entry.tx_hash),
                            })?;
                        }
                    }
                    registry.clear_pending_tx(entry.tx_hash)?;
                }
                None => {
                    warn!(
                        contract = %entry.contract,
                        operation = %entry.operation,
                        tx_hash = %format!("{:#x}", entry.tx_hash),
                        "Outcome still unknown, flagged for manual follow-up"
                    );
                    registry.mark_pending_unknown(entry.tx_hash)?;
                }
            }
        }
        Ok(())
    }

    /// Signs, submits, journals and confirms one transaction. The journal
    /// entry outlives a crash; it is cleared the moment the outcome is
    /// known, or flagged unknown on timeout.
    async fn submit_and_confirm(
        &mut self,
        contract: &str,
        operation: &str,
        tx: &EIP1559Transaction,
        registry: &mut Registry,
    ) -> Result<(H256, RpcReceipt), OpsError> {
        let tx_hash = self
            .client
            .send_eip1559_transaction(tx, self.signer)
            .await
            .map_err(|err| OpsError::chain(contract, operation, err))?;
        registry.record_pending_tx(tx_hash, contract, operation)?;

        match self
            .client
            .wait_for_transaction_receipt(
                tx_hash,
                self.options.confirmations,
                self.options.confirmation_timeout_seconds,
            )
            .await
        {
            Ok(receipt) => {
                registry.clear_pending_tx(tx_hash)?;
                self.next_nonce += 1;
                Ok((tx_hash, receipt))
            }
            Err(EthClientError::Reverted { reason, .. }) => {
                // Mined with a terminal outcome, the journal entry is settled.
                registry.clear_pending_tx(tx_hash)?;
                self.next_nonce += 1;
                Err(OpsError::Reverted {
                    contract: contract.to_string(),
                    operation: operation.to_string(),
                    reason,
                })
            }
            Err(EthClientError::ConfirmationTimeout { .. }) => {
                registry.mark_pending_unknown(tx_hash)?;
                Err(OpsError::Timeout {
                    contract: contract.to_string(),
                    operation: operation.to_string(),
                    tx_hash,
                })
            }
            Err(err) => {
                registry.mark_pending_unknown(tx_hash)?;
                Err(OpsError::chain(contract, operation, err))
            }
        }
    }

    async fn deploy_contract(
        &mut self,
        spec: &ContractSpec,
        registry: &mut Registry,
    ) -> Result<(), OpsError> {
        self.set_state(&spec.name, ContractState::Deploying);
        info!(contract = %spec.name, "Deploying");

        let init_code = spec.init_code(registry)?;

        let overrides = Overrides {
            nonce: Some(self.next_nonce),
            to: Some(TxKind::Create),
            ..Default::default()
        };
        let deploy_tx = self
            .client
            .build_eip1559_transaction(
                Address::zero(),
                self.signer.address(),
                init_code.into(),
                overrides,
            )
            .await
            .map_err(|err| self.fail(&spec.name, "deploy", err))?;

        let deployed_address = compute_created_address(self.signer.address(), deploy_tx.nonce);
        let (tx_hash, receipt) = match self
            .submit_and_confirm(&spec.name, "deploy", &deploy_tx, registry)
            .await
        {
            Ok(confirmed) => confirmed,
            Err(err) => {
                self.set_state(&spec.name, ContractState::Failed);
                return Err(err);
            }
        };

        let address = receipt.contract_address.unwrap_or(deployed_address);
        registry.record_deployment(ContractRecord {
            name: spec.name.clone(),
            address,
            abi: spec.abi.clone(),
            network: registry.network.clone(),
            deployed_at_block: Some(receipt.block_number),
            deploy_tx_hash: Some(tx_hash),
        })?;

        self.set_state(&spec.name, ContractState::Deployed);
        info!(
            contract = %spec.name,
            address = %format!("{address:#x}"),
            tx_hash = %format!("{tx_hash:#x}"),
            block = receipt.block_number,
            "Deployed"
        );
        Ok(())
    }

    async fn apply_ready_links(
        &mut self,
        plan: &DeployPlan,
        registry: &mut Registry,
    ) -> Result<(), OpsError> {
        for link in &plan.links {
            let (Some(from_address), Some(expected)) = (
                registry.address_of(&link.from_contract),
                registry.address_of(&link.to_contract),
            ) else {
                debug!(
                    from = %link.from_contract,
                    to = %link.to_contract,
                    "Link deferred, endpoint not deployed yet"
                );
                continue;
            };

            if registry.link_applied(&link.from_contract, &link.setter, expected) {
                continue;
            }

            self.check_cancelled()?;
            self.set_state(&link.from_contract, ContractState::Configuring);
            self.wire_link(link, from_address, expected, registry)
                .await?;
            self.set_state(&link.from_contract, ContractState::Linked);
        }
        Ok(())
    }

    async fn wire_link(
        &mut self,
        link: &LinkSpec,
        from_address: Address,
        expected: Address,
        registry: &mut Registry,
    ) -> Result<(), OpsError> {
        // Read before writing: an already-correct link costs no transaction.
        if let Some(current) = self.read_address(from_address, &link.getter).await? {
            if current == expected {
                info!(
                    from = %link.from_contract,
                    to = %link.to_contract,
                    "Link already wired on-chain, recording without sending"
                );
                return registry.record_link(AppliedLink {
                    from_contract: link.from_contract.clone(),
                    to_contract: link.to_contract.clone(),
                    setter: link.setter.clone(),
                    getter: link.getter.clone(),
                    resolved_address: expected,
                    tx_hash: None,
                });
            }
        }

        let calldata = encode_calldata(&link.setter, &[Value::Address(expected)])?;

        let mut tx: Option<EIP1559Transaction> = None;
        let mut last_reason = String::new();
        for attempt in 1..=self.options.max_link_attempts {
            self.check_cancelled()?;
            info!(
                from = %link.from_contract,
                setter = %link.setter,
                to = %format!("{expected:#x}"),
                attempt,
                "Wiring link"
            );

            let attempt_tx = match tx.take() {
                // A replacement for a stuck submission keeps its nonce and
                // outbids it.
                Some(mut stuck) => {
                    bump_gas(&mut stuck, LINK_GAS_BUMP_PERCENTAGE);
                    stuck
                }
                None => {
                    let overrides = Overrides {
                        nonce: Some(self.next_nonce),
                        ..Default::default()
                    };
                    match self
                        .client
                        .build_eip1559_transaction(
                            from_address,
                            self.signer.address(),
                            calldata.clone().into(),
                            overrides,
                        )
                        .await
                    {
                        Ok(built) => built,
                        Err(err) => {
                            // A revert during gas estimation is permanent;
                            // surface it instead of hammering the contract.
                            if let EthClientError::EstimateGasError(inner) = &err {
                                let reason = inner.to_string();
                                if reason.contains("revert") {
                                    return Err(OpsError::Reverted {
                                        contract: link.from_contract.clone(),
                                        operation: link.setter.clone(),
                                        reason,
                                    });
                                }
                            }
                            last_reason = err.to_string();
                            continue;
                        }
                    }
                }
            };

            match self
                .submit_and_confirm(&link.from_contract, &link.setter, &attempt_tx, registry)
                .await
            {
                Ok((tx_hash, _)) => {
                    // Trust nothing: the link only counts once the getter
                    // agrees.
                    match self.read_address(from_address, &link.getter).await? {
                        Some(current) if current == expected => {
                            info!(
                                from = %link.from_contract,
                                to = %link.to_contract,
                                tx_hash = %format!("{tx_hash:#x}"),
                                "Link wired"
                            );
                            return registry.record_link(AppliedLink {
                                from_contract: link.from_contract.clone(),
                                to_contract: link.to_contract.clone(),
                                setter: link.setter.clone(),
                                getter: link.getter.clone(),
                                resolved_address: expected,
                                tx_hash: Some(tx_hash),
                            });
                        }
                        Some(current) => {
                            warn!(
                                from = %link.from_contract,
                                expected = %format!("{expected:#x}"),
                                actual = %format!("{current:#x}"),
                                "Setter confirmed but getter disagrees, retrying"
                            );
                            last_reason =
                                format!("getter returned {current:#x}, expected {expected:#x}");
                        }
                        None => {
                            last_reason = "getter returned no address".to_string();
                        }
                    }
                }
                Err(OpsError::Reverted {
                    contract,
                    operation,
                    reason,
                }) => {
                    // Never auto-retried; downstream contracts depend on
                    // this wiring, so the operator has to look.
                    return Err(OpsError::Reverted {
                        contract,
                        operation,
                        reason,
                    });
                }
                Err(OpsError::Timeout { tx_hash, .. }) => {
                    warn!(
                        from = %link.from_contract,
                        tx_hash = %format!("{tx_hash:#x}"),
                        "Confirmation timed out, will replace with bumped fees"
                    );
                    last_reason = format!("confirmation timeout for {tx_hash:#x}");
                    tx = Some(attempt_tx);
                }
                Err(OpsError::EthClient {
                    source: EthClientError::NonceCollision(message),
                    ..
                }) => {
                    warn!(
                        from = %link.from_contract,
                        "Nonce collision, resequencing from chain state: {message}"
                    );
                    self.next_nonce = self
                        .client
                        .get_nonce(self.signer.address(), BlockIdentifier::Latest)
                        .await
                        .map_err(|err| OpsError::chain(&link.from_contract, &link.setter, err))?;
                    last_reason = message;
                }
                Err(err) => return Err(err),
            }
        }

        Err(OpsError::LinkWiringFailed {
            from: link.from_contract.clone(),
            to: link.to_contract.clone(),
            attempts: self.options.max_link_attempts,
            reason: last_reason,
        })
    }

    async fn read_address(
        &self,
        contract: Address,
        getter: &str,
    ) -> Result<Option<Address>, OpsError> {
        let calldata = encode_calldata(getter, &[])?;
        let response = self
            .client
            .call(contract, calldata.into(), Overrides::default())
            .await
            .map_err(|err| OpsError::chain(&format!("{contract:#x}"), getter, err))?;
        Ok(decode_address_word(&response).ok())
    }

    /// The deployment key is not the long-term administrative owner: when
    /// the plan names a different owner, hand the contract over after
    /// wiring.
    async fn transfer_ownership(
        &mut self,
        spec: &ContractSpec,
        registry: &mut Registry,
    ) -> Result<(), OpsError> {
        let Some(desired_owner) = spec.owner else {
            return Ok(());
        };
        if desired_owner == self.signer.address() {
            return Ok(());
        }
        let Some(contract_address) = registry.address_of(&spec.name) else {
            return Err(OpsError::UnknownContract(spec.name.clone()));
        };

        match self.read_address(contract_address, OWNER_SIGNATURE).await? {
            Some(current) if current == desired_owner => {
                debug!(contract = %spec.name, "Ownership already transferred");
                return Ok(());
            }
            Some(current) if current != self.signer.address() => {
                warn!(
                    contract = %spec.name,
                    owner = %format!("{current:#x}"),
                    "Owned by a third party, cannot transfer; flagged for operator"
                );
                return Ok(());
            }
            _ => {}
        }

        info!(
            contract = %spec.name,
            new_owner = %format!("{desired_owner:#x}"),
            "Transferring ownership"
        );
        let calldata = encode_calldata(
            TRANSFER_OWNERSHIP_SIGNATURE,
            &[Value::Address(desired_owner)],
        )?;
        let overrides = Overrides {
            nonce: Some(self.next_nonce),
            ..Default::default()
        };
        let tx = self
            .client
            .build_eip1559_transaction(
                contract_address,
                self.signer.address(),
                calldata.into(),
                overrides,
            )
            .await
            .map_err(|err| self.fail(&spec.name, TRANSFER_OWNERSHIP_SIGNATURE, err))?;

        let (tx_hash, _) = self
            .submit_and_confirm(&spec.name, TRANSFER_OWNERSHIP_SIGNATURE, &tx, registry)
            .await?;
        info!(
            contract = %spec.name,
            tx_hash = %format!("{tx_hash:#x}"),
            "Ownership transferred"
        );
        Ok(())
    }

    fn fail(&mut self, contract: &str, operation: &str, err: EthClientError) -> OpsError {
        self.set_state(contract, ContractState::Failed);
        OpsError::chain(contract, operation, err)
    }
}

/// The subset of the plan a run would actually deploy: everything not yet
/// recorded, in plan order.
pub fn contracts_to_deploy<'p>(
    plan: &'p DeployPlan,
    registry: &Registry,
) -> Result<Vec<&'p ContractSpec>, OpsError> {
    Ok(plan
        .plan_order()?
        .into_iter()
        .filter(|spec| registry.get(&spec.name).is_none())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::ArgSpec;
    use std::path::PathBuf;

    fn spec(name: &str, depends_on: &[&str]) -> ContractSpec {
        ContractSpec {
            name: name.to_string(),
            artifact: PathBuf::from(format!("artifacts/{name}.bin")),
            abi: None,
            constructor: Vec::new(),
            depends_on: depends_on.iter().map(|dep| dep.to_string()).collect(),
            owner: None,
        }
    }

    fn record(name: &str, byte: u8) -> ContractRecord {
        ContractRecord {
            name: name.to_string(),
            address: Address::repeat_byte(byte),
            abi: None,
            network: "testnet".to_string(),
            deployed_at_block: None,
            deploy_tx_hash: None,
        }
    }

    #[test]
    fn fully_recorded_registry_deploys_nothing() {
        let plan = DeployPlan {
            contracts: vec![spec("DungeonCore", &[]), spec("Hero", &["DungeonCore"])],
            links: Vec::new(),
            expected_owner: None,
            compromised: Vec::new(),
        };
        let mut registry = Registry::new("testnet", PathBuf::from("unused.json"));
        registry
            .contracts
            .insert("DungeonCore".to_string(), record("DungeonCore", 0x11));
        registry
            .contracts
            .insert("Hero".to_string(), record("Hero", 0x22));

        assert!(contracts_to_deploy(&plan, &registry).unwrap().is_empty());
    }

    #[test]
    fn partially_recorded_registry_resumes_in_order() {
        let mut hero = spec("Hero", &[]);
        hero.constructor = vec![ArgSpec::Contract {
            contract: "DungeonCore".to_string(),
        }];
        let plan = DeployPlan {
            contracts: vec![
                spec("DungeonCore", &[]),
                hero,
                spec("Marketplace", &["Hero"]),
            ],
            links: Vec::new(),
            expected_owner: None,
            compromised: Vec::new(),
        };
        let mut registry = Registry::new("testnet", PathBuf::from("unused.json"));
        registry
            .contracts
            .insert("DungeonCore".to_string(), record("DungeonCore", 0x11));

        let remaining = contracts_to_deploy(&plan, &registry).unwrap();
        let names: Vec<&str> = remaining.iter().map(|spec| spec.name.as_str()).collect();
        assert_eq!(names, vec!["Hero", "Marketplace"]);
    }
}

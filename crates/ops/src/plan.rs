use std::{
    collections::{BTreeMap, BTreeSet},
    fs,
    path::{Path, PathBuf},
};

use dungeon_rpc::calldata::Value;
use ethereum_types::{Address, U256};
use serde::{Deserialize, Serialize};

use crate::{errors::OpsError, registry::Registry};

/// A constructor argument in the deploy plan. `{"contract": "Name"}` resolves
/// to that contract's registry address, which also makes it an ordering
/// dependency.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum ArgSpec {
    Contract {
        contract: String,
    },
    Address {
        address: Address,
    },
    Uint {
        uint: U256,
    },
    Bool {
        #[serde(rename = "bool")]
        value: bool,
    },
    String {
        string: String,
    },
}

impl ArgSpec {
    pub fn resolve(&self, registry: &Registry) -> Result<Value, OpsError> {
        match self {
            ArgSpec::Contract { contract } => registry
                .address_of(contract)
                .map(Value::Address)
                .ok_or_else(|| OpsError::UnknownContract(contract.clone())),
            ArgSpec::Address { address } => Ok(Value::Address(*address)),
            ArgSpec::Uint { uint } => Ok(Value::Uint(*uint)),
            ArgSpec::Bool { value } => Ok(Value::Bool(*value)),
            ArgSpec::String { string } => Ok(Value::String(string.clone())),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ContractSpec {
    pub name: String,
    /// Path to the solc `.bin` artifact (hex-encoded init code).
    pub artifact: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abi: Option<PathBuf>,
    #[serde(default)]
    pub constructor: Vec<ArgSpec>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Ownership is transferred here after wiring when it differs from the
    /// deployer address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<Address>,
}

/// A required cross-contract wiring: `setter` applied to `from_contract`
/// must make `getter` return `to_contract`'s address.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct LinkSpec {
    pub from_contract: String,
    pub to_contract: String,
    pub setter: String,
    pub getter: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct DeployPlan {
    pub contracts: Vec<ContractSpec>,
    #[serde(default)]
    pub links: Vec<LinkSpec>,
    /// Administrative address every contract's `owner()` is expected to
    /// return during verification.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_owner: Option<Address>,
    /// Known-compromised wallets; an owner match here is flagged loudly.
    #[serde(default)]
    pub compromised: Vec<Address>,
}

impl DeployPlan {
    pub fn from_file(path: &Path) -> Result<Self, OpsError> {
        let raw = fs::read_to_string(path).map_err(|err| OpsError::io(path, err))?;
        let plan: DeployPlan =
            serde_json::from_str(&raw).map_err(|err| OpsError::serde(path, err))?;
        plan.validate()?;
        Ok(plan)
    }

    pub fn contract(&self, name: &str) -> Option<&ContractSpec> {
        self.contracts.iter().find(|spec| spec.name == name)
    }

    fn validate(&self) -> Result<(), OpsError> {
        let declared: BTreeSet<&str> = self
            .contracts
            .iter()
            .map(|spec| spec.name.as_str())
            .collect();
        if declared.len() != self.contracts.len() {
            return Err(OpsError::InvalidPlan(
                "duplicate contract names in plan".to_string(),
            ));
        }

        for spec in &self.contracts {
            for dependency in spec.dependencies() {
                if !declared.contains(dependency.as_str()) {
                    return Err(OpsError::UnknownContract(dependency));
                }
            }
        }
        for link in &self.links {
            for name in [&link.from_contract, &link.to_contract] {
                if !declared.contains(name.as_str()) {
                    return Err(OpsError::UnknownContract(name.clone()));
                }
            }
        }
        Ok(())
    }

    /// Deployment order: every contract comes after everything it depends
    /// on, ties broken by name so re-runs walk the same sequence.
    pub fn plan_order(&self) -> Result<Vec<&ContractSpec>, OpsError> {
        let specs: BTreeMap<&str, &ContractSpec> = self
            .contracts
            .iter()
            .map(|spec| (spec.name.as_str(), spec))
            .collect();

        let mut remaining_deps: BTreeMap<&str, BTreeSet<String>> = self
            .contracts
            .iter()
            .map(|spec| (spec.name.as_str(), spec.dependencies()))
            .collect();

        let mut order = Vec::with_capacity(self.contracts.len());
        while !remaining_deps.is_empty() {
            let ready: Option<&str> = remaining_deps
                .iter()
                .find(|(_, deps)| deps.is_empty())
                .map(|(name, _)| *name);

            let Some(name) = ready else {
                // Everything left depends on something unresolved.
                let stuck = remaining_deps
                    .keys()
                    .next()
                    .map(|name| name.to_string())
                    .unwrap_or_default();
                return Err(OpsError::CyclicDependency(stuck));
            };

            remaining_deps.remove(name);
            for deps in remaining_deps.values_mut() {
                deps.remove(name);
            }
            if let Some(spec) = specs.get(name) {
                order.push(*spec);
            }
        }
        Ok(order)
    }
}

impl ContractSpec {
    /// Declared dependencies plus every contract referenced by a
    /// constructor argument.
    pub fn dependencies(&self) -> BTreeSet<String> {
        let mut deps: BTreeSet<String> = self.depends_on.iter().cloned().collect();
        for arg in &self.constructor {
            if let ArgSpec::Contract { contract } = arg {
                deps.insert(contract.clone());
            }
        }
        deps
    }

    /// Hex-decoded init code from the solc artifact, with ABI-encoded
    /// constructor arguments appended.
    pub fn init_code(&self, registry: &Registry) -> Result<Vec<u8>, OpsError> {
        let raw = fs::read_to_string(&self.artifact)
            .map_err(|err| OpsError::io(&self.artifact, err))?;
        let mut init_code = hex::decode(raw.trim().trim_start_matches("0x")).map_err(|err| {
            OpsError::InvalidPlan(format!(
                "artifact {} is not valid hex: {err}",
                self.artifact.display()
            ))
        })?;

        if !self.constructor.is_empty() {
            let values = self
                .constructor
                .iter()
                .map(|arg| arg.resolve(registry))
                .collect::<Result<Vec<_>, _>>()?;
            init_code.extend_from_slice(&dungeon_rpc::calldata::encode_constructor_args(&values)?);
        }
        Ok(init_code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

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

    fn plan(contracts: Vec<ContractSpec>) -> DeployPlan {
        DeployPlan {
            contracts,
            links: Vec::new(),
            expected_owner: None,
            compromised: Vec::new(),
        }
    }

    fn position(order: &[&ContractSpec], name: &str) -> usize {
        order.iter().position(|spec| spec.name == name).unwrap()
    }

    #[test]
    fn orders_chain_after_dependencies() {
        let plan = plan(vec![
            spec("DungeonMaster", &["DungeonCore"]),
            spec("DungeonCore", &["Oracle"]),
            spec("Oracle", &[]),
        ]);
        let order = plan.plan_order().unwrap();
        assert!(position(&order, "Oracle") < position(&order, "DungeonCore"));
        assert!(position(&order, "DungeonCore") < position(&order, "DungeonMaster"));
    }

    #[test]
    fn orders_diamond_dependencies() {
        let plan = plan(vec![
            spec("Marketplace", &["Hero", "Relic"]),
            spec("Hero", &["DungeonCore"]),
            spec("Relic", &["DungeonCore"]),
            spec("DungeonCore", &[]),
        ]);
        let order = plan.plan_order().unwrap();
        assert_eq!(position(&order, "DungeonCore"), 0);
        assert_eq!(position(&order, "Marketplace"), 3);
    }

    #[test]
    fn constructor_reference_is_a_dependency() {
        let mut hero = spec("Hero", &[]);
        hero.constructor = vec![ArgSpec::Contract {
            contract: "DungeonCore".to_string(),
        }];
        let plan = plan(vec![hero, spec("DungeonCore", &[])]);
        let order = plan.plan_order().unwrap();
        assert!(position(&order, "DungeonCore") < position(&order, "Hero"));
    }

    #[test]
    fn cycle_is_rejected() {
        let plan = plan(vec![
            spec("DungeonCore", &["DungeonMaster"]),
            spec("DungeonMaster", &["DungeonCore"]),
        ]);
        let err = plan.plan_order().unwrap_err();
        assert!(matches!(err, OpsError::CyclicDependency(_)));
    }

    #[test]
    fn undeclared_dependency_is_rejected() {
        let plan = plan(vec![spec("Hero", &["Ghost"])]);
        let err = plan.validate().unwrap_err();
        assert!(matches!(err, OpsError::UnknownContract(name) if name == "Ghost"));
    }

    #[test]
    fn link_endpoints_must_be_declared() {
        let mut with_link = plan(vec![spec("DungeonCore", &[])]);
        with_link.links.push(LinkSpec {
            from_contract: "DungeonCore".to_string(),
            to_contract: "DungeonMaster".to_string(),
            setter: "setDungeonMaster(address)".to_string(),
            getter: "dungeonMaster()".to_string(),
        });
        let err = with_link.validate().unwrap_err();
        assert!(matches!(err, OpsError::UnknownContract(name) if name == "DungeonMaster"));
    }

    #[test]
    fn contract_args_resolve_through_registry() {
        let mut registry = Registry::new("testnet", PathBuf::from("unused.json"));
        registry.contracts.insert(
            "DungeonCore".to_string(),
            crate::registry::ContractRecord {
                name: "DungeonCore".to_string(),
                address: Address::repeat_byte(0x11),
                abi: None,
                network: "testnet".to_string(),
                deployed_at_block: None,
                deploy_tx_hash: None,
            },
        );

        let arg = ArgSpec::Contract {
            contract: "DungeonCore".to_string(),
        };
        assert_eq!(
            arg.resolve(&registry).unwrap(),
            Value::Address(Address::repeat_byte(0x11))
        );

        let missing = ArgSpec::Contract {
            contract: "VRFManager".to_string(),
        };
        assert!(matches!(
            missing.resolve(&registry).unwrap_err(),
            OpsError::UnknownContract(_)
        ));
    }

    #[test]
    fn arg_spec_json_forms() {
        let args: Vec<ArgSpec> = serde_json::from_str(
            r#"[
                {"contract": "DungeonCore"},
                {"address": "0x000000000000000000000000000000000000beef"},
                {"uint": "0x64"},
                {"bool": true},
                {"string": "ipfs://base"}
            ]"#,
        )
        .unwrap();
        assert_eq!(args.len(), 5);
        assert!(matches!(&args[0], ArgSpec::Contract { contract } if contract == "DungeonCore"));
        assert!(matches!(&args[2], ArgSpec::Uint { uint } if *uint == U256::from(100)));
        assert!(matches!(&args[3], ArgSpec::Bool { value: true }));
    }
}

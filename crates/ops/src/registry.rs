use std::{
    collections::BTreeMap,
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use ethereum_types::{Address, H256};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::OpsError;

/// One deployed contract instance.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ContractRecord {
    pub name: String,
    pub address: Address,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abi: Option<PathBuf>,
    pub network: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployed_at_block: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deploy_tx_hash: Option<H256>,
}

/// A cross-contract reference that was wired on-chain.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct AppliedLink {
    pub from_contract: String,
    pub to_contract: String,
    pub setter: String,
    pub getter: String,
    pub resolved_address: Address,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<H256>,
}

/// A submitted transaction whose outcome has not been observed yet. Entries
/// survive crashes; a new run resolves them before doing anything else.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct PendingTx {
    pub tx_hash: H256,
    pub contract: String,
    pub operation: String,
    #[serde(default)]
    pub unknown_outcome: bool,
}

/// Persisted source of truth for one network: every deployed contract and
/// every applied link. Written back after each mutation so a crash never
/// loses recorded addresses.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Registry {
    pub network: String,
    pub contracts: BTreeMap<String, ContractRecord>,
    #[serde(default)]
    pub links: Vec<AppliedLink>,
    #[serde(default)]
    pub pending_txs: Vec<PendingTx>,
    #[serde(skip)]
    path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RegistryChange {
    Added {
        name: String,
        address: Address,
    },
    Updated {
        name: String,
        old_address: Address,
        new_address: Address,
    },
    Removed {
        name: String,
    },
}

impl std::fmt::Display for RegistryChange {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            RegistryChange::Added { name, address } => {
                write!(f, "{name} added at {address:#x}")
            }
            RegistryChange::Updated {
                name,
                old_address,
                new_address,
            } => write!(f, "{name} moved from {old_address:#x} to {new_address:#x}"),
            RegistryChange::Removed { name } => write!(f, "{name} removed"),
        }
    }
}

pub fn registry_path(dir: &Path, network: &str) -> PathBuf {
    dir.join(format!("{network}.json"))
}

impl Registry {
    pub fn new(network: &str, path: PathBuf) -> Self {
        Self {
            network: network.to_string(),
            contracts: BTreeMap::new(),
            links: Vec::new(),
            pending_txs: Vec::new(),
            path: Some(path),
        }
    }

    pub fn load(dir: &Path, network: &str) -> Result<Self, OpsError> {
        let path = registry_path(dir, network);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(OpsError::RegistryNotFound {
                    network: network.to_string(),
                    path,
                });
            }
            Err(err) => return Err(OpsError::io(path, err)),
        };
        let mut registry: Registry =
            serde_json::from_str(&raw).map_err(|err| OpsError::serde(&path, err))?;
        registry.path = Some(path);
        Ok(registry)
    }

    /// Loads the snapshot for `network`, or starts an empty one if this is
    /// the first run against it.
    pub fn load_or_new(dir: &Path, network: &str) -> Result<Self, OpsError> {
        match Self::load(dir, network) {
            Ok(registry) => Ok(registry),
            Err(OpsError::RegistryNotFound { .. }) => {
                Ok(Self::new(network, registry_path(dir, network)))
            }
            Err(err) => Err(err),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ContractRecord> {
        self.contracts.get(name)
    }

    pub fn address_of(&self, name: &str) -> Option<Address> {
        self.contracts.get(name).map(|record| record.address)
    }

    pub fn record_deployment(&mut self, record: ContractRecord) -> Result<(), OpsError> {
        self.contracts.insert(record.name.clone(), record);
        self.save()
    }

    pub fn record_link(
        &mut self,
        link: AppliedLink,
    ) -> Result<(), OpsError> {
        self.links.retain(|applied| {
            applied.from_contract != link.from_contract || applied.setter != link.setter
        });
        self.links.push(link);
        self.save()
    }

    pub fn link_applied(&self, from_contract: &str, setter: &str, expected: Address) -> bool {
        self.links.iter().any(|link| {
            link.from_contract == from_contract
                && link.setter == setter
                && link.resolved_address == expected
        })
    }

    pub fn record_pending_tx(
        &mut self,
        tx_hash: H256,
        contract: &str,
        operation: &str,
    ) -> Result<(), OpsError> {
        self.pending_txs.push(PendingTx {
            tx_hash,
            contract: contract.to_string(),
            operation: operation.to_string(),
            unknown_outcome: false,
        });
        self.save()
    }

    pub fn clear_pending_tx(&mut self, tx_hash: H256) -> Result<(), OpsError> {
        self.pending_txs.retain(|pending| pending.tx_hash != tx_hash);
        self.save()
    }

    pub fn mark_pending_unknown(&mut self, tx_hash: H256) -> Result<(), OpsError> {
        for pending in &mut self.pending_txs {
            if pending.tx_hash == tx_hash {
                pending.unknown_outcome = true;
            }
        }
        self.save()
    }

    /// Record-level differences against an older snapshot.
    pub fn diff(&self, other: &Registry) -> Vec<RegistryChange> {
        let mut changes = Vec::new();
        for (name, record) in &self.contracts {
            match other.contracts.get(name) {
                None => changes.push(RegistryChange::Added {
                    name: name.clone(),
                    address: record.address,
                }),
                Some(old) if old.address != record.address => {
                    changes.push(RegistryChange::Updated {
                        name: name.clone(),
                        old_address: old.address,
                        new_address: record.address,
                    })
                }
                Some(_) => {}
            }
        }
        for name in other.contracts.keys() {
            if !self.contracts.contains_key(name) {
                changes.push(RegistryChange::Removed { name: name.clone() });
            }
        }
        changes
    }

    /// Serializes to the backing file, via a temp file and rename so a crash
    /// mid-write cannot truncate the previous snapshot.
    pub fn save(&self) -> Result<(), OpsError> {
        let path = self
            .path
            .as_ref()
            .ok_or_else(|| OpsError::Internal("registry has no backing path".to_string()))?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| OpsError::io(parent, err))?;
        }

        let contents = serde_json::to_string_pretty(self)
            .map_err(|err| OpsError::serde(path.clone(), err))?;
        let tmp_path = path.with_extension("json.tmp");
        let mut tmp_file =
            fs::File::create(&tmp_path).map_err(|err| OpsError::io(&tmp_path, err))?;
        tmp_file
            .write_all(contents.as_bytes())
            .and_then(|_| tmp_file.write_all(b"\n"))
            .map_err(|err| OpsError::io(&tmp_path, err))?;
        fs::rename(&tmp_path, path).map_err(|err| OpsError::io(path.clone(), err))?;
        debug!(path = %path.display(), "Registry persisted");
        Ok(())
    }
}

/// Advisory exclusive lock over a network's registry. Two orchestrator runs
/// against the same network must never interleave writes.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
}

impl RunLock {
    pub fn acquire(dir: &Path, network: &str) -> Result<Self, OpsError> {
        fs::create_dir_all(dir).map_err(|err| OpsError::io(dir, err))?;
        let path = dir.join(format!("{network}.lock"));

        match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(mut file) => {
                let _ = writeln!(file, "pid {}", std::process::id());
                Ok(Self { path })
            }
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                let holder = fs::read_to_string(&path).unwrap_or_default();
                let holder = holder.trim();
                Err(OpsError::ConcurrentRunDetected {
                    network: network.to_string(),
                    detail: format!(
                        "lockfile {} held by {}",
                        path.display(),
                        if holder.is_empty() { "unknown" } else { holder }
                    ),
                })
            }
            Err(err) => Err(OpsError::io(path, err)),
        }
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn test_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("dungeon-registry-tests").join(name);
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn record(name: &str, byte: u8) -> ContractRecord {
        ContractRecord {
            name: name.to_string(),
            address: Address::repeat_byte(byte),
            abi: None,
            network: "testnet".to_string(),
            deployed_at_block: Some(100),
            deploy_tx_hash: None,
        }
    }

    #[test]
    fn load_without_snapshot_is_not_found() {
        let dir = test_dir("missing");
        let err = Registry::load(&dir, "testnet").unwrap_err();
        assert!(matches!(err, OpsError::RegistryNotFound { .. }));
    }

    #[test]
    fn deployments_round_trip_through_disk() {
        let dir = test_dir("roundtrip");
        let mut registry = Registry::load_or_new(&dir, "testnet").unwrap();
        registry.record_deployment(record("DungeonCore", 0x11)).unwrap();
        registry.record_deployment(record("Hero", 0x22)).unwrap();

        let reloaded = Registry::load(&dir, "testnet").unwrap();
        assert_eq!(reloaded.contracts.len(), 2);
        assert_eq!(
            reloaded.address_of("DungeonCore"),
            Some(Address::repeat_byte(0x11))
        );
    }

    #[test]
    fn diff_reports_added_and_updated() {
        let dir = test_dir("diff");
        let mut old = Registry::new("testnet", registry_path(&dir, "testnet"));
        old.contracts
            .insert("DungeonCore".to_string(), record("DungeonCore", 0x11));
        old.contracts.insert("Relic".to_string(), record("Relic", 0x33));

        let mut new = old.clone();
        new.contracts
            .insert("Hero".to_string(), record("Hero", 0x22));
        new.contracts
            .insert("DungeonCore".to_string(), record("DungeonCore", 0x44));
        new.contracts.remove("Relic");

        let changes = new.diff(&old);
        assert_eq!(changes.len(), 3);
        assert!(changes.contains(&RegistryChange::Added {
            name: "Hero".to_string(),
            address: Address::repeat_byte(0x22),
        }));
        assert!(changes.contains(&RegistryChange::Updated {
            name: "DungeonCore".to_string(),
            old_address: Address::repeat_byte(0x11),
            new_address: Address::repeat_byte(0x44),
        }));
        assert!(changes.contains(&RegistryChange::Removed {
            name: "Relic".to_string(),
        }));
    }

    #[test]
    fn second_lock_on_same_network_is_rejected() {
        let dir = test_dir("lock");
        let _held = RunLock::acquire(&dir, "testnet").unwrap();

        let err = RunLock::acquire(&dir, "testnet").unwrap_err();
        assert!(matches!(err, OpsError::ConcurrentRunDetected { .. }));

        // A different network is unaffected.
        RunLock::acquire(&dir, "mainnet").unwrap();
    }

    #[test]
    fn lock_releases_on_drop() {
        let dir = test_dir("lock-drop");
        drop(RunLock::acquire(&dir, "testnet").unwrap());
        RunLock::acquire(&dir, "testnet").unwrap();
    }

    #[test]
    fn pending_txs_survive_reload_and_clear() {
        let dir = test_dir("pending");
        let mut registry = Registry::load_or_new(&dir, "testnet").unwrap();
        let hash = H256::from_str(
            "0x58e5a0fc7fbc849eddc100d44e86276168a8c7baaa5604e44ba6f5eb8ba1b7eb",
        )
        .unwrap();
        registry.record_pending_tx(hash, "Hero", "deploy").unwrap();

        let mut reloaded = Registry::load(&dir, "testnet").unwrap();
        assert_eq!(reloaded.pending_txs.len(), 1);

        reloaded.clear_pending_tx(hash).unwrap();
        assert!(Registry::load(&dir, "testnet").unwrap().pending_txs.is_empty());
    }
}

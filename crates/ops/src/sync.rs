use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{debug, info, warn};

use crate::{errors::OpsError, registry::Registry};

/// An external consumer of the registry: a frontend config, a backend's ABI
/// directory, a subgraph-style manifest.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum SyncTarget {
    /// Flat `{ name: address }` JSON file.
    AddressMap { path: PathBuf },
    /// One ABI JSON file per contract, named `<Contract>.json`.
    AbiDir { path: PathBuf },
    /// In-place update of address fields in an existing structured manifest.
    ManifestPatch { path: PathBuf },
}

pub fn load_targets(path: &Path) -> Result<Vec<SyncTarget>, OpsError> {
    let raw = fs::read_to_string(path).map_err(|err| OpsError::io(path, err))?;
    serde_json::from_str(&raw).map_err(|err| OpsError::serde(path, err))
}

#[derive(Debug, Default)]
pub struct SyncSummary {
    pub written: Vec<PathBuf>,
    pub unchanged: Vec<PathBuf>,
    pub skipped: Vec<PathBuf>,
}

/// Pushes the registry snapshot to every target. Transforms are pure
/// functions of the registry, so running this twice against an unchanged
/// registry writes nothing the second time.
pub fn propagate(registry: &Registry, targets: &[SyncTarget]) -> Result<SyncSummary, OpsError> {
    let mut summary = SyncSummary::default();

    for target in targets {
        match target {
            SyncTarget::AddressMap { path } => {
                let contents = render_address_map(registry)?;
                record(&mut summary, path, write_if_changed(path, &contents)?);
            }
            SyncTarget::AbiDir { path } => {
                for (name, contract) in &registry.contracts {
                    let Some(abi_path) = &contract.abi else {
                        debug!(contract = %name, "No ABI artifact recorded, skipping");
                        continue;
                    };
                    let abi = match fs::read_to_string(abi_path) {
                        Ok(abi) => abi,
                        Err(err) => {
                            warn!(
                                contract = %name,
                                abi = %abi_path.display(),
                                "ABI artifact unreadable, skipping: {err}"
                            );
                            summary.skipped.push(abi_path.clone());
                            continue;
                        }
                    };
                    let out_path = path.join(format!("{name}.json"));
                    let changed = write_if_changed(&out_path, &abi)?;
                    record(&mut summary, &out_path, changed);
                }
            }
            SyncTarget::ManifestPatch { path } => {
                let raw = fs::read_to_string(path).map_err(|err| OpsError::io(path, err))?;
                let mut manifest: JsonValue =
                    serde_json::from_str(&raw).map_err(|err| OpsError::serde(path, err))?;

                let addresses = address_strings(registry);
                let patched = patch_value(&mut manifest, &addresses);
                debug!(path = %path.display(), patched, "Manifest fields patched");

                let contents = serde_json::to_string_pretty(&manifest)
                    .map_err(|err| OpsError::serde(path, err))?
                    + "\n";
                record(&mut summary, path, write_if_changed(path, &contents)?);
            }
        }
    }

    info!(
        written = summary.written.len(),
        unchanged = summary.unchanged.len(),
        skipped = summary.skipped.len(),
        "Sync propagation finished"
    );
    Ok(summary)
}

fn record(summary: &mut SyncSummary, path: &Path, changed: bool) {
    if changed {
        summary.written.push(path.to_path_buf());
    } else {
        summary.unchanged.push(path.to_path_buf());
    }
}

fn address_strings(registry: &Registry) -> BTreeMap<String, String> {
    registry
        .contracts
        .iter()
        .map(|(name, contract)| (name.clone(), format!("{:#x}", contract.address)))
        .collect()
}

fn render_address_map(registry: &Registry) -> Result<String, OpsError> {
    let map = address_strings(registry);
    serde_json::to_string_pretty(&map)
        .map(|contents| contents + "\n")
        .map_err(|err| OpsError::Internal(format!("Failed to render address map: {err}")))
}

/// Replaces the `address` field of any object whose `name` is a known
/// contract, both directly and under a nested `source` object. Everything
/// else round-trips untouched.
fn patch_value(value: &mut JsonValue, addresses: &BTreeMap<String, String>) -> usize {
    let mut patched = 0;
    match value {
        JsonValue::Object(map) => {
            let known_address = match map.get("name") {
                Some(JsonValue::String(name)) => addresses.get(name.as_str()).cloned(),
                _ => None,
            };
            if let Some(address) = known_address {
                if let Some(slot) = map.get_mut("address") {
                    patched += replace_address(slot, &address);
                }
                if let Some(JsonValue::Object(source)) = map.get_mut("source") {
                    if let Some(slot) = source.get_mut("address") {
                        patched += replace_address(slot, &address);
                    }
                }
            }
            for (_, nested) in map.iter_mut() {
                patched += patch_value(nested, addresses);
            }
        }
        JsonValue::Array(items) => {
            for item in items.iter_mut() {
                patched += patch_value(item, addresses);
            }
        }
        _ => {}
    }
    patched
}

fn replace_address(slot: &mut JsonValue, address: &str) -> usize {
    if slot.as_str() == Some(address) {
        return 0;
    }
    *slot = JsonValue::String(address.to_string());
    1
}

/// Byte-compares before writing so re-runs leave no spurious diffs behind.
fn write_if_changed(path: &Path, contents: &str) -> Result<bool, OpsError> {
    if let Ok(existing) = fs::read_to_string(path) {
        if existing == contents {
            return Ok(false);
        }
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|err| OpsError::io(parent, err))?;
    }
    fs::write(path, contents).map_err(|err| OpsError::io(path, err))?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ContractRecord;
    use ethereum_types::Address;

    fn test_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("dungeon-sync-tests").join(name);
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn registry_with(dir: &Path, entries: &[(&str, u8)]) -> Registry {
        let mut registry = Registry::new("testnet", dir.join("testnet.json"));
        for (name, byte) in entries {
            registry.contracts.insert(
                name.to_string(),
                ContractRecord {
                    name: name.to_string(),
                    address: Address::repeat_byte(*byte),
                    abi: None,
                    network: "testnet".to_string(),
                    deployed_at_block: None,
                    deploy_tx_hash: None,
                },
            );
        }
        registry
    }

    #[test]
    fn address_map_is_idempotent() {
        let dir = test_dir("address-map");
        let registry = registry_with(&dir, &[("DungeonCore", 0x11), ("Hero", 0x22)]);
        let targets = vec![SyncTarget::AddressMap {
            path: dir.join("contracts.json"),
        }];

        let first = propagate(&registry, &targets).unwrap();
        assert_eq!(first.written.len(), 1);
        let first_bytes = fs::read(dir.join("contracts.json")).unwrap();

        let second = propagate(&registry, &targets).unwrap();
        assert!(second.written.is_empty());
        assert_eq!(second.unchanged.len(), 1);
        assert_eq!(fs::read(dir.join("contracts.json")).unwrap(), first_bytes);
    }

    #[test]
    fn manifest_patch_touches_only_recognized_fields() {
        let dir = test_dir("manifest");
        let manifest_path = dir.join("subgraph.json");
        fs::write(
            &manifest_path,
            r#"{
                "specVersion": "0.0.4",
                "description": "dungeon indexing",
                "dataSources": [
                    {
                        "name": "DungeonCore",
                        "kind": "ethereum/contract",
                        "source": {
                            "address": "0x0000000000000000000000000000000000000000",
                            "startBlock": 123
                        }
                    },
                    {
                        "name": "UnrelatedThing",
                        "source": {
                            "address": "0xdeaddeaddeaddeaddeaddeaddeaddeaddeaddead"
                        }
                    }
                ]
            }"#,
        )
        .unwrap();

        let registry = registry_with(&dir, &[("DungeonCore", 0x11)]);
        let targets = vec![SyncTarget::ManifestPatch {
            path: manifest_path.clone(),
        }];
        propagate(&registry, &targets).unwrap();

        let patched: JsonValue =
            serde_json::from_str(&fs::read_to_string(&manifest_path).unwrap()).unwrap();
        assert_eq!(
            patched["dataSources"][0]["source"]["address"],
            format!("{:#x}", Address::repeat_byte(0x11))
        );
        // Unrelated fields and entries are untouched.
        assert_eq!(patched["specVersion"], "0.0.4");
        assert_eq!(patched["description"], "dungeon indexing");
        assert_eq!(patched["dataSources"][0]["source"]["startBlock"], 123);
        assert_eq!(
            patched["dataSources"][1]["source"]["address"],
            "0xdeaddeaddeaddeaddeaddeaddeaddeaddeaddead"
        );

        // Patching again produces byte-identical output.
        let first_bytes = fs::read(&manifest_path).unwrap();
        let second = propagate(&registry, &targets).unwrap();
        assert!(second.written.is_empty());
        assert_eq!(fs::read(&manifest_path).unwrap(), first_bytes);
    }

    #[test]
    fn abi_dir_copies_per_contract_files() {
        let dir = test_dir("abi-dir");
        let abi_path = dir.join("DungeonCore.abi.json");
        fs::write(&abi_path, r#"[{"type":"function","name":"dungeonMaster"}]"#).unwrap();

        let mut registry = registry_with(&dir, &[("DungeonCore", 0x11)]);
        if let Some(record) = registry.contracts.get_mut("DungeonCore") {
            record.abi = Some(abi_path.clone());
        }

        let out_dir = dir.join("frontend-abis");
        let targets = vec![SyncTarget::AbiDir {
            path: out_dir.clone(),
        }];
        let summary = propagate(&registry, &targets).unwrap();
        assert_eq!(summary.written.len(), 1);
        assert_eq!(
            fs::read_to_string(out_dir.join("DungeonCore.json")).unwrap(),
            fs::read_to_string(&abi_path).unwrap()
        );
    }

    #[test]
    fn targets_file_parses_all_kinds() {
        let targets: Vec<SyncTarget> = serde_json::from_str(
            r#"[
                {"kind": "address-map", "path": "frontend/src/contracts.json"},
                {"kind": "abi-dir", "path": "frontend/src/abis"},
                {"kind": "manifest-patch", "path": "subgraph/subgraph.json"}
            ]"#,
        )
        .unwrap();
        assert_eq!(targets.len(), 3);
        assert!(matches!(targets[0], SyncTarget::AddressMap { .. }));
        assert!(matches!(targets[2], SyncTarget::ManifestPatch { .. }));
    }
}

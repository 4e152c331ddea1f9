use std::fmt;

use dungeon_rpc::{
    BlockIdentifier, EthClient, Overrides,
    calldata::{decode_address_word, encode_calldata},
};
use ethereum_types::Address;
use tracing::debug;

use crate::{errors::OpsError, plan::DeployPlan, registry::Registry};

const OWNER_SIGNATURE: &str = "owner()";

/// One audited fact: what was checked, what the registry expected, what the
/// chain answered.
#[derive(Debug, Clone, PartialEq)]
pub struct Finding {
    pub contract: String,
    pub check: String,
    pub expected: Option<String>,
    pub actual: Option<String>,
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}: {}", self.contract, self.check)?;
        if let Some(expected) = &self.expected {
            write!(f, " expected {expected}")?;
        }
        if let Some(actual) = &self.actual {
            write!(f, ", got {actual}")?;
        }
        Ok(())
    }
}

/// Advisory output of a verification run. Never mutates chain state.
#[derive(Debug, Default)]
pub struct Report {
    pub passed: Vec<Finding>,
    pub failed: Vec<Finding>,
}

impl Report {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn merge(&mut self, other: Report) {
        self.passed.extend(other.passed);
        self.failed.extend(other.failed);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnerStatus {
    Expected,
    KnownCompromised,
    Unexpected,
}

pub fn classify_owner(owner: Address, expected: Address, blocklist: &[Address]) -> OwnerStatus {
    if owner == expected {
        OwnerStatus::Expected
    } else if blocklist.contains(&owner) {
        OwnerStatus::KnownCompromised
    } else {
        OwnerStatus::Unexpected
    }
}

/// Audits every recorded contract and every planned link against the chain.
pub async fn verify(
    plan: &DeployPlan,
    registry: &Registry,
    client: &EthClient,
) -> Result<Report, OpsError> {
    let mut report = Report::default();

    for (name, record) in &registry.contracts {
        let code = client
            .get_code(record.address, BlockIdentifier::Latest)
            .await
            .map_err(|err| OpsError::chain(name, "eth_getCode", err))?;
        let finding = Finding {
            contract: name.clone(),
            check: "deployed code present".to_string(),
            expected: Some("non-empty bytecode".to_string()),
            actual: code.is_empty().then(|| "no code at address".to_string()),
        };
        if code.is_empty() {
            report.failed.push(finding);
        } else {
            report.passed.push(finding);
        }
    }

    for link in &plan.links {
        let check = format!("{} -> {}", link.getter, link.to_contract);
        let (Some(from), Some(to)) = (
            registry.get(&link.from_contract),
            registry.get(&link.to_contract),
        ) else {
            report.failed.push(Finding {
                contract: link.from_contract.clone(),
                check,
                expected: Some("both endpoints recorded in registry".to_string()),
                actual: Some("endpoint missing from registry".to_string()),
            });
            continue;
        };

        let calldata = encode_calldata(&link.getter, &[])?;
        let response = client
            .call(from.address, calldata.into(), Overrides::default())
            .await;

        let finding = match response {
            Ok(raw) => match decode_address_word(&raw) {
                Ok(actual) if actual == to.address => Finding {
                    contract: link.from_contract.clone(),
                    check,
                    expected: Some(format!("{:#x}", to.address)),
                    actual: None,
                },
                Ok(actual) => Finding {
                    contract: link.from_contract.clone(),
                    check,
                    expected: Some(format!("{:#x}", to.address)),
                    actual: Some(format!("{actual:#x}")),
                },
                Err(err) => Finding {
                    contract: link.from_contract.clone(),
                    check,
                    expected: Some(format!("{:#x}", to.address)),
                    actual: Some(format!("undecodable response: {err}")),
                },
            },
            Err(err) => Finding {
                contract: link.from_contract.clone(),
                check,
                expected: Some(format!("{:#x}", to.address)),
                actual: Some(format!("call failed: {err}")),
            },
        };

        if finding.actual.is_none() {
            report.passed.push(finding);
        } else {
            report.failed.push(finding);
        }
    }

    Ok(report)
}

/// Compares every contract's `owner()` against the expected administrative
/// address; owners on the compromised-wallet blocklist are called out
/// explicitly. Contracts without an owner getter are skipped.
pub async fn verify_ownership(
    registry: &Registry,
    expected_owner: Address,
    blocklist: &[Address],
    client: &EthClient,
) -> Result<Report, OpsError> {
    let mut report = Report::default();
    let calldata = encode_calldata(OWNER_SIGNATURE, &[])?;

    for (name, record) in &registry.contracts {
        let response = match client
            .call(record.address, calldata.clone().into(), Overrides::default())
            .await
        {
            Ok(response) => response,
            Err(err) => {
                debug!(contract = %name, "No readable owner(), skipping: {err}");
                continue;
            }
        };
        let Ok(owner) = decode_address_word(&response) else {
            debug!(contract = %name, "owner() response is not an address, skipping");
            continue;
        };

        let finding = |actual: Option<String>| Finding {
            contract: name.clone(),
            check: "owner".to_string(),
            expected: Some(format!("{expected_owner:#x}")),
            actual,
        };
        match classify_owner(owner, expected_owner, blocklist) {
            OwnerStatus::Expected => report.passed.push(finding(None)),
            OwnerStatus::KnownCompromised => report.failed.push(finding(Some(format!(
                "{owner:#x} (known compromised wallet)"
            )))),
            OwnerStatus::Unexpected => {
                report.failed.push(finding(Some(format!("{owner:#x}"))))
            }
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owner_classification() {
        let expected = Address::repeat_byte(0xad);
        let compromised = Address::repeat_byte(0xcd);
        let blocklist = vec![compromised];

        assert_eq!(
            classify_owner(expected, expected, &blocklist),
            OwnerStatus::Expected
        );
        assert_eq!(
            classify_owner(compromised, expected, &blocklist),
            OwnerStatus::KnownCompromised
        );
        assert_eq!(
            classify_owner(Address::repeat_byte(0x77), expected, &blocklist),
            OwnerStatus::Unexpected
        );
    }

    #[test]
    fn mismatch_finding_carries_both_addresses() {
        // DungeonCore's dungeonMaster() answering C while the registry
        // recorded B must surface both values.
        let expected = Address::repeat_byte(0xbb);
        let actual = Address::repeat_byte(0xcc);

        let finding = Finding {
            contract: "DungeonCore".to_string(),
            check: "dungeonMaster() -> DungeonMaster".to_string(),
            expected: Some(format!("{expected:#x}")),
            actual: Some(format!("{actual:#x}")),
        };

        let rendered = finding.to_string();
        assert!(rendered.contains(&format!("{expected:#x}")));
        assert!(rendered.contains(&format!("{actual:#x}")));
    }

    #[test]
    fn report_is_clean_only_without_failures() {
        let mut report = Report::default();
        assert!(report.is_clean());
        report.failed.push(Finding {
            contract: "Hero".to_string(),
            check: "owner".to_string(),
            expected: None,
            actual: None,
        });
        assert!(!report.is_clean());
    }
}

use std::path::PathBuf;

use bytes::Bytes;
use clap::{Args, Parser, Subcommand};
use ethereum_types::Address;
use hex::FromHexError;
use reqwest::Url;
use secp256k1::{PublicKey, SecretKey};

#[derive(Parser)]
#[command(
    name = "dungeonctl",
    version,
    about = "Deploy, verify and sync the dungeon contract suite"
)]
pub struct Options {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Deploy contracts in dependency order and wire their cross-references.
    Deploy(DeployOptions),
    /// Audit on-chain wiring and ownership against the registry.
    Verify(VerifyOptions),
    /// Push registry addresses and ABIs to consumer systems.
    Sync(SyncOptions),
}

#[derive(Args)]
pub struct EthOptions {
    #[arg(
        long = "eth-rpc-url",
        value_name = "RPC_URL",
        env = "DUNGEON_ETH_RPC_URL",
        help_heading = "Eth options"
    )]
    pub rpc_url: String,
    #[arg(
        long,
        default_value = "5",
        value_name = "UINT64",
        env = "DUNGEON_ETH_MAX_NUMBER_OF_RETRIES",
        help_heading = "Eth options"
    )]
    pub max_number_of_retries: u64,
    #[arg(
        long,
        default_value = "2",
        value_name = "UINT64",
        env = "DUNGEON_ETH_BACKOFF_FACTOR",
        help_heading = "Eth options"
    )]
    pub backoff_factor: u64,
    #[arg(
        long,
        default_value = "1",
        value_name = "UINT64",
        env = "DUNGEON_ETH_MIN_RETRY_DELAY",
        help_heading = "Eth options"
    )]
    pub min_retry_delay: u64,
    #[arg(
        long,
        default_value = "60",
        value_name = "UINT64",
        env = "DUNGEON_ETH_MAX_RETRY_DELAY",
        help_heading = "Eth options"
    )]
    pub max_retry_delay: u64,
    #[arg(
        long,
        value_name = "UINT64",
        env = "DUNGEON_MAXIMUM_ALLOWED_MAX_FEE_PER_GAS",
        help_heading = "Eth options",
        help = "Fee ceiling in wei; transactions never bid above this."
    )]
    pub maximum_allowed_max_fee_per_gas: Option<u64>,
}

#[derive(Args)]
pub struct DeployOptions {
    #[command(flatten)]
    pub eth: EthOptions,
    #[arg(
        long,
        value_name = "PATH",
        env = "DUNGEON_DEPLOY_PLAN",
        help_heading = "Deploy options",
        help = "Path to the deploy plan JSON."
    )]
    pub plan: PathBuf,
    #[arg(
        long,
        value_name = "NETWORK",
        env = "DUNGEON_NETWORK",
        help_heading = "Deploy options"
    )]
    pub network: String,
    #[arg(
        long,
        default_value = "registry",
        value_name = "PATH",
        env = "DUNGEON_REGISTRY_DIR",
        help_heading = "Deploy options",
        help = "Directory holding the per-network registry snapshots."
    )]
    pub registry_dir: PathBuf,
    #[arg(
        long,
        value_name = "PRIVATE_KEY",
        value_parser = parse_private_key,
        env = "DUNGEON_PRIVATE_KEY",
        required_unless_present = "remote_signer_url",
        help_heading = "Deploy options",
        help = "Private key of a funded account used for deployment and wiring."
    )]
    pub private_key: Option<SecretKey>,
    #[arg(
        long,
        value_name = "URL",
        env = "DUNGEON_REMOTE_SIGNER_URL",
        requires = "remote_signer_public_key",
        help_heading = "Deploy options",
        help = "Use a web3signer-style remote signer instead of a local key."
    )]
    pub remote_signer_url: Option<Url>,
    #[arg(
        long,
        value_name = "PUBLIC_KEY",
        value_parser = parse_public_key,
        env = "DUNGEON_REMOTE_SIGNER_PUBLIC_KEY",
        help_heading = "Deploy options"
    )]
    pub remote_signer_public_key: Option<PublicKey>,
    #[arg(
        long,
        default_value = "1",
        value_name = "UINT64",
        env = "DUNGEON_CONFIRMATIONS",
        help_heading = "Deploy options",
        help = "Blocks on top of a transaction before it counts as final."
    )]
    pub confirmations: u64,
    #[arg(
        long,
        default_value = "600",
        value_name = "UINT64",
        env = "DUNGEON_CONFIRMATION_TIMEOUT",
        help_heading = "Deploy options",
        help = "Seconds to wait for a confirmation before recording the outcome as unknown."
    )]
    pub confirmation_timeout: u64,
    #[arg(
        long,
        default_value = "3",
        value_name = "UINT64",
        env = "DUNGEON_MAX_LINK_ATTEMPTS",
        help_heading = "Deploy options",
        help = "Wiring attempts per link before requiring operator intervention."
    )]
    pub max_link_attempts: u64,
}

#[derive(Args)]
pub struct VerifyOptions {
    #[command(flatten)]
    pub eth: EthOptions,
    #[arg(
        long,
        value_name = "PATH",
        env = "DUNGEON_DEPLOY_PLAN",
        help_heading = "Verify options",
        help = "Deploy plan naming the links to audit."
    )]
    pub plan: PathBuf,
    #[arg(
        long,
        value_name = "NETWORK",
        env = "DUNGEON_NETWORK",
        help_heading = "Verify options"
    )]
    pub network: String,
    #[arg(
        long,
        default_value = "registry",
        value_name = "PATH",
        env = "DUNGEON_REGISTRY_DIR",
        help_heading = "Verify options"
    )]
    pub registry_dir: PathBuf,
    #[arg(
        long,
        value_name = "ADDRESS",
        value_parser = parse_address,
        env = "DUNGEON_EXPECTED_OWNER",
        help_heading = "Verify options",
        help = "Administrative address every contract's owner() should return. Overrides the plan."
    )]
    pub expected_owner: Option<Address>,
    #[arg(
        long,
        value_name = "ADDRESSES",
        value_parser = parse_address,
        value_delimiter = ',',
        env = "DUNGEON_COMPROMISED_WALLETS",
        help_heading = "Verify options",
        help = "Known-compromised wallets; an owner match is reported explicitly."
    )]
    pub compromised: Vec<Address>,
}

#[derive(Args)]
pub struct SyncOptions {
    #[arg(
        long,
        value_name = "PATH",
        env = "DUNGEON_SYNC_TARGETS",
        help_heading = "Sync options",
        help = "Path to the sync targets JSON."
    )]
    pub targets: PathBuf,
    #[arg(
        long,
        value_name = "NETWORK",
        env = "DUNGEON_NETWORK",
        help_heading = "Sync options"
    )]
    pub network: String,
    #[arg(
        long,
        default_value = "registry",
        value_name = "PATH",
        env = "DUNGEON_REGISTRY_DIR",
        help_heading = "Sync options"
    )]
    pub registry_dir: PathBuf,
}

pub fn parse_private_key(s: &str) -> eyre::Result<SecretKey> {
    Ok(SecretKey::from_slice(&parse_hex(s)?)?)
}

pub fn parse_public_key(s: &str) -> eyre::Result<PublicKey> {
    Ok(PublicKey::from_slice(&parse_hex(s)?)?)
}

pub fn parse_address(s: &str) -> eyre::Result<Address> {
    let bytes = parse_hex(s)?;
    if bytes.len() != 20 {
        eyre::bail!("expected a 20-byte address, got {} bytes", bytes.len());
    }
    Ok(Address::from_slice(&bytes))
}

pub fn parse_hex(s: &str) -> eyre::Result<Bytes, FromHexError> {
    match s.strip_prefix("0x") {
        Some(s) => hex::decode(s).map(Into::into),
        None => hex::decode(s).map(Into::into),
    }
}

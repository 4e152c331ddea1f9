use std::{
    process::ExitCode,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use clap::Parser;
use cli::{Command, DeployOptions, EthOptions, Options, SyncOptions, VerifyOptions};
use dungeon_ops::{
    DeployPlan, Orchestrator, OrchestratorOptions, Registry, RunLock, load_targets, propagate,
    verify_ownership,
};
use dungeon_rpc::{BlockIdentifier, EthClient, LocalSigner, RemoteSigner, Signer};
use error::DungeonctlError;
use tracing::{Level, error, info, warn};

mod cli;
mod error;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();

    let options = Options::parse();
    match run(options).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}

async fn run(options: Options) -> Result<(), DungeonctlError> {
    match options.command {
        Command::Deploy(opts) => deploy(opts).await,
        Command::Verify(opts) => verify(opts).await,
        Command::Sync(opts) => sync(opts).await,
    }
}

fn new_client(eth: &EthOptions) -> Result<EthClient, DungeonctlError> {
    Ok(EthClient::new_with_config(
        vec![&eth.rpc_url],
        eth.max_number_of_retries,
        eth.backoff_factor,
        eth.min_retry_delay,
        eth.max_retry_delay,
        eth.maximum_allowed_max_fee_per_gas,
    )?)
}

fn build_signer(opts: &DeployOptions) -> Result<Signer, DungeonctlError> {
    if let (Some(url), Some(public_key)) =
        (&opts.remote_signer_url, opts.remote_signer_public_key)
    {
        return Ok(RemoteSigner::new(url.clone(), public_key).into());
    }
    match opts.private_key {
        Some(private_key) => Ok(LocalSigner::new(private_key).into()),
        None => Err(dungeon_ops::OpsError::MissingConfiguration(
            "DUNGEON_PRIVATE_KEY".to_string(),
        )
        .into()),
    }
}

async fn deploy(opts: DeployOptions) -> Result<(), DungeonctlError> {
    let client = new_client(&opts.eth)?;
    let signer = build_signer(&opts)?;
    info!(
        signer = %format!("{:#x}", signer.address()),
        network = %opts.network,
        "Starting deploy run"
    );

    let balance = client
        .get_balance(signer.address(), BlockIdentifier::Latest)
        .await?;
    if balance.is_zero() {
        // An idempotent re-run may not need funds at all, so this is not
        // fatal here; the first send will fail with a clear error if it is.
        warn!(
            signer = %format!("{:#x}", signer.address()),
            "Signer has zero balance on this network"
        );
    }

    let _lock = RunLock::acquire(&opts.registry_dir, &opts.network)?;
    let plan = DeployPlan::from_file(&opts.plan)?;
    let mut registry = Registry::load_or_new(&opts.registry_dir, &opts.network)?;
    let before = registry.clone();

    let cancel = Arc::new(AtomicBool::new(false));
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!(
                    "Cancellation requested; the in-flight transaction will be settled before stopping"
                );
                cancel.store(true, Ordering::SeqCst);
            }
        });
    }

    let orchestrator_options = OrchestratorOptions {
        confirmations: opts.confirmations,
        confirmation_timeout_seconds: opts.confirmation_timeout,
        max_link_attempts: opts.max_link_attempts,
    };
    let mut orchestrator = Orchestrator::new(&client, &signer, orchestrator_options, cancel);
    orchestrator.deploy_all(&plan, &mut registry).await?;

    for change in registry.diff(&before) {
        info!("{change}");
    }
    for (name, record) in &registry.contracts {
        info!(
            contract = %name,
            address = %format!("{:#x}", record.address),
            "Recorded in registry"
        );
    }
    Ok(())
}

async fn verify(opts: VerifyOptions) -> Result<(), DungeonctlError> {
    let client = new_client(&opts.eth)?;
    let plan = DeployPlan::from_file(&opts.plan)?;
    let registry = Registry::load(&opts.registry_dir, &opts.network)?;

    let mut report = dungeon_ops::verify(&plan, &registry, &client).await?;

    if let Some(expected_owner) = opts.expected_owner.or(plan.expected_owner) {
        let mut blocklist = plan.compromised.clone();
        blocklist.extend(opts.compromised.iter().copied());
        report.merge(verify_ownership(&registry, expected_owner, &blocklist, &client).await?);
    }

    for finding in &report.passed {
        info!("PASS {finding}");
    }
    for finding in &report.failed {
        error!("FAIL {finding}");
    }
    info!(
        passed = report.passed.len(),
        failed = report.failed.len(),
        "Verification finished"
    );

    if report.is_clean() {
        Ok(())
    } else {
        Err(DungeonctlError::VerificationFailed {
            failed: report.failed.len(),
        })
    }
}

async fn sync(opts: SyncOptions) -> Result<(), DungeonctlError> {
    let registry = Registry::load(&opts.registry_dir, &opts.network)?;
    let targets = load_targets(&opts.targets)?;

    let summary = propagate(&registry, &targets)?;
    for path in &summary.written {
        info!(path = %path.display(), "Updated");
    }
    for path in &summary.unchanged {
        info!(path = %path.display(), "Already up to date");
    }
    Ok(())
}

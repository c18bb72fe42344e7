//! Install command - fetch, verify, install and smoke-test one formula.

use std::io::IsTerminal;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Result;
use clap::Args;
use console::style;
use formulary_pm::{
    CancellationToken, Catalog, Formula, FormulaRunner, InstallOutcome, InstallState, RunError,
};

use crate::progress::{format_bytes, ProgressManager};
use crate::{report, GlobalArgs};

#[derive(Args, Debug)]
pub struct InstallArgs {
    /// Formula name in the catalog, or path to a formula file
    #[arg(value_name = "FORMULA")]
    pub formula: String,

    /// Disable progress output
    #[arg(long)]
    pub no_progress: bool,
}

fn stage_message(state: &InstallState) -> Option<&'static str> {
    match state {
        InstallState::Loaded => Some("loaded"),
        InstallState::Fetching => Some("fetching"),
        InstallState::Verifying => Some("verifying digest"),
        InstallState::Installing => Some("installing"),
        InstallState::Checking => Some("running test"),
        InstallState::Completed | InstallState::Failed { .. } => None,
    }
}

pub async fn execute(args: InstallArgs, global: &GlobalArgs) -> Result<i32> {
    let config = match global.load_config() {
        Ok(config) => config,
        Err(e) => return Ok(report(&RunError::Config(e))),
    };

    let formula = match Catalog::new(&config.catalog).resolve(&args.formula) {
        Ok(formula) => formula,
        Err(e) => return Ok(report(&RunError::Config(e))),
    };

    let progress = Arc::new(ProgressManager::new(
        !args.no_progress && !global.quiet && std::io::stderr().is_terminal(),
    ));
    let bar = progress.create_install_bar(formula.name());
    let fetched_bytes = Arc::new(AtomicU64::new(0));

    let runner = match FormulaRunner::new(config.to_runner_config()) {
        Ok(runner) => runner,
        Err(e) => return Ok(report(&RunError::Config(e))),
    };
    let runner = runner
        .with_observer({
            let progress = progress.clone();
            let bar = bar.clone();
            Arc::new(move |_: &Formula, state: &InstallState| {
                if let Some(message) = stage_message(state) {
                    progress.show_stage(&bar, message);
                }
            })
        })
        .with_progress({
            let progress = progress.clone();
            let bar = bar.clone();
            let fetched_bytes = fetched_bytes.clone();
            Arc::new(move |downloaded: u64, total: u64| {
                fetched_bytes.store(downloaded, Ordering::Relaxed);
                progress.show_download(&bar, downloaded, total);
            })
        });

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::warn!("Interrupted, cleaning up");
                cancel.cancel();
            }
        });
    }

    let result = runner.run(&formula, &cancel).await;
    bar.finish_and_clear();

    match result {
        Ok(InstallOutcome::Installed(record)) => {
            if !global.quiet {
                println!(
                    "{} Installed {} {} ({}) to {}",
                    style("✓").green(),
                    style(&record.name).cyan(),
                    style(&record.version).yellow(),
                    format_bytes(fetched_bytes.load(Ordering::Relaxed)),
                    record.path.display()
                );
            }
            Ok(0)
        }
        Ok(InstallOutcome::AlreadyInstalled(record)) => {
            if !global.quiet {
                println!(
                    "{} {} {} is already installed at {}",
                    style("Info:").cyan(),
                    style(&record.name).cyan(),
                    style(&record.version).yellow(),
                    record.path.display()
                );
            }
            Ok(0)
        }
        Err(e) => Ok(report(&e)),
    }
}

//! Uninstall command - remove installed versions.

use anyhow::Result;
use clap::Args;
use console::style;
use formulary_pm::{RunError, StoreInstaller};

use crate::{report, GlobalArgs};

#[derive(Args, Debug)]
pub struct UninstallArgs {
    /// Formula name
    #[arg(value_name = "NAME")]
    pub name: String,

    /// Version to remove (default: all installed versions)
    #[arg(value_name = "VERSION")]
    pub version: Option<String>,
}

pub async fn execute(args: UninstallArgs, global: &GlobalArgs) -> Result<i32> {
    let config = match global.load_config() {
        Ok(config) => config,
        Err(e) => return Ok(report(&RunError::Config(e))),
    };
    let store = StoreInstaller::new(&config.store);

    let versions = match &args.version {
        Some(version) => vec![version.clone()],
        None => match store.versions(&args.name) {
            Ok(records) => records.into_iter().map(|r| r.version).collect(),
            Err(e) => return Ok(report(&RunError::Install(e))),
        },
    };

    let mut removed = 0;
    for version in &versions {
        let _lock = match store.lock(&args.name, version).await {
            Ok(lock) => lock,
            Err(e) => return Ok(report(&RunError::Install(e))),
        };
        match store.remove(&args.name, version).await {
            Ok(true) => {
                removed += 1;
                if !global.quiet {
                    println!(
                        "{} Removed {} {}",
                        style("✓").green(),
                        style(&args.name).cyan(),
                        style(version).yellow()
                    );
                }
            }
            Ok(false) => {}
            Err(e) => return Ok(report(&RunError::Install(e))),
        }
    }

    if removed == 0 {
        let what = match &args.version {
            Some(version) => format!("{} {}", args.name, version),
            None => args.name.clone(),
        };
        eprintln!("{} {} is not installed", style("Error:").red().bold(), what);
        return Ok(1);
    }

    Ok(0)
}

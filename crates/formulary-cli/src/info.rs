//! Info command - display a formula and its install state.

use anyhow::{Context, Result};
use clap::Args;
use console::style;
use formulary_pm::{Catalog, InstallStep, RunError, StoreInstaller};

use crate::{report, GlobalArgs};

#[derive(Args, Debug)]
pub struct InfoArgs {
    /// Formula name in the catalog, or path to a formula file
    #[arg(value_name = "FORMULA")]
    pub formula: String,

    /// Print the parsed formula as JSON
    #[arg(long)]
    pub json: bool,
}

pub async fn execute(args: InfoArgs, global: &GlobalArgs) -> Result<i32> {
    let config = match global.load_config() {
        Ok(config) => config,
        Err(e) => return Ok(report(&RunError::Config(e))),
    };

    let formula = match Catalog::new(&config.catalog).resolve(&args.formula) {
        Ok(formula) => formula,
        Err(e) => return Ok(report(&RunError::Config(e))),
    };

    if args.json {
        let json = serde_json::to_string_pretty(&formula).context("Failed to serialize formula")?;
        println!("{}", json);
        return Ok(0);
    }

    let store = StoreInstaller::new(&config.store);
    let installed = match store.versions(formula.name()) {
        Ok(records) => records,
        Err(e) => return Ok(report(&RunError::Install(e))),
    };

    println!("{} {}", style(formula.name()).green().bold(), style(formula.version()).yellow());
    if !formula.description().is_empty() {
        println!("{}", formula.description());
    }
    if !formula.homepage().is_empty() {
        println!("{} {}", style("homepage:").dim(), formula.homepage());
    }
    println!("{} {}", style("url:").dim(), formula.url());
    println!("{} {}", style("digest:").dim(), formula.digest());

    println!();
    println!("{}", style("Install steps:").bold());
    for (index, step) in formula.install_steps().iter().enumerate() {
        println!("  {}. {}", index + 1, describe_step(step));
    }

    let test = formula.test_command();
    println!("{} {} (expects {:?})", style("Test:").bold(), test.command.join(" "), test.expect);

    println!();
    if installed.is_empty() {
        println!("{}", style("Not installed").dim());
    }
    for record in &installed {
        let marker = if record.version == formula.version() {
            style("*").green().to_string()
        } else {
            " ".to_string()
        };
        println!("{} {} {}", marker, style(&record.version).yellow(), record.path.display());
    }

    Ok(0)
}

fn describe_step(step: &InstallStep) -> String {
    match step {
        InstallStep::Bin { source, name } => match name {
            Some(name) => format!("bin {} as {}", source.display(), name),
            None => format!("bin {}", source.display()),
        },
        InstallStep::Place { source, destination, executable } => format!(
            "place {} at {}{}",
            source.display(),
            destination.display(),
            if *executable { " (executable)" } else { "" }
        ),
        InstallStep::Mkdir { path } => format!("mkdir {}", path.display()),
        InstallStep::Symlink { target, link } => format!("symlink {} -> {}", link.display(), target.display()),
    }
}

//! List command - show installed formulas.

use anyhow::{Context, Result};
use clap::Args;
use console::style;
use formulary_pm::{InstallRecord, RunError, StoreInstaller};

use crate::{report, GlobalArgs};

#[derive(Args, Debug)]
pub struct ListArgs {
    /// Only show versions of this formula
    #[arg(value_name = "NAME")]
    pub name: Option<String>,

    /// Print install records as JSON
    #[arg(long)]
    pub json: bool,
}

pub async fn execute(args: ListArgs, global: &GlobalArgs) -> Result<i32> {
    let config = match global.load_config() {
        Ok(config) => config,
        Err(e) => return Ok(report(&RunError::Config(e))),
    };

    let store = StoreInstaller::new(&config.store);
    let records = match &args.name {
        Some(name) => store.versions(name),
        None => store.list(),
    };
    let records = match records {
        Ok(records) => records,
        Err(e) => return Ok(report(&RunError::Install(e))),
    };

    if args.json {
        let json = serde_json::to_string_pretty(&records).context("Failed to serialize install records")?;
        println!("{}", json);
        return Ok(0);
    }

    if records.is_empty() {
        if !global.quiet {
            println!("{} No formulas installed in {}", style("Info:").cyan(), config.store.display());
        }
        return Ok(0);
    }

    print_table(&records);
    Ok(0)
}

fn print_table(records: &[InstallRecord]) {
    let name_width = records.iter().map(|r| r.name.len()).max().unwrap_or(0);
    let version_width = records.iter().map(|r| r.version.len()).max().unwrap_or(0);

    for record in records {
        println!(
            "{}  {}  {}  {}",
            style(format!("{:<width$}", record.name, width = name_width)).green(),
            style(format!("{:<width$}", record.version, width = version_width)).yellow(),
            record.installed_at.format("%Y-%m-%d %H:%M"),
            record.path.display()
        );
    }
}

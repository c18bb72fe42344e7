mod info;
mod install;
mod list;
mod progress;
mod uninstall;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use console::style;
use formulary_pm::config::Config;
use formulary_pm::{ConfigError, RunError};

#[derive(Parser, Debug)]
#[command(name = "formulary")]
#[command(about = "Install, verify and smoke-test packages from declarative formulas")]
#[command(version)]
struct Args {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

/// Options shared by every command.
#[derive(clap::Args, Debug, Clone, Default)]
pub struct GlobalArgs {
    /// Config file (default: ~/.config/formulary/config.toml)
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Store root holding installed versions
    #[arg(long, global = true, value_name = "DIR")]
    pub store: Option<PathBuf>,

    /// Directory of formula files looked up by name
    #[arg(long, global = true, value_name = "DIR")]
    pub catalog: Option<PathBuf>,

    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short = 'v', long = "verbose", global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Only print errors
    #[arg(short = 'q', long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,
}

impl GlobalArgs {
    /// Configuration with command-line overrides applied on top.
    pub fn load_config(&self) -> std::result::Result<Config, ConfigError> {
        let mut config = Config::build(self.config.as_deref(), true)?;
        if let Some(store) = &self.store {
            config.set_store(store);
        }
        if let Some(catalog) = &self.catalog {
            config.set_catalog(catalog);
        }
        Ok(config)
    }

    fn log_level(&self) -> &'static str {
        if self.quiet {
            return "error";
        }
        match self.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Fetch, verify, install and smoke-test a formula
    Install(install::InstallArgs),

    /// List installed formulas
    List(list::ListArgs),

    /// Show a formula and whether it is installed
    Info(info::InfoArgs),

    /// Remove an installed version, or every version of a formula
    Uninstall(uninstall::UninstallArgs),
}

/// Print a stage-tagged failure and return its exit code.
pub fn report(err: &RunError) -> i32 {
    eprintln!("{} {}", style("Error:").red().bold(), err);
    err.exit_code()
}

fn init_logger(global: &GlobalArgs) {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(global.log_level()))
        .format_timestamp(None)
        .init();
}

fn run() -> Result<i32> {
    let args = Args::parse();
    init_logger(&args.global);

    let rt = tokio::runtime::Runtime::new()
        .map_err(|e| anyhow::anyhow!("Failed to create async runtime: {}", e))?;

    match args.command {
        Commands::Install(install_args) => rt.block_on(install::execute(install_args, &args.global)),
        Commands::List(list_args) => rt.block_on(list::execute(list_args, &args.global)),
        Commands::Info(info_args) => rt.block_on(info::execute(info_args, &args.global)),
        Commands::Uninstall(uninstall_args) => rt.block_on(uninstall::execute(uninstall_args, &args.global)),
    }
}

fn main() -> ExitCode {
    match run() {
        Ok(code) => ExitCode::from(code as u8),
        Err(e) => {
            eprintln!("Error: {}", e);
            for cause in e.chain().skip(1) {
                eprintln!("  Caused by: {}", cause);
            }
            ExitCode::FAILURE
        }
    }
}

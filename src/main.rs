use anyhow::Result;
use clap::Parser;
use cli::{Command, RootArgs};
use tracing_subscriber::EnvFilter;

mod cli;
mod commands;

/// Environment variable holding a `tracing` filter directive.
const LOG_ENV: &str = "JOBREPO_LOG";

fn init_logging(verbose: bool) {
    let default = if verbose { "jobrepo=info" } else { "warn" };
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() -> Result<()> {
    let args = RootArgs::parse();
    init_logging(args.global.verbose);
    let global = &args.global;
    match args.command {
        Command::Init(_) => commands::run_init(global),
        Command::Commit(args) => commands::run_commit(global, args),
        Command::CommitData(args) => commands::run_commit_data(global, args),
        Command::Checkout(args) => commands::run_checkout(global, args),
        Command::DevCheckout(args) => commands::run_dev_checkout(global, args),
        Command::Tag(command) => commands::run_tag(global, command),
        Command::Info(args) => commands::run_info(global, args),
        Command::Jobs(_) => commands::run_jobs(global),
        Command::Unlock(args) => commands::run_unlock(global, args),
        Command::Sweep(_) => commands::run_sweep(global),
    }
}

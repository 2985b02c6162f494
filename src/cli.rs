//! CLI argument parsing for the job repository.
//!
//! The CLI only maps arguments onto repository operations; all behavior lives
//! in the library.
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Root CLI entrypoint.
#[derive(Parser, Debug)]
#[command(
    name = "jobrepo",
    version,
    about = "Content-addressed repository for research job artifacts",
    after_help = "Examples:\n  jobrepo --repository /data/repo init\n  jobrepo commit ./train --tag baseline\n  jobrepo commit-data ./raw.csv --tag raw\n  jobrepo checkout baseline /tmp/run\n  jobrepo dev-checkout ./eval\n  jobrepo tag list --json",
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct RootArgs {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

/// Options shared by every subcommand.
#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Repository root
    #[arg(
        long,
        short = 'r',
        global = true,
        value_name = "DIR",
        env = "JOBREPO_REPOSITORY",
        default_value = "."
    )]
    pub repository: PathBuf,

    /// Override the configured lock timeout for this invocation
    #[arg(long, global = true, value_name = "MS")]
    pub lock_timeout_ms: Option<u64>,

    /// Emit machine-readable JSON output
    #[arg(long, global = true)]
    pub json: bool,

    /// Log progress to stderr
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    Init(InitArgs),
    Commit(CommitArgs),
    CommitData(CommitDataArgs),
    Checkout(CheckoutArgs),
    DevCheckout(DevCheckoutArgs),
    #[command(subcommand)]
    Tag(TagCommand),
    Info(InfoArgs),
    Jobs(JobsArgs),
    Unlock(UnlockArgs),
    Sweep(SweepArgs),
}

#[derive(Parser, Debug)]
#[command(about = "Create an empty repository at --repository")]
pub struct InitArgs {}

#[derive(Parser, Debug)]
#[command(about = "Commit a working job directory")]
pub struct CommitArgs {
    /// Working job root containing job.json
    #[arg(value_name = "DIR")]
    pub working: PathBuf,

    /// Point this tag at the committed job
    #[arg(long, value_name = "NAME")]
    pub tag: Option<String>,
}

#[derive(Parser, Debug)]
#[command(about = "Commit a raw data file or directory")]
pub struct CommitDataArgs {
    /// Data file or directory
    #[arg(value_name = "PATH")]
    pub data: PathBuf,

    /// Point this tag at the committed job
    #[arg(long, value_name = "NAME")]
    pub tag: Option<String>,
}

#[derive(Parser, Debug)]
#[command(about = "Materialize a stored job and its dependencies")]
pub struct CheckoutArgs {
    /// Job hash, tag, or #tag
    #[arg(value_name = "JOB")]
    pub job: String,

    /// Destination directory
    #[arg(value_name = "DIR")]
    pub destination: PathBuf,

    /// Replace the contents of a non-empty destination
    #[arg(long)]
    pub overwrite: bool,
}

#[derive(Parser, Debug)]
#[command(about = "Link the dependencies of an uncommitted working job")]
pub struct DevCheckoutArgs {
    /// Working job root containing job.json
    #[arg(value_name = "DIR")]
    pub working: PathBuf,
}

#[derive(Subcommand, Debug)]
#[command(about = "Read and update tags")]
pub enum TagCommand {
    /// Point a tag at a stored job
    Set {
        #[arg(value_name = "NAME")]
        name: String,
        /// Job hash, tag, or #tag
        #[arg(value_name = "JOB")]
        job: String,
        /// Replace an existing binding
        #[arg(long)]
        overwrite: bool,
    },
    /// Print the hash a tag points at
    Resolve {
        #[arg(value_name = "NAME")]
        name: String,
    },
    /// List all tags
    List,
}

#[derive(Parser, Debug)]
#[command(about = "Show the stored descriptor, metadata and tags of a job")]
pub struct InfoArgs {
    /// Job hash, tag, or #tag
    #[arg(value_name = "JOB")]
    pub job: String,
}

#[derive(Parser, Debug)]
#[command(about = "List stored jobs")]
pub struct JobsArgs {}

#[derive(Parser, Debug)]
#[command(about = "Break the repository lock left by a crashed process")]
pub struct UnlockArgs {
    /// Break the lock even if its holder looks alive
    #[arg(long)]
    pub force: bool,
}

#[derive(Parser, Debug)]
#[command(about = "Remove staging directories of dead processes")]
pub struct SweepArgs {}

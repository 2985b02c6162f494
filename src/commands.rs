//! Subcommand handlers: open the repository, call one operation, print the
//! result as text or JSON.
use crate::cli::{
    CheckoutArgs, CommitArgs, CommitDataArgs, DevCheckoutArgs, GlobalArgs, InfoArgs, TagCommand,
    UnlockArgs,
};
use anyhow::{anyhow, Context, Result};
use jobrepo::lock::LockState;
use jobrepo::repo::{CommitOutcome, Repository};
use jobrepo::util::display_path;
use serde::Serialize;
use serde_json::json;
use std::time::Duration;

fn open_repository(global: &GlobalArgs) -> Result<Repository> {
    let repo = Repository::open(&global.repository)
        .with_context(|| format!("open repository {}", global.repository.display()))?;
    Ok(match global.lock_timeout_ms {
        Some(ms) => repo.with_lock_timeout(Duration::from_millis(ms)),
        None => repo,
    })
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("serialize output")?;
    println!("{text}");
    Ok(())
}

fn print_commit(global: &GlobalArgs, outcome: &CommitOutcome) -> Result<()> {
    if global.json {
        return print_json(outcome);
    }
    println!("{} {}", outcome.hash, outcome.path.display());
    Ok(())
}

pub fn run_init(global: &GlobalArgs) -> Result<()> {
    let repo = Repository::init(&global.repository)
        .with_context(|| format!("init repository {}", global.repository.display()))?;
    if global.json {
        return print_json(&json!({ "root": repo.root() }));
    }
    println!("initialized repository at {}", repo.root().display());
    Ok(())
}

pub fn run_commit(global: &GlobalArgs, args: CommitArgs) -> Result<()> {
    let repo = open_repository(global)?;
    let outcome = repo
        .commit(&args.working, args.tag.as_deref())
        .with_context(|| format!("commit {}", args.working.display()))?;
    print_commit(global, &outcome)
}

pub fn run_commit_data(global: &GlobalArgs, args: CommitDataArgs) -> Result<()> {
    let repo = open_repository(global)?;
    let outcome = repo
        .commit_data(&args.data, args.tag.as_deref())
        .with_context(|| format!("commit data {}", args.data.display()))?;
    print_commit(global, &outcome)
}

pub fn run_checkout(global: &GlobalArgs, args: CheckoutArgs) -> Result<()> {
    let repo = open_repository(global)?;
    let outcome = repo
        .checkout(&args.job, &args.destination, args.overwrite)
        .with_context(|| format!("checkout {} to {}", args.job, args.destination.display()))?;
    if global.json {
        return print_json(&outcome);
    }
    println!(
        "checked out {} to {} ({} copied, {} linked)",
        outcome.hash,
        outcome.destination.display(),
        outcome.copied,
        outcome.links
    );
    Ok(())
}

pub fn run_dev_checkout(global: &GlobalArgs, args: DevCheckoutArgs) -> Result<()> {
    let repo = open_repository(global)?;
    let outcome = repo
        .dev_checkout(&args.working)
        .with_context(|| format!("dev checkout {}", args.working.display()))?;
    if global.json {
        return print_json(&outcome);
    }
    println!(
        "linked {} dependencies into {}",
        outcome.links,
        outcome.working.display()
    );
    Ok(())
}

pub fn run_tag(global: &GlobalArgs, command: TagCommand) -> Result<()> {
    let repo = open_repository(global)?;
    match command {
        TagCommand::Set {
            name,
            job,
            overwrite,
        } => {
            let previous = repo
                .set_tag(&name, &job, overwrite)
                .with_context(|| format!("set tag {name}"))?;
            let hash = repo.resolve_tag(&name)?;
            if global.json {
                return print_json(&json!({ "tag": name, "hash": hash, "previous": previous }));
            }
            match previous {
                Some(previous) if previous != hash => println!("{name} -> {hash} (was {previous})"),
                _ => println!("{name} -> {hash}"),
            }
        }
        TagCommand::Resolve { name } => {
            let hash = repo
                .resolve_tag(&name)
                .with_context(|| format!("resolve tag {name}"))?;
            if global.json {
                return print_json(&json!({ "tag": name, "hash": hash }));
            }
            println!("{hash}");
        }
        TagCommand::List => {
            let tags = repo.tags().context("list tags")?;
            if global.json {
                return print_json(&tags);
            }
            for (name, hash) in tags {
                println!("{name}\t{hash}");
            }
        }
    }
    Ok(())
}

pub fn run_info(global: &GlobalArgs, args: InfoArgs) -> Result<()> {
    let repo = open_repository(global)?;
    let info = repo
        .job_info(&args.job)
        .with_context(|| format!("look up job {}", args.job))?;
    if global.json {
        return print_json(&info);
    }
    println!("hash: {}", info.hash);
    println!("path: {}", info.path.display());
    if !info.tags.is_empty() {
        println!("tags: {}", info.tags.join(", "));
    }
    if let Some(metadata) = &info.metadata {
        println!("committed_at_epoch_ms: {}", metadata.committed_at_epoch_ms);
    }
    if let Some(output) = &info.descriptor.output {
        println!("output: {}", output.display());
    }
    for dep in &info.descriptor.dependencies {
        println!(
            "dependency: {} <- {}:{}",
            dep.destination.display(),
            dep.job,
            dep.source.display()
        );
    }
    Ok(())
}

pub fn run_jobs(global: &GlobalArgs) -> Result<()> {
    let repo = open_repository(global)?;
    let jobs = repo.jobs().context("list jobs")?;
    if global.json {
        return print_json(&jobs);
    }
    for hash in jobs {
        println!("{hash}");
    }
    Ok(())
}

pub fn run_unlock(global: &GlobalArgs, args: UnlockArgs) -> Result<()> {
    let repo = open_repository(global)?;
    match repo.lock_state() {
        LockState::Free => {
            if global.json {
                return print_json(&json!({ "broken": false }));
            }
            println!("repository is not locked");
            return Ok(());
        }
        LockState::Held(owner) if !args.force => {
            let owner = owner.map_or_else(|| "an unknown owner".to_string(), |o| o.to_string());
            return Err(anyhow!(
                "lock is held by {owner} and does not look stale (use --force to break it anyway)"
            ));
        }
        LockState::Held(_) | LockState::Stale(_) => {}
    }
    let holder = repo.break_lock().context("break repository lock")?;
    if global.json {
        return print_json(&json!({ "broken": true, "holder": holder }));
    }
    match holder {
        Some(holder) => println!("broke lock held by {holder}"),
        None => println!("broke lock"),
    }
    Ok(())
}

pub fn run_sweep(global: &GlobalArgs) -> Result<()> {
    let repo = open_repository(global)?;
    let removed = repo.sweep_staging().context("sweep staging")?;
    if global.json {
        return print_json(&removed);
    }
    for path in &removed {
        println!("removed {}", display_path(path, Some(repo.root())));
    }
    if removed.is_empty() {
        println!("nothing to sweep");
    }
    Ok(())
}

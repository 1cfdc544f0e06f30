//! Gitward CLI - ssh entry point and maintenance commands
//!
//! Usage:
//!   gitward serve USER               # authorized_keys command= entry
//!   gitward regenerate               # rewrite generated files
//!   gitward access REPO [--json]     # who can reach a repository
//!   gitward check USER MODE REPO     # resolve one access decision

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use gitward::{AccessTable, Config, FilesystemHooks, Gate, Mode, RepositoryHooks, access};
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

/// Gitward - access-controlled git hosting over ssh
#[derive(Parser, Debug)]
#[command(name = "gitward")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file [default: $HOME/.gitosis.conf]
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// More logging; repeat for more
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: SubCmd,
}

#[derive(Subcommand, Debug)]
enum SubCmd {
    /// Run the command in SSH_ORIGINAL_COMMAND for USER
    Serve { user: String },
    /// Rewrite descriptions, project list, export markers and access files
    Regenerate,
    /// Show every user and group that can reach a repository
    Access {
        repo: String,
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Resolve access for one user, mode and repository
    Check {
        user: String,
        mode: String,
        repo: String,
    },
}

const LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];

/// Map a `[gitosis] loglevel` value to a filter level.
fn config_level(name: &str) -> Result<usize> {
    let level = match name.to_ascii_uppercase().as_str() {
        "CRITICAL" | "ERROR" => 0,
        "WARNING" | "WARN" => 1,
        "INFO" => 2,
        "DEBUG" => 3,
        _ => bail!("unknown loglevel: {name}"),
    };
    Ok(level)
}

/// Default filter directive: the configured level raised by `-v`.
fn default_directive(config: &Config, verbose: u8) -> Result<&'static str> {
    let base = match config.get("gitosis", "loglevel") {
        Some(name) => config_level(name)?,
        None => 1,
    };
    let level = (base + usize::from(verbose)).min(LEVELS.len() - 1);
    Ok(LEVELS[level])
}

/// Logs go to stderr: stdout carries the git protocol.
fn init_logging(config: &Config, verbose: u8) -> Result<()> {
    let directive = default_directive(config, verbose)?;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

fn home_dir() -> Result<PathBuf> {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .context("HOME is not set")
}

fn main() -> Result<()> {
    let args = Args::parse();

    let home = home_dir()?;
    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| home.join(".gitosis.conf"));
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to read config: {}", config_path.display()))?;

    init_logging(&config, args.verbose)?;

    match args.command {
        SubCmd::Serve { user } => serve(&config, &home, &user),
        SubCmd::Regenerate => regenerate(&config, &home),
        SubCmd::Access { repo, json } => show_access(&config, &repo, json),
        SubCmd::Check { user, mode, repo } => check(&config, &home, &user, &mode, &repo),
    }
}

fn serve(config: &Config, home: &Path, user: &str) -> Result<()> {
    let Ok(original) = std::env::var("SSH_ORIGINAL_COMMAND") else {
        error!("Need SSH_ORIGINAL_COMMAND in environment.");
        std::process::exit(1);
    };

    std::env::set_current_dir(home)
        .with_context(|| format!("Failed to enter home: {}", home.display()))?;

    let hooks = FilesystemHooks::new(home);
    let gate = Gate::new(config, home, &hooks);
    let served = match gate.serve(user, &original) {
        Ok(served) => served,
        Err(denial) => {
            error!("{denial}");
            std::process::exit(1);
        }
    };

    let mut cmd = Command::new("git");
    cmd.args(["shell", "-c", &served.command]);
    if let Some(cvs) = &served.cvs {
        cmd.envs(cvs.vars());
    }
    info!(command = %served.command, "serving git shell");
    exec(cmd)
}

#[cfg(unix)]
fn exec(mut cmd: Command) -> Result<()> {
    use std::os::unix::process::CommandExt;

    let err = cmd.exec();
    Err(err).context("Cannot execute git-shell")
}

#[cfg(not(unix))]
fn exec(mut cmd: Command) -> Result<()> {
    let status = cmd.status().context("Cannot execute git-shell")?;
    std::process::exit(status.code().unwrap_or(1));
}

fn regenerate(config: &Config, home: &Path) -> Result<()> {
    let hooks = FilesystemHooks::new(home);
    gitward::repository::init_configured_repos(config, home, &hooks)
        .context("Failed to initialize configured repositories")?;
    hooks
        .regenerate_project_list(config)
        .context("Failed to write gitweb files")?;
    hooks
        .regenerate_export_permissions(config)
        .context("Failed to write export permissions")?;
    debug!("regenerated");
    Ok(())
}

fn show_access(config: &Config, repo: &str, json: bool) -> Result<()> {
    let table = AccessTable::build(config);
    let all = table.all_access(config, repo);

    if json {
        println!("{}", serde_json::to_string_pretty(&all)?);
        return Ok(());
    }

    let join = |set: &std::collections::BTreeSet<String>| {
        set.iter().map(String::as_str).collect::<Vec<_>>().join(" ")
    };
    println!("users: {}", join(&all.users));
    println!("groups: {}", join(&all.groups));
    println!("refs: {}", join(&all.refs));
    if all.is_public() {
        println!("public");
    }
    Ok(())
}

fn check(config: &Config, home: &Path, user: &str, mode: &str, repo: &str) -> Result<()> {
    let mode: Mode = mode.parse()?;
    let grant = match mode {
        Mode::ReadOnly => access::resolve(config, user, mode, repo),
        Mode::Writable | Mode::Writeable => {
            access::resolve_write(config, user, repo).map(|(grant, _)| grant)
        }
    };

    match grant {
        Some(grant) => {
            let path = home.join(&grant.prefix).join(grant.repository_path());
            println!("{}", path.display());
            Ok(())
        }
        None => {
            eprintln!("{user}: no {mode} access to {repo}");
            std::process::exit(1);
        }
    }
}

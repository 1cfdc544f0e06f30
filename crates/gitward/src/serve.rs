//! Command gate for ssh-invoked git commands.
//!
//! The remote client asks for a command such as `git-upload-pack 'foo'`.
//! [`Gate::serve`] validates the command, checks access for the
//! authenticated identity and rewrites it to name the repository's real
//! location. Anything not positively recognized is denied.
//!
//! # Accepted commands
//!
//! | Command | Access |
//! |---------|--------|
//! | `git-upload-pack '<path>'`, `git upload-pack '<path>'` | read or write |
//! | `git-receive-pack '<path>'`, `git receive-pack '<path>'` | write |
//! | `cvs '<path>' server` | write |
//!
//! `<path>` must be one quoted token of `/`-separated segments, each
//! starting with an ASCII alphanumeric and continuing with alphanumerics
//! or `@._-`. Leading slashes are ignored.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::access::{self, Grant, Mode};
use crate::config::{Config, user_section};
use crate::logging::sanitize_for_log;
use crate::repository::{RepositoryHooks, auto_init_repo};

/// Verbs granted with read access.
pub const COMMANDS_READONLY: [&str; 2] = ["git-upload-pack", "git upload-pack"];

/// Verbs requiring write access.
pub const COMMANDS_WRITE: [&str; 2] = ["git-receive-pack", "git receive-pack"];

static ALLOW_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^'/*(?P<path>[a-zA-Z0-9][a-zA-Z0-9@._-]*(/[a-zA-Z0-9][a-zA-Z0-9@._-]*)*)'$")
        .expect("Invalid regex pattern for repository path")
});

/// Why a command was refused.
///
/// The messages are shown to the remote client and never name paths.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Denial {
    #[error("command may not contain newline")]
    MalformedCommand,

    #[error("unknown command denied")]
    UnknownCommand,

    #[error("arguments to command look dangerous")]
    UnsafeArguments,

    #[error("repository read access denied")]
    ReadAccessDenied,

    #[error("repository write access denied")]
    WriteAccessDenied,
}

/// A recognized command verb.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    /// One of [`COMMANDS_READONLY`].
    Read(&'static str),
    /// One of [`COMMANDS_WRITE`].
    Write(&'static str),
    /// `cvs server`
    Cvs,
}

impl Verb {
    fn lookup(verb: &str) -> Option<Self> {
        if let Some(v) = COMMANDS_READONLY.into_iter().find(|v| *v == verb) {
            return Some(Verb::Read(v));
        }
        COMMANDS_WRITE
            .into_iter()
            .find(|v| *v == verb)
            .map(Verb::Write)
    }

    /// Whether the verb needs write access.
    pub fn writes(self) -> bool {
        !matches!(self, Verb::Read(_))
    }
}

/// A syntactically valid request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub verb: Verb,
    /// Requested repository path, leading slashes removed.
    pub path: String,
}

fn is_space(c: char) -> bool {
    c.is_ascii_whitespace()
}

/// Split off the first token delimited by ASCII whitespace.
///
/// Returns `None` unless something follows it.
fn split_first(s: &str) -> Option<(&str, &str)> {
    let s = s.trim_start_matches(is_space);
    let end = s.find(is_space)?;
    let rest = s[end..].trim_start_matches(is_space);
    if rest.is_empty() {
        return None;
    }
    Some((&s[..end], rest))
}

/// Extract the repository path from a quoted argument.
pub fn path_from_args(args: &str) -> Result<&str, Denial> {
    ALLOW_RE
        .captures(args)
        .and_then(|caps| caps.name("path"))
        .map(|m| m.as_str())
        .ok_or(Denial::UnsafeArguments)
}

/// Validate a raw command without looking at access rules.
pub fn parse_command(command: &str) -> Result<Request, Denial> {
    if command.contains('\n') {
        return Err(Denial::MalformedCommand);
    }

    let (verb, args) = split_first(command).ok_or(Denial::UnknownCommand)?;

    let (verb, args) = match verb {
        "git" => {
            let (sub, args) = split_first(args).ok_or(Denial::UnknownCommand)?;
            (format!("git {sub}"), args)
        }
        "cvs" => {
            let (args, server) = split_first(args).ok_or(Denial::UnknownCommand)?;
            if server != "server" {
                return Err(Denial::UnknownCommand);
            }
            let path = path_from_args(args)?;
            return Ok(Request {
                verb: Verb::Cvs,
                path: path.to_string(),
            });
        }
        other => (other.to_string(), args),
    };

    let verb = Verb::lookup(&verb).ok_or(Denial::UnknownCommand)?;
    let path = path_from_args(args)?;
    Ok(Request {
        verb,
        path: path.to_string(),
    })
}

/// Environment for `git cvsserver`, applied by the caller to the child
/// process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CvsEnvironment {
    pub base_path: PathBuf,
    pub roots: PathBuf,
    pub author_name: String,
    pub author_email: String,
}

impl CvsEnvironment {
    /// Variables as `(name, value)` pairs.
    pub fn vars(&self) -> [(&'static str, String); 4] {
        [
            (
                "GIT_CVSSERVER_BASE_PATH",
                self.base_path.display().to_string(),
            ),
            ("GIT_CVSSERVER_ROOTS", self.roots.display().to_string()),
            ("GIT_AUTHOR_NAME", self.author_name.clone()),
            ("GIT_AUTHOR_EMAIL", self.author_email.clone()),
        ]
    }
}

/// Result of an accepted command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Served {
    /// Command to hand to `git shell -c`.
    pub command: String,
    /// Set for `cvs server`.
    pub cvs: Option<CvsEnvironment>,
    /// Whether the repository was created for this request.
    pub created: bool,
}

/// Access-checking command gate.
///
/// Relative storage prefixes resolve against `home`. The configuration is
/// only read; a gate can be shared by concurrent callers as long as the
/// hooks tolerate it.
pub struct Gate<'a> {
    config: &'a Config,
    home: PathBuf,
    hooks: &'a dyn RepositoryHooks,
}

impl<'a> Gate<'a> {
    pub fn new(
        config: &'a Config,
        home: impl Into<PathBuf>,
        hooks: &'a dyn RepositoryHooks,
    ) -> Self {
        Self {
            config,
            home: home.into(),
            hooks,
        }
    }

    /// Check access for a parsed request.
    ///
    /// Write access satisfies any verb. Without it, read access satisfies
    /// read verbs only.
    pub fn authorize(&self, user: &str, request: &Request) -> Result<Grant, Denial> {
        if let Some((grant, _)) = access::resolve_write(self.config, user, &request.path) {
            return Ok(grant);
        }
        if request.verb == Verb::Cvs {
            return Err(Denial::WriteAccessDenied);
        }

        let grant = access::resolve(self.config, user, Mode::ReadOnly, &request.path)
            .ok_or(Denial::ReadAccessDenied)?;
        if request.verb.writes() {
            return Err(Denial::WriteAccessDenied);
        }
        Ok(grant)
    }

    /// Validate, authorize and rewrite `command` for `user`.
    ///
    /// A repository that is authorized but missing on disk is created
    /// through the hooks before returning. Hook failures are logged and do
    /// not change the outcome.
    pub fn serve(&self, user: &str, command: &str) -> Result<Served, Denial> {
        debug!(user, command = %sanitize_for_log(command), "got command");

        let request = parse_command(command)?;
        let grant = self.authorize(user, &request)?;
        let repopath = grant.repository_path();

        let verb = match request.verb {
            Verb::Read(verb) | Verb::Write(verb) => verb,
            Verb::Cvs => return self.serve_cvs(user, &repopath),
        };

        let topdir = self.home.join(&grant.prefix);
        let fullpath = topdir.join(&repopath);
        let mut created = false;
        if !fullpath.exists() {
            created = self.create(&topdir, &repopath);
        }

        let command = format!("{verb} '{}'", fullpath.display());
        info!(user, command = %sanitize_for_log(&command), "serving");
        Ok(Served {
            command,
            cvs: None,
            created,
        })
    }

    fn serve_cvs(&self, user: &str, repopath: &str) -> Result<Served, Denial> {
        let section = user_section(user);
        let (Some(name), Some(email)) = (
            self.config.get(&section, "name"),
            self.config.get(&section, "email"),
        ) else {
            error!(user, "missing name or email for user");
            return Err(Denial::WriteAccessDenied);
        };

        let base_path = self.config.repository_dir(&self.home);
        let roots = base_path.join(repopath);
        info!(user, root = %roots.display(), "serving cvs");
        Ok(Served {
            command: "cvs server".to_string(),
            cvs: Some(CvsEnvironment {
                base_path,
                roots,
                author_name: name.to_string(),
                author_email: email.to_string(),
            }),
            created: false,
        })
    }

    /// Create a missing repository and refresh generated files.
    ///
    /// Returns whether the repository was initialized.
    fn create(&self, topdir: &Path, repopath: &str) -> bool {
        let created = match auto_init_repo(self.config, topdir, repopath, self.hooks) {
            Ok(()) => true,
            Err(e) => {
                warn!(repo = repopath, error = %e, "auto-init failed");
                false
            }
        };
        if let Err(e) = self.hooks.regenerate_project_list(self.config) {
            warn!(error = %e, "regenerating project list failed");
        }
        if let Err(e) = self.hooks.regenerate_export_permissions(self.config) {
            warn!(error = %e, "regenerating export permissions failed");
        }
        created
    }
}

//! Repository creation and the generated files that follow it.
//!
//! The command gate never touches the filesystem itself. It calls a
//! [`RepositoryHooks`] implementation once access has been granted, so the
//! decision logic can be exercised without creating repositories.

use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tracing::{debug, info, warn};

use crate::access::GIT_SUFFIX;
use crate::config::{Config, DEFAULTS_SECTION, GITOSIS_SECTION, SectionKind, repo_section};
use crate::error::{Error, Result};
use crate::files::GENERATED_DIR_MODE;
use crate::{daemon, files, gitweb, group, htaccess};

/// Directory mode for new repositories when `dirmode` is not configured.
pub const DEFAULT_DIR_MODE: u32 = 0o750;

/// Side effects triggered after an authorized request for a repository
/// that does not exist yet.
///
/// Errors are reported to the caller, which logs them; they never change
/// an access decision.
pub trait RepositoryHooks {
    /// Create an empty bare repository at `path`.
    fn init_repository(&self, path: &Path, template: Option<&str>, mode: u32) -> Result<()>;

    /// Rewrite gitweb descriptions and the project list.
    fn regenerate_project_list(&self, config: &Config) -> Result<()>;

    /// Rewrite git-daemon export markers and HTTP access files.
    fn regenerate_export_permissions(&self, config: &Config) -> Result<()>;
}

/// Hooks operating on the real filesystem under a home directory.
#[derive(Debug, Clone)]
pub struct FilesystemHooks {
    home: PathBuf,
    git: OsString,
}

impl FilesystemHooks {
    /// Hooks rooted at `home`, running `git` from `PATH`.
    pub fn new(home: impl Into<PathBuf>) -> Self {
        Self {
            home: home.into(),
            git: OsString::from("git"),
        }
    }

    /// Use a specific git executable.
    pub fn git_binary(mut self, git: impl Into<OsString>) -> Self {
        self.git = git.into();
        self
    }
}

impl RepositoryHooks for FilesystemHooks {
    fn init_repository(&self, path: &Path, template: Option<&str>, mode: u32) -> Result<()> {
        init(&self.git, path, template, mode)
    }

    fn regenerate_project_list(&self, config: &Config) -> Result<()> {
        let repositories = config.repository_dir(&self.home);
        gitweb::set_descriptions(config, &repositories)?;
        let generated = config.generated_files_dir(&self.home);
        gitweb::generate_project_list(config, &repositories, &generated.join("projects.list"))
    }

    fn regenerate_export_permissions(&self, config: &Config) -> Result<()> {
        let repositories = config.repository_dir(&self.home);
        daemon::set_export_ok(config, &repositories)?;
        if htaccess::gen_htaccess_if_enabled(config, &repositories)? {
            let generated = config.generated_files_dir(&self.home);
            files::mkdir(&generated, GENERATED_DIR_MODE)?;
            group::generate_group_list(config, &generated.join("groups"))?;
        }
        Ok(())
    }
}

/// Create a bare repository with `git init`.
///
/// The directory is created with `mode` first. Git's stdout is sent to our
/// stderr: stdout belongs to the ssh client's protocol stream.
pub fn init(
    git: impl AsRef<OsStr>,
    path: &Path,
    template: Option<&str>,
    mode: u32,
) -> Result<()> {
    files::mkdir(path, mode)?;

    let mut cmd = Command::new(git);
    cmd.args(["--git-dir=.", "init", "--quiet"]);
    if let Some(template) = template {
        cmd.arg(format!("--template={template}"));
    }

    let status = cmd
        .current_dir(path)
        .stdin(Stdio::null())
        .stdout(std::io::stderr())
        .status()?;

    if !status.success() {
        return Err(Error::GitInit(match status.code() {
            Some(code) => format!("exit status {code}"),
            None => "terminated by signal".to_string(),
        }));
    }
    Ok(())
}

/// Directory mode for a repository: `dirmode` (octal) from
/// `repo <name>`, falling back to `defaults`.
pub fn dir_mode(config: &Config, name: &str) -> Result<u32> {
    match config.get_fallback(&repo_section(name), "dirmode", Some(DEFAULTS_SECTION)) {
        Some(raw) => u32::from_str_radix(raw.trim(), 8)
            .map_err(|_| Error::ConfigValue(format!("dirmode is not an octal mode: {raw}"))),
        None => Ok(DEFAULT_DIR_MODE),
    }
}

/// Create the repository `repopath` (relative, ending in `.git`) under
/// `topdir`, including leading directories.
///
/// Safe to repeat: existing directories are kept and `git init` on an
/// existing repository is a no-op.
pub fn auto_init_repo(
    config: &Config,
    topdir: &Path,
    repopath: &str,
    hooks: &dyn RepositoryHooks,
) -> Result<()> {
    debug_assert!(repopath.ends_with(GIT_SUFFIX), "must have .git extension");
    let name = repopath.strip_suffix(GIT_SUFFIX).unwrap_or(repopath);
    let mode = dir_mode(config, name)?;

    files::mkdir(topdir, mode)?;
    let mut dir = topdir.to_path_buf();
    let segments: Vec<&str> = repopath.split('/').collect();
    for segment in &segments[..segments.len() - 1] {
        dir.push(segment);
        files::mkdir(&dir, mode)?;
    }

    let template = config.get(GITOSIS_SECTION, "init-template");
    let fullpath = topdir.join(repopath);
    info!(path = %fullpath.display(), mode = %format!("{mode:o}"), "creating repository");
    hooks.init_repository(&fullpath, template, mode)
}

/// Create every declared repository that is missing on disk, when
/// `[gitosis] init-on-config` is enabled.
///
/// Failures are logged per repository and do not stop the others.
pub fn init_configured_repos(
    config: &Config,
    home: &Path,
    hooks: &dyn RepositoryHooks,
) -> Result<()> {
    if !config.get_boolean_default(GITOSIS_SECTION, "init-on-config", false, None)? {
        return Ok(());
    }

    let topdir = config.repository_dir(home);
    for kind in config.section_kinds() {
        let SectionKind::Repo(name) = kind else {
            continue;
        };
        let repopath = format!("{}{}", crate::access::canonical_path(name), GIT_SUFFIX);
        if topdir.join(&repopath).exists() {
            continue;
        }
        if let Err(e) = auto_init_repo(config, &topdir, &repopath, hooks) {
            warn!(repo = name, error = %e, "auto-init failed");
        } else {
            debug!(repo = name, "initialized configured repository");
        }
    }
    Ok(())
}

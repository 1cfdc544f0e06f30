//! git-daemon export markers.
//!
//! git-daemon only serves repositories containing a
//! `git-daemon-export-ok` file. Every repository found on disk gets the
//! marker added or removed, including repositories no longer mentioned in
//! the configuration, so a removed entry stops being exported.

use std::path::{Path, PathBuf};

use tracing::debug;
use walkdir::WalkDir;

use crate::access::{AccessTable, GIT_SUFFIX};
use crate::config::{Config, DEFAULTS_SECTION, repo_section};
use crate::error::Result;
use crate::files::{remove_if_exists, write_atomic};

/// Name of the export marker file.
pub const EXPORT_OK: &str = "git-daemon-export-ok";

/// A repository directory found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoundRepo {
    /// Full path of the `<name>.git` directory.
    pub dir: PathBuf,
    /// Path relative to the storage prefix, without `.git`.
    pub name: String,
}

/// Find repositories under `repositories`.
///
/// Any directory whose name ends in `.git` is a repository; its contents
/// are not searched. A missing `repositories` directory yields nothing.
/// Results are sorted by path.
pub fn walk_repos(repositories: &Path) -> Result<Vec<FoundRepo>> {
    let mut found = Vec::new();
    let mut it = WalkDir::new(repositories)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter();

    loop {
        let entry = match it.next() {
            None => break,
            Some(Ok(entry)) => entry,
            Some(Err(e))
                if e.io_error().map(|io| io.kind()) == Some(std::io::ErrorKind::NotFound) =>
            {
                continue;
            }
            Some(Err(e)) => return Err(std::io::Error::other(e).into()),
        };
        if !entry.file_type().is_dir() {
            continue;
        }

        let file_name = entry.file_name().to_string_lossy();
        if !file_name.ends_with(GIT_SUFFIX) {
            continue;
        }
        it.skip_current_dir();

        let Ok(relative) = entry.path().strip_prefix(repositories) else {
            continue;
        };
        let relative = relative.to_string_lossy();
        let name = relative.strip_suffix(GIT_SUFFIX).unwrap_or(&*relative);
        debug!(repo = name, "found repository");
        found.push(FoundRepo {
            dir: entry.path().to_path_buf(),
            name: name.to_string(),
        });
    }

    Ok(found)
}

/// Add the export marker to `repo_dir`.
pub fn allow_export(repo_dir: &Path) -> Result<()> {
    let marker = repo_dir.join(EXPORT_OK);
    if !marker.exists() {
        write_atomic(&marker, b"")?;
    }
    Ok(())
}

/// Remove the export marker from `repo_dir`.
pub fn deny_export(repo_dir: &Path) -> Result<()> {
    remove_if_exists(&repo_dir.join(EXPORT_OK))
}

/// Synchronize export markers with the configuration.
///
/// Per repository, `[repo <name>] daemon` decides when set. Otherwise the
/// global `[defaults] daemon` applies, and with `[defaults] daemon-if-all`
/// a repository readable by everyone is exported as well.
pub fn set_export_ok(config: &Config, repositories: &Path) -> Result<()> {
    let global_enable = config.get_boolean_default(DEFAULTS_SECTION, "daemon", false, None)?;
    debug!(
        global = if global_enable { "allow" } else { "deny" },
        "export default"
    );

    let enable_if_all =
        config.get_boolean_default(DEFAULTS_SECTION, "daemon-if-all", false, None)?;
    let table = enable_if_all.then(|| AccessTable::build(config));
    debug!(
        if_all = if enable_if_all { "allow" } else { "unchanged" },
        "export when accessible to @all"
    );

    for repo in walk_repos(repositories)? {
        let enable = match config.get_boolean(&repo_section(&repo.name), "daemon")? {
            Some(enable) => enable,
            None => match &table {
                Some(table) if !global_enable => table.all_access(config, &repo.name).is_public(),
                _ => global_enable,
            },
        };

        if enable {
            debug!(repo = %repo.name, "allow export");
            allow_export(&repo.dir)?;
        } else {
            debug!(repo = %repo.name, "deny export");
            deny_export(&repo.dir)?;
        }
    }
    Ok(())
}

//! Apache `.htaccess` files for smart-HTTP access.
//!
//! Each repository on disk gets `Require` lines naming the users and
//! groups granted any mode. Repositories open to everyone lose their
//! `.htaccess`; repositories nobody is granted are denied outright.

use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::access::AccessTable;
use crate::config::{Config, GITOSIS_SECTION};
use crate::daemon::walk_repos;
use crate::error::Result;
use crate::files::{remove_if_exists, write_atomic};

/// Path of the access file inside a repository directory.
pub fn htaccess_path(repo_dir: &Path) -> PathBuf {
    repo_dir.join(".htaccess")
}

/// Render access file contents for the given grants.
pub fn render_htaccess(users: &BTreeSet<String>, groups: &BTreeSet<String>) -> String {
    let mut out = String::new();
    if !users.is_empty() {
        let users: Vec<&str> = users.iter().map(String::as_str).collect();
        let _ = writeln!(out, "Require user {}", users.join(" "));
    }
    if !groups.is_empty() {
        let groups: Vec<&str> = groups.iter().map(String::as_str).collect();
        let _ = writeln!(out, "Require group {}", groups.join(" "));
    }
    if users.is_empty() && groups.is_empty() {
        out.push_str("Order allow,deny\nDeny from all\n");
    }
    out
}

/// Rewrite `.htaccess` for every repository under `repositories`.
pub fn gen_htaccess(config: &Config, repositories: &Path) -> Result<()> {
    let table = AccessTable::build(config);

    for repo in walk_repos(repositories)? {
        let access = table.all_access(config, &repo.name);
        let path = htaccess_path(&repo.dir);

        if access.is_public() {
            debug!(repo = %repo.name, "allow all");
            remove_if_exists(&path)?;
        } else {
            write_atomic(&path, render_htaccess(&access.users, &access.groups).as_bytes())?;
        }
    }
    Ok(())
}

/// Run [`gen_htaccess`] when `[gitosis] htaccess` is enabled.
///
/// Returns whether the files were generated.
pub fn gen_htaccess_if_enabled(config: &Config, repositories: &Path) -> Result<bool> {
    let enabled = config
        .get_boolean(GITOSIS_SECTION, "htaccess")?
        .unwrap_or(false);
    if enabled {
        gen_htaccess(config, repositories)?;
    }
    Ok(enabled)
}

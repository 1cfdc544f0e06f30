//! Gitweb descriptions and project list.

use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use url::form_urlencoded::byte_serialize;

use crate::access::GIT_SUFFIX;
use crate::config::{Config, DEFAULTS_SECTION, SectionKind, repo_section};
use crate::error::Result;
use crate::files::{GENERATED_DIR_MODE, mkdir, write_atomic};

/// Locate the on-disk directory of a declared repository, trying `<name>`
/// and then `<name>.git`. Returns the name as found on disk.
fn find_repo(repositories: &Path, name: &str) -> Option<(PathBuf, String)> {
    let plain = repositories.join(name);
    if plain.exists() {
        return Some((plain, name.to_string()));
    }
    let dotgit = format!("{name}{GIT_SUFFIX}");
    let path = repositories.join(&dotgit);
    path.exists().then_some((path, dotgit))
}

/// Write `description` files for every `repo` section carrying one.
pub fn set_descriptions(config: &Config, repositories: &Path) -> Result<()> {
    for kind in config.section_kinds() {
        let SectionKind::Repo(name) = kind else {
            continue;
        };
        let Some(description) = config.get(&repo_section(name), "description") else {
            continue;
        };
        if description.is_empty() {
            continue;
        }

        let Some((dir, _)) = find_repo(repositories, name) else {
            warn!(
                repo = name,
                repositories = %repositories.display(),
                "cannot find repository for description"
            );
            continue;
        };
        write_atomic(&dir.join("description"), format!("{description}\n").as_bytes())?;
    }
    Ok(())
}

fn encode(value: &str) -> String {
    byte_serialize(value.as_bytes()).collect()
}

/// Write the gitweb project list.
///
/// One line per `repo` section with `gitweb` enabled (falling back to
/// `[defaults] gitweb`) whose directory exists: the form-encoded on-disk
/// name, then the form-encoded `owner` when set.
pub fn write_project_list(
    config: &Config,
    repositories: &Path,
    out: &mut impl Write,
) -> Result<()> {
    for kind in config.section_kinds() {
        let SectionKind::Repo(name) = kind else {
            continue;
        };
        let section = repo_section(name);
        if !config.get_boolean_default(&section, "gitweb", false, Some(DEFAULTS_SECTION))? {
            continue;
        }

        let Some((_, on_disk)) = find_repo(repositories, name) else {
            warn!(
                repo = name,
                repositories = %repositories.display(),
                "cannot find repository for project list"
            );
            continue;
        };

        let mut line = encode(&on_disk);
        if let Some(owner) = config.get(&section, "owner") {
            line.push(' ');
            line.push_str(&encode(owner));
        }
        writeln!(out, "{line}")?;
    }
    Ok(())
}

/// Atomically regenerate the project list at `path`, creating its
/// directory when missing.
pub fn generate_project_list(config: &Config, repositories: &Path, path: &Path) -> Result<()> {
    let mut buf = Vec::new();
    write_project_list(config, repositories, &mut buf)?;

    if let Some(parent) = path.parent() {
        mkdir(parent, GENERATED_DIR_MODE)?;
    }
    debug!(path = %path.display(), "writing project list");
    write_atomic(path, &buf)
}

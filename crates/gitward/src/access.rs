//! Repository access resolution.
//!
//! Access is granted per (identity, mode, repository path). Candidate
//! sections are consulted in a fixed order: `user <identity>` first, then
//! every group from [`crate::group::membership`] in discovery order. The
//! first section that grants the path wins; nothing later is consulted.
//!
//! A section grants a path when one of its patterns for the mode matches
//! with shell-glob semantics, or when it carries an explicit remap
//! `map <mode> <path> = <newpath>`.

use std::borrow::Cow;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;

use glob::Pattern;
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::{
    Config, DEFAULT_REPOSITORIES, GITOSIS_SECTION, SectionKind, group_section, user_section,
};
use crate::error::Error;
use crate::group::{self, ALL, ALL_REF};

/// Suffix stripped from repository paths before any lookup.
pub const GIT_SUFFIX: &str = ".git";

/// Access mode keys recognised in user and group sections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// `readonly`
    ReadOnly,
    /// `writable`
    Writable,
    /// `writeable`, a misspelling honoured for older configurations
    Writeable,
}

impl Mode {
    /// Every mode, in the order access tables are built.
    pub const ALL: [Mode; 3] = [Mode::ReadOnly, Mode::Writable, Mode::Writeable];

    /// Configuration key for this mode.
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::ReadOnly => "readonly",
            Mode::Writable => "writable",
            Mode::Writeable => "writeable",
        }
    }

    /// Whether this is the deprecated spelling.
    pub fn is_legacy(self) -> bool {
        self == Mode::Writeable
    }

    fn map_prefix(self) -> String {
        format!("map {} ", self.as_str())
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "readonly" => Ok(Mode::ReadOnly),
            "writable" => Ok(Mode::Writable),
            "writeable" => Ok(Mode::Writeable),
            other => Err(Error::ConfigValue(format!("unknown access mode: {other}"))),
        }
    }
}

/// Where a granted request lands on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Grant {
    /// Storage prefix holding the repository.
    pub prefix: String,
    /// Mapped relative path with one `.git` suffix stripped.
    pub path: String,
}

impl Grant {
    /// Relative repository directory name: `path` plus `.git`.
    ///
    /// Only one suffix is ever stripped, so `foo.git.git` lands in
    /// `foo.git.git` rather than `foo.git`.
    pub fn repository_path(&self) -> String {
        format!("{}{}", self.path, GIT_SUFFIX)
    }
}

/// Strip a trailing `.git` extension.
///
/// Only a real extension counts: a basename made of leading dots followed
/// by `git` (such as `..git`) is left alone.
pub fn canonical_path(path: &str) -> &str {
    let base_start = path.rfind('/').map_or(0, |i| i + 1);
    let base = &path[base_start..];
    let leading_dots = base.len() - base.trim_start_matches('.').len();
    match base.rfind('.') {
        Some(dot) if dot >= leading_dots && &base[dot..] == GIT_SUFFIX => {
            &path[..base_start + dot]
        }
        _ => path,
    }
}

/// Whether `path` matches any of the shell-glob `patterns`.
///
/// `*` and `?` also match `/`, and a run of `*` behaves like one. A pattern
/// that is still not a valid glob is compared literally.
pub fn path_matches(path: &str, patterns: &[&str]) -> bool {
    patterns
        .iter()
        .any(|pattern| match Pattern::new(&collapse_stars(pattern)) {
            Ok(glob) => glob.matches(path),
            Err(_) => *pattern == path,
        })
}

/// Fold runs of `*` into one. `glob` only accepts `**` as a whole path
/// component.
fn collapse_stars(pattern: &str) -> Cow<'_, str> {
    if !pattern.contains("**") {
        return Cow::Borrowed(pattern);
    }
    let mut out = String::with_capacity(pattern.len());
    for c in pattern.chars() {
        if c == '*' && out.ends_with('*') {
            continue;
        }
        out.push(c);
    }
    Cow::Owned(out)
}

/// Resolve `mode` access for `user` on repository `path`.
///
/// Returns `None` when no candidate section grants the path.
///
/// # Example
///
/// ```rust
/// use gitward::{Config, access::{self, Mode}};
///
/// let config = Config::new()
///     .with("gitosis", "repositories", "/srv/git")
///     .with("group devs", "members", "jdoe")
///     .with("group devs", "writable", "tools/*");
///
/// let grant = access::resolve(&config, "jdoe", Mode::Writable, "tools/lint.git").unwrap();
/// assert_eq!(grant.prefix, "/srv/git");
/// assert_eq!(grant.path, "tools/lint");
/// assert!(access::resolve(&config, "jdoe", Mode::Writable, "website").is_none());
/// ```
pub fn resolve(config: &Config, user: &str, mode: Mode, path: &str) -> Option<Grant> {
    debug!(user, mode = %mode, path, "access check");

    let path = canonical_path(path);

    let sections = std::iter::once(user_section(user))
        .chain(group::membership(config, user).map(|g| group_section(&g)));

    for section in sections {
        let patterns = config.get_list(&section, mode.as_str());

        let mapping = if path_matches(path, &patterns) {
            debug!(user, mode = %mode, path, section = %section, "access ok");
            Some(path)
        } else {
            let mapped = config
                .get(&section, &format!("{}{}", mode.map_prefix(), path))
                .map(canonical_path);
            if let Some(mapped) = mapped {
                debug!(user, mode = %mode, path, mapped, section = %section, "access ok via map");
            }
            mapped
        };

        if let Some(mapping) = mapping {
            let prefix = config.get_default(
                &section,
                "repositories",
                DEFAULT_REPOSITORIES,
                Some(GITOSIS_SECTION),
            );
            debug!(prefix, path = mapping, "using prefix");
            return Some(Grant {
                prefix: prefix.to_string(),
                path: mapping.to_string(),
            });
        }
    }

    None
}

/// Resolve write access, honouring the legacy `writeable` spelling.
///
/// The returned mode tells which spelling granted access; a grant through
/// [`Mode::Writeable`] is logged as a configuration typo.
pub fn resolve_write(config: &Config, user: &str, path: &str) -> Option<(Grant, Mode)> {
    if let Some(grant) = resolve(config, user, Mode::Writable, path) {
        return Some((grant, Mode::Writable));
    }

    let grant = resolve(config, user, Mode::Writeable, path)?;
    warn!(
        path,
        "repository config has typo \"writeable\", should be \"writable\""
    );
    Some((grant, Mode::Writeable))
}

/// Users and groups granted a (mode, path) entry directly.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Holders {
    pub users: BTreeSet<String>,
    pub groups: BTreeSet<String>,
}

/// Everyone who can reach one repository, across all modes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AllAccess {
    /// Users granted directly.
    pub users: BTreeSet<String>,
    /// Groups granted directly.
    pub groups: BTreeSet<String>,
    /// `@group` for each granted group plus the transitive members of each.
    pub refs: BTreeSet<String>,
}

impl AllAccess {
    /// Whether the repository is reachable by everyone.
    pub fn is_public(&self) -> bool {
        self.groups.contains(ALL) || self.refs.contains(ALL_REF)
    }
}

/// Direct grants for every repository, computed in one pass over the
/// configuration.
///
/// Keys are `(mode, canonical path)`. The `(mode, None)` key is reserved
/// for rules that apply to every path; it is consulted on every lookup.
#[derive(Debug, Clone, Default)]
pub struct AccessTable {
    entries: HashMap<(Mode, Option<String>), Holders>,
}

impl AccessTable {
    /// Build the table for all modes.
    pub fn build(config: &Config) -> Self {
        Self::build_for(config, &Mode::ALL)
    }

    /// Build the table for the given modes.
    pub fn build_for(config: &Config, modes: &[Mode]) -> Self {
        let mut table = Self::default();
        for &mode in modes {
            table.cache_mode(config, mode);
        }
        table
    }

    fn cache_mode(&mut self, config: &Config, mode: Mode) {
        let map_prefix = mode.map_prefix();

        for section in config.sections() {
            let (name, is_group) = match SectionKind::parse(section) {
                SectionKind::User(name) => (name, false),
                SectionKind::Group(name) => (name, true),
                SectionKind::Repo(name) => {
                    // Declared repositories appear even with no grants
                    self.entries
                        .entry((mode, Some(canonical_path(name).to_string())))
                        .or_default();
                    continue;
                }
                SectionKind::Other(_) => continue,
            };

            let mut paths = config.get_list(section, mode.as_str());
            paths.extend(
                config
                    .items(section)
                    .filter(|(key, _)| key.starts_with(&map_prefix))
                    .map(|(_, value)| value),
            );

            for path in paths {
                let holders = self
                    .entries
                    .entry((mode, Some(canonical_path(path).to_string())))
                    .or_default();
                if is_group {
                    holders.groups.insert(name.to_string());
                } else {
                    holders.users.insert(name.to_string());
                }
            }
        }
    }

    /// Direct grants for one key.
    pub fn entry(&self, mode: Mode, path: Option<&str>) -> Option<&Holders> {
        self.entries.get(&(mode, path.map(str::to_string)))
    }

    /// Every repository path named in the table, sorted.
    pub fn repositories(&self) -> BTreeSet<&str> {
        self.entries
            .keys()
            .filter_map(|(_, path)| path.as_deref())
            .collect()
    }

    /// Merge the grants for `path` (and the all-paths entry) into the
    /// accumulators.
    pub fn list_access(
        &self,
        mode: Mode,
        path: &str,
        users: &mut BTreeSet<String>,
        groups: &mut BTreeSet<String>,
    ) {
        let path = canonical_path(path);
        for key in [Some(path), None] {
            if let Some(holders) = self.entry(mode, key) {
                users.extend(holders.users.iter().cloned());
                groups.extend(holders.groups.iter().cloned());
            }
        }
    }

    /// Everyone who can reach `path` in any mode.
    pub fn all_access(&self, config: &Config, path: &str) -> AllAccess {
        let mut users = BTreeSet::new();
        let mut groups = BTreeSet::new();
        for mode in Mode::ALL {
            self.list_access(mode, path, &mut users, &mut groups);
        }

        let mut refs: BTreeSet<String> = groups.iter().map(|g| format!("@{g}")).collect();
        for group in &groups {
            group::list_members(config, group, &mut refs);
        }

        AllAccess {
            users,
            groups,
            refs,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn grant(prefix: &str, path: &str) -> Option<Grant> {
        Some(Grant {
            prefix: prefix.to_string(),
            path: path.to_string(),
        })
    }

    #[test]
    fn test_canonical_path() {
        assert_eq!(canonical_path("foo.git"), "foo");
        assert_eq!(canonical_path("foo"), "foo");
        assert_eq!(canonical_path("a/b.git"), "a/b");
        assert_eq!(canonical_path("a.git/b"), "a.git/b");
        assert_eq!(canonical_path("foo.git.git"), "foo.git");
        assert_eq!(canonical_path(".foo.git"), ".foo");
        assert_eq!(canonical_path(".git"), ".git");
        assert_eq!(canonical_path("a/..git"), "a/..git");
        assert_eq!(canonical_path("foo.gitx"), "foo.gitx");
    }

    #[test]
    fn test_mode_parse_round_trip() {
        for mode in Mode::ALL {
            assert_eq!(mode.as_str().parse::<Mode>().unwrap(), mode);
        }
        assert!("admin".parse::<Mode>().is_err());
        assert!(Mode::Writeable.is_legacy());
        assert!(!Mode::Writable.is_legacy());
    }

    #[test]
    fn test_glob_matching() {
        assert!(path_matches("proj/sub", &["proj/*"]));
        assert!(!path_matches("proj2/sub", &["proj/*"]));
        assert!(path_matches("proj/a/b", &["proj/*"]));
        assert!(path_matches("foo1", &["foo?"]));
        assert!(path_matches("foob", &["foo[abc]"]));
        assert!(!path_matches("food", &["foo[abc]"]));
        assert!(!path_matches("anything", &[]));
        // Broken glob degrades to literal comparison
        assert!(path_matches("foo[", &["foo["]));
    }

    #[test]
    fn test_star_runs_match_like_single_star() {
        assert!(path_matches("team-foo", &["team-**"]));
        assert!(path_matches("axxb", &["a**b"]));
        assert!(path_matches("ab", &["a***b"]));
        assert!(path_matches("team/a/b", &["team/**"]));
        assert!(!path_matches("axxc", &["a**b"]));
        assert_eq!(collapse_stars("a**b"), "a*b");
        assert!(matches!(collapse_stars("a*b"), Cow::Borrowed(_)));

        let config = Config::new().with("user jdoe", "readonly", "team-**");
        assert_eq!(
            resolve(&config, "jdoe", Mode::ReadOnly, "team-foo"),
            grant("repositories", "team-foo")
        );
    }

    #[test]
    fn test_double_suffix_keeps_one() {
        let config = Config::new()
            .with("user jdoe", "readonly", "*")
            .with("user jdoe", "map writable foo", "bar.git.git");

        let read = resolve(&config, "jdoe", Mode::ReadOnly, "foo.git.git").unwrap();
        assert_eq!(read.path, "foo.git");
        assert_eq!(read.repository_path(), "foo.git.git");

        let write = resolve(&config, "jdoe", Mode::Writable, "foo").unwrap();
        assert_eq!(write.path, "bar.git");
        assert_eq!(write.repository_path(), "bar.git.git");
    }

    #[test]
    fn test_no_access_by_default() {
        let config = Config::new();
        assert_eq!(resolve(&config, "jdoe", Mode::Writable, "foo/bar"), None);
    }

    #[test]
    fn test_user_grant() {
        let config = Config::new().with("user jdoe", "writable", "foo/bar");
        assert_eq!(
            resolve(&config, "jdoe", Mode::Writable, "foo/bar"),
            grant("repositories", "foo/bar")
        );
        assert_eq!(resolve(&config, "jdoe", Mode::ReadOnly, "foo/bar"), None);
    }

    #[test]
    fn test_group_grant() {
        let config = Config::new()
            .with("group fooers", "members", "jdoe")
            .with("group fooers", "writable", "foo/bar");
        assert_eq!(
            resolve(&config, "jdoe", Mode::Writable, "foo/bar"),
            grant("repositories", "foo/bar")
        );
        assert_eq!(resolve(&config, "other", Mode::Writable, "foo/bar"), None);
    }

    #[test]
    fn test_suffix_is_canonicalised() {
        let config = Config::new().with("user jdoe", "readonly", "foo");
        assert_eq!(
            resolve(&config, "jdoe", Mode::ReadOnly, "foo.git"),
            resolve(&config, "jdoe", Mode::ReadOnly, "foo")
        );
        assert!(resolve(&config, "jdoe", Mode::ReadOnly, "foo.git").is_some());
    }

    #[test]
    fn test_user_rule_takes_precedence() {
        let config = Config::new()
            .with("group devs", "members", "jdoe")
            .with("group devs", "writable", "foo")
            .with("group devs", "repositories", "/srv/group")
            .with("user jdoe", "writable", "foo")
            .with("user jdoe", "repositories", "/srv/user");
        assert_eq!(
            resolve(&config, "jdoe", Mode::Writable, "foo"),
            grant("/srv/user", "foo")
        );
    }

    #[test]
    fn test_group_discovery_order_breaks_ties() {
        let config = Config::new()
            .with("group outer", "members", "@inner")
            .with("group outer", "readonly", "foo")
            .with("group outer", "repositories", "/srv/outer")
            .with("group inner", "members", "jdoe")
            .with("group inner", "readonly", "foo")
            .with("group inner", "repositories", "/srv/inner");
        assert_eq!(
            resolve(&config, "jdoe", Mode::ReadOnly, "foo"),
            grant("/srv/inner", "foo")
        );
    }

    #[test]
    fn test_all_group_grants_everyone() {
        let config = Config::new().with("group all", "readonly", "public/*");
        assert_eq!(
            resolve(&config, "anyone", Mode::ReadOnly, "public/docs"),
            grant("repositories", "public/docs")
        );
    }

    #[test]
    fn test_map_remaps_path() {
        let config = Config::new()
            .with("group fooers", "members", "jdoe")
            .with("group fooers", "map writable foo/bar", "quux/thud");
        assert_eq!(
            resolve(&config, "jdoe", Mode::Writable, "foo/bar"),
            grant("repositories", "quux/thud")
        );
        assert_eq!(
            resolve(&config, "jdoe", Mode::Writable, "foo/bar.git"),
            grant("repositories", "quux/thud")
        );
        assert_eq!(resolve(&config, "jdoe", Mode::ReadOnly, "foo/bar"), None);
    }

    #[test]
    fn test_map_target_suffix_is_stripped() {
        let config = Config::new().with("user jdoe", "map readonly foo", "elsewhere/foo.git");
        let grant = resolve(&config, "jdoe", Mode::ReadOnly, "foo").unwrap();
        assert_eq!(grant.path, "elsewhere/foo");
        assert_eq!(grant.repository_path(), "elsewhere/foo.git");
    }

    #[test]
    fn test_pattern_match_beats_map_in_same_section() {
        let config = Config::new()
            .with("user jdoe", "readonly", "foo")
            .with("user jdoe", "map readonly foo", "bar");
        assert_eq!(
            resolve(&config, "jdoe", Mode::ReadOnly, "foo"),
            grant("repositories", "foo")
        );
    }

    #[test]
    fn test_prefix_falls_back_to_gitosis_section() {
        let config = Config::new()
            .with("gitosis", "repositories", "/var/git")
            .with("user jdoe", "readonly", "foo");
        assert_eq!(
            resolve(&config, "jdoe", Mode::ReadOnly, "foo"),
            grant("/var/git", "foo")
        );
    }

    #[test]
    fn test_resolve_write_legacy_spelling() {
        let config = Config::new().with("user jdoe", "writeable", "foo");
        let (grant, mode) = resolve_write(&config, "jdoe", "foo").unwrap();
        assert_eq!(grant.path, "foo");
        assert_eq!(mode, Mode::Writeable);

        let config = Config::new().with("user jdoe", "writable", "foo");
        let (_, mode) = resolve_write(&config, "jdoe", "foo").unwrap();
        assert_eq!(mode, Mode::Writable);

        assert!(resolve_write(&Config::new(), "jdoe", "foo").is_none());
    }

    #[test]
    fn test_resolve_terminates_on_cycles() {
        let config = Config::new()
            .with("group a", "members", "@b jdoe")
            .with("group b", "members", "@a")
            .with("group b", "readonly", "foo");
        assert!(resolve(&config, "jdoe", Mode::ReadOnly, "foo").is_some());
    }

    #[test]
    fn test_table_direct_entries() {
        let config = Config::new()
            .with("user jdoe", "readonly", "foo")
            .with("group devs", "readonly", "foo bar.git")
            .with("group devs", "map writable baz", "quux")
            .with_section("repo lonely");
        let table = AccessTable::build(&config);

        let foo = table.entry(Mode::ReadOnly, Some("foo")).unwrap();
        assert!(foo.users.contains("jdoe"));
        assert!(foo.groups.contains("devs"));

        // Stored under the canonical name
        assert!(table.entry(Mode::ReadOnly, Some("bar")).is_some());
        assert!(table.entry(Mode::ReadOnly, Some("bar.git")).is_none());

        // Map entries are keyed by their target
        let quux = table.entry(Mode::Writable, Some("quux")).unwrap();
        assert!(quux.groups.contains("devs"));

        // Declared repositories exist in every mode with no grants
        for mode in Mode::ALL {
            assert_eq!(
                table.entry(mode, Some("lonely")),
                Some(&Holders::default())
            );
        }

        assert_eq!(
            table.repositories().into_iter().collect::<Vec<_>>(),
            ["bar", "foo", "lonely", "quux"]
        );
    }

    #[test]
    fn test_list_access_accumulates() {
        let config = Config::new()
            .with("user jdoe", "readonly", "foo")
            .with("group devs", "writable", "foo");
        let table = AccessTable::build(&config);

        let mut users = BTreeSet::new();
        let mut groups = BTreeSet::new();
        table.list_access(Mode::ReadOnly, "foo.git", &mut users, &mut groups);
        assert!(users.contains("jdoe"));
        assert!(groups.is_empty());

        table.list_access(Mode::Writable, "foo", &mut users, &mut groups);
        assert!(groups.contains("devs"));
    }

    #[test]
    fn test_all_access_expands_refs() {
        let config = Config::new()
            .with("group devs", "members", "alice @ops")
            .with("group devs", "writable", "foo")
            .with("group ops", "members", "bob")
            .with("user carol", "writeable", "foo");
        let table = AccessTable::build(&config);
        let all = table.all_access(&config, "foo");

        assert_eq!(all.users.iter().collect::<Vec<_>>(), ["carol"]);
        assert_eq!(all.groups.iter().collect::<Vec<_>>(), ["devs"]);
        assert_eq!(
            all.refs.iter().collect::<Vec<_>>(),
            ["@devs", "@ops", "alice", "bob"]
        );
        assert!(!all.is_public());
    }

    #[test]
    fn test_all_access_public_markers() {
        let config = Config::new()
            .with("group everyone", "members", "@all")
            .with("group everyone", "readonly", "pub");
        let table = AccessTable::build(&config);
        assert!(table.all_access(&config, "pub").is_public());

        let config = Config::new().with("group all", "readonly", "pub");
        let table = AccessTable::build(&config);
        assert!(table.all_access(&config, "pub").is_public());
    }

    #[test]
    fn test_report_serializes() {
        let config = Config::new()
            .with("user jdoe", "writable", "foo")
            .with("group ops", "readonly", "foo");
        let table = AccessTable::build(&config);
        let json = serde_json::to_value(table.all_access(&config, "foo")).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "users": ["jdoe"],
                "groups": ["ops"],
                "refs": ["@ops"],
            })
        );

        let grant = resolve(&config, "jdoe", Mode::Writable, "foo").unwrap();
        assert_eq!(
            serde_json::to_value(&grant).unwrap(),
            serde_json::json!({"prefix": "repositories", "path": "foo"})
        );
        assert_eq!(serde_json::to_value(Mode::ReadOnly).unwrap(), "readonly");
    }
}

//! Configuration facade for Gitward.
//!
//! The access configuration is an ordered store of named sections holding
//! key/value pairs. Section order matters: group discovery follows the
//! order in which `group` sections are declared.
//!
//! All lookups are infallible except boolean coercion. A missing section or
//! key always yields a documented default.
//!
//! # File format
//!
//! [`Config::parse`] reads the INI dialect used by `gitosis.conf`:
//!
//! ```text
//! [gitosis]
//! repositories = /srv/git
//!
//! [group developers]
//! members = alice bob @contractors
//! writable = tools/* website
//! map readonly legacy = archive/legacy
//! ```
//!
//! Keys are case-folded to lowercase; section names and values keep their case.

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Section holding installation-wide settings.
pub const GITOSIS_SECTION: &str = "gitosis";

/// Section holding per-repository defaults.
pub const DEFAULTS_SECTION: &str = "defaults";

/// Default storage prefix, relative to the serving user's home.
pub const DEFAULT_REPOSITORIES: &str = "repositories";

/// Default directory for generated files, relative to home.
pub const DEFAULT_GENERATED_DIR: &str = "gitosis";

/// Typed view of a section name.
///
/// Section names are dispatched on their prefix exactly once, here, so the
/// rest of the crate never compares string prefixes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionKind<'a> {
    /// `user <name>`
    User(&'a str),
    /// `group <name>`
    Group(&'a str),
    /// `repo <name>`
    Repo(&'a str),
    /// Any other section (`gitosis`, `defaults`, ...)
    Other(&'a str),
}

impl<'a> SectionKind<'a> {
    /// Classify a section name.
    pub fn parse(name: &'a str) -> Self {
        if let Some(rest) = name.strip_prefix("user ") {
            Self::User(rest)
        } else if let Some(rest) = name.strip_prefix("group ") {
            Self::Group(rest)
        } else if let Some(rest) = name.strip_prefix("repo ") {
            Self::Repo(rest)
        } else {
            Self::Other(name)
        }
    }
}

/// Section name for a user.
pub fn user_section(name: &str) -> String {
    format!("user {name}")
}

/// Section name for a group.
pub fn group_section(name: &str) -> String {
    format!("group {name}")
}

/// Section name for a repository.
pub fn repo_section(name: &str) -> String {
    format!("repo {name}")
}

#[derive(Debug, Clone)]
struct Section {
    name: String,
    entries: Vec<(String, String)>,
}

impl Section {
    fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    fn set(&mut self, key: String, value: String) {
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }
}

/// Read-only snapshot of the access configuration.
///
/// Built once per process (or per request in a long-lived service) and
/// shared immutably by every resolver.
///
/// # Example
///
/// ```rust
/// use gitward::Config;
///
/// let config = Config::new()
///     .with("group devs", "members", "alice bob")
///     .with("group devs", "writable", "tools");
///
/// assert_eq!(config.get_list("group devs", "members"), vec!["alice", "bob"]);
/// assert!(config.get_list("group ops", "members").is_empty());
/// ```
#[derive(Debug, Clone, Default)]
pub struct Config {
    sections: Vec<Section>,
}

impl Config {
    /// Create an empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse configuration text.
    pub fn parse(text: &str) -> Result<Self> {
        let mut config = Self::new();
        let mut current: Option<usize> = None;
        let mut last_key: Option<String> = None;

        for (idx, line) in text.lines().enumerate() {
            let line_no = idx + 1;

            if line.trim().is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }

            if line.starts_with(char::is_whitespace) {
                if let (Some(sect), Some(key)) = (current, last_key.as_deref()) {
                    let extra = line.trim();
                    if !extra.is_empty() {
                        let section = &mut config.sections[sect];
                        let joined = format!("{}\n{}", section.get(key).unwrap_or(""), extra);
                        section.set(key.to_string(), joined);
                    }
                    continue;
                }
                return Err(Error::parse_at("unexpected indented line", line_no));
            }

            if let Some(rest) = line.strip_prefix('[') {
                let name = match rest.find(']') {
                    Some(end) if end > 0 => &rest[..end],
                    _ => return Err(Error::parse_at("malformed section header", line_no)),
                };
                current = Some(config.section_index_or_insert(name));
                last_key = None;
                continue;
            }

            let Some(sect) = current else {
                return Err(Error::parse_at("entry before any section header", line_no));
            };

            let Some(sep) = line.find([':', '=']) else {
                return Err(Error::parse_at("expected `key = value`", line_no));
            };
            let key = line[..sep].trim_end();
            if key.is_empty() {
                return Err(Error::parse_at("empty key", line_no));
            }
            let key = key.to_lowercase();
            let value = strip_inline_comment(line[sep + 1..].trim_start());

            config.sections[sect].set(key.clone(), value);
            last_key = Some(key);
        }

        Ok(config)
    }

    /// Load and parse a configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
    }

    fn section(&self, name: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.name == name)
    }

    fn section_index_or_insert(&mut self, name: &str) -> usize {
        match self.sections.iter().position(|s| s.name == name) {
            Some(idx) => idx,
            None => {
                self.sections.push(Section {
                    name: name.to_string(),
                    entries: Vec::new(),
                });
                self.sections.len() - 1
            }
        }
    }

    /// Declare a section. Existing sections are left untouched.
    pub fn add_section(&mut self, name: impl AsRef<str>) {
        self.section_index_or_insert(name.as_ref());
    }

    /// Set a value, declaring the section if needed.
    pub fn set(&mut self, section: impl AsRef<str>, key: impl AsRef<str>, value: impl Into<String>) {
        let idx = self.section_index_or_insert(section.as_ref());
        self.sections[idx].set(key.as_ref().to_lowercase(), value.into());
    }

    /// Builder form of [`Config::add_section`].
    pub fn with_section(mut self, name: impl AsRef<str>) -> Self {
        self.add_section(name);
        self
    }

    /// Builder form of [`Config::set`].
    pub fn with(
        mut self,
        section: impl AsRef<str>,
        key: impl AsRef<str>,
        value: impl Into<String>,
    ) -> Self {
        self.set(section, key, value);
        self
    }

    /// Section names in declaration order.
    pub fn sections(&self) -> impl Iterator<Item = &str> {
        self.sections.iter().map(|s| s.name.as_str())
    }

    /// Typed section names in declaration order.
    pub fn section_kinds(&self) -> impl Iterator<Item = SectionKind<'_>> {
        self.sections().map(SectionKind::parse)
    }

    /// Check whether a section is declared.
    pub fn has_section(&self, name: &str) -> bool {
        self.section(name).is_some()
    }

    /// Raw value lookup.
    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.section(section)?.get(&key.to_lowercase())
    }

    /// All entries of a section, in declaration order.
    pub fn items(&self, section: &str) -> impl Iterator<Item = (&str, &str)> {
        self.section(section)
            .into_iter()
            .flat_map(|s| s.entries.iter().map(|(k, v)| (k.as_str(), v.as_str())))
    }

    /// Whitespace-split value, or an empty list when absent.
    pub fn get_list(&self, section: &str, key: &str) -> Vec<&str> {
        self.get(section, key)
            .map(|v| v.split_whitespace().collect())
            .unwrap_or_default()
    }

    /// Value from `section`, else from `default_section` when given.
    pub fn get_fallback(
        &self,
        section: &str,
        key: &str,
        default_section: Option<&str>,
    ) -> Option<&str> {
        self.get(section, key)
            .or_else(|| default_section.and_then(|d| self.get(d, key)))
    }

    /// Value from `section`, else from `default_section`, else `fallback`.
    pub fn get_default<'a>(
        &'a self,
        section: &str,
        key: &str,
        fallback: &'a str,
        default_section: Option<&str>,
    ) -> &'a str {
        self.get_fallback(section, key, default_section)
            .unwrap_or(fallback)
    }

    /// Boolean value of a key, `None` when absent.
    pub fn get_boolean(&self, section: &str, key: &str) -> Result<Option<bool>> {
        self.get(section, key).map(parse_bool).transpose()
    }

    /// Boolean with the same precedence as [`Config::get_default`].
    ///
    /// A present but unrecognized value is an error even when a fallback
    /// section would have a valid one.
    pub fn get_boolean_default(
        &self,
        section: &str,
        key: &str,
        fallback: bool,
        default_section: Option<&str>,
    ) -> Result<bool> {
        if let Some(value) = self.get_boolean(section, key)? {
            return Ok(value);
        }
        match default_section {
            Some(d) => Ok(self.get_boolean(d, key)?.unwrap_or(fallback)),
            None => Ok(fallback),
        }
    }

    /// Top-level directory holding repositories.
    ///
    /// `[gitosis] repositories` resolved against `home`; an absolute value
    /// replaces `home` entirely.
    pub fn repository_dir(&self, home: &Path) -> PathBuf {
        home.join(
            self.get(GITOSIS_SECTION, "repositories")
                .unwrap_or(DEFAULT_REPOSITORIES),
        )
    }

    /// Directory receiving generated files (`projects.list`, `groups`).
    pub fn generated_files_dir(&self, home: &Path) -> PathBuf {
        match self.get(GITOSIS_SECTION, "generate-files-in") {
            Some(dir) => PathBuf::from(dir),
            None => home.join(DEFAULT_GENERATED_DIR),
        }
    }
}

/// Coerce a boolean token.
///
/// Accepts `1/yes/true/on` and `0/no/false/off`, case-insensitively.
pub fn parse_bool(value: &str) -> Result<bool> {
    match value.to_lowercase().as_str() {
        "1" | "yes" | "true" | "on" => Ok(true),
        "0" | "no" | "false" | "off" => Ok(false),
        _ => Err(Error::ConfigValue(format!("not a boolean: {value}"))),
    }
}

/// `value ; comment` loses the comment when `;` follows whitespace.
fn strip_inline_comment(value: &str) -> String {
    let mut cut = value.len();
    for (pos, _) in value.match_indices(';') {
        if value[..pos].ends_with(char::is_whitespace) {
            cut = pos;
            break;
        }
    }
    let value = value[..cut].trim();
    if value == "\"\"" {
        String::new()
    } else {
        value.to_string()
    }
}

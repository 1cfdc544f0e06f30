//! Group membership resolution.
//!
//! Groups form an implicit directed graph: an identity (or `@group`
//! reference) points at every group whose `members` list names it. The
//! graph may contain cycles; every traversal here carries a visited set so
//! cycles are absorbed silently.
//!
//! The universal group [`ALL`] contains every identity without being
//! declared anywhere. Any group listing `@all` among its members is
//! therefore reached by everyone.

use std::collections::{BTreeSet, HashSet};
use std::io::Write;
use std::path::Path;

use tracing::debug;

use crate::config::{Config, SectionKind, group_section};
use crate::error::Result;
use crate::files::write_atomic;

/// Name of the universal group.
pub const ALL: &str = "all";

/// Member reference to the universal group.
pub const ALL_REF: &str = "@all";

/// One level of the depth-first walk: the member being looked up and the
/// next group section to scan for it.
#[derive(Debug)]
struct Frame {
    member: String,
    next: usize,
}

/// Groups an identity belongs to, in discovery order.
///
/// Created by [`membership`]. Groups are yielded as soon as they are
/// discovered, then the groups containing them are explored before
/// scanning continues, so a user's own group comes before the groups that
/// nest it. [`ALL`] is always the final item.
#[derive(Debug)]
pub struct Membership<'a> {
    groups: Vec<(&'a str, Vec<&'a str>)>,
    stack: Vec<Frame>,
    seen: HashSet<&'a str>,
    finished: bool,
}

impl Iterator for Membership<'_> {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        loop {
            let Some(frame) = self.stack.last_mut() else {
                if self.finished {
                    return None;
                }
                self.finished = true;
                return Some(ALL.to_string());
            };

            let Some((group, members)) = self.groups.get(frame.next) else {
                self.stack.pop();
                continue;
            };
            frame.next += 1;

            if self.seen.contains(group) {
                continue;
            }

            // @all is the only group whose membership is bootstrapped;
            // everything else starts from the member itself
            if members.contains(&frame.member.as_str()) || members.contains(&ALL_REF) {
                debug!(member = %frame.member, group = %group, "found member in group");
                let group = *group;
                self.seen.insert(group);
                self.stack.push(Frame {
                    member: format!("@{group}"),
                    next: 0,
                });
                return Some(group.to_string());
            }
        }
    }
}

/// Resolve the groups `user` belongs to, directly or transitively.
///
/// Each group is yielded at most once per call, even on cyclic
/// configurations. A declared `group all` section is never expanded; the
/// universal group is yielded exactly once, last.
///
/// # Example
///
/// ```rust
/// use gitward::{Config, group};
///
/// let config = Config::new()
///     .with("group hackers", "members", "wsmith @smackers")
///     .with("group smackers", "members", "jdoe");
///
/// let groups: Vec<String> = group::membership(&config, "jdoe").collect();
/// assert_eq!(groups, ["smackers", "hackers", "all"]);
/// ```
pub fn membership<'a>(config: &'a Config, user: &str) -> Membership<'a> {
    let groups = config
        .section_kinds()
        .filter_map(|kind| match kind {
            SectionKind::Group(name) => Some(name),
            _ => None,
        })
        .map(|name| (name, config.get_list(&group_section(name), "members")))
        .collect();

    Membership {
        groups,
        stack: vec![Frame {
            member: user.to_string(),
            next: 0,
        }],
        seen: HashSet::from([ALL]),
        finished: false,
    }
}

/// Add every member of `group` to `members`, following nested `@group`
/// references.
///
/// Nested references are added as-is (with the `@`) alongside the
/// identities they expand to. A reference is only expanded the first time
/// it enters `members`, which stops cyclic declarations; on acyclic
/// configurations the result is the full transitive member set. The
/// universal group is never expanded.
pub fn list_members(config: &Config, group: &str, members: &mut BTreeSet<String>) {
    if group == ALL {
        return;
    }

    for member in config.get_list(&group_section(group), "members") {
        if !members.insert(member.to_string()) {
            continue;
        }
        if let Some(nested) = member.strip_prefix('@') {
            list_members(config, nested, members);
        }
    }
}

/// Write the group list used by gitweb-style HTTP authorization.
///
/// One line per declared group other than [`ALL`]: the group name followed
/// by its sorted member identities (nested group references omitted).
pub fn write_group_list(config: &Config, out: &mut impl Write) -> Result<()> {
    for kind in config.section_kinds() {
        let SectionKind::Group(group) = kind else {
            continue;
        };
        if group == ALL {
            continue;
        }

        let mut items = BTreeSet::new();
        list_members(config, group, &mut items);

        let users: Vec<&str> = items
            .iter()
            .map(String::as_str)
            .filter(|u| !u.starts_with('@'))
            .collect();
        writeln!(out, "{}: {}", group, users.join(" "))?;
    }
    Ok(())
}

/// Atomically regenerate the group list file at `path`.
pub fn generate_group_list(config: &Config, path: &Path) -> Result<()> {
    let mut buf = Vec::new();
    write_group_list(config, &mut buf)?;
    debug!(path = %path.display(), "writing group list");
    write_atomic(path, &buf)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn groups_of(config: &Config, user: &str) -> Vec<String> {
        membership(config, user).collect()
    }

    #[test]
    fn test_empty_config() {
        assert_eq!(groups_of(&Config::new(), "jdoe"), ["all"]);
    }

    #[test]
    fn test_empty_group() {
        let config = Config::new().with_section("group hackers");
        assert_eq!(groups_of(&config, "jdoe"), ["all"]);
    }

    #[test]
    fn test_not_listed() {
        let config = Config::new().with("group hackers", "members", "wsmith");
        assert_eq!(groups_of(&config, "jdoe"), ["all"]);
    }

    #[test]
    fn test_member_anywhere_in_list() {
        for members in ["jdoe", "jdoe wsmith", "wsmith jdoe", "wsmith jdoe danny"] {
            let config = Config::new().with("group hackers", "members", members);
            assert_eq!(groups_of(&config, "jdoe"), ["hackers", "all"], "{members}");
        }
    }

    #[test]
    fn test_recurse_one() {
        let config = Config::new()
            .with("group hackers", "members", "wsmith @smackers")
            .with("group smackers", "members", "danny jdoe");
        assert_eq!(groups_of(&config, "jdoe"), ["smackers", "hackers", "all"]);
    }

    #[test]
    fn test_recurse_one_ordering() {
        let config = Config::new()
            .with("group smackers", "members", "danny jdoe")
            .with("group hackers", "members", "wsmith @smackers");
        assert_eq!(groups_of(&config, "jdoe"), ["smackers", "hackers", "all"]);
    }

    #[test]
    fn test_recurse_three() {
        let config = Config::new()
            .with("group hackers", "members", "wsmith @smackers")
            .with("group smackers", "members", "danny @snackers")
            .with("group snackers", "members", "@whackers foo")
            .with("group whackers", "members", "jdoe");
        assert_eq!(
            groups_of(&config, "jdoe"),
            ["whackers", "snackers", "smackers", "hackers", "all"]
        );
    }

    #[test]
    fn test_nested_chain_deepest_first() {
        let config = Config::new()
            .with("group a", "members", "@b")
            .with("group b", "members", "@c")
            .with("group c", "members", "@d")
            .with("group d", "members", "user");
        assert_eq!(groups_of(&config, "user"), ["d", "c", "b", "a", "all"]);
    }

    #[test]
    fn test_recurse_junk() {
        let config = Config::new()
            .with("group hackers", "members", "@notexist @smackers")
            .with("group smackers", "members", "jdoe");
        assert_eq!(groups_of(&config, "jdoe"), ["smackers", "hackers", "all"]);
    }

    #[test]
    fn test_recurse_loop() {
        let config = Config::new()
            .with("group hackers", "members", "@smackers")
            .with("group smackers", "members", "@hackers jdoe");
        assert_eq!(groups_of(&config, "jdoe"), ["smackers", "hackers", "all"]);
    }

    #[test]
    fn test_no_recurse_loop() {
        let config = Config::new()
            .with("group hackers", "members", "@smackers")
            .with("group smackers", "members", "@hackers");
        assert_eq!(groups_of(&config, "jdoe"), ["all"]);
    }

    #[test]
    fn test_self_loop_terminates() {
        let config = Config::new().with("group ouroboros", "members", "@ouroboros jdoe");
        assert_eq!(groups_of(&config, "jdoe"), ["ouroboros", "all"]);
    }

    #[test]
    fn test_all_bootstraps_membership() {
        let config = Config::new()
            .with("group everyone", "members", "@all")
            .with("group nested", "members", "@everyone");
        assert_eq!(groups_of(&config, "stranger"), ["everyone", "nested", "all"]);
    }

    #[test]
    fn test_declared_all_is_yielded_once_last() {
        let config = Config::new()
            .with("group all", "members", "jdoe")
            .with("group devs", "members", "jdoe");
        assert_eq!(groups_of(&config, "jdoe"), ["devs", "all"]);
    }

    #[test]
    fn test_membership_is_lazy() {
        let config = Config::new().with("group devs", "members", "jdoe");
        let mut it = membership(&config, "jdoe");
        assert_eq!(it.next().as_deref(), Some("devs"));
        assert_eq!(it.next().as_deref(), Some("all"));
        assert_eq!(it.next(), None);
        assert_eq!(it.next(), None);
    }

    #[test]
    fn test_list_members_nested() {
        let config = Config::new()
            .with("group foo", "members", "a b @bar")
            .with("group bar", "members", "c d");
        let mut members = BTreeSet::new();
        list_members(&config, "foo", &mut members);
        assert_eq!(
            members.into_iter().collect::<Vec<_>>(),
            ["@bar", "a", "b", "c", "d"]
        );
    }

    #[test]
    fn test_list_members_all_is_not_expanded() {
        let config = Config::new().with("group all", "members", "jdoe");
        let mut members = BTreeSet::new();
        list_members(&config, "all", &mut members);
        assert!(members.is_empty());
    }

    #[test]
    fn test_list_members_cycle_terminates() {
        let config = Config::new()
            .with("group a", "members", "x @b")
            .with("group b", "members", "y @a");
        let mut members = BTreeSet::new();
        list_members(&config, "a", &mut members);
        assert_eq!(
            members.into_iter().collect::<Vec<_>>(),
            ["@a", "@b", "x", "y"]
        );
    }

    #[test]
    fn test_list_members_diamond_matches_unguarded_result() {
        // a -> b, a -> c, b -> d, c -> d
        let config = Config::new()
            .with("group a", "members", "@b @c")
            .with("group b", "members", "u1 @d")
            .with("group c", "members", "u2 @d")
            .with("group d", "members", "u3");
        let mut members = BTreeSet::new();
        list_members(&config, "a", &mut members);
        assert_eq!(
            members.into_iter().collect::<Vec<_>>(),
            ["@b", "@c", "@d", "u1", "u2", "u3"]
        );
    }

    #[test]
    fn test_group_list_multiple() {
        let config = Config::new()
            .with_section("gitosis")
            .with("group all", "readonly", "zap")
            .with("group foo", "members", "a b c @bar")
            .with("group bar", "members", "c d")
            .with("group baz", "members", "@all");
        let mut got = Vec::new();
        write_group_list(&config, &mut got).unwrap();
        assert_eq!(
            String::from_utf8(got).unwrap(),
            "foo: a b c d\nbar: c d\nbaz: \n"
        );
    }

    #[test]
    fn test_generate_group_list_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("groups");
        let config = Config::new().with("group devs", "members", "bob alice");
        generate_group_list(&config, &path).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "devs: alice bob\n");
    }
}

//! Fuzz target for the config parser and group traversal
//!
//! Arbitrary INI text, including cyclic group declarations, must parse or
//! fail cleanly, and every traversal must terminate.
//!
//! Run with: cargo +nightly fuzz run config_fuzz -- -max_total_time=300

#![no_main]

use gitward::{AccessTable, Config, access, group};
use libfuzzer_sys::fuzz_target;
use std::collections::BTreeSet;

fuzz_target!(|data: &[u8]| {
    let Ok(input) = std::str::from_utf8(data) else {
        return;
    };
    if input.len() > 10_000 {
        return;
    }

    let Ok(config) = Config::parse(input) else {
        return;
    };

    let groups: Vec<String> = group::membership(&config, "fuzz").collect();
    assert_eq!(groups.last().map(String::as_str), Some(group::ALL));

    for name in &groups {
        let mut members = BTreeSet::new();
        group::list_members(&config, name, &mut members);
    }

    let _ = access::resolve(&config, "fuzz", gitward::Mode::ReadOnly, "foo");
    let table = AccessTable::build(&config);
    for repo in table.repositories() {
        let _ = table.all_access(&config, repo);
    }
});

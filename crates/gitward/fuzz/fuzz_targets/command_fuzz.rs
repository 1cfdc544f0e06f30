//! Fuzz target for the command gate
//!
//! Feeds arbitrary ssh commands through parsing and authorization to find:
//! - Panics on unusual input
//! - Rewritten commands that escape the storage prefix
//!
//! Run with: cargo +nightly fuzz run command_fuzz -- -max_total_time=300

#![no_main]

use gitward::{Config, Gate, RepositoryHooks, Result};
use libfuzzer_sys::fuzz_target;
use std::path::Path;

struct NoopHooks;

impl RepositoryHooks for NoopHooks {
    fn init_repository(&self, _: &Path, _: Option<&str>, _: u32) -> Result<()> {
        Ok(())
    }

    fn regenerate_project_list(&self, _: &Config) -> Result<()> {
        Ok(())
    }

    fn regenerate_export_permissions(&self, _: &Config) -> Result<()> {
        Ok(())
    }
}

fuzz_target!(|data: &[u8]| {
    let Ok(input) = std::str::from_utf8(data) else {
        return;
    };
    if input.len() > 4096 {
        return;
    }

    // Parsing alone must never panic
    let _ = gitward::serve::parse_command(input);

    // With everything readable, anything accepted must stay under the prefix.
    // The prefix is absolute and missing, so no repository is created.
    let config = Config::new()
        .with("group all", "readonly", "*")
        .with("gitosis", "repositories", "/nonexistent/srv/git");
    let gate = Gate::new(&config, "/nonexistent", &NoopHooks);
    if let Ok(served) = gate.serve("fuzz", input) {
        let path = served
            .command
            .split_once(" '")
            .map(|(_, p)| p)
            .unwrap_or_default();
        assert!(path.starts_with("/nonexistent/srv/git/"), "{}", served.command);
        assert!(!path.contains("/../"), "{}", served.command);
    }
});

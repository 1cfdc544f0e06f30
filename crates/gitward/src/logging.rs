//! Logging helpers for Gitward
//!
//! Remote commands arrive from untrusted clients and are logged before
//! they are validated. Everything logged from the request passes through
//! [`sanitize_for_log`] so it cannot forge log lines.
//!
//! # Log Levels
//!
//! - **ERROR**: Denied requests, missing identity data for CVS
//! - **WARN**: Deprecated `writeable` spelling, collaborator failures
//! - **INFO**: Served commands, repository auto-creation
//! - **DEBUG**: Access checks, group discovery, generated files

use std::borrow::Cow;

/// Maximum length of logged request values before truncation.
pub const MAX_LOGGED_VALUE: usize = 200;

/// Escape characters that could be used for log injection.
///
/// Newlines, carriage returns and tabs become visible escapes; other
/// control characters are dropped. The result is truncated to
/// [`MAX_LOGGED_VALUE`] bytes on a char boundary.
pub fn sanitize_for_log(input: &str) -> String {
    let escaped: String = input
        .replace('\n', "\\n")
        .replace('\r', "\\r")
        .replace('\t', "\\t")
        .chars()
        .filter(|c| !c.is_control())
        .collect();
    truncate(&escaped, MAX_LOGGED_VALUE).into_owned()
}

/// Truncate value if it exceeds `max` bytes.
///
/// Handles UTF-8 char boundaries properly to avoid panics on multi-byte chars.
fn truncate(value: &str, max: usize) -> Cow<'_, str> {
    if value.len() <= max {
        Cow::Borrowed(value)
    } else {
        let mut end = max;
        while end > 0 && !value.is_char_boundary(end) {
            end -= 1;
        }
        Cow::Owned(format!(
            "{}...[truncated {} bytes]",
            &value[..end],
            value.len() - end
        ))
    }
}

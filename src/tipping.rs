//! Tipping handle validation. Venmo is the only supported provider.

use regex::Regex;
use std::sync::OnceLock;

pub const VENMO_HANDLE_MIN: usize = 5;
pub const VENMO_HANDLE_MAX: usize = 30;

fn venmo_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]{5,30}$").expect("venmo regex is valid"))
}

/// Normalizes user input into a stored Venmo handle.
///
/// Accepts `@handle`, `handle` or a `venmo.com/u/handle` link. Empty input
/// clears the handle (`Ok(None)`).
pub fn normalize_venmo_handle(raw: &str) -> Result<Option<String>, String> {
    let mut handle = raw.trim();
    if handle.is_empty() {
        return Ok(None);
    }

    for prefix in [
        "https://",
        "http://",
        "www.",
        "account.venmo.com/u/",
        "venmo.com/u/",
        "venmo.com/",
    ] {
        if let Some(rest) = handle.strip_prefix(prefix) {
            handle = rest;
        }
    }
    let handle = handle.trim_start_matches('@').trim_end_matches('/');

    if venmo_regex().is_match(handle) {
        Ok(Some(handle.to_string()))
    } else {
        Err(format!(
            "Venmo handle must be {}-{} letters, numbers, dashes or underscores",
            VENMO_HANDLE_MIN, VENMO_HANDLE_MAX
        ))
    }
}

/// Public pay link for a stored handle.
pub fn venmo_pay_url(handle: &str) -> String {
    format!("https://venmo.com/u/{}", handle)
}

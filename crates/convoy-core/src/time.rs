//! Wall-clock helpers
//!
//! Passports carry unix seconds; events and RPC internals carry unix
//! milliseconds. Verification paths accept an injected time instead of
//! calling these directly, so clock-sensitive logic stays testable.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current unix time in whole seconds.
pub fn now_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Current unix time in milliseconds.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn millis_and_seconds_agree() {
        let s = now_seconds();
        let ms = now_millis();
        assert!(ms / 1000 >= s);
        assert!(ms / 1000 <= s + 1);
    }
}

//! Name-collision policies applied when staged entries are committed.

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

/// How a commit resolves a name that already exists at the destination.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Display, AsRefStr, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DuplicatePolicy {
    /// Keep the existing entry and drop the new one.
    #[default]
    IgnoreExisting,
    /// Keep both, giving the new entry a numbered name ("file (1).txt").
    AddCounter,
    /// Replace the existing entry with the new one.
    Replace,
}

/// Build the `n`th counter variant of `name`.
///
/// For "file.txt" this yields "file (n).txt"; names without an extension or
/// starting with a dot get the counter appended at the end.
pub fn counter_name(name: &str, n: u32) -> String {
    match name.rfind('.') {
        Some(dot) if dot > 0 => format!("{} ({}){}", &name[..dot], n, &name[dot..]),
        _ => format!("{name} ({n})"),
    }
}

/// Find the first counter variant of `name` for which `exists` is false.
///
/// Tries "file (1).txt", "file (2).txt", etc.
pub fn next_free_name(name: &str, exists: impl Fn(&str) -> bool) -> String {
    for i in 1..10_000 {
        let candidate = counter_name(name, i);
        if !exists(&candidate) {
            return candidate;
        }
    }

    // Fallback: use timestamp
    let timestamp = chrono::Utc::now().timestamp_millis();
    let stamped = format!("{name}_{timestamp}");
    if exists(&stamped) {
        format!("{stamped}_{}", uuid::Uuid::new_v4().simple())
    } else {
        stamped
    }
}

use std::path::PathBuf;

use dirs_next::home_dir;

/// Expands a leading `~` to the user's home directory.
pub fn expand_tilde(path: &str) -> PathBuf {
    let trimmed = path.trim();
    let home = || home_dir().unwrap_or_else(|| PathBuf::from("~"));
    if trimmed == "~" {
        return home();
    }
    match trimmed.strip_prefix("~/").or_else(|| trimmed.strip_prefix("~\\")) {
        Some(rest) => home().join(rest),
        None => PathBuf::from(trimmed),
    }
}

/// Replaces characters that are awkward in file names (`/`, `-`, whitespace)
/// with underscores.
///
/// ```rust
/// use gcpdiag_util::sanitize_file_component;
///
/// assert_eq!(sanitize_file_component("gce/vm-running-state"), "gce_vm_running_state");
/// ```
pub fn sanitize_file_component(value: &str) -> String {
    value
        .trim()
        .chars()
        .map(|character| match character {
            '/' | '\\' | '-' | ':' => '_',
            other if other.is_whitespace() => '_',
            other => other,
        })
        .collect()
}

//! File utility functions

use std::path::PathBuf;

/// Expand a user-supplied path string to an absolute path.
///
/// `~` and `~/...` resolve against the home directory. Relative paths
/// (including bare names) resolve against the current directory without
/// being canonicalized. Absolute paths pass through unchanged.
///
/// ```text
/// expand_path("~/.tracefold") // -> /home/user/.tracefold
/// expand_path("./data")       // -> /current/dir/./data
/// expand_path("tracefold.db") // -> /current/dir/tracefold.db
/// ```
pub fn expand_path(path: &str) -> PathBuf {
    let path = path.trim();

    if path.is_empty() {
        return std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    }

    let expanded = if path == "~" {
        dirs::home_dir().unwrap_or_else(|| PathBuf::from(path))
    } else if let Some(rest) = path.strip_prefix("~/") {
        match dirs::home_dir() {
            Some(home) => home.join(rest),
            None => PathBuf::from(path),
        }
    } else {
        PathBuf::from(path)
    };

    if expanded.is_relative() {
        std::env::current_dir()
            .map(|cwd| cwd.join(&expanded))
            .unwrap_or(expanded)
    } else {
        expanded
    }
}

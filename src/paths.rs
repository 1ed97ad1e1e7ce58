//! Path helpers for the request FIFO.

use std::path::{Path, PathBuf};

/// Prefix of the default FIFO file name.
pub const FIFO_PREFIX: &str = "fibpipe";

/// Default FIFO location for a server with process id `pid`.
///
/// Lives in the system temp directory and embeds the pid, so concurrent
/// servers never share a channel.
///
/// # Examples
///
/// ```
/// use fibpipe::paths::default_fifo_path;
///
/// let path = default_fifo_path(4242);
/// assert!(path.ends_with("fibpipe-4242.fifo"));
/// ```
pub fn default_fifo_path(pid: u32) -> PathBuf {
    std::env::temp_dir().join(format!("{FIFO_PREFIX}-{pid}.fifo"))
}

/// Resolve the FIFO path: the explicit one (tilde-expanded) or the default
/// for this process.
pub fn resolve_fifo_path(explicit: Option<&Path>) -> PathBuf {
    match explicit {
        Some(path) => expand_tilde(path),
        None => default_fifo_path(std::process::id()),
    }
}

/// Expands a leading `~` in a path to the user's home directory.
///
/// Covers `--pipe=~/x`, where the shell does not expand the tilde.
pub fn expand_tilde<P: AsRef<Path>>(path: P) -> PathBuf {
    let path = path.as_ref();
    if let Ok(stripped) = path.strip_prefix("~")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(stripped);
    }
    path.to_path_buf()
}

//! Binary presence and host identity lookups.

use tracing::debug;

/// Whether `name` resolves to an executable on `PATH`.
///
/// Lookup failure of any kind means "not installed".
pub fn binary_installed(name: &str) -> bool {
    match which::which(name) {
        Ok(path) => {
            debug!(binary = name, path = %path.display(), "binary found");
            true
        }
        Err(e) => {
            debug!(binary = name, error = %e, "binary not found");
            false
        }
    }
}

/// The machine's hostname, or an empty string if it cannot be read.
pub fn machine_hostname() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_default()
}

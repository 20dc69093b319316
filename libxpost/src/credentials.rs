//! Access token loading
//!
//! The target service token lives in a plain file holding a single bearer
//! token. It is read once at startup and kept in a [`SecretString`] so it is
//! zeroed on drop and never shows up in `Debug` output.

use secrecy::SecretString;
use std::path::Path;
use tracing::warn;

use crate::error::{PlatformError, Result};

/// Read the bearer token stored at `path`
///
/// The path may start with `~` or contain environment variables. Surrounding
/// whitespace is trimmed.
///
/// # Errors
///
/// Returns `PlatformError::Authentication` if the file is missing, is a
/// symlink, cannot be read, or holds only whitespace.
pub fn read_token(path: &str) -> Result<SecretString> {
    let expanded = shellexpand::full(path).map_err(|e| {
        PlatformError::Authentication(format!("Failed to expand token file path: {}", e))
    })?;
    let token_path = Path::new(expanded.as_ref());

    validate_not_symlink(token_path)?;
    warn_if_world_readable(token_path);

    let token = std::fs::read_to_string(token_path)
        .map_err(|e| {
            PlatformError::Authentication(format!(
                "Failed to read token file {}: {}",
                token_path.display(),
                e
            ))
        })?
        .trim()
        .to_string();

    if token.is_empty() {
        return Err(PlatformError::Authentication(format!(
            "Token file {} is empty",
            token_path.display()
        ))
        .into());
    }

    Ok(SecretString::from(token))
}

/// Refuse to follow a symlink in place of the token file
fn validate_not_symlink(path: &Path) -> Result<()> {
    let metadata = std::fs::symlink_metadata(path).map_err(|e| {
        PlatformError::Authentication(format!(
            "Token file {} is not accessible: {}",
            path.display(),
            e
        ))
    })?;

    if metadata.is_symlink() {
        return Err(PlatformError::Authentication(format!(
            "Token file {} is a symbolic link; use a regular file",
            path.display()
        ))
        .into());
    }

    Ok(())
}

#[cfg(unix)]
fn warn_if_world_readable(path: &Path) {
    use std::os::unix::fs::PermissionsExt;

    if let Ok(metadata) = std::fs::metadata(path) {
        if metadata.permissions().mode() & 0o077 != 0 {
            warn!(
                "Token file {} is readable by other users; consider chmod 600",
                path.display()
            );
        }
    }
}

#[cfg(not(unix))]
fn warn_if_world_readable(_path: &Path) {}

//! Structural validation shared across the workspace: VM ids and secret
//! paths.

use anyhow::{bail, Result};

/// Validate a VM id: exactly 8 lowercase hex characters, the shape
/// `nanoid!(8, HEXADECIMAL_LOWERCASE)` produces.
pub fn validate_vm_id(id: &str) -> Result<()> {
    if id.len() != 8 {
        bail!("vm id '{}' must be exactly 8 characters (got {})", id, id.len());
    }
    if !id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()) {
        bail!("vm id '{}' must be lowercase hex", id);
    }
    Ok(())
}

/// Validate a secret path: case-sensitive, slash-separated, never empty,
/// never ends in `/` (listing appends `/` internally to denote a
/// directory segment, so a stored path ending in `/` would be ambiguous).
pub fn validate_secret_path(path: &str) -> Result<()> {
    if path.is_empty() {
        bail!("secret path must not be empty");
    }
    if path.ends_with('/') {
        bail!("secret path '{}' must not end in '/'", path);
    }
    if path.starts_with('/') {
        bail!("secret path '{}' must not start with '/'", path);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_vm_ids() {
        assert!(validate_vm_id("deadbeef").is_ok());
        assert!(validate_vm_id("0a0b0c0d").is_ok());
    }

    #[test]
    fn invalid_vm_ids() {
        assert!(validate_vm_id("DEADBEEF").is_err());
        assert!(validate_vm_id("deadbee").is_err());
        assert!(validate_vm_id("deadbeefz").is_err());
        assert!(validate_vm_id("not-hex!").is_err());
    }

    #[test]
    fn valid_secret_paths() {
        assert!(validate_secret_path("inferno/volumes/vol_abc/encryption-key").is_ok());
    }

    #[test]
    fn invalid_secret_paths() {
        assert!(validate_secret_path("").is_err());
        assert!(validate_secret_path("foo/").is_err());
        assert!(validate_secret_path("/foo").is_err());
    }
}

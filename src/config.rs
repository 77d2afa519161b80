//! Vault path resolution (spec §4.10 ambient concern): explicit path flag,
//! then an environment override, then the platform config directory.
//! Mirrors the corpus's `vault::ops::vault_path` precedence exactly, renamed
//! to this crate's app identity.

use std::path::{Path, PathBuf};

use crate::error::VaultError;

const VAULT_ENV: &str = "TOWERVAULT_PATH";
const APP_DIR: &str = "towervault";
const DEFAULT_VAULT_FILE: &str = "vault.twlt";

/// Resolve the vault file path: `override_path` wins outright, then
/// `$TOWERVAULT_PATH`, then `<config_dir>/towervault/vault.twlt`.
pub fn vault_path(override_path: Option<&Path>) -> Result<PathBuf, VaultError> {
    if let Some(path) = override_path {
        return Ok(path.to_path_buf());
    }

    if let Some(path) = std::env::var_os(VAULT_ENV) {
        return Ok(PathBuf::from(path));
    }

    let mut dir = dirs::config_dir().ok_or_else(|| {
        VaultError::Corrupted("no platform config directory available; pass --path explicitly".into())
    })?;
    dir.push(APP_DIR);
    dir.push(DEFAULT_VAULT_FILE);
    Ok(dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_override_wins() {
        let explicit = Path::new("/tmp/explicit.twlt");
        assert_eq!(vault_path(Some(explicit)).unwrap(), explicit);
    }

    #[test]
    fn env_var_is_used_when_no_override() {
        // SAFETY: test-only, single-threaded within this process's test harness.
        unsafe { std::env::set_var(VAULT_ENV, "/tmp/from-env.twlt") };
        let resolved = vault_path(None).unwrap();
        unsafe { std::env::remove_var(VAULT_ENV) };
        assert_eq!(resolved, PathBuf::from("/tmp/from-env.twlt"));
    }
}

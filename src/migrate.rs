//! One-shot V1 → V2 migration (spec §4.9). Requires the caller to already
//! hold an authenticated V1 session (password is verified once, at
//! `open_v1` time); this module only builds the V2 header and commits it.
//!
//! Per Open Question 1 (spec §9), a fresh DEK is generated rather than
//! reusing the V1 one, so the record blob is re-encrypted under a new key
//! and nonce instead of carried over byte-identical.

use std::path::Path;

use thiserror::Error;

use crate::crypto::{self, CryptoError, AEAD_NONCE_LEN, KDF_SALT_LEN, TOKEN_RESPONSE_SHA1_LEN};
use crate::format::atomic::{self, AtomicWriteError};
use crate::format::v2::{self, FormatV2Error, HeaderV2};
use crate::policy::VaultSecurityPolicy;
use crate::secure::SecureKey;
use crate::slots::{self, SlotError};

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("invalid administrator username: {0}")]
    InvalidAdminUsername(String),
    #[error("proposed policy is invalid: {0}")]
    PolicyInvalid(String),
    #[error("could not set up the new administrator slot: {0}")]
    AdminSetup(String),
    #[error("failed to back up the v1 vault file before migrating")]
    BackupFailed,
    #[error("failed to write the migrated v2 vault file")]
    WriteFailed,
    #[error(transparent)]
    Slot(#[from] SlotError),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error(transparent)]
    Format(#[from] FormatV2Error),
}

impl From<AtomicWriteError> for MigrationError {
    fn from(err: AtomicWriteError) -> Self {
        match err {
            AtomicWriteError::BackupFailed => MigrationError::BackupFailed,
            AtomicWriteError::Io(_) => MigrationError::WriteFailed,
        }
    }
}

pub struct MigrationOutcome {
    pub dek: SecureKey<32>,
    pub header: HeaderV2,
}

/// Build a fresh V2 vault at `vault_path`, backing up the bytes currently
/// there to `<vault_path>.v1.backup` before the atomic rename (spec §4.9
/// steps 2 and 4, reusing the same backup-then-temp-then-rename primitive
/// V2 saves use, just with a different backup suffix).
#[allow(clippy::too_many_arguments)]
pub fn migrate_v1_to_v2(
    vault_path: &Path,
    record_plaintext: &[u8],
    admin_username: &str,
    admin_password: &str,
    policy: VaultSecurityPolicy,
    token_response: Option<&[u8; TOKEN_RESPONSE_SHA1_LEN]>,
    now: i64,
) -> Result<MigrationOutcome, MigrationError> {
    if !(3..=32).contains(&admin_username.len()) {
        return Err(MigrationError::InvalidAdminUsername(admin_username.to_string()));
    }
    policy.validate().map_err(|e| MigrationError::PolicyInvalid(e.to_string()))?;

    let (slots, dek) = slots::create_initial_admin(admin_username, admin_password, &policy, token_response, now)
        .map_err(|err| match err {
            crate::error::VaultError::Slot(slot_err) => MigrationError::Slot(slot_err),
            other => MigrationError::AdminSetup(other.to_string()),
        })?;

    let body_salt = crypto::random_bytes::<{ KDF_SALT_LEN }>();
    let aead_nonce = crypto::random_bytes::<{ AEAD_NONCE_LEN }>();

    let header = HeaderV2 {
        policy: crate::format::v2::SecurityPolicy {
            require_token: policy.require_token,
            min_password_length: policy.min_password_length,
            kdf_iterations: policy.kdf_iterations,
            token_challenge: policy.token_challenge,
        },
        slots,
        body_salt,
        aead_nonce,
    };

    let ciphertext_len = (record_plaintext.len() + crate::crypto::AEAD_TAG_LEN) as u64;
    let header_bytes = v2::encode_header(&header, ciphertext_len)?;
    let ciphertext = crypto::aead_encrypt(dek.expose(), &aead_nonce, &header_bytes, record_plaintext)?;

    let mut file_bytes = header_bytes;
    file_bytes.extend_from_slice(&ciphertext);

    atomic::write_bytes_atomic(vault_path, &file_bytes, ".v1.backup")?;

    Ok(MigrationOutcome { dek, header })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migration_produces_a_parseable_v2_header_and_backs_up_the_original() {
        let dir = tempfile::tempdir().unwrap();
        let vault_path = dir.path().join("vault.twlt");
        std::fs::write(&vault_path, b"pretend-v1-bytes").unwrap();

        let policy = VaultSecurityPolicy { kdf_iterations: 1_000, ..VaultSecurityPolicy::default() };
        let outcome = migrate_v1_to_v2(&vault_path, b"{}", "alice", "correcthorsebatterystaple", policy, None, 1000).unwrap();

        assert_eq!(outcome.header.slots.len(), 1);
        let backup = atomic::backup_path_for(&vault_path, ".v1.backup");
        assert_eq!(std::fs::read(&backup).unwrap(), b"pretend-v1-bytes");

        let on_disk = std::fs::read(&vault_path).unwrap();
        let parsed = v2::parse(&on_disk).unwrap();
        assert_eq!(parsed.header, outcome.header);
    }
}

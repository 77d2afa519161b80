//! Security policy and role-based authorisation (spec §4.7).
//!
//! `VaultSecurityPolicy` carries the vault-wide settings; [`check`] answers
//! the permission matrix in §4.7 for a session's role plus the
//! `must_change_password` gate, which blocks every mutation except a
//! self password change until it clears.

use thiserror::Error;

use crate::error::VaultError;
use crate::format::v2::Role;

pub const DEFAULT_MIN_PASSWORD_LENGTH: u32 = 12;
pub const DEFAULT_KDF_ITERATIONS: u32 = 100_000;
pub const MIN_KDF_ITERATIONS: u32 = 100_000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PolicyError {
    #[error("minimum password length must be at least 1, got {0}")]
    MinPasswordLengthTooLow(u32),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultSecurityPolicy {
    pub require_token: bool,
    pub min_password_length: u32,
    pub kdf_iterations: u32,
    pub token_challenge: Option<[u8; crate::crypto::TOKEN_CHALLENGE_LEN]>,
}

impl Default for VaultSecurityPolicy {
    fn default() -> Self {
        Self {
            require_token: false,
            min_password_length: DEFAULT_MIN_PASSWORD_LENGTH,
            kdf_iterations: DEFAULT_KDF_ITERATIONS,
            token_challenge: None,
        }
    }
}

impl VaultSecurityPolicy {
    pub fn validate(&self) -> Result<(), PolicyError> {
        if self.min_password_length == 0 {
            return Err(PolicyError::MinPasswordLengthTooLow(self.min_password_length));
        }
        Ok(())
    }

    /// Iteration counts below the floor are bumped up at load time rather
    /// than rejected, so a vault written under an older, laxer policy still
    /// opens — just with stronger KDF work from then on (spec §3).
    pub fn clamp_iterations(&mut self) {
        if self.kdf_iterations < MIN_KDF_ITERATIONS {
            self.kdf_iterations = MIN_KDF_ITERATIONS;
        }
    }
}

/// The operations gated by role in the §4.7 matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    ReadOwnAccounts,
    ReadAdminOnlyAccounts,
    ModifyAccount { admin_only: bool },
    DeleteAdminOnlyDeleteRecord,
    AddOrRemoveUser,
    ResetOtherPassword,
    ChangeOwnPassword,
    ChangePolicy,
    ExportPlaintext,
}

/// Answer the permission matrix for `role` attempting `op`. Does not take
/// `must_change_password` into account; see [`check_with_gate`].
pub fn check(role: Role, op: Operation) -> Result<(), VaultError> {
    let allowed = match (role, op) {
        (_, Operation::ReadOwnAccounts) => true,
        (Role::Administrator, Operation::ReadAdminOnlyAccounts) => true,
        (Role::Standard, Operation::ReadAdminOnlyAccounts) => false,
        (_, Operation::ModifyAccount { admin_only }) => role == Role::Administrator || !admin_only,
        (Role::Administrator, Operation::DeleteAdminOnlyDeleteRecord) => true,
        (Role::Standard, Operation::DeleteAdminOnlyDeleteRecord) => false,
        (Role::Administrator, Operation::AddOrRemoveUser) => true,
        (Role::Standard, Operation::AddOrRemoveUser) => false,
        (Role::Administrator, Operation::ResetOtherPassword) => true,
        (Role::Standard, Operation::ResetOtherPassword) => false,
        (_, Operation::ChangeOwnPassword) => true,
        (Role::Administrator, Operation::ChangePolicy) => true,
        (Role::Standard, Operation::ChangePolicy) => false,
        (Role::Administrator, Operation::ExportPlaintext) => true,
        (Role::Standard, Operation::ExportPlaintext) => false,
    };

    if allowed {
        Ok(())
    } else {
        Err(VaultError::NotPermitted)
    }
}

/// Same as [`check`], but also enforces the `must_change_password` gate: no
/// mutation is allowed through except `ChangeOwnPassword` while the flag is
/// set (spec §4.7).
pub fn check_with_gate(role: Role, op: Operation, must_change_password: bool, is_mutation: bool) -> Result<(), VaultError> {
    if must_change_password && is_mutation && op != Operation::ChangeOwnPassword {
        return Err(VaultError::PasswordChangeRequired);
    }
    check(role, op)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_cannot_read_admin_only() {
        assert!(matches!(check(Role::Standard, Operation::ReadAdminOnlyAccounts), Err(VaultError::NotPermitted)));
        assert!(check(Role::Administrator, Operation::ReadAdminOnlyAccounts).is_ok());
    }

    #[test]
    fn standard_can_modify_non_admin_only_account() {
        assert!(check(Role::Standard, Operation::ModifyAccount { admin_only: false }).is_ok());
        assert!(matches!(
            check(Role::Standard, Operation::ModifyAccount { admin_only: true }),
            Err(VaultError::NotPermitted)
        ));
    }

    #[test]
    fn must_change_password_blocks_mutations_except_self_change() {
        let err = check_with_gate(Role::Administrator, Operation::ExportPlaintext, true, true).unwrap_err();
        assert!(matches!(err, VaultError::PasswordChangeRequired));
        assert!(check_with_gate(Role::Administrator, Operation::ChangeOwnPassword, true, true).is_ok());
        assert!(check_with_gate(Role::Administrator, Operation::ReadOwnAccounts, true, false).is_ok());
    }
}

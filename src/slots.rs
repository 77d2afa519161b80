//! Key-slot engine (spec §4.6): slot allocation, per-user KEK derivation,
//! DEK wrap/unwrap, and the admin/uniqueness invariants that must hold
//! after every mutation.

use thiserror::Error;

use crate::crypto::{self, AEAD_KEY_LEN, TOKEN_RESPONSE_SHA1_LEN};
use crate::error::VaultError;
use crate::format::v2::{Role, Slot, MAX_SLOTS};
use crate::policy::VaultSecurityPolicy;
use crate::secure::SecureKey;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SlotError {
    #[error("no active administrator slot remains")]
    NoActiveAdministrator,
    #[error("duplicate active username: {0}")]
    DuplicateActiveUsername(String),
    #[error("slot table is full ({MAX_SLOTS} slots already allocated)")]
    TableFull,
}

fn derive_kek(
    password: &str,
    salt: &[u8; crate::crypto::KDF_SALT_LEN],
    iterations: u32,
    token_response: Option<&[u8; TOKEN_RESPONSE_SHA1_LEN]>,
) -> Result<[u8; AEAD_KEY_LEN], VaultError> {
    let derived = crypto::kdf(password.as_bytes(), salt, iterations)?;
    let mut kek = [0u8; AEAD_KEY_LEN];
    kek.copy_from_slice(&derived);
    if let Some(response) = token_response {
        crypto::fold_token_response_into_kek(&mut kek, response);
    }
    Ok(kek)
}

fn validate_username(username: &str) -> Result<(), VaultError> {
    if !(3..=32).contains(&username.len()) {
        return Err(VaultError::InvalidUsername(username.to_string()));
    }
    Ok(())
}

fn validate_password_length(password: &str, policy: &VaultSecurityPolicy) -> Result<(), VaultError> {
    if password.len() < policy.min_password_length as usize {
        return Err(VaultError::WeakPassword);
    }
    Ok(())
}

fn active_admin_count(slots: &[Slot]) -> usize {
    slots.iter().filter(|s| s.active && s.role == Role::Administrator).count()
}

/// Enforce the two invariants the engine can check without every user's
/// password in hand: at least one active administrator, and no duplicate
/// active usernames. The third invariant — all active wrapped DEKs unwrap
/// to the same plaintext — is only verifiable with every slot's KEK, so it
/// is exercised in tests via [`debug_all_slots_unwrap_to`] rather than on
/// every production mutation (spec §4.6: "not in production hot paths").
pub fn enforce_invariants(slots: &[Slot]) -> Result<(), VaultError> {
    if active_admin_count(slots) == 0 {
        return Err(SlotError::NoActiveAdministrator.into());
    }
    let mut seen = std::collections::BTreeSet::new();
    for slot in slots.iter().filter(|s| s.active) {
        if !seen.insert(slot.username.to_ascii_lowercase()) {
            return Err(SlotError::DuplicateActiveUsername(slot.username.clone()).into());
        }
    }
    Ok(())
}

/// Build the sole administrator slot for a freshly-created vault, and
/// generate the DEK it wraps (spec §4.6 "Create vault").
pub fn create_initial_admin(
    username: &str,
    password: &str,
    policy: &VaultSecurityPolicy,
    token_response: Option<&[u8; TOKEN_RESPONSE_SHA1_LEN]>,
    now: i64,
) -> Result<(Vec<Slot>, SecureKey<32>), VaultError> {
    validate_username(username)?;
    validate_password_length(password, policy)?;

    let dek = crypto::random_bytes::<32>();
    let salt = crypto::random_bytes::<{ crypto::KDF_SALT_LEN }>();
    let kek = derive_kek(password, &salt, policy.kdf_iterations, token_response)?;
    let wrapped_dek: [u8; crypto::WRAP_OUT_LEN] = crypto::wrap(&kek, &dek)?.try_into().expect("aes-kw always emits 40 bytes for a 32-byte key");

    let slot = Slot {
        active: true,
        username: username.to_string(),
        salt,
        wrapped_dek,
        role: Role::Administrator,
        must_change_password: false,
        password_changed_at: now,
        last_login_at: 0,
    };

    let slots = vec![slot];
    enforce_invariants(&slots)?;
    Ok((slots, SecureKey::new(dek)))
}

#[derive(Debug)]
pub struct AuthResult {
    pub slot_index: usize,
    pub role: Role,
    pub must_change_password: bool,
    pub dek: SecureKey<32>,
}

/// Authenticate `username`/`password` against `slots` (spec §4.6 "Open
/// vault"). An unknown username is reported distinctly from a wrong
/// password per the step-by-step protocol in §4.6 (the blanket
/// anti-enumeration note in §7 is honoured at the password/token step,
/// where wrong-password and wrong-token truly are indistinguishable).
pub fn authenticate(
    slots: &[Slot],
    username: &str,
    password: &str,
    policy: &VaultSecurityPolicy,
    token_response: Option<&[u8; TOKEN_RESPONSE_SHA1_LEN]>,
) -> Result<AuthResult, VaultError> {
    let (slot_index, slot) = slots
        .iter()
        .enumerate()
        .find(|(_, s)| s.active && s.username == username)
        .ok_or_else(|| VaultError::UnknownUser(username.to_string()))?;

    let kek = derive_kek(password, &slot.salt, policy.kdf_iterations, token_response)?;
    let dek = crypto::unwrap(&kek, &slot.wrapped_dek).map_err(|_| VaultError::BadCredentials)?;

    let mut dek_arr = [0u8; 32];
    dek_arr.copy_from_slice(&dek);

    Ok(AuthResult {
        slot_index,
        role: slot.role,
        must_change_password: slot.must_change_password,
        dek: SecureKey::new(dek_arr),
    })
}

/// Allocate a new active slot for `username` (spec §4.6 "Add user"). The
/// caller is responsible for checking that the acting session is an
/// Administrator before calling this ([`crate::policy::check`]).
#[allow(clippy::too_many_arguments)]
pub fn add_user(
    slots: &mut Vec<Slot>,
    username: &str,
    temp_password: &str,
    role: Role,
    policy: &VaultSecurityPolicy,
    dek: &[u8; 32],
    token_response: Option<&[u8; TOKEN_RESPONSE_SHA1_LEN]>,
    now: i64,
) -> Result<(), VaultError> {
    validate_username(username)?;
    validate_password_length(temp_password, policy)?;

    if slots.iter().any(|s| s.active && s.username == username) {
        return Err(VaultError::DuplicateUsername(username.to_string()));
    }

    let salt = crypto::random_bytes::<{ crypto::KDF_SALT_LEN }>();
    let kek = derive_kek(temp_password, &salt, policy.kdf_iterations, token_response)?;
    let wrapped_dek: [u8; crypto::WRAP_OUT_LEN] =
        crypto::wrap(&kek, dek)?.try_into().expect("aes-kw always emits 40 bytes for a 32-byte key");

    let new_slot = Slot {
        active: true,
        username: username.to_string(),
        salt,
        wrapped_dek,
        role,
        must_change_password: true,
        password_changed_at: now,
        last_login_at: 0,
    };

    match slots.iter().position(|s| !s.active) {
        Some(idx) => slots[idx] = new_slot,
        None if slots.len() < MAX_SLOTS => slots.push(new_slot),
        None => return Err(SlotError::TableFull.into()),
    }

    enforce_invariants(slots)?;
    Ok(())
}

/// Deactivate `target_username`'s slot (spec §4.6 "Remove user"). Rejects
/// self-removal and removal of the sole active administrator before
/// touching the table. The caller is responsible for checking that the
/// acting session is an Administrator before calling this.
pub fn remove_user(slots: &mut [Slot], caller_username: &str, target_username: &str) -> Result<(), VaultError> {
    if caller_username == target_username {
        return Err(VaultError::CannotRemoveSelf);
    }

    let idx = slots
        .iter()
        .position(|s| s.active && s.username == target_username)
        .ok_or_else(|| VaultError::UnknownUser(target_username.to_string()))?;

    if slots[idx].role == Role::Administrator && active_admin_count(slots) == 1 {
        return Err(VaultError::CannotRemoveLastAdmin);
    }

    slots[idx] = Slot::empty();
    enforce_invariants(slots)?;
    Ok(())
}

/// Change `target_username`'s password (spec §4.6 "Change password"). When
/// the caller is changing their own password, `old_password` must be
/// supplied and must unwrap the DEK; an administrator resetting someone
/// else's password does not need to know it.
#[allow(clippy::too_many_arguments)]
pub fn change_password(
    slots: &mut [Slot],
    dek: &[u8; 32],
    caller_username: &str,
    caller_role: Role,
    target_username: &str,
    old_password: Option<&str>,
    new_password: &str,
    policy: &VaultSecurityPolicy,
    token_response: Option<&[u8; TOKEN_RESPONSE_SHA1_LEN]>,
    now: i64,
) -> Result<(), VaultError> {
    let idx = slots
        .iter()
        .position(|s| s.active && s.username == target_username)
        .ok_or_else(|| VaultError::UnknownUser(target_username.to_string()))?;

    if caller_username == target_username {
        let old_password = old_password.ok_or(VaultError::BadCredentials)?;
        let kek = derive_kek(old_password, &slots[idx].salt, policy.kdf_iterations, token_response)?;
        let unwrapped = crypto::unwrap(&kek, &slots[idx].wrapped_dek).map_err(|_| VaultError::BadCredentials)?;
        if !crypto::ct_eq(&unwrapped, dek) {
            return Err(VaultError::BadCredentials);
        }
    } else if caller_role != Role::Administrator {
        return Err(VaultError::NotPermitted);
    }

    validate_password_length(new_password, policy)?;

    let new_salt = crypto::random_bytes::<{ crypto::KDF_SALT_LEN }>();
    let new_kek = derive_kek(new_password, &new_salt, policy.kdf_iterations, token_response)?;
    let wrapped_dek: [u8; crypto::WRAP_OUT_LEN] =
        crypto::wrap(&new_kek, dek)?.try_into().expect("aes-kw always emits 40 bytes for a 32-byte key");

    slots[idx].salt = new_salt;
    slots[idx].wrapped_dek = wrapped_dek;
    slots[idx].must_change_password = false;
    slots[idx].password_changed_at = now;

    enforce_invariants(slots)?;
    Ok(())
}

/// Test-only check of invariant (c) from spec §4.6: every active slot's
/// wrapped DEK unwraps, under its own password, to the same 32 bytes.
#[cfg(test)]
pub fn debug_all_slots_unwrap_to(
    slots: &[Slot],
    policy: &VaultSecurityPolicy,
    passwords_by_username: &std::collections::BTreeMap<String, String>,
    expected_dek: &[u8; 32],
) -> bool {
    slots.iter().filter(|s| s.active).all(|slot| {
        let Some(password) = passwords_by_username.get(&slot.username) else {
            return false;
        };
        let Ok(kek) = derive_kek(password, &slot.salt, policy.kdf_iterations, None) else {
            return false;
        };
        match crypto::unwrap(&kek, &slot.wrapped_dek) {
            Ok(dek) => crypto::ct_eq(&dek, expected_dek),
            Err(_) => false,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> VaultSecurityPolicy {
        VaultSecurityPolicy { kdf_iterations: 1_000, ..VaultSecurityPolicy::default() }
    }

    #[test]
    fn create_then_authenticate_roundtrips_dek() {
        let (slots, dek) = create_initial_admin("alice", "correcthorsebatterystaple", &policy(), None, 1000).unwrap();
        let auth = authenticate(&slots, "alice", "correcthorsebatterystaple", &policy(), None).unwrap();
        assert_eq!(auth.dek.expose(), dek.expose());
        assert_eq!(auth.role, Role::Administrator);
        assert!(!auth.must_change_password);
    }

    #[test]
    fn wrong_password_is_bad_credentials_not_unknown_user() {
        let (slots, _dek) = create_initial_admin("alice", "correcthorsebatterystaple", &policy(), None, 1000).unwrap();
        let err = authenticate(&slots, "alice", "wrong-password", &policy(), None).unwrap_err();
        assert!(matches!(err, VaultError::BadCredentials));
    }

    #[test]
    fn unknown_username_is_distinguished() {
        let (slots, _dek) = create_initial_admin("alice", "correcthorsebatterystaple", &policy(), None, 1000).unwrap();
        let err = authenticate(&slots, "mallory", "whatever12345", &policy(), None).unwrap_err();
        assert!(matches!(err, VaultError::UnknownUser(_)));
    }

    #[test]
    fn add_user_then_remove_user() {
        let (mut slots, dek) = create_initial_admin("alice", "correcthorsebatterystaple", &policy(), None, 1000).unwrap();
        add_user(&mut slots, "bob", "tempPass12345", Role::Standard, &policy(), dek.expose(), None, 2000).unwrap();

        let auth = authenticate(&slots, "bob", "tempPass12345", &policy(), None).unwrap();
        assert!(auth.must_change_password);

        remove_user(&mut slots, "alice", "bob").unwrap();
        let err = authenticate(&slots, "bob", "tempPass12345", &policy(), None).unwrap_err();
        assert!(matches!(err, VaultError::UnknownUser(_)));
    }

    #[test]
    fn cannot_remove_last_admin_or_self() {
        let (mut slots, dek) = create_initial_admin("alice", "correcthorsebatterystaple", &policy(), None, 1000).unwrap();
        add_user(&mut slots, "bob", "tempPass12345", Role::Standard, &policy(), dek.expose(), None, 2000).unwrap();

        assert!(matches!(remove_user(&mut slots, "alice", "alice"), Err(VaultError::CannotRemoveSelf)));
        assert!(matches!(remove_user(&mut slots, "bob", "alice"), Err(VaultError::CannotRemoveLastAdmin)));
    }

    #[test]
    fn change_own_password_requires_old_password() {
        let (mut slots, dek) = create_initial_admin("alice", "correcthorsebatterystaple", &policy(), None, 1000).unwrap();
        let err = change_password(&mut slots, dek.expose(), "alice", Role::Administrator, "alice", None, "newPassword1234", &policy(), None, 3000).unwrap_err();
        assert!(matches!(err, VaultError::BadCredentials));

        change_password(&mut slots, dek.expose(), "alice", Role::Administrator, "alice", Some("correcthorsebatterystaple"), "newPassword1234", &policy(), None, 3000).unwrap();
        let auth = authenticate(&slots, "alice", "newPassword1234", &policy(), None).unwrap();
        assert_eq!(auth.dek.expose(), dek.expose());
    }

    #[test]
    fn admin_can_reset_other_users_password_without_old_one() {
        let (mut slots, dek) = create_initial_admin("alice", "correcthorsebatterystaple", &policy(), None, 1000).unwrap();
        add_user(&mut slots, "bob", "tempPass12345", Role::Standard, &policy(), dek.expose(), None, 2000).unwrap();

        change_password(&mut slots, dek.expose(), "alice", Role::Administrator, "bob", None, "brandNewPass123", &policy(), None, 3000).unwrap();
        let auth = authenticate(&slots, "bob", "brandNewPass123", &policy(), None).unwrap();
        assert_eq!(auth.dek.expose(), dek.expose());
    }
}

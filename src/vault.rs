//! Vault facade (spec §4.10): the public surface a caller actually drives.
//! Generalises the corpus's `vault::ops` function-per-operation style into
//! an explicit state machine (spec §3) so the session and its DEK live in
//! one place instead of being re-derived on every call the way
//! `vault_add_item_v1`/`vault_edit_item_v1`/... take a fresh password each
//! time.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use uuid::Uuid;

use crate::crypto::{self, AEAD_NONCE_LEN, KDF_SALT_LEN, TOKEN_RESPONSE_SHA1_LEN};
use crate::error::VaultError;
use crate::format::atomic;
use crate::format::fec::{self, FecTrailer};
use crate::format::v1::{self, HeaderV1};
use crate::format::v2::{self, HeaderV2, Role, SecurityPolicy as HeaderPolicy};
use crate::policy::{self, Operation, VaultSecurityPolicy};
use crate::record::{AccountRecord, Group, VaultPayload};
use crate::secure::SecureKey;
use crate::slots;

const DEFAULT_FEC_SHARD_COUNT: usize = 16;
const DEFAULT_FEC_PARITY_COUNT: usize = 4;

/// Whether a save (or the save that produced a file being opened) carries a
/// Reed-Solomon trailer over the header region (spec §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FecOptions {
    pub enabled: bool,
    pub shard_count: usize,
    pub parity_count: usize,
}

impl Default for FecOptions {
    fn default() -> Self {
        Self { enabled: false, shard_count: DEFAULT_FEC_SHARD_COUNT, parity_count: DEFAULT_FEC_PARITY_COUNT }
    }
}

/// A read-only view of a key slot, without any key material (spec §4.10
/// `list_users`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySlotView {
    pub username: String,
    pub role: Role,
    pub must_change_password: bool,
    pub password_changed_at: i64,
    pub last_login_at: i64,
}

/// The authenticated user bound to an open V2 vault (spec §3 `UserSession`).
/// Destroyed, DEK included, when the vault closes or this value drops.
#[derive(Debug)]
pub struct Session {
    pub username: String,
    pub role: Role,
    pub slot_index: usize,
    pub must_change_password: bool,
    dek: SecureKey<32>,
}

#[derive(Debug)]
enum VaultState {
    Closed,
    OpenV1 { dek: SecureKey<32> },
    OpenV2 { header: HeaderV2, session: Session },
}

/// The vault state machine (spec §3): `Closed -> OpenV1 -> Closed` or
/// `Closed -> OpenV2 -> Closed`, with `migrate_v1_to_v2` converting an
/// `OpenV1` vault in place. All mutations stage into `payload`; nothing
/// touches disk until [`Vault::save`].
#[derive(Debug)]
pub struct Vault {
    path: PathBuf,
    state: VaultState,
    payload: VaultPayload,
    fec: FecOptions,
}

fn now_unix_seconds() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs() as i64
}

fn header_policy_of(policy: &VaultSecurityPolicy) -> HeaderPolicy {
    HeaderPolicy {
        require_token: policy.require_token,
        min_password_length: policy.min_password_length,
        kdf_iterations: policy.kdf_iterations,
        token_challenge: policy.token_challenge,
    }
}

fn policy_of(header: &HeaderPolicy) -> VaultSecurityPolicy {
    let mut policy = VaultSecurityPolicy {
        require_token: header.require_token,
        min_password_length: header.min_password_length,
        kdf_iterations: header.kdf_iterations,
        token_challenge: header.token_challenge,
    };
    policy.clamp_iterations();
    policy
}

impl Vault {
    /// Create a fresh V1 (single-user, legacy) vault (spec §4.4).
    pub fn create_v1(path: &Path, password: &str) -> Result<Self, VaultError> {
        let iterations = policy::DEFAULT_KDF_ITERATIONS;
        let salt = crypto::random_bytes::<KDF_SALT_LEN>();
        let nonce = crypto::random_bytes::<AEAD_NONCE_LEN>();

        let header = HeaderV1 { iterations, salt, nonce };
        let header_bytes = v1::encode_header(&header);

        let key = crypto::kdf(password.as_bytes(), &salt, iterations)?;
        let plaintext = VaultPayload::default().encode();
        let ciphertext = crypto::aead_encrypt(&key, &nonce, &header_bytes, &plaintext)?;

        let mut file_bytes = header_bytes;
        file_bytes.extend_from_slice(&ciphertext);
        atomic::write_bytes_atomic(path, &file_bytes, ".backup")?;

        let mut key_arr = [0u8; 32];
        key_arr.copy_from_slice(&key);

        Ok(Self {
            path: path.to_path_buf(),
            state: VaultState::OpenV1 { dek: SecureKey::new(key_arr) },
            payload: VaultPayload::default(),
            fec: FecOptions::default(),
        })
    }

    /// Open an existing V1 vault (spec §4.4): supports both the full header
    /// and the pre-magic legacy layout transparently.
    pub fn open_v1(path: &Path, password: &str) -> Result<Self, VaultError> {
        let bytes = atomic::read_bytes(path)?;
        let parsed = v1::parse(&bytes)?;
        let aad = v1::aad_bytes(&bytes, &parsed);

        let key = crypto::kdf(password.as_bytes(), &parsed.header.salt, parsed.header.iterations)?;
        let plaintext = crypto::aead_decrypt(&key, &parsed.header.nonce, &aad, parsed.ciphertext)
            .map_err(|_| VaultError::BadCredentials)?;
        let payload = VaultPayload::decode(&plaintext)?;

        let mut key_arr = [0u8; 32];
        key_arr.copy_from_slice(&key);

        Ok(Self {
            path: path.to_path_buf(),
            state: VaultState::OpenV1 { dek: SecureKey::new(key_arr) },
            payload,
            fec: FecOptions::default(),
        })
    }

    /// Create a fresh V2 (multi-user) vault with a single initial
    /// Administrator (spec §4.6 "Create vault").
    pub fn create_v2(
        path: &Path,
        admin_username: &str,
        admin_password: &str,
        policy: VaultSecurityPolicy,
        token_response: Option<&[u8; TOKEN_RESPONSE_SHA1_LEN]>,
        fec: FecOptions,
    ) -> Result<Self, VaultError> {
        policy.validate().map_err(VaultError::from)?;
        let now = now_unix_seconds();

        let (slots, dek) = slots::create_initial_admin(admin_username, admin_password, &policy, token_response, now)?;

        let header = HeaderV2 {
            policy: header_policy_of(&policy),
            slots,
            body_salt: crypto::random_bytes::<KDF_SALT_LEN>(),
            aead_nonce: crypto::random_bytes::<AEAD_NONCE_LEN>(),
        };

        let payload = VaultPayload::default();
        let file_bytes = seal_v2(&header, dek.expose(), &payload, &fec)?;
        atomic::write_bytes_atomic(path, &file_bytes, ".backup")?;

        let session = Session { username: admin_username.to_string(), role: Role::Administrator, slot_index: 0, must_change_password: false, dek };

        Ok(Self { path: path.to_path_buf(), state: VaultState::OpenV2 { header, session }, payload, fec })
    }

    /// Open an existing V2 vault as `username` (spec §4.6 "Open vault").
    /// Attempts FEC recovery before giving up if the header fails its
    /// structural self-check.
    pub fn open_v2(
        path: &Path,
        username: &str,
        password: &str,
        token_response: Option<&[u8; TOKEN_RESPONSE_SHA1_LEN]>,
    ) -> Result<Self, VaultError> {
        let mut bytes = atomic::read_bytes(path)?;
        let fec_present = recover_header_if_needed(&mut bytes)?;

        let parsed = v2::parse(&bytes)?;
        let header_len = parsed.header_len;
        let header = parsed.header;
        let ciphertext_len = parsed.ciphertext.len();

        let policy = policy_of(&header.policy);
        let auth = slots::authenticate(&header.slots, username, password, &policy, token_response)?;

        let aad = &bytes[..header_len];
        let ciphertext = &bytes[header_len..header_len + ciphertext_len];
        // The slot unwrap above already proved `password` (and `token_response`) correct,
        // so a body-decrypt failure here can only mean the ciphertext itself was altered.
        let plaintext = crypto::aead_decrypt(auth.dek.expose(), &header.aead_nonce, aad, ciphertext).map_err(|_| VaultError::TagMismatch)?;
        let payload = VaultPayload::decode(&plaintext)?;

        let mut header = header;
        header.slots[auth.slot_index].last_login_at = now_unix_seconds();

        let session =
            Session { username: username.to_string(), role: auth.role, slot_index: auth.slot_index, must_change_password: auth.must_change_password, dek: auth.dek };

        let fec = FecOptions { enabled: fec_present, ..FecOptions::default() };
        Ok(Self { path: path.to_path_buf(), state: VaultState::OpenV2 { header, session }, payload, fec })
    }

    /// Convert an open V1 vault into V2 in place (spec §4.9). Consumes
    /// `self`; requires the vault to currently be in the `OpenV1` state.
    pub fn migrate_v1_to_v2(
        self,
        admin_username: &str,
        admin_password: &str,
        policy: VaultSecurityPolicy,
        token_response: Option<&[u8; TOKEN_RESPONSE_SHA1_LEN]>,
    ) -> Result<Self, VaultError> {
        let VaultState::OpenV1 { .. } = &self.state else {
            return Err(VaultError::NotOpen);
        };

        let record_plaintext = self.payload.encode();
        let now = now_unix_seconds();

        let outcome = crate::migrate::migrate_v1_to_v2(
            &self.path,
            &record_plaintext,
            admin_username,
            admin_password,
            policy,
            token_response,
            now,
        )?;

        let session =
            Session { username: admin_username.to_string(), role: Role::Administrator, slot_index: 0, must_change_password: false, dek: outcome.dek };

        Ok(Self { path: self.path, state: VaultState::OpenV2 { header: outcome.header, session }, payload: self.payload, fec: FecOptions::default() })
    }

    /// Tear down the session (DEK wiped via `Drop`) and return to `Closed`.
    pub fn close(&mut self) {
        self.state = VaultState::Closed;
        self.payload = VaultPayload::default();
    }

    fn require_session(&self) -> Result<(&HeaderV2, &Session), VaultError> {
        match &self.state {
            VaultState::OpenV2 { header, session } => Ok((header, session)),
            _ => Err(VaultError::NotOpen),
        }
    }

    fn is_visible(&self, record: &AccountRecord) -> bool {
        match &self.state {
            VaultState::OpenV2 { session, .. } => !record.admin_visible_only || session.role == Role::Administrator,
            VaultState::OpenV1 { .. } => true,
            VaultState::Closed => false,
        }
    }

    pub fn list_accounts(&self) -> Result<Vec<&AccountRecord>, VaultError> {
        if matches!(self.state, VaultState::Closed) {
            return Err(VaultError::NotOpen);
        }
        Ok(self.payload.records.iter().filter(|r| self.is_visible(r)).collect())
    }

    pub fn get_account(&self, id: Uuid) -> Result<&AccountRecord, VaultError> {
        if matches!(self.state, VaultState::Closed) {
            return Err(VaultError::NotOpen);
        }
        self.payload
            .records
            .iter()
            .find(|r| r.id == id && self.is_visible(r))
            .ok_or(VaultError::RecordNotFound(id))
    }

    /// Insert or replace a record (matched by id). Gated by the §4.7
    /// read/modify matrix and the must-change-password write lock.
    pub fn upsert_account(&mut self, mut record: AccountRecord) -> Result<(), VaultError> {
        if let VaultState::OpenV2 { session, .. } = &self.state {
            policy::check_with_gate(
                session.role,
                Operation::ModifyAccount { admin_only: record.admin_visible_only },
                session.must_change_password,
                true,
            )?;
        } else if matches!(self.state, VaultState::Closed) {
            return Err(VaultError::NotOpen);
        }

        record.modified_at = now_unix_seconds();
        match self.payload.records.iter_mut().find(|r| r.id == record.id) {
            Some(slot) => *slot = record,
            None => self.payload.records.push(record),
        }
        Ok(())
    }

    pub fn delete_account(&mut self, id: Uuid) -> Result<(), VaultError> {
        let record = self.get_account(id)?.clone();

        if let VaultState::OpenV2 { session, .. } = &self.state {
            let op = if record.admin_only_delete {
                Operation::DeleteAdminOnlyDeleteRecord
            } else {
                Operation::ModifyAccount { admin_only: record.admin_visible_only }
            };
            policy::check_with_gate(session.role, op, session.must_change_password, true)?;
        }

        self.payload.records.retain(|r| r.id != id);
        Ok(())
    }

    pub fn list_groups(&self) -> Result<&[Group], VaultError> {
        if matches!(self.state, VaultState::Closed) {
            return Err(VaultError::NotOpen);
        }
        Ok(&self.payload.groups)
    }

    /// Remove a group; rejected while it still owns any records (spec §3
    /// Group invariant: "cannot be deleted while non-empty").
    pub fn delete_group(&mut self, id: Uuid) -> Result<(), VaultError> {
        if matches!(self.state, VaultState::Closed) {
            return Err(VaultError::NotOpen);
        }
        if !self.payload.groups.iter().any(|g| g.id == id) {
            return Err(VaultError::GroupNotFound(id));
        }
        if self.payload.records.iter().any(|r| r.group_id == Some(id)) {
            return Err(VaultError::GroupNotEmpty);
        }
        self.payload.groups.retain(|g| g.id != id);
        Ok(())
    }

    pub fn list_users(&self) -> Result<Vec<KeySlotView>, VaultError> {
        let (header, _) = self.require_session()?;
        Ok(header
            .slots
            .iter()
            .filter(|s| s.active)
            .map(|s| KeySlotView {
                username: s.username.clone(),
                role: s.role,
                must_change_password: s.must_change_password,
                password_changed_at: s.password_changed_at,
                last_login_at: s.last_login_at,
            })
            .collect())
    }

    /// Add a user (spec §4.6 "Add user"); caller must be an Administrator.
    pub fn add_user(
        &mut self,
        username: &str,
        temp_password: &str,
        role: Role,
        token_response: Option<&[u8; TOKEN_RESPONSE_SHA1_LEN]>,
    ) -> Result<(), VaultError> {
        let VaultState::OpenV2 { header, session } = &mut self.state else {
            return Err(VaultError::NotOpen);
        };
        policy::check(session.role, Operation::AddOrRemoveUser)?;

        let policy = policy_of(&header.policy);
        let now = now_unix_seconds();
        slots::add_user(&mut header.slots, username, temp_password, role, &policy, session.dek.expose(), token_response, now)
    }

    /// Remove a user (spec §4.6 "Remove user"); caller must be an
    /// Administrator and cannot remove themselves or the last admin.
    pub fn remove_user(&mut self, username: &str) -> Result<(), VaultError> {
        let VaultState::OpenV2 { header, session } = &mut self.state else {
            return Err(VaultError::NotOpen);
        };
        policy::check(session.role, Operation::AddOrRemoveUser)?;
        slots::remove_user(&mut header.slots, &session.username, username)
    }

    /// Change a user's password (spec §4.6 "Change password"). `old_password`
    /// is required when the caller targets their own account and ignored
    /// (must be `None`) for an Administrator resetting someone else's.
    pub fn change_password(
        &mut self,
        target_username: &str,
        old_password: Option<&str>,
        new_password: &str,
        token_response: Option<&[u8; TOKEN_RESPONSE_SHA1_LEN]>,
    ) -> Result<(), VaultError> {
        let VaultState::OpenV2 { header, session } = &mut self.state else {
            return Err(VaultError::NotOpen);
        };

        let op = if session.username == target_username { Operation::ChangeOwnPassword } else { Operation::ResetOtherPassword };
        policy::check_with_gate(session.role, op, session.must_change_password, true)?;

        let policy = policy_of(&header.policy);
        let now = now_unix_seconds();
        slots::change_password(
            &mut header.slots,
            session.dek.expose(),
            &session.username,
            session.role,
            target_username,
            old_password,
            new_password,
            &policy,
            token_response,
            now,
        )?;

        if session.username == target_username {
            session.must_change_password = false;
        }
        Ok(())
    }

    /// Serialise, AEAD-encrypt, and atomically write the in-memory model
    /// (spec §4.10). The in-memory model and on-disk file remain consistent
    /// with each other in the pre-save state if this returns an error.
    pub fn save(&mut self) -> Result<(), VaultError> {
        match &mut self.state {
            VaultState::Closed => Err(VaultError::NotOpen),
            VaultState::OpenV1 { dek } => {
                let salt = crypto::random_bytes::<KDF_SALT_LEN>();
                let nonce = crypto::random_bytes::<AEAD_NONCE_LEN>();
                let header = HeaderV1 { iterations: policy::DEFAULT_KDF_ITERATIONS, salt, nonce };
                let header_bytes = v1::encode_header(&header);
                let plaintext = self.payload.encode();
                let ciphertext = crypto::aead_encrypt(dek.expose(), &nonce, &header_bytes, &plaintext)?;

                let mut file_bytes = header_bytes;
                file_bytes.extend_from_slice(&ciphertext);
                atomic::write_bytes_atomic(&self.path, &file_bytes, ".backup")?;
                Ok(())
            }
            VaultState::OpenV2 { header, session } => {
                header.aead_nonce = crypto::random_bytes::<AEAD_NONCE_LEN>();
                let file_bytes = seal_v2(header, session.dek.expose(), &self.payload, &self.fec)?;
                atomic::write_bytes_atomic(&self.path, &file_bytes, ".backup")?;
                Ok(())
            }
        }
    }
}

fn seal_v2(header: &HeaderV2, dek: &[u8; 32], payload: &VaultPayload, fec: &FecOptions) -> Result<Vec<u8>, VaultError> {
    let plaintext = payload.encode();
    let ciphertext_len = (plaintext.len() + crypto::AEAD_TAG_LEN) as u64;
    let header_bytes = v2::encode_header(header, ciphertext_len)?;
    let ciphertext = crypto::aead_encrypt(dek, &header.aead_nonce, &header_bytes, &plaintext)?;

    let mut file_bytes = header_bytes.clone();
    file_bytes.extend_from_slice(&ciphertext);

    if fec.enabled {
        let trailer = fec::build(&header_bytes, fec.shard_count, fec.parity_count)?;
        fec::write(&mut file_bytes, &trailer);
    }

    Ok(file_bytes)
}

/// If `bytes` parses cleanly as a V2 header, do nothing. Otherwise, if a FEC
/// trailer is present, attempt Reed-Solomon reconstruction of the protected
/// prefix in place (spec §4.5: "attempts RS reconstruction before reporting
/// corruption"). Returns whether a trailer was found (used by `open_v2` to
/// remember the vault should keep writing one).
fn recover_header_if_needed(bytes: &mut Vec<u8>) -> Result<bool, VaultError> {
    let Some(trailer) = fec::parse_from_tail(bytes)? else {
        return Ok(false);
    };

    if v2::parse(bytes).is_ok() {
        return Ok(true);
    }

    let protected_len = trailer.protected_len as usize;
    if protected_len > bytes.len() {
        return Err(VaultError::Corrupted("fec trailer claims a protected region larger than the file".into()));
    }

    let mut region = bytes[..protected_len].to_vec();
    let bad_shards = bad_shard_indices(&region, &trailer);
    fec::recover(&mut region, &trailer, &bad_shards)?;
    bytes[..protected_len].copy_from_slice(&region);

    Ok(true)
}

fn bad_shard_indices(region: &[u8], trailer: &FecTrailer) -> Vec<usize> {
    let mut indices: Vec<usize> = v2::self_check_violations(region)
        .into_iter()
        .map(|offset| fec::shard_index_for_offset(trailer, offset))
        .collect();
    indices.sort_unstable();
    indices.dedup();
    indices
}

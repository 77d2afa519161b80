//! V2 (multi-user) vault layout (spec §4.5, §6.1):
//!
//! ```text
//! [magic "TWLT" 4B][version u32 =2]
//! [policy block: require_token u8, min_password_length u32, kdf_iterations u32,
//!                token_challenge_present u8, token_challenge 64B if present]
//! [slot_count u8][slot_table: slot_count * 128B Slot]
//! [body_salt 32B][aead_nonce 12B][ciphertext_len u64][ciphertext]
//! [optional fec trailer]
//! ```
//!
//! AAD is every header byte preceding the ciphertext (magic through
//! `ciphertext_len`), the same convention used for V1.
//!
//! Each `Slot` is a fixed 128-byte record so the table can be rewritten
//! member-wise without reflowing the rest of the header:
//!
//! ```text
//! [active u8][reserved 3B][username_len u8][username 32B]
//! [salt 32B][wrapped_dek 40B][role u8][must_change_password u8]
//! [password_changed_at i64][last_login_at i64][reserved pad -> 128B]
//! ```

use thiserror::Error;

use crate::crypto::{AEAD_NONCE_LEN, KDF_SALT_LEN, WRAP_OUT_LEN};
use crate::format::MAGIC;

pub const VERSION_V2: u32 = 2;
pub const MAX_SLOTS: usize = 32;
pub const SLOT_LEN: usize = 128;
pub const USERNAME_LEN: usize = 32;
pub const TOKEN_CHALLENGE_LEN: usize = 64;

const SLOT_OFF_ACTIVE: usize = 0;
const SLOT_OFF_RESERVED: usize = 1;
const SLOT_OFF_USERNAME_LEN: usize = 4;
const SLOT_OFF_USERNAME: usize = 5;
const SLOT_OFF_SALT: usize = SLOT_OFF_USERNAME + USERNAME_LEN; // 37
const SLOT_OFF_WRAPPED_DEK: usize = SLOT_OFF_SALT + KDF_SALT_LEN; // 69
const SLOT_OFF_ROLE: usize = SLOT_OFF_WRAPPED_DEK + WRAP_OUT_LEN; // 109
const SLOT_OFF_MUST_CHANGE: usize = SLOT_OFF_ROLE + 1; // 110
const SLOT_OFF_PASSWORD_CHANGED_AT: usize = SLOT_OFF_MUST_CHANGE + 1; // 111
const SLOT_OFF_LAST_LOGIN_AT: usize = SLOT_OFF_PASSWORD_CHANGED_AT + 8; // 119

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FormatV2Error {
    #[error("file too small to contain a v2 header")]
    TooSmall,
    #[error("bad magic bytes")]
    BadMagic,
    #[error("unsupported v2 version {0}")]
    UnsupportedVersion(u32),
    #[error("slot table inconsistent: {0}")]
    SlotTableInconsistent(String),
    #[error("truncated v2 header")]
    Truncated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Administrator = 1,
    Standard = 2,
}

impl Role {
    pub fn from_byte(b: u8) -> Result<Self, FormatV2Error> {
        match b {
            1 => Ok(Role::Administrator),
            2 => Ok(Role::Standard),
            other => Err(FormatV2Error::SlotTableInconsistent(format!("bad role byte {other}"))),
        }
    }

    pub fn to_byte(self) -> u8 {
        self as u8
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityPolicy {
    pub require_token: bool,
    pub min_password_length: u32,
    pub kdf_iterations: u32,
    pub token_challenge: Option<[u8; TOKEN_CHALLENGE_LEN]>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slot {
    pub active: bool,
    pub username: String,
    pub salt: [u8; KDF_SALT_LEN],
    pub wrapped_dek: [u8; WRAP_OUT_LEN],
    pub role: Role,
    pub must_change_password: bool,
    pub password_changed_at: i64,
    pub last_login_at: i64,
}

impl Slot {
    pub fn empty() -> Self {
        Self {
            active: false,
            username: String::new(),
            salt: [0; KDF_SALT_LEN],
            wrapped_dek: [0; WRAP_OUT_LEN],
            role: Role::Standard,
            must_change_password: false,
            password_changed_at: 0,
            last_login_at: 0,
        }
    }

    fn encode(&self) -> [u8; SLOT_LEN] {
        let mut out = [0u8; SLOT_LEN];
        out[SLOT_OFF_ACTIVE] = self.active as u8;
        let uname_bytes = self.username.as_bytes();
        out[SLOT_OFF_USERNAME_LEN] = uname_bytes.len() as u8;
        out[SLOT_OFF_USERNAME..SLOT_OFF_USERNAME + uname_bytes.len()].copy_from_slice(uname_bytes);
        out[SLOT_OFF_SALT..SLOT_OFF_SALT + KDF_SALT_LEN].copy_from_slice(&self.salt);
        out[SLOT_OFF_WRAPPED_DEK..SLOT_OFF_WRAPPED_DEK + WRAP_OUT_LEN].copy_from_slice(&self.wrapped_dek);
        out[SLOT_OFF_ROLE] = self.role.to_byte();
        out[SLOT_OFF_MUST_CHANGE] = self.must_change_password as u8;
        out[SLOT_OFF_PASSWORD_CHANGED_AT..SLOT_OFF_PASSWORD_CHANGED_AT + 8]
            .copy_from_slice(&self.password_changed_at.to_le_bytes());
        out[SLOT_OFF_LAST_LOGIN_AT..SLOT_OFF_LAST_LOGIN_AT + 8]
            .copy_from_slice(&self.last_login_at.to_le_bytes());
        out
    }

    fn decode(bytes: &[u8; SLOT_LEN]) -> Result<Self, FormatV2Error> {
        let active = match bytes[SLOT_OFF_ACTIVE] {
            0 => false,
            1 => true,
            other => return Err(FormatV2Error::SlotTableInconsistent(format!("bad active byte {other}"))),
        };
        let uname_len = bytes[SLOT_OFF_USERNAME_LEN] as usize;
        if !active {
            // Inactive slots are fully zeroed; there is nothing else to decode.
            return Ok(Slot::empty());
        }
        if !(3..=USERNAME_LEN).contains(&uname_len) {
            return Err(FormatV2Error::SlotTableInconsistent(format!(
                "username length {uname_len} out of range"
            )));
        }
        let username = std::str::from_utf8(&bytes[SLOT_OFF_USERNAME..SLOT_OFF_USERNAME + uname_len])
            .map_err(|_| FormatV2Error::SlotTableInconsistent("username is not valid utf-8".into()))?
            .to_string();
        let salt: [u8; KDF_SALT_LEN] = bytes[SLOT_OFF_SALT..SLOT_OFF_SALT + KDF_SALT_LEN].try_into().unwrap();
        let wrapped_dek: [u8; WRAP_OUT_LEN] =
            bytes[SLOT_OFF_WRAPPED_DEK..SLOT_OFF_WRAPPED_DEK + WRAP_OUT_LEN].try_into().unwrap();
        let role = Role::from_byte(bytes[SLOT_OFF_ROLE])?;
        let must_change_password = match bytes[SLOT_OFF_MUST_CHANGE] {
            0 => false,
            1 => true,
            other => return Err(FormatV2Error::SlotTableInconsistent(format!("bad flag byte {other}"))),
        };
        let password_changed_at = i64::from_le_bytes(
            bytes[SLOT_OFF_PASSWORD_CHANGED_AT..SLOT_OFF_PASSWORD_CHANGED_AT + 8].try_into().unwrap(),
        );
        let last_login_at =
            i64::from_le_bytes(bytes[SLOT_OFF_LAST_LOGIN_AT..SLOT_OFF_LAST_LOGIN_AT + 8].try_into().unwrap());

        Ok(Slot {
            active,
            username,
            salt,
            wrapped_dek,
            role,
            must_change_password,
            password_changed_at,
            last_login_at,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderV2 {
    pub policy: SecurityPolicy,
    pub slots: Vec<Slot>,
    pub body_salt: [u8; KDF_SALT_LEN],
    pub aead_nonce: [u8; AEAD_NONCE_LEN],
}

#[derive(Debug)]
pub struct ParsedV2<'a> {
    pub header: HeaderV2,
    /// Byte length of everything before `ciphertext` in the source buffer —
    /// this is both the AAD and what a FEC envelope (if present) protects.
    pub header_len: usize,
    pub ciphertext: &'a [u8],
}

/// Encode the header (everything up to and including `ciphertext_len`, but
/// not the ciphertext itself or any FEC trailer).
pub fn encode_header(header: &HeaderV2, ciphertext_len: u64) -> Result<Vec<u8>, FormatV2Error> {
    if header.slots.len() > MAX_SLOTS {
        return Err(FormatV2Error::SlotTableInconsistent(format!(
            "{} slots exceeds the maximum of {MAX_SLOTS}",
            header.slots.len()
        )));
    }

    let mut out = Vec::new();
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&VERSION_V2.to_le_bytes());

    out.push(header.policy.require_token as u8);
    out.extend_from_slice(&header.policy.min_password_length.to_le_bytes());
    out.extend_from_slice(&header.policy.kdf_iterations.to_le_bytes());
    match header.policy.token_challenge {
        Some(challenge) => {
            out.push(1);
            out.extend_from_slice(&challenge);
        }
        None => out.push(0),
    }

    out.push(header.slots.len() as u8);
    for slot in &header.slots {
        out.extend_from_slice(&slot.encode());
    }

    out.extend_from_slice(&header.body_salt);
    out.extend_from_slice(&header.aead_nonce);
    out.extend_from_slice(&ciphertext_len.to_le_bytes());

    Ok(out)
}

pub fn parse(bytes: &[u8]) -> Result<ParsedV2<'_>, FormatV2Error> {
    if bytes.len() < 8 {
        return Err(FormatV2Error::TooSmall);
    }
    if &bytes[0..4] != MAGIC {
        return Err(FormatV2Error::BadMagic);
    }
    let version = u32::from_le_bytes(bytes[4..8].try_into().unwrap());
    if version != VERSION_V2 {
        return Err(FormatV2Error::UnsupportedVersion(version));
    }

    let mut cursor = 8usize;
    let require_token = read_u8(bytes, cursor)? != 0;
    cursor += 1;
    let min_password_length = read_u32(bytes, cursor)?;
    cursor += 4;
    let kdf_iterations = read_u32(bytes, cursor)?;
    cursor += 4;
    let challenge_present = read_u8(bytes, cursor)?;
    cursor += 1;
    let token_challenge = match challenge_present {
        0 => None,
        1 => {
            let challenge: [u8; TOKEN_CHALLENGE_LEN] =
                read_slice(bytes, cursor, TOKEN_CHALLENGE_LEN)?.try_into().unwrap();
            cursor += TOKEN_CHALLENGE_LEN;
            Some(challenge)
        }
        other => return Err(FormatV2Error::SlotTableInconsistent(format!("bad challenge flag {other}"))),
    };

    let slot_count = read_u8(bytes, cursor)? as usize;
    cursor += 1;
    if slot_count > MAX_SLOTS {
        return Err(FormatV2Error::SlotTableInconsistent(format!(
            "slot_count {slot_count} exceeds the maximum of {MAX_SLOTS}"
        )));
    }

    let mut slots = Vec::with_capacity(slot_count);
    let mut seen_usernames = std::collections::BTreeSet::new();
    for _ in 0..slot_count {
        let raw: [u8; SLOT_LEN] = read_slice(bytes, cursor, SLOT_LEN)?.try_into().unwrap();
        cursor += SLOT_LEN;
        let slot = Slot::decode(&raw)?;
        if slot.active {
            let key = slot.username.to_ascii_lowercase();
            if !seen_usernames.insert(key) {
                return Err(FormatV2Error::SlotTableInconsistent(format!(
                    "duplicate active username {}",
                    slot.username
                )));
            }
        }
        slots.push(slot);
    }

    let body_salt: [u8; KDF_SALT_LEN] = read_slice(bytes, cursor, KDF_SALT_LEN)?.try_into().unwrap();
    cursor += KDF_SALT_LEN;
    let aead_nonce: [u8; AEAD_NONCE_LEN] = read_slice(bytes, cursor, AEAD_NONCE_LEN)?.try_into().unwrap();
    cursor += AEAD_NONCE_LEN;
    let ciphertext_len = read_u64(bytes, cursor)?;
    cursor += 8;

    let header_len = cursor;
    let ciphertext_len = ciphertext_len as usize;
    if bytes.len() < header_len + ciphertext_len {
        return Err(FormatV2Error::Truncated);
    }

    Ok(ParsedV2 {
        header: HeaderV2 { policy: SecurityPolicy { require_token, min_password_length, kdf_iterations, token_challenge }, slots, body_salt, aead_nonce },
        header_len,
        ciphertext: &bytes[header_len..header_len + ciphertext_len],
    })
}

/// Structural sanity checks beyond what `parse` already enforces by
/// construction, used by the FEC layer to decide which shard(s) of a
/// damaged header to treat as erasures (spec §4.5: "fails a self-check").
/// Returns the byte offsets of the fields that look wrong.
pub fn self_check_violations(bytes: &[u8]) -> Vec<usize> {
    let mut violations = Vec::new();
    if bytes.len() < 4 || &bytes[0..4] != MAGIC {
        violations.push(0);
        return violations;
    }
    if bytes.len() < 8 {
        violations.push(4);
        return violations;
    }
    let version = u32::from_le_bytes(bytes[4..8].try_into().unwrap());
    if version != VERSION_V2 {
        violations.push(4);
    }

    let Some(challenge_flag_offset) = Some(8 + 1 + 4 + 4) else { return violations };
    if bytes.len() <= challenge_flag_offset {
        return violations;
    }
    let challenge_present = bytes[challenge_flag_offset];
    if challenge_present > 1 {
        violations.push(challenge_flag_offset);
    }
    let slot_table_offset = challenge_flag_offset + 1 + if challenge_present == 1 { TOKEN_CHALLENGE_LEN } else { 0 };
    if bytes.len() <= slot_table_offset {
        return violations;
    }
    let slot_count = bytes[slot_table_offset] as usize;
    if slot_count > MAX_SLOTS {
        violations.push(slot_table_offset);
        return violations;
    }

    let mut cursor = slot_table_offset + 1;
    for _ in 0..slot_count {
        if bytes.len() < cursor + SLOT_LEN {
            violations.push(cursor);
            break;
        }
        let slot = &bytes[cursor..cursor + SLOT_LEN];
        if slot[SLOT_OFF_ACTIVE] > 1 {
            violations.push(cursor + SLOT_OFF_ACTIVE);
        } else if slot[SLOT_OFF_ACTIVE] == 1 {
            let uname_len = slot[SLOT_OFF_USERNAME_LEN] as usize;
            if !(3..=USERNAME_LEN).contains(&uname_len) {
                violations.push(cursor + SLOT_OFF_USERNAME_LEN);
            }
            if slot[SLOT_OFF_ROLE] != 1 && slot[SLOT_OFF_ROLE] != 2 {
                violations.push(cursor + SLOT_OFF_ROLE);
            }
            if slot[SLOT_OFF_MUST_CHANGE] > 1 {
                violations.push(cursor + SLOT_OFF_MUST_CHANGE);
            }
        }
        cursor += SLOT_LEN;
    }

    violations
}

fn read_u8(bytes: &[u8], at: usize) -> Result<u8, FormatV2Error> {
    bytes.get(at).copied().ok_or(FormatV2Error::Truncated)
}

fn read_u32(bytes: &[u8], at: usize) -> Result<u32, FormatV2Error> {
    Ok(u32::from_le_bytes(read_slice(bytes, at, 4)?.try_into().unwrap()))
}

fn read_u64(bytes: &[u8], at: usize) -> Result<u64, FormatV2Error> {
    Ok(u64::from_le_bytes(read_slice(bytes, at, 8)?.try_into().unwrap()))
}

fn read_slice(bytes: &[u8], at: usize, len: usize) -> Result<&[u8], FormatV2Error> {
    bytes.get(at..at + len).ok_or(FormatV2Error::Truncated)
}

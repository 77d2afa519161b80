//! V1 (legacy, single-user) vault layout (spec §4.4, §6.2):
//!
//! ```text
//! [magic "TWLT" 4B][version u32 =1][iterations u32][salt 32B][nonce 12B][ciphertext]
//! ```
//!
//! AAD is every header byte preceding the ciphertext, the same convention
//! §4.5 states explicitly for V2 (the bare "first 52 bytes" figure in the
//! legacy prose undercounts this exact layout by 4 bytes; we use the
//! unambiguous "whatever precedes the ciphertext" rule everywhere — see
//! DESIGN.md).
//!
//! Parsing here is fixed-offset rather than the teacher's TLV scheme
//! (`vault/format_v1.rs`); V1 has no extensible fields, it is superseded
//! wholesale by V2 rather than evolved in place.

use thiserror::Error;

use crate::crypto::{AEAD_NONCE_LEN, KDF_SALT_LEN};
use crate::format::MAGIC;

pub const VERSION_V1: u32 = 1;
pub const HEADER_LEN: usize = 4 + 4 + 4 + KDF_SALT_LEN + AEAD_NONCE_LEN; // 56

/// Legacy default used only for pre-magic files with no stored iteration
/// count (spec §4.4: "pre-magic legacy").
pub const LEGACY_ITERATIONS: u32 = 1_000;
pub const LEGACY_ZERO_SALT: [u8; KDF_SALT_LEN] = [0u8; KDF_SALT_LEN];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FormatV1Error {
    #[error("file too small to contain a v1 header")]
    TooSmall,
    #[error("bad magic bytes")]
    BadMagic,
    #[error("unsupported v1 version {0}")]
    UnsupportedVersion(u32),
    #[error("truncated v1 header")]
    Truncated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderV1 {
    pub iterations: u32,
    pub salt: [u8; KDF_SALT_LEN],
    pub nonce: [u8; AEAD_NONCE_LEN],
}

#[derive(Debug)]
pub struct ParsedV1<'a> {
    pub header: HeaderV1,
    /// True when the file predates the magic header entirely.
    pub pre_magic: bool,
    pub ciphertext: &'a [u8],
}

pub fn encode_header(header: &HeaderV1) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN);
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&VERSION_V1.to_le_bytes());
    out.extend_from_slice(&header.iterations.to_le_bytes());
    out.extend_from_slice(&header.salt);
    out.extend_from_slice(&header.nonce);
    out
}

pub fn parse(bytes: &[u8]) -> Result<ParsedV1<'_>, FormatV1Error> {
    if bytes.len() < 4 {
        return Err(FormatV1Error::TooSmall);
    }

    if &bytes[0..4] != MAGIC {
        // Pre-magic legacy file: the whole file is ciphertext, keyed with a
        // canonical zero salt and the legacy default iteration count.
        return Ok(ParsedV1 {
            header: HeaderV1 {
                iterations: LEGACY_ITERATIONS,
                salt: LEGACY_ZERO_SALT,
                nonce: legacy_nonce_from(bytes)?,
            },
            pre_magic: true,
            ciphertext: &bytes[AEAD_NONCE_LEN..],
        });
    }

    if bytes.len() < HEADER_LEN {
        return Err(FormatV1Error::Truncated);
    }

    let version = u32::from_le_bytes(bytes[4..8].try_into().unwrap());
    if version != VERSION_V1 {
        return Err(FormatV1Error::UnsupportedVersion(version));
    }

    let iterations = u32::from_le_bytes(bytes[8..12].try_into().unwrap());
    let salt: [u8; KDF_SALT_LEN] = bytes[12..12 + KDF_SALT_LEN].try_into().unwrap();
    let nonce_start = 12 + KDF_SALT_LEN;
    let nonce: [u8; AEAD_NONCE_LEN] = bytes[nonce_start..nonce_start + AEAD_NONCE_LEN].try_into().unwrap();

    Ok(ParsedV1 {
        header: HeaderV1 { iterations, salt, nonce },
        pre_magic: false,
        ciphertext: &bytes[HEADER_LEN..],
    })
}

/// Pre-magic files store a bare nonce prefix ahead of the ciphertext; there
/// is no iteration count or salt to parse, by definition of the legacy
/// format.
fn legacy_nonce_from(bytes: &[u8]) -> Result<[u8; AEAD_NONCE_LEN], FormatV1Error> {
    if bytes.len() < AEAD_NONCE_LEN {
        return Err(FormatV1Error::TooSmall);
    }
    Ok(bytes[0..AEAD_NONCE_LEN].try_into().unwrap())
}

/// AAD is everything before the ciphertext, whether the file is the full
/// magic'd header or the bare pre-magic nonce prefix.
pub fn aad_bytes(full_bytes: &[u8], parsed: &ParsedV1<'_>) -> Vec<u8> {
    let header_len = full_bytes.len() - parsed.ciphertext.len();
    full_bytes[..header_len].to_vec()
}

//! Cryptographic primitives for the vault engine (spec §4.1).
//!
//! Fixed algorithm suite, no agility beyond what's listed here:
//!
//! - AEAD: AES-256-GCM (256-bit key, 96-bit nonce, 128-bit tag)
//! - KDF: PBKDF2-HMAC-SHA-256 (256-bit salt, 256-bit output)
//! - Key wrap: AES-256 Key Wrap (RFC 3394), 256-bit KEK wraps 256-bit DEK
//! - MAC: HMAC-SHA-256
//! - Token response: HMAC-SHA-1 on device, 64-byte challenge -> 20-byte response
//! - CSPRNG: OS RNG for all salts, nonces, DEKs, IDs
//!
//! Every operation here is meant to run through a `CryptoProvider`; the
//! outward contract (these free functions) is identical whether the default
//! provider or a validated one is bound. Only the default provider is
//! implemented — callers that need a validated module can supply their own
//! `CryptoProvider` and bind it with [`set_provider`].

use std::sync::OnceLock;

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use aes_kw::KekAes256;
use hmac::{Hmac, Mac};
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use rand::rngs::OsRng;
use sha1::Sha1;
use sha2::Sha256;
use thiserror::Error;
use zeroize::Zeroizing;

pub const AEAD_KEY_LEN: usize = 32;
pub const AEAD_NONCE_LEN: usize = 12;
pub const AEAD_TAG_LEN: usize = 16;
pub const KDF_SALT_LEN: usize = 32;
pub const KDF_OUT_LEN: usize = 32;
pub const WRAP_OUT_LEN: usize = 40;
pub const HMAC_SHA256_LEN: usize = 32;
pub const TOKEN_CHALLENGE_LEN: usize = 64;
pub const TOKEN_RESPONSE_SHA1_LEN: usize = 20;

/// Bytes zeroized on drop; used for DEKs, KEKs, and password material.
pub type SecretBytes = Zeroizing<Vec<u8>>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CryptoError {
    #[error("crypto provider unavailable")]
    ProviderUnavailable,
    #[error("invalid key length")]
    InvalidKeyLength,
    #[error("invalid nonce length")]
    InvalidNonceLength,
    #[error("aead tag mismatch")]
    TagMismatch,
    #[error("key wrap integrity check failed")]
    WrongKek,
    #[error("rng failure")]
    RngFailure,
}

/// Indirection point for "validated vs default crypto provider" (spec §4.1,
/// §9). The default provider below is a thin pass-through to RustCrypto
/// crates; a validated provider (e.g. a FIPS module) would implement the
/// same trait and be installed once via [`set_provider`].
pub trait CryptoProvider: Send + Sync {
    fn aead_encrypt(
        &self,
        key: &[u8],
        nonce: &[u8],
        aad: &[u8],
        pt: &[u8],
    ) -> Result<Vec<u8>, CryptoError>;

    fn aead_decrypt(
        &self,
        key: &[u8],
        nonce: &[u8],
        aad: &[u8],
        ct: &[u8],
    ) -> Result<SecretBytes, CryptoError>;

    fn kdf(&self, password: &[u8], salt: &[u8], iterations: u32) -> Result<SecretBytes, CryptoError>;

    fn wrap(&self, kek: &[u8], dek: &[u8]) -> Result<Vec<u8>, CryptoError>;

    fn unwrap(&self, kek: &[u8], wrapped: &[u8]) -> Result<SecretBytes, CryptoError>;
}

struct DefaultProvider;

impl CryptoProvider for DefaultProvider {
    fn aead_encrypt(
        &self,
        key: &[u8],
        nonce: &[u8],
        aad: &[u8],
        pt: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        if nonce.len() != AEAD_NONCE_LEN {
            return Err(CryptoError::InvalidNonceLength);
        }
        let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::InvalidKeyLength)?;
        let nonce = Nonce::from_slice(nonce);
        cipher
            .encrypt(nonce, Payload { msg: pt, aad })
            .map_err(|_| CryptoError::TagMismatch)
    }

    fn aead_decrypt(
        &self,
        key: &[u8],
        nonce: &[u8],
        aad: &[u8],
        ct: &[u8],
    ) -> Result<SecretBytes, CryptoError> {
        if nonce.len() != AEAD_NONCE_LEN {
            return Err(CryptoError::InvalidNonceLength);
        }
        let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::InvalidKeyLength)?;
        let nonce = Nonce::from_slice(nonce);
        let pt = cipher
            .decrypt(nonce, Payload { msg: ct, aad })
            .map_err(|_| CryptoError::TagMismatch)?;
        Ok(Zeroizing::new(pt))
    }

    fn kdf(&self, password: &[u8], salt: &[u8], iterations: u32) -> Result<SecretBytes, CryptoError> {
        let mut out = vec![0u8; KDF_OUT_LEN];
        pbkdf2_hmac::<Sha256>(password, salt, iterations, &mut out);
        Ok(Zeroizing::new(out))
    }

    fn wrap(&self, kek: &[u8], dek: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let kek_arr: [u8; AEAD_KEY_LEN] = kek.try_into().map_err(|_| CryptoError::InvalidKeyLength)?;
        let kek = KekAes256::from(kek_arr);
        kek.wrap_vec(dek).map_err(|_| CryptoError::InvalidKeyLength)
    }

    fn unwrap(&self, kek: &[u8], wrapped: &[u8]) -> Result<SecretBytes, CryptoError> {
        let kek_arr: [u8; AEAD_KEY_LEN] = kek.try_into().map_err(|_| CryptoError::InvalidKeyLength)?;
        let kek = KekAes256::from(kek_arr);
        let dek = kek.unwrap_vec(wrapped).map_err(|_| CryptoError::WrongKek)?;
        Ok(Zeroizing::new(dek))
    }
}

static PROVIDER: OnceLock<Box<dyn CryptoProvider>> = OnceLock::new();

/// Bind a validated crypto provider once, process-wide. Must be called
/// before any primitive below is used if a non-default provider is desired;
/// subsequent calls are no-ops (the first binding wins), matching the
/// "process-wide initialisation step" design note in spec §9.
pub fn set_provider(provider: Box<dyn CryptoProvider>) {
    let _ = PROVIDER.set(provider);
}

fn provider() -> &'static dyn CryptoProvider {
    PROVIDER.get_or_init(|| Box::new(DefaultProvider)).as_ref()
}

/// AEAD-encrypt `pt` under `key`/`nonce` with associated data `aad`. Output
/// is `ciphertext || 16-byte tag`.
pub fn aead_encrypt(key: &[u8], nonce: &[u8], aad: &[u8], pt: &[u8]) -> Result<Vec<u8>, CryptoError> {
    provider().aead_encrypt(key, nonce, aad, pt)
}

/// AEAD-decrypt; fails with `TagMismatch` on any tamper to ciphertext, tag,
/// or `aad`.
pub fn aead_decrypt(key: &[u8], nonce: &[u8], aad: &[u8], ct: &[u8]) -> Result<SecretBytes, CryptoError> {
    provider().aead_decrypt(key, nonce, aad, ct)
}

/// Derive 32 bytes from `password` + `salt` via PBKDF2-HMAC-SHA-256.
pub fn kdf(password: &[u8], salt: &[u8], iterations: u32) -> Result<SecretBytes, CryptoError> {
    provider().kdf(password, salt, iterations)
}

/// Wrap a 256-bit DEK with a 256-bit KEK (RFC 3394) -> 40 bytes.
pub fn wrap(kek: &[u8], dek: &[u8]) -> Result<Vec<u8>, CryptoError> {
    provider().wrap(kek, dek)
}

/// Unwrap a 40-byte wrapped DEK; fails with `WrongKek` on integrity failure.
pub fn unwrap(kek: &[u8], wrapped: &[u8]) -> Result<SecretBytes, CryptoError> {
    provider().unwrap(kek, wrapped)
}

/// HMAC-SHA-256 over `msg` with `key`.
pub fn hmac_sha256(key: &[u8], msg: &[u8]) -> [u8; HMAC_SHA256_LEN] {
    let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(key).expect("hmac accepts any key length");
    mac.update(msg);
    let out = mac.finalize().into_bytes();
    let mut buf = [0u8; HMAC_SHA256_LEN];
    buf.copy_from_slice(&out);
    buf
}

/// HMAC-SHA-1 over `challenge`, the mandatory token response algorithm
/// (spec §6.4); devices compute this, the engine only verifies by comparing
/// the folded KEK it produces.
pub fn hmac_sha1(key: &[u8], challenge: &[u8]) -> [u8; TOKEN_RESPONSE_SHA1_LEN] {
    let mut mac = <Hmac<Sha1> as Mac>::new_from_slice(key).expect("hmac accepts any key length");
    mac.update(challenge);
    let out = mac.finalize().into_bytes();
    let mut buf = [0u8; TOKEN_RESPONSE_SHA1_LEN];
    buf.copy_from_slice(&out);
    buf
}

/// Generate `N` cryptographically-secure random bytes.
pub fn random_bytes<const N: usize>() -> [u8; N] {
    let mut bytes = [0u8; N];
    OsRng.fill_bytes(&mut bytes);
    bytes
}

/// Constant-time byte comparison.
pub fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

/// XOR-fold a 20-byte HMAC-SHA-1 token response into a 32-byte KEK
/// (spec §4.6 step 3): the response is repeated/truncated to 32 bytes and
/// XORed in, so token binding never changes the KEK's length.
pub fn fold_token_response_into_kek(kek: &mut [u8; AEAD_KEY_LEN], response: &[u8; TOKEN_RESPONSE_SHA1_LEN]) {
    for i in 0..AEAD_KEY_LEN {
        kek[i] ^= response[i % TOKEN_RESPONSE_SHA1_LEN];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kdf_is_deterministic_given_same_salt_and_iterations() {
        let salt = random_bytes::<KDF_SALT_LEN>();
        let a = kdf(b"hunter2", &salt, 1000).unwrap();
        let b = kdf(b"hunter2", &salt, 1000).unwrap();
        assert_eq!(a.as_slice(), b.as_slice());
    }

    #[test]
    fn wrap_unwrap_roundtrip() {
        let kek = random_bytes::<AEAD_KEY_LEN>();
        let dek = random_bytes::<32>();
        let wrapped = wrap(&kek, &dek).unwrap();
        assert_eq!(wrapped.len(), WRAP_OUT_LEN);
        let unwrapped = unwrap(&kek, &wrapped).unwrap();
        assert_eq!(unwrapped.as_slice(), &dek[..]);
    }

    #[test]
    fn unwrap_with_wrong_kek_fails() {
        let kek = random_bytes::<AEAD_KEY_LEN>();
        let other = random_bytes::<AEAD_KEY_LEN>();
        let dek = random_bytes::<32>();
        let wrapped = wrap(&kek, &dek).unwrap();
        let err = unwrap(&other, &wrapped).unwrap_err();
        assert_eq!(err, CryptoError::WrongKek);
    }

    #[test]
    fn aead_roundtrip_and_tamper_detection() {
        let key = random_bytes::<AEAD_KEY_LEN>();
        let nonce = random_bytes::<AEAD_NONCE_LEN>();
        let aad = b"header-bytes";
        let pt = b"super secret payload";

        let mut ct = aead_encrypt(&key, &nonce, aad, pt).unwrap();
        let back = aead_decrypt(&key, &nonce, aad, &ct).unwrap();
        assert_eq!(back.as_slice(), pt);

        ct[0] ^= 0x01;
        let err = aead_decrypt(&key, &nonce, aad, &ct).unwrap_err();
        assert_eq!(err, CryptoError::TagMismatch);
    }

    #[test]
    fn aead_fails_on_aad_mismatch() {
        let key = random_bytes::<AEAD_KEY_LEN>();
        let nonce = random_bytes::<AEAD_NONCE_LEN>();
        let ct = aead_encrypt(&key, &nonce, b"aad-a", b"pt").unwrap();
        let err = aead_decrypt(&key, &nonce, b"aad-b", &ct).unwrap_err();
        assert_eq!(err, CryptoError::TagMismatch);
    }

    #[test]
    fn ct_eq_matches_semantics() {
        assert!(ct_eq(b"abc", b"abc"));
        assert!(!ct_eq(b"abc", b"abd"));
        assert!(!ct_eq(b"abc", b"ab"));
    }

    #[test]
    fn token_fold_is_involution_free_but_deterministic() {
        let mut kek = [7u8; AEAD_KEY_LEN];
        let response = [3u8; TOKEN_RESPONSE_SHA1_LEN];
        let original = kek;
        fold_token_response_into_kek(&mut kek, &response);
        assert_ne!(kek, original);

        let mut kek2 = original;
        fold_token_response_into_kek(&mut kek2, &response);
        assert_eq!(kek, kek2);
    }
}

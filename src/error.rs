//! Crate-wide error taxonomy (spec §7).
//!
//! Every component has its own `thiserror` enum; this module rolls them all
//! into one `VaultError` the facade returns, mirroring how the teacher's
//! `vault::ops::VaultError` aggregates `CryptoError` / `VaultFormatError` /
//! `VaultIoError` / `PromptError` with `#[from]`.

use thiserror::Error;

use crate::crypto::CryptoError;
use crate::format::fec::FecError;
use crate::format::v1::FormatV1Error;
use crate::format::v2::FormatV2Error;
use crate::format::atomic::AtomicWriteError;
use crate::migrate::MigrationError;
use crate::policy::PolicyError;
use crate::record::RecordCodecError;
use crate::slots::SlotError;
use crate::token::TokenError;

#[derive(Debug, Error)]
pub enum VaultError {
    // --- Input ---
    #[error("username must be 3..32 bytes: {0}")]
    InvalidUsername(String),
    #[error("password does not meet the configured policy")]
    WeakPassword,
    #[error("username already active in this vault: {0}")]
    DuplicateUsername(String),
    #[error("no such user: {0}")]
    UnknownUser(String),
    #[error("cannot remove your own session's user")]
    CannotRemoveSelf,
    #[error("cannot remove the last active administrator")]
    CannotRemoveLastAdmin,
    #[error("operation not permitted for this role")]
    NotPermitted,
    #[error("password change required before further writes")]
    PasswordChangeRequired,
    #[error("vault is not open")]
    NotOpen,
    #[error("no account with id {0}")]
    RecordNotFound(uuid::Uuid),
    #[error("no group with id {0}")]
    GroupNotFound(uuid::Uuid),
    #[error("group is not empty")]
    GroupNotEmpty,

    // --- Crypto ---
    #[error("bad credentials")]
    BadCredentials,
    #[error("ciphertext failed authentication")]
    TagMismatch,
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    // --- Format ---
    #[error("bad magic bytes")]
    BadMagic,
    #[error("unsupported vault format version {0}")]
    UnsupportedVersion(u32),
    #[error("vault header or body corrupted: {0}")]
    Corrupted(String),

    // --- I/O ---
    #[error("io error at {path}: {kind:?}")]
    IoError { path: String, kind: std::io::ErrorKind },
    #[error("failed to write backup file")]
    BackupFailed,
    #[error("failed to atomically swap the vault file into place")]
    AtomicSwapFailed,

    // --- Token ---
    #[error("token device is busy with another operation")]
    Busy,
    #[error("token operation was cancelled")]
    Cancelled,
    #[error("token operation timed out")]
    Timeout,
    #[error("token device error: {0}")]
    DeviceError(String),

    // --- Migration ---
    #[error("migration failed: {0}")]
    MigrationFailed(String),

    // --- Slot engine invariants ---
    #[error(transparent)]
    Slot(#[from] SlotError),
    #[error(transparent)]
    Policy(#[from] PolicyError),
}

impl From<std::io::Error> for VaultError {
    fn from(err: std::io::Error) -> Self {
        VaultError::IoError {
            path: String::new(),
            kind: err.kind(),
        }
    }
}

impl From<FormatV1Error> for VaultError {
    fn from(err: FormatV1Error) -> Self {
        match err {
            FormatV1Error::BadMagic => VaultError::BadMagic,
            FormatV1Error::UnsupportedVersion(v) => VaultError::UnsupportedVersion(v),
            FormatV1Error::TooSmall | FormatV1Error::Truncated => {
                VaultError::Corrupted("v1 header truncated".into())
            }
        }
    }
}

impl From<FormatV2Error> for VaultError {
    fn from(err: FormatV2Error) -> Self {
        match err {
            FormatV2Error::BadMagic => VaultError::BadMagic,
            FormatV2Error::UnsupportedVersion(v) => VaultError::UnsupportedVersion(v),
            FormatV2Error::SlotTableInconsistent(detail) => {
                VaultError::Corrupted(format!("slot table inconsistent: {detail}"))
            }
            FormatV2Error::Truncated | FormatV2Error::TooSmall => {
                VaultError::Corrupted("v2 header truncated".into())
            }
        }
    }
}

impl From<FecError> for VaultError {
    fn from(err: FecError) -> Self {
        VaultError::Corrupted(format!("fec recovery failed: {err}"))
    }
}

impl From<RecordCodecError> for VaultError {
    fn from(err: RecordCodecError) -> Self {
        VaultError::Corrupted(format!("record decode failed: {err}"))
    }
}

impl From<AtomicWriteError> for VaultError {
    fn from(err: AtomicWriteError) -> Self {
        match err {
            AtomicWriteError::Io(_) => VaultError::AtomicSwapFailed,
            AtomicWriteError::BackupFailed => VaultError::BackupFailed,
        }
    }
}

impl From<MigrationError> for VaultError {
    fn from(err: MigrationError) -> Self {
        VaultError::MigrationFailed(err.to_string())
    }
}

impl From<TokenError> for VaultError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Busy => VaultError::Busy,
            TokenError::Cancelled => VaultError::Cancelled,
            TokenError::Timeout => VaultError::Timeout,
            TokenError::Device(detail) => VaultError::DeviceError(detail),
        }
    }
}

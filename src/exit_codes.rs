//! Process exit codes (spec §4.10 ambient concern). Mirrors the corpus's
//! `exit_codes::exit_code_for_vault_error` — same three buckets (usage,
//! I/O, internal), applied to `VaultError`'s larger taxonomy.

use std::process::ExitCode;

use towervault::error::VaultError;

pub const EXIT_USAGE: u8 = 64;
pub const EXIT_IO: u8 = 2;
pub const EXIT_SOFTWARE: u8 = 1;

pub fn exit_code_for_vault_error(error: &VaultError) -> ExitCode {
    use VaultError::*;

    match error {
        InvalidUsername(_)
        | WeakPassword
        | DuplicateUsername(_)
        | UnknownUser(_)
        | CannotRemoveSelf
        | CannotRemoveLastAdmin
        | NotPermitted
        | PasswordChangeRequired
        | NotOpen
        | RecordNotFound(_)
        | GroupNotFound(_)
        | GroupNotEmpty
        | BadCredentials => ExitCode::from(EXIT_USAGE),

        IoError { .. } | BackupFailed | AtomicSwapFailed => ExitCode::from(EXIT_IO),

        TagMismatch
        | Crypto(_)
        | BadMagic
        | UnsupportedVersion(_)
        | Corrupted(_)
        | Busy
        | Cancelled
        | Timeout
        | DeviceError(_)
        | MigrationFailed(_)
        | Slot(_)
        | Policy(_) => ExitCode::from(EXIT_SOFTWARE),
    }
}

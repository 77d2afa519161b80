//! End-to-end scenarios driven through the public `towervault` API, one per
//! testable property. Mirrors the corpus's `tests/vault_commands.rs` in
//! spirit — real files under a tempdir, no mocked crypto — but against the
//! library surface rather than the CLI binary, since most of these
//! scenarios need direct access to the resulting `Vault` state.

use tempfile::tempdir;
use uuid::Uuid;

use towervault::error::VaultError;
use towervault::policy::VaultSecurityPolicy;
use towervault::record::AccountRecord;
use towervault::vault::{FecOptions, Vault};

fn mail_record(now: i64) -> AccountRecord {
    let mut record = AccountRecord::new("mail", now);
    record.username = "a@b".into();
    record.password = "p".into();
    record
}

#[test]
fn create_and_reopen_yields_the_same_accounts() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("v.vault");

    let mut vault = Vault::create_v2(&path, "alice", "correcthorsebatterystaple", VaultSecurityPolicy::default(), None, FecOptions::default())
        .expect("create v2");
    vault.upsert_account(mail_record(0)).expect("add account");
    vault.save().expect("save");
    vault.close();

    let reopened = Vault::open_v2(&path, "alice", "correcthorsebatterystaple", None).expect("reopen");
    let accounts = reopened.list_accounts().expect("list accounts");
    assert_eq!(accounts.len(), 1);
    assert_eq!(accounts[0].name, "mail");
    assert_eq!(accounts[0].username, "a@b");
}

#[test]
fn wrong_password_is_rejected() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("v.vault");

    Vault::create_v2(&path, "alice", "correcthorsebatterystaple", VaultSecurityPolicy::default(), None, FecOptions::default())
        .expect("create v2");

    let result = Vault::open_v2(&path, "alice", "wrong-password", None);
    assert!(matches!(result, Err(VaultError::BadCredentials)));
}

#[test]
fn new_user_must_change_password_before_writing() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("v.vault");

    let mut admin = Vault::create_v2(&path, "alice", "correcthorsebatterystaple", VaultSecurityPolicy::default(), None, FecOptions::default())
        .expect("create v2");
    admin.add_user("bob", "tempPass12345", towervault::format::v2::Role::Standard, None).expect("add bob");
    admin.save().expect("save");

    let mut bob = Vault::open_v2(&path, "bob", "tempPass12345", None).expect("bob opens");
    assert!(matches!(bob.upsert_account(mail_record(0)), Err(VaultError::PasswordChangeRequired)));

    bob.change_password("bob", Some("tempPass12345"), "newerPass12345", None).expect("bob changes password");
    bob.upsert_account(mail_record(0)).expect("bob can now write");
}

#[test]
fn cannot_remove_the_last_administrator() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("v.vault");

    let mut admin = Vault::create_v2(&path, "alice", "correcthorsebatterystaple", VaultSecurityPolicy::default(), None, FecOptions::default())
        .expect("create v2");

    assert!(matches!(admin.remove_user("alice"), Err(VaultError::CannotRemoveLastAdmin)));
}

#[test]
fn migration_preserves_accounts_byte_identical() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("v.vault");

    let mut v1 = Vault::create_v1(&path, "vault12chars!").expect("create v1");
    let mut originals = Vec::new();
    for i in 0..5 {
        let record = mail_record(i);
        originals.push(record.clone());
        v1.upsert_account(record).expect("add account");
    }
    v1.save().expect("save v1");

    let mut v2 = v1
        .migrate_v1_to_v2("alice", "vault12chars!", VaultSecurityPolicy::default(), None)
        .expect("migrate to v2");
    v2.save().expect("save v2");

    let mut backup_path = path.clone().into_os_string();
    backup_path.push(".v1.backup");
    assert!(std::path::Path::new(&backup_path).exists(), "v1 backup retained");

    assert!(matches!(Vault::open_v1(&path, "vault12chars!"), Err(VaultError::UnsupportedVersion(_)) | Err(VaultError::BadMagic)));

    let reopened = Vault::open_v2(&path, "alice", "vault12chars!", None).expect("open migrated vault");
    let mut migrated: Vec<&AccountRecord> = reopened.list_accounts().expect("list accounts");
    migrated.sort_by_key(|r| r.created_at);
    let mut originals_sorted = originals;
    originals_sorted.sort_by_key(|r| r.created_at);

    assert_eq!(migrated.len(), originals_sorted.len());
    for (got, want) in migrated.iter().zip(originals_sorted.iter()) {
        assert_eq!(got.id, want.id);
        assert_eq!(got.name, want.name);
        assert_eq!(got.username, want.username);
        assert_eq!(got.password, want.password);
    }
}

#[test]
fn token_response_mismatch_is_rejected() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("v.vault");

    let mut policy = VaultSecurityPolicy::default();
    policy.require_token = true;

    let good_response = [7u8; towervault::crypto::TOKEN_RESPONSE_SHA1_LEN];
    let bad_response = [9u8; towervault::crypto::TOKEN_RESPONSE_SHA1_LEN];

    Vault::create_v2(&path, "alice", "correcthorsebatterystaple", policy, Some(&good_response), FecOptions::default())
        .expect("create v2 with token binding");

    let reopened = Vault::open_v2(&path, "alice", "correcthorsebatterystaple", Some(&good_response));
    assert!(reopened.is_ok());

    let mismatched = Vault::open_v2(&path, "alice", "correcthorsebatterystaple", Some(&bad_response));
    assert!(matches!(mismatched, Err(VaultError::BadCredentials)));
}

#[test]
fn flipping_a_ciphertext_byte_is_reported_as_tag_mismatch() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("v.vault");

    let mut vault = Vault::create_v2(&path, "alice", "correcthorsebatterystaple", VaultSecurityPolicy::default(), None, FecOptions::default())
        .expect("create v2");
    vault.upsert_account(mail_record(0)).expect("add account");
    vault.save().expect("save");
    vault.close();

    let mut bytes = std::fs::read(&path).expect("read vault file");
    let last = bytes.len() - 1;
    bytes[last] ^= 0xFF;
    std::fs::write(&path, &bytes).expect("write corrupted vault file");

    match Vault::open_v2(&path, "alice", "correcthorsebatterystaple", None) {
        Err(VaultError::TagMismatch) => {}
        Err(other) => panic!("expected TagMismatch, got {other}"),
        Ok(_) => panic!("expected TagMismatch, vault opened successfully"),
    }
}

#[test]
fn deleting_an_unknown_account_reports_not_found() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("v.vault");

    let mut vault = Vault::create_v2(&path, "alice", "correcthorsebatterystaple", VaultSecurityPolicy::default(), None, FecOptions::default())
        .expect("create v2");

    let missing = Uuid::new_v4();
    assert!(matches!(vault.delete_account(missing), Err(VaultError::RecordNotFound(id)) if id == missing));
}

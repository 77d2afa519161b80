//! End-to-end V1 -> V2 migration (spec §4.9, scenario S5), driven through
//! the public `towervault` API against real tempdir-backed files.

use tempfile::tempdir;

use towervault::error::VaultError;
use towervault::policy::VaultSecurityPolicy;
use towervault::record::AccountRecord;
use towervault::vault::Vault;

fn backup_path_for(vault_path: &std::path::Path) -> std::path::PathBuf {
    let mut p = vault_path.as_os_str().to_os_string();
    p.push(".v1.backup");
    std::path::PathBuf::from(p)
}

#[test]
fn migrating_five_accounts_backs_up_the_original_byte_identical() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("v.vault");

    let mut v1 = Vault::create_v1(&path, "vault12chars!").expect("create v1");
    for i in 0..5 {
        let mut record = AccountRecord::new(format!("site-{i}"), i);
        record.username = format!("user-{i}");
        record.password = format!("pass-{i}");
        v1.upsert_account(record).expect("add account");
    }
    v1.save().expect("save v1");

    let original_bytes = std::fs::read(&path).expect("read v1 file before migration");

    let mut v2 = v1
        .migrate_v1_to_v2("alice", "vault12chars!", VaultSecurityPolicy::default(), None)
        .expect("migrate to v2");
    v2.save().expect("save v2");

    let backup_bytes = std::fs::read(backup_path_for(&path)).expect("read v1 backup");
    assert_eq!(backup_bytes, original_bytes);

    match Vault::open_v1(&path, "vault12chars!") {
        Err(VaultError::UnsupportedVersion(_)) | Err(VaultError::BadMagic) => {}
        other => panic!("expected open_v1 on the migrated file to reject the v2 header, got a different outcome: {}", other.is_ok()),
    }

    let reopened = Vault::open_v2(&path, "alice", "vault12chars!", None).expect("open migrated v2 vault");
    let accounts = reopened.list_accounts().expect("list accounts");
    assert_eq!(accounts.len(), 5);
    for i in 0..5 {
        assert!(accounts.iter().any(|r| r.username == format!("user-{i}") && r.password == format!("pass-{i}")));
    }
}

#[test]
fn migration_preserves_groups_alongside_accounts() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("v.vault");

    let mut v1 = Vault::create_v1(&path, "vault12chars!").expect("create v1");
    let mut record = AccountRecord::new("site", 0);
    record.username = "user".into();
    record.password = "pass".into();
    v1.upsert_account(record).expect("add account");
    v1.save().expect("save v1");

    let mut v2 = v1
        .migrate_v1_to_v2("alice", "vault12chars!", VaultSecurityPolicy::default(), None)
        .expect("migrate to v2");
    v2.save().expect("save v2");

    let reopened = Vault::open_v2(&path, "alice", "vault12chars!", None).expect("open migrated vault");
    assert_eq!(reopened.list_accounts().expect("list accounts").len(), 1);
    assert!(reopened.list_groups().expect("list groups").is_empty());
}

#[test]
fn migration_rejects_an_invalid_admin_username_without_touching_the_file() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("v.vault");

    let v1 = Vault::create_v1(&path, "vault12chars!").expect("create v1");
    let original_bytes = std::fs::read(&path).expect("read v1 file");

    let result = v1.migrate_v1_to_v2("ab", "vault12chars!", VaultSecurityPolicy::default(), None);
    assert!(result.is_err(), "a 2-byte admin username must be rejected");

    let bytes_after = std::fs::read(&path).expect("read v1 file after failed migration");
    assert_eq!(bytes_after, original_bytes, "a rejected migration must not touch the on-disk file");
    assert!(!backup_path_for(&path).exists(), "no backup should be created for a migration that never started writing");
}

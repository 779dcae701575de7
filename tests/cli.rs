use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

const SEGMENT: &str = "000000010000000000000001";

/// Scratch config and archive directories
struct Env {
    dir: TempDir,
}

impl Env {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let config = serde_json::json!({ "archivedir": dir.path().join("archive") });
        fs::write(dir.path().join("config.json"), config.to_string()).unwrap();
        Self { dir }
    }

    fn cmd(&self) -> Command {
        let mut cmd = Command::cargo_bin("walkeeper").unwrap();
        cmd.env("WALKEEPER_CONFIG_DIR", self.dir.path())
            .env_remove("RUST_LOG")
            .env_remove("WALKEEPER_PASSPHRASE");
        cmd
    }

    fn wal_dir(&self) -> PathBuf {
        self.dir.path().join("archive").join("wal")
    }

    fn backup_dir(&self) -> PathBuf {
        self.dir.path().join("archive").join("basebackup")
    }

    fn write_wal(&self, name: &str, size: usize) -> PathBuf {
        let pg_wal = self.dir.path().join("pg_wal");
        fs::create_dir_all(&pg_wal).unwrap();
        let path = pg_wal.join(name);
        let data: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
        fs::write(&path, data).unwrap();
        path
    }

    fn add_backup(&self, day: u32, start_wal: u32) {
        let dir = self.backup_dir();
        fs::create_dir_all(&dir).unwrap();
        let name = format!("backup@2024-01-{:02}T00:00:00", day);
        fs::write(dir.join(format!("{}.tar.zst", name)), b"base backup data").unwrap();

        let metadata = serde_json::json!({
            "label": name,
            "created_at": format!("2024-01-{:02}T00:00:00Z", day),
            "start_wal": segment(start_wal),
        });
        fs::write(dir.join(format!("{}.json", name)), metadata.to_string()).unwrap();
    }

    fn add_archived_wal(&self, segments: std::ops::RangeInclusive<u32>) {
        let dir = self.wal_dir();
        fs::create_dir_all(&dir).unwrap();
        for n in segments {
            fs::write(dir.join(format!("{}.zst", segment(n))), b"compressed").unwrap();
        }
    }
}

fn segment(n: u32) -> String {
    format!("0000000100000000000000{:02X}", n)
}

fn exists(dir: &Path, name: &str) -> bool {
    dir.join(name).exists()
}

#[test]
fn test_archive_stores_compressed_segment() {
    let env = Env::new();
    let wal = env.write_wal(SEGMENT, 8192);

    env.cmd()
        .arg("archive")
        .arg(&wal)
        .assert()
        .success()
        .stdout(predicate::str::contains(format!("{}.zst", SEGMENT)));

    let stored = fs::read(env.wal_dir().join(format!("{}.zst", SEGMENT))).unwrap();
    let restored = zstd::decode_all(stored.as_slice()).unwrap();
    assert_eq!(restored, fs::read(&wal).unwrap());
}

#[test]
fn test_archive_twice_fails_and_keeps_first_copy() {
    let env = Env::new();
    let wal = env.write_wal(SEGMENT, 4096);
    let stored = env.wal_dir().join(format!("{}.zst", SEGMENT));

    env.cmd().arg("archive").arg(&wal).assert().success();
    let first = fs::read(&stored).unwrap();

    env.cmd()
        .arg("archive")
        .arg(&wal)
        .assert()
        .failure()
        .stderr(predicate::str::contains("already in archive"));
    assert_eq!(fs::read(&stored).unwrap(), first);
}

#[test]
fn test_archive_rejects_empty_wal() {
    let env = Env::new();
    let wal = env.write_wal(SEGMENT, 0);

    env.cmd()
        .arg("archive")
        .arg(&wal)
        .assert()
        .failure()
        .stderr(predicate::str::contains("too small"));
    assert!(!exists(&env.wal_dir(), &format!("{}.zst", SEGMENT)));
}

#[test]
fn test_archive_keep_going_attempts_every_file() {
    let env = Env::new();
    let empty = env.write_wal(&segment(1), 0);
    let good = env.write_wal(&segment(2), 4096);

    env.cmd()
        .arg("archive")
        .arg(&empty)
        .arg(&good)
        .assert()
        .failure();
    assert!(!exists(&env.wal_dir(), &format!("{}.zst", segment(2))));

    env.cmd()
        .args(["archive", "--keep-going"])
        .arg(&empty)
        .arg(&good)
        .assert()
        .failure();
    assert!(exists(&env.wal_dir(), &format!("{}.zst", segment(2))));
}

#[test]
fn test_archivedir_flag_overrides_config() {
    let env = Env::new();
    let wal = env.write_wal(SEGMENT, 4096);
    let elsewhere = env.dir.path().join("elsewhere");

    env.cmd()
        .arg("--archivedir")
        .arg(&elsewhere)
        .arg("archive")
        .arg(&wal)
        .assert()
        .success();
    assert!(exists(&elsewhere.join("wal"), &format!("{}.zst", SEGMENT)));
}

#[test]
fn test_cleanup_removes_old_backup_and_wal() {
    let env = Env::new();
    env.add_backup(1, 1);
    env.add_backup(2, 3);
    env.add_backup(3, 5);
    env.add_archived_wal(1..=6);

    env.cmd()
        .args(["cleanup", "--retain", "2", "--force-delete"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Removed WAL files: 2"));

    let backups = env.backup_dir();
    assert!(!exists(&backups, "backup@2024-01-01T00:00:00.tar.zst"));
    assert!(!exists(&backups, "backup@2024-01-01T00:00:00.json"));
    assert!(exists(&backups, "backup@2024-01-02T00:00:00.tar.zst"));
    assert!(exists(&backups, "backup@2024-01-03T00:00:00.tar.zst"));

    let wal = env.wal_dir();
    assert!(!exists(&wal, &format!("{}.zst", segment(1))));
    assert!(!exists(&wal, &format!("{}.zst", segment(2))));
    for n in 3..=6 {
        assert!(exists(&wal, &format!("{}.zst", segment(n))));
    }
}

#[test]
fn test_cleanup_nothing_to_delete() {
    let env = Env::new();
    env.add_backup(1, 1);
    env.add_archived_wal(1..=2);

    env.cmd()
        .args(["cleanup", "--retain", "3"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No backups will be removed!"));
    assert!(exists(&env.wal_dir(), &format!("{}.zst", segment(1))));
}

#[test]
fn test_cleanup_retain_zero_fails() {
    let env = Env::new();
    env.add_backup(1, 1);

    env.cmd()
        .args(["cleanup", "--retain", "0", "--force-delete"])
        .assert()
        .failure();
    assert!(exists(&env.backup_dir(), "backup@2024-01-01T00:00:00.tar.zst"));
}

#[test]
fn test_cleanup_requires_retain() {
    let env = Env::new();
    env.cmd().arg("cleanup").assert().failure();
}

#[test]
fn test_cleanup_declined_deletes_nothing() {
    let env = Env::new();
    env.add_backup(1, 1);
    env.add_backup(2, 3);
    env.add_archived_wal(1..=4);

    env.cmd()
        .args(["cleanup", "--retain", "1"])
        .write_stdin("no\n")
        .assert()
        .code(1)
        .stdout(predicate::str::contains("Deletion was not confirmed"));

    assert!(exists(&env.backup_dir(), "backup@2024-01-01T00:00:00.tar.zst"));
    assert!(exists(&env.wal_dir(), &format!("{}.zst", segment(1))));
}

#[test]
fn test_cleanup_confirmed_with_yes() {
    let env = Env::new();
    env.add_backup(1, 1);
    env.add_backup(2, 3);
    env.add_archived_wal(1..=4);

    env.cmd()
        .args(["cleanup", "--retain", "1"])
        .write_stdin("yes\n")
        .assert()
        .success();

    assert!(!exists(&env.backup_dir(), "backup@2024-01-01T00:00:00.tar.zst"));
    assert!(!exists(&env.wal_dir(), &format!("{}.zst", segment(2))));
    assert!(exists(&env.wal_dir(), &format!("{}.zst", segment(3))));
}

#[test]
fn test_backups_lists_catalog() {
    let env = Env::new();
    env.add_backup(1, 1);
    env.add_backup(2, 3);

    env.cmd()
        .arg("backups")
        .assert()
        .success()
        .stdout(predicate::str::contains("backup@2024-01-01T00:00:00"))
        .stdout(predicate::str::contains(segment(3)))
        .stdout(predicate::str::contains("Total: 2 backup(s), 2 sane"));
}

#[test]
fn test_config_init_writes_file() {
    let env = Env::new();
    let target = env.dir.path().join("fresh").join("config.json");
    let archivedir = env.dir.path().join("fresh-archive");

    env.cmd()
        .arg("--config")
        .arg(&target)
        .arg("--archivedir")
        .arg(&archivedir)
        .args(["config", "init"])
        .assert()
        .success();

    let written: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&target).unwrap()).unwrap();
    assert_eq!(written["archive_to"], "file");
    assert_eq!(written["max_wal_size"], 16 * 1024 * 1024);
    assert!(archivedir.join("wal").is_dir());
    assert!(archivedir.join("basebackup").is_dir());
}

//! End-to-end manifest-mode scenarios: fresh install, no-op, hash
//! mismatch with rollback, interrupted-install recovery, extras pruning
//! and manifest signing.

mod common;

use common::{md5_hex, CountingReboot, FakeFetcher, RecordingSink};
use rova_core::{
    DeletePolicy, ErrorCode, OtaConfig, OtaState, OtaUpdater, ProgressEvent, UpdateOutcome,
};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

const MANIFEST_URL: &str = "http://host/ota/versions.json";
const FILES_URL: &str = "http://host/ota/files";

struct Harness {
    dir: TempDir,
    fetcher: FakeFetcher,
    sink: RecordingSink,
    reboot: CountingReboot,
}

impl Harness {
    fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
            fetcher: FakeFetcher::default(),
            sink: RecordingSink::default(),
            reboot: CountingReboot::default(),
        }
    }

    fn dest(&self) -> &Path {
        self.dir.path()
    }

    fn config(&self) -> OtaConfig {
        OtaConfig {
            manifest_url: Some(MANIFEST_URL.into()),
            base_file_url: FILES_URL.into(),
            dest_dir: self.dest().to_path_buf(),
            retry_base_delay_ms: 1,
            ..Default::default()
        }
    }

    fn updater(&self, cfg: OtaConfig) -> OtaUpdater {
        OtaUpdater::new(cfg)
            .unwrap()
            .with_fetcher(Box::new(self.fetcher.clone()))
            .with_progress(Box::new(self.sink.clone()))
            .with_reboot(Box::new(self.reboot.clone()))
    }

    fn state(&self) -> OtaState {
        match fs::read_to_string(self.dest().join("ota_state.txt")) {
            Ok(s) => OtaState::parse(&s),
            Err(_) => OtaState::Idle,
        }
    }
}

fn manifest_json(version: &str, files: &[(&str, &str, Option<&str>)]) -> Vec<u8> {
    let mut file_map = serde_json::Map::new();
    for (path, file_version, md5) in files {
        let mut entry = serde_json::Map::new();
        entry.insert("path".into(), (*path).into());
        entry.insert("version".into(), (*file_version).into());
        if let Some(md5) = md5 {
            entry.insert("md5".into(), (*md5).into());
        }
        file_map.insert(path.to_string(), entry.into());
    }
    serde_json::to_vec(&serde_json::json!({
        "version": version,
        "files": file_map,
    }))
    .unwrap()
}

#[test]
fn fresh_install_populates_empty_device() {
    let h = Harness::new();
    let body = b"print(1)\n";
    let manifest = manifest_json("1", &[("a.py", "v1", Some(&md5_hex(body)))]);
    h.fetcher.serve(MANIFEST_URL, &manifest);
    h.fetcher.serve(&format!("{}/a.py", FILES_URL), body);

    let mut updater = h.updater(h.config());
    let outcome = updater.check_and_perform_ota().unwrap();

    assert_eq!(outcome, UpdateOutcome::Applied);
    assert_eq!(fs::read(h.dest().join("a.py")).unwrap(), body);
    // Local manifest is byte-identical to the remote document.
    assert_eq!(fs::read(h.dest().join("versions.json")).unwrap(), manifest);
    assert_eq!(h.state(), OtaState::ConfirmPending);
    assert_eq!(h.reboot.count(), 1);
    assert_eq!(updater.last_error_code(), None);

    let names = h.sink.names();
    assert_eq!(names.first(), Some(&"update_start"));
    assert!(names.contains(&"file_update_start"));
    assert!(names.contains(&"download_attempt"));
    assert!(names.contains(&"file_update_done"));
    assert_eq!(names.last(), Some(&"update_applied"));
}

#[test]
fn no_op_when_versions_match() {
    let h = Harness::new();
    let body = b"print(1)\n";
    let manifest = manifest_json("1", &[("a.py", "v1", Some(&md5_hex(body)))]);
    h.fetcher.serve(MANIFEST_URL, &manifest);
    fs::write(h.dest().join("a.py"), body).unwrap();
    fs::write(h.dest().join("versions.json"), &manifest).unwrap();

    let mut updater = h.updater(h.config());
    let outcome = updater.check_and_perform_ota().unwrap();

    assert_eq!(outcome, UpdateOutcome::UpToDate);
    assert_eq!(h.state(), OtaState::Idle);
    assert_eq!(h.reboot.count(), 0);
    // Only the manifest itself was fetched.
    assert_eq!(h.fetcher.total_requests(), 1);
    assert_eq!(h.sink.names(), vec!["update_start"]);
}

#[test]
fn md5_mismatch_reverts_to_previous_content() {
    let h = Harness::new();
    fs::write(h.dest().join("a.py"), "old contents").unwrap();
    let manifest = manifest_json(
        "2",
        &[("a.py", "v2", Some("aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"))],
    );
    h.fetcher.serve(MANIFEST_URL, &manifest);
    h.fetcher.serve(&format!("{}/a.py", FILES_URL), b"does not hash to aaaa");

    let mut updater = h.updater(h.config());
    let err = updater.check_and_perform_ota().unwrap_err();

    assert_eq!(err.code(), ErrorCode::Md5Mismatch);
    assert_eq!(updater.last_error_code(), Some(ErrorCode::Md5Mismatch));
    // download_retries=1 means two verification attempts were made.
    assert_eq!(h.fetcher.request_count(&format!("{}/a.py", FILES_URL)), 2);
    assert_eq!(
        fs::read_to_string(h.dest().join("a.py")).unwrap(),
        "old contents"
    );
    assert_eq!(h.state(), OtaState::Idle);
    // Local manifest was never written.
    assert!(!h.dest().join("versions.json").exists());
    // Revert reboots so the device comes back on the restored files.
    assert_eq!(h.reboot.count(), 1);
}

#[test]
fn interrupted_install_recovers_from_backup() {
    let h = Harness::new();
    // Simulate power loss mid-install: partial destination file, intact
    // backup, state marker still at installing.
    fs::write(h.dest().join("a.py"), "partially repla").unwrap();
    fs::create_dir_all(h.dest().join("rova_backup")).unwrap();
    fs::write(h.dest().join("rova_backup/a.py"), "good old contents").unwrap();
    fs::write(h.dest().join("ota_state.txt"), "installing").unwrap();
    h.fetcher.serve(MANIFEST_URL, b"{}");

    let mut updater = h.updater(h.config());
    let outcome = updater.check_and_perform_ota().unwrap();

    assert_eq!(outcome, UpdateOutcome::RecoveredFromInterrupted);
    assert_eq!(
        fs::read_to_string(h.dest().join("a.py")).unwrap(),
        "good old contents"
    );
    assert_eq!(h.state(), OtaState::Idle);
    assert!(!h.dest().join("rova_backup").exists());
    assert_eq!(h.reboot.count(), 1);
    // No network activity this boot.
    assert_eq!(h.fetcher.total_requests(), 0);
}

#[test]
fn confirm_pending_blocks_new_checks() {
    let h = Harness::new();
    fs::write(h.dest().join("ota_state.txt"), "confirm_pending").unwrap();
    h.fetcher.serve(MANIFEST_URL, b"{}");

    let mut updater = h.updater(h.config());
    let outcome = updater.check_and_perform_ota().unwrap();

    assert_eq!(outcome, UpdateOutcome::ConfirmPending);
    assert_eq!(h.fetcher.total_requests(), 0);
    assert_eq!(h.state(), OtaState::ConfirmPending);

    // Confirming with cleanup releases the block and removes the backup.
    fs::create_dir_all(h.dest().join("rova_backup")).unwrap();
    assert!(updater.confirm_update(true));
    assert_eq!(h.state(), OtaState::Idle);
    assert!(!h.dest().join("rova_backup").exists());
}

#[test]
fn prune_with_custom_extensions_policy() {
    let h = Harness::new();
    let body = b"print('main')\n";
    let local = manifest_json("1", &[("main.py", "v1", Some(&md5_hex(body)))]);
    let remote = manifest_json("2", &[("main.py", "v1", Some(&md5_hex(body)))]);
    fs::write(h.dest().join("main.py"), body).unwrap();
    fs::write(h.dest().join("old.py"), "obsolete module").unwrap();
    fs::write(h.dest().join("data.raw"), [0u8; 32]).unwrap();
    fs::write(h.dest().join("versions.json"), &local).unwrap();
    h.fetcher.serve(MANIFEST_URL, &remote);

    let cfg = OtaConfig {
        delete_files_not_in_manifest_policy: DeletePolicy::CustomExtensions,
        delete_files_not_in_manifest_extensions: vec![".py".into()],
        ..h.config()
    };
    let mut updater = h.updater(cfg);
    let outcome = updater.check_and_perform_ota().unwrap();

    assert_eq!(outcome, UpdateOutcome::Applied);
    assert!(!h.dest().join("old.py").exists());
    // The deleted file was backed up first.
    assert_eq!(
        fs::read_to_string(h.dest().join("rova_backup/old.py")).unwrap(),
        "obsolete module"
    );
    // .raw is outside the allowlist and main.py is in the manifest.
    assert!(h.dest().join("data.raw").exists());
    assert!(h.dest().join("main.py").exists());

    let delete_events: Vec<ProgressEvent> = h
        .sink
        .events()
        .into_iter()
        .filter(|e| e.name() == "file_delete_extra")
        .collect();
    assert_eq!(delete_events.len(), 1);
    match &delete_events[0] {
        ProgressEvent::FileDeleteExtra { path, policy } => {
            assert_eq!(path, "old.py");
            assert_eq!(*policy, DeletePolicy::CustomExtensions);
        }
        other => panic!("unexpected event {:?}", other),
    }
}

#[test]
fn never_policy_deletes_nothing() {
    let h = Harness::new();
    let remote = manifest_json("2", &[("main.py", "v1", Some(&md5_hex(b"x")))]);
    fs::write(h.dest().join("stray.py"), "stray").unwrap();
    h.fetcher.serve(MANIFEST_URL, &remote);
    h.fetcher.serve(&format!("{}/main.py", FILES_URL), b"x");

    let mut updater = h.updater(h.config());
    updater.check_and_perform_ota().unwrap();
    assert!(h.dest().join("stray.py").exists());
}

#[test]
fn signed_manifest_accepted_with_matching_key() {
    let h = Harness::new();
    let body = b"print(1)\n";
    let manifest = manifest_json("1", &[("a.py", "v1", Some(&md5_hex(body)))]);
    let mut value: serde_json::Value = serde_json::from_slice(&manifest).unwrap();
    let sig = rova_core::verify::manifest_signature(&value, "signature", "hunter2").unwrap();
    value["signature"] = serde_json::Value::String(sig);
    let signed = serde_json::to_vec(&value).unwrap();

    h.fetcher.serve(MANIFEST_URL, &signed);
    h.fetcher.serve(&format!("{}/a.py", FILES_URL), body);

    let cfg = OtaConfig {
        manifest_auth_key: Some("hunter2".into()),
        ..h.config()
    };
    let mut updater = h.updater(cfg);
    assert_eq!(
        updater.check_and_perform_ota().unwrap(),
        UpdateOutcome::Applied
    );
}

#[test]
fn signed_manifest_rejected_with_wrong_key() {
    let h = Harness::new();
    let manifest = manifest_json("1", &[("a.py", "v1", None)]);
    let mut value: serde_json::Value = serde_json::from_slice(&manifest).unwrap();
    let sig = rova_core::verify::manifest_signature(&value, "signature", "key-one").unwrap();
    value["signature"] = serde_json::Value::String(sig);
    h.fetcher
        .serve(MANIFEST_URL, &serde_json::to_vec(&value).unwrap());

    let cfg = OtaConfig {
        manifest_auth_key: Some("key-two".into()),
        ..h.config()
    };
    let mut updater = h.updater(cfg);
    let err = updater.check_and_perform_ota().unwrap_err();

    assert_eq!(err.code(), ErrorCode::ManifestSignatureInvalid);
    // The apply never began: no files fetched, state untouched.
    assert_eq!(h.fetcher.total_requests(), 1);
    assert_eq!(h.state(), OtaState::Idle);
}

#[test]
fn unsigned_manifest_rejected_when_key_configured() {
    let h = Harness::new();
    h.fetcher
        .serve(MANIFEST_URL, &manifest_json("1", &[("a.py", "v1", None)]));

    let cfg = OtaConfig {
        manifest_auth_key: Some("hunter2".into()),
        ..h.config()
    };
    let mut updater = h.updater(cfg);
    let err = updater.check_and_perform_ota().unwrap_err();
    assert_eq!(err.code(), ErrorCode::ManifestSignatureInvalid);
}

#[test]
fn reapplying_same_manifest_is_a_no_op() {
    let h = Harness::new();
    let body_a = b"print('a')\n";
    let body_b = b"raw payload";
    let manifest = manifest_json(
        "7",
        &[
            ("a.py", "v7", Some(&md5_hex(body_a))),
            ("assets/b.raw", "v3", Some(&md5_hex(body_b))),
        ],
    );
    h.fetcher.serve(MANIFEST_URL, &manifest);
    h.fetcher.serve(&format!("{}/a.py", FILES_URL), body_a);
    h.fetcher.serve(&format!("{}/assets/b.raw", FILES_URL), body_b);

    let mut updater = h.updater(h.config());
    assert_eq!(
        updater.check_and_perform_ota().unwrap(),
        UpdateOutcome::Applied
    );
    assert_eq!(fs::read(h.dest().join("a.py")).unwrap(), body_a);
    assert_eq!(fs::read(h.dest().join("assets/b.raw")).unwrap(), body_b);
    assert!(updater.confirm_update(true));

    // A fresh updater against the unchanged manifest downloads nothing.
    let requests_before = h.fetcher.total_requests();
    let mut second = h.updater(h.config());
    assert_eq!(
        second.check_and_perform_ota().unwrap(),
        UpdateOutcome::UpToDate
    );
    assert_eq!(h.fetcher.total_requests(), requests_before + 1);
}

#[test]
fn manifest_fetch_failure_is_terminal_and_clean() {
    let h = Harness::new();
    h.fetcher.serve_error(MANIFEST_URL);

    let mut updater = h.updater(h.config());
    let err = updater.check_and_perform_ota().unwrap_err();

    assert_eq!(err.code(), ErrorCode::ManifestFetchFailed);
    assert_eq!(h.state(), OtaState::Idle);
    // The manifest GET itself was retried.
    assert_eq!(h.fetcher.request_count(MANIFEST_URL), 2);
}

#[test]
fn failed_download_removes_created_files_on_revert() {
    let h = Harness::new();
    let body = b"fine";
    let manifest = manifest_json(
        "1",
        &[
            ("fresh.py", "v1", Some(&md5_hex(body))),
            ("missing.py", "v1", Some(&md5_hex(b"never served"))),
        ],
    );
    h.fetcher.serve(MANIFEST_URL, &manifest);
    h.fetcher.serve(&format!("{}/fresh.py", FILES_URL), body);
    // missing.py is not served: 404 on every attempt.

    let mut updater = h.updater(h.config());
    let err = updater.check_and_perform_ota().unwrap_err();

    assert_eq!(err.code(), ErrorCode::DownloadFailed);
    // fresh.py did not exist before the attempt, so revert removed it.
    assert!(!h.dest().join("fresh.py").exists());
    assert_eq!(h.state(), OtaState::Idle);
}

#[test]
fn force_update_redownloads_matching_versions() {
    let h = Harness::new();
    let body = b"print(1)\n";
    let manifest = manifest_json("1", &[("a.py", "v1", Some(&md5_hex(body)))]);
    fs::write(h.dest().join("versions.json"), &manifest).unwrap();
    fs::write(h.dest().join("a.py"), "locally modified").unwrap();
    h.fetcher.serve(MANIFEST_URL, &manifest);
    h.fetcher.serve(&format!("{}/a.py", FILES_URL), body);

    let cfg = OtaConfig {
        force_update: true,
        ..h.config()
    };
    let mut updater = h.updater(cfg);
    assert_eq!(
        updater.check_and_perform_ota().unwrap(),
        UpdateOutcome::Applied
    );
    assert_eq!(fs::read(h.dest().join("a.py")).unwrap(), body);
}

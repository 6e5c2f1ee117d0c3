//! End-to-end tests driving the built binaries as separate processes.

use std::fs;
use std::io::Write;
use std::path::Path;
use std::process::{Command, Output, Stdio};

use engine::{
    execute_batch, first_unwritable, run_batch, ErrorKind, LauncherExecutor, Manifest,
    PrivilegedExecutor, TransferItem, TransferOptions,
};
use serde_json::Value;

const HELPER: &str = env!("CARGO_BIN_EXE_onecopy-elevated");
const FRONT_END: &str = env!("CARGO_BIN_EXE_onecopy");

fn run_helper(args: &[&str], stdin: &str) -> (Output, Value) {
    let mut child = Command::new(HELPER)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn helper");
    child
        .stdin
        .take()
        .expect("stdin")
        .write_all(stdin.as_bytes())
        .expect("write stdin");
    let output = child.wait_with_output().expect("wait helper");
    let reply = serde_json::from_slice(&output.stdout).expect("helper prints JSON");
    (output, reply)
}

fn write_tree(root: &Path) -> Vec<TransferItem> {
    let files = [("one.txt", 10usize), ("nested/two.bin", 4096), ("nested/deep/three.txt", 0)];
    files
        .iter()
        .map(|(name, len)| {
            let src = root.join("src").join(name);
            fs::create_dir_all(src.parent().expect("parent")).expect("mkdir");
            fs::write(&src, vec![b'x'; *len]).expect("write");
            TransferItem::new(src, root.join("dst").join(name))
        })
        .collect()
}

#[test]
fn helper_without_arguments_is_usage_error() {
    let (output, reply) = run_helper(&[], "");

    assert_eq!(output.status.code(), Some(2));
    assert_eq!(reply["ok"], Value::Bool(false));
    assert_eq!(reply["error"], "missing SRC/DST or --manifest");
}

#[test]
fn helper_single_form_reports_digest() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let src = temp_dir.path().join("in.txt");
    let dst = temp_dir.path().join("out.txt");
    fs::write(&src, "hello").expect("write");

    let (output, reply) = run_helper(
        &[
            src.to_str().expect("utf8"),
            dst.to_str().expect("utf8"),
            "--hash",
        ],
        "",
    );

    assert_eq!(output.status.code(), Some(0));
    assert_eq!(reply["ok"], Value::Bool(true));
    assert_eq!(reply["result"]["bytes"], 5);
    let hash = reply["result"]["hash"].as_str().expect("hash");
    assert_eq!(hash.len(), 64);
    assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    assert_eq!(fs::read_to_string(&dst).expect("read"), "hello");
}

#[test]
fn helper_reports_failure_with_exit_one() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let manifest = Manifest::batch(
        vec![TransferItem::new(
            temp_dir.path().join("missing.txt"),
            temp_dir.path().join("out.txt"),
        )],
        TransferOptions::default(),
    )
    .encode()
    .expect("encode");

    let (output, reply) = run_helper(&["--manifest"], &manifest);

    assert_eq!(output.status.code(), Some(1));
    assert_eq!(reply["ok"], Value::Bool(false));
    assert!(reply["error"].as_str().expect("error").contains("not found"));
}

#[test]
fn helper_rejects_corrupt_manifest() {
    let (output, reply) = run_helper(&["--manifest"], "{\"items\": [");

    assert_eq!(output.status.code(), Some(1));
    assert_eq!(reply["ok"], Value::Bool(false));
    assert!(reply["error"]
        .as_str()
        .expect("error")
        .starts_with("corrupt manifest"));
}

#[cfg(unix)]
#[test]
fn launcher_round_trip_matches_direct_run() {
    let direct_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let elevated_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let direct_items = write_tree(direct_dir.path());
    let elevated_items = write_tree(elevated_dir.path());
    let options = TransferOptions {
        compute_digest: true,
        ..TransferOptions::default()
    };

    let direct = run_batch(&direct_items, &options, None).expect("direct run");

    // `env` stands in for pkexec: it runs the helper without elevating
    let executor = LauncherExecutor::new("env", [HELPER]);
    let elevated = executor
        .run_batch_privileged(&Manifest::batch(elevated_items.clone(), options))
        .expect("elevated run");

    assert_eq!(elevated, direct);
    assert_eq!(elevated.item_count, 3);
    assert_eq!(elevated.total_bytes, 4106);
    for item in &elevated_items {
        assert_eq!(
            fs::read(&item.destination).expect("copy"),
            fs::read(&item.source).expect("source")
        );
    }
}

// Skips under root; the engine's procfs tests cover that case.
#[cfg(unix)]
#[test]
fn execute_batch_without_executor_reports_permission_denied() {
    use std::os::unix::fs::PermissionsExt;

    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let src = temp_dir.path().join("a.txt");
    fs::write(&src, "data").expect("write");
    let locked = temp_dir.path().join("locked");
    fs::create_dir(&locked).expect("mkdir");
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o555)).expect("lock");

    let items = vec![TransferItem::new(&src, locked.join("a.txt"))];
    let blocked = first_unwritable(&items).is_some();
    let outcome = execute_batch(&items, &TransferOptions::default(), None, None);
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).expect("unlock");

    if !blocked {
        eprintln!("skipping: this process can write read-only directories");
        return;
    }
    let err = outcome.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PermissionDenied);
    assert!(!locked.join("a.txt").exists());
}

#[test]
fn front_end_copies_directory() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    write_tree(temp_dir.path());
    let target = temp_dir.path().join("target");
    fs::create_dir(&target).expect("mkdir");

    let output = Command::new(FRONT_END)
        .arg(temp_dir.path().join("src"))
        .arg(&target)
        .arg("--no-elevate")
        .output()
        .expect("run onecopy");

    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert!(String::from_utf8_lossy(&output.stderr).contains("Copy complete. Files: 3"));
    assert_eq!(
        fs::read(target.join("src").join("nested").join("two.bin")).expect("copy"),
        vec![b'x'; 4096]
    );
}

#[test]
fn front_end_failure_exits_two() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");

    let output = Command::new(FRONT_END)
        .arg(temp_dir.path().join("missing"))
        .arg(temp_dir.path().join("out"))
        .arg("--no-elevate")
        .output()
        .expect("run onecopy");

    assert_eq!(output.status.code(), Some(2));
}

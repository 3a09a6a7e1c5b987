//! Command-line surface checks that need neither root nor network.

use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::process::Command;
use std::time::Duration;

fn boxes() -> Command {
    Command::new(env!("CARGO_BIN_EXE_boxes"))
}

#[test]
fn test_list_shows_catalog_and_defaults() {
    let out = boxes().arg("list").output().unwrap();
    assert!(out.status.success());

    let stdout = String::from_utf8_lossy(&out.stdout);
    for name in ["minimal", "busybox", "python-<version>", "java-<version>"] {
        assert!(stdout.contains(name), "missing {} in:\n{}", name, stdout);
    }
    assert!(stdout.contains("minimal busybox python-2 python-3"));
}

#[test]
fn test_unknown_box_fails_before_bootstrap() {
    let dir = tempfile::TempDir::new().unwrap();
    let out = boxes()
        .args(["build", "-p"])
        .arg(dir.path().join("never-created"))
        .arg("ruby-3")
        .output()
        .unwrap();

    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("unknown box: ruby-3"));
    assert!(!dir.path().join("never-created").exists());
}

#[test]
fn test_deps_requires_existing_chroot() {
    let dir = tempfile::TempDir::new().unwrap();
    let out = boxes()
        .args(["deps", "-p"])
        .arg(dir.path().join("missing"))
        .arg("busybox")
        .output()
        .unwrap();

    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("does not exist"));
}

#[test]
fn test_download_reports_unreachable_mirror() {
    let dir = tempfile::TempDir::new().unwrap();
    let out = boxes()
        .args(["download", "-u", "http://127.0.0.1:9/boxes/", "-d"])
        .arg(dir.path())
        .env("BOXES_HTTP_TIMEOUT", "5")
        .output()
        .unwrap();

    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("manifest"));
}

/// Stand-in for `sudo` that accepts mount/umount and answers `apt-rdepends`
/// inside `chroot` with a fixed report.
const FAKE_SUDO: &str = r#"#!/bin/sh
[ "$1" = "--" ] && shift
if [ "$1" = "chroot" ]; then shift 2; fi
if [ "$1" = "apt-rdepends" ]; then
    printf 'a\n  Depends: b\nb\n'
fi
exit 0
"#;

fn install_fake_sudo(bin: &Path) {
    std::fs::create_dir_all(bin).unwrap();
    let sudo = bin.join("sudo");
    std::fs::write(&sudo, FAKE_SUDO).unwrap();
    std::fs::set_permissions(&sudo, std::fs::Permissions::from_mode(0o755)).unwrap();

    // A child forked by another test thread may still hold the write handle
    // (ETXTBSY); once one exec succeeds the script is safe to run.
    for _ in 0..20 {
        match Command::new(&sudo).arg("true").output() {
            Err(e) if e.raw_os_error() == Some(libc::ETXTBSY) => {
                std::thread::sleep(Duration::from_millis(50))
            }
            result => {
                assert!(result.unwrap().status.success());
                return;
            }
        }
    }
    panic!("{} stayed busy", sudo.display());
}

#[test]
fn test_deps_json_stdout_is_only_json() {
    let dir = tempfile::TempDir::new().unwrap();
    let bin = dir.path().join("bin");
    let chroot = dir.path().join("chroot");
    std::fs::create_dir_all(&chroot).unwrap();
    install_fake_sudo(&bin);

    let path = match std::env::var_os("PATH") {
        Some(path) => {
            let mut dirs = vec![bin.clone()];
            dirs.extend(std::env::split_paths(&path));
            std::env::join_paths(dirs).unwrap()
        }
        None => bin.clone().into_os_string(),
    };

    let out = boxes()
        .args(["deps", "--json", "-p"])
        .arg(&chroot)
        .arg("a")
        .env("PATH", path)
        .output()
        .unwrap();

    assert!(out.status.success(), "stderr:\n{}", String::from_utf8_lossy(&out.stderr));
    let order: Vec<String> = serde_json::from_slice(&out.stdout).unwrap_or_else(|e| {
        panic!("stdout is not JSON ({}):\n{}", e, String::from_utf8_lossy(&out.stdout))
    });
    assert_eq!(order, vec!["b", "a"]);

    // The command log still reaches the user.
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("Executing:"), "stderr:\n{}", stderr);
    assert!(stderr.contains("apt-rdepends"), "stderr:\n{}", stderr);
}

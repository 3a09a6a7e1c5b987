//! Box build orchestration against a scripted system.

mod common;

use common::FakeSystem;
use sandbox_boxes::{BoxError, BoxSpec, BuildOptions, Builder};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Scratch area with an existing (already bootstrapped) chroot.
fn reused_chroot() -> (TempDir, PathBuf, PathBuf) {
    let dir = TempDir::new().unwrap();
    let chroot = dir.path().join("chroot");
    let out = dir.path().join("out");
    std::fs::create_dir(&chroot).unwrap();
    (dir, chroot, out)
}

fn script_busybox(fake: &FakeSystem) {
    fake.respond(
        &["apt-rdepends", "-p", "busybox"],
        &[
            "busybox",
            "  Depends: libc6 (>= 2.34)",
            "libc6",
            "  Depends: libgcc-s1",
            "libgcc-s1",
        ],
    );
    for (package, file) in [
        ("busybox", "busybox_1.35.0_amd64.deb"),
        ("libc6", "libc6_2.36_amd64.deb"),
        ("libgcc-s1", "libgcc-s1_12.2_amd64.deb"),
    ] {
        let uri = format!("'http://deb.example/pool/{}' {} 1000 SHA256:00", file, file);
        fake.respond(&["apt-get", "download", package], &[uri.as_str()]);
    }
}

fn logical_lines(fake: &FakeSystem) -> Vec<String> {
    fake.calls().iter().map(|c| c.logical().join(" ")).collect()
}

#[test]
fn test_build_box_in_reused_chroot() {
    let (_dir, chroot, out) = reused_chroot();
    let fake = FakeSystem::new();
    script_busybox(&fake);

    let mut builder = Builder::with_runner(
        BuildOptions {
            destination: out.clone(),
            chroot_path: Some(chroot.clone()),
            ..Default::default()
        },
        fake.runner(),
    )
    .unwrap();
    let root = builder.root().to_path_buf();
    let archive = builder.destination().join("busybox.tar.gz");

    let archives = builder.run(&[BoxSpec::parse("busybox").unwrap()]).unwrap();
    assert_eq!(archives, vec![archive.clone()]);

    let root_str = root.display().to_string();
    let expected = vec![
        format!("mount -t proc none {}/proc", root_str),
        "rm -rf /busybox".to_string(),
        "mkdir -pv /busybox".to_string(),
        "apt-get install -y --allow-unauthenticated busybox".to_string(),
        "apt-rdepends -p busybox".to_string(),
        "apt-get download libgcc-s1 --print-uris".to_string(),
        "apt-get install --reinstall -y --allow-unauthenticated -d libgcc-s1".to_string(),
        "dpkg -X /var/cache/apt/archives/libgcc-s1_12.2_amd64.deb /busybox".to_string(),
        "apt-get download libc6 --print-uris".to_string(),
        "apt-get install --reinstall -y --allow-unauthenticated -d libc6".to_string(),
        "dpkg -X /var/cache/apt/archives/libc6_2.36_amd64.deb /busybox".to_string(),
        "apt-get download busybox --print-uris".to_string(),
        "apt-get install --reinstall -y --allow-unauthenticated -d busybox".to_string(),
        "dpkg -X /var/cache/apt/archives/busybox_1.35.0_amd64.deb /busybox".to_string(),
        "mkdir -pv /busybox/proc".to_string(),
        "touch /busybox/exe".to_string(),
        "chmod +wx /busybox/exe".to_string(),
        format!("umount -R {}/proc", root_str),
        format!("tar -p -c -a -v -f {} busybox", archive.display()),
    ];
    let lines = logical_lines(&fake);
    assert_eq!(&lines[..expected.len()], &expected[..]);
    assert!(lines[expected.len()].starts_with("chown "));
    assert!(lines[expected.len()].ends_with(&format!(": {}", archive.display())));

    // Package commands ran inside the chroot, packaging on the host.
    let apt = &fake.calls_to(&["apt-rdepends"])[0];
    assert_eq!(&apt.argv[..4], ["sudo", "--", "chroot", root_str.as_str()]);
    let tar = &fake.calls_to(&["tar"])[0];
    assert_eq!(&tar.argv[..3], ["sudo", "--", "tar"]);
    assert_eq!(tar.cwd.as_deref(), Some(root.as_path()));

    // An existing chroot is never bootstrapped again.
    assert!(fake.calls_to(&["debootstrap"]).is_empty());
}

#[test]
fn test_versioned_box_directory() {
    let (_dir, chroot, out) = reused_chroot();
    let fake = FakeSystem::new();
    let mut builder = Builder::with_runner(
        BuildOptions {
            destination: out,
            chroot_path: Some(chroot),
            ..Default::default()
        },
        fake.runner(),
    )
    .unwrap();

    let archives = builder.run(&[BoxSpec::parse("python-3.7").unwrap()]).unwrap();

    assert!(archives[0].ends_with("python3_7.tar.gz"));
    let lines = logical_lines(&fake);
    assert!(lines.contains(&"mkdir -pv /python3_7".to_string()));
    assert!(lines.contains(&"apt-get install -y --allow-unauthenticated python3.7".to_string()));
    assert!(lines.contains(&"touch /python3_7/exe".to_string()));
}

#[test]
fn test_temporary_chroot_is_bootstrapped_and_removed() {
    let dir = TempDir::new().unwrap();
    let fake = FakeSystem::new();

    let mut builder = Builder::with_runner(
        BuildOptions {
            destination: dir.path().to_path_buf(),
            release: "bookworm".to_string(),
            ..Default::default()
        },
        fake.runner(),
    )
    .unwrap();
    let root = builder.root().to_path_buf();
    let workdir = root.parent().unwrap().to_path_buf();
    assert!(root.is_dir());

    builder.run(&[BoxSpec::parse("minimal").unwrap()]).unwrap();

    let lines = logical_lines(&fake);
    assert_eq!(lines[0], format!("debootstrap bookworm {}", root.display()));
    assert_eq!(lines[2], "apt-get install -y --allow-unauthenticated apt-rdepends");
    // Nothing to install for the minimal box.
    assert!(fake.calls_to(&["dpkg"]).is_empty());

    drop(builder);
    assert!(!workdir.exists());
    let chmod = fake.calls_to(&["chmod", "-R", "a+rwX"]);
    assert_eq!(chmod.len(), 1);
    assert_eq!(&chmod[0].argv[..2], ["sudo", "--"]);
}

#[test]
fn test_failed_package_step_aborts_and_unmounts() {
    let (_dir, chroot, out) = reused_chroot();
    let fake = FakeSystem::new();
    fake.fail(&["apt-get", "install", "-y"], 100);

    let mut builder = Builder::with_runner(
        BuildOptions {
            destination: out,
            chroot_path: Some(chroot),
            ..Default::default()
        },
        fake.runner(),
    )
    .unwrap();

    let err = builder
        .run(&[BoxSpec::parse("busybox").unwrap(), BoxSpec::parse("minimal").unwrap()])
        .unwrap_err();

    assert!(matches!(
        err.downcast_ref::<BoxError>(),
        Some(BoxError::CommandFailed { code: Some(100), .. })
    ));
    assert!(format!("{:#}", err).contains("busybox"));
    assert_eq!(fake.calls_to(&["umount"]).len(), 1);
    assert!(fake.calls_to(&["tar"]).is_empty());
}

#[test]
fn test_missing_download_uri_is_an_error() {
    let (_dir, chroot, out) = reused_chroot();
    let fake = FakeSystem::new();
    fake.respond(&["apt-rdepends"], &["busybox", "  Depends: libc6"]);

    let mut builder = Builder::with_runner(
        BuildOptions {
            destination: out,
            chroot_path: Some(chroot),
            ..Default::default()
        },
        fake.runner(),
    )
    .unwrap();

    let err = builder.run(&[BoxSpec::parse("busybox").unwrap()]).unwrap_err();
    assert!(format!("{:#}", err).contains("no download URI"));
}

#[test]
fn test_chroot_is_locked_while_in_use() {
    let (_dir, chroot, out) = reused_chroot();
    let options = BuildOptions {
        destination: out,
        chroot_path: Some(chroot),
        ..Default::default()
    };

    let first = Builder::with_runner(options.clone(), FakeSystem::new().runner()).unwrap();
    let second = Builder::with_runner(options.clone(), FakeSystem::new().runner());
    assert!(second.is_err());

    drop(first);
    assert!(Builder::with_runner(options, FakeSystem::new().runner()).is_ok());
}

#[test]
fn test_missing_chroot_path_is_created_and_bootstrapped() {
    let dir = TempDir::new().unwrap();
    let chroot = dir.path().join("new-chroot");
    let fake = FakeSystem::new();

    let mut builder = Builder::with_runner(
        BuildOptions {
            destination: dir.path().join("out"),
            chroot_path: Some(chroot.clone()),
            ..Default::default()
        },
        fake.runner(),
    )
    .unwrap();
    builder.run(&[]).unwrap();

    assert!(chroot.is_dir());
    assert_eq!(fake.calls_to(&["debootstrap", "stable"]).len(), 1);
    drop(builder);
    // A caller-provided chroot is kept.
    assert!(Path::new(&chroot).is_dir());
}

//! Box build orchestration
//!
//! Boxes are assembled inside a Debian chroot: the requested packages are
//! installed there so `apt-rdepends` can see their dependency tree, then every
//! package in install order is unpacked with `dpkg -X` into a fresh `/<box>`
//! directory, which is finally packed into `<destination>/<box>.tar.gz`.
//!
//! The chroot is either a throwaway temporary directory, bootstrapped with
//! `debootstrap` and removed when the builder is dropped, or an explicit path
//! that is reused across runs and locked while a build uses it.

use crate::archive;
use crate::boxes::BoxSpec;
use crate::deps::{self, REPORT_TOOL};
use crate::exec::CommandRunner;
use crate::lock::{self, ChrootLock};
use crate::output;
use anyhow::{Context, Result, bail};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Where apt keeps downloaded `.deb` files inside the chroot.
const APT_ARCHIVES: &str = "/var/cache/apt/archives";

/// Options for a build run.
#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// Directory the finished archives are written to.
    pub destination: PathBuf,
    /// Reusable chroot; a temporary one is bootstrapped when `None`.
    pub chroot_path: Option<PathBuf>,
    /// Debian release passed to `debootstrap`.
    pub release: String,
    /// Unpack each archive into the destination after building it.
    pub extract: bool,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            destination: PathBuf::from("."),
            chroot_path: None,
            release: "stable".to_string(),
            extract: false,
        }
    }
}

pub struct Builder {
    runner: CommandRunner,
    destination: PathBuf,
    root: PathBuf,
    release: String,
    extract: bool,
    prepare_chroot: bool,
    workdir: Option<TempDir>,
    _lock: Option<ChrootLock>,
}

impl Builder {
    pub fn new(options: BuildOptions) -> Result<Self> {
        Self::with_runner(options, CommandRunner::new())
    }

    /// Set up the workspace without running anything yet.
    pub fn with_runner(options: BuildOptions, runner: CommandRunner) -> Result<Self> {
        std::fs::create_dir_all(&options.destination)
            .with_context(|| format!("Failed to create {}", options.destination.display()))?;
        let destination = options
            .destination
            .canonicalize()
            .with_context(|| format!("Failed to resolve {}", options.destination.display()))?;

        let (root, prepare_chroot, workdir, lock) = match options.chroot_path {
            None => {
                let workdir = tempfile::Builder::new()
                    .prefix("sandbox-box")
                    .tempdir()
                    .context("Failed to create temporary workdir")?;
                let root = workdir.path().join("root");
                std::fs::create_dir(&root)
                    .with_context(|| format!("Failed to create {}", root.display()))?;
                output::detail(&format!("Using temporary chroot {}", root.display()));
                (root, true, Some(workdir), None)
            }
            Some(path) => {
                let prepare = !path.exists();
                if prepare {
                    std::fs::create_dir_all(&path)
                        .with_context(|| format!("Failed to create {}", path.display()))?;
                }
                let root = path
                    .canonicalize()
                    .with_context(|| format!("Failed to resolve {}", path.display()))?;
                let lock = lock::acquire_chroot_lock(&root)?;
                if !prepare {
                    output::skip(&format!("Reusing chroot {}", root.display()));
                }
                (root, prepare, None, Some(lock))
            }
        };

        Ok(Self {
            runner,
            destination,
            root,
            release: options.release,
            extract: options.extract,
            prepare_chroot,
            workdir,
            _lock: lock,
        })
    }

    /// Chroot the boxes are built in.
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    /// Build every box in order, returning the produced archive paths.
    pub fn run(&mut self, boxes: &[BoxSpec]) -> Result<Vec<PathBuf>> {
        if self.prepare_chroot {
            self.prepare_chroot()?;
            self.prepare_chroot = false;
        }

        let mut archives = Vec::with_capacity(boxes.len());
        for (i, spec) in boxes.iter().enumerate() {
            output::action_numbered(i + 1, boxes.len(), &format!("Building box {}", spec));
            let archive = self
                .build_box(spec)
                .with_context(|| format!("Failed to build box {}", spec))?;
            if self.extract {
                archive::extract(&archive, &self.destination)
                    .with_context(|| format!("Failed to extract {}", archive.display()))?;
            }
            output::success(&format!("Built {}", archive.display()));
            archives.push(archive);
        }
        Ok(archives)
    }

    fn prepare_chroot(&self) -> Result<()> {
        output::action(&format!("Bootstrapping {} into {}", self.release, self.root.display()));
        let root = self.root.to_string_lossy().into_owned();
        self.runner
            .with_elevated_privilege(|r| r.run("debootstrap", [self.release.as_str(), root.as_str()]))?;
        self.runner.with_namespace_root(&self.root, |r| {
            r.run("apt-get", ["install", "-y", "--allow-unauthenticated", REPORT_TOOL])
        })?;
        Ok(())
    }

    fn build_box(&self, spec: &BoxSpec) -> Result<PathBuf> {
        let dir_name = spec.dir_name();
        let box_dir = Path::new("/").join(&dir_name);

        self.runner.with_namespace_root(&self.root, |r| -> Result<()> {
            let box_dir_arg = box_dir.to_string_lossy().into_owned();
            r.run("rm", ["-rf", box_dir_arg.as_str()])?;
            r.run("mkdir", ["-pv", box_dir_arg.as_str()])?;

            for package in spec.packages() {
                r.run("apt-get", ["install", "-y", "--allow-unauthenticated", package.as_str()])?;
            }

            let order = deps::build_install_order(r, spec.packages())?;
            output::info(&format!("{} packages to unpack", order.len()));
            for package in &order {
                extract_package(r, package, &box_dir)
                    .with_context(|| format!("Failed to unpack {}", package))?;
            }

            spec.finalize(r, &box_dir)?;
            Ok(())
        })?;

        self.compress_box(spec)
    }

    fn compress_box(&self, spec: &BoxSpec) -> Result<PathBuf> {
        let dir_name = spec.dir_name();
        let archive = self.destination.join(spec.archive_name());
        let archive_arg = archive.to_string_lossy().into_owned();
        let owner = format!("{}:", current_user());

        self.runner.with_elevated_privilege(|r| {
            r.run_in("tar", ["-p", "-c", "-a", "-v", "-f", archive_arg.as_str(), dir_name.as_str()], &self.root)?;
            r.run("chown", [owner.as_str(), archive_arg.as_str()])
        })?;
        Ok(archive)
    }
}

/// Download one package's `.deb` inside the chroot and unpack it into `box_dir`.
fn extract_package(runner: &CommandRunner, package: &str, box_dir: &Path) -> Result<()> {
    // First line looks like: 'http://…/pkg_1.0_amd64.deb' pkg_1.0_amd64.deb 1234 SHA256:…
    let uris = runner.output("apt-get", ["download", package, "--print-uris"])?;
    let Some(file_name) = uris.first().and_then(|line| line.split_whitespace().nth(1)) else {
        bail!("apt-get printed no download URI for {}", package);
    };
    let deb = Path::new(APT_ARCHIVES).join(file_name);

    runner.run(
        "apt-get",
        ["install", "--reinstall", "-y", "--allow-unauthenticated", "-d", package],
    )?;
    runner.run(
        "dpkg",
        ["-X".into(), deb.to_string_lossy(), box_dir.to_string_lossy()],
    )?;
    Ok(())
}

/// Name to hand archives back to: `$USER`, or the numeric uid.
fn current_user() -> String {
    // SAFETY: getuid has no preconditions and cannot fail.
    owner_name(std::env::var("USER").ok(), unsafe { libc::getuid() })
}

fn owner_name(user: Option<String>, uid: u32) -> String {
    match user {
        Some(user) if !user.is_empty() => user,
        _ => uid.to_string(),
    }
}

impl Drop for Builder {
    fn drop(&mut self) {
        let Some(workdir) = self.workdir.take() else {
            return;
        };

        // debootstrap leaves root-owned files behind.
        let path = workdir.path().to_string_lossy().into_owned();
        if let Err(e) = self
            .runner
            .with_elevated_privilege(|r| r.run("chmod", ["-R", "a+rwX", path.as_str()]))
        {
            output::warning(&format!("Failed to open up workdir {}: {}", path, e));
        }

        output::detail(&format!("Deleting workdir {}", path));
        if let Err(e) = workdir.close() {
            output::warning(&format!("Failed to delete workdir {}: {}", path, e));
        }
    }
}

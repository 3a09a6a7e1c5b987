//! Privilege and chroot aware command execution
//!
//! [`CommandRunner`] is the only way the builder launches processes. It keeps
//! a stack of scoped modifiers (`sudo`, `chroot <root>`), composes the final
//! argument vector from it, and streams the child's stdout and stderr through
//! a [`LinePoller`] so output is logged line by line while the child runs.
//!
//! ```ignore
//! let runner = CommandRunner::new();
//! runner.with_elevated_privilege(|r| r.run("debootstrap", ["stable", "/srv/root"]))?;
//! runner.with_namespace_root(Path::new("/srv/root"), |r| {
//!     let lines = r.output("apt-rdepends", ["-p", "busybox"])?;
//!     Ok::<_, BoxError>(lines)
//! })?;
//! ```

pub mod context;
pub mod lines;

pub use context::{ContextGuard, ContextStack, Modifier, Prefixes};
pub use lines::LinePoller;

use crate::error::{BoxError, Result};
use crate::output;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::Duration;

/// How long to wait for output before re-checking whether the child exited.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Launches a fully composed argument vector.
///
/// The child must have stdin closed and stdout/stderr piped.
pub trait Spawner {
    fn spawn(&self, argv: &[String], cwd: Option<&Path>) -> io::Result<Child>;
}

/// Spawns real processes with `std::process::Command`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemSpawner;

impl Spawner for SystemSpawner {
    fn spawn(&self, argv: &[String], cwd: Option<&Path>) -> io::Result<Child> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "empty command"))?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }
        cmd.spawn()
    }
}

/// Per-invocation options.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    capture_output: bool,
    cwd: Option<PathBuf>,
}

impl RunOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Collect stdout lines and return them to the caller.
    pub fn capture(mut self) -> Self {
        self.capture_output = true;
        self
    }

    /// Run in `dir`. Cannot be combined with an active namespace root.
    pub fn dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.cwd = Some(dir.as_ref().to_path_buf());
        self
    }
}

/// Runs commands under the active privilege/namespace context.
pub struct CommandRunner {
    context: ContextStack,
    prefixes: Prefixes,
    spawner: Box<dyn Spawner>,
    poll_interval: Duration,
}

impl Default for CommandRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandRunner {
    /// Runner that spawns real processes with `sudo --` and `chroot`.
    pub fn new() -> Self {
        Self::with_spawner(Box::new(SystemSpawner))
    }

    pub fn with_spawner(spawner: Box<dyn Spawner>) -> Self {
        Self {
            context: ContextStack::new(),
            prefixes: Prefixes::default(),
            spawner,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Replace the elevation/chroot prefix programs.
    pub fn prefixes(mut self, prefixes: Prefixes) -> Self {
        self.prefixes = prefixes;
        self
    }

    /// Active context, for inspection.
    pub fn context(&self) -> &ContextStack {
        &self.context
    }

    /// Run `body` with elevated privilege. The modifier is popped on every
    /// exit path, including errors and panics.
    pub fn with_elevated_privilege<T, E>(&self, body: impl FnOnce(&Self) -> Result<T, E>) -> Result<T, E> {
        let _scope = self.context.enter(Modifier::ElevatePrivilege);
        body(self)
    }

    /// Run `body` with `root` as filesystem root.
    ///
    /// Mounts `proc` at `root/proc` first and unmounts it afterwards, even if
    /// `body` fails or panics. If both `body` and the unmount fail, the body's
    /// error is returned and the cleanup failure is reported as a warning.
    pub fn with_namespace_root<T, E>(
        &self,
        root: &Path,
        body: impl FnOnce(&Self) -> Result<T, E>,
    ) -> Result<T, E>
    where
        E: From<BoxError>,
    {
        let proc_dir = root.join("proc");
        let proc_arg = proc_dir.to_string_lossy().into_owned();
        self.with_elevated_privilege(|r| r.run("mount", ["-t", "proc", "none", proc_arg.as_str()]))?;

        let mount = ProcMount {
            runner: self,
            path: proc_dir,
            released: false,
        };
        let result = {
            let _scope = self.context.enter(Modifier::NamespaceRoot(root.to_path_buf()));
            body(self)
        };

        match (result, mount.release()) {
            (result, Ok(())) => result,
            (Ok(_), Err(cleanup)) => Err(cleanup.into()),
            (Err(primary), Err(cleanup)) => {
                output::warning(&cleanup.to_string());
                Err(primary)
            }
        }
    }

    /// Run a command, logging its output.
    pub fn run<I, S>(&self, program: &str, args: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.run_with(program, args, &RunOptions::new()).map(|_| ())
    }

    /// Run a command in `dir`.
    pub fn run_in<I, S>(&self, program: &str, args: I, dir: &Path) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.run_with(program, args, &RunOptions::new().dir(dir)).map(|_| ())
    }

    /// Run a command and return its stdout lines.
    pub fn output<I, S>(&self, program: &str, args: I) -> Result<Vec<String>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.run_with(program, args, &RunOptions::new().capture())
    }

    /// Run a command under the current context and wait for it to exit.
    ///
    /// Stderr lines are always logged. Stdout lines are logged too and, with
    /// [`RunOptions::capture`], collected in order and returned; without it
    /// the returned vector is empty. A non-zero exit fails with
    /// [`BoxError::CommandFailed`]; stderr content alone never fails a command.
    ///
    /// # Panics
    ///
    /// If an explicit working directory is given while a namespace root is
    /// active. The two refer to different filesystem views.
    pub fn run_with<I, S>(&self, program: &str, args: I, options: &RunOptions) -> Result<Vec<String>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let args: Vec<String> = args.into_iter().map(|a| a.as_ref().to_string()).collect();
        assert!(
            options.cwd.is_none() || self.context.namespace_root().is_none(),
            "a working directory cannot be combined with a namespace root"
        );

        let argv = self.context.compose(&self.prefixes, program, &args);
        output::command(&format!("Executing: {}", argv.join(" ")));

        let mut child = self
            .spawner
            .spawn(&argv, options.cwd.as_deref())
            .map_err(|source| BoxError::Spawn {
                program: argv[0].clone(),
                source,
            })?;

        let mut captured = Vec::new();
        let status = match self.pump(&mut child, program, options.capture_output, &mut captured) {
            Ok(status) => status,
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(e.into());
            }
        };

        if !status.success() {
            output::error(&format!("Exited with {:?}: {}", status.code(), argv.join(" ")));
            return Err(BoxError::CommandFailed {
                program: program.to_string(),
                args,
                code: status.code(),
            });
        }

        output::command_status(&format!("Exited with {}", status.code().unwrap_or(0)));
        Ok(captured)
    }

    /// Alternate between liveness checks and output polling until the child
    /// exits, then drain whatever is left in the pipes.
    fn pump(
        &self,
        child: &mut Child,
        program: &str,
        capture: bool,
        captured: &mut Vec<String>,
    ) -> io::Result<ExitStatus> {
        let mut poller = LinePoller::new();

        if let Some(stdout) = child.stdout.take() {
            poller.register(stdout, |line: &str| {
                output::command_line(program, line);
                if capture {
                    captured.push(line.to_string());
                }
            })?;
        }
        if let Some(stderr) = child.stderr.take() {
            poller.register(stderr, |line: &str| output::command_line(program, line))?;
        }

        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if !poller.poll_once(Some(self.poll_interval))? {
                // Both pipes hit end of data; nothing left but the exit.
                break child.wait()?;
            }
        };

        poller.drain()?;
        Ok(status)
    }
}

/// A `proc` mount inside a namespace root. Unmounted by [`ProcMount::release`]
/// or, on unwind, by `Drop` on a best-effort basis.
struct ProcMount<'a> {
    runner: &'a CommandRunner,
    path: PathBuf,
    released: bool,
}

impl ProcMount<'_> {
    fn release(mut self) -> Result<()> {
        self.released = true;
        self.unmount()
    }

    fn unmount(&self) -> Result<()> {
        let path = self.path.to_string_lossy().into_owned();
        match self
            .runner
            .with_elevated_privilege(|r| r.run("umount", ["-R", path.as_str()]))
        {
            Ok(()) => Ok(()),
            // Already gone is as good as unmounted.
            Err(BoxError::CommandFailed { .. }) if !is_mounted(&self.path) => {
                output::command_status(&format!("{} is not mounted", self.path.display()));
                Ok(())
            }
            Err(e) => Err(BoxError::ContextCleanupFailed {
                path: self.path.clone(),
                source: Box::new(e),
            }),
        }
    }
}

impl Drop for ProcMount<'_> {
    fn drop(&mut self) {
        if !self.released
            && let Err(e) = self.unmount()
        {
            output::warning(&e.to_string());
        }
    }
}

/// Whether `path` is a mount point in this process's mount namespace.
///
/// Assumes it is when the mount table cannot be read.
fn is_mounted(path: &Path) -> bool {
    match std::fs::read_to_string("/proc/self/mountinfo") {
        Ok(table) => mountinfo_contains(&table, path),
        Err(_) => true,
    }
}

/// Check a `/proc/self/mountinfo` table for a mount point.
fn mountinfo_contains(table: &str, path: &Path) -> bool {
    let wanted = path.to_string_lossy();
    table
        .lines()
        .filter_map(|line| line.split_whitespace().nth(4))
        .any(|mount_point| unescape_mount_path(mount_point) == wanted)
}

/// Decode the octal escapes (`\040` for space etc.) used in mount tables.
fn unescape_mount_path(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\'
            && i + 3 < bytes.len()
            && bytes[i + 1..i + 4].iter().all(|b| (b'0'..=b'7').contains(b))
        {
            let value = (bytes[i + 1] - b'0') as u32 * 64
                + (bytes[i + 2] - b'0') as u32 * 8
                + (bytes[i + 3] - b'0') as u32;
            out.push(value as u8);
            i += 4;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

//! Common test utilities: a scripted stand-in for the system's programs.
//!
//! [`FakeSystem`] records every argument vector the runner composes and
//! answers with canned stdout and exit codes through a tiny `sh` script, so
//! `sudo`, `chroot`, `mount` and apt never actually run.

#![allow(dead_code)]

use sandbox_boxes::CommandRunner;
use sandbox_boxes::exec::Spawner;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Mutex};

/// One composed invocation.
#[derive(Debug, Clone)]
pub struct Call {
    pub argv: Vec<String>,
    pub cwd: Option<PathBuf>,
}

impl Call {
    /// The command with `sudo --` and `chroot <root>` stripped.
    pub fn logical(&self) -> &[String] {
        logical(&self.argv)
    }

    pub fn line(&self) -> String {
        self.argv.join(" ")
    }
}

struct Rule {
    prefix: Vec<String>,
    stdout: Vec<String>,
    code: i32,
}

#[derive(Default)]
struct State {
    calls: Vec<Call>,
    rules: Vec<Rule>,
}

#[derive(Clone, Default)]
pub struct FakeSystem {
    state: Arc<Mutex<State>>,
}

impl FakeSystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer commands starting with `prefix` with these stdout lines.
    pub fn respond(&self, prefix: &[&str], stdout: &[&str]) {
        self.add_rule(prefix, stdout, 0);
    }

    /// Make commands starting with `prefix` exit with `code`.
    pub fn fail(&self, prefix: &[&str], code: i32) {
        self.add_rule(prefix, &[], code);
    }

    fn add_rule(&self, prefix: &[&str], stdout: &[&str], code: i32) {
        self.state.lock().unwrap().rules.push(Rule {
            prefix: prefix.iter().map(|s| s.to_string()).collect(),
            stdout: stdout.iter().map(|s| s.to_string()).collect(),
            code,
        });
    }

    pub fn runner(&self) -> CommandRunner {
        CommandRunner::with_spawner(Box::new(self.clone()))
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Full command lines, in launch order.
    pub fn lines(&self) -> Vec<String> {
        self.calls().iter().map(Call::line).collect()
    }

    /// Calls whose logical command starts with `prefix`.
    pub fn calls_to(&self, prefix: &[&str]) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| starts_with(c.logical(), prefix))
            .collect()
    }
}

impl Spawner for FakeSystem {
    fn spawn(&self, argv: &[String], cwd: Option<&Path>) -> io::Result<Child> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call {
            argv: argv.to_vec(),
            cwd: cwd.map(Path::to_path_buf),
        });

        let (stdout, code) = state
            .rules
            .iter()
            .find(|r| logical(argv).starts_with(&r.prefix))
            .map(|r| (r.stdout.clone(), r.code))
            .unwrap_or_default();

        Command::new("sh")
            .arg("-c")
            .arg(format!("for l in \"$@\"; do printf '%s\\n' \"$l\"; done; exit {}", code))
            .arg("sh")
            .args(stdout)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
    }
}

fn logical(argv: &[String]) -> &[String] {
    let mut rest = argv;
    if rest.len() >= 2 && rest[0] == "sudo" && rest[1] == "--" {
        rest = &rest[2..];
    }
    if rest.first().is_some_and(|p| p == "chroot") {
        rest = &rest[rest.len().min(2)..];
    }
    rest
}

fn starts_with(argv: &[String], prefix: &[&str]) -> bool {
    argv.len() >= prefix.len() && argv.iter().zip(prefix).all(|(a, p)| a == p)
}

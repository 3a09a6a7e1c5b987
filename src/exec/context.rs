//! Execution context stack
//!
//! Tracks nested privilege elevation and namespace-root (chroot) scopes and
//! turns a logical command into the argument vector that runs it under the
//! active scopes.

use std::cell::RefCell;
use std::path::{Path, PathBuf};

/// A single entry on the context stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Modifier {
    /// Run commands through the privilege elevation prefix.
    ElevatePrivilege,
    /// Run commands with the given directory as filesystem root.
    /// Implies elevated privilege for as long as it is active.
    NamespaceRoot(PathBuf),
}

/// Programs placed in front of a logical command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prefixes {
    /// Privilege elevation prefix, e.g. `sudo --`.
    pub elevate: Vec<String>,
    /// Program that changes the filesystem root, e.g. `chroot`.
    pub chroot: String,
}

impl Default for Prefixes {
    fn default() -> Self {
        Self {
            elevate: vec!["sudo".to_string(), "--".to_string()],
            chroot: "chroot".to_string(),
        }
    }
}

/// Ordered stack of active modifiers.
///
/// Not thread safe: each concurrent build needs its own stack.
#[derive(Debug, Default)]
pub struct ContextStack {
    frames: RefCell<Vec<Modifier>>,
}

impl ContextStack {
    /// Create an empty stack (no elevation, host filesystem root).
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a modifier. It stays active until the returned guard is dropped.
    pub fn enter(&self, modifier: Modifier) -> ContextGuard<'_> {
        let mut frames = self.frames.borrow_mut();
        frames.push(modifier);
        ContextGuard {
            stack: self,
            depth: frames.len(),
        }
    }

    /// Number of active modifiers.
    pub fn depth(&self) -> usize {
        self.frames.borrow().len()
    }

    /// Copy of the active modifiers, outermost first.
    pub fn snapshot(&self) -> Vec<Modifier> {
        self.frames.borrow().clone()
    }

    /// True when commands run with elevated privilege, either explicitly
    /// or because a namespace root is active.
    pub fn is_elevated(&self) -> bool {
        !self.frames.borrow().is_empty()
    }

    /// The innermost active namespace root, if any.
    pub fn namespace_root(&self) -> Option<PathBuf> {
        self.frames.borrow().iter().rev().find_map(|m| match m {
            Modifier::NamespaceRoot(path) => Some(path.clone()),
            Modifier::ElevatePrivilege => None,
        })
    }

    /// Build the concrete argument vector for `program args...`.
    pub fn compose<S: AsRef<str>>(&self, prefixes: &Prefixes, program: &str, args: &[S]) -> Vec<String> {
        compose_argv(
            prefixes,
            self.namespace_root().as_deref(),
            self.is_elevated(),
            program,
            args,
        )
    }
}

/// Compose `[elevate...] [chroot root] program args...`.
pub fn compose_argv<S: AsRef<str>>(
    prefixes: &Prefixes,
    namespace_root: Option<&Path>,
    elevated: bool,
    program: &str,
    args: &[S],
) -> Vec<String> {
    let mut argv = Vec::with_capacity(prefixes.elevate.len() + 2 + 1 + args.len());

    if elevated || namespace_root.is_some() {
        argv.extend(prefixes.elevate.iter().cloned());
    }
    if let Some(root) = namespace_root {
        argv.push(prefixes.chroot.clone());
        argv.push(root.to_string_lossy().into_owned());
    }

    argv.push(program.to_string());
    argv.extend(args.iter().map(|a| a.as_ref().to_string()));
    argv
}

/// RAII guard that restores the stack to its state before `enter` when dropped.
/// Runs on every exit path, including early returns and unwinding.
#[must_use = "the modifier is popped as soon as the guard is dropped"]
pub struct ContextGuard<'a> {
    stack: &'a ContextStack,
    depth: usize,
}

impl Drop for ContextGuard<'_> {
    fn drop(&mut self) {
        let mut frames = self.stack.frames.borrow_mut();
        // A second panic while unwinding would abort the process.
        if !std::thread::panicking() {
            debug_assert_eq!(frames.len(), self.depth, "context scopes released out of order");
        }
        frames.truncate(self.depth - 1);
    }
}

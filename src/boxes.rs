//! Box catalog
//!
//! A box is named on the command line as `<name>` or `<name>-<version>`,
//! e.g. `busybox` or `python-3.7`. Each kind knows which Debian packages
//! it is made of; every box gets the same finishing touches the sandbox
//! expects (`/proc` mount point and a writable, executable `/exe`).

use crate::error::{BoxError, Result};
use crate::exec::CommandRunner;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Boxes built when none are named.
pub const DEFAULT_BOXES: &[&str] = &["minimal", "busybox", "python-2", "python-3"];

/// Known kinds of box.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoxKind {
    /// Just the sandbox skeleton, no packages.
    Minimal,
    BusyBox,
    /// `python<version>`
    Python,
    /// OpenJDK headless runtime, versions 8 and 11.
    Java,
}

impl BoxKind {
    pub const ALL: [BoxKind; 4] = [Self::Minimal, Self::BusyBox, Self::Python, Self::Java];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Minimal => "minimal",
            Self::BusyBox => "busybox",
            Self::Python => "python",
            Self::Java => "java",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.name() == name)
    }

    pub fn needs_version(&self) -> bool {
        matches!(self, Self::Python | Self::Java)
    }

    fn packages(&self, version: Option<&str>) -> Result<Vec<String>> {
        let required = || version.ok_or_else(|| BoxError::MissingVersion(self.name().to_string()));
        match self {
            Self::Minimal => Ok(Vec::new()),
            Self::BusyBox => Ok(vec!["busybox".to_string()]),
            Self::Python => Ok(vec![format!("python{}", required()?)]),
            Self::Java => match required()? {
                v @ ("8" | "11") => Ok(vec![format!("openjdk-{}-jre-headless", v)]),
                v => Err(BoxError::UnsupportedVersion {
                    name: self.name().to_string(),
                    version: v.to_string(),
                }),
            },
        }
    }
}

impl fmt::Display for BoxKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A validated box request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoxSpec {
    kind: BoxKind,
    version: Option<String>,
    packages: Vec<String>,
}

impl BoxSpec {
    /// Parse `name` or `name-version`.
    pub fn parse(spec: &str) -> Result<Self> {
        let (name, version) = match spec.split_once('-') {
            Some((name, "")) => (name, None),
            Some((name, version)) => (name, Some(version.to_string())),
            None => (spec, None),
        };
        let kind = BoxKind::from_name(name).ok_or_else(|| BoxError::UnknownBox(spec.to_string()))?;
        let packages = kind.packages(version.as_deref())?;
        Ok(Self {
            kind,
            version,
            packages,
        })
    }

    pub fn kind(&self) -> BoxKind {
        self.kind
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// Packages requested for this box; their dependencies are resolved at build time.
    pub fn packages(&self) -> &[String] {
        &self.packages
    }

    /// Directory the box is assembled in: name plus version with dots
    /// replaced, e.g. `python3_7`.
    pub fn dir_name(&self) -> String {
        match &self.version {
            Some(v) => format!("{}{}", self.kind.name(), v.replace('.', "_")),
            None => self.kind.name().to_string(),
        }
    }

    pub fn archive_name(&self) -> String {
        format!("{}.tar.gz", self.dir_name())
    }

    /// Prepare the box tree for the sandbox.
    pub fn finalize(&self, runner: &CommandRunner, box_dir: &Path) -> Result<()> {
        let proc_dir = box_dir.join("proc").to_string_lossy().into_owned();
        let exe = box_dir.join("exe").to_string_lossy().into_owned();
        runner.run("mkdir", ["-pv", proc_dir.as_str()])?;
        runner.run("touch", [exe.as_str()])?;
        runner.run("chmod", ["+wx", exe.as_str()])?;
        Ok(())
    }
}

impl FromStr for BoxSpec {
    type Err = BoxError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for BoxSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.version {
            Some(v) => write!(f, "{}-{}", self.kind, v),
            None => write!(f, "{}", self.kind),
        }
    }
}

/// Parse the requested boxes, or the defaults when none are given.
pub fn resolve_boxes(requested: &[String]) -> Result<Vec<BoxSpec>> {
    if requested.is_empty() {
        DEFAULT_BOXES.iter().map(|s| BoxSpec::parse(s)).collect()
    } else {
        requested.iter().map(|s| BoxSpec::parse(s)).collect()
    }
}

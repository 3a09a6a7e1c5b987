//! Filesystem boxes for the sandbox runtime
//!
//! A box is a minimal root filesystem (plus `/proc` mount point and an `/exe`
//! placeholder) that sandboxed programs run in. Boxes are either built locally
//! from Debian packages inside a chroot, or downloaded prebuilt from a mirror.
//!
//! # Building
//!
//! ```ignore
//! use sandbox_boxes::{BoxSpec, BuildOptions, Builder};
//!
//! let boxes = [BoxSpec::parse("busybox")?, BoxSpec::parse("python-3.7")?];
//! let mut builder = Builder::new(BuildOptions::default())?;
//! let archives = builder.run(&boxes)?;
//! ```
//!
//! Every external program goes through [`exec::CommandRunner`], which wraps
//! commands in `sudo --` and `chroot <root>` according to the scopes entered
//! with [`exec::CommandRunner::with_elevated_privilege`] and
//! [`exec::CommandRunner::with_namespace_root`].
//!
//! # Dependency order
//!
//! [`deps::DepGraph`] reads `apt-rdepends -p` reports and yields packages
//! dependencies-first, leaving out packages the report marks `[NotInstalled]`.
//!
//! # Environment
//!
//! - `BOXES_URL` - mirror used by `boxes download`
//! - `BOXES_HTTP_TIMEOUT` - HTTP timeout in seconds (5-300, default 30)
//! - `USER` - owner given to built archives

pub mod archive;
pub mod boxes;
pub mod builder;
pub mod deps;
pub mod download;
pub mod error;
pub mod exec;
pub mod hash;
pub mod lock;
pub mod output;

pub use boxes::{BoxKind, BoxSpec};
pub use builder::{BuildOptions, Builder};
pub use deps::{DepGraph, InstallOrder};
pub use download::Downloader;
pub use error::{BoxError, Result};
pub use exec::CommandRunner;

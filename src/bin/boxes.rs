//! Boxes CLI - build or fetch sandbox filesystem boxes
//!
//! Usage:
//!   boxes download [-u URL] [-d DIR] [-x]          Fetch prebuilt boxes from a mirror
//!   boxes build [-d DIR] [-p CHROOT] [BOX...]      Build boxes from Debian packages
//!   boxes deps -p CHROOT [--json] PACKAGE...        Show unpack order inside a chroot
//!   boxes list                                      Show known boxes

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use owo_colors::OwoColorize;
use sandbox_boxes::boxes::{self, BoxKind, DEFAULT_BOXES};
use sandbox_boxes::download::{DEFAULT_URL, Downloader};
use sandbox_boxes::{BuildOptions, Builder, CommandRunner, deps, output};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "boxes")]
#[command(about = "Build and download filesystem boxes for the sandbox")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download prebuilt boxes listed in a mirror's manifest
    Download {
        /// Mirror base URL
        #[arg(short, long, env = "BOXES_URL", default_value = DEFAULT_URL)]
        url: String,

        /// Directory to store boxes in
        #[arg(short, long, default_value = ".")]
        destination: PathBuf,

        /// Unpack boxes after downloading
        #[arg(short = 'x', long)]
        extract: bool,
    },

    /// Build boxes inside a Debian chroot
    Build {
        /// Directory to write box archives to
        #[arg(short, long, default_value = ".")]
        destination: PathBuf,

        /// Unpack boxes after building
        #[arg(short = 'x', long)]
        extract: bool,

        /// Reusable chroot (a temporary one is bootstrapped if not given)
        #[arg(short = 'p', long)]
        chroot_path: Option<PathBuf>,

        /// Debian release to bootstrap
        #[arg(short, long, default_value = "stable")]
        release: String,

        /// Boxes to build, e.g. busybox python-3.7 (defaults if none)
        #[arg(value_name = "BOX")]
        names: Vec<String>,
    },

    /// Print the order packages would be unpacked in
    Deps {
        /// Existing chroot with apt-rdepends installed
        #[arg(short = 'p', long)]
        chroot_path: PathBuf,

        /// Print a JSON array instead of a numbered list
        #[arg(long)]
        json: bool,

        /// Packages to resolve
        #[arg(required = true)]
        packages: Vec<String>,
    },

    /// List known boxes
    List,
}

fn main() {
    if let Err(e) = run(Cli::parse()) {
        output::error(&format!("{:#}", e));
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Download {
            url,
            destination,
            extract,
        } => {
            Downloader::new(url, destination, extract).run()?;
        }

        Commands::Build {
            destination,
            extract,
            chroot_path,
            release,
            names,
        } => {
            // Validate every name before bootstrapping anything.
            let specs = boxes::resolve_boxes(&names)?;
            let mut builder = Builder::new(BuildOptions {
                destination,
                chroot_path,
                release,
                extract,
            })?;
            builder.run(&specs)?;
        }

        Commands::Deps {
            chroot_path,
            json,
            packages,
        } => {
            if !chroot_path.is_dir() {
                bail!("Chroot {} does not exist", chroot_path.display());
            }
            let root = chroot_path
                .canonicalize()
                .with_context(|| format!("Failed to resolve {}", chroot_path.display()))?;

            let runner = CommandRunner::new();
            let order = runner.with_namespace_root(&root, |r| deps::build_install_order(r, &packages))?;

            if json {
                println!("{}", serde_json::to_string_pretty(&order)?);
            } else {
                output::info(&format!("Unpack order for {}:", packages.join(" ").bold()));
                for (i, name) in order.iter().enumerate() {
                    println!("  {}. {}", i + 1, name);
                }
            }
        }

        Commands::List => {
            output::info("Known boxes:");
            for kind in BoxKind::ALL {
                let usage = if kind.needs_version() {
                    format!("{}-<version>", kind)
                } else {
                    kind.to_string()
                };
                println!("  {} {}", "-".cyan(), usage);
            }
            println!("  {} {}", "defaults:".dimmed(), DEFAULT_BOXES.join(" "));
        }
    }

    Ok(())
}

//! Native box archive extraction (no external tools needed)
//!
//! Boxes are compressed tarballs of a root filesystem. Extraction refuses
//! entries that would land outside the destination, but keeps absolute
//! symlink targets: inside a box they resolve against the sandbox root.

use crate::error::{BoxError, Result};
use crate::output;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Component, Path, PathBuf};

/// Supported archive formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Tar,
    TarGz,
    TarXz,
    TarBz2,
    TarZst,
}

impl ArchiveFormat {
    /// Detect archive format from filename extension
    pub fn detect(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_string_lossy().to_lowercase();
        if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Some(Self::TarGz)
        } else if name.ends_with(".tar.xz") || name.ends_with(".txz") {
            Some(Self::TarXz)
        } else if name.ends_with(".tar.bz2") || name.ends_with(".tbz2") {
            Some(Self::TarBz2)
        } else if name.ends_with(".tar.zst") || name.ends_with(".tzst") {
            Some(Self::TarZst)
        } else if name.ends_with(".tar") {
            Some(Self::Tar)
        } else {
            None
        }
    }
}

/// Extract a box archive into `dest`, detecting the format from its name.
pub fn extract(archive_path: &Path, dest: &Path) -> Result<()> {
    let format = ArchiveFormat::detect(archive_path).ok_or_else(|| {
        BoxError::Archive(format!(
            "unsupported archive format: {}",
            archive_path.display()
        ))
    })?;

    output::detail(&format!(
        "extracting {} into {}",
        archive_path.display(),
        dest.display()
    ));

    std::fs::create_dir_all(dest)?;
    let file = File::open(archive_path).map_err(|e| {
        BoxError::Archive(format!("cannot open {}: {}", archive_path.display(), e))
    })?;
    let reader = BufReader::new(file);

    match format {
        ArchiveFormat::Tar => extract_tar(reader, dest),
        ArchiveFormat::TarGz => extract_tar(flate2::read::GzDecoder::new(reader), dest),
        ArchiveFormat::TarXz => extract_tar(xz2::read::XzDecoder::new(reader), dest),
        ArchiveFormat::TarBz2 => extract_tar(bzip2::read::BzDecoder::new(reader), dest),
        ArchiveFormat::TarZst => {
            let decoder = zstd::stream::read::Decoder::new(reader)
                .map_err(|e| BoxError::Archive(format!("zstd init error: {}", e)))?;
            extract_tar(decoder, dest)
        }
    }
}

/// Fold `.` and `..` out of `path` without touching the filesystem.
/// `..` never climbs above the root; leading `..` of a relative path stay.
fn resolve_dots(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir) => {}
                _ => out.push(".."),
            },
            other => out.push(other),
        }
    }
    out
}

/// Fail if any directory on the way to a member (`dir`, relative to `dest`)
/// already exists as a symlink.
fn reject_symlinked_dirs(dest: &Path, dir: &Path) -> Result<()> {
    let mut on_disk = dest.to_path_buf();
    for part in dir.components() {
        on_disk.push(part);
        let is_link = std::fs::symlink_metadata(&on_disk)
            .map(|md| md.file_type().is_symlink())
            .unwrap_or(false);
        if is_link {
            return Err(BoxError::Archive(format!(
                "tar member would be written through symlink {}",
                on_disk.display()
            )));
        }
    }
    Ok(())
}

/// Relative symlink targets must stay inside `dest`; hard links name another
/// archive member and must be a safe relative path.
fn ensure_link_target_within_dest(
    dest: &Path,
    link_parent: &Path,
    link_name: &Path,
    hard_link: bool,
) -> Result<()> {
    if link_name.is_absolute() {
        if hard_link {
            return Err(BoxError::Archive(format!(
                "tar contains unsafe hard link target (absolute): {}",
                link_name.display()
            )));
        }
        return Ok(());
    }

    let base = if hard_link { dest } else { link_parent };
    let candidate = resolve_dots(&base.join(link_name));
    let norm_dest = resolve_dots(dest);
    if candidate.strip_prefix(&norm_dest).is_err() {
        return Err(BoxError::Archive(format!(
            "tar contains unsafe link target (escapes dest): {} -> {}",
            link_parent.display(),
            link_name.display()
        )));
    }

    Ok(())
}

/// Extract a tar stream with security checks
fn extract_tar<R: Read>(reader: R, dest: &Path) -> Result<()> {
    let mut archive = tar::Archive::new(reader);
    archive.set_preserve_permissions(true);

    for entry in archive
        .entries()
        .map_err(|e| BoxError::Archive(format!("tar read error: {}", e)))?
    {
        let mut entry = entry.map_err(|e| BoxError::Archive(format!("tar entry error: {}", e)))?;

        let path = entry
            .path()
            .map_err(|e| BoxError::Archive(format!("tar path error: {}", e)))?
            .into_owned();

        if path.is_absolute() || path.components().any(|c| c == Component::ParentDir) {
            return Err(BoxError::Archive(format!(
                "tar contains unsafe path: {}",
                path.display()
            )));
        }

        // Some archives contain a "." entry; treat it as a no-op.
        if path.as_os_str().is_empty() || path == Path::new(".") {
            continue;
        }

        let full_path = dest.join(&path);

        // A symlink extracted earlier could redirect this member outside `dest`.
        if let Some(parent) = path.parent() {
            reject_symlinked_dirs(dest, parent)?;
        }

        let entry_type = entry.header().entry_type();
        if entry_type == tar::EntryType::Symlink || entry_type == tar::EntryType::Link {
            let hard_link = entry_type == tar::EntryType::Link;
            let link_name = entry
                .link_name()
                .map_err(|e| BoxError::Archive(format!("tar link_name error: {}", e)))?
                .ok_or_else(|| {
                    BoxError::Archive(format!(
                        "tar contains {} without link target: {}",
                        if hard_link { "hardlink" } else { "symlink" },
                        path.display()
                    ))
                })?
                .into_owned();
            let link_parent = full_path.parent().unwrap_or(dest);
            ensure_link_target_within_dest(dest, link_parent, &link_name, hard_link)?;
        }

        entry
            .unpack_in(dest)
            .map_err(|e| BoxError::Archive(format!("unpack error for {}: {}", path.display(), e)))?;
    }

    Ok(())
}

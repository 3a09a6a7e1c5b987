//! Prebuilt box downloads
//!
//! A mirror publishes box archives next to a `manifest.txt` listing one
//! `<sha256> <file name>` pair per line. Boxes whose local copy already has
//! the listed hash are not fetched again; everything else is streamed to the
//! destination and verified afterwards.

use crate::archive;
use crate::error::{BoxError, Result};
use crate::hash;
use crate::output;
use anyhow::Context;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

pub const MANIFEST_FILE_NAME: &str = "manifest.txt";

/// Mirror used when no URL is given.
pub const DEFAULT_URL: &str = "https://hitagi.dasie.mimuw.edu.pl/files/boxes/";

/// Default HTTP timeout in seconds
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

/// HTTP timeout from `BOXES_HTTP_TIMEOUT`, clamped to 5-300 seconds.
/// Read once per process.
fn http_timeout() -> Duration {
    static TIMEOUT: OnceLock<Duration> = OnceLock::new();
    *TIMEOUT.get_or_init(|| {
        let secs = std::env::var("BOXES_HTTP_TIMEOUT")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS);
        Duration::from_secs(secs.clamp(5, 300))
    })
}

/// One manifest line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub sha256: String,
    pub name: String,
}

/// Parse manifest text. Blank lines are ignored; every other line must be
/// exactly a 64 digit hex hash and a plain file name.
pub fn parse_manifest(text: &str) -> Result<Vec<ManifestEntry>> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            let mut fields = line.split_whitespace();
            let (Some(sha256), Some(name), None) = (fields.next(), fields.next(), fields.next()) else {
                return Err(BoxError::Manifest(line.to_string()));
            };
            let valid_hash = sha256.len() == 64 && sha256.bytes().all(|b| b.is_ascii_hexdigit());
            let valid_name = !name.contains('/') && name != "." && name != "..";
            if !valid_hash || !valid_name {
                return Err(BoxError::Manifest(line.to_string()));
            }
            Ok(ManifestEntry {
                sha256: sha256.to_ascii_lowercase(),
                name: name.to_string(),
            })
        })
        .collect()
}

/// Resolve a file name against a base URL the way a relative link would be:
/// a base ending in `/` is a directory, otherwise its last segment is replaced.
pub fn join_url(base: &str, name: &str) -> String {
    let base = base.split(['?', '#']).next().unwrap_or(base);
    let path_start = match base.find("://") {
        Some(i) => base[i + 3..].find('/').map(|j| i + 3 + j),
        None => base.find('/'),
    };
    match path_start {
        None if base.contains("://") => format!("{}/{}", base, name),
        None => name.to_string(),
        Some(start) => {
            let last_slash = base[start..].rfind('/').map_or(start, |j| start + j);
            format!("{}{}", &base[..=last_slash], name)
        }
    }
}

fn http_get(url: &str) -> Result<ureq::Response> {
    ureq::get(url)
        .timeout(http_timeout())
        .call()
        .map_err(|e| match e {
            ureq::Error::Status(code, response) => BoxError::Download(format!(
                "{} returned HTTP {} {}",
                url,
                code,
                response.status_text()
            )),
            e => BoxError::Download(format!("{}: {}", url, e)),
        })
}

/// Fetches and verifies every box a mirror lists.
#[derive(Debug, Clone)]
pub struct Downloader {
    url: String,
    destination: PathBuf,
    extract: bool,
}

impl Downloader {
    pub fn new(url: impl Into<String>, destination: impl Into<PathBuf>, extract: bool) -> Self {
        Self {
            url: url.into(),
            destination: destination.into(),
            extract,
        }
    }

    /// Download all listed boxes, returning their local paths.
    pub fn run(&self) -> anyhow::Result<Vec<PathBuf>> {
        std::fs::create_dir_all(&self.destination)
            .with_context(|| format!("Failed to create {}", self.destination.display()))?;

        output::action(&format!("Downloading boxes from {}", self.url));
        let manifest = self.fetch_manifest().context("Failed to fetch manifest")?;

        let mut paths = Vec::with_capacity(manifest.len());
        for (i, entry) in manifest.iter().enumerate() {
            output::action_numbered(
                i + 1,
                manifest.len(),
                &format!("Processing box {} hash {}", entry.name, entry.sha256),
            );
            let path = self.destination.join(&entry.name);

            if hash::sha256_file(&path)?.as_deref() == Some(entry.sha256.as_str()) {
                output::skip(&format!("{} already downloaded", entry.name));
            } else {
                self.fetch_box(&entry.name, &path)?;
                verify(entry, &path)?;
            }

            if self.extract {
                archive::extract(&path, &self.destination)
                    .with_context(|| format!("Failed to extract {}", entry.name))?;
            }
            paths.push(path);
        }

        output::success(&format!("{} boxes ready in {}", paths.len(), self.destination.display()));
        Ok(paths)
    }

    pub fn fetch_manifest(&self) -> Result<Vec<ManifestEntry>> {
        let url = join_url(&self.url, MANIFEST_FILE_NAME);
        let body = http_get(&url)?.into_string()?;
        parse_manifest(&body)
    }

    /// Stream one box into place. The file only appears under its final
    /// name once the whole body has arrived.
    fn fetch_box(&self, name: &str, dest: &Path) -> Result<()> {
        let url = join_url(&self.url, name);
        let response = http_get(&url)?;
        let total = response
            .header("content-length")
            .and_then(|s| s.parse::<u64>().ok());

        output::detail(&format!("fetching {}", url));
        let pb = output::download_progress(&format!("downloading {}", name), total);
        let mut reader = pb.wrap_read(response.into_reader());

        let mut tmp = tempfile::NamedTempFile::new_in(&self.destination)?;
        std::io::copy(&mut reader, &mut tmp)
            .map_err(|e| BoxError::Download(format!("{}: {}", url, e)))?;
        tmp.flush()?;
        tmp.persist(dest).map_err(|e| BoxError::Io(e.error))?;

        output::progress_done(pb);
        Ok(())
    }
}

fn verify(entry: &ManifestEntry, path: &Path) -> Result<()> {
    let actual = hash::sha256_file(path)?.unwrap_or_default();
    if actual != entry.sha256 {
        return Err(BoxError::ChecksumMismatch {
            name: entry.name.clone(),
            expected: entry.sha256.clone(),
            actual,
        });
    }
    output::detail(&format!("{} has hash {}", entry.name, actual));
    Ok(())
}

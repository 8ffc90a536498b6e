//! File discovery and scanning

use crate::error::{Error, Result};
use crate::registry::{file_extension, FormatRegistry};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Source file found by a scan
#[derive(Debug, Clone)]
pub struct DiscoveredFile {
    pub path: PathBuf,
    /// Path below the scanned root, used to mirror the layout on output
    pub relative: PathBuf,
    pub size_bytes: u64,
}

/// Why a planned conversion will not run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Destination exists and `force` was not given
    Exists,
    /// Destination is one of the batch's own sources
    OverwritesSource,
    /// An earlier source already converts to the same destination
    DuplicateDestination,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SkipReason::Exists => "destination exists",
            SkipReason::OverwritesSource => "destination is a source file",
            SkipReason::DuplicateDestination => "destination already planned",
        })
    }
}

/// Source paired with the destination it converts to
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedConversion {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub skip: Option<SkipReason>,
}

impl PlannedConversion {
    pub fn is_skipped(&self) -> bool {
        self.skip.is_some()
    }
}

/// Scan a path (file or directory) for convertible sources
///
/// A single file is always accepted; resolution falls back to content
/// sniffing. Directory entries are kept only when their extension belongs
/// to a registered format.
pub fn scan(input: &Path, recursive: bool, registry: &FormatRegistry) -> Result<Vec<DiscoveredFile>> {
    if !input.exists() {
        return Err(Error::FileNotFound(input.to_path_buf()));
    }

    let mut files = Vec::new();

    if input.is_file() {
        let relative = input
            .file_name()
            .map(PathBuf::from)
            .unwrap_or_else(|| input.to_path_buf());
        files.push(DiscoveredFile {
            path: input.to_path_buf(),
            relative,
            size_bytes: std::fs::metadata(input)?.len(),
        });
        return Ok(files);
    }

    let extensions = registry.all_extensions();
    let walker = if recursive {
        WalkDir::new(input)
    } else {
        WalkDir::new(input).max_depth(1)
    };

    for entry in walker.sort_by_file_name().into_iter() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Skipping unreadable entry: {}", e);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let known = file_extension(path).is_some_and(|ext| extensions.contains(&ext));
        if !known {
            continue;
        }

        let relative = path.strip_prefix(input).unwrap_or(path).to_path_buf();
        let size_bytes = entry.metadata().map(|m| m.len()).unwrap_or(0);
        debug!("Discovered: {}", path.display());
        files.push(DiscoveredFile {
            path: path.to_path_buf(),
            relative,
            size_bytes,
        });
    }

    info!("Discovered {} audio files", files.len());

    if files.is_empty() {
        warn!("No supported audio files found in {}", input.display());
    }

    Ok(files)
}

/// Map each source to `output/<relative path>.<extension>`
///
/// A destination that is itself one of the sources is never written, with or
/// without `force`. When several sources map to one destination the first
/// keeps it.
pub fn plan(files: &[DiscoveredFile], output: &Path, extension: &str, force: bool) -> Vec<PlannedConversion> {
    let sources: HashSet<PathBuf> = files.iter().map(|file| normalize(&file.path)).collect();
    let mut claimed = HashSet::new();

    files
        .iter()
        .map(|file| {
            let destination = output.join(&file.relative).with_extension(extension);
            let key = normalize(&destination);

            let skip = if sources.contains(&key) {
                warn!(
                    "Skipping {}: {} is a source file",
                    file.path.display(),
                    destination.display()
                );
                Some(SkipReason::OverwritesSource)
            } else if !claimed.insert(key) {
                warn!(
                    "Skipping {}: another source already converts to {}",
                    file.path.display(),
                    destination.display()
                );
                Some(SkipReason::DuplicateDestination)
            } else if !force && destination.exists() {
                debug!("Skipping {}: {} exists", file.path.display(), destination.display());
                Some(SkipReason::Exists)
            } else {
                None
            };

            PlannedConversion {
                source: file.path.clone(),
                destination,
                skip,
            }
        })
        .collect()
}

/// Absolute form of a path that may not exist yet
fn normalize(path: &Path) -> PathBuf {
    if let Ok(canonical) = path.canonicalize() {
        return canonical;
    }
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) => normalize(parent).join(name),
        _ => path.to_path_buf(),
    }
}

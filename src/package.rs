//! Package Emitter
//!
//! Writes the in-memory file set to a directory or a zip archive. Both targets
//! are staged next to the destination and moved into place at the end, so a
//! failed export never leaves a partial package where the caller looks for it.

use std::collections::HashSet;
use std::fs;
use std::io::{self, Cursor, Seek, Write};
use std::path::{Component, Path, PathBuf};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::{ExportError, ExportResult};

const STAGING_PREFIX: &str = ".export-staging-";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileContents {
    Text(String),
    Binary(Vec<u8>),
}

/// One file of the exported project, addressed by a relative `/`-separated path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedFile {
    pub path: String,
    pub contents: FileContents,
}

impl ExportedFile {
    pub fn text(path: impl Into<String>, contents: impl Into<String>) -> Self {
        ExportedFile {
            path: path.into(),
            contents: FileContents::Text(contents.into()),
        }
    }

    pub fn binary(path: impl Into<String>, bytes: Vec<u8>) -> Self {
        ExportedFile {
            path: path.into(),
            contents: FileContents::Binary(bytes),
        }
    }

    pub fn bytes(&self) -> &[u8] {
        match &self.contents {
            FileContents::Text(text) => text.as_bytes(),
            FileContents::Binary(bytes) => bytes,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match &self.contents {
            FileContents::Text(text) => Some(text),
            FileContents::Binary(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackageTarget {
    Directory(PathBuf),
    Archive(PathBuf),
}

impl PackageTarget {
    /// `*.zip` paths become archives, anything else a directory.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let is_zip = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("zip"));
        if is_zip {
            PackageTarget::Archive(path)
        } else {
            PackageTarget::Directory(path)
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            PackageTarget::Directory(path) | PackageTarget::Archive(path) => path,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PATH SAFETY
// ═══════════════════════════════════════════════════════════════════════════════

fn invalid_path(path: &str, reason: &str) -> ExportError {
    ExportError::io(
        path,
        io::Error::new(io::ErrorKind::InvalidInput, reason.to_string()),
    )
}

/// Exported paths must stay inside the package root.
pub fn check_relative_path(path: &str) -> ExportResult<()> {
    if path.is_empty() {
        return Err(invalid_path(path, "empty path"));
    }
    if path.starts_with('/') || path.starts_with('\\') || path.contains(':') {
        return Err(invalid_path(path, "absolute path"));
    }
    for component in Path::new(path).components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            _ => return Err(invalid_path(path, "path escapes the package root")),
        }
    }
    Ok(())
}

fn checked_order(files: &[ExportedFile]) -> ExportResult<Vec<&ExportedFile>> {
    let mut seen = HashSet::new();
    for file in files {
        check_relative_path(&file.path)?;
        if !seen.insert(file.path.as_str()) {
            return Err(invalid_path(&file.path, "duplicate path"));
        }
    }
    let mut ordered: Vec<&ExportedFile> = files.iter().collect();
    ordered.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(ordered)
}

fn staging_parent(dest: &Path) -> ExportResult<PathBuf> {
    let parent = dest
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    fs::create_dir_all(&parent).map_err(|e| ExportError::io(&parent, e))?;
    Ok(parent)
}

// ═══════════════════════════════════════════════════════════════════════════════
// TARGETS
// ═══════════════════════════════════════════════════════════════════════════════

pub fn emit(files: &[ExportedFile], target: &PackageTarget) -> ExportResult<()> {
    match target {
        PackageTarget::Directory(dest) => emit_directory(files, dest),
        PackageTarget::Archive(dest) => emit_archive(files, dest),
    }
}

/// Write the package as a directory tree at `dest`. An existing empty directory
/// is replaced; a non-empty one is left alone and reported.
pub fn emit_directory(files: &[ExportedFile], dest: &Path) -> ExportResult<()> {
    let ordered = checked_order(files)?;
    let parent = staging_parent(dest)?;

    if dest.exists() {
        let empty_dir = dest.is_dir()
            && fs::read_dir(dest)
                .map_err(|e| ExportError::io(dest, e))?
                .next()
                .is_none();
        if !empty_dir {
            return Err(ExportError::io(
                dest,
                io::Error::new(io::ErrorKind::AlreadyExists, "destination is not empty"),
            ));
        }
    }

    let staging = tempfile::Builder::new()
        .prefix(STAGING_PREFIX)
        .tempdir_in(&parent)
        .map_err(|e| ExportError::io(&parent, e))?;

    for file in ordered {
        let path = staging.path().join(&file.path);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(|e| ExportError::io(dir, e))?;
        }
        fs::write(&path, file.bytes()).map_err(|e| ExportError::io(dest.join(&file.path), e))?;
    }

    if dest.exists() {
        fs::remove_dir(dest).map_err(|e| ExportError::io(dest, e))?;
    }
    let staged = staging.keep();
    if let Err(e) = fs::rename(&staged, dest) {
        let _ = fs::remove_dir_all(&staged);
        return Err(ExportError::io(dest, e));
    }
    tracing::debug!(path = %dest.display(), files = files.len(), "package written");
    Ok(())
}

/// Write the package as a zip archive at `dest`, replacing any existing file.
pub fn emit_archive(files: &[ExportedFile], dest: &Path) -> ExportResult<()> {
    let ordered = checked_order(files)?;
    let parent = staging_parent(dest)?;

    let mut staged = tempfile::Builder::new()
        .prefix(STAGING_PREFIX)
        .suffix(".zip")
        .tempfile_in(&parent)
        .map_err(|e| ExportError::io(&parent, e))?;
    write_archive(staged.as_file_mut(), &ordered).map_err(|e| ExportError::io(dest, e))?;
    staged
        .persist(dest)
        .map_err(|e| ExportError::io(dest, e.error))?;
    tracing::debug!(path = %dest.display(), files = files.len(), "archive written");
    Ok(())
}

/// Build the zip archive in memory.
pub fn emit_archive_bytes(files: &[ExportedFile]) -> ExportResult<Vec<u8>> {
    let ordered = checked_order(files)?;
    let cursor = write_archive(Cursor::new(Vec::new()), &ordered)
        .map_err(|e| ExportError::io("<memory>", e))?;
    Ok(cursor.into_inner())
}

fn write_archive<W: Write + Seek>(writer: W, files: &[&ExportedFile]) -> io::Result<W> {
    // Fixed timestamps keep archives byte-identical across runs.
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(zip::DateTime::default())
        .unix_permissions(0o644);

    let mut zip = ZipWriter::new(writer);
    for file in files {
        zip.start_file(file.path.as_str(), options)
            .map_err(io::Error::other)?;
        zip.write_all(file.bytes())?;
    }
    zip.finish().map_err(io::Error::other)
}

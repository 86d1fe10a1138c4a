// Archiver: packs a source directory into one zip file next to it.
//
// The archive is built on tokio's blocking pool. Entries are visited in
// file-name order with a fixed timestamp, so the same tree always yields
// the same entries in the same order.

use crate::error::{Result, ScanError};
use std::fs::{self, File};
use std::io::{self, BufWriter};
use std::path::{Component, Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime, ZipWriter};

/// A zip file produced from a source directory.
///
/// The value owns the file on disk and dropping it deletes the file. An
/// upload never leaves an archive behind, even when the surrounding future
/// is cancelled.
#[derive(Debug)]
pub struct ArchiveArtifact {
    source_dir: PathBuf,
    path: PathBuf,
    size: u64,
}

impl ArchiveArtifact {
    pub fn source_dir(&self) -> &Path {
        &self.source_dir
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Size in bytes of the compressed file.
    pub fn size(&self) -> u64 {
        self.size
    }
}

impl Drop for ArchiveArtifact {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "archive.removed"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "archive.remove_failed"),
        }
    }
}

/// Archive `source_dir` recursively. See module docs for the layout.
pub async fn archive(source_dir: &Path, cancel: &CancellationToken) -> Result<ArchiveArtifact> {
    let source_dir = source_dir.to_path_buf();
    let cancel = cancel.clone();
    tokio::task::spawn_blocking(move || archive_blocking(&source_dir, &cancel))
        .await
        .map_err(|e| ScanError::io("<archive task>", io::Error::other(e)))?
}

/// Synchronous body of `archive`, usable outside a runtime.
pub fn archive_blocking(source_dir: &Path, cancel: &CancellationToken) -> Result<ArchiveArtifact> {
    let source_dir = fs::canonicalize(source_dir).map_err(|e| ScanError::io(source_dir, e))?;
    let mut listing = fs::read_dir(&source_dir).map_err(|e| ScanError::io(&source_dir, e))?;
    if listing.next().is_none() {
        return Err(ScanError::EmptyInput { path: source_dir });
    }

    let out = output_path(&source_dir)?;
    info!(source = %source_dir.display(), out = %out.display(), "archive.start");
    let file = File::create(&out).map_err(|e| ScanError::io(&out, e))?;

    match write_entries(&source_dir, file, cancel) {
        Ok(entries) => {
            let size = fs::metadata(&out).map(|m| m.len()).map_err(|e| ScanError::io(&out, e));
            // Wrap first so a failed metadata call still removes the file.
            let mut artifact = ArchiveArtifact { source_dir, path: out, size: 0 };
            artifact.size = size?;
            info!(entries, size = artifact.size, "archive.done");
            Ok(artifact)
        }
        Err(e) => {
            if let Err(rm) = fs::remove_file(&out) {
                warn!(path = %out.display(), error = %rm, "archive.partial.remove_failed");
            }
            Err(e)
        }
    }
}

/// `<parent>/<dirname>-<8 hex>.zip`. The suffix keeps concurrent archives
/// of the same directory apart.
fn output_path(source_dir: &Path) -> Result<PathBuf> {
    let (Some(parent), Some(name)) = (source_dir.parent(), source_dir.file_name()) else {
        return Err(ScanError::io(
            source_dir,
            io::Error::new(io::ErrorKind::InvalidInput, "cannot archive a filesystem root"),
        ));
    };
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    Ok(parent.join(format!("{}-{}.zip", name.to_string_lossy(), &suffix[..8])))
}

fn write_entries(root: &Path, file: File, cancel: &CancellationToken) -> Result<usize> {
    let mut zip = ZipWriter::new(BufWriter::new(file));
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .compression_level(Some(9))
        .last_modified_time(DateTime::default());

    let mut count = 0usize;
    for entry in WalkDir::new(root).min_depth(1).sort_by_file_name() {
        if cancel.is_cancelled() {
            return Err(ScanError::Cancelled { job_id: None, last_status: None });
        }
        let entry = entry.map_err(|e| walk_error(root, e))?;
        let path = entry.path();
        let name = entry_name(root, path)?;
        if entry.file_type().is_dir() {
            zip.add_directory(name, options).map_err(|e| zip_error(path, e))?;
        } else if path.is_file() {
            // `is_file` follows symlinks, so a link to a file is stored as
            // the file it points to.
            zip.start_file(name, options).map_err(|e| zip_error(path, e))?;
            let mut src = File::open(path).map_err(|e| ScanError::io(path, e))?;
            io::copy(&mut src, &mut zip).map_err(|e| ScanError::io(path, e))?;
        } else {
            warn!(path = %path.display(), "archive.skip.unsupported_entry");
            continue;
        }
        count += 1;
    }
    let mut inner = zip.finish().map_err(|e| zip_error(root, e))?;
    io::Write::flush(&mut inner).map_err(|e| ScanError::io(root, e))?;
    debug!(count, "archive.entries.written");
    Ok(count)
}

/// Relative, `/`-separated entry name. Anything other than plain path
/// segments is refused so no entry can escape the archive root.
fn entry_name(root: &Path, path: &Path) -> Result<String> {
    let rel = path.strip_prefix(root).map_err(|_| {
        ScanError::io(path, io::Error::new(io::ErrorKind::InvalidData, "entry outside source directory"))
    })?;
    let mut parts = Vec::new();
    for comp in rel.components() {
        match comp {
            Component::Normal(s) => parts.push(s.to_string_lossy().into_owned()),
            _ => {
                return Err(ScanError::io(
                    path,
                    io::Error::new(io::ErrorKind::InvalidData, "unexpected path component"),
                ))
            }
        }
    }
    Ok(parts.join("/"))
}

fn walk_error(root: &Path, e: walkdir::Error) -> ScanError {
    let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| root.to_path_buf());
    let source = e.into_io_error().unwrap_or_else(|| io::Error::other("directory walk failed"));
    ScanError::io(path, source)
}

fn zip_error(path: &Path, e: zip::result::ZipError) -> ScanError {
    match e {
        zip::result::ZipError::Io(source) => ScanError::io(path, source),
        other => ScanError::io(path, io::Error::other(other)),
    }
}

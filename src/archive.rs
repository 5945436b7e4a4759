//! Zip extraction for job inputs and zip creation for release archives.
//!
//! Both run synchronously; async callers go through `spawn_blocking`.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter};
use std::path::{Path, PathBuf};

use tracing::{debug, info};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::WorkerError;

/// Extracts `zip_path` into `dest`, returning the number of files written.
/// Entries that would land outside `dest` abort the extraction.
pub fn unzip(zip_path: &Path, dest: &Path) -> Result<usize, WorkerError> {
    let file = File::open(zip_path)
        .map_err(|e| WorkerError::io(format!("failed to open {}", zip_path.display()), e))?;
    let mut archive = ZipArchive::new(BufReader::new(file))?;

    fs::create_dir_all(dest)
        .map_err(|e| WorkerError::io(format!("failed to create {}", dest.display()), e))?;

    let mut written = 0;
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        let Some(relative) = entry.enclosed_name() else {
            return Err(WorkerError::Stage(format!(
                "illegal file path in archive: {}",
                entry.name()
            )));
        };
        let out_path = dest.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&out_path)
                .map_err(|e| WorkerError::io(format!("failed to create {}", out_path.display()), e))?;
            continue;
        }

        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| WorkerError::io(format!("failed to create {}", parent.display()), e))?;
        }
        let out_err = |e| WorkerError::io(format!("failed to extract {}", out_path.display()), e);
        let mut out = BufWriter::new(File::create(&out_path).map_err(out_err)?);
        io::copy(&mut entry, &mut out).map_err(out_err)?;
        written += 1;
    }

    info!(archive = %zip_path.display(), dest = %dest.display(), files = written, "extracted");
    Ok(written)
}

/// Writes `entries` (source path, name inside the archive) into a new zip at `out`.
pub fn zip_files(entries: &[(PathBuf, String)], out: &Path) -> Result<(), WorkerError> {
    if let Some(parent) = out.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .map_err(|e| WorkerError::io(format!("failed to create {}", parent.display()), e))?;
    }
    let file = File::create(out)
        .map_err(|e| WorkerError::io(format!("failed to create {}", out.display()), e))?;
    let mut zip = ZipWriter::new(BufWriter::new(file));

    for (source, name) in entries {
        let src_err = |e| WorkerError::io(format!("failed to read {}", source.display()), e);
        let size = fs::metadata(source).map_err(src_err)?.len();
        let options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .large_file(size >= u32::MAX as u64);
        zip.start_file(name.as_str(), options)?;
        let mut reader = BufReader::new(File::open(source).map_err(src_err)?);
        io::copy(&mut reader, &mut zip).map_err(src_err)?;
        debug!(entry = %name, bytes = size, "archived");
    }

    zip.finish()?;
    info!(archive = %out.display(), files = entries.len(), "archive written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn zip_then_unzip_preserves_tree() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.txt");
        let b = dir.path().join("b.bin");
        fs::write(&a, "alpha").unwrap();
        fs::write(&b, [0u8, 1, 2, 3]).unwrap();

        let out = dir.path().join("out/release.zip");
        zip_files(
            &[
                (a.clone(), "Metaverse/a.txt".into()),
                (b.clone(), "Metaverse/Binaries/b.bin".into()),
            ],
            &out,
        )
        .unwrap();

        let dest = dir.path().join("extracted");
        assert_eq!(unzip(&out, &dest).unwrap(), 2);
        assert_eq!(fs::read_to_string(dest.join("Metaverse/a.txt")).unwrap(), "alpha");
        assert_eq!(fs::read(dest.join("Metaverse/Binaries/b.bin")).unwrap(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn unzip_rejects_path_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let zip_path = dir.path().join("evil.zip");
        {
            let mut zip = ZipWriter::new(File::create(&zip_path).unwrap());
            zip.start_file("../escape.txt", SimpleFileOptions::default()).unwrap();
            zip.write_all(b"gotcha").unwrap();
            zip.finish().unwrap();
        }

        let dest = dir.path().join("content");
        let err = unzip(&zip_path, &dest).unwrap_err();
        assert!(err.to_string().contains("illegal file path"));
        assert!(!dir.path().join("escape.txt").exists());
    }

    #[test]
    fn unzip_missing_archive_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = unzip(&dir.path().join("none.zip"), dir.path()).unwrap_err();
        assert!(matches!(err, WorkerError::Io { .. }));
    }

    #[test]
    fn zip_missing_source_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = zip_files(
            &[(dir.path().join("gone"), "gone".into())],
            &dir.path().join("x.zip"),
        )
        .unwrap_err();
        assert!(err.to_string().contains("failed to read"));
    }
}

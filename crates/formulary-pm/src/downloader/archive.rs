//! Archive extraction (zip, tar, tar.gz, tar.bz2, tar.xz).

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;

use crate::error::InstallError;

/// Supported archive types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveType {
    Zip,
    Tar,
    TarGz,
    TarBz2,
    TarXz,
}

impl ArchiveType {
    /// Detect archive type from file extension
    pub fn from_path(path: &Path) -> Option<Self> {
        let path_str = path.to_string_lossy().to_lowercase();

        if path_str.ends_with(".zip") {
            Some(ArchiveType::Zip)
        } else if path_str.ends_with(".tar.gz") || path_str.ends_with(".tgz") {
            Some(ArchiveType::TarGz)
        } else if path_str.ends_with(".tar.bz2") || path_str.ends_with(".tbz2") {
            Some(ArchiveType::TarBz2)
        } else if path_str.ends_with(".tar.xz") || path_str.ends_with(".txz") {
            Some(ArchiveType::TarXz)
        } else if path_str.ends_with(".tar") {
            Some(ArchiveType::Tar)
        } else {
            None
        }
    }
}

/// Archive extractor
pub struct ArchiveExtractor;

impl ArchiveExtractor {
    /// Unpack a fetched artifact into `dest_dir` and return the directory that
    /// install steps resolve their sources against.
    ///
    /// `file_name` is the artifact's name at its source URL. Anything that is
    /// not a recognised archive is staged as a single file under that name.
    /// When an archive holds exactly one top-level directory (the layout
    /// GitHub release tarballs use), that directory is the content root.
    pub fn unpack(artifact: &Path, file_name: &str, dest_dir: &Path) -> Result<PathBuf, InstallError> {
        std::fs::create_dir_all(dest_dir)?;

        let Some(archive_type) = ArchiveType::from_path(Path::new(file_name)) else {
            log::debug!("{} is not an archive, staging as a plain file", file_name);
            std::fs::copy(artifact, dest_dir.join(file_name))?;
            return Ok(dest_dir.to_path_buf());
        };

        Self::extract_with_type(artifact, dest_dir, archive_type)?;
        Self::content_root(dest_dir)
    }

    /// Extract an archive with explicit type
    pub fn extract_with_type(
        archive_path: &Path,
        dest_dir: &Path,
        archive_type: ArchiveType,
    ) -> Result<(), InstallError> {
        std::fs::create_dir_all(dest_dir)?;

        match archive_type {
            ArchiveType::Zip => Self::extract_zip(archive_path, dest_dir),
            ArchiveType::Tar => {
                let reader = BufReader::new(File::open(archive_path)?);
                Self::extract_tar_reader(reader, dest_dir)
            }
            ArchiveType::TarGz => {
                let reader = BufReader::new(File::open(archive_path)?);
                Self::extract_tar_reader(GzDecoder::new(reader), dest_dir)
            }
            ArchiveType::TarBz2 => {
                use bzip2::read::BzDecoder;

                let reader = BufReader::new(File::open(archive_path)?);
                Self::extract_tar_reader(BzDecoder::new(reader), dest_dir)
            }
            ArchiveType::TarXz => {
                use xz2::read::XzDecoder;

                let reader = BufReader::new(File::open(archive_path)?);
                Self::extract_tar_reader(XzDecoder::new(reader), dest_dir)
            }
        }
    }

    /// Extract a zip archive
    fn extract_zip(archive_path: &Path, dest_dir: &Path) -> Result<(), InstallError> {
        let file = File::open(archive_path)?;
        let reader = BufReader::new(file);
        let mut archive = zip::ZipArchive::new(reader)
            .map_err(|e| InstallError::Archive(format!("Failed to open zip: {}", e)))?;

        for i in 0..archive.len() {
            let mut file = archive
                .by_index(i)
                .map_err(|e| InstallError::Archive(format!("Failed to read zip entry: {}", e)))?;

            let relative_path = file.enclosed_name().ok_or_else(|| {
                InstallError::Archive(format!("Path traversal detected in archive: {}", file.name()))
            })?;
            let outpath = dest_dir.join(relative_path);

            if file.is_dir() {
                std::fs::create_dir_all(&outpath)?;
                continue;
            }

            if let Some(parent) = outpath.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut outfile = File::create(&outpath)?;
            std::io::copy(&mut file, &mut outfile)?;

            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                if let Some(mode) = file.unix_mode() {
                    std::fs::set_permissions(&outpath, std::fs::Permissions::from_mode(mode))?;
                }
            }
        }

        Ok(())
    }

    /// Extract from a tar reader; entries that would land outside
    /// `dest_dir` abort the extraction.
    fn extract_tar_reader<R: Read>(reader: R, dest_dir: &Path) -> Result<(), InstallError> {
        let mut archive = tar::Archive::new(reader);
        archive.set_preserve_permissions(true);

        let entries = archive
            .entries()
            .map_err(|e| InstallError::Archive(format!("Failed to read tar: {}", e)))?;

        for entry in entries {
            let mut entry =
                entry.map_err(|e| InstallError::Archive(format!("Failed to read tar entry: {}", e)))?;

            let display = entry
                .path()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|_| "<invalid path>".to_string());

            let unpacked = entry
                .unpack_in(dest_dir)
                .map_err(|e| InstallError::Archive(format!("Failed to extract {}: {}", display, e)))?;
            if !unpacked {
                return Err(InstallError::Archive(format!(
                    "Path traversal detected in archive: {}",
                    display
                )));
            }
        }

        Ok(())
    }

    /// Descend into a lone top-level directory.
    fn content_root(dest_dir: &Path) -> Result<PathBuf, InstallError> {
        let mut entries = std::fs::read_dir(dest_dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            // pax_global_header entries carry no content
            .filter(|path| path.file_name().map_or(true, |n| n != "pax_global_header"));

        match (entries.next(), entries.next()) {
            (Some(only), None) if only.is_dir() => Ok(only),
            _ => Ok(dest_dir.to_path_buf()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    use flate2::write::GzEncoder;
    use flate2::Compression;
    use tempfile::TempDir;
    use zip::write::SimpleFileOptions;

    fn write_tar<W: Write>(writer: W, entries: &[(&str, &[u8])]) -> W {
        let mut builder = tar::Builder::new(writer);
        for (name, data) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, *data).unwrap();
        }
        builder.into_inner().unwrap()
    }

    fn write_tar_gz(path: &Path, entries: &[(&str, &[u8])]) {
        let encoder = GzEncoder::new(File::create(path).unwrap(), Compression::default());
        write_tar(encoder, entries).finish().unwrap();
    }

    fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
        let mut zip = zip::ZipWriter::new(File::create(path).unwrap());
        let options = SimpleFileOptions::default().unix_permissions(0o755);
        for (name, data) in entries {
            zip.start_file(*name, options).unwrap();
            zip.write_all(data).unwrap();
        }
        zip.finish().unwrap();
    }

    const ENTRIES: &[(&str, &[u8])] = &[
        ("macchanger-1.0.0/macchanger.sh", b"#!/bin/sh\necho 'Version: 1.0.0'\n"),
        ("macchanger-1.0.0/README.md", b"readme"),
    ];

    fn assert_unpacks(archive: &Path, file_name: &str) {
        let dest = archive.with_file_name("src");
        let root = ArchiveExtractor::unpack(archive, file_name, &dest).unwrap();
        assert_eq!(root, dest.join("macchanger-1.0.0"));
        assert_eq!(std::fs::read(root.join("macchanger.sh")).unwrap(), ENTRIES[0].1);
        assert_eq!(std::fs::read(root.join("README.md")).unwrap(), b"readme");
    }

    #[test]
    fn test_archive_type_from_path() {
        assert_eq!(ArchiveType::from_path(Path::new("package.zip")), Some(ArchiveType::Zip));
        assert_eq!(ArchiveType::from_path(Path::new("v1.0.0.tar.gz")), Some(ArchiveType::TarGz));
        assert_eq!(ArchiveType::from_path(Path::new("package.tgz")), Some(ArchiveType::TarGz));
        assert_eq!(ArchiveType::from_path(Path::new("package.tar.bz2")), Some(ArchiveType::TarBz2));
        assert_eq!(ArchiveType::from_path(Path::new("package.tar.xz")), Some(ArchiveType::TarXz));
        assert_eq!(ArchiveType::from_path(Path::new("package.tar")), Some(ArchiveType::Tar));
        assert_eq!(ArchiveType::from_path(Path::new("macchanger.sh")), None);
    }

    #[test]
    fn test_unpack_strips_single_top_level_dir() {
        let temp = TempDir::new().unwrap();
        let archive = temp.path().join("artifact");
        write_tar_gz(
            &archive,
            &[
                ("macchanger-1.0.0/macchanger.sh", b"#!/bin/sh\n"),
                ("macchanger-1.0.0/README.md", b"readme"),
            ],
        );

        let dest = temp.path().join("src");
        let root = ArchiveExtractor::unpack(&archive, "v1.0.0.tar.gz", &dest).unwrap();
        assert_eq!(root, dest.join("macchanger-1.0.0"));
        assert!(root.join("macchanger.sh").is_file());
    }

    #[test]
    fn test_unpack_keeps_flat_layout() {
        let temp = TempDir::new().unwrap();
        let archive = temp.path().join("artifact");
        write_tar_gz(&archive, &[("a.sh", b"a"), ("b.sh", b"b")]);

        let dest = temp.path().join("src");
        let root = ArchiveExtractor::unpack(&archive, "tool.tgz", &dest).unwrap();
        assert_eq!(root, dest);
        assert!(root.join("a.sh").is_file());
        assert!(root.join("b.sh").is_file());
    }

    #[test]
    fn test_unpack_plain_file() {
        let temp = TempDir::new().unwrap();
        let artifact = temp.path().join("download");
        std::fs::write(&artifact, b"#!/bin/sh\necho hi\n").unwrap();

        let dest = temp.path().join("src");
        let root = ArchiveExtractor::unpack(&artifact, "macchanger.sh", &dest).unwrap();
        assert_eq!(root, dest);
        assert_eq!(std::fs::read(root.join("macchanger.sh")).unwrap(), b"#!/bin/sh\necho hi\n");
    }

    #[test]
    fn test_unpack_rejects_corrupt_archive() {
        let temp = TempDir::new().unwrap();
        let artifact = temp.path().join("download");
        std::fs::write(&artifact, b"definitely not gzip").unwrap();

        let err = ArchiveExtractor::unpack(&artifact, "tool.tar.gz", &temp.path().join("src")).unwrap_err();
        assert!(matches!(err, InstallError::Archive(_)));
    }

    #[test]
    fn test_unpack_zip() {
        let temp = TempDir::new().unwrap();
        let archive = temp.path().join("artifact");
        write_zip(&archive, ENTRIES);
        assert_unpacks(&archive, "macchanger-1.0.0.zip");

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let script = temp.path().join("src/macchanger-1.0.0/macchanger.sh");
            assert_ne!(std::fs::metadata(script).unwrap().permissions().mode() & 0o111, 0);
        }
    }

    #[test]
    fn test_unpack_zip_rejects_traversal() {
        let temp = TempDir::new().unwrap();
        let archive = temp.path().join("artifact");
        write_zip(&archive, &[("ok.sh", b"ok"), ("../evil", b"evil")]);

        let err = ArchiveExtractor::unpack(&archive, "tool.zip", &temp.path().join("src")).unwrap_err();
        assert!(matches!(err, InstallError::Archive(ref reason) if reason.contains("traversal")));
        assert!(!temp.path().join("evil").exists());
    }

    #[test]
    fn test_unpack_tar_bz2() {
        use bzip2::write::BzEncoder;

        let temp = TempDir::new().unwrap();
        let archive = temp.path().join("artifact");
        let encoder = BzEncoder::new(File::create(&archive).unwrap(), bzip2::Compression::default());
        write_tar(encoder, ENTRIES).finish().unwrap();
        assert_unpacks(&archive, "v1.0.0.tar.bz2");
    }

    #[test]
    fn test_unpack_tar_xz() {
        use xz2::write::XzEncoder;

        let temp = TempDir::new().unwrap();
        let archive = temp.path().join("artifact");
        let encoder = XzEncoder::new(File::create(&archive).unwrap(), 6);
        write_tar(encoder, ENTRIES).finish().unwrap();
        assert_unpacks(&archive, "v1.0.0.tar.xz");
    }

    #[test]
    fn test_unpack_plain_tar() {
        let temp = TempDir::new().unwrap();
        let archive = temp.path().join("artifact");
        write_tar(File::create(&archive).unwrap(), ENTRIES);
        assert_unpacks(&archive, "v1.0.0.tar");
    }
}

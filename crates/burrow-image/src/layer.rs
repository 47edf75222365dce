//! Filesystem layer extraction.
//!
//! A layer blob is decompressed and walked entry by entry; content is
//! copied straight from the archive into the destination file, so no more
//! than one entry's read buffer is ever held in memory. Later layers
//! overwrite earlier ones at the same path.

use std::fs::{self, File};
use std::io::{self, Read};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use burrow_common::error::{BurrowError, Result};
use burrow_common::types::CancelToken;

use crate::path::{ContainedRoot, relative_link_target};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Compression applied to a layer blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    /// Gzip-compressed tar.
    Gzip,
    /// Uncompressed tar.
    None,
}

impl Compression {
    /// Determines the compression from a layer media type.
    ///
    /// # Errors
    ///
    /// Returns `BurrowError::UnsupportedLayer` for compressions other than
    /// gzip, and for media types that are not tar layers.
    pub fn from_media_type(media_type: &str) -> Result<Self> {
        let base = media_type.split(';').next().unwrap_or_default().trim();
        if base.ends_with(".tar.gzip") || base.ends_with(".tar+gzip") || base.ends_with(".tar.gz") {
            Ok(Self::Gzip)
        } else if base.ends_with(".tar") || base.ends_with(".tar.v1") {
            Ok(Self::None)
        } else {
            Err(BurrowError::UnsupportedLayer {
                media_type: media_type.to_string(),
            })
        }
    }
}

/// Kind of a tar entry, as far as extraction is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// A directory.
    Directory,
    /// A regular file.
    Regular,
    /// A symbolic link.
    Symlink,
    /// A hard link to an earlier entry.
    HardLink,
    /// Devices, fifos, and anything else; skipped.
    Other,
}

impl From<tar::EntryType> for EntryKind {
    fn from(entry_type: tar::EntryType) -> Self {
        if entry_type.is_dir() {
            Self::Directory
        } else if entry_type.is_file() || entry_type.is_contiguous() {
            Self::Regular
        } else if entry_type.is_symlink() {
            Self::Symlink
        } else if entry_type.is_hard_link() {
            Self::HardLink
        } else {
            Self::Other
        }
    }
}

/// Header fields of one archive entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TarEntry {
    /// Entry kind.
    pub kind: EntryKind,
    /// Entry name as stored in the archive.
    pub name: PathBuf,
    /// Link target for symlinks and hard links.
    pub link_target: Option<PathBuf>,
    /// Permission bits, including setuid/setgid/sticky.
    pub mode: u32,
    /// Content size in bytes.
    pub size: u64,
}

impl TarEntry {
    fn read<R: Read>(entry: &tar::Entry<'_, R>) -> io::Result<Self> {
        let header = entry.header();
        Ok(Self {
            kind: header.entry_type().into(),
            name: entry.path()?.into_owned(),
            link_target: entry.link_name()?.map(std::borrow::Cow::into_owned),
            mode: header.mode()? & 0o7777,
            size: header.size()?,
        })
    }
}

/// Counters describing one extracted layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractStats {
    /// Directories created.
    pub directories: u64,
    /// Regular files written.
    pub files: u64,
    /// Symlinks created.
    pub symlinks: u64,
    /// Hard links created.
    pub hard_links: u64,
    /// Entries skipped because of their kind.
    pub skipped: u64,
    /// Bytes of file content written.
    pub bytes: u64,
}

/// Decompresses `stream` and unpacks every entry under `root`.
///
/// # Errors
///
/// Returns `BurrowError::Extraction` when the decompression stream cannot
/// be opened, the archive is malformed, or a filesystem operation fails
/// (a missing target while applying a mode is tolerated).
/// Returns `BurrowError::PathTraversal` for entries escaping `root`, and
/// `BurrowError::Cancelled` once `cancel` is set.
pub fn extract<R: Read>(
    stream: R,
    root: &Path,
    compression: Compression,
    cancel: &CancelToken,
) -> Result<ExtractStats> {
    let fail = |path: &Path, err: io::Error| {
        if cancel.is_cancelled() {
            BurrowError::Cancelled
        } else {
            BurrowError::extraction(path, err)
        }
    };

    let decoded: Box<dyn Read + '_> = match compression {
        Compression::Gzip => {
            let mut stream = stream;
            let head = read_head(&mut stream).map_err(|e| fail(root, e))?;
            if head != GZIP_MAGIC {
                return Err(fail(
                    root,
                    io::Error::new(io::ErrorKind::InvalidData, "layer is not a gzip stream"),
                ));
            }
            // Layers may be written as several concatenated gzip members.
            Box::new(flate2::read::MultiGzDecoder::new(io::Cursor::new(head).chain(stream)))
        }
        Compression::None => Box::new(stream),
    };

    let root = ContainedRoot::open(root, |path, e| BurrowError::extraction(path, e))?;
    let mut archive = tar::Archive::new(decoded);
    let mut stats = ExtractStats::default();
    for entry in archive.entries().map_err(|e| fail(root.path(), e))? {
        cancel.check()?;
        let mut entry = entry.map_err(|e| fail(root.path(), e))?;
        let header = TarEntry::read(&entry).map_err(|e| fail(root.path(), e))?;
        unpack_entry(&mut entry, &header, &root, &mut stats).map_err(|err| match err {
            BurrowError::Extraction { .. } if cancel.is_cancelled() => BurrowError::Cancelled,
            other => other,
        })?;
    }
    Ok(stats)
}

/// Reads the first two bytes of `stream`, tolerating short reads.
fn read_head<R: Read>(stream: &mut R) -> io::Result<[u8; 2]> {
    let mut head = [0u8; 2];
    let mut filled = 0;
    while filled < head.len() {
        match stream.read(&mut head[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(head)
}

fn unpack_entry<R: Read>(
    content: &mut R,
    entry: &TarEntry,
    root: &ContainedRoot,
    stats: &mut ExtractStats,
) -> Result<()> {
    if entry.kind == EntryKind::Directory {
        let path = root.create_dir(&entry.name)?;
        tracing::trace!(path = %path.display(), "unpack dir");
        stats.directories += 1;
        return apply_mode(root, &path, entry);
    }
    if entry.kind == EntryKind::Other {
        tracing::debug!(name = %entry.name.display(), "skipping unsupported entry kind");
        stats.skipped += 1;
        return Ok(());
    }

    let (parent, path) = root.prepare_parent(&entry.name)?;
    let io_err = |e: io::Error| BurrowError::extraction(&path, e);
    clear_slot(&path).map_err(io_err)?;

    match entry.kind {
        EntryKind::Regular => {
            tracing::trace!(path = %path.display(), size = entry.size, "unpack file");
            let mut file = File::create(&path).map_err(io_err)?;
            stats.bytes += io::copy(content, &mut file).map_err(io_err)?;
            drop(file);
            stats.files += 1;
        }
        EntryKind::Symlink => {
            let target = entry.link_target.as_deref().unwrap_or_else(|| Path::new(""));
            let link = relative_link_target(root.relative(&parent), target);
            tracing::trace!(path = %path.display(), link = %link.display(), "create symlink");
            std::os::unix::fs::symlink(&link, &path).map_err(io_err)?;
            stats.symlinks += 1;
        }
        EntryKind::HardLink => {
            let target = entry.link_target.as_deref().unwrap_or_else(|| Path::new(""));
            let source = root.locate(target)?;
            tracing::trace!(path = %path.display(), source = %source.display(), "create hard link");
            fs::hard_link(&source, &path).map_err(io_err)?;
            stats.hard_links += 1;
        }
        EntryKind::Directory | EntryKind::Other => {}
    }

    apply_mode(root, &path, entry)
}

/// Sets the entry's mode on whatever `path` resolves to.
///
/// A missing target is tolerated: a symlink may point at a path that a
/// later entry (or no entry) provides. A target outside the root is
/// rejected.
fn apply_mode(root: &ContainedRoot, path: &Path, entry: &TarEntry) -> Result<()> {
    let Some(target) = root.resolve_existing(path, &entry.name)? else {
        tracing::trace!(path = %path.display(), "mode target missing, skipped");
        return Ok(());
    };
    match fs::set_permissions(&target, fs::Permissions::from_mode(entry.mode)) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(BurrowError::extraction(target, e)),
    }
}

/// Unlinks anything but a directory at `path`, so a new entry never
/// writes through an earlier file or link.
fn clear_slot(path: &Path) -> io::Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if !meta.is_dir() => fs::remove_file(path),
        Ok(_) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::MetadataExt;

    fn file_header(size: usize, mode: u32) -> tar::Header {
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Regular);
        header.set_size(size as u64);
        header.set_mode(mode);
        header.set_cksum();
        header
    }

    fn dir_header(mode: u32) -> tar::Header {
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Directory);
        header.set_size(0);
        header.set_mode(mode);
        header.set_cksum();
        header
    }

    fn symlink_header() -> tar::Header {
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Symlink);
        header.set_size(0);
        header.set_mode(0o777);
        header
    }

    fn gzip(tar_bytes: &[u8]) -> Vec<u8> {
        use std::io::Write;
        let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(tar_bytes).expect("gzip write");
        encoder.finish().expect("gzip finish")
    }

    fn build_tar(fill: impl FnOnce(&mut tar::Builder<Vec<u8>>)) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        fill(&mut builder);
        builder.into_inner().expect("finish tar")
    }

    fn extract_gz(tar_bytes: &[u8], root: &Path) -> Result<ExtractStats> {
        extract(&gzip(tar_bytes)[..], root, Compression::Gzip, &CancelToken::new())
    }

    #[test]
    fn media_types_map_to_compression() {
        assert_eq!(
            Compression::from_media_type("application/vnd.docker.image.rootfs.diff.tar.gzip")
                .unwrap(),
            Compression::Gzip
        );
        assert_eq!(
            Compression::from_media_type("application/vnd.oci.image.layer.v1.tar+gzip").unwrap(),
            Compression::Gzip
        );
        assert_eq!(
            Compression::from_media_type("application/vnd.oci.image.layer.v1.tar").unwrap(),
            Compression::None
        );
        assert!(matches!(
            Compression::from_media_type("application/vnd.oci.image.layer.v1.tar+zstd"),
            Err(BurrowError::UnsupportedLayer { .. })
        ));
    }

    #[test]
    fn extracts_dirs_and_files_with_modes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let data = b"#!/bin/sh\necho hi\n";
        let tar_bytes = build_tar(|b| {
            b.append_data(&mut dir_header(0o750), "usr/bin/", &[][..])
                .expect("append dir");
            b.append_data(&mut file_header(data.len(), 0o755), "usr/bin/hi", &data[..])
                .expect("append file");
        });

        let stats = extract_gz(&tar_bytes, dir.path()).expect("extract");
        assert_eq!(stats.files, 1);
        assert_eq!(stats.bytes, data.len() as u64);

        let file = dir.path().join("usr/bin/hi");
        assert_eq!(fs::read(&file).expect("read"), data);
        assert_eq!(fs::metadata(&file).expect("meta").mode() & 0o7777, 0o755);
        let bin = dir.path().join("usr/bin");
        assert_eq!(fs::metadata(&bin).expect("meta").mode() & 0o7777, 0o750);
    }

    #[test]
    fn creates_missing_parents_for_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let tar_bytes = build_tar(|b| {
            b.append_data(&mut file_header(2, 0o644), "deep/nested/f", &b"ok"[..])
                .expect("append");
        });
        let _ = extract_gz(&tar_bytes, dir.path()).expect("extract");
        assert!(dir.path().join("deep/nested/f").is_file());
    }

    #[test]
    fn relative_symlink_resolves_inside_root() {
        let dir = tempfile::tempdir().expect("tempdir");
        let tar_bytes = build_tar(|b| {
            b.append_data(&mut file_header(3, 0o644), "usr/shared/lib.so", &b"lib"[..])
                .expect("append lib");
            b.append_link(&mut symlink_header(), "usr/bin/app", "../shared/lib.so")
                .expect("append link");
        });
        let stats = extract_gz(&tar_bytes, dir.path()).expect("extract");
        assert_eq!(stats.symlinks, 1);

        let link = dir.path().join("usr/bin/app");
        assert_eq!(
            fs::read_link(&link).expect("readlink"),
            Path::new("../shared/lib.so")
        );
        assert_eq!(
            fs::canonicalize(&link).expect("canonicalize"),
            fs::canonicalize(dir.path().join("usr/shared/lib.so")).expect("canonicalize")
        );
    }

    #[test]
    fn absolute_symlink_is_rewritten_relative() {
        let dir = tempfile::tempdir().expect("tempdir");
        let tar_bytes = build_tar(|b| {
            b.append_data(&mut file_header(2, 0o755), "bin/busybox", &b"bb"[..])
                .expect("append");
            b.append_link(&mut symlink_header(), "usr/bin/env", "/bin/busybox")
                .expect("append link");
        });
        let _ = extract_gz(&tar_bytes, dir.path()).expect("extract");
        assert_eq!(
            fs::read_link(dir.path().join("usr/bin/env")).expect("readlink"),
            Path::new("../../bin/busybox")
        );
        assert_eq!(fs::read(dir.path().join("usr/bin/env")).expect("read"), b"bb");
    }

    #[test]
    fn dangling_symlink_mode_is_tolerated() {
        let dir = tempfile::tempdir().expect("tempdir");
        let tar_bytes = build_tar(|b| {
            b.append_link(&mut symlink_header(), "lib/missing.so", "/nowhere/lib.so")
                .expect("append link");
        });
        let stats = extract_gz(&tar_bytes, dir.path()).expect("dangling link must not abort");
        assert_eq!(stats.symlinks, 1);
        assert!(
            fs::symlink_metadata(dir.path().join("lib/missing.so"))
                .expect("meta")
                .file_type()
                .is_symlink()
        );
    }

    #[test]
    fn hard_link_shares_content() {
        let dir = tempfile::tempdir().expect("tempdir");
        let tar_bytes = build_tar(|b| {
            b.append_data(&mut file_header(2, 0o755), "bin/busybox", &b"bb"[..])
                .expect("append");
            let mut header = tar::Header::new_gnu();
            header.set_entry_type(tar::EntryType::Link);
            header.set_size(0);
            header.set_mode(0o755);
            b.append_link(&mut header, "bin/echo", "bin/busybox")
                .expect("append hard link");
        });
        let stats = extract_gz(&tar_bytes, dir.path()).expect("extract");
        assert_eq!(stats.hard_links, 1);
        let a = fs::metadata(dir.path().join("bin/busybox")).expect("meta");
        let b = fs::metadata(dir.path().join("bin/echo")).expect("meta");
        assert_eq!(a.ino(), b.ino());
    }

    #[test]
    fn later_entry_overwrites_earlier() {
        let dir = tempfile::tempdir().expect("tempdir");
        let first = build_tar(|b| {
            b.append_data(&mut file_header(5, 0o600), "etc/motd", &b"first"[..])
                .expect("append");
        });
        let second = build_tar(|b| {
            b.append_data(&mut file_header(3, 0o644), "etc/motd", &b"2nd"[..])
                .expect("append");
        });
        let _ = extract_gz(&first, dir.path()).expect("first layer");
        let _ = extract_gz(&second, dir.path()).expect("second layer");

        let motd = dir.path().join("etc/motd");
        assert_eq!(fs::read(&motd).expect("read"), b"2nd");
        assert_eq!(fs::metadata(&motd).expect("meta").mode() & 0o7777, 0o644);
    }

    #[test]
    fn file_replacing_symlink_does_not_write_through() {
        let dir = tempfile::tempdir().expect("tempdir");
        let first = build_tar(|b| {
            b.append_data(&mut file_header(4, 0o644), "real", &b"keep"[..])
                .expect("append");
            b.append_link(&mut symlink_header(), "alias", "real")
                .expect("append link");
        });
        let second = build_tar(|b| {
            b.append_data(&mut file_header(3, 0o644), "alias", &b"new"[..])
                .expect("append");
        });
        let _ = extract_gz(&first, dir.path()).expect("first layer");
        let _ = extract_gz(&second, dir.path()).expect("second layer");

        assert_eq!(fs::read(dir.path().join("real")).expect("read"), b"keep");
        assert_eq!(fs::read(dir.path().join("alias")).expect("read"), b"new");
    }

    #[test]
    fn traversal_entry_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path().join("root");
        fs::create_dir(&root).expect("mkdir");

        // `Builder::append_data` refuses `..`, so write the name into the raw header.
        let mut header = file_header(4, 0o644);
        header.as_old_mut().name[..16].copy_from_slice(b"../../etc/passwd");
        header.set_cksum();
        let tar_bytes = build_tar(|b| {
            b.append(&header, &b"evil"[..]).expect("append");
        });

        let err = extract_gz(&tar_bytes, &root).unwrap_err();
        assert!(matches!(err, BurrowError::PathTraversal { .. }));
        assert!(!dir.path().join("etc/passwd").exists());
    }

    #[test]
    fn chained_root_links_stay_inside_root() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path().join("root");
        fs::create_dir(&root).expect("mkdir");

        let tar_bytes = build_tar(|b| {
            b.append_link(&mut symlink_header(), "x", "/").expect("append link");
            b.append_link(&mut symlink_header(), "x/L", "/").expect("append link");
            b.append_data(&mut file_header(5, 0o644), "L/pwned", &b"owned"[..])
                .expect("append");
        });
        let _ = extract_gz(&tar_bytes, &root).expect("extract");

        assert!(!dir.path().join("pwned").exists());
        assert_eq!(fs::read_link(root.join("L")).expect("readlink"), Path::new("."));
        assert_eq!(fs::read(root.join("pwned")).expect("read"), b"owned");
    }

    #[test]
    fn existing_link_out_of_root_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path().join("root");
        let outside = dir.path().join("outside");
        fs::create_dir(&root).expect("mkdir");
        fs::create_dir(&outside).expect("mkdir");
        std::os::unix::fs::symlink(&outside, root.join("esc")).expect("symlink");

        let tar_bytes = build_tar(|b| {
            b.append_data(&mut file_header(4, 0o644), "esc/file", &b"evil"[..])
                .expect("append");
        });
        let err = extract_gz(&tar_bytes, &root).unwrap_err();
        assert!(matches!(err, BurrowError::PathTraversal { .. }), "{err:?}");
        assert_eq!(fs::read_dir(&outside).expect("read_dir").count(), 0);
    }

    /// Hands out at most one byte per `read` call.
    struct Trickle<R>(R);

    impl<R: Read> Read for Trickle<R> {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let len = buf.len().min(1);
            self.0.read(&mut buf[..len])
        }
    }

    #[test]
    fn gzip_detection_survives_short_reads() {
        let dir = tempfile::tempdir().expect("tempdir");
        let tar_bytes = build_tar(|b| {
            b.append_data(&mut file_header(5, 0o644), "hello.txt", &b"hello"[..])
                .expect("append");
        });
        let gz = gzip(&tar_bytes);
        let stats = extract(Trickle(&gz[..]), dir.path(), Compression::Gzip, &CancelToken::new())
            .expect("extract");
        assert_eq!(stats.files, 1);
        assert_eq!(fs::read(dir.path().join("hello.txt")).expect("read"), b"hello");
    }

    #[test]
    fn concatenated_gzip_members_are_all_read() {
        let dir = tempfile::tempdir().expect("tempdir");
        let tar_bytes = build_tar(|b| {
            b.append_data(&mut file_header(3, 0o644), "one", &b"one"[..])
                .expect("append");
            b.append_data(&mut file_header(3, 0o644), "two", &b"two"[..])
                .expect("append");
        });
        // Split after the first entry's header and data blocks.
        let (head, tail) = tar_bytes.split_at(1024);
        let mut blob = gzip(head);
        blob.extend_from_slice(&gzip(tail));

        let stats = extract(&blob[..], dir.path(), Compression::Gzip, &CancelToken::new())
            .expect("extract");
        assert_eq!(stats.files, 2);
        assert_eq!(fs::read(dir.path().join("two")).expect("read"), b"two");
    }

    #[test]
    fn non_gzip_stream_is_extraction_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = extract(
            &b"definitely not gzip"[..],
            dir.path(),
            Compression::Gzip,
            &CancelToken::new(),
        )
        .unwrap_err();
        assert!(matches!(err, BurrowError::Extraction { .. }));
    }

    #[test]
    fn truncated_archive_is_extraction_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let tar_bytes = build_tar(|b| {
            b.append_data(&mut file_header(1024, 0o644), "big", &vec![7u8; 1024][..])
                .expect("append");
        });
        let truncated = &tar_bytes[..700];
        let err = extract(truncated, dir.path(), Compression::None, &CancelToken::new())
            .unwrap_err();
        assert!(matches!(err, BurrowError::Extraction { .. }));
    }

    #[test]
    fn plain_tar_is_extracted_without_decompression() {
        let dir = tempfile::tempdir().expect("tempdir");
        let tar_bytes = build_tar(|b| {
            b.append_data(&mut file_header(5, 0o644), "hello.txt", &b"hello"[..])
                .expect("append");
        });
        let _ = extract(&tar_bytes[..], dir.path(), Compression::None, &CancelToken::new())
            .expect("extract");
        assert_eq!(fs::read(dir.path().join("hello.txt")).expect("read"), b"hello");
    }

    #[test]
    fn cancelled_token_stops_extraction() {
        let dir = tempfile::tempdir().expect("tempdir");
        let tar_bytes = build_tar(|b| {
            b.append_data(&mut file_header(5, 0o644), "hello.txt", &b"hello"[..])
                .expect("append");
        });
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = extract(&gzip(&tar_bytes)[..], dir.path(), Compression::Gzip, &cancel)
            .unwrap_err();
        assert!(matches!(err, BurrowError::Cancelled));
        assert!(!dir.path().join("hello.txt").exists());
    }
}

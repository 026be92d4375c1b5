//! Snapshot extraction.
//!
//! Materializes a tar stream under an explicit destination root. Archive
//! content is untrusted: every entry path is normalized lexically and must
//! stay strictly below the root, and only directories and regular files are
//! ever written. The destination is expected to be a fresh, private scratch
//! directory, so no pre-existing symlinks can redirect writes.
//!
//! On error, entries already written stay on disk; the caller disposes of
//! the whole destination.

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Component, Path, PathBuf};

use serde::Serialize;
use tar::EntryType;
use tracing::{debug, info};

use crate::errors::PipelineError;
use crate::transport::BodyReadError;

/// Name of the synthetic whole-archive metadata entry written by `git archive`.
pub const PAX_GLOBAL_HEADER: &str = "pax_global_header";

/// Only permission bits are applied; setuid, setgid and sticky are dropped.
pub const PERMISSION_MASK: u32 = 0o777;

/// An extracted snapshot tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Snapshot {
    /// Absolute path of the top-level directory.
    pub root: PathBuf,
    /// Path of the first directory entry, relative to the destination.
    pub top_level: PathBuf,
    pub directories: usize,
    pub files: usize,
    pub bytes_written: u64,
}

/// Normalize an archive entry path to a relative path strictly below the
/// destination root.
///
/// `.` components are dropped and `..` pops the previous component; an
/// absolute path, a `..` that would climb above the root, or a path that
/// resolves to the root itself is rejected.
pub fn normalize_entry_path(raw: &Path) -> Result<PathBuf, PipelineError> {
    let display = raw.display().to_string();
    let mut normalized = PathBuf::new();

    for component in raw.components() {
        match component {
            Component::Normal(part) => normalized.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    return Err(PipelineError::unsafe_path(
                        display,
                        "'..' climbs above the destination root",
                    ));
                }
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(PipelineError::unsafe_path(display, "absolute path"));
            }
        }
    }

    if normalized.as_os_str().is_empty() {
        return Err(PipelineError::unsafe_path(
            display,
            "resolves to the destination root itself",
        ));
    }
    Ok(normalized)
}

fn kind_name(kind: EntryType) -> &'static str {
    match kind {
        EntryType::Symlink => "symlink",
        EntryType::Link => "hard link",
        EntryType::Char => "character device",
        EntryType::Block => "block device",
        EntryType::Fifo => "fifo",
        EntryType::GNUSparse => "sparse file",
        _ => "unknown",
    }
}

#[cfg(unix)]
fn apply_mode(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn apply_mode(_path: &Path, _mode: u32) -> io::Result<()> {
    Ok(())
}

/// Children before parents, whatever order the archive listed them in.
/// Stable: entries at equal depth keep archive order.
fn deepest_first(modes: &mut [(PathBuf, u32)]) {
    modes.sort_by_key(|(path, _)| std::cmp::Reverse(path.components().count()));
}

/// Errors while pulling bytes out of the archive. A failure of the compressed
/// body underneath is a transport problem, not an extraction one.
fn read_error(message: impl Into<String>, err: io::Error) -> PipelineError {
    match BodyReadError::find(&err) {
        Some(body) => PipelineError::transport(format!("{}: {body}", message.into())),
        None => PipelineError::extraction(message, err),
    }
}

/// Extract `stream` into `dest`, returning the snapshot rooted at the first
/// directory entry.
pub fn extract_snapshot<R: Read>(stream: R, dest: &Path) -> Result<Snapshot, PipelineError> {
    let mut archive = tar::Archive::new(stream);
    let entries = archive
        .entries()
        .map_err(|e| read_error("reading archive", e))?;

    let mut top_level: Option<PathBuf> = None;
    // Directory modes are applied last so a read-only directory cannot block
    // writing its own children.
    let mut directory_modes: Vec<(PathBuf, u32)> = Vec::new();
    let mut files = 0usize;
    let mut bytes_written = 0u64;

    for entry in entries {
        let mut entry =
            entry.map_err(|e| read_error("reading archive entry", e))?;
        let kind = entry.header().entry_type();
        let raw_path = entry
            .path()
            .map_err(|e| PipelineError::extraction("decoding entry path", e))?
            .into_owned();

        if kind == EntryType::XGlobalHeader || raw_path == Path::new(PAX_GLOBAL_HEADER) {
            io::copy(&mut entry, &mut io::sink())
                .map_err(|e| read_error("skipping archive metadata", e))?;
            continue;
        }

        let relative = normalize_entry_path(&raw_path)?;
        let target = dest.join(&relative);
        let mode = entry
            .header()
            .mode()
            .map_err(|e| PipelineError::extraction(format!("reading mode of {}", relative.display()), e))?
            & PERMISSION_MASK;

        match kind {
            EntryType::Directory => {
                debug!(path = %relative.display(), mode = format_args!("{mode:o}"), "directory");
                fs::create_dir_all(&target).map_err(|e| {
                    PipelineError::extraction(format!("creating {}", relative.display()), e)
                })?;
                if top_level.is_none() {
                    top_level = Some(relative);
                }
                directory_modes.push((target, mode));
            }
            EntryType::Regular | EntryType::Continuous => {
                debug!(path = %relative.display(), mode = format_args!("{mode:o}"), "file");
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent).map_err(|e| {
                        PipelineError::extraction(format!("creating parent of {}", relative.display()), e)
                    })?;
                }
                let mut file = File::create(&target).map_err(|e| {
                    PipelineError::extraction(format!("creating {}", relative.display()), e)
                })?;
                let written = io::copy(&mut entry, &mut file)
                    .map_err(|e| read_error(format!("writing {}", relative.display()), e))?;
                file.flush().map_err(|e| {
                    PipelineError::extraction(format!("writing {}", relative.display()), e)
                })?;
                drop(file);
                apply_mode(&target, mode).map_err(|e| {
                    PipelineError::extraction(format!("setting mode of {}", relative.display()), e)
                })?;
                files += 1;
                bytes_written += written;
            }
            other => {
                return Err(PipelineError::unsupported_entry(
                    relative.display().to_string(),
                    kind_name(other),
                ));
            }
        }
    }

    deepest_first(&mut directory_modes);
    for (path, mode) in &directory_modes {
        apply_mode(path, *mode).map_err(|e| {
            PipelineError::extraction(format!("setting mode of {}", path.display()), e)
        })?;
    }

    let top_level = top_level.ok_or(PipelineError::EmptyArchive)?;
    let snapshot = Snapshot {
        root: dest.join(&top_level),
        top_level,
        directories: directory_modes.len(),
        files,
        bytes_written,
    };
    info!(
        top_level = %snapshot.top_level.display(),
        directories = snapshot.directories,
        files = snapshot.files,
        bytes = snapshot.bytes_written,
        "snapshot extracted"
    );
    Ok(snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorCode;
    use crate::testing::archive::TarballBuilder;
    use proptest::prelude::*;
    use std::io::Cursor;
    use tempfile::tempdir;

    #[cfg(unix)]
    fn mode_of(path: &Path) -> u32 {
        use std::os::unix::fs::PermissionsExt;
        fs::metadata(path).unwrap().permissions().mode() & 0o777
    }

    #[test]
    fn test_normalize_plain_and_dotted_paths() {
        assert_eq!(
            normalize_entry_path(Path::new("proj/src/main.rs")).unwrap(),
            PathBuf::from("proj/src/main.rs")
        );
        assert_eq!(
            normalize_entry_path(Path::new("./proj/./a/../b")).unwrap(),
            PathBuf::from("proj/b")
        );
        assert_eq!(
            normalize_entry_path(Path::new("proj/")).unwrap(),
            PathBuf::from("proj")
        );
    }

    #[test]
    fn test_normalize_rejects_escapes() {
        for raw in ["../evil", "proj/../../evil", "/etc/passwd", "proj/..", ".", ""] {
            let err = normalize_entry_path(Path::new(raw)).unwrap_err();
            assert_eq!(err.code(), ErrorCode::UnsafeArchivePath, "path {raw:?}");
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(128))]

        #[test]
        fn normalized_paths_never_leave_root(parts in proptest::collection::vec(
            prop_oneof![
                Just("..".to_string()),
                Just(".".to_string()),
                "[a-z]{1,6}",
            ],
            0..8,
        ), absolute in any::<bool>()) {
            let mut raw = parts.join("/");
            if absolute {
                raw.insert(0, '/');
            }
            let root = Path::new("/scratch/run");
            if let Ok(relative) = normalize_entry_path(Path::new(&raw)) {
                let joined = root.join(relative);
                prop_assert!(joined.starts_with(root));
                prop_assert!(joined != root);
                prop_assert!(joined.components().all(|c| c != Component::ParentDir));
            }
        }
    }

    #[test]
    fn test_extracts_project_tree() {
        let archive = TarballBuilder::new()
            .pax_global_header("abc123")
            .dir("proj-abc123/", 0o755)
            .file("proj-abc123/run.sh", 0o755, b"echo hello\n\n")
            .dir("proj-abc123/src/", 0o750)
            .file("proj-abc123/src/lib.rs", 0o644, b"pub fn x() {}\n")
            .into_tar();
        let dest = tempdir().unwrap();

        let snapshot = extract_snapshot(Cursor::new(archive), dest.path()).unwrap();

        assert_eq!(snapshot.top_level, PathBuf::from("proj-abc123"));
        assert_eq!(snapshot.root, dest.path().join("proj-abc123"));
        assert_eq!(snapshot.directories, 2);
        assert_eq!(snapshot.files, 2);
        assert_eq!(snapshot.bytes_written, 12 + 14);
        assert_eq!(
            fs::read(dest.path().join("proj-abc123/run.sh")).unwrap(),
            b"echo hello\n\n"
        );
        assert!(!dest.path().join(PAX_GLOBAL_HEADER).exists());

        #[cfg(unix)]
        {
            assert_eq!(mode_of(&dest.path().join("proj-abc123/run.sh")), 0o755);
            assert_eq!(mode_of(&dest.path().join("proj-abc123/src/lib.rs")), 0o644);
            assert_eq!(mode_of(&dest.path().join("proj-abc123/src")), 0o750);
        }
    }

    #[test]
    fn test_directory_modes_apply_deepest_first() {
        let mut modes = vec![
            (PathBuf::from("/d/proj/a/b"), 0o700),
            (PathBuf::from("/d/proj"), 0o500),
            (PathBuf::from("/d/proj/a"), 0o750),
            (PathBuf::from("/d/proj/c"), 0o755),
        ];
        deepest_first(&mut modes);
        let order: Vec<_> = modes.iter().map(|(p, _)| p.to_str().unwrap()).collect();
        assert_eq!(order, ["/d/proj/a/b", "/d/proj/a", "/d/proj/c", "/d/proj"]);
    }

    #[test]
    fn test_child_directory_listed_before_parent() {
        let archive = TarballBuilder::new()
            .dir("proj/sub/", 0o700)
            .file("proj/sub/x.txt", 0o644, b"x")
            .dir("proj/", 0o555)
            .into_tar();
        let dest = tempdir().unwrap();

        let snapshot = extract_snapshot(Cursor::new(archive), dest.path()).unwrap();

        assert_eq!(snapshot.directories, 2);
        #[cfg(unix)]
        {
            assert_eq!(mode_of(&dest.path().join("proj")), 0o555);
            assert_eq!(mode_of(&dest.path().join("proj/sub")), 0o700);
            apply_mode(&dest.path().join("proj"), 0o755).unwrap();
        }
    }

    #[test]
    fn test_first_directory_wins_as_top_level() {
        let archive = TarballBuilder::new()
            .dir("first/", 0o755)
            .dir("second/", 0o755)
            .into_tar();
        let dest = tempdir().unwrap();
        let snapshot = extract_snapshot(Cursor::new(archive), dest.path()).unwrap();
        assert_eq!(snapshot.top_level, PathBuf::from("first"));
        assert!(dest.path().join("second").is_dir());
    }

    #[test]
    fn test_existing_file_is_truncated() {
        let archive = TarballBuilder::new()
            .dir("proj/", 0o755)
            .file("proj/a.txt", 0o644, b"a much longer first version")
            .file("proj/a.txt", 0o644, b"short")
            .into_tar();
        let dest = tempdir().unwrap();
        extract_snapshot(Cursor::new(archive), dest.path()).unwrap();
        assert_eq!(fs::read(dest.path().join("proj/a.txt")).unwrap(), b"short");
    }

    #[test]
    fn test_file_without_directory_entry_creates_parents() {
        let archive = TarballBuilder::new()
            .dir("proj/", 0o755)
            .file("proj/deep/nested/file.txt", 0o600, b"x")
            .into_tar();
        let dest = tempdir().unwrap();
        extract_snapshot(Cursor::new(archive), dest.path()).unwrap();
        assert!(dest.path().join("proj/deep/nested/file.txt").is_file());
    }

    #[test]
    fn test_setuid_bits_are_dropped() {
        let archive = TarballBuilder::new()
            .dir("proj/", 0o755)
            .file("proj/suid", 0o4755, b"#!/bin/sh\n")
            .into_tar();
        let dest = tempdir().unwrap();
        extract_snapshot(Cursor::new(archive), dest.path()).unwrap();

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(dest.path().join("proj/suid"))
                .unwrap()
                .permissions()
                .mode();
            assert_eq!(mode & 0o7777, 0o755);
        }
    }

    #[test]
    fn test_traversal_entry_stops_extraction() {
        let archive = TarballBuilder::new()
            .dir("proj/", 0o755)
            .file("proj/before.txt", 0o644, b"ok")
            .raw_file(b"proj/../../escaped.txt", 0o644, b"pwned")
            .file("proj/after.txt", 0o644, b"never")
            .into_tar();
        let scratch = tempdir().unwrap();
        let dest = scratch.path().join("run");
        fs::create_dir(&dest).unwrap();

        let err = extract_snapshot(Cursor::new(archive), &dest).unwrap_err();

        assert_eq!(err.code(), ErrorCode::UnsafeArchivePath);
        assert!(dest.join("proj/before.txt").exists());
        assert!(!scratch.path().join("escaped.txt").exists());
        assert!(!dest.join("proj/after.txt").exists());
    }

    #[test]
    fn test_absolute_entry_is_rejected() {
        let archive = TarballBuilder::new()
            .dir("proj/", 0o755)
            .raw_file(b"/tmp/cvr-absolute-entry", 0o644, b"pwned")
            .into_tar();
        let dest = tempdir().unwrap();
        let err = extract_snapshot(Cursor::new(archive), dest.path()).unwrap_err();
        assert_eq!(err.code(), ErrorCode::UnsafeArchivePath);
    }

    #[test]
    fn test_symlink_entry_is_rejected() {
        let archive = TarballBuilder::new()
            .dir("proj/", 0o755)
            .symlink("proj/link", "run.sh")
            .into_tar();
        let dest = tempdir().unwrap();
        let err = extract_snapshot(Cursor::new(archive), dest.path()).unwrap_err();
        assert_eq!(err.code(), ErrorCode::UnsupportedArchiveEntry);
        assert!(fs::symlink_metadata(dest.path().join("proj/link")).is_err());
    }

    #[test]
    fn test_archive_without_directories_is_empty() {
        let archive = TarballBuilder::new()
            .pax_global_header("abc")
            .file("loose.txt", 0o644, b"x")
            .into_tar();
        let dest = tempdir().unwrap();
        let err = extract_snapshot(Cursor::new(archive), dest.path()).unwrap_err();
        assert_eq!(err.code(), ErrorCode::ExtractionEmptyArchive);
    }

    #[test]
    fn test_truncated_stream_is_extraction_error() {
        let mut archive = TarballBuilder::new()
            .dir("proj/", 0o755)
            .file("proj/big.bin", 0o644, &[42u8; 8192])
            .into_tar();
        archive.truncate(512 * 4);
        let dest = tempdir().unwrap();
        let err = extract_snapshot(Cursor::new(archive), dest.path()).unwrap_err();
        assert_eq!(err.code(), ErrorCode::ExtractionFailed);
    }
}

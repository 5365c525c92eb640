/*
Copyright 2025 - 2026 CADE Developers

This file is part of Climate Analysis and Diagnostics Engine (CADE).

Climate Analysis and Diagnostics Engine (CADE) is a free software: you can redistribute it and/or modify
it under the terms of the GNU General Public License as published by
the Free Software Foundation; either version 3 of the License, or
(at your option) any later version.

Climate Analysis and Diagnostics Engine (CADE) is distributed in the hope that it will be useful,
but WITHOUT ANY WARRANTY; without even the implied warranty of
MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
GNU General Public License for more details.

You should have received a copy of the GNU General Public License
along with Climate Analysis and Diagnostics Engine (CADE). If not, see https://www.gnu.org/licenses/.
*/

//! Maintenance of the per-run `data.tar` archive.
//!
//! Updating a member rewrites the archive in place: all other members
//! are streamed into a sibling temporary file, the new member is
//! appended, and the temporary file atomically replaces the old
//! archive. Concurrent writers to the same archive file are not
//! protected against; that coordination belongs to whatever submits
//! calculations in parallel.

use crate::errors::{ArchiveError, IoAccessError};
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};

/// Inserts or replaces `member` in the archive at `tar_path` with the
/// contents of the file at `src`.
pub(crate) fn update_archive(
    tar_path: &Path,
    member: &str,
    src: &Path,
) -> Result<(), ArchiveError> {
    if let Some(parent) = tar_path.parent() {
        // Tolerates concurrent creators of the same directory tree.
        fs::create_dir_all(parent)?;
    }

    if !tar_path.exists() {
        let mut builder = tar::Builder::new(File::create(tar_path)?);
        builder.append_path_with_name(src, member)?;
        builder.finish()?;
        return Ok(());
    }

    let tmp_path = rewrite_path(tar_path);
    let result = rewrite_without_member(tar_path, &tmp_path, member, src);
    if result.is_err() {
        let _ = fs::remove_file(&tmp_path);
        return result;
    }

    fs::rename(&tmp_path, tar_path)
        .map_err(|_| ArchiveError::ReplaceFailed(member.to_string()))?;

    Ok(())
}

fn rewrite_path(tar_path: &Path) -> PathBuf {
    let mut tmp = tar_path.as_os_str().to_os_string();
    tmp.push(".rewrite");
    PathBuf::from(tmp)
}

fn rewrite_without_member(
    tar_path: &Path,
    tmp_path: &Path,
    member: &str,
    src: &Path,
) -> Result<(), ArchiveError> {
    let mut archive = tar::Archive::new(File::open(tar_path)?);
    let mut builder = tar::Builder::new(File::create(tmp_path)?);

    for entry in archive.entries()? {
        let mut entry = entry?;
        let keep = entry.path()?.to_str().map(|p| p != member).unwrap_or(true);
        if keep {
            let header = entry.header().clone();
            builder.append(&header, &mut entry)?;
        }
    }

    builder.append_path_with_name(src, member)?;
    builder.finish()?;

    Ok(())
}

/// Reads the raw bytes of `member` out of the archive at `tar_path`.
pub(crate) fn extract_member(tar_path: &Path, member: &str) -> Result<Vec<u8>, IoAccessError> {
    let file = File::open(tar_path).map_err(|source| IoAccessError::FileAccess {
        path: tar_path.to_path_buf(),
        source,
    })?;

    let io_err = |source: std::io::Error| IoAccessError::FileAccess {
        path: tar_path.to_path_buf(),
        source,
    };

    let mut archive = tar::Archive::new(file);
    for entry in archive.entries().map_err(io_err)? {
        let mut entry = entry.map_err(io_err)?;
        let matches = entry
            .path()
            .map_err(io_err)?
            .to_str()
            .map(|p| p == member)
            .unwrap_or(false);
        if matches {
            let mut bytes = Vec::new();
            entry.read_to_end(&mut bytes).map_err(io_err)?;
            return Ok(bytes);
        }
    }

    Err(IoAccessError::MissingMember {
        path: tar_path.to_path_buf(),
        member: member.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_source(dir: &Path, name: &str, contents: &[u8]) -> PathBuf {
        let path = dir.join(name);
        let mut file = File::create(&path).unwrap();
        file.write_all(contents).unwrap();
        path
    }

    #[test]
    fn creates_archive_and_extracts_member() {
        let dir = tempfile::tempdir().unwrap();
        let tar_path = dir.path().join("out").join("data.tar");
        let src = write_source(dir.path(), "a.nc", b"alpha");

        update_archive(&tar_path, "a.nc", &src).unwrap();
        assert_eq!(extract_member(&tar_path, "a.nc").unwrap(), b"alpha");
    }

    #[test]
    fn replaces_member_without_duplicating() {
        let dir = tempfile::tempdir().unwrap();
        let tar_path = dir.path().join("data.tar");

        let first = write_source(dir.path(), "a.nc", b"first");
        let other = write_source(dir.path(), "b.nc", b"other");
        update_archive(&tar_path, "a.nc", &first).unwrap();
        update_archive(&tar_path, "b.nc", &other).unwrap();

        let second = write_source(dir.path(), "a2.nc", b"second");
        update_archive(&tar_path, "a.nc", &second).unwrap();

        assert_eq!(extract_member(&tar_path, "a.nc").unwrap(), b"second");
        assert_eq!(extract_member(&tar_path, "b.nc").unwrap(), b"other");

        // Exactly two members remain.
        let mut archive = tar::Archive::new(File::open(&tar_path).unwrap());
        assert_eq!(archive.entries().unwrap().count(), 2);
    }

    #[test]
    fn missing_member_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let tar_path = dir.path().join("data.tar");
        let src = write_source(dir.path(), "a.nc", b"alpha");
        update_archive(&tar_path, "a.nc", &src).unwrap();

        let result = extract_member(&tar_path, "zzz.nc");
        assert!(matches!(result, Err(IoAccessError::MissingMember { .. })));
    }
}

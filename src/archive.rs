//! Tar codec: store a tar stream in a tree, reconstitute it later.
//!
//! The stream is split across two reserved top-level subtrees:
//!
//! - `_fs_data/<path>` holds the contents of regular files;
//! - `_fs_meta/<hex(sha1(canonical(path)))>` holds each entry's original
//!   512-byte tar header, keyed by a hash of the path so arbitrarily deep
//!   names map to fixed-length keys.
//!
//! Decoding walks `_fs_data` and re-emits every entry with its stored
//! header, so header fields round-trip bit for bit. Entries other than
//! regular files are carried by their header alone.

use std::io::{self, Read, Write};

use sha1::{Digest, Sha1};
use tracing::debug;

use crate::error::{Error, Result};
use crate::path;
use crate::storage::{Node, Repository, Tree};

/// Reserved subtree holding the tar headers.
pub const META_TREE: &str = "_fs_meta";

/// Reserved subtree holding file contents.
pub const DATA_TREE: &str = "_fs_data";

const HEADER_LEN: usize = 512;

/// The key under [`META_TREE`] where the header for `name` is stored.
pub fn meta_path(name: &str) -> String {
    let digest = Sha1::digest(path::canonical(name).as_bytes());
    format!("{}/{}", META_TREE, hex::encode(digest))
}

/// Decode the tar stream from `src` into a new tree.
pub fn tar_to_tree(repo: &Repository, src: impl Read) -> Result<Tree> {
    let mut archive = tar::Archive::new(src);
    let mut out = repo.empty_tree()?;
    for entry in archive.entries()? {
        let mut entry = entry?;
        let name = entry.path()?.to_string_lossy().into_owned();
        let header = entry.header().clone();
        debug!(name = %name, "storing tar entry");
        out = out.set(&meta_path(&name), header.as_bytes().as_ref())?;
        if header.entry_type().is_file() {
            let mut contents = Vec::new();
            entry.read_to_end(&mut contents)?;
            out = out.set(&path::join(DATA_TREE, &name), contents)?;
        }
    }
    Ok(out)
}

/// Re-encode `tree` (as produced by [`tar_to_tree`]) into a tar stream
/// written to `dst`.
pub fn tree_to_tar(tree: &Tree, dst: impl Write) -> Result<()> {
    let mut builder = tar::Builder::new(dst);
    let data = tree.scope(DATA_TREE)?;
    data.walk("/", |name, node| {
        let meta = match tree.get(&meta_path(name)) {
            Ok(meta) => meta,
            Err(e) if e.is_not_found() && matches!(node, Node::Tree(_)) => {
                // an intermediate directory synthesized by the tree layout,
                // not an entry of the original stream
                return Ok(());
            }
            Err(e) if e.is_not_found() => {
                return Err(Error::Codec(format!("missing metadata for '{}'", name)));
            }
            Err(e) => return Err(e),
        };
        let header = parse_header(&meta, name)?;
        let size = header
            .size()
            .map_err(|e| Error::Codec(format!("bad size in header for '{}': {}", name, e)))?
            as usize;
        match node {
            Node::Blob(contents) => {
                if contents.len() < size {
                    return Err(Error::Codec(format!(
                        "'{}' declares {} bytes but only {} are stored",
                        name,
                        size,
                        contents.len()
                    )));
                }
                builder.append(&header, &contents[..size])?;
            }
            Node::Tree(_) => {
                builder.append(&header, io::empty())?;
            }
        }
        Ok(())
    })?;
    builder.finish()?;
    Ok(())
}

fn parse_header(meta: &[u8], name: &str) -> Result<tar::Header> {
    if meta.len() < HEADER_LEN {
        return Err(Error::Codec(format!(
            "metadata for '{}' is not a tar header",
            name
        )));
    }
    let mut header = tar::Header::new_old();
    header.as_mut_bytes().copy_from_slice(&meta[..HEADER_LEN]);
    Ok(header)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Repository) {
        let dir = TempDir::new().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        (dir, repo)
    }

    fn file_header(size: u64) -> tar::Header {
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Regular);
        header.set_size(size);
        header.set_mode(0o644);
        header.set_uid(0);
        header.set_gid(0);
        header.set_mtime(1400000000);
        header
    }

    fn sample_tar(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (name, contents) in files {
            let mut header = file_header(contents.len() as u64);
            builder.append_data(&mut header, name, *contents).unwrap();
        }
        builder.into_inner().unwrap()
    }

    #[test]
    fn test_encode_layout() {
        let (_dir, repo) = setup();
        let tar_bytes = sample_tar(&[("etc/hosts", b"127.0.0.1 localhost\n")]);
        let tree = tar_to_tree(&repo, &tar_bytes[..]).unwrap();

        assert_eq!(
            tree.get("_fs_data/etc/hosts").unwrap(),
            b"127.0.0.1 localhost\n"
        );
        let meta_names = tree.list(META_TREE).unwrap();
        assert_eq!(meta_names.len(), 1);
        assert_eq!(meta_names[0].len(), 40);
        // the header is addressable through meta_path
        let meta = tree.get(&meta_path("etc/hosts")).unwrap();
        assert_eq!(meta.len(), 512);
    }

    #[test]
    fn test_meta_path_canonicalizes() {
        assert_eq!(meta_path("/etc/hosts"), meta_path("etc//hosts"));
        assert!(meta_path("etc/hosts").starts_with("_fs_meta/"));
        assert_ne!(meta_path("a"), meta_path("b"));
    }

    #[test]
    fn test_roundtrip_regular_files() {
        let (_dir, repo) = setup();
        // names in tree order so the reconstituted stream lines up with
        // the input
        let files: &[(&str, &[u8])] = &[
            ("a/b", b"contents of a/b"),
            ("bin/sh", b"#!/bin/sh\n"),
            ("etc/hosts", b"127.0.0.1 localhost\n"),
        ];
        let tar_bytes = sample_tar(files);
        let tree = tar_to_tree(&repo, &tar_bytes[..]).unwrap();

        let mut out = Vec::new();
        tree_to_tar(&tree, &mut out).unwrap();

        let mut archive = tar::Archive::new(&out[..]);
        let mut decoded = Vec::new();
        for entry in archive.entries().unwrap() {
            let mut entry = entry.unwrap();
            let name = entry.path().unwrap().to_string_lossy().into_owned();
            let header = entry.header();
            let fields = (
                header.size().unwrap(),
                header.mode().unwrap(),
                header.uid().unwrap(),
                header.gid().unwrap(),
                header.mtime().unwrap(),
                header.entry_type(),
            );
            let mut contents = Vec::new();
            entry.read_to_end(&mut contents).unwrap();
            decoded.push((name, fields, contents));
        }

        assert_eq!(decoded.len(), files.len());
        for ((name, fields, contents), (want_name, want_contents)) in
            decoded.iter().zip(files.iter())
        {
            assert_eq!(name, want_name);
            assert_eq!(contents, want_contents);
            let (size, mode, uid, gid, mtime, entry_type) = fields;
            assert_eq!(*size, want_contents.len() as u64);
            assert_eq!(*mode, 0o644);
            assert_eq!(*uid, 0);
            assert_eq!(*gid, 0);
            assert_eq!(*mtime, 1400000000);
            assert_eq!(*entry_type, tar::EntryType::Regular);
        }
    }

    #[test]
    fn test_directory_entry_roundtrips_header_only() {
        let (_dir, repo) = setup();
        let mut builder = tar::Builder::new(Vec::new());

        let mut dir_header = tar::Header::new_gnu();
        dir_header.set_entry_type(tar::EntryType::Directory);
        dir_header.set_size(0);
        dir_header.set_mode(0o755);
        dir_header.set_mtime(1400000000);
        builder
            .append_data(&mut dir_header, "dir", io::empty())
            .unwrap();

        let mut reg_header = file_header(5);
        builder
            .append_data(&mut reg_header, "dir/f", &b"hello"[..])
            .unwrap();
        let tar_bytes = builder.into_inner().unwrap();

        let tree = tar_to_tree(&repo, &tar_bytes[..]).unwrap();
        // the directory contributed no data entry of its own
        assert_eq!(tree.list(DATA_TREE).unwrap(), vec!["dir"]);

        let mut out = Vec::new();
        tree_to_tar(&tree, &mut out).unwrap();

        let mut archive = tar::Archive::new(&out[..]);
        let entries: Vec<_> = archive
            .entries()
            .unwrap()
            .map(|e| {
                let e = e.unwrap();
                (
                    e.path().unwrap().to_string_lossy().into_owned(),
                    e.header().entry_type(),
                )
            })
            .collect();
        assert_eq!(
            entries,
            vec![
                ("dir".to_string(), tar::EntryType::Directory),
                ("dir/f".to_string(), tar::EntryType::Regular),
            ]
        );
    }

    #[test]
    fn test_missing_metadata_is_codec_error() {
        let (_dir, repo) = setup();
        let tree = repo
            .empty_tree()
            .unwrap()
            .set("_fs_data/orphan", "no header stored")
            .unwrap();
        let err = tree_to_tar(&tree, Vec::new()).unwrap_err();
        assert!(matches!(err, Error::Codec(_)));
    }

    #[test]
    fn test_tree_without_data_subtree_fails() {
        let (_dir, repo) = setup();
        let tree = repo.empty_tree().unwrap().set("unrelated", "x").unwrap();
        assert!(tree_to_tar(&tree, Vec::new()).is_err());
    }
}

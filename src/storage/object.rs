//! Typed access to the Git object store.
//!
//! libgit2 hands back untyped objects and untyped errors; this module pins
//! both down. Lookups return exactly the object kind the caller asked for
//! (or `KindMismatch`), and the error classifiers below are what the commit
//! protocol and the database layer use to tell "the ref moved under us"
//! apart from "the ref does not exist".

use git2::{ErrorClass, ErrorCode, ObjectType, Repository};

use crate::error::{Error, Result};
use crate::storage::types::TreeId;

/// Hex id of the empty tree. Writing a tree builder with no entries always
/// produces this object.
pub const EMPTY_TREE_HEX: &str = "4b825dc642cb6eb9a060e54bf8d69288fbee4904";

/// Look up `id` and return it as a tree.
pub(crate) fn lookup_tree(repo: &Repository, id: git2::Oid) -> Result<git2::Tree<'_>> {
    let obj = repo
        .find_object(id, None)
        .map_err(|_| Error::NotFound(id.to_string()))?;
    obj.into_tree().map_err(|obj| Error::KindMismatch {
        path: id.to_string(),
        expected: "tree",
        found: kind_name(obj.kind()),
    })
}

/// Look up `id` and return it as a blob.
pub(crate) fn lookup_blob(repo: &Repository, id: git2::Oid) -> Result<git2::Blob<'_>> {
    let obj = repo
        .find_object(id, None)
        .map_err(|_| Error::NotFound(id.to_string()))?;
    obj.into_blob().map_err(|obj| Error::KindMismatch {
        path: id.to_string(),
        expected: "blob",
        found: kind_name(obj.kind()),
    })
}

/// Look up `id` and return it as a commit.
pub(crate) fn lookup_commit(repo: &Repository, id: git2::Oid) -> Result<git2::Commit<'_>> {
    let obj = repo
        .find_object(id, None)
        .map_err(|_| Error::NotFound(id.to_string()))?;
    obj.into_commit().map_err(|obj| Error::KindMismatch {
        path: id.to_string(),
        expected: "commit",
        found: kind_name(obj.kind()),
    })
}

/// Look up the commit a ref points at. `None` if the ref does not exist or
/// does not resolve to a commit.
pub(crate) fn lookup_tip<'r>(repo: &'r Repository, refname: &str) -> Option<git2::Commit<'r>> {
    let reference = repo.find_reference(refname).ok()?;
    let target = reference.target()?;
    lookup_commit(repo, target).ok()
}

/// Write the empty tree and return its id (always [`EMPTY_TREE_HEX`]).
pub(crate) fn empty_tree_id(repo: &Repository) -> Result<TreeId> {
    let builder = repo.treebuilder(None)?;
    Ok(TreeId::new(builder.write()?))
}

/// True if `err` means a ref update was refused because the ref's value
/// changed since it was read. This is the CAS point of the commit protocol;
/// the caller is expected to re-read and retry, not to surface the error.
pub(crate) fn is_concurrency_conflict(err: &git2::Error) -> bool {
    err.code() == ErrorCode::Modified && err.class() == ErrorClass::Object
}

/// True if `err` means a named reference does not exist.
pub(crate) fn is_no_such_ref(err: &git2::Error) -> bool {
    err.code() == ErrorCode::NotFound && err.class() == ErrorClass::Reference
}

pub(crate) fn kind_name(kind: Option<ObjectType>) -> &'static str {
    match kind {
        Some(ObjectType::Blob) => "blob",
        Some(ObjectType::Tree) => "tree",
        Some(ObjectType::Commit) => "commit",
        Some(ObjectType::Tag) => "tag",
        _ => "unknown object",
    }
}

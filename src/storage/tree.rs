//! The tree algebra.
//!
//! Trees are immutable: every mutation goes through a tree builder and
//! yields a brand new object, identified by its content hash. The free
//! functions here operate on raw `git2` trees inside a repository lock; the
//! public [`Tree`] handle at the bottom carries only a repository reference
//! and a [`TreeId`], looking the real object up on demand.
//!
//! `tree_add` is the central routine. It inserts a blob or grafts a whole
//! subtree at an arbitrary depth, creating intermediate levels as needed.
//! With `merge = true` existing subtrees are merged entry by entry (like
//! `cp -R`); with `merge = false` they are shadowed wholesale (like a
//! mount). Blob contents are never merged.

use std::io::{Read, Write};
use std::path::Path;

use git2::{FileMode, ObjectType, Repository as GitRepository, TreeWalkMode, TreeWalkResult};

use crate::error::{Error, Result};
use crate::path;
use crate::pipeline::Pipeline;
use crate::storage::object::{self, kind_name};
use crate::storage::repository::Repository;
use crate::storage::types::TreeId;

/// What a walk visitor sees at each entry.
#[derive(Debug)]
pub enum Node {
    /// A leaf value, with its contents.
    Blob(Vec<u8>),
    /// A sub-namespace.
    Tree(TreeId),
}

/// Create a new tree from `tree` (or from scratch) with `value` stored at
/// `key`. `value` must name a blob or a tree. Intermediate subtrees are
/// created as needed; whatever already exists at `key` is overwritten,
/// subject to the `merge` flag for tree-over-tree grafts.
pub(crate) fn tree_add<'r>(
    repo: &'r GitRepository,
    tree: Option<&git2::Tree<'_>>,
    key: &str,
    value: git2::Oid,
    merge: bool,
) -> Result<git2::Tree<'r>> {
    let key = path::canonical(key);
    let (base, leaf) = path::split(&key);

    let value_obj = repo
        .find_object(value, None)
        .map_err(|_| Error::NotFound(value.to_string()))?;

    let mut builder = repo.treebuilder(tree)?;

    if base != "/" {
        // More than one component: build a fresh single-entry tree for the
        // leaf, then add that subtree at the base.
        let sub = tree_add(repo, None, &leaf, value, merge)?;
        return tree_add(repo, tree, &base, sub.id(), merge);
    }

    match value_obj.kind() {
        Some(ObjectType::Blob) => {
            if key == "/" {
                return Err(Error::KindMismatch {
                    path: key,
                    expected: "tree",
                    found: "blob",
                });
            }
            builder.insert(&leaf, value, FileMode::Blob.into())?;
            let id = builder.write()?;
            object::lookup_tree(repo, id)
        }
        Some(ObjectType::Tree) => {
            let overlay = object::lookup_tree(repo, value)?;
            // The previous subtree at this name, if there is one. A missing
            // entry or a blob in the way both count as "nothing to merge
            // into"; the blob gets overwritten.
            let old_sub = match tree {
                Some(t) => match tree_scope(repo, t, &leaf) {
                    Ok(s) => Some(s),
                    Err(e) if e.is_not_found() || e.is_kind_mismatch() => None,
                    Err(e) => return Err(e),
                },
                None => None,
            };
            let sub = match old_sub {
                Some(old) if merge => {
                    let mut cur = old;
                    for entry in overlay.iter() {
                        let name = entry
                            .name()
                            .ok_or_else(|| Error::InvalidPath("non-utf8 entry name".into()))?;
                        cur = tree_add(repo, Some(&cur), name, entry.id(), merge)?;
                    }
                    cur
                }
                _ => overlay,
            };
            // Adding at the root replaces (or, merged, becomes) the tree
            // itself rather than nesting under an entry.
            if key == "/" {
                return Ok(sub);
            }
            builder.insert(&leaf, sub.id(), FileMode::Tree.into())?;
            let id = builder.write()?;
            object::lookup_tree(repo, id)
        }
        kind => Err(Error::KindMismatch {
            path: key,
            expected: "blob or tree",
            found: kind_name(kind),
        }),
    }
}

/// Create a new tree with the entry at `key` removed. Each level along the
/// path is rebuilt so sibling entries are preserved. Fails with `NotFound`
/// if `key` or any of its ancestors does not exist.
pub(crate) fn tree_del<'r>(
    repo: &'r GitRepository,
    tree: &git2::Tree<'_>,
    key: &str,
) -> Result<git2::Tree<'r>> {
    let key = path::canonical(key);
    if key == "/" {
        return Err(Error::InvalidPath("cannot delete the root".into()));
    }
    let (head, rest) = path::first(&key);
    let mut builder = repo.treebuilder(Some(tree))?;
    if rest == "/" {
        builder
            .remove(&head)
            .map_err(|_| Error::NotFound(head.clone()))?;
    } else {
        let sub = tree_scope(repo, tree, &head)?;
        let new_sub = tree_del(repo, &sub, &rest)?;
        builder.insert(&head, new_sub.id(), FileMode::Tree.into())?;
    }
    let id = builder.write()?;
    object::lookup_tree(repo, id)
}

/// Resolve `name` to a subtree of `tree`. `"/"` resolves to the tree
/// itself, as a fresh handle the caller may drop independently.
pub(crate) fn tree_scope<'r>(
    repo: &'r GitRepository,
    tree: &git2::Tree<'_>,
    name: &str,
) -> Result<git2::Tree<'r>> {
    let name = path::canonical(name);
    if name == "/" {
        return object::lookup_tree(repo, tree.id());
    }
    let entry = tree
        .get_path(Path::new(&name))
        .map_err(|_| Error::NotFound(name.clone()))?;
    if entry.kind() != Some(ObjectType::Tree) {
        return Err(Error::KindMismatch {
            path: name,
            expected: "tree",
            found: kind_name(entry.kind()),
        });
    }
    object::lookup_tree(repo, entry.id())
}

/// Read the blob at `key`.
pub(crate) fn tree_get(repo: &GitRepository, tree: &git2::Tree<'_>, key: &str) -> Result<Vec<u8>> {
    let key = path::canonical(key);
    if key == "/" {
        return Err(Error::KindMismatch {
            path: key,
            expected: "blob",
            found: "tree",
        });
    }
    let entry = tree
        .get_path(Path::new(&key))
        .map_err(|_| Error::NotFound(key.clone()))?;
    if entry.kind() != Some(ObjectType::Blob) {
        return Err(Error::KindMismatch {
            path: key,
            expected: "blob",
            found: kind_name(entry.kind()),
        });
    }
    let blob = object::lookup_blob(repo, entry.id())?;
    Ok(blob.content().to_vec())
}

/// List the entry names of the subtree at `key`.
pub(crate) fn tree_list(
    repo: &GitRepository,
    tree: &git2::Tree<'_>,
    key: &str,
) -> Result<Vec<String>> {
    let sub = tree_scope(repo, tree, key)?;
    let mut names = Vec::with_capacity(sub.len());
    for entry in sub.iter() {
        let name = entry
            .name()
            .ok_or_else(|| Error::InvalidPath("non-utf8 entry name".into()))?;
        names.push(name.to_string());
    }
    Ok(names)
}

/// Recursively visit every entry below `key`, depth first, passing the
/// visitor the path relative to `key` and the entry's value. A visitor
/// error aborts the walk and is returned unchanged.
///
/// Runs entirely under the caller's repository borrow; visitors that need
/// to re-enter the repository go through [`Tree::walk`] instead, which
/// buffers the entries first.
pub(crate) fn tree_walk(
    repo: &GitRepository,
    tree: &git2::Tree<'_>,
    key: &str,
    visitor: &mut dyn FnMut(&str, Node) -> Result<()>,
) -> Result<()> {
    let sub = tree_scope(repo, tree, key)?;
    let mut walk_err: Option<Error> = None;
    let res = sub.walk(TreeWalkMode::PreOrder, |parent, entry| {
        let name = match entry.name() {
            Some(n) => n,
            None => {
                walk_err = Some(Error::InvalidPath("non-utf8 entry name".into()));
                return TreeWalkResult::Abort;
            }
        };
        let full = format!("{}{}", parent, name);
        let node = match entry.kind() {
            Some(ObjectType::Tree) => Node::Tree(TreeId::new(entry.id())),
            Some(ObjectType::Blob) => match object::lookup_blob(repo, entry.id()) {
                Ok(blob) => Node::Blob(blob.content().to_vec()),
                Err(e) => {
                    walk_err = Some(e);
                    return TreeWalkResult::Abort;
                }
            },
            _ => return TreeWalkResult::Ok,
        };
        match visitor(&full, node) {
            Ok(()) => TreeWalkResult::Ok,
            Err(e) => {
                walk_err = Some(e);
                TreeWalkResult::Abort
            }
        }
    });
    if let Some(e) = walk_err {
        return Err(e);
    }
    res.map_err(Error::from)
}

/// Write a plain-text listing of the subtree at `key`: `name/` per subtree
/// and `name = contents` per blob, in walk order.
pub(crate) fn tree_dump(
    repo: &GitRepository,
    tree: &git2::Tree<'_>,
    key: &str,
    dst: &mut dyn Write,
) -> Result<()> {
    tree_walk(repo, tree, key, &mut |k, node| {
        match node {
            Node::Tree(_) => writeln!(dst, "{}/", k)?,
            Node::Blob(data) => writeln!(dst, "{} = {}", k, String::from_utf8_lossy(&data))?,
        }
        Ok(())
    })
}

/// An immutable tree handle.
///
/// Holds nothing but the tree's id and a handle to the repository it lives
/// in; the underlying object is looked up on each operation. Every mutating
/// method returns a new `Tree` and leaves this one untouched.
#[derive(Clone)]
pub struct Tree {
    repo: Repository,
    id: TreeId,
}

impl Tree {
    pub(crate) fn new(repo: Repository, id: TreeId) -> Self {
        Self { repo, id }
    }

    /// The content hash identifying this tree.
    pub fn id(&self) -> TreeId {
        self.id
    }

    /// The repository backing this tree.
    pub fn repo(&self) -> &Repository {
        &self.repo
    }

    /// Read the blob at `key`.
    pub fn get(&self, key: &str) -> Result<Vec<u8>> {
        self.repo.with_repo(|repo| {
            let tree = object::lookup_tree(repo, self.id.raw())?;
            tree_get(repo, &tree, key)
        })
    }

    /// Store `value` as a blob at `key`, returning the new tree.
    pub fn set(&self, key: &str, value: impl AsRef<[u8]>) -> Result<Tree> {
        let id = self.repo.with_repo(|repo| {
            let blob = repo.blob(value.as_ref())?;
            let tree = object::lookup_tree(repo, self.id.raw())?;
            let new = tree_add(repo, Some(&tree), key, blob, true)?;
            Ok(TreeId::new(new.id()))
        })?;
        Ok(Tree::new(self.repo.clone(), id))
    }

    /// Read `src` to the end and store the bytes at `key`.
    pub fn set_stream(&self, key: &str, mut src: impl Read) -> Result<Tree> {
        let mut buf = Vec::new();
        src.read_to_end(&mut buf)?;
        self.set(key, buf)
    }

    /// Remove the entry at `key`, returning the new tree.
    pub fn delete(&self, key: &str) -> Result<Tree> {
        let id = self.repo.with_repo(|repo| {
            let tree = object::lookup_tree(repo, self.id.raw())?;
            let new = tree_del(repo, &tree, key)?;
            Ok(TreeId::new(new.id()))
        })?;
        Ok(Tree::new(self.repo.clone(), id))
    }

    /// Ensure an (empty) subtree exists at `key`. A subtree already present
    /// is left as it is.
    pub fn mkdir(&self, key: &str) -> Result<Tree> {
        let empty = self.repo.empty_tree()?;
        self.add(key, &empty, true)
    }

    /// Graft `overlay` at `key`. With `merge = true` the overlay is merged
    /// into any existing subtree at the entry granularity; with
    /// `merge = false` existing content at `key` is replaced.
    pub fn add(&self, key: &str, overlay: &Tree, merge: bool) -> Result<Tree> {
        let id = self.repo.with_repo(|repo| {
            let tree = object::lookup_tree(repo, self.id.raw())?;
            let new = tree_add(repo, Some(&tree), key, overlay.id.raw(), merge)?;
            Ok(TreeId::new(new.id()))
        })?;
        Ok(Tree::new(self.repo.clone(), id))
    }

    /// The subtree at `key`, as an independent handle.
    pub fn scope(&self, key: &str) -> Result<Tree> {
        let id = self.repo.with_repo(|repo| {
            let tree = object::lookup_tree(repo, self.id.raw())?;
            let sub = tree_scope(repo, &tree, key)?;
            Ok(TreeId::new(sub.id()))
        })?;
        Ok(Tree::new(self.repo.clone(), id))
    }

    /// Names of the entries in the subtree at `key`.
    pub fn list(&self, key: &str) -> Result<Vec<String>> {
        self.repo.with_repo(|repo| {
            let tree = object::lookup_tree(repo, self.id.raw())?;
            tree_list(repo, &tree, key)
        })
    }

    /// Visit every entry below `key`.
    ///
    /// The entries are gathered before the visitor runs, so the visitor is
    /// free to call back into the tree or its database.
    pub fn walk(&self, key: &str, mut visitor: impl FnMut(&str, &Node) -> Result<()>) -> Result<()> {
        let entries = self.repo.with_repo(|repo| {
            let tree = object::lookup_tree(repo, self.id.raw())?;
            let mut entries: Vec<(String, Node)> = Vec::new();
            tree_walk(repo, &tree, key, &mut |k, node| {
                entries.push((k.to_string(), node));
                Ok(())
            })?;
            Ok(entries)
        })?;
        for (key, node) in &entries {
            visitor(key.as_str(), node)?;
        }
        Ok(())
    }

    /// Dump the whole tree as text to `dst`.
    pub fn dump(&self, dst: &mut dyn Write) -> Result<()> {
        self.repo.with_repo(|repo| {
            let tree = object::lookup_tree(repo, self.id.raw())?;
            tree_dump(repo, &tree, "/", dst)
        })
    }

    /// A pipeline seeded with this tree's contents.
    pub fn pipeline(&self) -> Pipeline {
        Pipeline::new(self.repo.clone()).add("/", self, false)
    }
}

impl std::fmt::Debug for Tree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tree").field("id", &self.id.to_string()).finish()
    }
}

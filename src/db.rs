//! The database: a named ref bound to a repository.
//!
//! A database holds no tree state of its own. Every read resolves
//! `ref -> commit -> tree` against the object store; every write runs a
//! small transaction that reads the committed tree, transforms it, and
//! commits the result back under the optimistic protocol in
//! `storage::commit`. The only mutable state is a cached head commit, used
//! as the parent for the next commit and refreshed by reads that go through
//! `query()` (and by [`Database::update`]).
//!
//! `scope` returns a view of the database restricted to a key prefix.
//! Scoped views share the cached head with their parent; a write through a
//! scope is observable at the joined path through the unscoped database.

use std::io::{Read, Write};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::annotation::{annotation, parse_annotation};
use crate::error::Result;
use crate::path;
use crate::pipeline::Pipeline;
use crate::storage::{
    commit_to_ref, empty_tree_id, lookup_commit, lookup_tip, tree_scope, CommitId, Node,
    Repository, Tree, TreeId,
};

/// A git-backed hierarchical key/value database.
#[derive(Clone)]
pub struct Database {
    repo: Repository,
    ref_name: String,
    scope: String,
    state: Arc<RwLock<DbState>>,
}

struct DbState {
    head: Option<CommitId>,
}

impl Database {
    pub(crate) fn new(repo: Repository, ref_name: String) -> Result<Self> {
        let db = Self {
            repo,
            ref_name,
            scope: "/".to_string(),
            state: Arc::new(RwLock::new(DbState { head: None })),
        };
        // pick up the current tip, if the ref exists
        db.update()?;
        Ok(db)
    }

    /// The name of the ref this database is bound to.
    pub fn name(&self) -> &str {
        &self.ref_name
    }

    /// The repository backing this database.
    pub fn repo(&self) -> &Repository {
        &self.repo
    }

    /// A view of this database restricted to the subtree at `prefix`.
    /// Scopes compose: `db.scope("a").scope("b")` addresses `a/b`.
    pub fn scope(&self, prefix: &str) -> Database {
        Database {
            repo: self.repo.clone(),
            ref_name: self.ref_name.clone(),
            scope: path::join(&self.scope, prefix),
            state: self.state.clone(),
        }
    }

    /// The commit currently cached as head, if any.
    pub fn head(&self) -> Option<CommitId> {
        self.state.read().head
    }

    /// Re-read the ref and refresh the cached head. A missing ref clears
    /// it.
    pub fn update(&self) -> Result<()> {
        let head = self.repo.with_repo(|repo| {
            Ok(lookup_tip(repo, &self.ref_name).map(|commit| CommitId::new(commit.id())))
        })?;
        self.state.write().head = head;
        Ok(())
    }

    // ==================== Reads ====================

    /// Read the blob at `key` from the committed tree.
    pub fn get(&self, key: &str) -> Result<Vec<u8>> {
        self.committed_root()?.get(&path::join(&self.scope, key))
    }

    /// List the entry names of the subtree at `key`.
    pub fn list(&self, key: &str) -> Result<Vec<String>> {
        self.committed_root()?.list(&path::join(&self.scope, key))
    }

    /// Visit every entry below `key`.
    pub fn walk(&self, key: &str, visitor: impl FnMut(&str, &Node) -> Result<()>) -> Result<()> {
        self.committed_root()?
            .walk(&path::join(&self.scope, key), visitor)
    }

    /// Dump the database's contents as text to `dst`.
    pub fn dump(&self, dst: &mut dyn Write) -> Result<()> {
        let scoped = self.committed_root()?.scope(&self.scope)?;
        scoped.dump(dst)
    }

    // ==================== Writes ====================

    /// Store `value` at `key` and commit.
    pub fn set(&self, key: &str, value: impl AsRef<[u8]>) -> Result<()> {
        let msg = format!("set {}", path::canonical(key));
        self.transaction_with_message(msg)
            .set(key, value)
            .run()
            .map(|_| ())
    }

    /// Read `src` to the end and store the bytes at `key`, committing.
    pub fn set_stream(&self, key: &str, mut src: impl Read) -> Result<()> {
        let mut buf = Vec::new();
        src.read_to_end(&mut buf)?;
        self.set(key, buf)
    }

    /// Make sure a subtree exists at `key` and commit.
    pub fn mkdir(&self, key: &str) -> Result<()> {
        let msg = format!("mkdir {}", path::canonical(key));
        self.transaction_with_message(msg)
            .mkdir(key)
            .run()
            .map(|_| ())
    }

    /// Remove the entry at `key` and commit.
    pub fn delete(&self, key: &str) -> Result<()> {
        let msg = format!("delete {}", path::canonical(key));
        self.transaction_with_message(msg)
            .delete(key)
            .run()
            .map(|_| ())
    }

    // ==================== Pipelines ====================

    /// A pipeline seeded with this database's committed tree. Running it
    /// does not write anything back.
    pub fn query(&self) -> Pipeline {
        Pipeline::new(self.repo.clone()).query(self)
    }

    /// A pipeline seeded with this database's committed tree whose result
    /// is committed back when run. Operations appended by the caller run
    /// between the read and the commit.
    pub fn transaction(&self) -> Pipeline {
        self.transaction_with_message(String::new())
    }

    fn transaction_with_message(&self, msg: String) -> Pipeline {
        let db = self.clone();
        self.query().on_run(move |p| {
            let out = p.run()?;
            db.commit_tree(&out, &msg)
        })
    }

    // ==================== Annotations ====================

    /// Store `value` under the depth-prefixed annotation key for `target`.
    pub fn set_annotation(&self, target: &str, value: impl AsRef<[u8]>) -> Result<()> {
        self.set(&annotation(target), value)
    }

    /// Read the annotation stored for `target`.
    pub fn get_annotation(&self, target: &str) -> Result<Vec<u8>> {
        self.get(&annotation(target))
    }

    /// Remove the annotation stored for `target`.
    pub fn delete_annotation(&self, target: &str) -> Result<()> {
        self.delete(&annotation(target))
    }

    /// Visit every annotation as `(target, value)`.
    pub fn walk_annotations(&self, mut visitor: impl FnMut(&str, &[u8])) -> Result<()> {
        self.walk("/", |key, node| {
            if let Node::Blob(value) = node {
                let target = parse_annotation(key)?;
                visitor(target.as_str(), value.as_slice());
            }
            Ok(())
        })
    }

    // ==================== Internal plumbing ====================

    /// The committed root tree (unscoped). The empty tree if the ref does
    /// not exist yet.
    fn committed_root(&self) -> Result<Tree> {
        let id = self.repo.with_repo(|repo| match lookup_tip(repo, &self.ref_name) {
            Some(commit) => Ok(TreeId::new(commit.tree_id())),
            None => empty_tree_id(repo),
        })?;
        Ok(Tree::new(self.repo.clone(), id))
    }

    /// The committed tree as seen through this database's scope, recording
    /// the tip it was read from as the parent for the next commit. Both a
    /// missing ref and a missing scope read as the empty tree.
    pub(crate) fn committed_tree(&self) -> Result<Tree> {
        let (head, id) = self.repo.with_repo(|repo| match lookup_tip(repo, &self.ref_name) {
            Some(commit) => {
                let head = CommitId::new(commit.id());
                let root = commit.tree()?;
                let id = if self.scope == "/" {
                    TreeId::new(root.id())
                } else {
                    match tree_scope(repo, &root, &self.scope) {
                        Ok(sub) => TreeId::new(sub.id()),
                        Err(e) if e.is_not_found() => empty_tree_id(repo)?,
                        Err(e) => return Err(e),
                    }
                };
                Ok((Some(head), id))
            }
            None => Ok((None, empty_tree_id(repo)?)),
        })?;
        self.state.write().head = head;
        Ok(Tree::new(self.repo.clone(), id))
    }

    /// Commit `out` (a tree in scope coordinates) to the ref, using the
    /// cached head as parent. The scoped tree is grafted onto the current
    /// root at the scope prefix; conflicts with concurrent writers are
    /// resolved by the commit protocol. Returns `out` so pipeline commit
    /// steps pass their input through.
    pub(crate) fn commit_tree(&self, out: &Tree, msg: &str) -> Result<Tree> {
        let mut state = self.state.write();
        let parent = state.head;

        let root = if self.scope == "/" {
            out.clone()
        } else {
            let base = match parent {
                Some(commit) => self.root_tree_of(commit)?,
                None => self.repo.empty_tree()?,
            };
            base.add(&self.scope, out, false)?
        };

        let sig = self.repo.signature();
        let commit = self.repo.with_repo(|repo| {
            commit_to_ref(repo, &sig, root.id(), parent, &self.ref_name, msg)
        })?;
        debug!(ref_name = %self.ref_name, commit = %commit.short(), "committed");
        state.head = Some(commit);
        Ok(out.clone())
    }

    fn root_tree_of(&self, commit: CommitId) -> Result<Tree> {
        let id = self.repo.with_repo(|repo| {
            let commit = lookup_commit(repo, commit.raw())?;
            Ok(TreeId::new(commit.tree_id()))
        })?;
        Ok(Tree::new(self.repo.clone(), id))
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("ref", &self.ref_name)
            .field("scope", &self.scope)
            .finish()
    }
}

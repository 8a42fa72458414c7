//! The shared repository handle.
//!
//! Wraps a bare `git2::Repository` behind a lock so that databases, trees
//! and commits created from it can be used from multiple threads. Clone the
//! handle to share it; it uses `Arc` internally. The handle must outlive
//! every tree and database derived from it, which ownership already
//! guarantees here.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use git2::Repository as GitRepository;
use parking_lot::{Mutex, RwLock};
use rand::rngs::OsRng;
use rand::RngCore;
use tracing::debug;

use crate::db::Database;
use crate::error::{Error, Result};
use crate::storage::commit::commit_to_ref;
use crate::storage::object;
use crate::storage::tree::Tree;
use crate::storage::types::{Signature, TreeId};

/// A handle to a bare Git repository acting as the object store.
#[derive(Clone)]
pub struct Repository {
    inner: Arc<RepositoryInner>,
}

struct RepositoryInner {
    // libgit2 repositories are not thread-safe; every access goes through
    // this lock.
    repo: Mutex<GitRepository>,
    path: PathBuf,
    signature: RwLock<Signature>,
}

impl Repository {
    /// Open the bare repository at `path`, creating it if it does not
    /// exist.
    pub fn init(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        match GitRepository::open(path) {
            Ok(repo) => Ok(Self::wrap(repo, path)),
            Err(_) => {
                let repo = GitRepository::init_bare(path)?;
                Ok(Self::wrap(repo, path))
            }
        }
    }

    /// Open an existing bare repository at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let repo = GitRepository::open(path)?;
        Ok(Self::wrap(repo, path))
    }

    fn wrap(repo: GitRepository, path: &Path) -> Self {
        Self {
            inner: Arc::new(RepositoryInner {
                repo: Mutex::new(repo),
                path: path.to_path_buf(),
                signature: RwLock::new(Signature::default()),
            }),
        }
    }

    /// Filesystem path of the repository.
    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Replace the identity used for commits created through this handle.
    pub fn set_signature(&self, signature: Signature) {
        *self.inner.signature.write() = signature;
    }

    pub(crate) fn signature(&self) -> Signature {
        self.inner.signature.read().clone()
    }

    /// Run `f` with exclusive access to the underlying repository.
    pub(crate) fn with_repo<T>(&self, f: impl FnOnce(&GitRepository) -> Result<T>) -> Result<T> {
        let repo = self.inner.repo.lock();
        f(&repo)
    }

    /// Bind a database to `ref_name` (e.g. `refs/heads/myapp`).
    ///
    /// As a convenience, an empty `ref_name` allocates a fresh unique ref
    /// seeded with an empty commit.
    pub fn db(&self, ref_name: &str) -> Result<Database> {
        let ref_name = if ref_name.is_empty() {
            let mut id = [0u8; 32];
            OsRng.fill_bytes(&mut id);
            let ref_name = format!("refs/heads/{}", hex::encode(id));
            let sig = self.signature();
            self.with_repo(|repo| {
                let empty = object::empty_tree_id(repo)?;
                commit_to_ref(repo, &sig, empty, None, &ref_name, "new head")?;
                Ok(())
            })?;
            ref_name
        } else {
            ref_name.to_string()
        };
        Database::new(self.clone(), ref_name)
    }

    /// The empty tree.
    pub fn empty_tree(&self) -> Result<Tree> {
        let id = self.with_repo(object::empty_tree_id)?;
        Ok(Tree::new(self.clone(), id))
    }

    /// Resolve a hex object id to a tree. Commit ids are accepted too and
    /// resolve to the commit's root tree.
    pub fn tree_by_id(&self, id: &str) -> Result<Tree> {
        let oid = git2::Oid::from_str(id).map_err(|_| Error::InvalidPath(id.to_string()))?;
        let tree_id = self.with_repo(|repo| {
            if let Ok(tree) = object::lookup_tree(repo, oid) {
                return Ok(TreeId::new(tree.id()));
            }
            let commit = object::lookup_commit(repo, oid)
                .map_err(|_| Error::NotFound(format!("not a tree or commit: {}", id)))?;
            Ok(TreeId::new(commit.tree_id()))
        })?;
        Ok(Tree::new(self.clone(), tree_id))
    }

    /// Fetch `from_ref` from the repository at `url` into the local
    /// `to_ref`. An empty `from_ref` defaults to `to_ref`. Databases bound
    /// to `to_ref` observe the new tip on their next read.
    pub fn pull(&self, url: &str, from_ref: &str, to_ref: &str) -> Result<()> {
        let from = if from_ref.is_empty() { to_ref } else { from_ref };
        let refspec = format!("{}:{}", from, to_ref);
        debug!(url, refspec, "fetching from remote");
        self.with_repo(|repo| {
            let mut remote = repo.remote_anonymous(url)?;
            remote.fetch(&[refspec.as_str()], None, None)?;
            Ok(())
        })
    }

    /// Push the local `from_ref` to `to_ref` in the repository at `url`.
    /// The remote ref is created if absent. An empty `to_ref` defaults to
    /// `from_ref`.
    pub fn push(&self, url: &str, from_ref: &str, to_ref: &str) -> Result<()> {
        let to = if to_ref.is_empty() { from_ref } else { to_ref };
        // the '+' prefix forces the update so the remote ref is created if
        // it doesn't exist
        let refspec = format!("+{}:{}", from_ref, to);
        debug!(url, refspec, "pushing to remote");
        self.with_repo(|repo| {
            let mut remote = repo.remote_anonymous(url)?;
            remote.push(&[refspec.as_str()], None)?;
            Ok(())
        })
    }
}

impl std::fmt::Debug for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("path", &self.inner.path)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::object::EMPTY_TREE_HEX;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Repository) {
        let dir = TempDir::new().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        (dir, repo)
    }

    #[test]
    fn test_init_then_open() {
        let dir = TempDir::new().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        assert_eq!(repo.path(), dir.path());
        drop(repo);

        // init on an existing repository opens it
        assert!(Repository::init(dir.path()).is_ok());
        assert!(Repository::open(dir.path()).is_ok());
    }

    #[test]
    fn test_open_missing_fails() {
        assert!(Repository::open("/nonexistent/packdb-test-path").is_err());
    }

    #[test]
    fn test_empty_tree_constant() {
        let (_dir, repo) = setup();
        let empty = repo.empty_tree().unwrap();
        assert_eq!(empty.id().to_string(), EMPTY_TREE_HEX);
    }

    #[test]
    fn test_tree_by_id() {
        let (_dir, repo) = setup();
        let tree = repo.empty_tree().unwrap().set("foo", "bar").unwrap();

        // by tree id
        let resolved = repo.tree_by_id(&tree.id().to_string()).unwrap();
        assert_eq!(resolved.get("foo").unwrap(), b"bar");

        // by commit id
        let db = repo.db("refs/heads/test").unwrap();
        db.set("foo", "bar").unwrap();
        let head = db.head().unwrap();
        let resolved = repo.tree_by_id(&head.to_string()).unwrap();
        assert_eq!(resolved.get("foo").unwrap(), b"bar");

        // garbage
        assert!(repo.tree_by_id("zzzz").is_err());
        assert!(repo
            .tree_by_id("0123456789012345678901234567890123456789")
            .is_err());
    }

    #[test]
    fn test_db_with_generated_ref() {
        let (_dir, repo) = setup();
        let db = repo.db("").unwrap();
        assert!(db.name().starts_with("refs/heads/"));
        // the fresh ref is seeded with an empty commit
        assert!(db.head().is_some());

        let db2 = repo.db("").unwrap();
        assert_ne!(db.name(), db2.name());
    }

    #[test]
    fn test_push_creates_remote_ref() {
        let (_src_dir, src) = setup();
        let (_dst_dir, dst) = setup();

        let src_db = src.db("refs/heads/test").unwrap();
        src_db.set("foo/bar/baz", "hello world").unwrap();

        src.push(
            dst.path().to_str().unwrap(),
            "refs/heads/test",
            "refs/heads/test",
        )
        .unwrap();

        let dst_db = dst.db("refs/heads/test").unwrap();
        assert_eq!(dst_db.get("foo/bar/baz").unwrap(), b"hello world");
    }

    #[test]
    fn test_pull() {
        let (_src_dir, src) = setup();
        let (_dst_dir, dst) = setup();

        let src_db = src.db("refs/heads/test").unwrap();
        src_db.set("foo/bar/baz", "hello world").unwrap();

        dst.pull(src.path().to_str().unwrap(), "", "refs/heads/test")
            .unwrap();

        let dst_db = dst.db("refs/heads/test").unwrap();
        assert_eq!(dst_db.get("foo/bar/baz").unwrap(), b"hello world");
    }
}

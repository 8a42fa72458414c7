//! Composable tree transformations.
//!
//! A pipeline is an ordered list of operations, each a function from a tree
//! to a tree. Running the pipeline feeds an empty tree into the first
//! operation and each operation's output into the next. Pipelines make it
//! cheap to assemble trees of arbitrary shape:
//!
//! ```no_run
//! # use packdb::{Repository, Pipeline};
//! # fn demo(repo: &Repository) -> packdb::Result<()> {
//! let mut p = Pipeline::new(repo.clone()).set("foo", "bar").mkdir("dir");
//! let tree = p.run()?;
//! # Ok(())
//! # }
//! ```
//!
//! Databases hand out pipelines wired to themselves: `query()` starts from
//! the committed tree, `transaction()` additionally commits the result back
//! when run.

use std::io::Write;

use crate::db::Database;
use crate::error::{Error, Result};
use crate::storage::{Node, Repository, Tree};

type Op = Box<dyn FnMut(Tree) -> Result<Tree> + Send>;
type RunHook = Box<dyn FnMut(&mut Pipeline) -> Result<Tree> + Send>;

/// An ordered list of tree operations.
pub struct Pipeline {
    repo: Repository,
    ops: Vec<Op>,
    on_run: Option<RunHook>,
}

impl Pipeline {
    pub fn new(repo: Repository) -> Self {
        Self {
            repo,
            ops: Vec::new(),
            on_run: None,
        }
    }

    fn push(mut self, op: Op) -> Self {
        self.ops.push(op);
        self
    }

    /// Run every operation in sequence, starting from the empty tree, and
    /// return the final tree. The pipeline aborts on the first error.
    pub fn run(&mut self) -> Result<Tree> {
        // The hook wraps the whole run; it is parked while it executes so
        // the `run` it calls back into performs the actual steps.
        if let Some(mut hook) = self.on_run.take() {
            let result = hook(self);
            self.on_run = Some(hook);
            return result;
        }
        let mut tree = self.repo.empty_tree()?;
        for op in &mut self.ops {
            tree = op(tree)?;
        }
        Ok(tree)
    }

    /// Run the pipeline, then read the blob at `key` from the result.
    pub fn get(&mut self, key: &str) -> Result<Vec<u8>> {
        self.run()?.get(key)
    }

    /// Install a hook that wraps `run`. The hook receives the pipeline and
    /// is expected to call `run` on it (which executes the steps), possibly
    /// doing work before and after.
    pub fn on_run(
        mut self,
        hook: impl FnMut(&mut Pipeline) -> Result<Tree> + Send + 'static,
    ) -> Self {
        self.on_run = Some(Box::new(hook));
        self
    }

    /// Append: store `value` at `key`, overwriting any previous value.
    pub fn set(self, key: &str, value: impl AsRef<[u8]>) -> Self {
        let key = key.to_string();
        let value = value.as_ref().to_vec();
        self.push(Box::new(move |tree| tree.set(&key, &value)))
    }

    /// Append: remove the entry at `key`.
    pub fn delete(self, key: &str) -> Self {
        let key = key.to_string();
        self.push(Box::new(move |tree| tree.delete(&key)))
    }

    /// Append: make sure a subtree exists at `key`.
    pub fn mkdir(self, key: &str) -> Self {
        let key = key.to_string();
        self.push(Box::new(move |tree| tree.mkdir(&key)))
    }

    /// Append: graft `overlay` at `key` (merged entry-by-entry when `merge`
    /// is true, shadowing otherwise).
    pub fn add(self, key: &str, overlay: &Tree, merge: bool) -> Self {
        let key = key.to_string();
        let overlay = overlay.clone();
        self.push(Box::new(move |tree| tree.add(&key, &overlay, merge)))
    }

    /// Append: run `query` and graft its result at `key`.
    pub fn add_query(self, key: &str, query: Pipeline, merge: bool) -> Self {
        let key = key.to_string();
        let mut query = query;
        self.push(Box::new(move |tree| {
            let overlay = query.run()?;
            tree.add(&key, &overlay, merge)
        }))
    }

    /// Append: replace the tree by its subtree at `key`.
    pub fn scope(self, key: &str) -> Self {
        let key = key.to_string();
        self.push(Box::new(move |tree| tree.scope(&key)))
    }

    /// Append: visit every entry of the tree, then pass it through.
    pub fn walk(self, mut visitor: impl FnMut(&str, &Node) -> Result<()> + Send + 'static) -> Self {
        self.push(Box::new(move |tree| {
            tree.walk("/", &mut visitor)?;
            Ok(tree)
        }))
    }

    /// Append: dump the tree as text to `dst`, then pass it through.
    pub fn dump(self, mut dst: impl Write + Send + 'static) -> Self {
        self.push(Box::new(move |tree| {
            tree.dump(&mut dst)?;
            Ok(tree)
        }))
    }

    /// Append: fail the pipeline unless the blob at `key` equals `value`.
    /// Passes the tree through unmodified.
    pub fn assert_eq(self, key: &str, value: impl AsRef<[u8]>) -> Self {
        let key = key.to_string();
        let value = value.as_ref().to_vec();
        self.push(Box::new(move |tree| {
            let found = tree.get(&key)?;
            if found != value {
                return Err(Error::AssertionFailed(format!(
                    "'{}': expected {:?}, found {:?}",
                    key,
                    String::from_utf8_lossy(&value),
                    String::from_utf8_lossy(&found),
                )));
            }
            Ok(tree)
        }))
    }

    /// Append: fail the pipeline if a blob exists at `key`.
    pub fn assert_not_exist(self, key: &str) -> Self {
        let key = key.to_string();
        self.push(Box::new(move |tree| {
            if tree.get(&key).is_ok() {
                return Err(Error::AssertionFailed(format!("'{}' is set", key)));
            }
            Ok(tree)
        }))
    }

    /// Append: discard the input and continue from an empty tree.
    pub fn empty(self) -> Self {
        self.push(Box::new(move |tree| tree.repo().empty_tree()))
    }

    /// Append: pass the input through unmodified.
    pub fn nop(self) -> Self {
        self.push(Box::new(move |tree| Ok(tree)))
    }

    /// Append: discard the input and continue from `db`'s committed tree
    /// (the empty tree if the database has never been committed to).
    pub fn query(self, db: &Database) -> Self {
        let db = db.clone();
        self.push(Box::new(move |_tree| db.committed_tree()))
    }

    /// Append: commit the input tree to `db` and pass it through.
    pub fn commit(self, db: &Database) -> Self {
        let db = db.clone();
        self.push(Box::new(move |tree| db.commit_tree(&tree, "")))
    }
}

/// A pipeline running `first`'s steps, then `second`'s.
pub fn concat(mut first: Pipeline, second: Pipeline) -> Pipeline {
    first.ops.extend(second.ops);
    first.on_run = first.on_run.or(second.on_run);
    first
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::EMPTY_TREE_HEX;
    use std::io;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    fn setup() -> (TempDir, Repository) {
        let dir = TempDir::new().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        (dir, repo)
    }

    /// A writer that can be read back after the pipeline consumed it.
    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl SharedBuf {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    impl io::Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_empty_pipeline() {
        let (_dir, repo) = setup();
        let mut p = Pipeline::new(repo);
        let tree = p.run().unwrap();
        assert_eq!(tree.id().to_string(), EMPTY_TREE_HEX);
    }

    #[test]
    fn test_set_chain() {
        let (_dir, repo) = setup();
        let mut p = Pipeline::new(repo)
            .set("foo", "bar")
            .set("a/b/c/d", "hello world")
            .set("foo", "baz");
        let tree = p.run().unwrap();
        let mut assert = tree
            .pipeline()
            .assert_eq("foo", "baz")
            .assert_eq("a/b/c/d", "hello world");
        assert.run().unwrap();
    }

    #[test]
    fn test_assertions() {
        let (_dir, repo) = setup();
        let tree = repo.empty_tree().unwrap();

        let out = tree.pipeline().assert_not_exist("foo").run().unwrap();
        assert_eq!(out.id(), tree.id());
        assert!(tree.pipeline().assert_eq("foo", "bar").run().is_err());

        let tree = tree.set("foo", "bar").unwrap();
        assert!(tree.pipeline().assert_not_exist("foo").run().is_err());
        let out = tree.pipeline().assert_eq("foo", "bar").run().unwrap();
        assert_eq!(out.id(), tree.id());
        assert!(tree.pipeline().assert_eq("foo", "WRONG").run().is_err());
    }

    #[test]
    fn test_add_tree() {
        let (_dir, repo) = setup();
        let mut p1 = Pipeline::new(repo.clone()).set("foo", "bar");
        let tree1 = p1.run().unwrap();
        let mut p2 = Pipeline::new(repo)
            .set("a/b/c/d", "hello world")
            .add("a", &tree1, true);
        let tree2 = p2.run().unwrap();
        tree2
            .pipeline()
            .assert_eq("a/b/c/d", "hello world")
            .assert_eq("a/foo", "bar")
            .run()
            .unwrap();
    }

    #[test]
    fn test_add_query() {
        let (_dir, repo) = setup();
        let foobar = Pipeline::new(repo.clone()).set("foo", "bar");
        let mut p = Pipeline::new(repo)
            .set("hello", "world")
            .set("foo", "abc")
            .add_query("subdir", foobar, true);
        let tree = p.run().unwrap();
        tree.pipeline()
            .assert_eq("hello", "world")
            .assert_eq("subdir/foo", "bar")
            .assert_eq("foo", "abc")
            .run()
            .unwrap();
    }

    #[test]
    fn test_delete() {
        let (_dir, repo) = setup();
        let mut p = Pipeline::new(repo).set("hello", "world").delete("hello");
        let tree = p.run().unwrap();
        tree.pipeline().assert_not_exist("hello").run().unwrap();
    }

    #[test]
    fn test_scope() {
        let (_dir, repo) = setup();
        let mut p = Pipeline::new(repo).set("a/b/c/d", "hello").scope("a/b/c");
        let tree = p.run().unwrap();
        tree.pipeline().assert_eq("d", "hello").run().unwrap();
    }

    #[test]
    fn test_dump() {
        let (_dir, repo) = setup();
        let buf = SharedBuf::default();
        Pipeline::new(repo)
            .set("foo", "bar")
            .dump(buf.clone())
            .delete("foo")
            .run()
            .unwrap();
        assert_eq!(buf.contents(), "foo = bar\n");
    }

    #[test]
    fn test_nop_and_empty() {
        let (_dir, repo) = setup();
        let mut p = Pipeline::new(repo).set("foo", "bar").nop();
        let tree = p.run().unwrap();
        assert_eq!(tree.get("foo").unwrap(), b"bar");

        let mut p = tree.pipeline().empty();
        let emptied = p.run().unwrap();
        assert_eq!(emptied.id().to_string(), EMPTY_TREE_HEX);
    }

    #[test]
    fn test_on_run() {
        let (_dir, repo) = setup();
        let called = Arc::new(Mutex::new(false));
        let called2 = called.clone();

        let mut p1 = Pipeline::new(repo.clone());
        let mut p2 = Pipeline::new(repo).on_run(move |p| {
            *called2.lock().unwrap() = true;
            p.run()
        });

        let t1 = p1.run().unwrap();
        let t2 = p2.run().unwrap();
        assert_eq!(t1.id(), t2.id());
        assert!(*called.lock().unwrap());
    }

    #[test]
    fn test_concat() {
        let (_dir, repo) = setup();
        let input = repo.empty_tree().unwrap().set("foo", "bar").unwrap();

        let step1 = Pipeline::new(repo.clone()).add("/", &input, false);
        let step2 = Pipeline::new(repo).set("hello", "world");
        let mut p = concat(step1, step2)
            .assert_eq("foo", "bar")
            .assert_eq("hello", "world");
        p.run().unwrap();

        // a pipeline can be run more than once
        let out = p.run().unwrap();
        out.pipeline()
            .assert_eq("foo", "bar")
            .assert_eq("hello", "world")
            .run()
            .unwrap();
    }

    #[test]
    fn test_pipeline_get() {
        let (_dir, repo) = setup();
        let mut p = Pipeline::new(repo).set("foo", "bar");
        assert_eq!(p.get("foo").unwrap(), b"bar");
    }
}

//! packdb - a transactional, hierarchical key/value database stored in a
//! bare Git repository.
//!
//! Each database is a named ref pointing at a chain of commits; each
//! commit's root tree encodes the database contents as a directory of blobs
//! (values) and subtrees (namespaces). Because every intermediate state is
//! an immutable content-addressed object, snapshots are cryptographically
//! verifiable, replication is a fetch or a push, and identical subtrees are
//! stored once.
//!
//! # Example
//!
//! ```no_run
//! use packdb::Repository;
//!
//! # fn main() -> packdb::Result<()> {
//! let repo = Repository::init("./data.git")?;
//! let db = repo.db("refs/heads/myapp")?;
//!
//! db.set("config/hostname", "example.com")?;
//! assert_eq!(db.get("config/hostname")?, b"example.com");
//!
//! // read-modify-write with assertions, committed atomically
//! let mut tx = db
//!     .transaction()
//!     .assert_not_exist("lock")
//!     .set("lock", "held");
//! tx.run()?;
//! # Ok(())
//! # }
//! ```
//!
//! Concurrent writers on the same ref are reconciled by an optimistic
//! commit protocol: a ref update that loses the race is retried as a
//! three-way merge, so no committed state is ever silently lost.

pub mod annotation;
pub mod archive;
mod db;
mod error;
pub mod path;
mod pipeline;
mod storage;

pub use annotation::{annotation, parse_annotation};
pub use archive::{meta_path, tar_to_tree, tree_to_tar, DATA_TREE, META_TREE};
pub use db::Database;
pub use error::{Error, Result};
pub use pipeline::{concat, Pipeline};
pub use storage::{CommitId, Node, Repository, Signature, Tree, TreeId, EMPTY_TREE_HEX};

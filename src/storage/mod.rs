//! Storage layer: everything that touches the Git object store.
//!
//! The split mirrors the object model. `object` does typed lookups and
//! error classification, `tree` holds the immutable tree algebra, `commit`
//! implements the optimistic ref-update protocol, and `repository` is the
//! shared handle the rest of the crate hangs off.

mod commit;
mod object;
mod repository;
mod tree;
mod types;

pub use object::EMPTY_TREE_HEX;
pub use repository::Repository;
pub use tree::{Node, Tree};
pub use types::{CommitId, Signature, TreeId};

pub(crate) use commit::commit_to_ref;
pub(crate) use object::{empty_tree_id, lookup_commit, lookup_tip};
pub(crate) use tree::tree_scope;

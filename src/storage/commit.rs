//! Commit creation and the optimistic ref-update protocol.
//!
//! Advancing a ref is the only point where concurrent writers meet. The
//! loop in [`commit_to_ref`] first tries a plain commit whose ref update
//! acts as a compare-and-swap (libgit2 refuses the update when the ref no
//! longer points at the expected parent). On a conflict it re-reads the tip,
//! three-way-merges our tree with it, resolves every conflict in favor of
//! our side at the file granularity, and retries with a merge commit whose
//! parents are the original parent and the observed tip. No committed state
//! is ever silently dropped.

use std::path::Path;

use git2::Repository as GitRepository;
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::storage::object;
use crate::storage::types::{CommitId, Signature, TreeId};

/// Upper bound on CAS retries before giving up with `RetryExhausted`.
pub(crate) const MAX_COMMIT_RETRIES: usize = 64;

/// Stage bits inside an index entry's flags.
const STAGE_MASK: u16 = 0x3000;

/// Commit `tree` onto `refname` with `parent` as first parent, retrying
/// with a merge when the ref is advanced concurrently.
///
/// Committing a tree identical to the parent's is a no-op and returns the
/// parent commit; the ref is not advanced.
pub(crate) fn commit_to_ref(
    repo: &GitRepository,
    sig: &Signature,
    tree: TreeId,
    parent: Option<CommitId>,
    refname: &str,
    msg: &str,
) -> Result<CommitId> {
    if let Some(parent_id) = parent {
        let parent_commit = object::lookup_commit(repo, parent_id.raw())?;
        if parent_commit.tree_id() == tree.raw() {
            return Ok(parent_id);
        }
    }

    let parents: Vec<CommitId> = parent.into_iter().collect();
    let mut need_merge = false;
    let mut tmp_commit: Option<CommitId> = None;

    for attempt in 0..MAX_COMMIT_RETRIES {
        if !need_merge {
            match mk_commit(repo, sig, Some(refname), msg, tree, &parents) {
                Ok(id) => return Ok(id),
                Err(Error::Git(e)) if object::is_concurrency_conflict(&e) => {
                    trace!(attempt, refname, "ref moved, switching to merge");
                    need_merge = true;
                }
                Err(e) => return Err(e),
            }
            continue;
        }

        // An intermediary commit of our tree, used only as merge input.
        // It updates no ref and never becomes part of the history.
        let tmp = match tmp_commit {
            Some(id) => id,
            None => {
                let id = mk_commit(repo, sig, None, msg, tree, &parents)?;
                tmp_commit = Some(id);
                id
            }
        };

        let tip = match object::lookup_tip(repo, refname) {
            Some(commit) => CommitId::new(commit.id()),
            None => {
                // The ref disappeared since the conflict; a plain commit
                // will recreate it.
                need_merge = false;
                continue;
            }
        };

        let merged_tree = merge_prefer_ours(repo, tmp, tip)?;

        let mut merge_parents = parents.clone();
        merge_parents.push(tip);
        match mk_commit(repo, sig, Some(refname), msg, merged_tree, &merge_parents) {
            Ok(id) => {
                debug!(refname, tip = %tip.short(), "committed merge after conflict");
                return Ok(id);
            }
            Err(Error::Git(e)) if object::is_concurrency_conflict(&e) => {
                trace!(attempt, refname, "tip moved again, retrying merge");
            }
            Err(e) => return Err(e),
        }
    }
    Err(Error::RetryExhausted(MAX_COMMIT_RETRIES))
}

/// Create a commit object from `tree` and `parents`, optionally updating
/// `refname` to point at it (the CAS point).
pub(crate) fn mk_commit(
    repo: &GitRepository,
    sig: &Signature,
    refname: Option<&str>,
    msg: &str,
    tree: TreeId,
    parents: &[CommitId],
) -> Result<CommitId> {
    let tree = object::lookup_tree(repo, tree.raw())?;
    let signature = sig.to_git2()?;
    let parent_commits: Vec<git2::Commit<'_>> = parents
        .iter()
        .map(|id| object::lookup_commit(repo, id.raw()))
        .collect::<Result<_>>()?;
    let parent_refs: Vec<&git2::Commit<'_>> = parent_commits.iter().collect();
    let oid = repo.commit(refname, &signature, &signature, msg, &tree, &parent_refs)?;
    Ok(CommitId::new(oid))
}

/// Three-way-merge the trees of `ours` and `theirs` and resolve every
/// conflict by keeping our side. A path our side deleted stays deleted.
fn merge_prefer_ours(repo: &GitRepository, ours: CommitId, theirs: CommitId) -> Result<TreeId> {
    let our_commit = object::lookup_commit(repo, ours.raw())?;
    let their_commit = object::lookup_commit(repo, theirs.raw())?;
    let mut index = repo.merge_commits(&our_commit, &their_commit, None)?;

    if index.has_conflicts() {
        let conflicts: Vec<git2::IndexConflict> = index
            .conflicts()?
            .collect::<std::result::Result<_, _>>()?;
        for conflict in conflicts {
            let path_bytes = conflict
                .our
                .as_ref()
                .or(conflict.their.as_ref())
                .or(conflict.ancestor.as_ref())
                .map(|entry| entry.path.clone());
            let Some(path_bytes) = path_bytes else { continue };
            let path_str = String::from_utf8_lossy(&path_bytes).into_owned();
            let path = Path::new(&path_str);

            for (side, stage) in [
                (&conflict.ancestor, 1),
                (&conflict.our, 2),
                (&conflict.their, 3),
            ] {
                if side.is_some() {
                    index.remove(path, stage)?;
                }
            }
            if let Some(mut our_entry) = conflict.our {
                our_entry.flags &= !STAGE_MASK;
                index.add(&our_entry)?;
            }
        }
    }

    let merged = index
        .write_tree_to(repo)
        .map_err(|e| Error::MergeFailure(e.to_string()))?;
    Ok(TreeId::new(merged))
}

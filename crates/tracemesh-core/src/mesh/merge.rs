//! Folding a linear branch into the accumulated mesh.
//!
//! A branch — a single-path mesh built from one trace — is merged in two
//! phases. A greedy prefix match walks both graphs in lockstep as long as a
//! successor with the expected content hash exists. At a divergence the
//! merger re-synchronizes: the straight tail of the branch is compared,
//! via longest common subsequence of hashes, against every straight-line
//! path through the mesh below the pivot, and the branch is grafted back in
//! at the first rediscovered common hash (or as a wholly parallel branch
//! when no overlap ever resumes). The loop then re-enters the prefix match
//! from the join.
use std::fmt;

use tracing::debug;

use super::lcs::longest_common_subsequence;
use super::{Mesh, MeshNode, NodeId};
use crate::options::OptionAssignment;
use crate::trace::TraceEntry;

/// Fatal merge failures.
///
/// Every variant marks an "impossible" state: the mesh or branch violated a
/// structural invariant mid-merge. The build is aborted rather than
/// guessing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeError {
    /// A node id did not resolve to a live node.
    MissingNode(NodeId),
    /// The diverging branch node did not have exactly one predecessor to
    /// pivot the LCS lookback on.
    PivotLookback {
        /// The diverging branch node.
        node: NodeId,
        /// How many predecessors it had.
        predecessors: usize,
    },
    /// A non-empty LCS promised a re-entry hash that neither side reached.
    ReentryNotFound {
        /// The hash that was expected to reappear.
        hash: String,
    },
}

impl fmt::Display for MergeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MergeError::MissingNode(id) => write!(f, "node {id} is not part of the mesh"),
            MergeError::PivotLookback { node, predecessors } => write!(
                f,
                "branch node {node} has {predecessors} predecessors, expected exactly one"
            ),
            MergeError::ReentryNotFound { hash } => {
                write!(f, "LCS re-entry hash {hash:?} was not found on either side")
            }
        }
    }
}

impl std::error::Error for MergeError {}

/// Builds a single-path mesh ("branch") from one trace.
///
/// Each entry becomes a fresh node hashed from its content, carrying an
/// independent copy of `assignment` as its only option-set entry — the
/// merger mutates option-sets in place, so sharing would corrupt siblings.
pub fn build_branch(entries: &[TraceEntry], assignment: &OptionAssignment) -> Mesh {
    let mut branch = Mesh::new();
    for entry in entries {
        let id = branch.add_entry_node(*entry);
        if let Some(node) = branch.node_mut(id) {
            node.options = vec![assignment.clone()];
        }
        branch.append_node(id);
    }
    branch
}

/// Outcome of a prefix-match phase.
enum PrefixOutcome {
    /// The branch was consumed to its end.
    Done,
    /// Lockstep broke: `left` is the diverging branch node, `right` the
    /// mesh node whose successors did not match it.
    Diverged { left: NodeId, right: NodeId },
}

fn node_of(mesh: &Mesh, id: NodeId) -> Result<&MeshNode, MergeError> {
    mesh.node(id).ok_or(MergeError::MissingNode(id))
}

impl Mesh {
    /// Builds a branch from `entries` under `assignment` and merges it into
    /// this mesh.
    ///
    /// # Errors
    ///
    /// Returns a [`MergeError`] if the merge reaches a structurally
    /// impossible state; the mesh must then be considered corrupt.
    pub fn insert_trace(
        &mut self,
        entries: &[TraceEntry],
        assignment: &OptionAssignment,
    ) -> Result<(), MergeError> {
        let branch = build_branch(entries, assignment);
        self.merge_branch(&branch)
    }

    /// Merges a single-path branch into this mesh.
    ///
    /// Afterwards every entry of the branch is represented in the mesh:
    /// shared prefixes and suffixes are collapsed onto existing nodes
    /// (bumping their probability and extending their option-sets), and
    /// distinguishing runs become parallel edges.
    ///
    /// # Errors
    ///
    /// See [`Mesh::insert_trace`].
    pub fn merge_branch(&mut self, branch: &Mesh) -> Result<(), MergeError> {
        let mut left = branch.start();
        let mut right = self.start();
        let total = branch.first_path(branch.start()).len();
        let mut consumed = 0usize;

        self.bump_merged_traces();
        debug!(total, "merging branch into mesh");

        loop {
            let outcome = self.merge_prefix(branch, left, right, &mut consumed)?;
            debug!(consumed, total, "merge progress");

            let (bl, br) = match outcome {
                PrefixOutcome::Done => return Ok(()),
                PrefixOutcome::Diverged { left, right } => (left, right),
            };

            let pivot = {
                let prevs = node_of(branch, bl)?.predecessors();
                match prevs {
                    [p] => *p,
                    other => {
                        return Err(MergeError::PivotLookback {
                            node: bl,
                            predecessors: other.len(),
                        });
                    }
                }
            };

            let (best_path, lcs) = self.lcs_resync(branch, pivot, br)?;
            debug!(lcs_len = lcs.len(), "re-synchronized via LCS");

            if lcs.is_empty() {
                // No overlap ever resumes: clone the remainder of the
                // branch as a parallel run chained off the pivot.
                let mut old = br;
                let mut l = bl;
                loop {
                    let id = self.create_node(false);
                    self.merge_from_branch(branch, l, id)?;
                    self.insert_node(old, id);
                    old = id;
                    consumed += 1;
                    match node_of(branch, l)?.successors().first() {
                        None => {
                            debug!(consumed, total, "merge progress");
                            return Ok(());
                        }
                        Some(&n) => l = n,
                    }
                }
            }

            // Overlap resumes at the first LCS hash: chain fresh nodes for
            // the differing branch run, advance the mesh side to the
            // re-entry node, then merge and link the new tail into it.
            let reentry = lcs[0].clone();
            let mut old = br;
            let mut l = bl;
            let mut left_found = false;
            loop {
                if node_of(branch, l)?.hash == reentry {
                    debug!(hash = %reentry, "found left re-entry point");
                    left_found = true;
                    break;
                }
                debug!(hash = %node_of(branch, l)?.hash, "creating branch node");
                let id = self.create_node(false);
                self.merge_from_branch(branch, l, id)?;
                self.insert_node(old, id);
                old = id;
                consumed += 1;
                match node_of(branch, l)?.successors().first() {
                    Some(&n) => l = n,
                    None => break,
                }
            }

            let right_entry = best_path
                .iter()
                .copied()
                .find(|&cand| self.hash_of(cand) == Some(reentry.as_str()));

            match (left_found, right_entry) {
                (true, Some(r)) => {
                    self.merge_from_branch(branch, l, r)?;
                    self.link(old, r);
                    consumed += 1;
                    left = l;
                    right = r;
                }
                _ => return Err(MergeError::ReentryNotFound { hash: reentry }),
            }
        }
    }

    /// Walks branch and mesh in lockstep from `left`/`right`, merging every
    /// matched node, until the branch ends or no successor matches.
    fn merge_prefix(
        &mut self,
        branch: &Mesh,
        mut left: NodeId,
        mut right: NodeId,
        consumed: &mut usize,
    ) -> Result<PrefixOutcome, MergeError> {
        loop {
            let Some(&lnext) = node_of(branch, left)?.successors().first() else {
                return Ok(PrefixOutcome::Done);
            };
            let lhash = node_of(branch, lnext)?.hash.clone();

            let matched = node_of(self, right)?
                .successors()
                .iter()
                .copied()
                .find(|&s| self.hash_of(s) == Some(lhash.as_str()));

            let Some(rnext) = matched else {
                return Ok(PrefixOutcome::Diverged { left: lnext, right });
            };

            self.merge_from_branch(branch, lnext, rnext)?;
            left = lnext;
            right = rnext;
            *consumed += 1;
        }
    }

    /// Compares the straight branch tail below `pivot` against every path
    /// through the mesh below `br`; returns the mesh path with the longest
    /// common hash subsequence (earliest such path on a tie) and the LCS
    /// itself.
    fn lcs_resync(
        &self,
        branch: &Mesh,
        pivot: NodeId,
        br: NodeId,
    ) -> Result<(Vec<NodeId>, Vec<String>), MergeError> {
        let lpath = branch.first_path(pivot);
        let mut lhashes = Vec::with_capacity(lpath.len());
        for &id in &lpath {
            lhashes.push(node_of(branch, id)?.hash.clone());
        }

        let mut best: Option<(Vec<NodeId>, Vec<String>)> = None;
        let mut rpath = self.first_path(br);
        loop {
            let mut rhashes = Vec::with_capacity(rpath.len());
            for &id in &rpath {
                rhashes.push(node_of(self, id)?.hash.clone());
            }
            let lcs = longest_common_subsequence(&lhashes, &rhashes);
            let better = best.as_ref().is_none_or(|(_, b)| lcs.len() > b.len());
            if better {
                best = Some((rpath.clone(), lcs));
            }
            match self.next_path(br, &rpath) {
                Some(p) => rpath = p,
                None => break,
            }
        }

        // A first iteration always runs, so `best` is always populated.
        Ok(best.unwrap_or_default())
    }

    /// Merge-into: bumps the target's probability, copies content hash and
    /// payload from the branch node, and appends the branch node's first
    /// option-set entry (if any) to the target's option-set.
    fn merge_from_branch(
        &mut self,
        branch: &Mesh,
        source: NodeId,
        target: NodeId,
    ) -> Result<(), MergeError> {
        let src = node_of(branch, source)?;
        let hash = src.hash.clone();
        let payload = src.payload;
        let option = src.options.first().cloned();

        let t = self.node_mut(target).ok_or(MergeError::MissingNode(target))?;
        t.probability += 1;
        t.hash = hash;
        t.payload = payload;
        if let Some(option) = option {
            t.options.push(option);
        }
        Ok(())
    }
}

//! Mesh optimization passes.
//!
//! Three idempotent passes, each iterated internally to a fixpoint:
//!
//! 1. [`Mesh::merge_duplicate_predecessors`] — fuses pairs of predecessors
//!    with equal content hash that both feed only the same node, collapsing
//!    suffixes the merger reconstructed separately on parallel runs.
//! 2. [`Mesh::reduce_option_sets`] — given the declared domain of every
//!    option, drops options whose full domain is covered by a node's
//!    option-set; such an option cannot distinguish the node.
//! 3. [`Mesh::factor_common_predecessors`] — inserts no-op nodes in front
//!    of sibling groups that share their whole predecessor set, trading
//!    many parallel edges for one; the generated code gains a single
//!    branch point instead of repeated ones.
use std::collections::BTreeSet;

use tracing::debug;

use super::{Mesh, NodeId};
use crate::options::{OptionAssignment, OptionDomains};

impl Mesh {
    /// Fuses duplicate predecessors: for a node `j` with predecessors `p`
    /// and `q` of equal content hash, each with `j` as sole successor, `p`
    /// is merged into `q` and unlinked. Paths are walked tails-first so
    /// merged suffixes converge upward. Runs to a fixpoint.
    pub fn merge_duplicate_predecessors(&mut self) {
        let mut iteration = 0u32;
        loop {
            debug!(iteration, "merging duplicate predecessors");
            let Some((dup, keep)) = self.find_duplicate_predecessors() else {
                break;
            };
            debug!(%dup, %keep, "fusing duplicate predecessor");
            self.fuse_nodes(dup, keep);
            iteration += 1;
        }
    }

    /// Finds one fusable predecessor pair, scanning every path from the
    /// start with positions in reverse (tails first).
    fn find_duplicate_predecessors(&self) -> Option<(NodeId, NodeId)> {
        for path in self.paths(self.start()) {
            for &j in path.iter().rev() {
                let node = self.node(j)?;
                let prevs = node.predecessors();
                if prevs.len() < 2 {
                    continue;
                }
                for a in 0..prevs.len() {
                    for b in (a + 1)..prevs.len() {
                        let (p, q) = (prevs[a], prevs[b]);
                        if self.hash_of(p) != self.hash_of(q) {
                            continue;
                        }
                        let sole = |id: NodeId| {
                            self.node(id)
                                .is_some_and(|n| n.successors() == [j])
                        };
                        if sole(p) && sole(q) {
                            return Some((p, q));
                        }
                    }
                }
            }
        }
        None
    }

    /// Merges `dup` into `keep` and unlinks `dup` from the mesh:
    /// merge-into semantics on the survivor, then both edge sets are
    /// transplanted preserving reciprocity.
    fn fuse_nodes(&mut self, dup: NodeId, keep: NodeId) {
        let Some(d) = self.node(dup) else { return };
        let hash = d.hash.clone();
        let payload = d.payload;
        let option = d.options.first().cloned();
        let dup_prev: Vec<NodeId> = d.predecessors().to_vec();
        let dup_next: Vec<NodeId> = d.successors().to_vec();

        if let Some(k) = self.node_mut(keep) {
            k.probability += 1;
            k.hash = hash;
            k.payload = payload;
            if let Some(option) = option {
                k.options.push(option);
            }
        }

        for p in dup_prev {
            self.unlink(p, dup);
            let already = self
                .node(keep)
                .is_some_and(|k| k.predecessors().contains(&p));
            if !already {
                self.link(p, keep);
            }
        }
        for s in dup_next {
            self.unlink(dup, s);
            let already = self
                .node(keep)
                .is_some_and(|k| k.successors().contains(&s));
            if !already {
                self.link(keep, s);
            }
        }
        self.remove_node(dup);
    }

    /// Reduces every node's option-set against the declared domains: when
    /// some partial assignment σ is present with every value of an option
    /// `k`, those entries collapse to σ alone, and exact duplicates are
    /// dropped. Runs to a fixpoint.
    pub fn reduce_option_sets(&mut self, domains: &OptionDomains) {
        for id in self.node_ids() {
            if let Some(node) = self.node_mut(id) {
                reduce_assignments(&mut node.options, domains);
            }
        }
    }

    /// Factors common predecessors: any group of ≥2 non-no-op nodes whose
    /// predecessor sets are identical, of size ≥2, and free of no-ops is
    /// put behind a fresh no-op node, replacing the parallel edge fan with
    /// a single edge per predecessor. Runs to a fixpoint.
    pub fn factor_common_predecessors(&mut self) {
        let mut iteration = 0u32;
        loop {
            debug!(iteration, "factoring common predecessors");
            let Some(group) = self.find_factorable_group() else {
                break;
            };
            self.factor_group(&group);
            iteration += 1;
        }
    }

    /// Finds one group of nodes eligible for no-op factoring.
    fn find_factorable_group(&self) -> Option<Vec<NodeId>> {
        let ids = self.node_ids();
        for &n1 in &ids {
            if !self.factoring_candidate(n1) {
                continue;
            }
            let prev_set = self.prev_set(n1)?;
            let group: Vec<NodeId> = ids
                .iter()
                .copied()
                .filter(|&n| self.factoring_candidate(n) && self.prev_set(n) == Some(prev_set.clone()))
                .collect();
            if group.len() >= 2 {
                return Some(group);
            }
        }
        None
    }

    /// A node qualifies for factoring when it is a regular node with at
    /// least two predecessors, none of which is a no-op.
    fn factoring_candidate(&self, id: NodeId) -> bool {
        let Some(node) = self.node(id) else {
            return false;
        };
        if node.is_noop() || node.predecessors().len() < 2 {
            return false;
        }
        node.predecessors()
            .iter()
            .all(|&p| self.node(p).is_some_and(|n| !n.is_noop()))
    }

    fn prev_set(&self, id: NodeId) -> Option<BTreeSet<NodeId>> {
        Some(self.node(id)?.predecessors().iter().copied().collect())
    }

    /// Rewires `group` behind a fresh no-op inheriting their shared
    /// predecessor set.
    fn factor_group(&mut self, group: &[NodeId]) {
        let Some(&first) = group.first() else { return };
        let Some(shared) = self.prev_set(first) else {
            return;
        };
        debug!(members = group.len(), preds = shared.len(), "inserting no-op node");

        let noop = self.create_node(true);
        for &p in &shared {
            for &member in group {
                self.unlink(p, member);
            }
            self.link(p, noop);
        }
        for &member in group {
            self.link(noop, member);
        }
    }
}

/// Applies domain-covering reduction and deduplication to one option-set.
fn reduce_assignments(set: &mut Vec<OptionAssignment>, domains: &OptionDomains) {
    loop {
        let mut changed = false;
        for (option, domain) in domains.iter() {
            if let Some(sigma) = find_covered_residual(set, option, domain) {
                set.retain(|a| !(a.get(option).is_some() && a.without(option) == sigma));
                set.push(sigma);
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }

    // Drop exact duplicates, keeping first occurrences.
    let mut seen: BTreeSet<OptionAssignment> = BTreeSet::new();
    set.retain(|a| seen.insert(a.clone()));
}

/// Looks for a residual partial assignment σ (not constraining `option`)
/// such that σ ∪ {option ↦ v} is in `set` for every v in `domain`.
fn find_covered_residual(
    set: &[OptionAssignment],
    option: &str,
    domain: &[u64],
) -> Option<OptionAssignment> {
    if domain.is_empty() {
        return None;
    }
    for a in set {
        if a.get(option).is_none() {
            continue;
        }
        let sigma = a.without(option);
        let mut values: BTreeSet<u64> = BTreeSet::new();
        for other in set {
            if let Some(v) = other.get(option) {
                if other.without(option) == sigma {
                    values.insert(v);
                }
            }
        }
        if domain.iter().all(|v| values.contains(v)) {
            return Some(sigma);
        }
    }
    None
}

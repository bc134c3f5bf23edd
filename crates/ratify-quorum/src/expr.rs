//! Quorum expression tree and its evaluation.
//!
//! Evaluation walks verifiers first, then nested expressions, both in
//! declaration order, and stops as soon as the threshold is met. A verifier
//! listed in several places is credited at every place it is evaluated; no
//! tree-wide deduplication is done.

use std::collections::HashSet;

use ratify_constants::MAX_QUORUM_DEPTH;
use serde::Deserialize;
use serde::Serialize;

/// Identity of a verifier whose ratification a policy can require.
pub type VerifierId = u64;

/// A threshold policy node.
///
/// The node is satisfied when at least `threshold` of its direct `verifiers`
/// are present plus its `subexpressions` are satisfied.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuorumExpr {
    /// Minimum number of satisfied children.
    pub threshold: u64,
    /// Verifiers that count as satisfied children when present.
    #[serde(default)]
    pub verifiers: Vec<VerifierId>,
    /// Nested policies, each counting as one child when satisfied.
    #[serde(default)]
    pub subexpressions: Vec<QuorumExpr>,
}

impl QuorumExpr {
    pub fn new(threshold: u64, verifiers: Vec<VerifierId>, subexpressions: Vec<QuorumExpr>) -> Self {
        Self {
            threshold,
            verifiers,
            subexpressions,
        }
    }

    /// A node with no nested policies.
    pub fn leaf(threshold: u64, verifiers: Vec<VerifierId>) -> Self {
        Self::new(threshold, verifiers, Vec::new())
    }

    /// Returns true if `have` satisfies this policy.
    ///
    /// A zero threshold is satisfied without looking at the children. Nodes
    /// nested deeper than [`MAX_QUORUM_DEPTH`] count as unsatisfied.
    pub fn satisfies(&self, have: &HashSet<VerifierId>) -> bool {
        self.satisfies_at(have, 1)
    }

    fn satisfies_at(&self, have: &HashSet<VerifierId>, depth: u32) -> bool {
        if depth > MAX_QUORUM_DEPTH {
            return false;
        }
        if self.threshold == 0 {
            return true;
        }

        let mut remaining = self.threshold;
        for verifier in &self.verifiers {
            if have.contains(verifier) {
                remaining -= 1;
                if remaining == 0 {
                    return true;
                }
            }
        }
        for sub in &self.subexpressions {
            if sub.satisfies_at(have, depth + 1) {
                remaining -= 1;
                if remaining == 0 {
                    return true;
                }
            }
        }
        false
    }

    /// Nesting depth of the tree; a leaf has depth 1.
    ///
    /// Walks with an explicit stack so arbitrarily deep input cannot exhaust
    /// the call stack.
    pub fn depth(&self) -> usize {
        let mut max_depth = 0;
        let mut stack: Vec<(&QuorumExpr, usize)> = vec![(self, 1)];
        while let Some((node, depth)) = stack.pop() {
            max_depth = max_depth.max(depth);
            for sub in &node.subexpressions {
                stack.push((sub, depth + 1));
            }
        }
        max_depth
    }

    /// Returns true if the policy holds once every verifier it names has ratified.
    ///
    /// A `false` result flags a degenerate policy that no set of ratifications
    /// can ever satisfy, such as a threshold larger than the number of children.
    pub fn is_satisfiable(&self) -> bool {
        self.satisfies(&list_quorum(self, None))
    }
}

/// Returns true if `have` satisfies `want`.
pub fn check_quorum(want: &QuorumExpr, have: &HashSet<VerifierId>) -> bool {
    want.satisfies(have)
}

/// Collects every verifier named anywhere in `expr`.
///
/// Adds to `out` when one is supplied, otherwise starts from an empty set.
/// Levels below [`MAX_QUORUM_DEPTH`] are not visited.
pub fn list_quorum(expr: &QuorumExpr, out: Option<HashSet<VerifierId>>) -> HashSet<VerifierId> {
    let mut out = out.unwrap_or_default();
    collect_at(expr, &mut out, 1);
    out
}

fn collect_at(expr: &QuorumExpr, out: &mut HashSet<VerifierId>, depth: u32) {
    if depth > MAX_QUORUM_DEPTH {
        return;
    }
    out.extend(expr.verifiers.iter().copied());
    for sub in &expr.subexpressions {
        collect_at(sub, out, depth + 1);
    }
}

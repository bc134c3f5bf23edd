//! Quorum policy evaluation bounds.

/// Maximum nesting depth evaluated in a quorum expression (64 levels).
///
/// Policies come from an external serialization layer and may be hostile.
/// Sub-expressions nested below this depth are treated as unsatisfied, which
/// keeps recursion bounded regardless of input shape.
///
/// Used in:
/// - `ratify-quorum`: `QuorumExpr::satisfies`, `list_quorum` (and through
///   them `check_quorum`, `QuorumExpr::is_satisfiable`)
pub const MAX_QUORUM_DEPTH: u32 = 64;

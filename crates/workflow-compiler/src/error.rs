use std::fmt;

/// A structural impossibility: the caller handed the crusher a node
/// that violates one of the IR's own invariants. These are fatal —
/// they abort compilation rather than fall back, since there is no
/// well-formed result to fall back to.
#[derive(Debug)]
pub enum CrushError {
    /// A `Match` whose selector was never classified pipelineable or
    /// not — crushing code must have taken the pipeline branch on a
    /// node that turned out to carry a `Where` clause after all.
    NotPipelineable(String),
    /// A `FoldLeft` whose tail is empty — smart constructors refuse to
    /// build one, so this only fires if a `Node` was hand-assembled
    /// bypassing them.
    EmptyFoldLeftTail,
    /// A `Join` over zero branches.
    EmptyJoin,
}

impl fmt::Display for CrushError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotPipelineable(node) => {
                write!(f, "node is not pipelineable and has no map-reduce lowering: {node}")
            }
            Self::EmptyFoldLeftTail => write!(f, "FoldLeft node has an empty tail"),
            Self::EmptyJoin => write!(f, "Join node has no branches"),
        }
    }
}

impl std::error::Error for CrushError {}

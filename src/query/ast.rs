use serde::{Deserialize, Serialize};

/// Query AST node. Produced by the parser, consumed by the executor.
///
/// The parser is trusted to produce well-formed trees: `Tags` only inside a
/// `Field`, `Knn` only at the root, no nested `Field` scopes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub enum AstNode {
    /// No expression was parsed; matches nothing.
    #[default]
    Empty,
    /// `*`: matches all indexed documents.
    Star,
    /// A single text token.
    Term(String),
    /// Inclusive numeric range `[lo hi]`.
    Range { lo: f64, hi: f64 },
    /// `-expr`: complement with respect to all indexed documents.
    Negate(Box<AstNode>),
    /// Boolean composition of two or more nodes.
    Logical { op: LogicOp, nodes: Vec<AstNode> },
    /// `@field:expr`: scopes the subtree to one attribute.
    Field { field: String, node: Box<AstNode> },
    /// `{a|b|…}`: union over tag values; valid only under a `Field`.
    Tags(Vec<String>),
    /// `filter => [KNN limit @field $vec]`.
    Knn { limit: usize, field: String, vector: Vec<f32>, filter: Box<AstNode> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogicOp {
    And,
    Or,
}

impl AstNode {
    /// Combine two nodes under `op`, flattening a same-op left operand so
    /// `a b c` parses to one three-child AND instead of a nested pair.
    pub fn combine(op: LogicOp, left: AstNode, right: AstNode) -> AstNode {
        match left {
            AstNode::Logical { op: lop, mut nodes } if lop == op => {
                nodes.push(right);
                AstNode::Logical { op, nodes }
            }
            left => AstNode::Logical { op, nodes: vec![left, right] },
        }
    }
}

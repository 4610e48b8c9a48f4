use ordered_float::OrderedFloat;

use crate::core::types::DocId;
use crate::index::docset::{intersect_into, union_into, IndexResult};
use crate::index::indices::{
    FieldIndex, FieldIndices, NumericIndex, TagIndex, TextIndex, VectorIndex,
};
use crate::query::ast::{AstNode, LogicOp};

/// Result of evaluating one query against one shard's indices.
///
/// `distances` is present iff the query contained a KNN node; it is then
/// parallel to `ids` and both are ordered by ascending distance.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    pub ids: Vec<DocId>,
    pub distances: Option<Vec<f32>>,
}

/// Recursive AST evaluator. A fresh instance is constructed per query; the
/// scratch buffers never outlive it.
///
/// Field lookups and type checks are asserted, not propagated: the parser
/// and schema have already validated every assumption, so a violation here
/// is a programmer error.
pub struct BasicSearch<'a> {
    indices: &'a FieldIndices,
    tmp: Vec<DocId>,
    distances: Vec<(OrderedFloat<f32>, DocId)>,
}

impl<'a> BasicSearch<'a> {
    pub fn new(indices: &'a FieldIndices) -> Self {
        BasicSearch { indices, tmp: Vec::new(), distances: Vec::new() }
    }

    pub fn search(mut self, query: &AstNode) -> SearchResult {
        let result = self.eval(query, "", true);

        if self.distances.is_empty() {
            return SearchResult { ids: result.take(), distances: None };
        }

        let ids = result.take();
        debug_assert_eq!(ids.len(), self.distances.len());
        let distances = self.distances.iter().map(|&(dist, _)| dist.0).collect();
        SearchResult { ids, distances: Some(distances) }
    }

    fn eval(&mut self, node: &AstNode, active_field: &str, top_level: bool) -> IndexResult<'a> {
        let result = match node {
            AstNode::Empty => IndexResult::empty(),
            AstNode::Star => {
                assert!(active_field.is_empty(), "star inside field scope");
                IndexResult::Ids(self.indices.all_docs())
            }
            AstNode::Term(token) => self.eval_term(token, active_field),
            AstNode::Range { lo, hi } => {
                assert!(!active_field.is_empty(), "range query without field scope");
                IndexResult::Owned(numeric_index(self.indices, active_field).range(*lo, *hi))
            }
            AstNode::Negate(child) => self.eval_negate(child, active_field),
            AstNode::Logical { op, nodes } => {
                let subs: Vec<_> =
                    nodes.iter().map(|n| self.eval(n, active_field, false)).collect();
                self.unify(subs, *op)
            }
            AstNode::Field { field, node } => {
                assert!(active_field.is_empty(), "nested field scope");
                self.eval(node, field, false)
            }
            AstNode::Tags(tags) => {
                let index = tag_index(self.indices, active_field);
                let subs: Vec<_> =
                    tags.iter().map(|tag| IndexResult::from_bitmap(index.matching(tag))).collect();
                self.unify(subs, LogicOp::Or)
            }
            AstNode::Knn { limit, field, vector, filter } => {
                assert!(active_field.is_empty(), "knn inside field scope");
                self.eval_knn(*limit, field, vector, filter)
            }
        };

        // Only the top-level result may be unordered (a KNN result is
        // ordered by distance instead of id).
        debug_assert!(top_level || result.is_sorted(), "unsorted sub-result");
        result
    }

    // A bare term searches the scoped text index, or unifies over every
    // text index when no field is set.
    fn eval_term(&mut self, token: &str, active_field: &str) -> IndexResult<'a> {
        let indices = self.indices;
        if !active_field.is_empty() {
            return IndexResult::from_bitmap(text_index(indices, active_field).matching(token));
        }

        let subs: Vec<_> = indices
            .all_text_indices()
            .into_iter()
            .map(|index| IndexResult::from_bitmap(index.matching(token)))
            .collect();
        self.unify(subs, LogicOp::Or)
    }

    // Complement of the sub-result with respect to all indexed docs.
    fn eval_negate(&mut self, child: &AstNode, active_field: &str) -> IndexResult<'a> {
        let matched = self.eval(child, active_field, false).take();
        let mut all = self.indices.all_docs().to_vec();
        all.retain(|doc| matched.binary_search(doc).is_err());
        IndexResult::Owned(all)
    }

    // Distance from the query vector to every doc passing the pre-filter,
    // ascending; ties break on ascending doc id. Only the closest `limit`
    // docs survive, and their distances are recorded for the caller.
    fn eval_knn(
        &mut self,
        limit: usize,
        field: &str,
        vector: &[f32],
        filter: &AstNode,
    ) -> IndexResult<'a> {
        let filtered = self.eval(filter, "", false);
        let index = vector_index(self.indices, field);

        self.distances.reserve(filtered.len());
        for doc in filtered.iter() {
            let dist = euclidean(vector, index.get(doc));
            self.distances.push((OrderedFloat(dist), doc));
        }
        self.distances.sort_unstable();

        let out: Vec<DocId> = self.distances.iter().take(limit).map(|&(_, doc)| doc).collect();
        self.distances.truncate(out.len());
        IndexResult::Owned(out)
    }

    /// Fold sub-results under `op`, smallest first: an intersection only
    /// shrinks, and a union traverses fewer elements on average when the
    /// small sets come first.
    fn unify(&mut self, mut subs: Vec<IndexResult<'a>>, op: LogicOp) -> IndexResult<'a> {
        if subs.is_empty() {
            return IndexResult::empty();
        }

        subs.sort_by_key(|r| r.len());
        let mut iter = subs.into_iter();
        let mut current = iter.next().expect("non-empty");
        for matched in iter {
            self.merge(matched, &mut current, op);
        }
        current
    }

    fn merge(&mut self, matched: IndexResult<'a>, current: &mut IndexResult<'a>, op: LogicOp) {
        self.tmp.clear();
        match op {
            LogicOp::And => {
                self.tmp.reserve(matched.len().min(current.len()));
                intersect_into(matched.iter(), current.iter(), &mut self.tmp);
            }
            LogicOp::Or => {
                self.tmp.reserve(matched.len() + current.len());
                union_into(matched.iter(), current.iter(), &mut self.tmp);
            }
        }

        // Swap the merged buffer in; an owned accumulator donates its old
        // allocation back to the scratch vector.
        match current {
            IndexResult::Owned(cur) => std::mem::swap(cur, &mut self.tmp),
            _ => *current = IndexResult::Owned(std::mem::take(&mut self.tmp)),
        }
    }
}

fn euclidean(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "vector dimension mismatch");
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum::<f32>().sqrt()
}

fn text_index<'a>(indices: &'a FieldIndices, field: &str) -> &'a TextIndex {
    match indices.index(field) {
        Some(FieldIndex::Text(index)) => index,
        Some(_) => panic!("field {field} is not a text index"),
        None => panic!("unknown field {field}"),
    }
}

fn tag_index<'a>(indices: &'a FieldIndices, field: &str) -> &'a TagIndex {
    match indices.index(field) {
        Some(FieldIndex::Tag(index)) => index,
        Some(_) => panic!("field {field} is not a tag index"),
        None => panic!("unknown field {field}"),
    }
}

fn numeric_index<'a>(indices: &'a FieldIndices, field: &str) -> &'a NumericIndex {
    match indices.index(field) {
        Some(FieldIndex::Numeric(index)) => index,
        Some(_) => panic!("field {field} is not a numeric index"),
        None => panic!("unknown field {field}"),
    }
}

fn vector_index<'a>(indices: &'a FieldIndices, field: &str) -> &'a VectorIndex {
    match indices.index(field) {
        Some(FieldIndex::Vector(index)) => index,
        Some(_) => panic!("field {field} is not a vector index"),
        None => panic!("unknown field {field}"),
    }
}

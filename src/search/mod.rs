pub mod executor;

pub use executor::{BasicSearch, SearchResult};

use crate::index::indices::FieldIndices;
use crate::query::ast::AstNode;
use crate::query::params::QueryParams;
use crate::query::parser::QueryParser;

/// Parse-then-execute façade over one query.
///
/// `init` must succeed before `search` or `knn_limit` are called.
#[derive(Debug, Default)]
pub struct SearchAlgorithm {
    query: AstNode,
}

impl SearchAlgorithm {
    pub fn new() -> Self {
        SearchAlgorithm { query: AstNode::Empty }
    }

    /// Parse `query` with the given parameter bindings. Returns true iff a
    /// non-empty expression was produced; parse failures are logged and
    /// reported as false, never propagated.
    pub fn init(&mut self, query: &str, params: &QueryParams) -> bool {
        match QueryParser::new(params).parse(query) {
            Ok(ast) => {
                self.query = ast;
                !matches!(self.query, AstNode::Empty)
            }
            Err(err) => {
                log::info!("failed to parse query {query:?}: {err}");
                false
            }
        }
    }

    pub fn search(&self, indices: &FieldIndices) -> SearchResult {
        BasicSearch::new(indices).search(&self.query)
    }

    /// The KNN limit when the root of the query is a KNN clause.
    pub fn knn_limit(&self) -> Option<usize> {
        match &self.query {
            AstNode::Knn { limit, .. } => Some(*limit),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_reports_parse_outcome() {
        let params = QueryParams::new();
        let mut algo = SearchAlgorithm::new();
        assert!(algo.init("hello", &params));
        assert!(!algo.init("", &params));
        assert!(!algo.init("@broken:[", &params));
    }

    #[test]
    fn knn_limit_only_for_root_knn() {
        use crate::core::types::vector_to_bytes;

        let mut params = QueryParams::new();
        params.bind("q", vector_to_bytes(&[0.0]));

        let mut algo = SearchAlgorithm::new();
        assert!(algo.init("*=>[KNN 3 @v $q]", &params));
        assert_eq!(algo.knn_limit(), Some(3));

        assert!(algo.init("hello", &params));
        assert_eq!(algo.knn_limit(), None);
    }
}

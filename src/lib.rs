pub mod command;
pub mod core;
pub mod index;
pub mod query;
pub mod search;
pub mod zset;

pub use crate::core::error::{Error, ErrorKind, Result};
pub use crate::core::types::{DocId, DocumentAccessor, HashAccessor};
pub use crate::index::indices::{FieldIndices, FieldType, Schema, SchemaField};
pub use crate::query::params::QueryParams;
pub use crate::search::{SearchAlgorithm, SearchResult};
pub use crate::zset::{AddOptions, AddResult, Backend, LexBound, LexRange, ScoreRange, SortedMap};

//! FT command surface: argument parsing, the sharded index registry and
//! reply shaping.
//!
//! Connection handling and wire encoding live outside this crate; commands
//! take positional byte arguments and return typed replies. Document
//! contents are reached only through [`DocumentAccessor`] for indexing and
//! a caller-supplied loader for reply materialization.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;

use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::{DocId, DocumentAccessor};
use crate::index::indices::{FieldIndices, FieldType, Schema};
use crate::query::params::QueryParams;
use crate::search::SearchAlgorithm;

const SYNTAX_ERR: &str = "syntax error";
const INVALID_INT_ERR: &str = "value is not an integer or out of range";

/// Schema option tokens skipped when they appear as the name of a trailing
/// (name, value) pair.
const IGNORED_OPTIONS: [&str; 5] = ["WEIGHT", "SEPARATOR", "TYPE", "DIM", "DISTANCE_METRIC"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum DataType {
    #[default]
    Hash,
    Json,
}

/// Registration-time description of one index.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IndexSpec {
    pub data_type: DataType,
    pub prefix: String,
    pub schema: Schema,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldInfo {
    pub identifier: String,
    pub attribute: String,
    pub field_type: &'static str,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InfoReply {
    pub index_name: String,
    pub fields: Vec<FieldInfo>,
    pub num_docs: usize,
}

/// `[total, key, map, …]` reply shape as structured data.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchReply {
    pub total: usize,
    pub docs: Vec<(String, Vec<(String, String)>)>,
}

/// One materialized hit from one shard.
#[derive(Debug, Clone)]
pub struct SerializedDoc {
    pub key: String,
    pub values: Vec<(String, String)>,
    pub knn_distance: f32,
}

#[derive(Debug, Clone, Default)]
pub struct ShardSearchResult {
    pub docs: Vec<SerializedDoc>,
    pub total_hits: usize,
}

/// `LIMIT` window and `PARAMS` bindings of one FT.SEARCH call.
#[derive(Debug)]
pub struct SearchParams {
    pub limit_offset: usize,
    pub limit_total: usize,
    pub params: QueryParams,
}

impl Default for SearchParams {
    fn default() -> Self {
        SearchParams { limit_offset: 0, limit_total: 10, params: QueryParams::new() }
    }
}

fn client_err(msg: impl Into<String>) -> Error {
    Error::new(ErrorKind::InvalidArgument, msg)
}

fn as_str(arg: &[u8]) -> Result<&str> {
    std::str::from_utf8(arg).map_err(|_| client_err(SYNTAX_ERR))
}

fn parse_schema(data_type: DataType, args: &[Vec<u8>]) -> Result<Schema> {
    let mut schema = Schema::new();
    let mut i = 0;
    while i < args.len() {
        let identifier = as_str(&args[i])?.to_string();
        i += 1;

        if data_type == DataType::Json && !identifier.starts_with('$') {
            return Err(client_err(format!("Bad json path: {identifier}")));
        }

        // Optional AS <alias>; the attribute defaults to the identifier.
        let mut attribute = identifier.clone();
        if i + 1 < args.len() && as_str(&args[i])?.eq_ignore_ascii_case("AS") {
            attribute = as_str(&args[i + 1])?.to_string();
            i += 2;
        }

        if i >= args.len() {
            return Err(client_err(format!("No field type for field: {identifier}")));
        }

        let type_token = as_str(&args[i])?.to_ascii_uppercase();
        let field_type = match type_token.as_str() {
            "TAG" => FieldType::Tag,
            "TEXT" => FieldType::Text,
            "NUMERIC" => FieldType::Numeric,
            "VECTOR" => FieldType::Vector,
            _ => return Err(client_err(format!("Invalid field type: {type_token}"))),
        };

        // A vector field carries two extra tokens: algorithm and dimension.
        if field_type == FieldType::Vector {
            i += 2;
        }

        // Skip trailing (name, value) option pairs we do not interpret.
        while i + 2 < args.len()
            && IGNORED_OPTIONS.contains(&as_str(&args[i + 1])?.to_ascii_uppercase().as_str())
        {
            i += 2;
        }

        schema.add_field(attribute, identifier, field_type);
        i += 1;
    }
    Ok(schema)
}

/// Parse `FT.CREATE` arguments into an index name and spec.
pub fn parse_create(args: &[Vec<u8>]) -> Result<(String, IndexSpec)> {
    let name = as_str(args.first().ok_or_else(|| client_err(SYNTAX_ERR))?)?.to_string();
    let mut spec = IndexSpec::default();

    let mut i = 1;
    while i < args.len() {
        let token = as_str(&args[i])?.to_ascii_uppercase();

        if token == "ON" {
            i += 1;
            if i >= args.len() {
                return Err(client_err(SYNTAX_ERR));
            }
            let kind = as_str(&args[i])?.to_ascii_uppercase();
            spec.data_type = match kind.as_str() {
                "HASH" => DataType::Hash,
                "JSON" => DataType::Json,
                _ => return Err(client_err(format!("Invalid rule type: {kind}"))),
            };
        } else if token == "PREFIX" {
            if i + 2 >= args.len() {
                return Err(client_err(SYNTAX_ERR));
            }
            if as_str(&args[i + 1])? != "1" {
                return Err(client_err("Multiple prefixes are not supported"));
            }
            spec.prefix = as_str(&args[i + 2])?.to_string();
            i += 2;
        } else if token == "SCHEMA" {
            i += 1;
            if i >= args.len() {
                return Err(client_err("Empty schema"));
            }
            spec.schema = parse_schema(spec.data_type, &args[i..])?;
            break; // SCHEMA always comes last
        }
        i += 1;
    }

    Ok((name, spec))
}

/// Parse the `LIMIT`/`PARAMS` tail of `FT.SEARCH`.
pub fn parse_search_params(args: &[Vec<u8>]) -> Result<SearchParams> {
    let mut out = SearchParams::default();

    let mut i = 0;
    while i < args.len() {
        let token = as_str(&args[i])?.to_ascii_uppercase();

        if token == "LIMIT" {
            if i + 2 >= args.len() {
                return Err(client_err(SYNTAX_ERR));
            }
            out.limit_offset = as_str(&args[i + 1])?
                .parse()
                .map_err(|_| client_err(INVALID_INT_ERR))?;
            out.limit_total = as_str(&args[i + 2])?
                .parse()
                .map_err(|_| client_err(INVALID_INT_ERR))?;
            i += 2;
        } else if token == "PARAMS" {
            // PARAMS <count> <name> <value>: a single binding, typically the
            // raw KNN query vector.
            if i + 3 >= args.len() {
                return Err(client_err(SYNTAX_ERR));
            }
            let name = as_str(&args[i + 2])?.to_string();
            out.params.bind(name, args[i + 3].clone());
            i += 3;
        }
        i += 1;
    }

    Ok(out)
}

/// One registered index on one shard: field indices plus the key ↔ doc-id
/// mapping. Doc ids are assigned monotonically and never reused.
pub struct ShardIndex {
    spec: Arc<IndexSpec>,
    indices: FieldIndices,
    key_ids: HashMap<String, DocId>,
    doc_keys: HashMap<DocId, String>,
    next_id: DocId,
}

impl ShardIndex {
    fn new(spec: Arc<IndexSpec>) -> Self {
        let indices = FieldIndices::new(spec.schema.clone());
        ShardIndex { spec, indices, key_ids: HashMap::new(), doc_keys: HashMap::new(), next_id: 0 }
    }

    pub fn matches_key(&self, key: &str) -> bool {
        key.starts_with(&self.spec.prefix)
    }

    pub fn add_doc(&mut self, key: &str, access: &dyn DocumentAccessor) {
        if !self.matches_key(key) || self.key_ids.contains_key(key) {
            return;
        }
        let id = self.next_id;
        self.next_id += 1;
        self.indices.add(id, access);
        self.key_ids.insert(key.to_string(), id);
        self.doc_keys.insert(id, key.to_string());
    }

    pub fn remove_doc(&mut self, key: &str, access: &dyn DocumentAccessor) {
        let Some(id) = self.key_ids.remove(key) else { return };
        self.doc_keys.remove(&id);
        self.indices.remove(id, access);
    }

    pub fn num_docs(&self) -> usize {
        self.indices.num_docs()
    }

    /// Run a prepared query and materialize hits through `load`.
    pub fn search<F>(&self, algo: &SearchAlgorithm, load: F) -> ShardSearchResult
    where
        F: Fn(&str) -> Vec<(String, String)>,
    {
        let result = algo.search(&self.indices);
        let docs = result
            .ids
            .iter()
            .enumerate()
            .map(|(pos, id)| {
                let key = &self.doc_keys[id];
                SerializedDoc {
                    key: key.clone(),
                    values: load(key),
                    knn_distance: result
                        .distances
                        .as_ref()
                        .map(|d| d[pos])
                        .unwrap_or_default(),
                }
            })
            .collect();
        ShardSearchResult { docs, total_hits: result.ids.len() }
    }
}

/// Per-shard index registry.
#[derive(Default)]
struct ShardIndices {
    indices: HashMap<String, ShardIndex>,
}

/// The set of shards commands fan out over. Each shard owns its registry
/// exclusively; the lock only serializes registry access, queries inside a
/// shard run to completion.
pub struct ShardSet {
    shards: Vec<RwLock<ShardIndices>>,
}

impl ShardSet {
    pub fn new(shard_count: usize) -> Self {
        assert!(shard_count > 0, "at least one shard");
        ShardSet { shards: (0..shard_count).map(|_| RwLock::default()).collect() }
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// `FT.CREATE idx [ON HASH|JSON] [PREFIX 1 p] SCHEMA …`: registers the
    /// index on every shard.
    pub fn ft_create(&self, args: &[Vec<u8>]) -> Result<()> {
        let (name, spec) = parse_create(args)?;
        let spec = Arc::new(spec);
        for shard in &self.shards {
            shard
                .write()
                .indices
                .insert(name.clone(), ShardIndex::new(spec.clone()));
        }
        Ok(())
    }

    /// `FT.DROPINDEX idx`: removes the index from every shard.
    pub fn ft_drop_index(&self, name: &str) -> Result<()> {
        let mut num_deleted = 0;
        for shard in &self.shards {
            if shard.write().indices.remove(name).is_some() {
                num_deleted += 1;
            }
        }
        debug_assert!(num_deleted == 0 || num_deleted == self.shards.len());
        if num_deleted == self.shards.len() {
            Ok(())
        } else {
            Err(Error::new(ErrorKind::NotFound, "Unknown Index name"))
        }
    }

    /// `FT.INFO idx`.
    pub fn ft_info(&self, name: &str) -> Result<InfoReply> {
        let mut num_docs = 0;
        let mut fields = None;
        for shard in &self.shards {
            let guard = shard.read();
            let Some(index) = guard.indices.get(name) else {
                return Err(Error::new(ErrorKind::NotFound, "Unknown index name"));
            };
            num_docs += index.num_docs();
            fields.get_or_insert_with(|| {
                index
                    .spec
                    .schema
                    .fields
                    .iter()
                    .map(|(attribute, field)| FieldInfo {
                        identifier: field.identifier.clone(),
                        attribute: attribute.clone(),
                        field_type: field.field_type.name(),
                    })
                    .collect::<Vec<_>>()
            });
        }
        Ok(InfoReply {
            index_name: name.to_string(),
            fields: fields.unwrap_or_default(),
            num_docs,
        })
    }

    /// `FT._LIST`.
    pub fn ft_list(&self) -> Vec<String> {
        let mut names: Vec<String> =
            self.shards[0].read().indices.keys().cloned().collect();
        names.sort();
        names
    }

    /// `FT.SEARCH idx query [LIMIT off total] [PARAMS n k v]`. The loader
    /// materializes a document's reply fields by key per shard.
    pub fn ft_search<F>(&self, args: &[Vec<u8>], load: F) -> Result<SearchReply>
    where
        F: Fn(usize, &str) -> Vec<(String, String)>,
    {
        if args.len() < 2 {
            return Err(client_err(SYNTAX_ERR));
        }
        let index_name = as_str(&args[0])?;
        let query = as_str(&args[1])?;
        let params = parse_search_params(&args[2..])?;

        let mut algo = SearchAlgorithm::new();
        if !algo.init(query, &params.params) {
            return Err(Error::new(ErrorKind::Parse, "Query syntax error"));
        }

        let mut results = Vec::with_capacity(self.shards.len());
        for (shard_id, shard) in self.shards.iter().enumerate() {
            let guard = shard.read();
            let Some(index) = guard.indices.get(index_name) else {
                return Err(Error::new(
                    ErrorKind::NotFound,
                    format!("{index_name}: no such index"),
                ));
            };
            results.push(index.search(&algo, |key| load(shard_id, key)));
        }

        Ok(match algo.knn_limit() {
            Some(limit) => reply_knn(limit, &params, &results),
            None => reply_with_results(&params, &results),
        })
    }

    /// Route a document to every index on `shard` whose prefix matches.
    pub fn add_doc(&self, shard: usize, key: &str, access: &dyn DocumentAccessor) {
        for index in self.shards[shard].write().indices.values_mut() {
            index.add_doc(key, access);
        }
    }

    pub fn remove_doc(&self, shard: usize, key: &str, access: &dyn DocumentAccessor) {
        for index in self.shards[shard].write().indices.values_mut() {
            index.remove_doc(key, access);
        }
    }
}

/// Concatenate shard results in shard order, skip the offset, cut the
/// window.
fn reply_with_results(params: &SearchParams, results: &[ShardSearchResult]) -> SearchReply {
    let total: usize = results.iter().map(|r| r.total_hits).sum();
    let response_count = (total - params.limit_offset.min(total)).min(params.limit_total);

    let mut docs = Vec::with_capacity(response_count);
    let mut to_skip = params.limit_offset;
    'shards: for shard_docs in results {
        for doc in &shard_docs.docs {
            if to_skip > 0 {
                to_skip -= 1;
                continue;
            }
            if docs.len() >= response_count {
                break 'shards;
            }
            docs.push((doc.key.clone(), doc.values.clone()));
        }
    }

    SearchReply { total, docs }
}

/// KNN merge: globally re-sort all shard candidates by distance, truncate
/// to the KNN limit, then window.
fn reply_knn(
    knn_limit: usize,
    params: &SearchParams,
    results: &[ShardSearchResult],
) -> SearchReply {
    let mut docs: Vec<&SerializedDoc> =
        results.iter().flat_map(|r| r.docs.iter()).collect();
    docs.sort_by(|l, r| l.knn_distance.total_cmp(&r.knn_distance));
    docs.truncate(knn_limit);

    let response_count =
        (docs.len() - params.limit_offset.min(docs.len())).min(params.limit_total);
    let window = docs
        .iter()
        .skip(params.limit_offset)
        .take(response_count)
        .map(|doc| (doc.key.clone(), doc.values.clone()))
        .collect();

    SearchReply { total: docs.len(), docs: window }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{vector_to_bytes, HashAccessor};

    fn args(parts: &[&str]) -> Vec<Vec<u8>> {
        parts.iter().map(|p| p.as_bytes().to_vec()).collect()
    }

    fn hash_doc(fields: &[(&str, &str)]) -> HashAccessor {
        let mut acc = HashAccessor::new();
        for (k, v) in fields {
            acc.set(*k, *v);
        }
        acc
    }

    /// Two-shard harness with a plain field-map store per shard.
    struct Harness {
        shards: ShardSet,
        store: Vec<HashMap<String, Vec<(String, String)>>>,
    }

    impl Harness {
        fn new() -> Self {
            Harness { shards: ShardSet::new(2), store: vec![HashMap::new(), HashMap::new()] }
        }

        fn put(&mut self, shard: usize, key: &str, fields: &[(&str, &str)]) {
            self.store[shard].insert(
                key.to_string(),
                fields.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            );
            self.shards.add_doc(shard, key, &hash_doc(fields));
        }

        fn search(&self, parts: &[&str]) -> Result<SearchReply> {
            self.search_raw(args(parts))
        }

        fn search_raw(&self, raw: Vec<Vec<u8>>) -> Result<SearchReply> {
            self.shards
                .ft_search(&raw, |shard, key| self.store[shard][key].clone())
        }
    }

    fn product_harness() -> Harness {
        let mut h = Harness::new();
        h.shards
            .ft_create(&args(&[
                "products", "ON", "HASH", "PREFIX", "1", "product:", "SCHEMA", "title", "TEXT",
                "tag", "TAG", "price", "NUMERIC",
            ]))
            .unwrap();
        h.put(0, "product:1", &[("title", "apple"), ("tag", "sale"), ("price", "10")]);
        h.put(0, "product:2", &[("title", "apple"), ("tag", "new"), ("price", "20")]);
        h.put(1, "product:3", &[("title", "banana"), ("tag", "sale"), ("price", "30")]);
        // Outside the prefix: never indexed.
        h.put(1, "user:1", &[("title", "apple")]);
        h
    }

    #[test]
    fn create_search_across_shards() {
        let h = product_harness();

        let reply = h.search(&["products", "@tag:{sale} @price:[15 40]"]).unwrap();
        assert_eq!(reply.total, 1);
        assert_eq!(reply.docs[0].0, "product:3");

        let reply = h.search(&["products", "@tag:{sale} | apple"]).unwrap();
        assert_eq!(reply.total, 3);

        let reply = h.search(&["products", "-apple"]).unwrap();
        assert_eq!(reply.total, 1);
        assert_eq!(reply.docs[0].0, "product:3");
    }

    #[test]
    fn limit_windows_after_concatenation() {
        let h = product_harness();
        let reply = h.search(&["products", "*", "LIMIT", "1", "1"]).unwrap();
        assert_eq!(reply.total, 3);
        assert_eq!(reply.docs.len(), 1);
        assert_eq!(reply.docs[0].0, "product:2");
    }

    #[test]
    fn bad_limit_is_an_integer_error() {
        let h = product_harness();
        let err = h.search(&["products", "*", "LIMIT", "x", "10"]).unwrap_err();
        assert_eq!(err.context, INVALID_INT_ERR);
    }

    #[test]
    fn search_error_strings() {
        let h = product_harness();

        let err = h.search(&["nosuch", "*"]).unwrap_err();
        assert_eq!(err.context, "nosuch: no such index");

        let err = h.search(&["products", "@broken:["]).unwrap_err();
        assert_eq!(err.context, "Query syntax error");
    }

    #[test]
    fn knn_merges_shards_by_distance() {
        let mut h = Harness::new();
        h.shards
            .ft_create(&args(&[
                "vecs", "PREFIX", "1", "v:", "SCHEMA", "emb", "AS", "v", "VECTOR", "FLAT", "2",
            ]))
            .unwrap();

        // Interleave near and far points across the two shards.
        for (shard, key, vec) in [
            (0, "v:1", [0.0f32, 0.0]),
            (1, "v:2", [1.0, 0.0]),
            (0, "v:3", [0.0, 1.0]),
            (1, "v:4", [5.0, 5.0]),
        ] {
            let mut acc = HashAccessor::new();
            acc.set("emb", vector_to_bytes(&vec));
            h.store[shard].insert(key.to_string(), vec![]);
            h.shards.add_doc(shard, key, &acc);
        }

        let mut raw = args(&["vecs", "*=>[KNN 3 @v $q]", "PARAMS", "2", "q"]);
        raw.push(vector_to_bytes(&[0.1, 0.1]));
        let reply = h.search_raw(raw).unwrap();

        assert_eq!(reply.total, 3);
        let keys: Vec<_> = reply.docs.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys[0], "v:1");
        assert!(keys.contains(&"v:2") && keys.contains(&"v:3"));
        assert!(!keys.contains(&"v:4"));
    }

    #[test]
    fn info_and_list_and_drop() {
        let h = product_harness();

        let info = h.shards.ft_info("products").unwrap();
        assert_eq!(info.index_name, "products");
        assert_eq!(info.num_docs, 3);
        assert_eq!(
            info.fields,
            vec![
                FieldInfo {
                    identifier: "title".into(),
                    attribute: "title".into(),
                    field_type: "TEXT"
                },
                FieldInfo { identifier: "tag".into(), attribute: "tag".into(), field_type: "TAG" },
                FieldInfo {
                    identifier: "price".into(),
                    attribute: "price".into(),
                    field_type: "NUMERIC"
                },
            ]
        );

        assert_eq!(h.shards.ft_list(), vec!["products".to_string()]);

        h.shards.ft_drop_index("products").unwrap();
        let err = h.shards.ft_drop_index("products").unwrap_err();
        assert_eq!(err.context, "Unknown Index name");
        assert!(h.shards.ft_list().is_empty());

        let err = h.shards.ft_info("products").unwrap_err();
        assert_eq!(err.context, "Unknown index name");
    }

    #[test]
    fn document_removal_unindexes() {
        let mut h = product_harness();
        let fields = [("title", "apple"), ("tag", "sale"), ("price", "10")];
        h.shards.remove_doc(0, "product:1", &hash_doc(&fields));
        h.store[0].remove("product:1");

        let reply = h.search(&["products", "apple"]).unwrap();
        assert_eq!(reply.total, 1);
        assert_eq!(reply.docs[0].0, "product:2");
    }

    #[test]
    fn create_argument_errors() {
        let shards = ShardSet::new(1);

        let err = shards
            .ft_create(&args(&["idx", "PREFIX", "2", "a:", "b:", "SCHEMA", "f", "TEXT"]))
            .unwrap_err();
        assert_eq!(err.context, "Multiple prefixes are not supported");

        let err = shards
            .ft_create(&args(&["idx", "ON", "GRAPH", "SCHEMA", "f", "TEXT"]))
            .unwrap_err();
        assert_eq!(err.context, "Invalid rule type: GRAPH");

        let err = shards.ft_create(&args(&["idx", "SCHEMA", "f", "BITMAP"])).unwrap_err();
        assert_eq!(err.context, "Invalid field type: BITMAP");

        let err = shards.ft_create(&args(&["idx", "SCHEMA", "f"])).unwrap_err();
        assert_eq!(err.context, "No field type for field: f");

        let err = shards
            .ft_create(&args(&["idx", "ON", "JSON", "SCHEMA", "notapath", "TEXT"]))
            .unwrap_err();
        assert_eq!(err.context, "Bad json path: notapath");
    }

    #[test]
    fn schema_skips_ignored_option_pairs() {
        let shards = ShardSet::new(1);
        shards
            .ft_create(&args(&[
                "idx", "SCHEMA", "title", "TEXT", "WEIGHT", "2.0", "tags", "TAG", "SEPARATOR",
                ",", "price", "NUMERIC",
            ]))
            .unwrap();

        let info = shards.ft_info("idx").unwrap();
        let names: Vec<_> = info.fields.iter().map(|f| f.attribute.as_str()).collect();
        assert_eq!(names, vec!["title", "tags", "price"]);
    }
}

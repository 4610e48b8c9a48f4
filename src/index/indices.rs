use std::collections::{BTreeMap, HashMap};

use ordered_float::OrderedFloat;
use roaring::RoaringBitmap;
use serde::{Deserialize, Serialize};

use crate::core::types::{bytes_to_vector, DocId, DocumentAccessor};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldType {
    Tag,
    Text,
    Numeric,
    Vector,
}

impl FieldType {
    pub fn name(&self) -> &'static str {
        match self {
            FieldType::Tag => "TAG",
            FieldType::Text => "TEXT",
            FieldType::Numeric => "NUMERIC",
            FieldType::Vector => "VECTOR",
        }
    }
}

/// Schema entry for one attribute. The attribute name is how queries refer
/// to the field; the identifier is how the document accessor locates the
/// raw value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaField {
    pub identifier: String,
    pub field_type: FieldType,
}

/// Ordered mapping from attribute name to field description. Registration
/// order is preserved for reporting.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    pub fields: Vec<(String, SchemaField)>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_field(
        &mut self,
        attribute: impl Into<String>,
        identifier: impl Into<String>,
        field_type: FieldType,
    ) -> &mut Self {
        self.fields.push((
            attribute.into(),
            SchemaField { identifier: identifier.into(), field_type },
        ));
        self
    }

    pub fn field(&self, attribute: &str) -> Option<&SchemaField> {
        self.fields.iter().find(|(name, _)| name == attribute).map(|(_, f)| f)
    }
}

/// Split raw text into lowercase alphanumeric tokens.
pub fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
}

/// Split a raw tag list on commas, trimming and lowercasing each value.
fn split_tags(raw: &str) -> impl Iterator<Item = String> + '_ {
    raw.split(',').map(|t| t.trim().to_lowercase()).filter(|t| !t.is_empty())
}

/// Token → compressed posting bitmap.
#[derive(Debug, Default)]
pub struct TextIndex {
    postings: HashMap<String, RoaringBitmap>,
}

impl TextIndex {
    fn add(&mut self, doc: DocId, raw: &str) {
        for token in tokenize(raw) {
            self.postings.entry(token).or_default().insert(doc);
        }
    }

    fn remove(&mut self, doc: DocId, raw: &str) {
        for token in tokenize(raw) {
            if let Some(bitmap) = self.postings.get_mut(&token) {
                bitmap.remove(doc);
                if bitmap.is_empty() {
                    self.postings.remove(&token);
                }
            }
        }
    }

    pub fn matching(&self, token: &str) -> Option<&RoaringBitmap> {
        self.postings.get(&token.to_lowercase())
    }
}

/// Tag value → compressed posting bitmap.
#[derive(Debug, Default)]
pub struct TagIndex {
    postings: HashMap<String, RoaringBitmap>,
}

impl TagIndex {
    fn add(&mut self, doc: DocId, raw: &str) {
        for tag in split_tags(raw) {
            self.postings.entry(tag).or_default().insert(doc);
        }
    }

    fn remove(&mut self, doc: DocId, raw: &str) {
        for tag in split_tags(raw) {
            if let Some(bitmap) = self.postings.get_mut(&tag) {
                bitmap.remove(doc);
                if bitmap.is_empty() {
                    self.postings.remove(&tag);
                }
            }
        }
    }

    pub fn matching(&self, tag: &str) -> Option<&RoaringBitmap> {
        self.postings.get(&tag.to_lowercase())
    }
}

/// Ordered numeric index: value → docs carrying it.
#[derive(Debug, Default)]
pub struct NumericIndex {
    entries: BTreeMap<OrderedFloat<f64>, Vec<DocId>>,
}

impl NumericIndex {
    fn add(&mut self, doc: DocId, raw: &str) {
        let Ok(value) = raw.trim().parse::<f64>() else { return };
        let docs = self.entries.entry(OrderedFloat(value)).or_default();
        if let Err(pos) = docs.binary_search(&doc) {
            docs.insert(pos, doc);
        }
    }

    fn remove(&mut self, doc: DocId, raw: &str) {
        let Ok(value) = raw.trim().parse::<f64>() else { return };
        if let Some(docs) = self.entries.get_mut(&OrderedFloat(value)) {
            if let Ok(pos) = docs.binary_search(&doc) {
                docs.remove(pos);
            }
            if docs.is_empty() {
                self.entries.remove(&OrderedFloat(value));
            }
        }
    }

    /// Docs with value in `[lo, hi]`, ascending by id. `lo > hi` is empty.
    pub fn range(&self, lo: f64, hi: f64) -> Vec<DocId> {
        if lo > hi {
            return Vec::new();
        }
        let mut out: Vec<DocId> = self
            .entries
            .range(OrderedFloat(lo)..=OrderedFloat(hi))
            .flat_map(|(_, docs)| docs.iter().copied())
            .collect();
        out.sort_unstable();
        out
    }
}

/// Doc → fixed-dimension feature vector.
#[derive(Debug, Default)]
pub struct VectorIndex {
    vectors: HashMap<DocId, Box<[f32]>>,
}

impl VectorIndex {
    fn add(&mut self, doc: DocId, raw: &[u8]) {
        self.vectors.insert(doc, bytes_to_vector(raw).into_boxed_slice());
    }

    fn remove(&mut self, doc: DocId) {
        self.vectors.remove(&doc);
    }

    /// Lookup is guaranteed to succeed for any doc indexed under this
    /// field; a miss is a programmer error.
    pub fn get(&self, doc: DocId) -> &[f32] {
        self.vectors
            .get(&doc)
            .unwrap_or_else(|| panic!("no vector indexed for doc {doc}"))
    }
}

/// Per-field index dispatch.
#[derive(Debug)]
pub enum FieldIndex {
    Text(TextIndex),
    Tag(TagIndex),
    Numeric(NumericIndex),
    Vector(VectorIndex),
}

impl FieldIndex {
    fn new(field_type: FieldType) -> Self {
        match field_type {
            FieldType::Text => FieldIndex::Text(TextIndex::default()),
            FieldType::Tag => FieldIndex::Tag(TagIndex::default()),
            FieldType::Numeric => FieldIndex::Numeric(NumericIndex::default()),
            FieldType::Vector => FieldIndex::Vector(VectorIndex::default()),
        }
    }

    fn add(&mut self, doc: DocId, access: &dyn DocumentAccessor, identifier: &str) {
        let Some(raw) = access.field(identifier) else { return };
        match self {
            FieldIndex::Text(index) => index.add(doc, &String::from_utf8_lossy(&raw)),
            FieldIndex::Tag(index) => index.add(doc, &String::from_utf8_lossy(&raw)),
            FieldIndex::Numeric(index) => index.add(doc, &String::from_utf8_lossy(&raw)),
            FieldIndex::Vector(index) => index.add(doc, &raw),
        }
    }

    fn remove(&mut self, doc: DocId, access: &dyn DocumentAccessor, identifier: &str) {
        let Some(raw) = access.field(identifier) else { return };
        match self {
            FieldIndex::Text(index) => index.remove(doc, &String::from_utf8_lossy(&raw)),
            FieldIndex::Tag(index) => index.remove(doc, &String::from_utf8_lossy(&raw)),
            FieldIndex::Numeric(index) => index.remove(doc, &String::from_utf8_lossy(&raw)),
            FieldIndex::Vector(index) => index.remove(doc),
        }
    }
}

/// Owns the per-field indices for one schema plus the sorted set of all
/// live doc ids.
#[derive(Debug)]
pub struct FieldIndices {
    schema: Schema,
    indices: HashMap<String, FieldIndex>,
    all_ids: Vec<DocId>,
}

impl FieldIndices {
    pub fn new(schema: Schema) -> Self {
        let indices = schema
            .fields
            .iter()
            .map(|(name, field)| (name.clone(), FieldIndex::new(field.field_type)))
            .collect();
        FieldIndices { schema, indices, all_ids: Vec::new() }
    }

    pub fn add(&mut self, doc: DocId, access: &dyn DocumentAccessor) {
        for (name, field) in &self.schema.fields {
            if let Some(index) = self.indices.get_mut(name) {
                index.add(doc, access, &field.identifier);
            }
        }
        match self.all_ids.binary_search(&doc) {
            Ok(_) => panic!("doc {doc} already indexed"),
            Err(pos) => self.all_ids.insert(pos, doc),
        }
    }

    pub fn remove(&mut self, doc: DocId, access: &dyn DocumentAccessor) {
        for (name, field) in &self.schema.fields {
            if let Some(index) = self.indices.get_mut(name) {
                index.remove(doc, access, &field.identifier);
            }
        }
        let pos = self
            .all_ids
            .binary_search(&doc)
            .unwrap_or_else(|_| panic!("removing unindexed doc {doc}"));
        self.all_ids.remove(pos);
    }

    pub fn index(&self, attribute: &str) -> Option<&FieldIndex> {
        self.indices.get(attribute)
    }

    /// Text-typed indices in schema order, for bare-term queries without a
    /// field scope.
    pub fn all_text_indices(&self) -> Vec<&TextIndex> {
        self.schema
            .fields
            .iter()
            .filter(|(_, f)| f.field_type == FieldType::Text)
            .filter_map(|(name, _)| match self.indices.get(name) {
                Some(FieldIndex::Text(index)) => Some(index),
                _ => None,
            })
            .collect()
    }

    pub fn all_docs(&self) -> &[DocId] {
        &self.all_ids
    }

    pub fn num_docs(&self) -> usize {
        self.all_ids.len()
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{vector_to_bytes, HashAccessor};

    fn sample_schema() -> Schema {
        let mut schema = Schema::new();
        schema
            .add_field("title", "title", FieldType::Text)
            .add_field("tag", "tag", FieldType::Tag)
            .add_field("price", "price", FieldType::Numeric);
        schema
    }

    fn doc(title: &str, tag: &str, price: &str) -> HashAccessor {
        let mut acc = HashAccessor::new();
        acc.set("title", title).set("tag", tag).set("price", price);
        acc
    }

    #[test]
    fn add_populates_every_field_index() {
        let mut indices = FieldIndices::new(sample_schema());
        indices.add(1, &doc("red apple", "sale,new", "10"));
        indices.add(2, &doc("banana", "sale", "20"));

        let Some(FieldIndex::Text(text)) = indices.index("title") else { panic!() };
        assert_eq!(text.matching("apple").unwrap().iter().collect::<Vec<_>>(), vec![1]);
        assert!(text.matching("missing").is_none());

        let Some(FieldIndex::Tag(tags)) = indices.index("tag") else { panic!() };
        assert_eq!(tags.matching("sale").unwrap().iter().collect::<Vec<_>>(), vec![1, 2]);

        let Some(FieldIndex::Numeric(nums)) = indices.index("price") else { panic!() };
        assert_eq!(nums.range(5.0, 15.0), vec![1]);

        assert_eq!(indices.all_docs(), &[1, 2]);
    }

    #[test]
    fn remove_is_symmetric() {
        let mut indices = FieldIndices::new(sample_schema());
        let d1 = doc("apple", "sale", "10");
        indices.add(1, &d1);
        indices.add(2, &doc("apple", "new", "20"));
        indices.remove(1, &d1);

        let Some(FieldIndex::Text(text)) = indices.index("title") else { panic!() };
        assert_eq!(text.matching("apple").unwrap().iter().collect::<Vec<_>>(), vec![2]);
        assert_eq!(indices.all_docs(), &[2]);
    }

    #[test]
    #[should_panic(expected = "removing unindexed doc")]
    fn remove_of_unknown_doc_panics() {
        let mut indices = FieldIndices::new(sample_schema());
        indices.remove(7, &doc("a", "b", "1"));
    }

    #[test]
    fn numeric_range_with_inverted_bounds_is_empty() {
        let mut indices = FieldIndices::new(sample_schema());
        indices.add(1, &doc("a", "t", "10"));
        let Some(FieldIndex::Numeric(nums)) = indices.index("price") else { panic!() };
        assert!(nums.range(40.0, 15.0).is_empty());
    }

    #[test]
    fn vector_field_roundtrip() {
        let mut schema = Schema::new();
        schema.add_field("v", "v", FieldType::Vector);
        let mut indices = FieldIndices::new(schema);

        let mut acc = HashAccessor::new();
        acc.set("v", vector_to_bytes(&[1.0, 2.0]));
        indices.add(1, &acc);

        let Some(FieldIndex::Vector(vectors)) = indices.index("v") else { panic!() };
        assert_eq!(vectors.get(1), &[1.0, 2.0]);
    }

    #[test]
    fn tags_are_split_and_normalized() {
        let mut indices = FieldIndices::new(sample_schema());
        indices.add(1, &doc("x", " Sale , NEW ", "1"));
        let Some(FieldIndex::Tag(tags)) = indices.index("tag") else { panic!() };
        assert!(tags.matching("sale").is_some());
        assert!(tags.matching("new").is_some());
    }
}

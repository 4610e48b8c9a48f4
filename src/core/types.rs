use std::borrow::Cow;
use std::collections::HashMap;

/// Document identifier within one shard. Ids are assigned monotonically and
/// never reused for the lifetime of an index.
pub type DocId = u32;

/// Boundary to the document store: exposes raw field values by identifier.
///
/// The store itself (HASH or JSON documents) lives outside this crate; the
/// indices only ever see byte payloads looked up through this trait.
pub trait DocumentAccessor {
    fn field(&self, identifier: &str) -> Option<Cow<'_, [u8]>>;
}

/// Flat field-map accessor over owned byte values, as produced for HASH
/// documents.
#[derive(Debug, Default, Clone)]
pub struct HashAccessor {
    fields: HashMap<String, Vec<u8>>,
}

impl HashAccessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, identifier: impl Into<String>, value: impl Into<Vec<u8>>) -> &mut Self {
        self.fields.insert(identifier.into(), value.into());
        self
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }
}

impl DocumentAccessor for HashAccessor {
    fn field(&self, identifier: &str) -> Option<Cow<'_, [u8]>> {
        self.fields.get(identifier).map(|v| Cow::Borrowed(v.as_slice()))
    }
}

/// Decode a raw byte payload into a float vector: little-endian IEEE-754
/// float32 sequence. Trailing bytes that do not fill a full float are
/// dropped.
pub fn bytes_to_vector(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// Encode a float vector into its wire form.
pub fn vector_to_bytes(vector: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(vector.len() * 4);
    for v in vector {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vector_roundtrip() {
        let v = vec![0.5f32, -1.25, 3.0];
        assert_eq!(bytes_to_vector(&vector_to_bytes(&v)), v);
    }

    #[test]
    fn vector_ignores_trailing_bytes() {
        let mut bytes = vector_to_bytes(&[1.0]);
        bytes.extend_from_slice(&[0xff, 0xff]);
        assert_eq!(bytes_to_vector(&bytes), vec![1.0]);
    }

    #[test]
    fn hash_accessor_lookup() {
        let mut acc = HashAccessor::new();
        acc.set("title", "hello");
        assert_eq!(acc.field("title").as_deref(), Some(&b"hello"[..]));
        assert!(acc.field("missing").is_none());
    }
}

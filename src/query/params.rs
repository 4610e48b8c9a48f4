use std::collections::HashMap;

/// Named parameter bindings passed alongside a query string.
///
/// Bindings carry raw byte payloads; the only consumer today is the KNN
/// clause, which decodes its `$name` binding as a little-endian float32
/// vector.
#[derive(Debug, Default, Clone)]
pub struct QueryParams {
    bindings: HashMap<String, Vec<u8>>,
}

impl QueryParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&mut self, name: impl Into<String>, value: impl Into<Vec<u8>>) {
        self.bindings.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.bindings.get(name).map(|v| v.as_slice())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_and_get() {
        let mut params = QueryParams::new();
        params.bind("vec", vec![1u8, 2, 3]);
        assert_eq!(params.get("vec"), Some(&[1u8, 2, 3][..]));
        assert_eq!(params.get("other"), None);
    }
}

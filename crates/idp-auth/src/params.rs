//! Typed request parameter maps
//!
//! Resource handlers receive their arguments as a [`ParamMap`]: string
//! keys to string values, plus any uploaded files. The HTTP layer fills
//! the map from the method-appropriate source (query string for reads,
//! form body for mutating methods), which is also the parameter set
//! consulted for an `access_token`.

use std::collections::HashMap;

/// A file uploaded in a multipart form.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub filename: Option<String>,
    pub content_type: Option<String>,
    pub data: Vec<u8>,
}

/// String-keyed request arguments with string-or-file values.
#[derive(Debug, Clone, Default)]
pub struct ParamMap {
    values: HashMap<String, String>,
    files: HashMap<String, UploadedFile>,
}

impl ParamMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty() && self.files.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn file(&self, key: &str) -> Option<&UploadedFile> {
        self.files.get(key)
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    pub fn add_file(&mut self, key: impl Into<String>, file: UploadedFile) {
        self.files.insert(key.into(), file);
    }

    /// Parse a raw query string (`a=b&c=d`, percent-encoded).
    pub fn from_query(query: Option<&str>) -> Self {
        match query {
            Some(query) => Self::from_urlencoded(query.as_bytes()),
            None => Self::new(),
        }
    }

    /// Parse `application/x-www-form-urlencoded` bytes (query string or
    /// form body; the encoding is the same).
    pub fn from_urlencoded(raw: &[u8]) -> Self {
        let mut map = Self::new();
        for (key, value) in url::form_urlencoded::parse(raw) {
            map.values.insert(key.into_owned(), value.into_owned());
        }
        map
    }
}

use std::{
    collections::hash_map::DefaultHasher,
    hash::{Hash, Hasher},
};

/// Length of the hex digest embedded in a document id.
const DIGEST_LEN: usize = 12;

/// A stable document identifier derived from `(source_id, path)`.
///
/// Rendered as `<source_id>:<hex digest>`, so ids stay unique across
/// sources even when two sources ship a page with the same path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocumentId {
    pub numeric: u64,
    pub source_id: String,
}

impl DocumentId {
    pub fn new(source_id: &str, path: &str) -> Self {
        let mut hasher = DefaultHasher::new();
        source_id.hash(&mut hasher);
        path.hash(&mut hasher);
        Self {
            numeric: hasher.finish(),
            source_id: source_id.to_string(),
        }
    }

    pub fn digest(&self) -> String {
        let full = format!("{:016x}", self.numeric);
        full[..DIGEST_LEN].to_string()
    }
}

impl std::fmt::Display for DocumentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.source_id, self.digest())
    }
}

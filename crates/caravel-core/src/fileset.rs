//! Read-only virtual file tree returned by the infrastructure emitter.

use std::collections::BTreeMap;

/// An immutable set of generated files, keyed by relative path.
///
/// Iteration order is stable (lexicographic by path), so two file sets built
/// from the same inputs compare and serialize identically.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutputFileSet {
    files: BTreeMap<String, Vec<u8>>,
}

impl OutputFileSet {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&mut self, path: impl Into<String>, contents: impl Into<Vec<u8>>) {
        self.files.insert(path.into(), contents.into());
    }

    pub fn get(&self, path: &str) -> Option<&[u8]> {
        self.files.get(path).map(Vec::as_slice)
    }

    /// Contents decoded as UTF-8, for generated text artifacts.
    pub fn get_str(&self, path: &str) -> Option<&str> {
        self.get(path).and_then(|b| std::str::from_utf8(b).ok())
    }

    pub fn contains(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.files.iter().map(|(p, c)| (p.as_str(), c.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

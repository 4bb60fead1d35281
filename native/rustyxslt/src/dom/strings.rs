//! String Pool
//!
//! Names and namespace URIs are interned with hash deduplication; character
//! data is stored once per node without the lookup. Id 0 is always "".

use std::collections::HashMap;
use std::hash::{Hash, Hasher};

/// (offset, length) into the pool buffer
#[derive(Debug, Clone, Copy)]
struct Span {
    offset: u32,
    len: u32,
}

/// String pool backing one document
#[derive(Debug, Clone)]
pub struct StringPool {
    /// Spans indexed by string id
    entries: Vec<Span>,
    data: String,
    /// Hash of interned content -> ids with that hash
    hash_index: HashMap<u64, Vec<u32>>,
}

impl Default for StringPool {
    fn default() -> Self {
        Self::new()
    }
}

impl StringPool {
    pub fn new() -> Self {
        let mut pool = StringPool {
            entries: Vec::with_capacity(256),
            data: String::with_capacity(4096),
            hash_index: HashMap::new(),
        };
        pool.entries.push(Span { offset: 0, len: 0 });
        pool
    }

    #[inline]
    fn compute_hash(s: &str) -> u64 {
        use std::collections::hash_map::DefaultHasher;
        let mut hasher = DefaultHasher::new();
        s.hash(&mut hasher);
        hasher.finish()
    }

    fn push(&mut self, s: &str) -> u32 {
        let id = self.entries.len() as u32;
        self.entries.push(Span {
            offset: self.data.len() as u32,
            len: s.len() as u32,
        });
        self.data.push_str(s);
        id
    }

    /// Intern a name or URI, returning the existing id for repeated content
    pub fn intern(&mut self, s: &str) -> u32 {
        if s.is_empty() {
            return 0;
        }

        let hash = Self::compute_hash(s);
        if let Some(ids) = self.hash_index.get(&hash) {
            for &id in ids {
                if self.get(id) == s {
                    return id;
                }
            }
        }

        let id = self.push(s);
        self.hash_index.entry(hash).or_default().push(id);
        id
    }

    /// Store character data without deduplication
    pub fn store(&mut self, s: &str) -> u32 {
        if s.is_empty() {
            return 0;
        }
        self.push(s)
    }

    /// Resolve an id; unknown ids read as ""
    #[inline]
    pub fn get(&self, id: u32) -> &str {
        match self.entries.get(id as usize) {
            Some(span) => {
                let start = span.offset as usize;
                self.data.get(start..start + span.len as usize).unwrap_or("")
            }
            None => "",
        }
    }

    /// Bytes held by the pool buffer
    pub fn memory_usage(&self) -> usize {
        self.data.capacity() + self.entries.capacity() * std::mem::size_of::<Span>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intern_dedup() {
        let mut pool = StringPool::new();
        let a = pool.intern("item");
        let b = pool.intern("item");
        let c = pool.intern("other");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(pool.get(a), "item");
        assert_eq!(pool.intern("other"), c);
        assert_eq!(pool.entries.len(), 3);
    }

    #[test]
    fn test_store_keeps_copies() {
        let mut pool = StringPool::new();
        let a = pool.store("text");
        let b = pool.store("text");
        assert_ne!(a, b);
        assert_eq!(pool.get(b), "text");
    }

    #[test]
    fn test_empty_is_zero() {
        let mut pool = StringPool::new();
        assert_eq!(pool.intern(""), 0);
        assert_eq!(pool.store(""), 0);
        assert_eq!(pool.get(0), "");
        assert_eq!(pool.entries.len(), 1);
    }

    #[test]
    fn test_long_strings_survive() {
        let mut pool = StringPool::new();
        let long = "x".repeat(100_000);
        let id = pool.store(&long);
        assert_eq!(pool.get(id).len(), 100_000);
    }
}

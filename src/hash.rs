//! Content hashing for extracted values.
//!
//! Hashes cover content only, never source positions, so the same value
//! written in two places hashes the same.

use std::sync::Arc;

use indexmap::IndexMap;
use sha2::{Digest, Sha256};

use crate::model::{KeyReference, NodeReference, ValueReference};

/// Digest over a value's content.
pub trait ContentHash {
    fn content_hash(&self) -> [u8; 32];
}

pub fn sha256(bytes: &[u8]) -> [u8; 32] {
    Sha256::digest(bytes).into()
}

impl ContentHash for str {
    fn content_hash(&self) -> [u8; 32] {
        sha256(self.as_bytes())
    }
}

impl ContentHash for String {
    fn content_hash(&self) -> [u8; 32] {
        self.as_str().content_hash()
    }
}

macro_rules! display_hash {
    ($($ty:ty),*) => {
        $(impl ContentHash for $ty {
            fn content_hash(&self) -> [u8; 32] {
                sha256(self.to_string().as_bytes())
            }
        })*
    };
}

display_hash!(bool, i32, i64, u32, u64, usize, f64);

impl ContentHash for serde_json::Value {
    fn content_hash(&self) -> [u8; 32] {
        match self {
            serde_json::Value::String(s) => s.content_hash(),
            other => sha256(other.to_string().as_bytes()),
        }
    }
}

impl<T: ContentHash + ?Sized> ContentHash for &T {
    fn content_hash(&self) -> [u8; 32] {
        (**self).content_hash()
    }
}

impl<T: ContentHash + ?Sized> ContentHash for Box<T> {
    fn content_hash(&self) -> [u8; 32] {
        (**self).content_hash()
    }
}

impl<T: ContentHash + ?Sized> ContentHash for Arc<T> {
    fn content_hash(&self) -> [u8; 32] {
        (**self).content_hash()
    }
}

/// Absent values hash like an empty field.
impl<T: ContentHash> ContentHash for Option<T> {
    fn content_hash(&self) -> [u8; 32] {
        match self {
            Some(value) => value.content_hash(),
            None => sha256(&[]),
        }
    }
}

impl<T: ContentHash> ContentHash for NodeReference<T> {
    fn content_hash(&self) -> [u8; 32] {
        self.value.content_hash()
    }
}

impl<T: ContentHash> ContentHash for ValueReference<T> {
    fn content_hash(&self) -> [u8; 32] {
        self.value.content_hash()
    }
}

impl<T: ContentHash> ContentHash for Vec<T> {
    fn content_hash(&self) -> [u8; 32] {
        let mut hasher = FieldHasher::new();
        for item in self {
            hasher = hasher.hashed(item);
        }
        hasher.finish()
    }
}

/// Map hashes ignore key order.
impl<V: ContentHash> ContentHash for IndexMap<KeyReference, V> {
    fn content_hash(&self) -> [u8; 32] {
        let mut entries: Vec<(&str, String)> = self
            .iter()
            .map(|(k, v)| (k.value.as_str(), hex::encode(v.content_hash())))
            .collect();
        entries.sort();
        let mut hasher = FieldHasher::new();
        for (key, digest) in entries {
            hasher = hasher.field(key).field(digest);
        }
        hasher.finish()
    }
}

/// Joins field representations with `|` and digests the result.
///
/// Empty fields are skipped.
#[derive(Debug, Default)]
pub struct FieldHasher {
    parts: Vec<String>,
}

impl FieldHasher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, value: impl ToString) -> Self {
        let value = value.to_string();
        if !value.is_empty() {
            self.parts.push(value);
        }
        self
    }

    pub fn optional(self, value: Option<impl ToString>) -> Self {
        match value {
            Some(value) => self.field(value),
            None => self,
        }
    }

    /// Add a nested value by its hex digest.
    pub fn hashed<T: ContentHash + ?Sized>(mut self, value: &T) -> Self {
        self.parts.push(hex::encode(value.content_hash()));
        self
    }

    pub fn finish(self) -> [u8; 32] {
        sha256(self.parts.join("|").as_bytes())
    }
}

/// True iff both values are present and their hashes match.
pub fn are_equal<A, B>(left: Option<&A>, right: Option<&B>) -> bool
where
    A: ContentHash + ?Sized,
    B: ContentHash + ?Sized,
{
    match (left, right) {
        (Some(l), Some(r)) => l.content_hash() == r.content_hash(),
        _ => false,
    }
}

/// Hex digest of a value, empty when absent.
pub fn hash_string<T: ContentHash + ?Sized>(value: Option<&T>) -> String {
    value
        .map(|v| hex::encode(v.content_hash()))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    const HELLO: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";
    const EMPTY: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";
    const TRUE: &str = "b5bea41b6c623f7c09f1bf24dcae58ebab3c0cdd90ad966bc43a45b44867e12b";

    struct Fresh {
        val: String,
    }

    impl ContentHash for Fresh {
        fn content_hash(&self) -> [u8; 32] {
            FieldHasher::new().field(&self.val).finish()
        }
    }

    #[test]
    fn hash_string_known_digests() {
        assert_eq!(hash_string(Some("hello")), HELLO);
        assert_eq!(hash_string(Some("")), EMPTY);
        assert_eq!(hash_string(Some(&true)), TRUE);
        assert_eq!(hash_string::<str>(None), "");
    }

    #[test]
    fn field_hasher_single_field_matches_plain_digest() {
        let fresh = Fresh {
            val: "hello".into(),
        };
        assert_eq!(hash_string(Some(&fresh)), HELLO);
        assert_eq!(hex::encode(FieldHasher::new().field(true).finish()), TRUE);
    }

    #[test]
    fn field_hasher_joins_with_pipe() {
        let joined = FieldHasher::new().field("a").field("").field("b").finish();
        assert_eq!(joined, sha256(b"a|b"));
    }

    #[test]
    fn are_equal_needs_both() {
        assert!(are_equal(Some("pizza"), Some(&"pizza".to_string())));
        assert!(!are_equal(Some("pizza"), Some("cake")));
        assert!(!are_equal::<str, str>(None, None));
        assert!(!are_equal(Some("pizza"), None::<&str>));
    }

    #[test]
    fn option_hashes_through() {
        assert_eq!(hex::encode(Some("hello".to_string()).content_hash()), HELLO);
        assert_eq!(hex::encode(None::<String>.content_hash()), EMPTY);
    }

    #[test]
    fn map_hash_ignores_order() {
        let mut one: IndexMap<KeyReference, String> = IndexMap::new();
        one.insert("a".into(), "1".into());
        one.insert("b".into(), "2".into());
        let mut two: IndexMap<KeyReference, String> = IndexMap::new();
        two.insert("b".into(), "2".into());
        two.insert("a".into(), "1".into());
        assert!(are_equal(Some(&one), Some(&two)));
    }
}

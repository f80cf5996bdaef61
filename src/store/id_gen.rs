//! Deterministic key generation via BLAKE3

use blake3::Hasher;

/// Format a numeric sequence value as a 24-char hex object id
///
/// Zero-padded so that lexicographic order equals numeric order.
///
/// # Examples
/// ```
/// use engagedb::store::object_id;
///
/// assert_eq!(object_id(255), "0000000000000000000000ff");
/// ```
pub fn object_id(seq: u64) -> String {
    format!("{:024x}", seq)
}

/// Compute the uniqueness key of a relation tuple
///
/// KEY = hex(BLAKE3(kind|subject|object|objectKind)[0..16])
/// `object_kind` is empty for subscriptions.
///
/// # Examples
/// ```
/// use engagedb::store::relation_key;
///
/// let a = relation_key("like", "u1", "v1", "video");
/// let b = relation_key("like", "u1", "v1", "video");
/// assert_eq!(a, b);
/// ```
pub fn relation_key(kind: &str, subject: &str, object: &str, object_kind: &str) -> String {
    let mut hasher = Hasher::new();

    hasher.update(kind.as_bytes());
    hasher.update(b"|"); // separator
    hasher.update(subject.as_bytes());
    hasher.update(b"|");
    hasher.update(object.as_bytes());
    hasher.update(b"|");
    hasher.update(object_kind.as_bytes());

    let hash = hasher.finalize();
    hash.as_bytes()[0..16]
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

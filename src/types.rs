//! Core value types shared across the metadata catalog and the storage layer.

use md5::{Digest as _, Md5};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::fmt;

/// Tool version identifier — uses crate name and version from Cargo.toml
pub const DEPOT_TOOL: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Checksum rendered as `<algo>:<hex>` (e.g. `md5:b1946ac9…`).
///
/// Stored verbatim in the catalog and compared as an opaque string; parsing
/// only matters when a response wants the bare hex digest (Content-MD5).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Checksum(String);

impl Checksum {
    pub fn new(algo: &str, hex_digest: &str) -> Self {
        Self(format!("{algo}:{hex_digest}"))
    }

    /// Parse a stored `<algo>:<hex>` string. Returns `None` when the value
    /// has no algorithm prefix.
    pub fn parse(value: &str) -> Option<Self> {
        let (algo, hex_digest) = value.split_once(':')?;
        if algo.is_empty() || hex_digest.is_empty() {
            return None;
        }
        Some(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn algo(&self) -> &str {
        self.0.split_once(':').map(|(a, _)| a).unwrap_or("")
    }

    pub fn hex_digest(&self) -> &str {
        self.0.split_once(':').map(|(_, h)| h).unwrap_or(&self.0)
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Digest algorithm used for ingest checksums and fixity re-checks.
///
/// MD5 is the default (it feeds the Content-MD5 response header); SHA-256 is
/// available for deployments that want a stronger fixity baseline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DigestAlgo {
    #[default]
    Md5,
    Sha256,
}

impl DigestAlgo {
    pub fn name(self) -> &'static str {
        match self {
            DigestAlgo::Md5 => "md5",
            DigestAlgo::Sha256 => "sha256",
        }
    }

    pub fn hasher(self) -> DigestState {
        match self {
            DigestAlgo::Md5 => DigestState::Md5(Md5::new()),
            DigestAlgo::Sha256 => DigestState::Sha256(Sha256::new()),
        }
    }
}

/// Running digest accumulator for one of the supported algorithms.
#[derive(Debug, Clone)]
pub enum DigestState {
    Md5(Md5),
    Sha256(Sha256),
}

impl DigestState {
    pub fn update(&mut self, chunk: &[u8]) {
        match self {
            DigestState::Md5(h) => h.update(chunk),
            DigestState::Sha256(h) => h.update(chunk),
        }
    }

    pub fn finalize(self) -> Checksum {
        match self {
            DigestState::Md5(h) => Checksum::new("md5", &hex::encode(h.finalize())),
            DigestState::Sha256(h) => Checksum::new("sha256", &hex::encode(h.finalize())),
        }
    }
}

/// A size limit together with the human-readable reason it applies.
///
/// Carried through the upload pipeline so a rejected upload can tell the
/// client *which* limit it hit (bucket quota vs. configured max file size).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SizeLimit {
    pub limit: u64,
    pub reason: String,
}

impl SizeLimit {
    pub fn new(limit: u64, reason: impl Into<String>) -> Self {
        Self {
            limit,
            reason: reason.into(),
        }
    }
}

/// Validate a location name: lower-case slug matching `^[a-z][a-z0-9-]+$`,
/// at most 20 characters.
pub fn is_valid_location_name(name: &str) -> bool {
    if name.len() < 2 || name.len() > 20 {
        return false;
    }
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

/// Errors from validating a user-provided object key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValidationError(pub String);

impl fmt::Display for KeyValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for KeyValidationError {}

/// Validate an object key for PUT/GET/HEAD/DELETE operations.
///
/// Rejects empty keys, keys longer than `max_len`, path traversal segments,
/// backslashes, and embedded NUL/control bytes.
pub fn validate_object_key(key: &str, max_len: usize) -> Result<(), KeyValidationError> {
    if key.is_empty() {
        return Err(KeyValidationError("Object key must not be empty".into()));
    }
    if key.len() > max_len {
        return Err(KeyValidationError(format!(
            "Object key exceeds maximum length of {max_len}"
        )));
    }
    if key.contains('\\') || key.contains('\0') {
        return Err(KeyValidationError(
            "Object key contains invalid characters".into(),
        ));
    }
    if key.chars().any(|c| c.is_control()) {
        return Err(KeyValidationError(
            "Object key contains control characters".into(),
        ));
    }
    for segment in key.split('/') {
        if segment == "." || segment == ".." {
            return Err(KeyValidationError(
                "Object key must not contain path traversal segments".into(),
            ));
        }
    }
    Ok(())
}

/// Build a blob path by splitting `id` into `dimensions` chunks of
/// `split_length` characters, e.g. `base/de/ad/beefcafe/data`.
///
/// Spreading blobs over short directory levels keeps any single directory
/// from accumulating millions of entries on filesystem backends.
pub fn make_blob_path(
    base_uri: &str,
    id: &str,
    filename: &str,
    dimensions: usize,
    split_length: usize,
) -> String {
    debug_assert!(id.len() > dimensions * split_length);

    let mut parts = Vec::with_capacity(dimensions + 2);
    let mut rest = id;
    for _ in 0..dimensions {
        let (head, tail) = rest.split_at(split_length.min(rest.len()));
        parts.push(head);
        rest = tail;
    }
    parts.push(rest);
    parts.push(filename);

    let base = base_uri.trim_end_matches('/');
    format!("{}/{}", base, parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_checksum_roundtrip() {
        let c = Checksum::new("md5", "b1946ac92492d2347c6235b4d2611184");
        assert_eq!(c.as_str(), "md5:b1946ac92492d2347c6235b4d2611184");
        assert_eq!(c.algo(), "md5");
        assert_eq!(c.hex_digest(), "b1946ac92492d2347c6235b4d2611184");

        let parsed = Checksum::parse("sha256:deadbeef").unwrap();
        assert_eq!(parsed.algo(), "sha256");
        assert!(Checksum::parse("no-colon").is_none());
        assert!(Checksum::parse(":empty-algo").is_none());
    }

    #[test]
    fn test_digest_md5_known_value() {
        // md5("hello\n")
        let mut h = DigestAlgo::Md5.hasher();
        h.update(b"hello\n");
        assert_eq!(
            h.finalize().as_str(),
            "md5:b1946ac92492d2347c6235b4d2611184"
        );
    }

    #[test]
    fn test_digest_incremental_matches_oneshot() {
        let mut a = DigestAlgo::Sha256.hasher();
        a.update(b"hello ");
        a.update(b"world");
        let mut b = DigestAlgo::Sha256.hasher();
        b.update(b"hello world");
        assert_eq!(a.finalize(), b.finalize());
    }

    #[test]
    fn test_location_name_validation() {
        assert!(is_valid_location_name("eu-archive"));
        assert!(is_valid_location_name("a1"));
        assert!(!is_valid_location_name("a")); // too short
        assert!(!is_valid_location_name("1abc")); // must start with a letter
        assert!(!is_valid_location_name("Upper"));
        assert!(!is_valid_location_name("has_underscore"));
        assert!(!is_valid_location_name("this-name-is-way-too-long"));
    }

    #[test]
    fn test_object_key_validation() {
        assert!(validate_object_key("hello.txt", 255).is_ok());
        assert!(validate_object_key("deep/nested/key", 255).is_ok());
        assert!(validate_object_key("", 255).is_err());
        assert!(validate_object_key("../escape", 255).is_err());
        assert!(validate_object_key("a/./b", 255).is_err());
        assert!(validate_object_key("back\\slash", 255).is_err());
        assert!(validate_object_key(&"x".repeat(256), 255).is_err());
    }

    #[test]
    fn test_make_blob_path() {
        let id = "deadbeefcafe";
        assert_eq!(
            make_blob_path("/data", id, "data", 2, 2),
            "/data/de/ad/beefcafe/data"
        );
        assert_eq!(
            make_blob_path("/data/", id, "data", 1, 2),
            "/data/de/adbeefcafe/data"
        );
    }

    proptest! {
        #[test]
        fn prop_valid_slugs_accepted(s in "[a-z][a-z0-9-]{1,19}") {
            prop_assert!(is_valid_location_name(&s));
        }

        #[test]
        fn prop_blob_path_preserves_id(id in "[0-9a-f]{12,32}") {
            let path = make_blob_path("/base", &id, "data", 2, 2);
            // Stripping separators must recover the id exactly.
            let middle = path
                .trim_start_matches("/base/")
                .trim_end_matches("/data")
                .replace('/', "");
            prop_assert_eq!(middle, id);
        }
    }
}

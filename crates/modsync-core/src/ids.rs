//! Core identifier types for modsync.
//!
//! This module provides strongly-typed identifiers for modules, cluster
//! resources and the opaque tokens handed out by the module store.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Maximum length of a DNS-1123 label.
const MAX_LABEL_LEN: usize = 63;

/// Errors produced when parsing or validating identifiers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdError {
    /// The identifier was empty.
    #[error("identifier must not be empty")]
    Empty,

    /// The identifier exceeds the maximum allowed length.
    #[error("identifier is too long: {len} characters (max {max})")]
    TooLong {
        /// Actual length.
        len: usize,
        /// Maximum length.
        max: usize,
    },

    /// The identifier contains characters outside the DNS-1123 label alphabet.
    #[error("invalid identifier {0:?}: must be lowercase alphanumerics or '-', starting and ending with an alphanumeric")]
    InvalidLabel(String),

    /// A resource identity string could not be parsed.
    #[error("invalid resource identity: {0}")]
    InvalidIdentity(String),

    /// Invalid hex encoding.
    #[error("invalid hex encoding")]
    InvalidHex,

    /// Invalid length for the identifier type.
    #[error("invalid length: expected {expected} bytes, got {got}")]
    InvalidLength {
        /// Expected length in bytes.
        expected: usize,
        /// Actual length in bytes.
        got: usize,
    },
}

/// Validate a DNS-1123 label (Kubernetes object names and namespaces).
///
/// # Errors
///
/// Returns an error if the label is empty, longer than 63 characters, or
/// contains characters other than lowercase alphanumerics and `-`.
pub fn validate_dns_label(s: &str) -> Result<(), IdError> {
    if s.is_empty() {
        return Err(IdError::Empty);
    }
    if s.len() > MAX_LABEL_LEN {
        return Err(IdError::TooLong {
            len: s.len(),
            max: MAX_LABEL_LEN,
        });
    }

    let valid_chars = s
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    let alnum = |c: char| c.is_ascii_lowercase() || c.is_ascii_digit();
    let valid_edges = s.starts_with(alnum) && s.ends_with(alnum);

    if valid_chars && valid_edges {
        Ok(())
    } else {
        Err(IdError::InvalidLabel(s.to_string()))
    }
}

/// The name of a Module.
///
/// Module names are DNS-1123 labels so they can be used verbatim as label
/// values on the resources a module owns.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ModuleName(String);

impl ModuleName {
    /// Parse and validate a module name.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is not a valid DNS-1123 label.
    pub fn new(name: impl Into<String>) -> Result<Self, IdError> {
        let name = name.into();
        validate_dns_label(&name)?;
        Ok(Self(name))
    }

    /// Return the name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ModuleName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ModuleName({})", self.0)
    }
}

impl fmt::Display for ModuleName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ModuleName {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for ModuleName {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ModuleName> for String {
    fn from(name: ModuleName) -> Self {
        name.0
    }
}

impl AsRef<str> for ModuleName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// The identity of a cluster resource: `(group, version, kind, namespace, name)`.
///
/// Two manifests with equal identities are the same logical resource,
/// regardless of content. Comparison is exact and case-sensitive on all five
/// fields. The core API group and cluster-scoped namespaces are empty strings.
///
/// Ordering is lexicographic over the fields, which keeps sets of identities
/// in a stable order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResourceIdentity {
    /// API group (empty for the core group).
    #[serde(default)]
    pub group: String,
    /// API version within the group.
    pub version: String,
    /// Resource kind, e.g. `Deployment`.
    pub kind: String,
    /// Namespace (empty for cluster-scoped resources).
    #[serde(default)]
    pub namespace: String,
    /// Object name.
    pub name: String,
}

impl ResourceIdentity {
    /// Build an identity from an `apiVersion` string and the remaining fields.
    #[must_use]
    pub fn new(
        api_version: &str,
        kind: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        let (group, version) = split_api_version(api_version);
        Self {
            group: group.to_string(),
            version: version.to_string(),
            kind: kind.into(),
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Return the `apiVersion` string (`group/version`, or just `version` for core).
    #[must_use]
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }

    /// Whether the identity refers to a cluster-scoped resource.
    #[must_use]
    pub fn is_cluster_scoped(&self) -> bool {
        self.namespace.is_empty()
    }

    /// Whether both identities address the same object, possibly through
    /// different served versions of its group.
    #[must_use]
    pub fn same_object(&self, other: &Self) -> bool {
        self.group == other.group
            && self.kind == other.kind
            && self.namespace == other.namespace
            && self.name == other.name
    }
}

/// Split an `apiVersion` into `(group, version)`.
///
/// `apps/v1` splits into `("apps", "v1")`; `v1` into `("", "v1")`.
#[must_use]
pub fn split_api_version(api_version: &str) -> (&str, &str) {
    match api_version.rsplit_once('/') {
        Some((group, version)) => (group, version),
        None => ("", api_version),
    }
}

impl fmt::Display for ResourceIdentity {
    /// Formats as `group/version/Kind/namespace/name`, with `core` standing in
    /// for the empty group and `-` for an empty namespace.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let group = if self.group.is_empty() {
            "core"
        } else {
            &self.group
        };
        let namespace = if self.namespace.is_empty() {
            "-"
        } else {
            &self.namespace
        };
        write!(
            f,
            "{group}/{}/{}/{namespace}/{}",
            self.version, self.kind, self.name
        )
    }
}

impl FromStr for ResourceIdentity {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('/').collect();
        let [group, version, kind, namespace, name] = parts.as_slice() else {
            return Err(IdError::InvalidIdentity(s.to_string()));
        };
        if version.is_empty() || kind.is_empty() || name.is_empty() {
            return Err(IdError::InvalidIdentity(s.to_string()));
        }

        Ok(Self {
            group: if *group == "core" {
                String::new()
            } else {
                (*group).to_string()
            },
            version: (*version).to_string(),
            kind: (*kind).to_string(),
            namespace: if *namespace == "-" {
                String::new()
            } else {
                (*namespace).to_string()
            },
            name: (*name).to_string(),
        })
    }
}

/// An opaque optimistic-concurrency token issued by the module store.
///
/// A new token is issued on every successful write of a module's spec; an
/// update must present the token it read.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionToken(String);

impl VersionToken {
    /// Issue a fresh, random token.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    /// Wrap an existing token string.
    #[must_use]
    pub fn from_string(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Return the token as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for VersionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VersionToken({})", self.0)
    }
}

impl fmt::Display for VersionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A 32-byte blake3 content digest, hex-encoded for display.
///
/// Used to fingerprint rendered manifest sets so two renders can be compared
/// cheaply.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentDigest([u8; 32]);

impl ContentDigest {
    /// Hash the given bytes.
    #[must_use]
    pub fn of(bytes: &[u8]) -> Self {
        Self(*blake3::hash(bytes).as_bytes())
    }

    /// Hash a sequence of byte chunks, length-prefixing each so that chunk
    /// boundaries are part of the digest.
    #[must_use]
    pub fn of_chunks<'a>(chunks: impl IntoIterator<Item = &'a [u8]>) -> Self {
        let mut hasher = blake3::Hasher::new();
        for chunk in chunks {
            hasher.update(&(chunk.len() as u64).to_le_bytes());
            hasher.update(chunk);
        }
        Self(*hasher.finalize().as_bytes())
    }

    /// Parse a digest from a hex-encoded string.
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not valid hex or not exactly 64 characters.
    pub fn from_hex(s: &str) -> Result<Self, IdError> {
        let bytes = hex::decode(s).map_err(|_| IdError::InvalidHex)?;
        let arr: [u8; 32] = bytes.try_into().map_err(|_| IdError::InvalidLength {
            expected: 32,
            got: s.len() / 2,
        })?;
        Ok(Self(arr))
    }

    /// Return the hex-encoded string representation.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentDigest({})", self.to_hex())
    }
}

impl fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl TryFrom<String> for ContentDigest {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_hex(&value)
    }
}

impl From<ContentDigest> for String {
    fn from(digest: ContentDigest) -> Self {
        digest.to_hex()
    }
}

//! Content addresses in the object store namespace.

use serde::{Deserialize, Serialize};

/// One-character namespace suffix appended to an object's content address.
///
/// The suffix separates object kinds that share the data namespace, so a
/// partial-file chunk can never shadow a whole-file object with the same
/// digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum HashSuffix {
    /// Plain data object (no suffix).
    #[default]
    None,
    /// Partial-file chunk.
    Partial,
    /// File catalog.
    Catalog,
    /// Repository metadata.
    Metadata,
}

impl HashSuffix {
    /// The suffix as it appears at the end of an object path.
    pub fn as_str(&self) -> &'static str {
        match self {
            HashSuffix::None => "",
            HashSuffix::Partial => "P",
            HashSuffix::Catalog => "C",
            HashSuffix::Metadata => "M",
        }
    }
}

impl std::fmt::Display for HashSuffix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A content address: lowercase hex digest plus namespace suffix.
///
/// Objects live under `data/<first 2 hex chars>/<remaining hex><suffix>`;
/// the two-character fan-out keeps directory sizes bounded on filesystem
/// backends.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectAddress {
    digest_hex: String,
    suffix: HashSuffix,
}

impl ObjectAddress {
    /// Create an address from a lowercase hex digest and a suffix.
    pub fn new(digest_hex: impl Into<String>, suffix: HashSuffix) -> Self {
        Self {
            digest_hex: digest_hex.into(),
            suffix,
        }
    }

    /// The hex digest without suffix.
    pub fn digest_hex(&self) -> &str {
        &self.digest_hex
    }

    /// The namespace suffix.
    pub fn suffix(&self) -> HashSuffix {
        self.suffix
    }

    /// Relative path of this object inside the store.
    pub fn object_path(&self) -> String {
        if self.digest_hex.len() < 2 {
            return format!("data/{}{}", self.digest_hex, self.suffix.as_str());
        }
        let (dir, rest) = self.digest_hex.split_at(2);
        format!("data/{}/{}{}", dir, rest, self.suffix.as_str())
    }
}

impl std::fmt::Display for ObjectAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.digest_hex, self.suffix.as_str())
    }
}

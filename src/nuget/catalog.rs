use crate::nuget::version::SemanticVersion;
use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Package identifier. Comparison, ordering and hashing ignore ASCII case, matching how
/// NuGet treats ids; the original spelling is kept for display and manifest lookups.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PackageId(String);

impl PackageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn to_lowercase(&self) -> String {
        self.0.to_ascii_lowercase()
    }

    pub fn matches(&self, other: &str) -> bool {
        self.0.eq_ignore_ascii_case(other)
    }
}

impl PartialEq for PackageId {
    fn eq(&self, other: &Self) -> bool {
        self.matches(&other.0)
    }
}

impl Eq for PackageId {}

impl Hash for PackageId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for byte in self.0.bytes() {
            state.write_u8(byte.to_ascii_lowercase());
        }
        state.write_u8(0xff);
    }
}

impl PartialOrd for PackageId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PackageId {
    fn cmp(&self, other: &Self) -> Ordering {
        let lhs = self.0.bytes().map(|b| b.to_ascii_lowercase());
        let rhs = other.0.bytes().map(|b| b.to_ascii_lowercase());
        lhs.cmp(rhs)
    }
}

impl fmt::Display for PackageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PackageId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// One published version of a package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub id: PackageId,
    pub version: SemanticVersion,
    pub published: Timestamp,
    /// Delisted versions stay resolvable on the registry but are never update targets.
    pub listed: bool,
}

impl CatalogEntry {
    pub fn new(
        id: impl Into<PackageId>,
        version: SemanticVersion,
        published: Timestamp,
        listed: bool,
    ) -> Self {
        Self {
            id: id.into(),
            version,
            published,
            listed,
        }
    }
}

/// Typed, cleaned view of registry results: per package, entries ordered by version
/// ascending (then by publish time) with duplicate versions collapsed to the newest record.
#[derive(Debug, Clone, Default)]
pub struct VersionCatalog {
    packages: BTreeMap<PackageId, Vec<CatalogEntry>>,
}

impl VersionCatalog {
    pub fn insert(&mut self, entry: CatalogEntry) {
        let versions = self.packages.entry(entry.id.clone()).or_default();
        let position = versions.binary_search_by(|existing| existing.version.cmp(&entry.version));
        match position {
            Ok(index) => {
                if entry.published > versions[index].published {
                    versions[index] = entry;
                }
            }
            Err(index) => versions.insert(index, entry),
        }
    }

    /// Register a package known to the registry even if it has no usable versions.
    pub fn insert_package(&mut self, id: PackageId, entries: Vec<CatalogEntry>) {
        self.packages.entry(id).or_default();
        for entry in entries {
            self.insert(entry);
        }
    }

    pub fn entries(&self, id: &PackageId) -> &[CatalogEntry] {
        self.packages.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn contains(&self, id: &PackageId) -> bool {
        self.packages.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }
}

impl FromIterator<CatalogEntry> for VersionCatalog {
    fn from_iter<I: IntoIterator<Item = CatalogEntry>>(entries: I) -> Self {
        let mut catalog = Self::default();
        for entry in entries {
            catalog.insert(entry);
        }
        catalog
    }
}

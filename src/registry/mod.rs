use crate::error::Result;
use crate::nuget::{CatalogEntry, PackageId};

pub mod factory;
pub mod fetch;

pub use factory::RegistryFactory;
pub use fetch::{FetchOptions, FetchOutcome, FetchResult, fetch_catalog};

/// Source of published package versions.
///
/// Implementations must be shareable across the fetch thread pool; each call covers one
/// package and has no state shared with calls for other packages.
pub trait RegistryClient: Send + Sync {
    /// Every published version of `id`, or `None` when the registry does not know it.
    fn fetch_versions(&self, id: &PackageId) -> Result<Option<Vec<CatalogEntry>>>;
}

pub mod catalog;
pub mod registry;
pub mod version;

pub use catalog::{CatalogEntry, PackageId, VersionCatalog};
pub use registry::NugetRegistry;
pub use version::SemanticVersion;

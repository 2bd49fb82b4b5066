pub mod manifest_document;
pub mod project_scanner;
pub mod version_control;

pub mod update;
pub use update::UpdateReport;

pub use manifest_document::ManifestDocument;
pub use project_scanner::ProjectScannerAgent;
pub use version_control::VersionControlAgent;

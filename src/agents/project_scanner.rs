use crate::error::{NugradeError, Result};
use crate::utils::path_validator::PathValidator;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const MANIFEST_EXTENSIONS: &[&str] = &["csproj", "fsproj", "vbproj"];
const SKIPPED_DIRECTORIES: &[&str] = &["bin", "obj", "node_modules", "packages"];

/// ProjectScannerAgent validates the project root and finds its MSBuild project files
pub struct ProjectScannerAgent {
    project_path: PathBuf,
}

impl ProjectScannerAgent {
    pub fn new<P: AsRef<Path>>(project_path: P) -> Self {
        Self {
            project_path: project_path.as_ref().to_path_buf(),
        }
    }

    /// Validates the project structure
    pub fn validate(&self) -> Result<ProjectInfo> {
        let project_path = PathValidator::validate_project_path(&self.project_path)?;

        let mut manifests = Vec::new();
        collect_manifests(&project_path, &project_path, &mut manifests)?;
        manifests.sort();

        let git_dir = project_path.join(".git");
        let has_git = git_dir.exists() && git_dir.is_dir();

        debug!(
            root = %project_path.display(),
            manifests = manifests.len(),
            has_git,
            "Scanned project"
        );

        Ok(ProjectInfo {
            project_path,
            manifests,
            has_git,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ProjectInfo {
    pub project_path: PathBuf,
    /// Manifest paths relative to the project root, `/`-separated and sorted.
    pub manifests: Vec<String>,
    pub has_git: bool,
}

pub fn is_manifest_path(path: &str) -> bool {
    Path::new(path)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            MANIFEST_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
}

fn collect_manifests(root: &Path, dir: &Path, found: &mut Vec<String>) -> Result<()> {
    let entries = fs::read_dir(dir).map_err(|e| {
        NugradeError::ProjectValidation(format!("Failed to read '{}': {e}", dir.display()))
    })?;

    for entry in entries {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let path = entry.path();
        let name = entry.file_name();
        let name = name.to_string_lossy();

        if file_type.is_dir() {
            let skipped = name.starts_with('.')
                || SKIPPED_DIRECTORIES
                    .iter()
                    .any(|skip| name.eq_ignore_ascii_case(skip));
            if !skipped {
                collect_manifests(root, &path, found)?;
            }
        } else if file_type.is_file() && is_manifest_path(&name) {
            if let Ok(relative) = path.strip_prefix(root) {
                let relative: Vec<String> = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect();
                found.push(relative.join("/"));
            }
        }
    }

    Ok(())
}

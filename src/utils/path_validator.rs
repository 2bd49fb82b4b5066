use crate::error::{NugradeError, Result};
use std::path::{Component, Path, PathBuf};

/// Path checks for everything nugrade reads from or writes to on the local disk.
pub struct PathValidator;

impl PathValidator {
    /// Validates and canonicalises the directory being scanned.
    pub fn validate_project_path(path: impl AsRef<Path>) -> Result<PathBuf> {
        let path = path.as_ref();

        let canonical = path.canonicalize().map_err(|e| {
            NugradeError::ProjectValidation(format!("Invalid path '{}': {e}", path.display()))
        })?;

        if !canonical.is_dir() {
            return Err(NugradeError::ProjectValidation(format!(
                "Path '{}' is not a directory",
                canonical.display()
            )));
        }

        const FORBIDDEN: &[&str] = &["/etc", "/sys", "/proc", "/dev", "/boot"];

        for forbidden in FORBIDDEN {
            let forbidden_path = Path::new(forbidden);

            let inside = path.starts_with(forbidden_path)
                || canonical.starts_with(forbidden_path)
                || forbidden_path
                    .canonicalize()
                    .is_ok_and(|resolved| canonical.starts_with(resolved));

            if inside {
                return Err(NugradeError::ProjectValidation(format!(
                    "Access to system directory '{}' is not allowed",
                    forbidden
                )));
            }
        }

        Ok(canonical)
    }

    /// Resolves a manifest path relative to `base_dir`, refusing anything that could escape it.
    ///
    /// The target must already exist: change sets only ever rewrite files that were scanned.
    pub fn resolve_manifest_path(relative: &str, base_dir: impl AsRef<Path>) -> Result<PathBuf> {
        let relative_path = Path::new(relative);
        let escapes = relative_path.components().any(|component| {
            matches!(
                component,
                Component::ParentDir | Component::RootDir | Component::Prefix(_)
            )
        });

        if relative.is_empty() || escapes {
            return Err(NugradeError::ProjectValidation(format!(
                "Manifest path '{relative}' must stay inside the project"
            )));
        }

        Self::validate_file_path(base_dir.as_ref().join(relative_path), base_dir)
    }

    /// Ensures the file path resides inside the provided base directory.
    pub fn validate_file_path(
        file_path: impl AsRef<Path>,
        base_dir: impl AsRef<Path>,
    ) -> Result<PathBuf> {
        let file_path = file_path.as_ref();
        let base_dir = base_dir.as_ref();

        let canonical_file = file_path.canonicalize().map_err(|e| {
            NugradeError::ProjectValidation(format!(
                "Invalid file path '{}': {e}",
                file_path.display()
            ))
        })?;

        let canonical_base = base_dir.canonicalize().map_err(|e| {
            NugradeError::ProjectValidation(format!(
                "Invalid base directory '{}': {e}",
                base_dir.display()
            ))
        })?;

        if !canonical_file.starts_with(&canonical_base) {
            return Err(NugradeError::ProjectValidation(
                "File path is outside the allowed directory".to_string(),
            ));
        }

        Ok(canonical_file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn validate_project_path_accepts_directory() {
        let dir = tempdir().unwrap();
        assert!(PathValidator::validate_project_path(dir.path()).is_ok());
    }

    #[test]
    fn validate_project_path_rejects_file() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("App.csproj");
        fs::write(&file_path, "<Project />").unwrap();
        let err = PathValidator::validate_project_path(&file_path).unwrap_err();
        assert!(matches!(err, NugradeError::ProjectValidation(_)));
    }

    #[test]
    fn validate_project_path_rejects_system_directory() {
        assert!(PathValidator::validate_project_path("/etc").is_err());
    }

    #[test]
    fn validate_file_path_rejects_traversal() {
        let dir = tempdir().unwrap();
        let outside = Path::new("/tmp");
        assert!(PathValidator::validate_file_path(outside, dir.path()).is_err());
    }

    #[test]
    fn resolves_nested_manifest() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("src/Api")).unwrap();
        fs::write(dir.path().join("src/Api/Api.csproj"), "<Project />").unwrap();

        let resolved = PathValidator::resolve_manifest_path("src/Api/Api.csproj", dir.path()).unwrap();
        assert!(resolved.ends_with("src/Api/Api.csproj"));
    }

    #[test]
    fn rejects_escaping_manifest_paths() {
        let dir = tempdir().unwrap();
        for relative in ["../Other.csproj", "/etc/passwd", ""] {
            assert!(
                PathValidator::resolve_manifest_path(relative, dir.path()).is_err(),
                "{relative:?}"
            );
        }
    }
}

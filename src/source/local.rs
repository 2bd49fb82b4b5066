use crate::agents::project_scanner::ProjectInfo;
use crate::agents::update::{ChangeSet, SubmissionOutcome};
use crate::agents::VersionControlAgent;
use crate::error::Result;
use crate::source::{ManifestLoad, RepositorySource};
use crate::utils::path_validator::PathValidator;
use std::fs;
use std::path::PathBuf;
use tracing::debug;

/// Manifests on the local disk. With git, each change set becomes a local branch with one
/// commit; without it, change sets are written straight to the working tree.
pub struct LocalSource {
    root: PathBuf,
    manifests: Vec<String>,
    git: Option<VersionControlAgent>,
}

impl LocalSource {
    pub fn new(info: &ProjectInfo, git: Option<VersionControlAgent>) -> Self {
        Self {
            root: info.project_path.clone(),
            manifests: info.manifests.clone(),
            git,
        }
    }

    fn write_working_tree(&self, change_set: &ChangeSet) -> Result<SubmissionOutcome> {
        if change_set.is_empty() {
            return Ok(SubmissionOutcome::NoChanges);
        }

        for change in &change_set.changes {
            let target = PathValidator::resolve_manifest_path(&change.file_path, &self.root)?;
            fs::write(&target, change.contents.as_bytes())?;
            debug!(path = %change.file_path, "Wrote manifest");
        }

        Ok(SubmissionOutcome::Submitted(format!(
            "{} file(s) in working tree",
            change_set.changes.len()
        )))
    }
}

impl RepositorySource for LocalSource {
    fn describe(&self) -> String {
        self.root.display().to_string()
    }

    fn load_manifests(&self) -> Result<ManifestLoad> {
        let mut load = ManifestLoad::default();
        for relative in &self.manifests {
            let raw = fs::read(self.root.join(relative))?;
            load.add(relative, raw, true);
        }
        Ok(load)
    }

    fn submit(&self, change_set: &ChangeSet) -> Result<SubmissionOutcome> {
        match &self.git {
            Some(git) => git.commit_change_set(change_set),
            None => self.write_working_tree(change_set),
        }
    }
}

use crate::agents::update::{ChangeSet, SubmissionOutcome};
use crate::error::{NugradeError, Result};
use crate::utils::path_validator::PathValidator;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tracing::{debug, info, warn};

/// VersionControlAgent commits change sets to local branches with hardened input validation.
pub struct VersionControlAgent {
    project_path: PathBuf,
}

impl VersionControlAgent {
    pub fn new<P: AsRef<Path>>(project_path: P) -> Result<Self> {
        let project_path = Self::validate_git_path(project_path.as_ref())?;
        Ok(Self { project_path })
    }

    /// Check if the working directory is clean
    pub fn is_working_directory_clean(&self) -> Result<bool> {
        let output = self.run_git(&["status", "--porcelain"])?;
        Self::ensure_success(&output, "git status")?;
        Ok(output.stdout.is_empty())
    }

    /// Branch HEAD points at, or `None` when HEAD is detached.
    pub fn current_branch(&self) -> Result<Option<String>> {
        let output = self.run_git(&["symbolic-ref", "-q", "--short", "HEAD"])?;
        if !output.status.success() {
            return Ok(None);
        }
        Ok(Some(String::from_utf8_lossy(&output.stdout).trim().to_string()))
    }

    pub fn head_commit(&self) -> Result<String> {
        let output = self.run_git(&["rev-parse", "--verify", "HEAD"])?;
        Self::ensure_success(&output, "git rev-parse")?;
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    pub fn branch_exists(&self, branch: &str) -> Result<bool> {
        let reference = format!("refs/heads/{}", Self::validate_branch_name(branch)?);
        let output = self.run_git(&["rev-parse", "--verify", "--quiet", &reference])?;
        Ok(output.status.success())
    }

    /// Commit one change set on its own branch forked from the current HEAD commit, then
    /// return HEAD to where it was, detached or not.
    ///
    /// A failed commit leaves neither the branch nor any written file behind.
    pub fn commit_change_set(&self, change_set: &ChangeSet) -> Result<SubmissionOutcome> {
        if change_set.is_empty() {
            return Ok(SubmissionOutcome::NoChanges);
        }

        let branch = Self::validate_branch_name(change_set.short_branch_name())?;
        if self.branch_exists(branch)? {
            info!(branch, "Branch already exists; skipping");
            return Ok(SubmissionOutcome::BranchExists);
        }

        let original = self.current_branch()?;
        let base = self.head_commit()?;
        let output = self.run_git(&["checkout", "-b", branch, &base])?;
        Self::ensure_success(&output, "git checkout -b")?;

        let committed = self.write_and_commit(change_set);
        if committed.is_err() {
            let output = self.run_git(&["reset", "--hard", &base])?;
            Self::ensure_success(&output, "git reset --hard")?;
        }

        self.restore_head(original.as_deref(), &base)?;

        if let Err(e) = committed {
            warn!(branch, error = %e, "Commit failed; removing branch");
            let output = self.run_git(&["branch", "-D", branch])?;
            Self::ensure_success(&output, "git branch -D")?;
            return Err(e);
        }

        Ok(SubmissionOutcome::Submitted(branch.to_string()))
    }

    fn restore_head(&self, original: Option<&str>, base: &str) -> Result<()> {
        let output = match original {
            Some(branch) => self.run_git(&["checkout", branch])?,
            None => self.run_git(&["checkout", "--detach", base])?,
        };
        Self::ensure_success(&output, "git checkout")
    }

    fn write_and_commit(&self, change_set: &ChangeSet) -> Result<()> {
        for change in &change_set.changes {
            let target = PathValidator::resolve_manifest_path(&change.file_path, &self.project_path)
                .map_err(|err| {
                    NugradeError::GitOperation(format!("Refusing to write unsafe path: {err}"))
                })?;
            fs::write(&target, change.contents.as_bytes())?;
            debug!(path = %change.file_path, "Wrote manifest");

            let output = self.run_git(&["add", "--", &change.file_path])?;
            Self::ensure_success(&output, "git add")?;
        }

        let output = self.run_git(&["commit", "-m", &change_set.message])?;
        Self::ensure_success(&output, "git commit")
    }

    fn run_git(&self, args: &[&str]) -> Result<Output> {
        Command::new("git")
            .current_dir(&self.project_path)
            .args(args)
            .output()
            .map_err(|e| {
                NugradeError::GitOperation(format!(
                    "Failed to execute git command '{}': {e}",
                    args.join(" ")
                ))
            })
    }

    fn ensure_success(output: &Output, command: &str) -> Result<()> {
        if output.status.success() {
            return Ok(());
        }

        Err(NugradeError::GitOperation(format!(
            "{} failed: {}",
            command,
            String::from_utf8_lossy(&output.stderr)
        )))
    }

    fn validate_git_path(path: &Path) -> Result<PathBuf> {
        let dangerous = [';', '|', '&', '$', '`', '\n', '\r'];
        let path_str = path.to_string_lossy();
        if let Some(ch) = dangerous.iter().find(|c| path_str.contains(**c)) {
            return Err(NugradeError::GitOperation(format!(
                "Path contains dangerous character: '{}'",
                ch
            )));
        }

        if !path.is_absolute() {
            return Err(NugradeError::GitOperation(
                "Only absolute paths are allowed for Git operations".to_string(),
            ));
        }

        PathValidator::validate_project_path(path)
            .map_err(|err| NugradeError::GitOperation(format!("Invalid Git path: {}", err)))
    }

    fn validate_branch_name(branch: &str) -> Result<&str> {
        let valid = !branch.is_empty()
            && !branch.starts_with('-')
            && !branch.contains("..")
            && branch
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '/' | '.'));

        if valid {
            Ok(branch)
        } else {
            Err(NugradeError::GitOperation(format!(
                "Unsafe branch name: '{branch}'"
            )))
        }
    }
}

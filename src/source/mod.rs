use crate::agents::ManifestDocument;
use crate::agents::update::{ChangeSet, SubmissionOutcome};
use crate::error::Result;
use tracing::warn;

pub mod github;
pub mod local;

pub use github::GithubSource;
pub use local::LocalSource;

/// A place manifests come from and change sets go to.
pub trait RepositorySource {
    /// Human-readable identity for narration, e.g. a directory or `owner/repo`.
    fn describe(&self) -> String;

    fn load_manifests(&self) -> Result<ManifestLoad>;

    /// Turn one change set into a commit or review request.
    ///
    /// Per-set failures are returned as `Err` and recorded by the caller; they never stop
    /// the remaining sets from being attempted.
    fn submit(&self, change_set: &ChangeSet) -> Result<SubmissionOutcome>;
}

/// Parsed manifests plus the files that could not be parsed.
#[derive(Debug, Default)]
pub struct ManifestLoad {
    pub documents: Vec<ManifestDocument>,
    pub failures: Vec<(String, String)>,
}

impl ManifestLoad {
    /// Parse one file; a parse failure is recorded and only skips that file.
    pub fn add(&mut self, path: &str, raw: Vec<u8>, preserve_bom: bool) {
        match ManifestDocument::parse(path, raw, preserve_bom) {
            Ok(document) => self.documents.push(document),
            Err(e) => {
                warn!(path, error = %e, "Skipping unparsable manifest");
                self.failures.push((path.to_string(), e.to_string()));
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_failures_only_skip_their_file() {
        let mut load = ManifestLoad::default();
        load.add(
            "good.csproj",
            br#"<Project><ItemGroup><PackageReference Include="A" Version="1.0.0" /></ItemGroup></Project>"#.to_vec(),
            true,
        );
        load.add("bad.csproj", b"<Project><ItemGroup></Project>".to_vec(), true);

        assert_eq!(load.documents.len(), 1);
        assert_eq!(load.documents[0].path(), "good.csproj");
        assert_eq!(load.failures.len(), 1);
        assert_eq!(load.failures[0].0, "bad.csproj");
    }
}

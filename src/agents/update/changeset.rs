use crate::agents::manifest_document::ManifestDocument;
use crate::agents::update::file_grouping::FileGrouping;
use crate::agents::update::policy::UpdateCandidate;
use crate::nuget::SemanticVersion;
use std::collections::BTreeMap;
use tracing::debug;

pub const DEFAULT_BRANCH_PREFIX: &str = "refs/heads/auto-nuget-update/";
const BRANCH_REF_PREFIX: &str = "refs/heads/";

/// Full replacement contents for one manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    pub file_path: String,
    pub contents: String,
}

/// One proposed update unit: a branch, a message and the files it rewrites.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeSet {
    pub group: String,
    pub file_group: Option<String>,
    pub branch_name: String,
    pub message: String,
    pub candidates: Vec<UpdateCandidate>,
    pub changes: Vec<Change>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Branch name without the `refs/heads/` qualifier.
    pub fn short_branch_name(&self) -> &str {
        self.branch_name
            .strip_prefix(BRANCH_REF_PREFIX)
            .unwrap_or(&self.branch_name)
    }

    pub fn title(&self) -> &str {
        self.message
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .unwrap_or_default()
    }

    pub fn body(&self) -> String {
        let mut lines = self.message.lines().skip_while(|line| line.trim().is_empty());
        lines.next();
        lines
            .skip_while(|line| line.trim().is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Turns grouped candidates into change sets by editing manifests one group at a time.
#[derive(Debug, Clone)]
pub struct ChangeSetBuilder {
    branch_prefix: String,
    file_grouping: FileGrouping,
}

impl Default for ChangeSetBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_BRANCH_PREFIX)
    }
}

impl ChangeSetBuilder {
    pub fn new(branch_prefix: &str) -> Self {
        Self {
            branch_prefix: branch_prefix.to_string(),
            file_grouping: FileGrouping::default(),
        }
    }

    pub fn with_file_grouping(mut self, file_grouping: FileGrouping) -> Self {
        self.file_grouping = file_grouping;
        self
    }

    /// Build one change set per group (and per file group when file grouping is configured).
    ///
    /// Every manifest is reset after each group, so a file touched by several groups is
    /// edited from its original contents each time.
    pub fn build(
        &self,
        groups: &BTreeMap<String, Vec<UpdateCandidate>>,
        manifests: &mut [ManifestDocument],
    ) -> Vec<ChangeSet> {
        manifests.sort_by(|a, b| a.path().cmp(b.path()));

        let mut change_sets = Vec::new();

        for (group, candidates) in groups {
            if self.file_grouping.is_empty() {
                let all: Vec<usize> = (0..manifests.len()).collect();
                change_sets.push(self.build_scope(group, None, candidates, manifests, &all));
                continue;
            }

            for (file_group, members) in self.scopes(manifests) {
                let declares_any = members.iter().any(|&index| {
                    let references = manifests[index].references();
                    candidates
                        .iter()
                        .any(|candidate| references.contains_key(&candidate.package))
                });
                if !declares_any {
                    continue;
                }

                change_sets.push(self.build_scope(
                    group,
                    file_group.as_deref(),
                    candidates,
                    manifests,
                    &members,
                ));
            }
        }

        change_sets
    }

    fn scopes(&self, manifests: &[ManifestDocument]) -> BTreeMap<Option<String>, Vec<usize>> {
        let mut scopes: BTreeMap<Option<String>, Vec<usize>> = BTreeMap::new();
        for (index, manifest) in manifests.iter().enumerate() {
            scopes
                .entry(self.file_grouping.resolve(manifest.path()))
                .or_default()
                .push(index);
        }
        scopes
    }

    fn build_scope(
        &self,
        group: &str,
        file_group: Option<&str>,
        candidates: &[UpdateCandidate],
        manifests: &mut [ManifestDocument],
        members: &[usize],
    ) -> ChangeSet {
        for candidate in candidates {
            let target = candidate.to.to_string();

            for &index in members {
                let manifest = &mut manifests[index];
                if !declares_version(manifest, candidate) {
                    continue;
                }
                if !manifest.update(&candidate.package, &target) {
                    debug!(
                        path = manifest.path(),
                        package = %candidate.package,
                        "Manifest update missed"
                    );
                }
            }
        }

        let mut changes = Vec::new();
        for &index in members {
            if let Some(change) = manifests[index].change_if_dirty() {
                changes.push(change);
            }
        }

        for &index in members {
            manifests[index].reset();
        }

        ChangeSet {
            group: group.to_string(),
            file_group: file_group.map(str::to_string),
            branch_name: self.branch_name(group, file_group),
            message: compose_message(group, file_group, candidates),
            candidates: candidates.to_vec(),
            changes,
        }
    }

    fn branch_name(&self, group: &str, file_group: Option<&str>) -> String {
        match file_group {
            Some(file_group) => format!(
                "{}{}/{}",
                self.branch_prefix,
                slugify(file_group),
                slugify(group)
            ),
            None => format!("{}{}", self.branch_prefix, slugify(group)),
        }
    }
}

/// Only manifests still on the candidate's starting version are edited, so a file that is
/// already ahead is never moved backwards.
fn declares_version(manifest: &ManifestDocument, candidate: &UpdateCandidate) -> bool {
    manifest
        .references()
        .get(&candidate.package)
        .and_then(|raw| SemanticVersion::parse(raw).ok())
        .is_some_and(|declared| declared == candidate.from)
}

fn compose_message(group: &str, file_group: Option<&str>, candidates: &[UpdateCandidate]) -> String {
    let mut lines: Vec<String> = Vec::new();
    for candidate in candidates {
        let line = format!(
            "Updates package '{}' to version '{}'",
            candidate.package, candidate.to
        );
        if !lines.contains(&line) {
            lines.push(line);
        }
    }

    if lines.len() == 1 {
        return lines.remove(0);
    }

    let header = match file_group {
        Some(file_group) => {
            format!("Auto-update for packages related to '{group}' in '{file_group}'")
        }
        None => format!("Auto-update for packages related to '{group}'"),
    };

    format!("{header}\n\n{}", lines.join("\n"))
}

fn slugify(name: &str) -> String {
    name.to_lowercase()
        .chars()
        .map(|c| match c {
            'a'..='z' | '0'..='9' | '.' | '_' | '/' | '-' => c,
            _ => '-',
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::update::file_grouping::FileGroupRule;
    use crate::nuget::PackageId;

    fn manifest(path: &str, references: &[(&str, &str)]) -> ManifestDocument {
        let items: String = references
            .iter()
            .map(|(id, version)| {
                format!("    <PackageReference Include=\"{id}\" Version=\"{version}\" />\n")
            })
            .collect();
        let xml = format!("<Project Sdk=\"Microsoft.NET.Sdk\">\n  <ItemGroup>\n{items}  </ItemGroup>\n</Project>\n");
        ManifestDocument::parse(path, xml.into_bytes(), false).unwrap()
    }

    fn candidate(id: &str, from: &str, to: &str) -> UpdateCandidate {
        UpdateCandidate {
            package: PackageId::new(id),
            from: SemanticVersion::parse(from).unwrap(),
            to: SemanticVersion::parse(to).unwrap(),
        }
    }

    fn groups(entries: Vec<(&str, Vec<UpdateCandidate>)>) -> BTreeMap<String, Vec<UpdateCandidate>> {
        entries
            .into_iter()
            .map(|(name, candidates)| (name.to_string(), candidates))
            .collect()
    }

    #[test]
    fn singleton_group_has_single_line_message() {
        let mut manifests = vec![manifest("src/App.csproj", &[("Polly", "8.0.0")])];
        let grouped = groups(vec![("Polly", vec![candidate("Polly", "8.0.0", "8.4.1")])]);

        let sets = ChangeSetBuilder::default().build(&grouped, &mut manifests);

        assert_eq!(sets.len(), 1);
        assert_eq!(sets[0].message, "Updates package 'Polly' to version '8.4.1'");
        assert_eq!(sets[0].title(), sets[0].message);
        assert!(sets[0].body().is_empty());
        assert_eq!(sets[0].branch_name, "refs/heads/auto-nuget-update/polly");
        assert_eq!(sets[0].short_branch_name(), "auto-nuget-update/polly");
        assert_eq!(sets[0].changes.len(), 1);
        assert!(sets[0].changes[0].contents.contains(r#"Version="8.4.1""#));
    }

    #[test]
    fn multi_candidate_group_has_header() {
        let mut manifests = vec![manifest(
            "src/App.csproj",
            &[("Serilog", "3.0.0"), ("Serilog.Sinks.Console", "4.0.0")],
        )];
        let grouped = groups(vec![(
            "Serilog",
            vec![
                candidate("Serilog", "3.0.0", "3.1.1"),
                candidate("Serilog.Sinks.Console", "4.0.0", "4.1.0"),
            ],
        )]);

        let sets = ChangeSetBuilder::default().build(&grouped, &mut manifests);

        assert_eq!(
            sets[0].message,
            "Auto-update for packages related to 'Serilog'\n\n\
             Updates package 'Serilog' to version '3.1.1'\n\
             Updates package 'Serilog.Sinks.Console' to version '4.1.0'"
        );
        assert_eq!(sets[0].title(), "Auto-update for packages related to 'Serilog'");
        assert_eq!(
            sets[0].body(),
            "Updates package 'Serilog' to version '3.1.1'\nUpdates package 'Serilog.Sinks.Console' to version '4.1.0'"
        );
        assert_eq!(sets[0].changes.len(), 1);
    }

    #[test]
    fn manifests_are_reset_between_groups() {
        let mut manifests = vec![manifest(
            "src/App.csproj",
            &[("Dapper", "2.0.0"), ("Polly", "8.0.0")],
        )];
        let grouped = groups(vec![
            ("Dapper", vec![candidate("Dapper", "2.0.0", "2.1.0")]),
            ("Polly", vec![candidate("Polly", "8.0.0", "8.4.1")]),
        ]);

        let sets = ChangeSetBuilder::default().build(&grouped, &mut manifests);

        let dapper = &sets[0].changes[0].contents;
        assert!(dapper.contains(r#"Include="Dapper" Version="2.1.0""#));
        assert!(dapper.contains(r#"Include="Polly" Version="8.0.0""#));

        let polly = &sets[1].changes[0].contents;
        assert!(polly.contains(r#"Include="Dapper" Version="2.0.0""#));
        assert!(polly.contains(r#"Include="Polly" Version="8.4.1""#));

        assert!(manifests[0].change_if_dirty().is_none());
    }

    #[test]
    fn changes_cover_every_declaring_manifest_in_path_order() {
        let mut manifests = vec![
            manifest("tests/App.Tests.csproj", &[("Polly", "8.0.0")]),
            manifest("src/Other.csproj", &[("Dapper", "2.0.0")]),
            manifest("src/App.csproj", &[("Polly", "8.0.0")]),
        ];
        let grouped = groups(vec![("Polly", vec![candidate("Polly", "8.0.0", "8.4.1")])]);

        let sets = ChangeSetBuilder::default().build(&grouped, &mut manifests);

        let paths: Vec<&str> = sets[0].changes.iter().map(|c| c.file_path.as_str()).collect();
        assert_eq!(paths, vec!["src/App.csproj", "tests/App.Tests.csproj"]);
    }

    #[test]
    fn manifest_on_a_different_version_is_left_alone() {
        let mut manifests = vec![
            manifest("a.csproj", &[("Polly", "8.0.0")]),
            manifest("b.csproj", &[("Polly", "9.0.0")]),
        ];
        let grouped = groups(vec![("Polly", vec![candidate("Polly", "8.0.0", "8.4.1")])]);

        let sets = ChangeSetBuilder::default().build(&grouped, &mut manifests);

        assert_eq!(sets[0].changes.len(), 1);
        assert_eq!(sets[0].changes[0].file_path, "a.csproj");
    }

    #[test]
    fn group_without_effective_edits_yields_empty_set() {
        let mut manifests = vec![manifest("a.csproj", &[("Polly", "8.4.1")])];
        let grouped = groups(vec![("Polly", vec![candidate("Polly", "8.0.0", "8.4.1")])]);

        let sets = ChangeSetBuilder::default().build(&grouped, &mut manifests);

        assert_eq!(sets.len(), 1);
        assert!(sets[0].is_empty());
    }

    #[test]
    fn branch_names_are_slugged() {
        let builder = ChangeSetBuilder::new("refs/heads/deps/");
        assert_eq!(
            builder.branch_name("Microsoft.AspNetCore", None),
            "refs/heads/deps/microsoft.aspnetcore"
        );
        assert_eq!(
            builder.branch_name("Hl7.Fhir-5.0.0 rc", Some("Billing Service")),
            "refs/heads/deps/billing-service/hl7.fhir-5.0.0-rc"
        );
    }

    #[test]
    fn file_groups_split_change_sets() {
        let mut manifests = vec![
            manifest("src/Api/Api.csproj", &[("Polly", "8.0.0")]),
            manifest("src/Worker/Worker.csproj", &[("Polly", "8.0.0")]),
            manifest("tools/Build.csproj", &[("Dapper", "2.0.0")]),
        ];
        let grouped = groups(vec![("Polly", vec![candidate("Polly", "8.0.0", "8.4.1")])]);
        let builder = ChangeSetBuilder::default().with_file_grouping(FileGrouping::new(vec![
            FileGroupRule::path_regex(r"^src/([^/]+)/").unwrap(),
        ]));

        let sets = builder.build(&grouped, &mut manifests);

        assert_eq!(sets.len(), 2);
        assert_eq!(sets[0].file_group.as_deref(), Some("Api"));
        assert_eq!(sets[0].branch_name, "refs/heads/auto-nuget-update/api/polly");
        assert_eq!(sets[0].changes.len(), 1);
        assert_eq!(sets[0].changes[0].file_path, "src/Api/Api.csproj");
        assert_eq!(sets[1].file_group.as_deref(), Some("Worker"));
        assert_eq!(sets[1].changes[0].file_path, "src/Worker/Worker.csproj");
    }

    #[test]
    fn file_group_header_names_the_scope() {
        let message = compose_message(
            "Serilog",
            Some("Api"),
            &[
                candidate("Serilog", "3.0.0", "3.1.1"),
                candidate("Serilog.Sinks.File", "5.0.0", "5.0.1"),
            ],
        );
        assert!(message.starts_with("Auto-update for packages related to 'Serilog' in 'Api'\n\n"));
    }

    #[test]
    fn duplicate_targets_share_one_message_line() {
        let message = compose_message(
            "Polly",
            None,
            &[
                candidate("Polly", "7.0.0", "8.4.1"),
                candidate("Polly", "8.0.0", "8.4.1"),
            ],
        );
        assert_eq!(message, "Updates package 'Polly' to version '8.4.1'");
    }
}

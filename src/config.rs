//! `nugrade.toml` loading and validation.

use crate::agents::update::changeset::DEFAULT_BRANCH_PREFIX;
use crate::agents::update::policy::DEFAULT_COOLDOWN_DAYS;
use crate::agents::update::{
    FileGroupRule, FileGrouping, GroupingChain, GroupingRule, PrereleaseAllowance, UpdatePolicy,
};
use crate::error::{NugradeError, Result};
use crate::nuget::NugetRegistry;
use crate::nuget::registry::DEFAULT_REGISTRATION_BASE;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

pub const CONFIG_FILE_NAME: &str = "nugrade.toml";

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub cooldown_days: u32,
    /// Package ids allowed to move to prereleases; `"*"` allows all.
    pub allow_prerelease: Vec<String>,
    pub pr_limit: Option<usize>,
    pub branch_prefix: String,
    pub fetch_concurrency: usize,
    pub fetch_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub registry_url: String,
    pub reviewers: Vec<String>,
    /// Ordered grouping rules; absent means the built-in chain.
    pub groups: Option<Vec<GroupingRule>>,
    pub file_groups: Vec<FileGroupConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cooldown_days: DEFAULT_COOLDOWN_DAYS,
            allow_prerelease: Vec::new(),
            pr_limit: None,
            branch_prefix: DEFAULT_BRANCH_PREFIX.to_string(),
            fetch_concurrency: 8,
            fetch_timeout_secs: 300,
            request_timeout_secs: 30,
            registry_url: DEFAULT_REGISTRATION_BASE.to_string(),
            reviewers: Vec::new(),
            groups: None,
            file_groups: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum FileGroupConfig {
    PathContains { name: String, fragment: String },
    PathRegex { pattern: String },
}

/// Command-line values that take precedence over the file.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub cooldown_days: Option<u32>,
    pub allow_prerelease: Vec<String>,
    pub pr_limit: Option<usize>,
}

impl Config {
    /// Load `explicit` if given, else `nugrade.toml` in the project root, else defaults.
    pub fn load(project_root: &Path, explicit: Option<&Path>) -> Result<Self> {
        let path: PathBuf = match explicit {
            Some(path) => path.to_path_buf(),
            None => {
                let candidate = project_root.join(CONFIG_FILE_NAME);
                if !candidate.exists() {
                    debug!(path = %candidate.display(), "No config file; using defaults");
                    return Ok(Self::default());
                }
                candidate
            }
        };

        let contents = fs::read_to_string(&path).map_err(|e| {
            NugradeError::Config(format!("Failed to read {}: {e}", path.display()))
        })?;
        let config = Self::parse(&contents)
            .map_err(|e| NugradeError::Config(format!("{}: {e}", path.display())))?;
        debug!(path = %path.display(), "Loaded config");
        Ok(config)
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply(&mut self, overrides: ConfigOverrides) {
        if let Some(days) = overrides.cooldown_days {
            self.cooldown_days = days;
        }
        if !overrides.allow_prerelease.is_empty() {
            self.allow_prerelease = overrides.allow_prerelease;
        }
        if overrides.pr_limit.is_some() {
            self.pr_limit = overrides.pr_limit;
        }
    }

    pub fn validate(&self) -> Result<()> {
        NugetRegistry::validate_registry_url(&self.registry_url)?;

        if self.fetch_concurrency == 0 {
            return Err(NugradeError::Config(
                "fetch_concurrency must be at least 1".to_string(),
            ));
        }

        if let Some(position) = self.grouping_chain().misplaced_catch_all() {
            return Err(NugradeError::Config(format!(
                "Grouping rule {} is a unique rule; it must be the last rule",
                position + 1
            )));
        }

        self.file_grouping().map(|_| ())
    }

    pub fn policy(&self) -> UpdatePolicy {
        UpdatePolicy::new(
            self.cooldown_days,
            PrereleaseAllowance::from_list(&self.allow_prerelease),
        )
    }

    pub fn grouping_chain(&self) -> GroupingChain {
        match &self.groups {
            Some(rules) => GroupingChain::new(rules.clone()),
            None => GroupingChain::default(),
        }
    }

    pub fn file_grouping(&self) -> Result<FileGrouping> {
        let rules = self
            .file_groups
            .iter()
            .map(|group| match group {
                FileGroupConfig::PathContains { name, fragment } => {
                    Ok(FileGroupRule::path_contains(name, fragment))
                }
                FileGroupConfig::PathRegex { pattern } => FileGroupRule::path_regex(pattern),
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(FileGrouping::new(rules))
    }

    pub fn fetch_deadline(&self) -> Option<Duration> {
        (self.fetch_timeout_secs > 0).then(|| Duration::from_secs(self.fetch_timeout_secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempdir().unwrap();
        let config = Config::load(dir.path(), None).unwrap();

        assert_eq!(config.cooldown_days, 21);
        assert_eq!(config.branch_prefix, "refs/heads/auto-nuget-update/");
        assert_eq!(config.fetch_concurrency, 8);
        assert_eq!(config.grouping_chain(), GroupingChain::default());
        assert!(config.file_grouping().unwrap().is_empty());
    }

    #[test]
    fn loads_file_from_project_root() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            r#"
cooldown_days = 7
allow_prerelease = ["Hl7.Fhir.R4"]
pr_limit = 3
reviewers = ["octocat"]

[[groups]]
kind = "prefix-version"
name = "Hl7.Fhir"
prefixes = ["Hl7.Fhir"]

[[groups]]
kind = "unique"
include_version = true

[[file_groups]]
kind = "path-contains"
name = "tests"
fragment = "/tests/"
"#,
        )
        .unwrap();

        let config = Config::load(dir.path(), None).unwrap();

        assert_eq!(config.cooldown_days, 7);
        assert_eq!(config.pr_limit, Some(3));
        assert_eq!(config.reviewers, vec!["octocat".to_string()]);
        assert_eq!(config.grouping_chain().rules().len(), 2);
        assert_eq!(
            config.file_groups,
            vec![FileGroupConfig::PathContains {
                name: "tests".into(),
                fragment: "/tests/".into()
            }]
        );
    }

    #[test]
    fn rejects_unknown_keys() {
        let err = Config::parse("cooldown = 3").unwrap_err();
        assert!(matches!(err, NugradeError::Toml(_)));
    }

    #[test]
    fn rejects_catch_all_before_other_rules() {
        let err = Config::parse(
            r#"
[[groups]]
kind = "unique"

[[groups]]
kind = "first-segment"
"#,
        )
        .unwrap_err();
        assert!(matches!(err, NugradeError::Config(_)));
    }

    #[test]
    fn rejects_bad_registry_and_regex() {
        assert!(Config::parse(r#"registry_url = "ftp://example.com/""#).is_err());
        assert!(Config::parse(r#"registry_url = "http://localhost:5000/v3""#).is_err());
        assert!(
            Config::parse(
                r#"
[[file_groups]]
kind = "path-regex"
pattern = "(unclosed"
"#
            )
            .is_err()
        );
        assert!(Config::parse("fetch_concurrency = 0").is_err());
    }

    #[test]
    fn overrides_take_precedence() {
        let mut config = Config::parse("cooldown_days = 7\npr_limit = 2").unwrap();
        config.apply(ConfigOverrides {
            cooldown_days: Some(0),
            allow_prerelease: vec!["*".into()],
            pr_limit: None,
        });

        assert_eq!(config.cooldown_days, 0);
        assert_eq!(config.allow_prerelease, vec!["*".to_string()]);
        assert_eq!(config.pr_limit, Some(2));
    }

    #[test]
    fn explicit_path_must_exist() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("elsewhere.toml");
        let err = Config::load(dir.path(), Some(missing.as_path())).unwrap_err();
        assert!(matches!(err, NugradeError::Config(_)));
    }
}

use crate::agents::update::policy::UpdateCandidate;
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::debug;

/// One link of the grouping chain.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum GroupingRule {
    /// `name` when the package id starts with any prefix (ordinal, case-sensitive).
    Prefix { name: String, prefixes: Vec<String> },
    /// Like `Prefix`, but one group per target version: `{name}-{version}`.
    PrefixVersion { name: String, prefixes: Vec<String> },
    /// First dot-separated segment of the id unless it is excluded.
    FirstSegment {
        #[serde(default)]
        exclude: Vec<String>,
    },
    /// Catch-all: every package is its own group.
    Unique {
        #[serde(default)]
        include_version: bool,
    },
}

impl GroupingRule {
    pub fn prefix<S: Into<String>>(name: &str, prefixes: impl IntoIterator<Item = S>) -> Self {
        GroupingRule::Prefix {
            name: name.to_string(),
            prefixes: prefixes.into_iter().map(Into::into).collect(),
        }
    }

    pub fn first_segment<S: Into<String>>(exclude: impl IntoIterator<Item = S>) -> Self {
        GroupingRule::FirstSegment {
            exclude: exclude.into_iter().map(Into::into).collect(),
        }
    }

    pub fn group_name(&self, candidate: &UpdateCandidate) -> Option<String> {
        let id = candidate.package.as_str();
        let name = match self {
            GroupingRule::Prefix { name, prefixes } => prefixes
                .iter()
                .any(|prefix| id.starts_with(prefix.as_str()))
                .then(|| name.clone()),
            GroupingRule::PrefixVersion { name, prefixes } => prefixes
                .iter()
                .any(|prefix| id.starts_with(prefix.as_str()))
                .then(|| format!("{}-{}", name, candidate.to)),
            GroupingRule::FirstSegment { exclude } => {
                let first = id.split('.').next().unwrap_or(id);
                (!exclude.iter().any(|excluded| excluded == first)).then(|| first.to_string())
            }
            GroupingRule::Unique { include_version } => Some(if *include_version {
                format!("{}-{}", id, candidate.to)
            } else {
                id.to_string()
            }),
        };

        name.filter(|n| !n.is_empty())
    }

    fn is_catch_all(&self) -> bool {
        matches!(self, GroupingRule::Unique { .. })
    }
}

/// Ordered rule list; the first rule yielding a name wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupingChain {
    rules: Vec<GroupingRule>,
}

impl Default for GroupingChain {
    fn default() -> Self {
        Self {
            rules: vec![
                GroupingRule::prefix(
                    "Microsoft.AspNetCore",
                    [
                        "Microsoft.AspNetCore",
                        "Microsoft.Extensions",
                        "Microsoft.ApplicationInsights",
                    ],
                ),
                GroupingRule::prefix(
                    "Microsoft.CodeAnalysis",
                    [
                        "Microsoft.CodeAnalysis",
                        "Microsoft.SourceLink",
                        "StyleCop.Analyzers",
                        "Microsoft.CodeCoverage",
                        "Microsoft.NET.Test.Sdk",
                    ],
                ),
                GroupingRule::first_segment(["System", "Microsoft"]),
                GroupingRule::Unique {
                    include_version: false,
                },
            ],
        }
    }
}

impl GroupingChain {
    pub fn new(rules: Vec<GroupingRule>) -> Self {
        Self { rules }
    }

    /// A chain that puts every candidate into one group called `name`.
    pub fn single(name: &str) -> Self {
        Self::new(vec![GroupingRule::prefix(name, [""])])
    }

    pub fn rules(&self) -> &[GroupingRule] {
        &self.rules
    }

    /// Position of a catch-all rule that would shadow later rules, if any.
    pub fn misplaced_catch_all(&self) -> Option<usize> {
        let last = self.rules.len().checked_sub(1)?;
        self.rules[..last].iter().position(GroupingRule::is_catch_all)
    }

    pub fn resolve(&self, candidate: &UpdateCandidate) -> Option<String> {
        self.rules.iter().find_map(|rule| rule.group_name(candidate))
    }

    /// Bucket candidates by group name. Unmatched candidates are dropped; candidates inside
    /// a group are ordered by package id so output never depends on input order.
    pub fn group(
        &self,
        candidates: impl IntoIterator<Item = UpdateCandidate>,
    ) -> BTreeMap<String, Vec<UpdateCandidate>> {
        let mut groups: BTreeMap<String, Vec<UpdateCandidate>> = BTreeMap::new();

        for candidate in candidates {
            match self.resolve(&candidate) {
                Some(name) => groups.entry(name).or_default().push(candidate),
                None => debug!(package = %candidate.package, "No grouping rule matched; dropping"),
            }
        }

        for members in groups.values_mut() {
            members.sort_by(|a, b| a.package.cmp(&b.package).then_with(|| a.from.cmp(&b.from)));
        }

        groups
    }
}

use crate::nuget::{CatalogEntry, PackageId, SemanticVersion, VersionCatalog};
use jiff::{SignedDuration, Timestamp};
use std::collections::HashSet;
use std::fmt;

pub const DEFAULT_COOLDOWN_DAYS: u32 = 21;

/// Which packages may be updated to prerelease versions.
#[derive(Debug, Clone, Default)]
pub struct PrereleaseAllowance {
    wildcard: bool,
    packages: HashSet<PackageId>,
}

impl PrereleaseAllowance {
    pub fn none() -> Self {
        Self::default()
    }

    /// Build from a list of package ids where `*` allows every package.
    pub fn from_list<S: AsRef<str>>(items: &[S]) -> Self {
        let mut allowance = Self::none();
        for item in items {
            let item = item.as_ref().trim();
            if item == "*" {
                allowance.wildcard = true;
            } else if !item.is_empty() {
                allowance.packages.insert(PackageId::new(item));
            }
        }
        allowance
    }

    pub fn allows(&self, id: &PackageId) -> bool {
        self.wildcard || self.packages.contains(id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateCandidate {
    pub package: PackageId,
    pub from: SemanticVersion,
    pub to: SemanticVersion,
}

/// How far a candidate moves from the current version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BumpKind {
    Patch,
    Minor,
    Major,
}

impl BumpKind {
    fn classify(current: &SemanticVersion, selected: &SemanticVersion) -> Option<Self> {
        if selected <= current {
            return None;
        }

        if selected.same_minor_line(current) {
            Some(BumpKind::Patch)
        } else if selected.major > current.major {
            Some(BumpKind::Major)
        } else if selected.major == current.major && selected.minor > current.minor {
            Some(BumpKind::Minor)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// The manifest version is not a concrete version (range, wildcard, typo).
    InvalidProjectVersion(String),
    /// Nothing listed and allowed is in the catalog.
    NoEligibleVersion,
    UpToDate,
    /// A major or minor release newer than the current one is still soaking.
    Cooldown {
        version: SemanticVersion,
        eligible_at: Timestamp,
    },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::InvalidProjectVersion(raw) => write!(f, "unparsable version '{raw}'"),
            SkipReason::NoEligibleVersion => f.write_str("no eligible version in catalog"),
            SkipReason::UpToDate => f.write_str("up to date"),
            SkipReason::Cooldown {
                version,
                eligible_at,
            } => write!(f, "{version} is in cooldown until {eligible_at}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Update(UpdateCandidate),
    Skip(SkipReason),
}

/// Decides whether the newest eligible catalog version may replace a referenced version.
///
/// Patch-class bumps (same major and minor) always qualify. Major and minor bumps qualify
/// only once the selected release has been public for the cooldown window, measured from
/// that release's own publish date.
#[derive(Debug, Clone)]
pub struct UpdatePolicy {
    cooldown: SignedDuration,
    allowance: PrereleaseAllowance,
}

impl Default for UpdatePolicy {
    fn default() -> Self {
        Self::new(DEFAULT_COOLDOWN_DAYS, PrereleaseAllowance::none())
    }
}

impl UpdatePolicy {
    pub fn new(cooldown_days: u32, allowance: PrereleaseAllowance) -> Self {
        Self {
            cooldown: SignedDuration::from_hours(i64::from(cooldown_days) * 24),
            allowance,
        }
    }

    pub fn decide(
        &self,
        package: &PackageId,
        project_version: &str,
        catalog: &VersionCatalog,
    ) -> Decision {
        self.decide_at(package, project_version, catalog, Timestamp::now())
    }

    pub fn decide_at(
        &self,
        package: &PackageId,
        project_version: &str,
        catalog: &VersionCatalog,
        now: Timestamp,
    ) -> Decision {
        let selected = match self.select(package, catalog.entries(package)) {
            Some(entry) => entry,
            None => return Decision::Skip(SkipReason::NoEligibleVersion),
        };

        let current = match SemanticVersion::parse(project_version) {
            Ok(version) => version,
            Err(_) => {
                return Decision::Skip(SkipReason::InvalidProjectVersion(
                    project_version.to_string(),
                ));
            }
        };

        match BumpKind::classify(&current, &selected.version) {
            None => Decision::Skip(SkipReason::UpToDate),
            Some(BumpKind::Patch) => Decision::Update(UpdateCandidate {
                package: package.clone(),
                from: current,
                to: selected.version.clone(),
            }),
            Some(BumpKind::Minor | BumpKind::Major) => {
                let cutoff = now.checked_sub(self.cooldown).unwrap_or(Timestamp::MIN);
                if selected.published <= cutoff {
                    Decision::Update(UpdateCandidate {
                        package: package.clone(),
                        from: current,
                        to: selected.version.clone(),
                    })
                } else {
                    let eligible_at = selected
                        .published
                        .checked_add(self.cooldown)
                        .unwrap_or(Timestamp::MAX);
                    Decision::Skip(SkipReason::Cooldown {
                        version: selected.version.clone(),
                        eligible_at,
                    })
                }
            }
        }
    }

    /// Highest listed version, skipping prereleases unless allowed for this package.
    fn select<'a>(&self, package: &PackageId, entries: &'a [CatalogEntry]) -> Option<&'a CatalogEntry> {
        let allow_prerelease = self.allowance.allows(package);
        entries
            .iter()
            .filter(|entry| entry.listed)
            .filter(|entry| allow_prerelease || !entry.version.is_prerelease())
            .max_by(|a, b| {
                a.version
                    .cmp(&b.version)
                    .then_with(|| a.published.cmp(&b.published))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: &str = "2024-06-30T00:00:00Z";

    fn now() -> Timestamp {
        NOW.parse().unwrap()
    }

    fn days_ago(days: i64) -> Timestamp {
        now().checked_sub(SignedDuration::from_hours(days * 24)).unwrap()
    }

    fn entry(version: &str, published: Timestamp, listed: bool) -> CatalogEntry {
        CatalogEntry::new(
            "Foo",
            SemanticVersion::parse(version).unwrap(),
            published,
            listed,
        )
    }

    fn decide(policy: &UpdatePolicy, current: &str, entries: Vec<CatalogEntry>) -> Decision {
        let catalog = VersionCatalog::from_iter(entries);
        policy.decide_at(&PackageId::new("Foo"), current, &catalog, now())
    }

    fn target(decision: Decision) -> Option<String> {
        match decision {
            Decision::Update(candidate) => Some(candidate.to.to_string()),
            Decision::Skip(_) => None,
        }
    }

    #[test]
    fn patch_bumps_skip_the_cooldown() {
        let policy = UpdatePolicy::default();
        let decision = decide(&policy, "1.2.3", vec![entry("1.2.4", days_ago(0), true)]);
        assert_eq!(target(decision), Some("1.2.4".to_string()));
    }

    #[test]
    fn minor_bump_waits_for_cooldown() {
        let policy = UpdatePolicy::default();

        let fresh = decide(&policy, "1.2.3", vec![entry("1.3.0", days_ago(20), true)]);
        assert!(matches!(fresh, Decision::Skip(SkipReason::Cooldown { .. })));

        let soaked = decide(&policy, "1.2.3", vec![entry("1.3.0", days_ago(21), true)]);
        assert_eq!(target(soaked), Some("1.3.0".to_string()));
    }

    #[test]
    fn major_bump_waits_for_cooldown() {
        let policy = UpdatePolicy::new(7, PrereleaseAllowance::none());

        let fresh = decide(&policy, "1.0.0", vec![entry("2.0.0", days_ago(6), true)]);
        match fresh {
            Decision::Skip(SkipReason::Cooldown { eligible_at, .. }) => {
                assert_eq!(eligible_at, days_ago(-1));
            }
            other => panic!("unexpected decision {other:?}"),
        }

        let soaked = decide(&policy, "1.0.0", vec![entry("2.0.0", days_ago(8), true)]);
        assert_eq!(target(soaked), Some("2.0.0".to_string()));
    }

    #[test]
    fn cooldown_uses_the_selected_release_date() {
        // An old 1.3.0 does not unlock a fresh 1.4.0.
        let policy = UpdatePolicy::default();
        let decision = decide(
            &policy,
            "1.2.0",
            vec![
                entry("1.3.0", days_ago(300), true),
                entry("1.4.0", days_ago(2), true),
            ],
        );
        assert!(matches!(decision, Decision::Skip(SkipReason::Cooldown { .. })));
    }

    #[test]
    fn unlisted_versions_are_never_selected() {
        let policy = UpdatePolicy::default();
        let decision = decide(
            &policy,
            "1.0.0",
            vec![
                entry("1.0.1", days_ago(100), true),
                entry("1.0.5", days_ago(100), false),
            ],
        );
        assert_eq!(target(decision), Some("1.0.1".to_string()));
    }

    #[test]
    fn prereleases_need_an_allowance() {
        let entries = || {
            vec![
                entry("1.0.1", days_ago(100), true),
                entry("1.0.2-beta.1", days_ago(100), true),
            ]
        };

        let strict = UpdatePolicy::default();
        assert_eq!(target(decide(&strict, "1.0.0", entries())), Some("1.0.1".to_string()));

        let named = UpdatePolicy::new(21, PrereleaseAllowance::from_list(&["foo"]));
        assert_eq!(
            target(decide(&named, "1.0.0", entries())),
            Some("1.0.2-beta.1".to_string())
        );

        let other = UpdatePolicy::new(21, PrereleaseAllowance::from_list(&["Bar"]));
        assert_eq!(target(decide(&other, "1.0.0", entries())), Some("1.0.1".to_string()));

        let wildcard = UpdatePolicy::new(21, PrereleaseAllowance::from_list(&["*"]));
        assert_eq!(
            target(decide(&wildcard, "1.0.0", entries())),
            Some("1.0.2-beta.1".to_string())
        );
    }

    #[test]
    fn never_downgrades_or_repeats() {
        let policy = UpdatePolicy::new(0, PrereleaseAllowance::from_list(&["*".to_string()]));
        let catalog = vec![
            entry("1.0.0", days_ago(400), true),
            entry("1.5.0", days_ago(300), true),
            entry("2.0.0-rc.1", days_ago(200), true),
        ];

        for current in ["0.9.0", "1.0.0", "1.5.0", "2.0.0-rc.1", "2.0.0", "3.1.4"] {
            let current_version = SemanticVersion::parse(current).unwrap();
            if let Decision::Update(candidate) = decide(&policy, current, catalog.clone()) {
                assert!(candidate.to > current_version, "{current} -> {}", candidate.to);
                assert_eq!(candidate.from, current_version);
            }
        }

        assert_eq!(
            decide(&policy, "3.1.4", catalog),
            Decision::Skip(SkipReason::UpToDate)
        );
    }

    #[test]
    fn malformed_project_version_is_skipped() {
        let policy = UpdatePolicy::default();
        let decision = decide(&policy, "[1.0,2.0)", vec![entry("1.0.1", days_ago(1), true)]);
        assert_eq!(
            decision,
            Decision::Skip(SkipReason::InvalidProjectVersion("[1.0,2.0)".to_string()))
        );
    }

    #[test]
    fn empty_catalog_has_no_candidate() {
        let policy = UpdatePolicy::default();
        assert_eq!(
            decide(&policy, "1.0.0", Vec::new()),
            Decision::Skip(SkipReason::NoEligibleVersion)
        );
    }
}

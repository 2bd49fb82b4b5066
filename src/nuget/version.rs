use crate::error::{NugradeError, Result};
use semver::{BuildMetadata, Prerelease};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// NuGet-flavoured semantic version.
///
/// Accepts one to four numeric components (`1`, `1.2`, `1.2.3`, `1.2.3.4`); missing
/// components are zero and the fourth one is NuGet's legacy revision number. Prerelease
/// labels and build metadata follow SemVer 2.0 syntax.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SemanticVersion {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
    pub revision: u64,
    pub pre: Prerelease,
    pub build: BuildMetadata,
}

impl SemanticVersion {
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
            revision: 0,
            pre: Prerelease::EMPTY,
            build: BuildMetadata::EMPTY,
        }
    }

    pub fn parse(version: &str) -> Result<Self> {
        let trimmed = version.trim();
        if trimmed.is_empty() {
            return Err(NugradeError::InvalidVersion(version.to_string()));
        }

        let (rest, build) = match trimmed.split_once('+') {
            Some((rest, build)) => (rest, build),
            None => (trimmed, ""),
        };
        let (core, pre) = match rest.split_once('-') {
            Some((core, pre)) => (core, pre),
            None => (rest, ""),
        };

        let numbers = Self::parse_numeric(core)
            .ok_or_else(|| NugradeError::InvalidVersion(version.to_string()))?;

        let pre = Prerelease::new(pre).map_err(|_| NugradeError::InvalidVersion(version.to_string()))?;
        let build =
            BuildMetadata::new(build).map_err(|_| NugradeError::InvalidVersion(version.to_string()))?;

        let component = |index: usize| numbers.get(index).copied().unwrap_or(0);

        Ok(Self {
            major: component(0),
            minor: component(1),
            patch: component(2),
            revision: component(3),
            pre,
            build,
        })
    }

    fn parse_numeric(core: &str) -> Option<Vec<u64>> {
        let parts: Vec<&str> = core.split('.').collect();
        if parts.is_empty() || parts.len() > 4 {
            return None;
        }

        let mut numbers = Vec::with_capacity(parts.len());
        for part in parts {
            if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            numbers.push(part.parse::<u64>().ok()?);
        }

        Some(numbers)
    }

    pub fn is_prerelease(&self) -> bool {
        !self.pre.is_empty()
    }

    /// True when both versions share major and minor numbers.
    pub fn same_minor_line(&self, other: &Self) -> bool {
        self.major == other.major && self.minor == other.minor
    }
}

impl FromStr for SemanticVersion {
    type Err = NugradeError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl PartialOrd for SemanticVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SemanticVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.major
            .cmp(&other.major)
            .then(self.minor.cmp(&other.minor))
            .then(self.patch.cmp(&other.patch))
            .then(self.revision.cmp(&other.revision))
            // An empty prerelease sorts above any label.
            .then_with(|| self.pre.cmp(&other.pre))
            .then_with(|| self.build.cmp(&other.build))
    }
}

impl fmt::Display for SemanticVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if self.revision != 0 {
            write!(f, ".{}", self.revision)?;
        }
        if !self.pre.is_empty() {
            write!(f, "-{}", self.pre)?;
        }
        if !self.build.is_empty() {
            write!(f, "+{}", self.build)?;
        }
        Ok(())
    }
}

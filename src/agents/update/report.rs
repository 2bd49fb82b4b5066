use crate::agents::update::policy::{Decision, SkipReason, UpdateCandidate};
use crate::nuget::PackageId;
use crate::registry::FetchOutcome;
use std::collections::BTreeMap;
use std::fmt;

/// Policy outcome for one distinct (package, declared version) reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceDecision {
    pub package: PackageId,
    pub project_version: String,
    pub decision: Decision,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionOutcome {
    /// Submitted; carries a pointer such as the commit branch or pull request URL.
    Submitted(String),
    BranchExists,
    NoChanges,
    /// Not attempted because the change-set limit was reached.
    OverLimit,
    Failed(String),
}

impl fmt::Display for SubmissionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubmissionOutcome::Submitted(target) => write!(f, "submitted ({target})"),
            SubmissionOutcome::BranchExists => f.write_str("branch already exists"),
            SubmissionOutcome::NoChanges => f.write_str("no file changes"),
            SubmissionOutcome::OverLimit => f.write_str("over change-set limit"),
            SubmissionOutcome::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// Everything that happened to every package and change set in one run.
#[derive(Debug, Clone, Default)]
pub struct UpdateReport {
    pub fetches: BTreeMap<PackageId, FetchOutcome>,
    pub decisions: Vec<ReferenceDecision>,
    /// Candidates no grouping rule claimed.
    pub ungrouped: Vec<UpdateCandidate>,
    /// Manifest paths that could not be parsed, with the reason.
    pub manifest_errors: Vec<(String, String)>,
    /// Branch name and outcome per change set, in build order.
    pub submissions: Vec<(String, SubmissionOutcome)>,
}

impl UpdateReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_fetches(&mut self, outcomes: BTreeMap<PackageId, FetchOutcome>) {
        self.fetches.extend(outcomes);
    }

    pub fn record_decision(&mut self, package: PackageId, project_version: &str, decision: Decision) {
        self.decisions.push(ReferenceDecision {
            package,
            project_version: project_version.to_string(),
            decision,
        });
    }

    pub fn record_manifest_error(&mut self, path: &str, message: String) {
        self.manifest_errors.push((path.to_string(), message));
    }

    pub fn record_submission(&mut self, branch: &str, outcome: SubmissionOutcome) {
        self.submissions.push((branch.to_string(), outcome));
    }

    pub fn candidates(&self) -> impl Iterator<Item = &UpdateCandidate> {
        self.decisions.iter().filter_map(|d| match &d.decision {
            Decision::Update(candidate) => Some(candidate),
            Decision::Skip(_) => None,
        })
    }

    pub fn skipped(&self) -> impl Iterator<Item = (&ReferenceDecision, &SkipReason)> {
        self.decisions.iter().filter_map(|d| match &d.decision {
            Decision::Skip(reason) => Some((d, reason)),
            Decision::Update(_) => None,
        })
    }

    /// Packages whose registry fetch did not succeed.
    pub fn fetch_problems(&self) -> impl Iterator<Item = (&PackageId, &FetchOutcome)> {
        self.fetches
            .iter()
            .filter(|(_, outcome)| !matches!(outcome, FetchOutcome::Fetched(_)))
    }

    pub fn total_updates(&self) -> usize {
        self.candidates().count()
    }

    pub fn is_empty(&self) -> bool {
        self.total_updates() == 0
    }

    pub fn submitted_count(&self) -> usize {
        self.submissions
            .iter()
            .filter(|(_, outcome)| matches!(outcome, SubmissionOutcome::Submitted(_)))
            .count()
    }

    pub fn failed_count(&self) -> usize {
        self.submissions
            .iter()
            .filter(|(_, outcome)| matches!(outcome, SubmissionOutcome::Failed(_)))
            .count()
    }
}

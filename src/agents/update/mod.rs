// Update module - turns registry results and manifests into reviewable change sets
//
// Pipeline:
// - UpdatePolicy: decides per reference whether a newer version qualifies
// - GroupingChain: buckets qualifying candidates into named groups
// - FileGrouping: optionally splits groups by manifest location
// - ChangeSetBuilder: edits manifests group by group and captures the diffs
// - UpdateReport: per-package and per-change-set outcomes of a run
pub mod changeset;
pub mod file_grouping;
pub mod grouping;
pub mod policy;
pub mod report;

pub use changeset::{Change, ChangeSet, ChangeSetBuilder};
pub use file_grouping::{FileGroupRule, FileGrouping};
pub use grouping::{GroupingChain, GroupingRule};
pub use policy::{Decision, PrereleaseAllowance, SkipReason, UpdateCandidate, UpdatePolicy};
pub use report::{SubmissionOutcome, UpdateReport};

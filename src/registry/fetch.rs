//! Bounded fan-out over the registry.
//!
//! Every package is fetched independently on a dedicated rayon pool sized by the configured
//! concurrency. A failure for one package is recorded as its outcome and never aborts the
//! others. When the overall deadline passes, packages not yet started are reported as timed
//! out while results already gathered are kept.

use crate::error::{NugradeError, Result};
use crate::nuget::{PackageId, VersionCatalog};
use crate::registry::RegistryClient;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub concurrency: usize,
    pub deadline: Option<Duration>,
    pub show_progress: bool,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            concurrency: 8,
            deadline: None,
            show_progress: false,
        }
    }
}

/// Per-package result of the fetch stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Number of usable catalog entries returned.
    Fetched(usize),
    NotFound,
    Failed(String),
    TimedOut,
}

impl fmt::Display for FetchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchOutcome::Fetched(count) => write!(f, "fetched {count} version(s)"),
            FetchOutcome::NotFound => f.write_str("not found on registry"),
            FetchOutcome::Failed(reason) => write!(f, "fetch failed: {reason}"),
            FetchOutcome::TimedOut => f.write_str("fetch timed out"),
        }
    }
}

#[derive(Debug, Default)]
pub struct FetchResult {
    pub catalog: VersionCatalog,
    pub outcomes: BTreeMap<PackageId, FetchOutcome>,
}

pub fn fetch_catalog(
    client: &dyn RegistryClient,
    ids: &[PackageId],
    options: &FetchOptions,
) -> Result<FetchResult> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(options.concurrency.max(1))
        .thread_name(|index| format!("nugrade-fetch-{index}"))
        .build()
        .map_err(|e| NugradeError::Registry(format!("Failed to start fetch pool: {e}")))?;

    let pb = ProgressBar::new(ids.len() as u64);
    if !options.show_progress {
        pb.set_draw_target(ProgressDrawTarget::hidden());
    }
    pb.set_style(
        ProgressStyle::with_template("  [{bar:40}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-"),
    );

    let deadline = options.deadline.map(|limit| Instant::now() + limit);

    let fetched: Vec<_> = pool.install(|| {
        ids.par_iter()
            .map(|id| {
                if deadline.is_some_and(|d| Instant::now() >= d) {
                    pb.inc(1);
                    return (id.clone(), Err(FetchOutcome::TimedOut));
                }

                pb.set_message(format!("Fetching {id}"));
                let result = match client.fetch_versions(id) {
                    Ok(Some(entries)) => Ok(entries),
                    Ok(None) => Err(FetchOutcome::NotFound),
                    Err(e) => Err(FetchOutcome::Failed(e.to_string())),
                };
                pb.inc(1);
                (id.clone(), result)
            })
            .collect()
    });
    pb.finish_and_clear();

    let mut result = FetchResult::default();
    for (id, fetched) in fetched {
        let outcome = match fetched {
            Ok(entries) => {
                let count = entries.len();
                debug!(package = %id, count, "Fetched versions");
                result.catalog.insert_package(id.clone(), entries);
                FetchOutcome::Fetched(count)
            }
            Err(FetchOutcome::NotFound) => {
                info!(package = %id, "Package not found on registry");
                FetchOutcome::NotFound
            }
            Err(outcome) => {
                warn!(package = %id, %outcome, "Excluding package from this run");
                outcome
            }
        };
        result.outcomes.insert(id, outcome);
    }

    Ok(result)
}

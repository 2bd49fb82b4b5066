use crate::agents::update::{
    ChangeSet, ChangeSetBuilder, Decision, FileGrouping, GroupingChain, SkipReason,
    SubmissionOutcome, UpdateReport,
};
use crate::agents::{ProjectScannerAgent, VersionControlAgent};
use crate::config::{Config, ConfigOverrides};
use crate::error::{NugradeError, Result};
use crate::nuget::PackageId;
use crate::registry::{FetchOptions, RegistryClient, RegistryFactory, fetch_catalog};
use crate::source::github::GithubSettings;
use crate::source::{GithubSource, LocalSource, RepositorySource};
use colored::Colorize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Options shared by every command.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub config_path: Option<PathBuf>,
    pub overrides: ConfigOverrides,
    pub show_progress: bool,
}

#[derive(Debug, Clone)]
pub struct GithubTarget {
    pub owner: String,
    pub repo: String,
    pub base_branch: String,
    pub token_env: String,
}

/// Result of scanning, fetching, deciding, grouping and building.
#[derive(Debug, Default)]
pub struct Plan {
    pub report: UpdateReport,
    pub change_sets: Vec<ChangeSet>,
}

/// Execute the check workflow (dry-run)
pub fn execute_check<P: AsRef<Path>>(project_path: P, options: &RunOptions) -> Result<()> {
    let project_path = project_path.as_ref();
    println!("{}", "Checking for available package updates...".cyan().bold());

    println!("\n{}", "1. Scanning project files...".yellow());
    let project_info = ProjectScannerAgent::new(project_path).validate()?;
    let config = load_config(&project_info.project_path, options)?;
    println!(
        "{}",
        format!("✓ Found {} project file(s)", project_info.manifests.len()).green()
    );

    let source = LocalSource::new(&project_info, None);
    let registry = RegistryFactory::create_nuget(&config)?;

    println!("\n{}", "2. Checking NuGet for newer versions...".yellow());
    let plan = plan_updates(
        &source,
        registry.as_ref(),
        &config,
        &config.grouping_chain(),
        &config.file_grouping()?,
        options.show_progress,
    )?;
    println!("{}", "✓ Check completed".green());

    print_decisions(&plan.report);
    print_change_sets(&plan.change_sets);

    if plan.change_sets.iter().any(|set| !set.is_empty()) {
        println!("\n{}", "To apply these updates, run:".dimmed());
        println!("  {}", "nugrade update".cyan());
    }

    Ok(())
}

/// Execute the update workflow against the local working copy
pub fn execute_update<P: AsRef<Path>>(
    project_path: P,
    options: &RunOptions,
    no_git: bool,
) -> Result<()> {
    let project_path = project_path.as_ref();
    println!("{}", "Starting package update process...".cyan().bold());

    // Step 1: Validate project structure
    println!("\n{}", "1. Scanning project files...".yellow());
    let project_info = ProjectScannerAgent::new(project_path).validate()?;
    let config = load_config(&project_info.project_path, options)?;
    println!(
        "{}",
        format!("✓ Found {} project file(s)", project_info.manifests.len()).green()
    );

    // Step 2: Check Git status (if Git is available and not disabled)
    let git = if project_info.has_git && !no_git {
        println!("\n{}", "2. Checking Git status...".yellow());
        let git_agent = VersionControlAgent::new(&project_info.project_path)?;

        if !git_agent.is_working_directory_clean()? {
            println!(
                "{}",
                "⚠ Warning: Working directory has uncommitted changes".red()
            );
            println!("Please commit or stash your changes before proceeding.");
            return Ok(());
        }
        println!("{}", "✓ Working directory is clean".green());
        Some(git_agent)
    } else {
        if !no_git {
            println!(
                "\n{}",
                "2. Git repository not detected, writing updates to the working tree".yellow()
            );
        } else {
            println!("\n{}", "2. Git disabled, writing updates to the working tree".yellow());
        }
        None
    };

    // Without git there is one working tree, so everything lands in one change set.
    let (chain, file_grouping) = if git.is_some() {
        (config.grouping_chain(), config.file_grouping()?)
    } else {
        (GroupingChain::single("all"), FileGrouping::default())
    };

    let source = LocalSource::new(&project_info, git);
    let registry = RegistryFactory::create_nuget(&config)?;

    // Step 3: Decide and group updates
    println!("\n{}", "3. Checking NuGet for newer versions...".yellow());
    let mut plan = plan_updates(
        &source,
        registry.as_ref(),
        &config,
        &chain,
        &file_grouping,
        options.show_progress,
    )?;
    println!("{}", "✓ Update plan ready".green());
    print_decisions(&plan.report);

    // Step 4: Apply
    println!("\n{}", "4. Applying change sets...".yellow());
    submit_change_sets(&source, &plan.change_sets, config.pr_limit, &mut plan.report);
    print_submissions(&plan.report);

    println!(
        "\n{}",
        "✨ Update process completed successfully!".green().bold()
    );
    Ok(())
}

/// Execute the remote workflow: read a GitHub repository and open pull requests
pub fn execute_github(target: &GithubTarget, options: &RunOptions) -> Result<()> {
    println!(
        "{}",
        format!("Updating packages in {}/{}...", target.owner, target.repo)
            .cyan()
            .bold()
    );

    let mut config = match &options.config_path {
        Some(path) => Config::load(Path::new("."), Some(path.as_path()))?,
        None => Config::default(),
    };
    config.apply(options.overrides.clone());
    config.validate()?;

    let token = std::env::var(&target.token_env).map_err(|_| {
        NugradeError::Config(format!(
            "Environment variable '{}' with a GitHub token is not set",
            target.token_env
        ))
    })?;

    let source = GithubSource::new(GithubSettings {
        owner: target.owner.clone(),
        repo: target.repo.clone(),
        base_branch: target.base_branch.clone(),
        token,
        reviewers: config.reviewers.clone(),
        request_timeout: Duration::from_secs(config.request_timeout_secs),
    })?;
    let registry = RegistryFactory::create_nuget(&config)?;

    println!("\n{}", "1. Reading project files and checking NuGet...".yellow());
    let mut plan = plan_updates(
        &source,
        registry.as_ref(),
        &config,
        &config.grouping_chain(),
        &config.file_grouping()?,
        options.show_progress,
    )?;
    println!("{}", "✓ Update plan ready".green());
    print_decisions(&plan.report);

    println!("\n{}", "2. Opening pull requests...".yellow());
    submit_change_sets(&source, &plan.change_sets, config.pr_limit, &mut plan.report);
    print_submissions(&plan.report);

    Ok(())
}

fn load_config(project_root: &Path, options: &RunOptions) -> Result<Config> {
    let mut config = Config::load(project_root, options.config_path.as_deref())?;
    config.apply(options.overrides.clone());
    config.validate()?;
    Ok(config)
}

/// Scan, fetch, decide, group and build, without submitting anything.
pub fn plan_updates(
    source: &dyn RepositorySource,
    registry: &dyn RegistryClient,
    config: &Config,
    chain: &GroupingChain,
    file_grouping: &FileGrouping,
    show_progress: bool,
) -> Result<Plan> {
    let mut plan = Plan::default();

    let load = source.load_manifests()?;
    for (path, message) in load.failures {
        plan.report.record_manifest_error(&path, message);
    }
    let mut documents = load.documents;

    if documents.is_empty() {
        info!(source = %source.describe(), "No project files found");
        return Ok(plan);
    }

    let mut references: BTreeMap<PackageId, BTreeSet<String>> = BTreeMap::new();
    for document in &documents {
        for (package, version) in document.references() {
            references.entry(package).or_default().insert(version);
        }
    }

    if references.is_empty() {
        info!(source = %source.describe(), "No package references found");
        return Ok(plan);
    }

    let ids: Vec<PackageId> = references.keys().cloned().collect();
    let fetched = fetch_catalog(
        registry,
        &ids,
        &FetchOptions {
            concurrency: config.fetch_concurrency,
            deadline: config.fetch_deadline(),
            show_progress,
        },
    )?;

    debug!(packages = fetched.catalog.len(), "Catalog ready");
    let policy = config.policy();
    let mut candidates = Vec::new();

    for (package, versions) in &references {
        if !fetched.catalog.contains(package) {
            continue;
        }

        for version in versions {
            let decision = policy.decide(package, version, &fetched.catalog);
            match &decision {
                Decision::Update(candidate) => {
                    debug!(package = %package, from = %candidate.from, to = %candidate.to, "Update qualifies");
                    candidates.push(candidate.clone());
                }
                Decision::Skip(reason) => {
                    debug!(package = %package, version, %reason, "Skipping");
                }
            }
            plan.report.record_decision(package.clone(), version, decision);
        }
    }
    plan.report.record_fetches(fetched.outcomes);

    plan.report.ungrouped = candidates
        .iter()
        .filter(|candidate| chain.resolve(candidate).is_none())
        .cloned()
        .collect();

    debug!(rules = chain.rules().len(), candidates = candidates.len(), "Grouping candidates");
    let groups = chain.group(candidates);
    plan.change_sets = ChangeSetBuilder::new(&config.branch_prefix)
        .with_file_grouping(file_grouping.clone())
        .build(&groups, &mut documents);

    Ok(plan)
}

/// Submit change sets in order. Empty sets are skipped, at most `limit` sets are submitted,
/// and a failure never stops the remaining sets.
pub fn submit_change_sets(
    source: &dyn RepositorySource,
    change_sets: &[ChangeSet],
    limit: Option<usize>,
    report: &mut UpdateReport,
) {
    let mut submitted = 0usize;

    for change_set in change_sets {
        let branch = change_set.short_branch_name();

        if change_set.is_empty() {
            report.record_submission(branch, SubmissionOutcome::NoChanges);
            continue;
        }

        if limit.is_some_and(|limit| submitted >= limit) {
            report.record_submission(branch, SubmissionOutcome::OverLimit);
            continue;
        }

        let outcome = match source.submit(change_set) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(branch, error = %e, "Submission failed");
                SubmissionOutcome::Failed(e.to_string())
            }
        };

        if matches!(outcome, SubmissionOutcome::Submitted(_)) {
            submitted += 1;
        }
        report.record_submission(branch, outcome);
    }
}

fn print_decisions(report: &UpdateReport) {
    for (path, message) in &report.manifest_errors {
        println!("  {} {} ({})", "⚠".red(), path.white(), message.dimmed());
    }

    for (package, outcome) in report.fetch_problems() {
        println!("  {} {} ({})", "⚠".yellow(), package.to_string().white(), outcome);
    }

    if report.is_empty() {
        println!("\n{}", "✨ All packages are up to date!".green().bold());
        return;
    }

    println!("\n{}", "📦 Available Updates:".cyan().bold());
    println!(
        "{}",
        format!("Found {} update(s)", report.total_updates()).yellow()
    );
    for candidate in report.candidates() {
        println!(
            "  • {} {} → {}",
            candidate.package.to_string().white().bold(),
            candidate.from.to_string().red(),
            candidate.to.to_string().green().bold()
        );
    }

    let held: Vec<_> = report
        .skipped()
        .filter(|(_, reason)| matches!(reason, SkipReason::Cooldown { .. }))
        .collect();
    if !held.is_empty() {
        println!("\n{}:", "Held back by cooldown".cyan());
        for (decision, reason) in held {
            println!(
                "  • {} {} ({})",
                decision.package.to_string().white(),
                decision.project_version.dimmed(),
                reason
            );
        }
    }

    for candidate in &report.ungrouped {
        println!(
            "  {} {} matched no grouping rule",
            "⚠".yellow(),
            candidate.package.to_string().white()
        );
    }
}

fn print_change_sets(change_sets: &[ChangeSet]) {
    let non_empty: Vec<&ChangeSet> = change_sets.iter().filter(|set| !set.is_empty()).collect();
    if non_empty.is_empty() {
        return;
    }

    println!("\n{}", "Planned change sets:".cyan().bold());
    for change_set in non_empty {
        println!("  {} {}", "⎇".cyan(), change_set.short_branch_name().bright_cyan());
        println!("    {}", change_set.title().white().bold());
        for line in change_set.body().lines() {
            println!("    {}", line.dimmed());
        }
        for change in &change_set.changes {
            println!("    {} {}", "✎".dimmed(), change.file_path);
        }
    }
}

fn print_submissions(report: &UpdateReport) {
    if report.submissions.is_empty() {
        println!("\n{}", "No change sets to apply".yellow());
        return;
    }

    println!("\n{}", "Change set summary:".cyan().bold());
    for (branch, outcome) in &report.submissions {
        let marker = match outcome {
            SubmissionOutcome::Submitted(_) => "✓".green(),
            SubmissionOutcome::Failed(_) => "✗".red(),
            _ => "•".dimmed(),
        };
        println!("  {} {} {}", marker, branch.white(), outcome.to_string().dimmed());
    }

    println!(
        "{}",
        format!(
            "Submitted {} change set(s), {} failed",
            report.submitted_count(),
            report.failed_count()
        )
        .green()
    );
}

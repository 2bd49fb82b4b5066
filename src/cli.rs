use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "nugrade",
    about = "NuGet update bot - finds safe package updates and turns them into reviewable branches",
    version,
    author
)]
pub struct Cli {
    /// Path to the repository root (defaults to current directory)
    #[arg(short, long, default_value = ".", global = true)]
    pub path: PathBuf,

    /// Configuration file (defaults to nugrade.toml in the repository root)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose output for debugging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Hide progress bars
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Policy settings that override the configuration file
#[derive(Args, Debug, Clone, Default)]
pub struct PolicyArgs {
    /// Days a major or minor release must be public before it is proposed
    #[arg(long, value_name = "DAYS")]
    pub cooldown_days: Option<u32>,

    /// Package allowed to move to prereleases; repeatable, "*" allows all
    #[arg(long = "allow-prerelease", value_name = "PACKAGE")]
    pub allow_prerelease: Vec<String>,

    /// Maximum number of change sets to submit
    #[arg(long, value_name = "N")]
    pub pr_limit: Option<usize>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show the change sets that would be created without touching anything
    Check {
        #[command(flatten)]
        policy: PolicyArgs,
    },

    /// Apply updates locally: one branch and commit per change set
    Update {
        /// Skip Git operations and write every update to the working tree
        #[arg(long)]
        no_git: bool,

        #[command(flatten)]
        policy: PolicyArgs,
    },

    /// Open pull requests against a GitHub repository
    Github {
        /// Repository owner (user or organisation)
        #[arg(long)]
        owner: String,

        /// Repository name
        #[arg(long)]
        repo: String,

        /// Branch pull requests are opened against
        #[arg(long, default_value = "main")]
        base: String,

        /// Environment variable holding the API token
        #[arg(long, default_value = "GITHUB_TOKEN", value_name = "VAR")]
        token_env: String,

        #[command(flatten)]
        policy: PolicyArgs,
    },
}

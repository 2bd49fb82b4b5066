mod agents;
mod cli;
mod config;
mod error;
mod nuget;
mod registry;
mod source;
mod utils;
mod workflow;

use clap::Parser;
use cli::{Cli, Commands, PolicyArgs};
use colored::Colorize;
use config::ConfigOverrides;
use std::io::IsTerminal;
use std::process;
use tracing_subscriber::EnvFilter;
use workflow::{GithubTarget, RunOptions};

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let options = |policy: PolicyArgs| RunOptions {
        config_path: cli.config.clone(),
        overrides: ConfigOverrides {
            cooldown_days: policy.cooldown_days,
            allow_prerelease: policy.allow_prerelease,
            pr_limit: policy.pr_limit,
        },
        show_progress: !cli.quiet && std::io::stderr().is_terminal(),
    };

    let result = match cli.command {
        Commands::Check { ref policy } => workflow::execute_check(&cli.path, &options(policy.clone())),
        Commands::Update { no_git, ref policy } => {
            workflow::execute_update(&cli.path, &options(policy.clone()), no_git)
        }
        Commands::Github {
            ref owner,
            ref repo,
            ref base,
            ref token_env,
            ref policy,
        } => workflow::execute_github(
            &GithubTarget {
                owner: owner.clone(),
                repo: repo.clone(),
                base_branch: base.clone(),
                token_env: token_env.clone(),
            },
            &options(policy.clone()),
        ),
    };

    if let Err(e) = result {
        eprintln!("{} {}", "Error:".red().bold(), e);
        process::exit(1);
    }
}

/// Logs go to stderr; `RUST_LOG` wins over `--verbose`.
fn init_logging(verbose: bool) {
    let default_level = if verbose { "nugrade=info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

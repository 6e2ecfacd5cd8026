//! spr - command-line entry point.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use spr::config::{token, Config};
use spr::engine::Engine;
use spr::error::{Error, Result};
use spr::git;
use spr::github::client::GitHubClient;
use spr::persist;
use spr::types::RepoId;

#[derive(Parser)]
#[command(
    name = "spr",
    about = "Stacked pull requests on GitHub",
    disable_version_flag = true
)]
struct Cli {
    /// Log git commands and github calls.
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Show runtime debug info.
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show status of open pull requests.
    #[command(visible_aliases = ["s", "st"])]
    Status,

    /// Update and create pull requests for commits in the stack.
    #[command(visible_aliases = ["u", "up"])]
    Update {
        /// Which commits go into which PR set, e.g. `0-2`, `s0:0,2`, `s1+3`.
        selector: Option<String>,

        /// Add the reviewer to newly created pull requests.
        #[arg(long, short)]
        reviewer: Vec<String>,

        /// Update only this many pull requests from the bottom of the stack.
        #[arg(long, short)]
        count: Option<usize>,

        /// Disable the implicit rebase onto the remote default branch.
        #[arg(long, visible_alias = "nr")]
        no_rebase: bool,
    },

    /// Merge ready pull requests.
    Merge {
        /// PR set to land (`s0`), or a count in whole-stack mode.
        selector: Option<String>,

        /// Merge only this many pull requests from the bottom of the stack.
        #[arg(long, short)]
        count: Option<usize>,
    },

    /// Run the configured pre-merge check and record the result.
    Check,

    /// Synchronize the local stack with the remote.
    Sync,

    /// Show version info.
    Version,

    /// Rebase sequence-editor shim (invoked by git during tagging).
    #[command(hide = true)]
    RebaseSequenceEdit { path: PathBuf },

    /// Rebase message-editor shim (invoked by git during tagging).
    #[command(hide = true)]
    RebaseReword { path: PathBuf },
}

fn main() {
    let cli = Cli::parse();

    // Editor shims run inside `git rebase` with no config or network; handle
    // them before anything else.
    match &cli.command {
        Command::RebaseSequenceEdit { path } => {
            if let Err(e) = git::tagger::sequence_edit_file(path) {
                eprintln!("error: {}", e);
                std::process::exit(1);
            }
            return;
        }
        Command::RebaseReword { path } => {
            if let Err(e) = git::tagger::reword_file(path) {
                eprintln!("error: {}", e);
                std::process::exit(1);
            }
            return;
        }
        Command::Version => {
            println!("spr {}", env!("CARGO_PKG_VERSION"));
            return;
        }
        _ => {}
    }

    let default_filter = if cli.debug || cli.verbose {
        "spr=debug"
    } else {
        "spr=warn"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let runtime = tokio::runtime::Runtime::new().expect("failed to start runtime");
    let result = runtime.block_on(run(cli));

    if let Err(err) = result {
        // SPR_DEBUG crashes with a stack trace instead of exiting cleanly.
        if std::env::var("SPR_DEBUG").as_deref() == Ok("1") {
            panic!("{:?}", err);
        }
        eprintln!("error: {}", err);
        if let Error::Auth(_) = err {
            eprint!("{}", token::help_text("github.com"));
        }
        std::process::exit(err.exit_code());
    }
}

async fn run(cli: Cli) -> Result<()> {
    let cwd = std::env::current_dir()
        .map_err(|e| Error::ConfigInvalid(format!("cannot determine working directory: {}", e)))?;
    let repo_root = git::repo_root(&cwd)?;

    let mut config = Config::load(&repo_root)?;
    if cli.verbose {
        config.user.log_git_commands = true;
        config.user.log_github_calls = true;
    }

    let Some(auth_token) = token::find_token(&config.repo.github_host) else {
        eprint!("{}", token::help_text(&config.repo.github_host));
        std::process::exit(3);
    };

    let forge = GitHubClient::new(
        &config.repo.github_host,
        auth_token,
        RepoId::new(
            config.repo.github_repo_owner.clone(),
            config.repo.github_repo_name.clone(),
        ),
        config.user.log_github_calls,
    )?;

    let pr_set_workflows = config.user.pr_set_workflows;
    let engine = Engine::new(config, Arc::new(forge), repo_root, persist::default_path()?);

    // First ctrl-c cancels in-flight work (and hard-kills the merge-check
    // child); a second one force-exits.
    let cancel = engine.cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
        if tokio::signal::ctrl_c().await.is_ok() {
            std::process::exit(130);
        }
    });

    match cli.command {
        Command::Status => {
            if pr_set_workflows {
                engine.status_pr_sets().await
            } else {
                engine.status_pull_requests().await
            }
        }
        Command::Update {
            selector,
            reviewer,
            count,
            no_rebase,
        } => {
            if pr_set_workflows {
                let Some(selector) = selector else {
                    return Err(Error::ConfigInvalid("usage: spr update <selector>".into()));
                };
                engine.update_pr_sets(&selector).await
            } else {
                engine.update_pull_requests(&reviewer, count, no_rebase).await
            }
        }
        Command::Merge { selector, count } => {
            if pr_set_workflows {
                let Some(selector) = selector else {
                    return Err(Error::ConfigInvalid("usage: spr merge <PR set index>".into()));
                };
                engine.merge_pr_set(&selector).await
            } else {
                // In whole-stack mode a bare number caps the merge, same as
                // --count.
                let positional = selector.as_deref().and_then(|s| s.parse().ok());
                engine.merge_pull_requests(count.or(positional)).await
            }
        }
        Command::Check => engine.run_merge_check().await,
        Command::Sync => engine.sync_stack().await,
        Command::Version | Command::RebaseSequenceEdit { .. } | Command::RebaseReword { .. } => {
            unreachable!("handled before runtime startup")
        }
    }
}

//! sb command-line entry point

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use colored::Colorize;
use sb::{
    suggest, CacheStore, Config, InstallError, InstallRequest, Installer, Origin, Repo,
    SystemExecutor,
};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Exit status for a run the user stopped with Ctrl-C
const EXIT_INTERRUPTED: u8 = 130;

/// Exit status for bad usage
const EXIT_USAGE: u8 = 2;

#[derive(Parser, Debug)]
#[command(name = "sb")]
#[command(author, version, about = "Install and manage apps from the Saltbox, Sandbox and mod playbooks")]
struct Cli {
    /// Configuration file (default: /srv/git/sb/sb.toml, or $SB_CONFIG)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run playbook tags. Prefix with sandbox- or mod- to target those repositories.
    Install {
        /// Tags to run, comma or space separated
        #[arg(value_name = "TAGS")]
        tags: Vec<String>,

        /// Extra variables passed to ansible-playbook (repeatable)
        #[arg(short = 'e', long = "extra-vars", value_name = "KEY=VALUE")]
        extra_vars: Vec<String>,

        /// Tags to skip, comma separated
        #[arg(short = 's', long = "skip-tags", value_name = "TAGS")]
        skip_tags: Vec<String>,

        /// Increase ansible-playbook verbosity (-v, -vv, ...)
        #[arg(short, long, action = clap::ArgAction::Count)]
        verbose: u8,

        /// Re-list playbook tags instead of trusting the cache
        #[arg(long)]
        no_cache: bool,

        /// Run the tags without checking that they exist
        #[arg(long)]
        skip_validation: bool,
    },

    /// Show the tags each installed repository provides
    List {
        /// Only this repository
        #[arg(long, value_enum)]
        repo: Option<Repo>,

        /// Re-list playbook tags instead of trusting the cache
        #[arg(long)]
        no_cache: bool,
    },

    /// Inspect or reset the tag cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Generate shell completion scripts
    Completion {
        /// Target shell
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Subcommand, Debug)]
enum CacheAction {
    /// Print the cached commit and tags per repository
    Show,

    /// Forget cached tags so the next run lists them again
    Clear {
        /// Only this repository
        #[arg(long, value_enum)]
        repo: Option<Repo>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let verbosity = match &cli.command {
        Command::Install { verbose, .. } => *verbose,
        _ => 0,
    };
    init_logging(verbosity);

    if let Command::Completion { shell } = &cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(*shell, &mut cmd, "sb", &mut std::io::stdout());
        return ExitCode::SUCCESS;
    }

    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{} {}", "Error:".red().bold(), e);
            return ExitCode::FAILURE;
        }
    };

    match cli.command {
        Command::Install {
            tags,
            extra_vars,
            skip_tags,
            verbose,
            no_cache,
            skip_validation,
        } => {
            let request = InstallRequest {
                tags,
                extra_vars,
                skip_tags,
                verbosity: verbose,
                no_cache,
                skip_validation,
            };
            install(&config, &request)
        }
        Command::List { repo, no_cache } => list(&config, repo, no_cache),
        Command::Cache { action } => match cache(&config, action) {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("{} {:#}", "Error:".red().bold(), e);
                ExitCode::FAILURE
            }
        },
        Command::Completion { .. } => ExitCode::SUCCESS,
    }
}

/// Initialize logging based on verbosity level
fn init_logging(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(verbosity >= 3))
        .with(env_filter)
        .init();
}

fn install(config: &Config, request: &InstallRequest) -> ExitCode {
    let installer = Installer::new(config, &SystemExecutor);

    match installer.install(request) {
        Ok(completed) => {
            for group in &completed {
                eprintln!(
                    "{} {}: {}",
                    "✓".green(),
                    group.repo.label().bold(),
                    group.qualified().join(",")
                );
            }
            ExitCode::SUCCESS
        }
        Err(InstallError::NoTags) => {
            eprintln!("{} no tags given", "Error:".red().bold());
            eprintln!("Usage: sb install <TAGS>...");
            ExitCode::from(EXIT_USAGE)
        }
        Err(InstallError::Validation(suggestions)) => {
            eprint!("{}", suggest::render(&suggestions));
            ExitCode::FAILURE
        }
        Err(InstallError::Interrupted) => {
            eprintln!("\n{}", "Interrupted.".dimmed());
            ExitCode::from(EXIT_INTERRUPTED)
        }
        Err(e) => {
            eprintln!("{} {}", "Error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

fn list(config: &Config, repo: Option<Repo>, no_cache: bool) -> ExitCode {
    let repos: Vec<Repo> = match repo {
        Some(repo) => vec![repo],
        None => Repo::ALL.to_vec(),
    };

    let installer = Installer::new(config, &SystemExecutor);
    let listed = installer.list(&repos, no_cache);
    if listed.is_empty() {
        eprintln!("{} no installed repositories found", "Error:".red().bold());
        return ExitCode::FAILURE;
    }

    let mut broken = false;
    for (repo, resolution) in listed {
        let origin = match resolution.origin {
            Origin::Cache => "cached",
            Origin::Oracle => "fresh",
            Origin::StaleFallback => "stale",
            Origin::Unavailable => "unavailable",
        };
        println!("{} ({}, {} tags)", repo.label().bold(), origin.dimmed(), resolution.tags.len());

        let qualified: Vec<String> = resolution.tags.iter().map(|t| repo.qualify(t)).collect();
        if !qualified.is_empty() {
            println!("  {}", qualified.join(", "));
        }
        println!();

        broken |= repo == Repo::Primary && resolution.tags.is_empty();
    }

    if broken {
        eprintln!(
            "{} no tags could be determined for {}; the installation appears broken",
            "Error:".red().bold(),
            Repo::Primary
        );
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

fn cache(config: &Config, action: CacheAction) -> anyhow::Result<()> {
    use anyhow::Context;

    let path = config.cache_path();
    let mut store = CacheStore::load(&path).with_context(|| format!("loading {}", path.display()))?;

    match action {
        CacheAction::Show => {
            println!("{}", serde_json::to_string_pretty(store.document())?);
        }
        CacheAction::Clear { repo } => {
            match repo {
                Some(repo) => {
                    let key = config.repo(repo).cache_key();
                    if store.remove(&key).is_none() {
                        eprintln!("Nothing cached for {}", repo);
                        return Ok(());
                    }
                }
                None => store.clear(),
            }
            store.flush().context("writing cache")?;
            eprintln!("{} cache cleared", "✓".green());
        }
    }

    Ok(())
}

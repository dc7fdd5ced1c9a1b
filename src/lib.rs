//! sb - installer orchestrator for multi-repository Ansible playbooks
//!
//! Validates requested tags against every playbook repository before
//! anything runs, caches what each playbook declares, and suggests fixes
//! for tags that don't exist.
//!
//! # Repositories
//!
//! | Prefix | Repository | Example |
//! |--------|------------|---------|
//! | (none) | primary | `plex` |
//! | `sandbox-` | community sandbox | `sandbox-overseerr` |
//! | `mod-` | local modifications | `mod-custom` |
//!
//! # Quick Start
//!
//! ```no_run
//! use sb::{Config, InstallRequest, Installer, SystemExecutor};
//!
//! let config = Config::load(None).unwrap();
//! let installer = Installer::new(&config, &SystemExecutor);
//!
//! let request = InstallRequest {
//!     tags: vec!["plex,sandbox-overseerr".to_string()],
//!     ..Default::default()
//! };
//! let completed = installer.install(&request).unwrap();
//! println!("Ran {} playbook(s)", completed.len());
//! ```

pub mod cache;
pub mod config;
pub mod dispatch;
pub mod exec;
pub mod install;
pub mod oracle;
pub mod repo;
pub mod resolver;
pub mod suggest;
pub mod tags;

pub use cache::{CacheDocument, CacheError, CacheStore, RepoCacheRecord};
pub use config::{Config, ConfigError, RepoConfig};
pub use dispatch::{build_args, DispatchError};
pub use exec::{CommandSpec, ExecError, Executor, ExitOutcome, SystemExecutor};
pub use install::{InstallError, InstallRequest, Installer};
pub use repo::Repo;
pub use resolver::{Origin, Resolution, TagResolver};
pub use suggest::{Classification, Suggestion};
pub use tags::{TagGroup, TagSet};

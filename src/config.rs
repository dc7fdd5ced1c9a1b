//! Configuration file support for sb
//!
//! Reads from /srv/git/sb/sb.toml, or the file named by `SB_CONFIG`.
//! Every field has a default matching a stock installation, so the file is
//! optional.

use crate::repo::Repo;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default location of the configuration file
pub const DEFAULT_CONFIG_PATH: &str = "/srv/git/sb/sb.toml";

/// Default location of the tag cache
pub const DEFAULT_CACHE_PATH: &str = "/srv/git/sb/cache.json";

/// Environment variable naming an alternative configuration file
pub const CONFIG_ENV: &str = "SB_CONFIG";

/// Environment variable overriding the cache file location
pub const CACHE_ENV: &str = "SB_CACHE_PATH";

/// Configuration structure
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    /// Where resolved tags are cached between runs
    #[serde(default = "default_cache_file")]
    pub cache_file: PathBuf,

    /// External tool locations
    #[serde(default)]
    pub tools: ToolsConfig,

    /// Per-repository settings
    #[serde(default)]
    pub repositories: RepositoriesConfig,
}

/// Paths of the external programs sb drives
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ToolsConfig {
    /// Default: "git" (resolved through PATH)
    #[serde(default = "default_git")]
    pub git: String,

    /// Default: /usr/local/bin/ansible-playbook
    #[serde(default = "default_ansible_playbook")]
    pub ansible_playbook: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(from = "RepositoriesFile")]
pub struct RepositoriesConfig {
    pub primary: RepoConfig,

    pub sandbox: RepoConfig,

    #[serde(rename = "mod")]
    pub modification: RepoConfig,
}

/// Location of one playbook repository
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub struct RepoConfig {
    /// Working tree of the repository
    pub path: PathBuf,

    /// Playbook file, relative to `path`
    pub playbook: String,

    /// Tags skipped (in addition to `always`) when listing declared tags
    pub list_tags_skip: Vec<String>,
}

/// `[repositories]` as written in the file
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RepositoriesFile {
    primary: RepoOverrides,
    sandbox: RepoOverrides,
    #[serde(rename = "mod")]
    modification: RepoOverrides,
}

/// One `[repositories.*]` section; omitted keys keep that repository's default
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RepoOverrides {
    path: Option<PathBuf>,
    playbook: Option<String>,
    list_tags_skip: Option<Vec<String>>,
}

impl RepoOverrides {
    fn over(self, base: RepoConfig) -> RepoConfig {
        RepoConfig {
            path: self.path.unwrap_or(base.path),
            playbook: self.playbook.unwrap_or(base.playbook),
            list_tags_skip: self.list_tags_skip.unwrap_or(base.list_tags_skip),
        }
    }
}

impl From<RepositoriesFile> for RepositoriesConfig {
    fn from(file: RepositoriesFile) -> Self {
        Self {
            primary: file.primary.over(default_primary()),
            sandbox: file.sandbox.over(default_sandbox()),
            modification: file.modification.over(default_mod()),
        }
    }
}

/// Error type for configuration loading
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

fn default_cache_file() -> PathBuf {
    PathBuf::from(DEFAULT_CACHE_PATH)
}

fn default_git() -> String {
    "git".to_string()
}

fn default_ansible_playbook() -> String {
    "/usr/local/bin/ansible-playbook".to_string()
}

fn default_primary() -> RepoConfig {
    RepoConfig {
        path: PathBuf::from("/srv/git/saltbox"),
        playbook: "saltbox.yml".to_string(),
        list_tags_skip: vec!["sanity_check".to_string()],
    }
}

fn default_sandbox() -> RepoConfig {
    RepoConfig {
        path: PathBuf::from("/opt/sandbox"),
        playbook: "sandbox.yml".to_string(),
        list_tags_skip: vec!["sanity_check".to_string()],
    }
}

fn default_mod() -> RepoConfig {
    RepoConfig {
        path: PathBuf::from("/opt/saltbox_mod"),
        playbook: "saltbox_mod.yml".to_string(),
        list_tags_skip: Vec::new(),
    }
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            git: default_git(),
            ansible_playbook: default_ansible_playbook(),
        }
    }
}

impl Default for RepositoriesConfig {
    fn default() -> Self {
        Self {
            primary: default_primary(),
            sandbox: default_sandbox(),
            modification: default_mod(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_file: default_cache_file(),
            tools: ToolsConfig::default(),
            repositories: RepositoriesConfig::default(),
        }
    }
}

impl RepoConfig {
    /// Absolute path of the playbook file
    pub fn playbook_path(&self) -> PathBuf {
        self.path.join(&self.playbook)
    }

    /// Key under which this repository is cached
    pub fn cache_key(&self) -> String {
        self.path.to_string_lossy().to_string()
    }

    pub fn is_installed(&self) -> bool {
        self.path.is_dir()
    }
}

impl Config {
    /// Load the configuration.
    ///
    /// An explicit path (argument or `SB_CONFIG`) must exist. Without one,
    /// the default location is used when present, and built-in defaults
    /// otherwise.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let explicit = explicit
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from));

        let path = match explicit {
            Some(path) => path,
            None => {
                let default = PathBuf::from(DEFAULT_CONFIG_PATH);
                if !default.exists() {
                    tracing::debug!("no config file, using defaults");
                    return Ok(Self::default());
                }
                default
            }
        };

        Self::from_file(&path)
    }

    /// Parse a specific config file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!(path = %path.display(), "loaded config");
        Ok(config)
    }

    /// Cache file location, honoring `SB_CACHE_PATH`
    pub fn cache_path(&self) -> PathBuf {
        std::env::var_os(CACHE_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| self.cache_file.clone())
    }

    /// Settings for one repository
    pub fn repo(&self, repo: Repo) -> &RepoConfig {
        match repo {
            Repo::Primary => &self.repositories.primary,
            Repo::Sandbox => &self.repositories.sandbox,
            Repo::Mod => &self.repositories.modification,
        }
    }
}

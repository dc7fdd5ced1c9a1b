//! The playbook repositories `sb` can target
//!
//! Tags are namespaced by prefix: `sandbox-` routes to the sandbox
//! repository, `mod-` to the local modification repository, anything else
//! to the primary repository. The prefix is only sniffed once, here.

use clap::ValueEnum;
use std::fmt;

/// One of the independently versioned playbook repositories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, ValueEnum)]
pub enum Repo {
    Primary,
    Sandbox,
    Mod,
}

impl Repo {
    /// Dispatch order for a mixed invocation
    pub const ALL: [Repo; 3] = [Repo::Primary, Repo::Sandbox, Repo::Mod];

    /// Prefix that selects this repository on the command line
    pub fn prefix(self) -> &'static str {
        match self {
            Repo::Primary => "",
            Repo::Sandbox => "sandbox-",
            Repo::Mod => "mod-",
        }
    }

    /// Name shown to users
    pub fn label(self) -> &'static str {
        match self {
            Repo::Primary => "Saltbox",
            Repo::Sandbox => "Sandbox",
            Repo::Mod => "Saltbox Mod",
        }
    }

    /// Repository whose tags are offered when a tag is unknown here
    pub fn counterpart(self) -> Repo {
        match self {
            Repo::Primary => Repo::Sandbox,
            Repo::Sandbox | Repo::Mod => Repo::Primary,
        }
    }

    /// Route a user-supplied tag to its repository and strip the prefix
    pub fn route(tag: &str) -> (Repo, &str) {
        for repo in [Repo::Sandbox, Repo::Mod] {
            if let Some(bare) = tag.strip_prefix(repo.prefix()) {
                return (repo, bare);
            }
        }
        (Repo::Primary, tag)
    }

    /// Restore the prefix for display
    pub fn qualify(self, tag: &str) -> String {
        format!("{}{}", self.prefix(), tag)
    }
}

impl fmt::Display for Repo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

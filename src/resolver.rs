//! Tag resolution with commit-keyed caching
//!
//! Listing a playbook's tags means a full Ansible parse, which takes
//! anywhere from a few hundred milliseconds to several seconds. The result
//! only changes when the repository does, so it is cached against the
//! checked out commit and reused until the commit moves.

use crate::cache::{CacheStore, RepoCacheRecord};
use crate::config::Config;
use crate::exec::Executor;
use crate::oracle;
use crate::repo::Repo;
use crate::tags::TagSet;

/// Where a resolved tag set came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Cached commit matched the checkout
    Cache,
    /// Freshly listed by ansible-playbook
    Oracle,
    /// Listing failed; previously cached tags were reused
    StaleFallback,
    /// Nothing could be determined
    Unavailable,
}

/// Outcome of resolving one repository
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub tags: TagSet,
    pub origin: Origin,
}

impl Resolution {
    fn unavailable() -> Self {
        Self {
            tags: TagSet::new(),
            origin: Origin::Unavailable,
        }
    }
}

/// Resolves the valid tags of each repository
pub struct TagResolver<'a> {
    config: &'a Config,
    executor: &'a dyn Executor,
    cache: &'a mut CacheStore,
    use_cache: bool,
}

impl<'a> TagResolver<'a> {
    pub fn new(config: &'a Config, executor: &'a dyn Executor, cache: &'a mut CacheStore) -> Self {
        Self {
            config,
            executor,
            cache,
            use_cache: true,
        }
    }

    /// Skip cache validation and always list tags afresh
    pub fn with_cache(mut self, use_cache: bool) -> Self {
        self.use_cache = use_cache;
        self
    }

    /// Current valid tags for `repo`. Never fails: problems degrade to
    /// previously cached tags, or an empty set.
    pub fn resolve(&mut self, repo: Repo) -> Resolution {
        let settings = self.config.repo(repo);
        if !settings.is_installed() {
            tracing::debug!(repo = %repo, path = %settings.path.display(), "repository not installed");
            return Resolution::unavailable();
        }

        let key = settings.cache_key();
        let previous = self.cache.usable(&key).cloned();

        let current_commit = match oracle::current_commit(self.executor, &self.config.tools.git, &settings.path) {
            Ok(commit) => Some(commit),
            Err(e) => {
                tracing::warn!(repo = %repo, error = %e, "could not determine commit");
                None
            }
        };

        if self.use_cache {
            if let (Some(cached), Some(current)) = (&previous, &current_commit) {
                if &cached.commit == current {
                    tracing::debug!(repo = %repo, commit = %current, "tag cache hit");
                    return Resolution {
                        tags: cached.tags.clone(),
                        origin: Origin::Cache,
                    };
                }
                tracing::debug!(repo = %repo, cached = %cached.commit, current = %current, "tag cache stale");
            }
        }

        let declared = oracle::declared_tags(
            self.executor,
            &self.config.tools.ansible_playbook,
            &settings.path,
            &settings.playbook_path(),
            &settings.list_tags_skip,
        );

        let declared = match declared {
            Ok(tags) => tags,
            Err(e) => {
                tracing::warn!(repo = %repo, error = %e, "listing playbook tags failed");
                return match previous {
                    Some(record) => Resolution {
                        tags: record.tags,
                        origin: Origin::StaleFallback,
                    },
                    None => Resolution::unavailable(),
                };
            }
        };

        let record = RepoCacheRecord::new(current_commit.unwrap_or_default(), declared);
        let tags = record.tags.clone();
        self.cache.set(key, record);
        if let Err(e) = self.cache.flush() {
            tracing::warn!(error = %e, "could not write tag cache; results will not be reused");
        }

        tracing::info!(repo = %repo, count = tags.len(), "resolved playbook tags");
        Resolution {
            tags,
            origin: Origin::Oracle,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RepoConfig;
    use crate::exec::{CommandSpec, ExecError, ExitOutcome, Result};
    use std::cell::{Cell, RefCell};
    use tempfile::TempDir;

    /// Answers git and ansible-playbook, counting each
    struct Stub {
        commit: RefCell<Option<String>>,
        list_tags: RefCell<Option<String>>,
        git_calls: Cell<usize>,
        list_calls: Cell<usize>,
    }

    impl Stub {
        fn new(commit: Option<&str>, tags: Option<&str>) -> Self {
            Self {
                commit: RefCell::new(commit.map(str::to_string)),
                list_tags: RefCell::new(tags.map(|t| format!("  TASK TAGS: [{}]\n", t))),
                git_calls: Cell::new(0),
                list_calls: Cell::new(0),
            }
        }

        fn reply(value: Option<String>, spec: &CommandSpec) -> Result<String> {
            value.ok_or_else(|| ExecError::Failed {
                command: spec.display(),
                status: "exit status: 1".to_string(),
                stderr: String::new(),
            })
        }
    }

    impl Executor for Stub {
        fn capture(&self, spec: &CommandSpec) -> Result<String> {
            if spec.program == "git" {
                self.git_calls.set(self.git_calls.get() + 1);
                Self::reply(self.commit.borrow().clone(), spec)
            } else {
                self.list_calls.set(self.list_calls.get() + 1);
                Self::reply(self.list_tags.borrow().clone(), spec)
            }
        }

        fn stream(&self, _spec: &CommandSpec) -> Result<ExitOutcome> {
            unreachable!()
        }
    }

    struct Fixture {
        _dir: TempDir,
        config: Config,
        key: String,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let repo_dir = dir.path().join("saltbox");
        std::fs::create_dir_all(&repo_dir).unwrap();

        let mut config = Config::default();
        config.cache_file = dir.path().join("cache.json");
        config.tools.ansible_playbook = "ansible-playbook".to_string();
        config.repositories.primary = RepoConfig {
            path: repo_dir,
            playbook: "saltbox.yml".to_string(),
            list_tags_skip: Vec::new(),
        };
        config.repositories.sandbox.path = dir.path().join("missing-sandbox");

        let key = config.repo(Repo::Primary).cache_key();
        Fixture { _dir: dir, config, key }
    }

    fn tag_vec(res: &Resolution) -> Vec<&str> {
        res.tags.iter().map(String::as_str).collect()
    }

    #[test]
    fn test_cold_cache_lists_and_stores() {
        let fx = fixture();
        let stub = Stub::new(Some("aaa"), Some("plex, sonarr"));
        let mut cache = CacheStore::new(&fx.config.cache_file);

        let res = TagResolver::new(&fx.config, &stub, &mut cache).resolve(Repo::Primary);
        assert_eq!(res.origin, Origin::Oracle);
        assert_eq!(tag_vec(&res), ["plex", "sonarr"]);
        assert_eq!(stub.list_calls.get(), 1);

        // persisted, not just in memory
        let reloaded = CacheStore::load(&fx.config.cache_file).unwrap();
        assert_eq!(reloaded.get(&fx.key), Some(&RepoCacheRecord::new("aaa", ["plex", "sonarr"])));
    }

    #[test]
    fn test_cache_hit_short_circuits() {
        let fx = fixture();
        let stub = Stub::new(Some("aaa"), Some("fresh"));
        let mut cache = CacheStore::new(&fx.config.cache_file);
        cache.set(fx.key.clone(), RepoCacheRecord::new("aaa", ["plex"]));

        let res = TagResolver::new(&fx.config, &stub, &mut cache).resolve(Repo::Primary);
        assert_eq!(res.origin, Origin::Cache);
        assert_eq!(tag_vec(&res), ["plex"]);
        assert_eq!(stub.git_calls.get(), 1);
        assert_eq!(stub.list_calls.get(), 0);
    }

    #[test]
    fn test_stale_commit_relists() {
        let fx = fixture();
        let stub = Stub::new(Some("bbb"), Some("plex, overseerr"));
        let mut cache = CacheStore::new(&fx.config.cache_file);
        cache.set(fx.key.clone(), RepoCacheRecord::new("aaa", ["plex", "sonarr", "radarr"]));

        let res = TagResolver::new(&fx.config, &stub, &mut cache).resolve(Repo::Primary);
        assert_eq!(res.origin, Origin::Oracle);
        assert_eq!(tag_vec(&res), ["plex", "overseerr"]);
        assert_eq!(stub.list_calls.get(), 1);
        assert_eq!(cache.get(&fx.key).unwrap().commit, "bbb");
    }

    #[test]
    fn test_empty_cached_tags_is_a_miss() {
        let fx = fixture();
        let stub = Stub::new(Some("aaa"), Some("plex"));
        let mut cache = CacheStore::new(&fx.config.cache_file);
        cache.set(fx.key.clone(), RepoCacheRecord::new("aaa", Vec::<String>::new()));

        let res = TagResolver::new(&fx.config, &stub, &mut cache).resolve(Repo::Primary);
        assert_eq!(res.origin, Origin::Oracle);
        assert_eq!(stub.list_calls.get(), 1);
    }

    #[test]
    fn test_unknown_commit_forces_miss() {
        let fx = fixture();
        let stub = Stub::new(None, Some("plex"));
        let mut cache = CacheStore::new(&fx.config.cache_file);
        cache.set(fx.key.clone(), RepoCacheRecord::new("aaa", ["plex"]));

        let res = TagResolver::new(&fx.config, &stub, &mut cache).resolve(Repo::Primary);
        assert_eq!(res.origin, Origin::Oracle);
        assert_eq!(stub.list_calls.get(), 1);
        assert_eq!(cache.get(&fx.key).unwrap().commit, "");
    }

    #[test]
    fn test_no_cache_always_lists() {
        let fx = fixture();
        let stub = Stub::new(Some("aaa"), Some("plex, sonarr"));
        let mut cache = CacheStore::new(&fx.config.cache_file);
        cache.set(fx.key.clone(), RepoCacheRecord::new("aaa", ["plex"]));

        let res = TagResolver::new(&fx.config, &stub, &mut cache)
            .with_cache(false)
            .resolve(Repo::Primary);
        assert_eq!(res.origin, Origin::Oracle);
        assert_eq!(tag_vec(&res), ["plex", "sonarr"]);
        assert_eq!(stub.list_calls.get(), 1);
    }

    #[test]
    fn test_listing_failure_falls_back_to_previous() {
        let fx = fixture();
        let stub = Stub::new(Some("bbb"), None);
        let mut cache = CacheStore::new(&fx.config.cache_file);
        cache.set(fx.key.clone(), RepoCacheRecord::new("aaa", ["plex"]));

        let res = TagResolver::new(&fx.config, &stub, &mut cache).resolve(Repo::Primary);
        assert_eq!(res.origin, Origin::StaleFallback);
        assert_eq!(tag_vec(&res), ["plex"]);
        // the stale record is left alone
        assert_eq!(cache.get(&fx.key).unwrap().commit, "aaa");
    }

    #[test]
    fn test_listing_failure_without_cache_is_empty() {
        let fx = fixture();
        let stub = Stub::new(Some("aaa"), None);
        let mut cache = CacheStore::new(&fx.config.cache_file);

        let res = TagResolver::new(&fx.config, &stub, &mut cache).resolve(Repo::Primary);
        assert_eq!(res, Resolution::unavailable());
        assert!(cache.get(&fx.key).is_none());
    }

    #[test]
    fn test_missing_repository_skips_oracles() {
        let fx = fixture();
        let stub = Stub::new(Some("aaa"), Some("plex"));
        let mut cache = CacheStore::new(&fx.config.cache_file);

        let res = TagResolver::new(&fx.config, &stub, &mut cache).resolve(Repo::Sandbox);
        assert_eq!(res.origin, Origin::Unavailable);
        assert_eq!(stub.git_calls.get(), 0);
        assert_eq!(stub.list_calls.get(), 0);
    }
}

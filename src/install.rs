//! The `sb install` pipeline
//!
//! parse tags → route to repositories → resolve valid tags → validate →
//! run one playbook per repository that received tags.

use crate::cache::CacheStore;
use crate::config::Config;
use crate::dispatch::{self, DispatchError};
use crate::exec::Executor;
use crate::repo::Repo;
use crate::resolver::{Resolution, TagResolver};
use crate::suggest::{self, Suggestion};
use crate::tags::{self, TagGroup, TagSet};
use std::collections::HashMap;
use std::path::PathBuf;
use thiserror::Error;

/// Everything `sb install` was asked to do
#[derive(Debug, Clone, Default)]
pub struct InstallRequest {
    /// Raw positional arguments, comma or space separated
    pub tags: Vec<String>,
    /// `key=value` strings passed through as `--extra-vars`
    pub extra_vars: Vec<String>,
    /// Raw skip tags, routed by prefix like `tags`
    pub skip_tags: Vec<String>,
    pub verbosity: u8,
    /// Re-list tags instead of trusting the cache
    pub no_cache: bool,
    /// Run without checking tags at all
    pub skip_validation: bool,
}

/// Error type for the install pipeline
#[derive(Debug, Error)]
pub enum InstallError {
    #[error("no tags given")]
    NoTags,

    #[error("{repo} is not installed at {}", path.display())]
    RepoMissing { repo: Repo, path: PathBuf },

    #[error("no tags could be determined for {} at {}; the installation appears broken", Repo::Primary, path.display())]
    BrokenInstall { path: PathBuf },

    #[error("{} tag(s) failed validation", .0.len())]
    Validation(Vec<Suggestion>),

    #[error("{repo} playbook failed: {source}")]
    Dispatch {
        repo: Repo,
        #[source]
        source: DispatchError,
    },

    #[error("interrupted")]
    Interrupted,
}

pub type Result<T> = std::result::Result<T, InstallError>;

/// Drives validation and playbook runs for one invocation
pub struct Installer<'a> {
    config: &'a Config,
    executor: &'a dyn Executor,
}

impl<'a> Installer<'a> {
    pub fn new(config: &'a Config, executor: &'a dyn Executor) -> Self {
        Self { config, executor }
    }

    /// Parse, route and validate. Returns the groups that would run.
    pub fn plan(&self, request: &InstallRequest) -> Result<Vec<TagGroup>> {
        let requested = tags::parse_tag_args(&request.tags);
        if requested.is_empty() {
            return Err(InstallError::NoTags);
        }

        let groups = tags::partition(&requested);
        if groups.is_empty() {
            return Err(InstallError::NoTags);
        }

        for group in &groups {
            let settings = self.config.repo(group.repo);
            if !settings.is_installed() {
                return Err(InstallError::RepoMissing {
                    repo: group.repo,
                    path: settings.path.clone(),
                });
            }
        }

        if request.skip_validation {
            tracing::info!("tag validation skipped");
            return Ok(groups);
        }

        let mut cache = self.open_cache();
        let mut resolver = TagResolver::new(self.config, self.executor, &mut cache).with_cache(!request.no_cache);
        let mut resolved: HashMap<Repo, TagSet> = HashMap::new();

        let primary = resolver.resolve(Repo::Primary).tags;
        if primary.is_empty() {
            return Err(InstallError::BrokenInstall {
                path: self.config.repo(Repo::Primary).path.clone(),
            });
        }
        resolved.insert(Repo::Primary, primary);

        let mut suggestions = Vec::new();
        for group in &groups {
            let other = group.repo.counterpart();
            for repo in [group.repo, other] {
                if !resolved.contains_key(&repo) {
                    let tags = resolver.resolve(repo).tags;
                    resolved.insert(repo, tags);
                }
            }
            suggestions.extend(suggest::validate(
                &resolved[&group.repo],
                &resolved[&other],
                &group.tags,
                group.repo,
                other,
            ));
        }

        if !suggestions.is_empty() {
            suggestions.sort_by(|a, b| a.input.cmp(&b.input));
            return Err(InstallError::Validation(suggestions));
        }

        Ok(groups)
    }

    /// Validate, then run each group's playbook in order. Stops at the first
    /// failure; returns the groups that completed.
    pub fn install(&self, request: &InstallRequest) -> Result<Vec<TagGroup>> {
        let groups = self.plan(request)?;
        let skip = tags::parse_tag_args(&request.skip_tags);
        let passthrough: Vec<String> = dispatch::verbosity_flag(request.verbosity).into_iter().collect();

        let mut completed = Vec::new();
        for group in groups {
            let settings = self.config.repo(group.repo);
            let args = dispatch::build_args(
                &group.tags,
                &request.extra_vars,
                &tags::tags_for(group.repo, &skip),
                &passthrough,
            );

            let result = dispatch::run(
                self.executor,
                &self.config.tools.ansible_playbook,
                &settings.path,
                &settings.playbook_path(),
                &args,
            );

            match result {
                Ok(()) => completed.push(group),
                Err(DispatchError::Interrupted) => return Err(InstallError::Interrupted),
                Err(source) => {
                    return Err(InstallError::Dispatch {
                        repo: group.repo,
                        source,
                    })
                }
            }
        }

        Ok(completed)
    }

    /// Resolved tags of each installed repository among `repos`
    pub fn list(&self, repos: &[Repo], no_cache: bool) -> Vec<(Repo, Resolution)> {
        let mut cache = self.open_cache();
        let mut resolver = TagResolver::new(self.config, self.executor, &mut cache).with_cache(!no_cache);
        repos
            .iter()
            .filter(|repo| self.config.repo(**repo).is_installed())
            .map(|&repo| (repo, resolver.resolve(repo)))
            .collect()
    }

    /// A cache that cannot be read is replaced rather than fatal; the next
    /// flush rewrites it.
    fn open_cache(&self) -> CacheStore {
        let path = self.config.cache_path();
        CacheStore::load(&path).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "ignoring unreadable tag cache");
            CacheStore::new(path)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::RepoCacheRecord;
    use crate::config::RepoConfig;
    use crate::exec::{CommandSpec, ExecError, ExitOutcome};
    use crate::suggest::Classification;
    use std::cell::RefCell;
    use std::path::Path;
    use tempfile::TempDir;

    /// Serves commits and TASK TAGS per repository directory and records
    /// every streamed run
    #[derive(Default)]
    struct FakeTools {
        tags: HashMap<PathBuf, String>,
        run_exit: Option<ExitOutcome>,
        captured: RefCell<Vec<CommandSpec>>,
        streamed: RefCell<Vec<CommandSpec>>,
    }

    impl Executor for FakeTools {
        fn capture(&self, spec: &CommandSpec) -> crate::exec::Result<String> {
            self.captured.borrow_mut().push(spec.clone());
            if spec.program == "git" {
                return Ok("c0ffee\n".to_string());
            }
            self.tags
                .get(&spec.cwd)
                .map(|t| format!("      TASK TAGS: [{}]\n", t))
                .ok_or_else(|| ExecError::Failed {
                    command: spec.display(),
                    status: "exit status: 1".to_string(),
                    stderr: "ERROR! playbook not found".to_string(),
                })
        }

        fn stream(&self, spec: &CommandSpec) -> crate::exec::Result<ExitOutcome> {
            self.streamed.borrow_mut().push(spec.clone());
            Ok(self.run_exit.unwrap_or(ExitOutcome::Success))
        }
    }

    /// Executor that must never be reached
    struct Untouchable;

    impl Executor for Untouchable {
        fn capture(&self, spec: &CommandSpec) -> crate::exec::Result<String> {
            panic!("unexpected capture: {}", spec.display())
        }

        fn stream(&self, spec: &CommandSpec) -> crate::exec::Result<ExitOutcome> {
            panic!("unexpected stream: {}", spec.display())
        }
    }

    struct Fixture {
        dir: TempDir,
        config: Config,
    }

    impl Fixture {
        fn new(with_mod: bool) -> Self {
            let dir = TempDir::new().unwrap();
            let mut config = Config::default();
            config.cache_file = dir.path().join("cache.json");
            config.tools.ansible_playbook = "ansible-playbook".to_string();
            for (repo, name) in [(Repo::Primary, "saltbox"), (Repo::Sandbox, "sandbox"), (Repo::Mod, "mod")] {
                let path = dir.path().join(name);
                if repo != Repo::Mod || with_mod {
                    std::fs::create_dir_all(&path).unwrap();
                }
                let settings = RepoConfig {
                    path,
                    playbook: format!("{}.yml", name),
                    list_tags_skip: Vec::new(),
                };
                match repo {
                    Repo::Primary => config.repositories.primary = settings,
                    Repo::Sandbox => config.repositories.sandbox = settings,
                    Repo::Mod => config.repositories.modification = settings,
                }
            }
            Self { dir, config }
        }

        fn path(&self, name: &str) -> PathBuf {
            self.dir.path().join(name)
        }

        fn tools(&self) -> FakeTools {
            let mut tools = FakeTools::default();
            tools.tags.insert(self.path("saltbox"), "plex, sonarr, radarr".to_string());
            tools.tags.insert(self.path("sandbox"), "overseerr, plex".to_string());
            tools.tags.insert(self.path("mod"), "custom".to_string());
            tools
        }
    }

    fn request(tags: &[&str]) -> InstallRequest {
        InstallRequest {
            tags: tags.iter().map(|t| t.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_empty_tags_fail_before_any_io() {
        let mut fx = Fixture::new(false);
        fx.config.cache_file = PathBuf::from("/nonexistent/dir/cache.json");
        let installer = Installer::new(&fx.config, &Untouchable);
        assert!(matches!(installer.install(&request(&[" ", ",,"])), Err(InstallError::NoTags)));
        assert!(matches!(installer.install(&request(&[])), Err(InstallError::NoTags)));
    }

    #[test]
    fn test_valid_mixed_groups_run_in_order() {
        let fx = Fixture::new(true);
        let tools = fx.tools();
        let mut req = request(&["sandbox-overseerr,plex", "mod-custom sonarr"]);
        req.extra_vars = vec!["a=1".to_string()];
        req.skip_tags = vec!["settings,sandbox-motd".to_string()];
        req.verbosity = 2;

        let done = Installer::new(&fx.config, &tools).install(&req).unwrap();
        let order: Vec<Repo> = done.iter().map(|g| g.repo).collect();
        assert_eq!(order, [Repo::Primary, Repo::Sandbox, Repo::Mod]);

        let runs = tools.streamed.borrow();
        assert_eq!(runs.len(), 3);
        assert_eq!(runs[0].cwd, fx.path("saltbox"));
        assert_eq!(
            runs[0].args,
            vec![
                fx.path("saltbox").join("saltbox.yml").to_string_lossy().to_string(),
                "--become".to_string(),
                "--tags".to_string(),
                "plex,sonarr".to_string(),
                "--extra-vars".to_string(),
                "a=1".to_string(),
                "--skip-tags".to_string(),
                "settings".to_string(),
                "-vv".to_string(),
            ]
        );
        assert!(runs[1].args.ends_with(&[
            "--tags".to_string(),
            "overseerr".to_string(),
            "--extra-vars".to_string(),
            "a=1".to_string(),
            "--skip-tags".to_string(),
            "motd".to_string(),
            "-vv".to_string(),
        ]));
        assert!(!runs[2].args.contains(&"--skip-tags".to_string()));
    }

    #[test]
    fn test_invalid_tags_block_every_run() {
        let fx = Fixture::new(false);
        let tools = fx.tools();
        let err = Installer::new(&fx.config, &tools)
            .install(&request(&["plx", "overseerr", "sandbox-plex", "xyz123"]))
            .unwrap_err();

        let InstallError::Validation(suggestions) = err else {
            panic!("expected validation failure");
        };
        let summary: Vec<(&str, Option<&str>, Classification)> = suggestions
            .iter()
            .map(|s| (s.input.as_str(), s.suggested.as_deref(), s.kind.clone()))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("overseerr", Some("sandbox-overseerr"), Classification::ExactMatchInOtherRepo),
                ("plx", Some("plex"), Classification::TypoInSameRepo),
                ("xyz123", None, Classification::NotFound),
            ]
        );
        assert!(tools.streamed.borrow().is_empty());
    }

    #[test]
    fn test_sandbox_only_tag_suggests_unprefixed_primary() {
        let fx = Fixture::new(false);
        let mut tools = fx.tools();
        tools.tags.insert(fx.path("sandbox"), "overseerr".to_string());

        let err = Installer::new(&fx.config, &tools)
            .plan(&request(&["sandbox-sonarr"]))
            .unwrap_err();
        let InstallError::Validation(suggestions) = err else {
            panic!("expected validation failure");
        };
        assert_eq!(suggestions[0].input, "sandbox-sonarr");
        assert_eq!(suggestions[0].suggested.as_deref(), Some("sonarr"));
    }

    #[test]
    fn test_broken_install() {
        let fx = Fixture::new(false);
        let mut tools = fx.tools();
        tools.tags.remove(&fx.path("saltbox"));

        let err = Installer::new(&fx.config, &tools).plan(&request(&["plex"])).unwrap_err();
        assert!(matches!(err, InstallError::BrokenInstall { .. }));
    }

    #[test]
    fn test_missing_mod_repo() {
        let fx = Fixture::new(false);
        let err = Installer::new(&fx.config, &Untouchable)
            .plan(&request(&["mod-custom"]))
            .unwrap_err();
        assert!(matches!(err, InstallError::RepoMissing { repo: Repo::Mod, .. }));
    }

    #[test]
    fn test_skip_validation_runs_without_listing() {
        let fx = Fixture::new(false);
        let tools = fx.tools();
        let mut req = request(&["whatever"]);
        req.skip_validation = true;

        let done = Installer::new(&fx.config, &tools).install(&req).unwrap();
        assert_eq!(done.len(), 1);
        assert!(tools.captured.borrow().is_empty());
        assert_eq!(tools.streamed.borrow().len(), 1);
    }

    #[test]
    fn test_second_plan_uses_cache() {
        let fx = Fixture::new(false);
        let tools = fx.tools();
        let installer = Installer::new(&fx.config, &tools);
        installer.plan(&request(&["plex"])).unwrap();

        let listings = |t: &FakeTools| t.captured.borrow().iter().filter(|s| s.program != "git").count();
        let first = listings(&tools);
        assert_eq!(first, 2);

        installer.plan(&request(&["plex"])).unwrap();
        assert_eq!(listings(&tools), first);

        let cache = CacheStore::load(&fx.config.cache_file).unwrap();
        let key = fx.path("saltbox").to_string_lossy().to_string();
        assert_eq!(
            cache.get(&key),
            Some(&RepoCacheRecord::new("c0ffee", ["plex", "sonarr", "radarr"]))
        );
    }

    #[test]
    fn test_corrupt_cache_is_replaced() {
        let fx = Fixture::new(false);
        std::fs::write(&fx.config.cache_file, "{{{").unwrap();
        let tools = fx.tools();

        Installer::new(&fx.config, &tools).plan(&request(&["plex"])).unwrap();
        assert!(CacheStore::load(&fx.config.cache_file).is_ok());
    }

    #[test]
    fn test_playbook_failure_stops_remaining_groups() {
        let fx = Fixture::new(false);
        let mut tools = fx.tools();
        tools.run_exit = Some(ExitOutcome::Code(2));

        let err = Installer::new(&fx.config, &tools)
            .install(&request(&["plex", "sandbox-overseerr"]))
            .unwrap_err();
        assert!(matches!(
            err,
            InstallError::Dispatch { repo: Repo::Primary, source: DispatchError::Failed { code: 2 } }
        ));
        assert_eq!(tools.streamed.borrow().len(), 1);
    }

    #[test]
    fn test_interrupt_is_distinct() {
        let fx = Fixture::new(false);
        let mut tools = fx.tools();
        tools.run_exit = Some(ExitOutcome::Signal(2));

        let err = Installer::new(&fx.config, &tools).install(&request(&["plex"])).unwrap_err();
        assert!(matches!(err, InstallError::Interrupted));
    }

    #[test]
    fn test_list_skips_missing_repos() {
        let fx = Fixture::new(false);
        let tools = fx.tools();
        let listed = Installer::new(&fx.config, &tools).list(&Repo::ALL, false);
        let repos: Vec<Repo> = listed.iter().map(|(r, _)| *r).collect();
        assert_eq!(repos, [Repo::Primary, Repo::Sandbox]);
        assert!(listed[1].1.tags.contains("overseerr"));
        assert!(Path::new(&fx.config.cache_file).exists());
    }
}

//! Repository state probes
//!
//! Two questions are asked of a repository: which commit is checked out,
//! and which tags does its playbook declare. Both are answered by running a
//! tool through an [`Executor`].

use crate::exec::{CommandSpec, ExecError, Executor, Result};
use lazy_static::lazy_static;
use regex::Regex;
use std::path::Path;

/// Marker preceding the tag list in `ansible-playbook --list-tags` output
pub const TASK_TAGS_MARKER: &str = "TASK TAGS:";

lazy_static! {
    static ref BRACKETED: Regex = Regex::new(r"\[(.*)\]").unwrap();
}

/// Commit currently checked out in `repo_path`
pub fn current_commit(executor: &dyn Executor, git: &str, repo_path: &Path) -> Result<String> {
    let spec = CommandSpec::new(git, repo_path).args(["rev-parse", "HEAD"]);
    let commit = executor.capture(&spec)?.trim_end().to_string();
    if commit.is_empty() {
        return Err(ExecError::EmptyOutput {
            command: spec.display(),
        });
    }
    Ok(commit)
}

/// Tags declared by a playbook, in the order Ansible lists them.
///
/// The `always` tag is skipped along with `extra_skip_tags`, since tasks
/// tagged that way run regardless of selection.
pub fn declared_tags(
    executor: &dyn Executor,
    ansible_playbook: &str,
    repo_path: &Path,
    playbook: &Path,
    extra_skip_tags: &[String],
) -> Result<Vec<String>> {
    let mut skip = vec!["always".to_string()];
    skip.extend(extra_skip_tags.iter().cloned());

    let spec = CommandSpec::new(ansible_playbook, repo_path)
        .arg(playbook.to_string_lossy())
        .args(["--become", "--list-tags"])
        .arg(format!("--skip-tags={}", skip.join(",")));

    let output = executor.capture(&spec)?;
    let tags = parse_task_tags(&output);
    if tags.is_empty() {
        tracing::warn!(playbook = %playbook.display(), "no TASK TAGS line in list-tags output");
    }
    Ok(tags)
}

/// Extract the tag list from the first `TASK TAGS: [...]` line.
/// Output without such a line yields an empty list.
pub fn parse_task_tags(output: &str) -> Vec<String> {
    let Some(after) = output
        .lines()
        .find_map(|l| l.find(TASK_TAGS_MARKER).map(|i| &l[i + TASK_TAGS_MARKER.len()..]))
    else {
        return Vec::new();
    };

    let Some(inner) = BRACKETED.captures(after).and_then(|c| c.get(1)) else {
        return Vec::new();
    };

    inner
        .as_str()
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

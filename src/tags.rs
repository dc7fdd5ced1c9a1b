//! Tag input parsing and routing
//!
//! Turns the raw positional arguments of `sb install` into one
//! [`TagGroup`] per targeted repository.

use crate::repo::Repo;
use indexmap::IndexSet;

/// Insertion-ordered tag set with O(1) membership
pub type TagSet = IndexSet<String>;

/// Tags requested for one repository, prefix stripped
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagGroup {
    pub repo: Repo,
    pub tags: Vec<String>,
}

impl TagGroup {
    /// Tags with the repository prefix restored, for display
    pub fn qualified(&self) -> Vec<String> {
        self.tags.iter().map(|t| self.repo.qualify(t)).collect()
    }
}

/// Split raw arguments on commas and whitespace, trimming and dropping
/// empty entries. Order is preserved and duplicates removed.
pub fn parse_tag_args<S: AsRef<str>>(args: &[S]) -> Vec<String> {
    let mut seen = TagSet::new();
    for arg in args {
        for tag in arg
            .as_ref()
            .split(|c: char| c == ',' || c.is_whitespace())
            .map(str::trim)
            .filter(|t| !t.is_empty())
        {
            seen.insert(tag.to_string());
        }
    }
    seen.into_iter().collect()
}

/// Route tags to their repositories. Groups come back in dispatch order and
/// only for repositories that received at least one tag.
pub fn partition(tags: &[String]) -> Vec<TagGroup> {
    let mut groups: Vec<TagGroup> = Repo::ALL
        .iter()
        .map(|&repo| TagGroup { repo, tags: Vec::new() })
        .collect();

    for tag in tags {
        let (repo, bare) = Repo::route(tag);
        if bare.is_empty() {
            tracing::warn!(tag = %tag, "ignoring tag with nothing after its prefix");
            continue;
        }
        let group = &mut groups[repo_index(repo)];
        if !group.tags.iter().any(|t| t == bare) {
            group.tags.push(bare.to_string());
        }
    }

    groups.retain(|g| !g.tags.is_empty());
    groups
}

/// Tags belonging to one repository out of a mixed list, prefix stripped
pub fn tags_for(repo: Repo, tags: &[String]) -> Vec<String> {
    partition(tags)
        .into_iter()
        .find(|g| g.repo == repo)
        .map(|g| g.tags)
        .unwrap_or_default()
}

fn repo_index(repo: Repo) -> usize {
    match repo {
        Repo::Primary => 0,
        Repo::Sandbox => 1,
        Repo::Mod => 2,
    }
}

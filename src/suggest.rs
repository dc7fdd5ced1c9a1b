//! Suggestions for tags that failed validation
//!
//! Each unknown tag is checked, in order, against: the other repository
//! verbatim, near misses in its own repository, near misses in the other
//! repository. The first rule that matches decides the suggestion.

use crate::repo::Repo;
use crate::tags::TagSet;
use colored::Colorize;

/// Largest edit distance still considered a typo
pub const MAX_TYPO_DISTANCE: usize = 2;

/// Why a tag was rejected and what, if anything, fixes it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// Tag exists verbatim in the other repository
    ExactMatchInOtherRepo,
    /// Close to a tag in the same repository
    TypoInSameRepo,
    /// Close to a tag in the other repository
    TypoInOtherRepo,
    NotFound,
}

/// A rejected tag with its proposed correction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Suggestion {
    /// Tag as the user typed it, prefix included
    pub input: String,
    /// Replacement, prefix included
    pub suggested: Option<String>,
    pub source: Repo,
    pub target: Repo,
    pub kind: Classification,
}

/// Decision for a single bare tag. `None` means the tag is valid.
pub fn classify(
    tag: &str,
    repo_tags: &TagSet,
    other_tags: &TagSet,
    current: Repo,
    other: Repo,
) -> Option<Suggestion> {
    if repo_tags.contains(tag) {
        return None;
    }

    let suggestion = |suggested: Option<String>, target: Repo, kind: Classification| Suggestion {
        input: current.qualify(tag),
        suggested,
        source: current,
        target,
        kind,
    };

    if other_tags.contains(tag) {
        return Some(suggestion(
            Some(other.qualify(tag)),
            other,
            Classification::ExactMatchInOtherRepo,
        ));
    }

    if let Some(close) = closest(tag, repo_tags) {
        return Some(suggestion(
            Some(current.qualify(close)),
            current,
            Classification::TypoInSameRepo,
        ));
    }

    if let Some(close) = closest(tag, other_tags) {
        return Some(suggestion(
            Some(other.qualify(close)),
            other,
            Classification::TypoInOtherRepo,
        ));
    }

    Some(suggestion(None, current, Classification::NotFound))
}

/// Suggestions for every invalid tag in `provided`, sorted by input
pub fn validate(
    repo_tags: &TagSet,
    other_tags: &TagSet,
    provided: &[String],
    current: Repo,
    other: Repo,
) -> Vec<Suggestion> {
    let mut suggestions: Vec<Suggestion> = provided
        .iter()
        .filter_map(|tag| classify(tag, repo_tags, other_tags, current, other))
        .collect();
    suggestions.sort_by(|a, b| a.input.cmp(&b.input));
    suggestions
}

/// Nearest candidate within [`MAX_TYPO_DISTANCE`]; the first one wins ties
fn closest<'t>(tag: &str, candidates: &'t TagSet) -> Option<&'t str> {
    let mut best: Option<(&str, usize)> = None;
    for candidate in candidates {
        let distance = levenshtein(tag, candidate);
        if distance > MAX_TYPO_DISTANCE {
            continue;
        }
        match best {
            Some((_, best_distance)) if distance >= best_distance => {}
            _ => best = Some((candidate.as_str(), distance)),
        }
    }
    best.map(|(candidate, _)| candidate)
}

/// Levenshtein distance with unit costs, case-sensitive
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();

    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}

/// User-facing report for a set of rejected tags
pub fn render(suggestions: &[Suggestion]) -> String {
    let mut out = String::new();
    out.push_str(&format!("{}\n", "Some tags could not be validated:".red().bold()));

    for s in suggestions {
        out.push_str(&format!("\n  {} {}\n", "✗".red(), s.input.bold()));
        let line = match (&s.kind, &s.suggested) {
            (Classification::ExactMatchInOtherRepo, Some(tag)) => format!(
                "not a {} tag, but {} has it: use {}",
                s.source.label(),
                s.target.label(),
                tag.green()
            ),
            (Classification::TypoInSameRepo, Some(tag))
            | (Classification::TypoInOtherRepo, Some(tag)) => {
                format!("did you mean {} ({})?", tag.green(), s.target.label())
            }
            _ => format!(
                "not found in {} or its counterpart; pass {} to run it anyway",
                s.source.label(),
                "--skip-validation".yellow()
            ),
        };
        out.push_str(&format!("    {}\n", line));
    }

    out
}

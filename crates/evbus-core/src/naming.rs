//! Display names and labels derived from caller input.

use rand::seq::SliceRandom;

const ADJECTIVES: &[&str] = &[
    "brave", "calm", "clever", "eager", "fancy", "gentle", "happy", "jolly", "keen", "lively",
    "merry", "nice", "polite", "quick", "sharp", "swift", "tender", "upbeat", "vivid", "warm",
    "witty", "zesty", "bold", "bright", "crisp", "daring", "epic", "fresh", "grand", "humble",
    "jovial", "kind",
];

const ANIMALS: &[&str] = &[
    "badger", "cat", "dog", "eagle", "falcon", "gopher", "heron", "ibis", "jaguar", "koala",
    "lemur", "moose", "newt", "otter", "panda", "quail", "rabbit", "salmon", "tiger", "urchin",
    "viper", "walrus", "yak", "zebra", "bear", "crane", "duck", "fox", "goose", "hawk", "iguana",
    "jay",
];

/// Generate a human-friendly `adjective-animal` label.
///
/// Labels are for display only and may repeat across sessions.
pub fn generate_display_name() -> String {
    let mut rng = rand::thread_rng();
    let adjective = ADJECTIVES.choose(&mut rng).copied().unwrap_or("brave");
    let animal = ANIMALS.choose(&mut rng).copied().unwrap_or("tiger");
    format!("{adjective}-{animal}")
}

/// Replace control characters that break single-line displays with spaces.
pub fn sanitize_label(raw: &str) -> String {
    raw.replace(['\n', '\t', '\r'], " ")
}

/// Derive a repo name from a working directory.
///
/// Worktree checkouts (`<repo>/.worktrees/<branch>`) resolve to the parent
/// repo. Otherwise the last path component is used, including for a
/// `.worktrees` directory at the filesystem root, so the result is never empty.
pub fn extract_repo_from_cwd(cwd: &str) -> String {
    let trimmed = cwd.trim_end_matches('/');
    let parts: Vec<&str> = trimmed.split('/').collect();

    if let Some(idx) = parts.iter().position(|p| *p == ".worktrees") {
        if idx > 0 && !parts[idx - 1].is_empty() {
            return sanitize_label(parts[idx - 1]);
        }
    }

    match parts.last() {
        Some(last) if !last.is_empty() => sanitize_label(last),
        _ => "unknown".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_name_shape() {
        let name = generate_display_name();
        let (adjective, animal) = name.split_once('-').unwrap();
        assert!(ADJECTIVES.contains(&adjective), "got: {name}");
        assert!(ANIMALS.contains(&animal), "got: {name}");
    }

    #[test]
    fn word_lists_are_sized() {
        assert_eq!(ADJECTIVES.len(), 32);
        assert_eq!(ANIMALS.len(), 32);
    }

    #[test]
    fn repo_from_plain_path() {
        assert_eq!(extract_repo_from_cwd("/home/me/code/tron"), "tron");
        assert_eq!(extract_repo_from_cwd("/home/me/code/tron/"), "tron");
    }

    #[test]
    fn repo_from_worktree() {
        assert_eq!(
            extract_repo_from_cwd("/home/me/code/tron/.worktrees/feature-x"),
            "tron"
        );
    }

    #[test]
    fn worktree_at_root_uses_branch_dir() {
        assert_eq!(extract_repo_from_cwd("/.worktrees/x"), "x");
        assert_eq!(extract_repo_from_cwd("/.worktrees/"), ".worktrees");
    }

    #[test]
    fn repo_from_root_or_empty() {
        assert_eq!(extract_repo_from_cwd("/"), "unknown");
        assert_eq!(extract_repo_from_cwd(""), "unknown");
    }

    #[test]
    fn repo_is_sanitized() {
        assert_eq!(extract_repo_from_cwd("/tmp/bad\nname"), "bad name");
        assert_eq!(extract_repo_from_cwd("/tmp/tab\there"), "tab here");
    }

    #[test]
    fn sanitize_replaces_each_control_char() {
        assert_eq!(sanitize_label("a\nb\tc\rd"), "a b c d");
        assert_eq!(sanitize_label("clean"), "clean");
    }
}

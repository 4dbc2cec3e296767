//! Deterministic collection naming.

/// Derive the collection name for one repository snapshot.
///
/// Pure function of `(repo, rev, commit)` where `rev` is a PR marker
/// (`pr42`) or branch name. Components are lower-cased and every run of
/// characters outside `[a-z0-9]` collapses to a single `-`, so the result
/// is a legal identifier for the backing store. Components are joined with
/// `--`, which cannot appear inside a normalized component, so distinct
/// inputs never collide on the separator.
#[must_use]
pub fn collection_name(repo: &str, rev: &str, commit: &str) -> String {
    format!(
        "lore--{}--{}--{}",
        normalize(repo),
        normalize(rev),
        normalize(commit)
    )
}

fn normalize(component: &str) -> String {
    let mut out = String::with_capacity(component.len());
    let mut last_dash = false;
    for c in component.chars().flat_map(char::to_lowercase) {
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            out.push(c);
            last_dash = false;
        } else if !last_dash {
            out.push('-');
            last_dash = true;
        }
    }
    out.trim_matches('-').to_string()
}

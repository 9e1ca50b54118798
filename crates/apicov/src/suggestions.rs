//! "Did you mean" suggestions for undeclared endpoints

/// Minimum normalized Levenshtein similarity between two paths.
pub const SIMILARITY_THRESHOLD: f64 = 0.7;

/// Declared keys similar to `extra`: same method, similar path, best first.
pub fn suggest_similar_endpoints<'a>(
    extra: &str,
    declared: impl IntoIterator<Item = &'a str>,
    limit: usize,
) -> Vec<&'a str> {
    let Some((method, path)) = extra.split_once(' ') else {
        return Vec::new();
    };

    let mut scored: Vec<(f64, &str)> = declared
        .into_iter()
        .filter_map(|candidate| {
            let (m, p) = candidate.split_once(' ')?;
            if m != method || candidate == extra {
                return None;
            }
            let score = strsim::normalized_levenshtein(path, p);
            (score >= SIMILARITY_THRESHOLD).then_some((score, candidate))
        })
        .collect();

    scored.sort_by(|a, b| b.0.total_cmp(&a.0));
    scored.into_iter().take(limit).map(|(_, c)| c).collect()
}

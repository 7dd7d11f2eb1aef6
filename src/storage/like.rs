//! SQL `LIKE` pattern matching for task-family lookups
//!
//! `%` matches any run of characters (including none), `_` matches exactly
//! one character, everything else matches literally. Matching is
//! case-sensitive.

/// Match `text` against a SQL `LIKE` pattern
///
/// ```rust
/// use phewas_engine::storage::like_match;
///
/// assert!(like_match("task%_logistic", "task0_logistic"));
/// assert!(like_match("task_", "task3"));
/// assert!(!like_match("task_", "task12"));
/// ```
#[must_use]
pub fn like_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();

    // Greedy two-pointer matching with backtracking to the last '%'
    let (mut pi, mut ti) = (0usize, 0usize);
    let mut star: Option<usize> = None;
    let mut star_ti = 0usize;

    while ti < t.len() {
        if pi < p.len() && (p[pi] == '_' || (p[pi] != '%' && p[pi] == t[ti])) {
            pi += 1;
            ti += 1;
        } else if pi < p.len() && p[pi] == '%' {
            star = Some(pi);
            star_ti = ti;
            pi += 1;
        } else if let Some(s) = star {
            pi = s + 1;
            star_ti += 1;
            ti = star_ti;
        } else {
            return false;
        }
    }

    p[pi..].iter().all(|&c| c == '%')
}

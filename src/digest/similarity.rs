//! Word-level near-duplicate detection for bullet text.

fn tokens(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn lcs_len(a: &[String], b: &[String]) -> usize {
    if a.is_empty() || b.is_empty() {
        return 0;
    }
    let mut prev = vec![0usize; b.len() + 1];
    let mut row = vec![0usize; b.len() + 1];
    for x in a {
        for (j, y) in b.iter().enumerate() {
            row[j + 1] = if x == y {
                prev[j] + 1
            } else {
                row[j].max(prev[j + 1])
            };
        }
        std::mem::swap(&mut prev, &mut row);
    }
    prev[b.len()]
}

/// `2 * LCS / (|a| + |b|)` over lowercased word tokens, in `[0, 1]`.
/// Symmetric; two texts without any words compare as identical.
pub fn ratio(a: &str, b: &str) -> f64 {
    let (ta, tb) = (tokens(a), tokens(b));
    let total = ta.len() + tb.len();
    if total == 0 {
        return 1.0;
    }
    (2 * lcs_len(&ta, &tb)) as f64 / total as f64
}

pub fn is_duplicate(a: &str, b: &str, threshold: f64) -> bool {
    ratio(a, b) >= threshold
}

#[cfg(test)]
mod tests {
    use super::{is_duplicate, ratio};

    #[test]
    fn identical_text_ignores_case_and_punctuation() {
        assert_eq!(ratio("Node v5.0 released!", "node v5 0 released"), 1.0);
    }

    #[test]
    fn ratio_is_symmetric() {
        let a = "Sigma bridge audit completed by the core team";
        let b = "Core team completed the bridge audit";
        assert_eq!(ratio(a, b), ratio(b, a));
    }

    #[test]
    fn paraphrase_with_small_edit_is_duplicate() {
        let a = "Node 5.0.20 released with faster sync";
        let b = "Node 5.0.20 released with much faster sync";
        assert!(is_duplicate(a, b, 0.7));
    }

    #[test]
    fn unrelated_bullets_are_distinct() {
        let a = "Node 5.0.20 released with faster sync";
        let b = "Community call moved to Thursday";
        assert!(!is_duplicate(a, b, 0.7));
        assert_eq!(ratio(a, b), 0.0);
    }

    #[test]
    fn threshold_is_inclusive() {
        // 3 shared of 4+4 tokens -> 0.75
        let a = "alpha beta gamma delta";
        let b = "alpha beta gamma omega";
        assert_eq!(ratio(a, b), 0.75);
        assert!(is_duplicate(a, b, 0.75));
        assert!(!is_duplicate(a, b, 0.76));
    }
}

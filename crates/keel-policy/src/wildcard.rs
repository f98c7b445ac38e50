//! Glob-style matching: `*` matches any run of characters (including none),
//! `?` matches exactly one.

pub fn wildcard_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();

    let (mut p, mut t) = (0, 0);
    // Position of the last `*` seen and the text index it was tried against.
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() && (pattern[p] == '?' || pattern[p] == text[t]) {
            p += 1;
            t += 1;
        } else if p < pattern.len() && pattern[p] == '*' {
            backtrack = Some((p, t));
            p += 1;
        } else if let Some((star, matched)) = backtrack {
            p = star + 1;
            t = matched + 1;
            backtrack = Some((star, matched + 1));
        } else {
            return false;
        }
    }

    pattern[p..].iter().all(|&c| c == '*')
}

#[cfg(test)]
mod tests {
    use super::wildcard_match;

    #[test]
    fn literal_patterns_need_exact_match() {
        assert!(wildcard_match("nginx", "nginx"));
        assert!(!wildcard_match("nginx", "nginx-1"));
        assert!(!wildcard_match("nginx", ""));
    }

    #[test]
    fn star_matches_any_run() {
        assert!(wildcard_match("*", ""));
        assert!(wildcard_match("*", "anything"));
        assert!(wildcard_match("web-*", "web-"));
        assert!(wildcard_match("web-*", "web-frontend"));
        assert!(wildcard_match("*-db-*", "orders-db-primary"));
        assert!(!wildcard_match("web-*", "api-frontend"));
    }

    #[test]
    fn question_mark_matches_one_char() {
        assert!(wildcard_match("pod-?", "pod-1"));
        assert!(!wildcard_match("pod-?", "pod-12"));
        assert!(!wildcard_match("pod-?", "pod-"));
    }

    #[test]
    fn star_backtracks() {
        assert!(wildcard_match("a*b*c", "axxbyyc"));
        assert!(wildcard_match("a*bc", "abcbc"));
        assert!(!wildcard_match("a*bc", "abcbd"));
    }
}

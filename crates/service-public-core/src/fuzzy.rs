//! Fuzzy string similarity on a 0–100 scale.
//!
//! [`partial_ratio`] is the workhorse: it scores how well the shorter
//! string matches its best-aligned window inside the longer one, which is
//! what lets a short query like `"passeport"` score highly against a long
//! title like `"Renouvellement de passeport"`.
//!
//! Both functions operate on `char`s, so accented text is compared
//! per character rather than per UTF-8 byte.

/// Similarity of two whole strings, `0.0..=100.0`.
///
/// Two empty strings are identical (`100.0`).
pub fn ratio(a: &str, b: &str) -> f64 {
    strsim::normalized_levenshtein(a, b) * 100.0
}

/// Best similarity between the shorter string and any same-length window
/// of the longer string, `0.0..=100.0`.
///
/// Returns `0.0` when exactly one side is empty and `100.0` when the
/// shorter string occurs verbatim inside the longer.
pub fn partial_ratio(a: &str, b: &str) -> f64 {
    let (shorter, longer) = if a.chars().count() <= b.chars().count() {
        (a, b)
    } else {
        (b, a)
    };

    if shorter.is_empty() {
        return if longer.is_empty() { 100.0 } else { 0.0 };
    }
    if longer.contains(shorter) {
        return 100.0;
    }

    let longer_chars: Vec<char> = longer.chars().collect();
    let width = shorter.chars().count();

    let mut best = 0.0_f64;
    for start in 0..=(longer_chars.len() - width) {
        let window: String = longer_chars[start..start + width].iter().collect();
        let score = ratio(shorter, &window);
        if score > best {
            best = score;
        }
    }
    best
}

//! Edit-distance similarity on a 0–100 scale.
//!
//! Distances are computed over `char`s, not bytes, so accented titles
//! compare the way they read.

/// Levenshtein distance with a two-row DP.
pub fn levenshtein(a: &str, b: &str) -> usize {
    let b_chars: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b_chars.len();
    }

    let mut prev: Vec<usize> = (0..=b_chars.len()).collect();
    let mut curr = vec![0; b_chars.len() + 1];

    for (i, ac) in a.chars().enumerate() {
        curr[0] = i + 1;
        for (j, bc) in b_chars.iter().enumerate() {
            let cost = usize::from(ac != *bc);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b_chars.len()]
}

/// Similarity in `0.0..=100.0`: 100 for identical strings, 0 when every
/// character has to change.
pub fn ratio(a: &str, b: &str) -> f32 {
    let longest = a.chars().count().max(b.chars().count());
    if longest == 0 {
        return 100.0;
    }
    let distance = levenshtein(a, b);
    100.0 * (1.0 - distance as f32 / longest as f32)
}

/// Best [`ratio`] between the shorter string and every equally long
/// window of the longer one.
///
/// This rewards a short query that appears, possibly misspelled, inside a
/// long title.
pub fn partial_ratio(a: &str, b: &str) -> f32 {
    let (short, long) = if a.chars().count() <= b.chars().count() {
        (a, b)
    } else {
        (b, a)
    };
    let short_len = short.chars().count();
    if short_len == 0 {
        return if long.is_empty() { 100.0 } else { 0.0 };
    }

    let long_chars: Vec<char> = long.chars().collect();
    let mut best = 0.0f32;
    for window in long_chars.windows(short_len) {
        let candidate: String = window.iter().collect();
        let score = ratio(short, &candidate);
        if score > best {
            best = score;
            if best >= 100.0 {
                break;
            }
        }
    }
    best
}

//! Fractional-index assignment (`spec.md` §4.E, §9).
//!
//! Every row admitted into the top-K window is stamped with a short,
//! lexicographically comparable string placing it between its neighbours.
//! The midpoint algorithm below is the standard "fractional indexing"
//! construction (as used by, e.g., Figma's and Replicache's ordering
//! schemes): find the longest common prefix of the two bounds, then pick a
//! digit strictly between the bounds' next digit, extending the string by
//! one character only when the two digits are already adjacent.

/// Returns a string strictly between `lower` and `upper` under lexicographic
/// order, as short as possible. `None` means "no bound on this side" (before
/// the first row / after the last row).
pub fn index_between(lower: Option<&str>, upper: Option<&str>, alphabet: &str) -> String {
    let digits: Vec<char> = alphabet.chars().collect();
    debug_assert!(!digits.is_empty());
    match (lower, upper) {
        (None, None) => digits[digits.len() / 2].to_string(),
        (None, Some(u)) => midpoint("", Some(u), &digits),
        (Some(l), None) => midpoint(l, None, &digits),
        (Some(l), Some(u)) => midpoint(l, Some(u), &digits),
    }
}

fn digit_index(digits: &[char], c: char) -> usize {
    digits.iter().position(|&d| d == c).unwrap_or(0)
}

fn midpoint(lower: &str, upper: Option<&str>, digits: &[char]) -> String {
    let zero = digits[0];

    if let Some(upper) = upper {
        let mut n = 0;
        loop {
            let a_char = lower.chars().nth(n).unwrap_or(zero);
            match upper.chars().nth(n) {
                Some(b_char) if b_char == a_char => n += 1,
                _ => break,
            }
        }
        if n > 0 {
            let prefix: String = upper.chars().take(n).collect();
            let a_rest: String = lower.chars().skip(n).collect();
            let b_rest: String = upper.chars().skip(n).collect();
            return prefix + &midpoint(&a_rest, Some(&b_rest), digits);
        }
    }

    let digit_a = if lower.is_empty() { 0 } else { digit_index(digits, lower.chars().next().unwrap()) };
    let digit_b = match upper {
        Some(u) if !u.is_empty() => digit_index(digits, u.chars().next().unwrap()),
        _ => digits.len(),
    };

    if digit_b.saturating_sub(digit_a) > 1 {
        let mid = digit_a + (digit_b - digit_a) / 2;
        digits[mid].to_string()
    } else {
        match upper {
            Some(u) if u.chars().count() > 1 => u.chars().take(1).collect(),
            _ => {
                let rest: String = if lower.is_empty() { String::new() } else { lower.chars().skip(1).collect() };
                format!("{}{}", digits[digit_a], midpoint(&rest, None, digits))
            }
        }
    }
}

/// Evenly respaces `n` fresh indexes across the whole alphabet space. Used
/// when a gap between two neighbours has grown so tight that minting one
/// more index there would blow past the configured rebalance threshold
/// (`spec.md` §9: "reserve a rebalance threshold").
pub fn rebalance(n: usize, alphabet: &str) -> Vec<String> {
    if n == 0 {
        return Vec::new();
    }
    let digits: Vec<char> = alphabet.chars().collect();
    let base = digits.len() as f64;
    let digits_needed = (((n + 1) as f64).log(base).ceil() as usize + 2).max(1);
    (0..n)
        .map(|i| {
            let mut pos = (i + 1) as f64 / (n + 1) as f64;
            let mut out = String::new();
            for _ in 0..digits_needed {
                pos *= base;
                let d = (pos.floor() as usize).min(digits.len() - 1);
                out.push(digits[d]);
                pos -= pos.floor();
            }
            out
        })
        .collect()
}

/// The character-gap length between two lexicographically adjacent index
/// strings one rank apart; used by the top-K operator to decide whether a
/// freshly-minted index is dense enough to warrant a rebalance on the next
/// opportunity (`spec.md` §9).
pub fn gap_length(lower: Option<&str>, upper: Option<&str>) -> usize {
    index_between(lower, upper, crate::config::DEFAULT_ALPHABET).len()
}

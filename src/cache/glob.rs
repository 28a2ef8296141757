//! Redis-compatible glob matching for key patterns.
//!
//! Supports `*`, `?`, `[...]` classes (with `^` negation and `a-z` ranges)
//! and `\` escapes, so the memory store selects exactly the keys a Redis
//! `SCAN MATCH` would.

pub fn glob_match(pattern: &str, candidate: &str) -> bool {
    matches(pattern.as_bytes(), candidate.as_bytes())
}

fn matches(pattern: &[u8], text: &[u8]) -> bool {
    let mut p = 0;
    let mut t = 0;
    // Last `*` seen and the text position it is currently absorbing up to.
    let mut star: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() && pattern[p] == b'*' {
            star = Some((p, t));
            p += 1;
            continue;
        }

        if p < pattern.len()
            && let Some(next) = step(pattern, p, text[t])
        {
            p = next;
            t += 1;
            continue;
        }

        match star {
            Some((star_p, star_t)) => {
                p = star_p + 1;
                t = star_t + 1;
                star = Some((star_p, star_t + 1));
            }
            None => return false,
        }
    }

    while p < pattern.len() && pattern[p] == b'*' {
        p += 1;
    }
    p == pattern.len()
}

/// Match one text byte against the pattern token at `p`, returning the index
/// of the next token on success.
fn step(pattern: &[u8], p: usize, byte: u8) -> Option<usize> {
    match pattern[p] {
        b'?' => Some(p + 1),
        b'[' => match_class(pattern, p + 1, byte),
        b'\\' if p + 1 < pattern.len() => (pattern[p + 1] == byte).then_some(p + 2),
        c => (c == byte).then_some(p + 1),
    }
}

fn match_class(pattern: &[u8], mut p: usize, byte: u8) -> Option<usize> {
    let negate = pattern.get(p) == Some(&b'^');
    if negate {
        p += 1;
    }

    let mut matched = false;
    loop {
        match pattern.get(p) {
            // An unterminated class closes at the end of the pattern.
            None => break,
            Some(b']') => {
                p += 1;
                break;
            }
            Some(b'\\') if p + 1 < pattern.len() => {
                matched |= pattern[p + 1] == byte;
                p += 2;
            }
            Some(&low)
                if pattern.get(p + 1) == Some(&b'-')
                    && p + 2 < pattern.len()
                    && pattern[p + 2] != b']' =>
            {
                let high = pattern[p + 2];
                let (low, high) = if low > high { (high, low) } else { (low, high) };
                matched |= (low..=high).contains(&byte);
                p += 3;
            }
            Some(&c) => {
                matched |= c == byte;
                p += 1;
            }
        }
    }

    (matched != negate).then_some(p)
}

//! Glob patterns as understood by `KEYS` / `SCAN MATCH`.

/// Escapes glob metacharacters so `text` matches only itself.
#[must_use]
pub fn escape_glob(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Matches `key` against a glob pattern.
///
/// Supports `*`, `?`, character classes (`[abc]`, `[a-z]`, `[^x]`) and
/// backslash escapes. An unterminated `[` matches itself.
#[must_use]
pub fn glob_match(pattern: &str, key: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let key: Vec<char> = key.chars().collect();

    let (mut pi, mut ki) = (0usize, 0usize);
    // (pattern index after the last star, key index that star currently absorbs up to)
    let mut backtrack: Option<(usize, usize)> = None;

    while ki < key.len() {
        if pi < pattern.len() && pattern[pi] == '*' {
            backtrack = Some((pi + 1, ki));
            pi += 1;
            continue;
        }
        if pi < pattern.len() {
            if let Some(next) = match_single(&pattern, pi, key[ki]) {
                pi = next;
                ki += 1;
                continue;
            }
        }
        match backtrack {
            Some((star_next, absorbed)) => {
                pi = star_next;
                ki = absorbed + 1;
                backtrack = Some((star_next, absorbed + 1));
            }
            None => return false,
        }
    }

    while pi < pattern.len() && pattern[pi] == '*' {
        pi += 1;
    }
    pi == pattern.len()
}

/// Matches one non-star token at `pi` against `c`, returning the index of
/// the following token on success.
fn match_single(pattern: &[char], pi: usize, c: char) -> Option<usize> {
    match pattern[pi] {
        '?' => Some(pi + 1),
        '\\' if pi + 1 < pattern.len() => (pattern[pi + 1] == c).then_some(pi + 2),
        '[' => match match_class(pattern, pi, c) {
            Some((true, next)) => Some(next),
            Some((false, _)) => None,
            None => (c == '[').then_some(pi + 1),
        },
        literal => (literal == c).then_some(pi + 1),
    }
}

/// Evaluates the character class opening at `start`.
///
/// Returns `(matched, index after ']')`, or `None` if the class is unterminated.
fn match_class(pattern: &[char], start: usize, c: char) -> Option<(bool, usize)> {
    let mut i = start + 1;
    let negate = pattern.get(i) == Some(&'^');
    if negate {
        i += 1;
    }

    let mut matched = false;
    let mut first = true;
    while i < pattern.len() {
        let mut current = pattern[i];
        if current == ']' && !first {
            return Some((matched != negate, i + 1));
        }
        first = false;
        if current == '\\' && i + 1 < pattern.len() {
            i += 1;
            current = pattern[i];
        }
        if i + 2 < pattern.len() && pattern[i + 1] == '-' && pattern[i + 2] != ']' {
            let (low, high) = if current <= pattern[i + 2] {
                (current, pattern[i + 2])
            } else {
                (pattern[i + 2], current)
            };
            if (low..=high).contains(&c) {
                matched = true;
            }
            i += 3;
        } else {
            if current == c {
                matched = true;
            }
            i += 1;
        }
    }
    None
}

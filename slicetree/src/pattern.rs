//! Graphite-style glob patterns for one path component.
//!
//! Supported syntax:
//!
//! - `*` any run of characters (including none)
//! - `?` exactly one character
//! - `[abc]`, `[a-z]`, `[!a-z]` / `[^a-z]` character classes
//! - `{foo,bar}` alternation (may nest)
//!
//! Patterns never match across `.`; callers split dotted patterns into
//! components first.

use crate::error::ValidationError;

/// Upper bound on the alternatives one component may expand into.
const MAX_ALTERNATIVES: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Literal(char),
    AnyChar,
    AnyRun,
    Class { negated: bool, ranges: Vec<(char, char)> },
}

impl Token {
    fn matches(&self, c: char) -> bool {
        match self {
            Self::Literal(expected) => *expected == c,
            Self::AnyChar | Self::AnyRun => true,
            Self::Class { negated, ranges } => {
                ranges.iter().any(|(lo, hi)| (*lo..=*hi).contains(&c)) != *negated
            }
        }
    }
}

/// A compiled glob for one path component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobPattern {
    source: String,
    alternatives: Vec<Vec<Token>>,
}

impl GlobPattern {
    /// Compiles a component pattern.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidPattern`] for unbalanced braces or
    /// brackets, or an empty component.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use slicetree::pattern::GlobPattern;
    ///
    /// let pattern = GlobPattern::new("cpu{0,1}_[a-c]*").unwrap();
    /// assert!(pattern.is_match("cpu1_busy"));
    /// assert!(!pattern.is_match("cpu2_busy"));
    /// ```
    pub fn new(pattern: &str) -> Result<Self, ValidationError> {
        let invalid = |reason| ValidationError::InvalidPattern {
            pattern: pattern.to_string(),
            reason,
        };
        if pattern.is_empty() {
            return Err(invalid("empty component"));
        }
        if pattern.contains('.') {
            return Err(invalid("component contains '.'"));
        }

        let alternatives = expand_braces(pattern)
            .map_err(invalid)?
            .iter()
            .map(|alternative| tokenize(alternative).map_err(invalid))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            source: pattern.to_string(),
            alternatives,
        })
    }

    /// The pattern text.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Whether the pattern contains no wildcards, so it matches exactly one
    /// name.
    pub fn is_literal(&self) -> bool {
        self.alternatives.len() == 1
            && self.alternatives[0]
                .iter()
                .all(|token| matches!(token, Token::Literal(_)))
    }

    /// Whether `name` matches the pattern.
    pub fn is_match(&self, name: &str) -> bool {
        let chars: Vec<char> = name.chars().collect();
        self.alternatives
            .iter()
            .any(|tokens| match_tokens(tokens, &chars))
    }
}

/// Splits a dotted pattern into compiled components.
///
/// # Errors
///
/// Returns [`ValidationError::InvalidPattern`] if any component is empty or
/// malformed.
pub fn compile_path_pattern(pattern: &str) -> Result<Vec<GlobPattern>, ValidationError> {
    split_components(pattern)
        .map_err(|reason| ValidationError::InvalidPattern {
            pattern: pattern.to_string(),
            reason,
        })?
        .into_iter()
        .map(GlobPattern::new)
        .collect()
}

/// Splits on dots that are not inside `{...}`.
fn split_components(pattern: &str) -> Result<Vec<&str>, &'static str> {
    let mut components = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in pattern.char_indices() {
        match c {
            '{' => depth += 1,
            '}' => depth = depth.checked_sub(1).ok_or("unbalanced '}'")?,
            '.' if depth == 0 => {
                components.push(&pattern[start..i]);
                start = i + 1;
            }
            '.' => return Err("'.' inside braces"),
            _ => {}
        }
    }
    components.push(&pattern[start..]);
    if components.iter().any(|component| component.is_empty()) {
        return Err("empty component");
    }
    Ok(components)
}

/// Expands `{a,b}` alternation into plain glob strings.
fn expand_braces(pattern: &str) -> Result<Vec<String>, &'static str> {
    let Some(open) = pattern.find('{') else {
        if pattern.contains('}') {
            return Err("unbalanced '}'");
        }
        return Ok(vec![pattern.to_string()]);
    };

    let mut depth = 0usize;
    let mut close = None;
    let mut splits = Vec::new();
    for (i, c) in pattern[open..].char_indices() {
        let i = open + i;
        match c {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    close = Some(i);
                    break;
                }
            }
            ',' if depth == 1 => splits.push(i),
            _ => {}
        }
    }
    let close = close.ok_or("unbalanced '{'")?;

    let prefix = &pattern[..open];
    let suffix = &pattern[close + 1..];
    let mut bounds = vec![open];
    bounds.extend(splits);
    bounds.push(close);

    let mut expanded = Vec::new();
    for pair in bounds.windows(2) {
        let choice = &pattern[pair[0] + 1..pair[1]];
        expanded.extend(expand_braces(&format!("{prefix}{choice}{suffix}"))?);
        if expanded.len() > MAX_ALTERNATIVES {
            return Err("too many brace alternatives");
        }
    }
    Ok(expanded)
}

fn tokenize(pattern: &str) -> Result<Vec<Token>, &'static str> {
    let mut tokens = Vec::new();
    let mut chars = pattern.chars().peekable();

    while let Some(c) = chars.next() {
        let token = match c {
            // Consecutive stars match the same as one.
            '*' if tokens.last() == Some(&Token::AnyRun) => continue,
            '*' => Token::AnyRun,
            '?' => Token::AnyChar,
            '[' => {
                let negated = chars.next_if(|c| *c == '!' || *c == '^').is_some();
                let mut ranges = Vec::new();
                loop {
                    let lo = chars.next().ok_or("unbalanced '['")?;
                    if lo == ']' && !ranges.is_empty() {
                        break;
                    }
                    if chars.next_if_eq(&'-').is_none() {
                        ranges.push((lo, lo));
                        continue;
                    }
                    match chars.next_if(|c| *c != ']') {
                        Some(hi) if lo > hi => return Err("reversed character range"),
                        Some(hi) => ranges.push((lo, hi)),
                        // A trailing '-' is literal.
                        None => ranges.extend([(lo, lo), ('-', '-')]),
                    }
                }
                Token::Class { negated, ranges }
            }
            ']' => return Err("unbalanced ']'"),
            other => Token::Literal(other),
        };
        tokens.push(token);
    }
    Ok(tokens)
}

/// Wildcard match that only ever resumes from the most recent `*`, so it
/// runs in `O(tokens * name)`.
fn match_tokens(tokens: &[Token], name: &[char]) -> bool {
    let (mut t, mut n) = (0, 0);
    // Token index after the last `*`, and the name index it currently covers up to.
    let mut resume: Option<(usize, usize)> = None;

    while n < name.len() {
        match tokens.get(t) {
            Some(Token::AnyRun) => {
                t += 1;
                resume = Some((t, n));
            }
            Some(token) if token.matches(name[n]) => {
                t += 1;
                n += 1;
            }
            _ => match resume {
                Some((after_star, covered)) => {
                    t = after_star;
                    n = covered + 1;
                    resume = Some((after_star, n));
                }
                None => return false,
            },
        }
    }
    tokens[t..].iter().all(|token| *token == Token::AnyRun)
}

//! Path and branch glob patterns in CI filter syntax.
//!
//! `**` matches any run of characters including `/`, `*` any run
//! excluding `/`, `?` a single non-`/` character and `[...]` a character
//! class. A leading `!` negates the pattern. Patterns are anchored.

use regex::Regex;
use tripwire_core::{Error, Result};

/// A single compiled glob pattern.
#[derive(Debug, Clone)]
pub struct PathPattern {
    source: String,
    negated: bool,
    regex: Regex,
}

impl PathPattern {
    pub fn new(pattern: &str) -> Result<Self> {
        let (negated, body) = match pattern.strip_prefix('!') {
            Some(rest) => (true, rest),
            None => (false, pattern),
        };
        if body.is_empty() {
            return Err(invalid(pattern, "empty pattern"));
        }

        let translated = translate(pattern, body)?;
        let regex = Regex::new(&translated).map_err(|e| invalid(pattern, &e.to_string()))?;

        Ok(Self {
            source: pattern.to_string(),
            negated,
            regex,
        })
    }

    /// Whether `text` matches the pattern body, ignoring negation.
    pub fn is_match(&self, text: &str) -> bool {
        self.regex.is_match(normalize(text))
    }

    pub fn is_negated(&self) -> bool {
        self.negated
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

fn invalid(pattern: &str, reason: &str) -> Error {
    Error::InvalidPattern {
        pattern: pattern.to_string(),
        reason: reason.to_string(),
    }
}

fn normalize(text: &str) -> &str {
    text.strip_prefix("./").unwrap_or(text)
}

fn translate(pattern: &str, body: &str) -> Result<String> {
    let chars: Vec<char> = body.chars().collect();
    let mut out = String::with_capacity(body.len() * 2 + 2);
    out.push('^');

    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '*' if chars.get(i + 1) == Some(&'*') => {
                i += 2;
                if chars.get(i) == Some(&'/') {
                    // `**/x` also matches `x` at the root.
                    out.push_str("(?:.*/)?");
                    i += 1;
                } else {
                    out.push_str(".*");
                }
                continue;
            }
            '*' => out.push_str("[^/]*"),
            '?' => out.push_str("[^/]"),
            '[' => {
                let close = chars[i + 1..]
                    .iter()
                    .skip(1)
                    .position(|&c| c == ']')
                    .map(|p| i + 2 + p)
                    .ok_or_else(|| invalid(pattern, "unclosed character class"))?;
                out.push('[');
                let mut class = &chars[i + 1..close];
                if let Some(('!', rest)) = class.split_first().map(|(c, r)| (*c, r)) {
                    out.push('^');
                    class = rest;
                }
                for (j, &c) in class.iter().enumerate() {
                    // `&&`, `--` and `~~` are set operators inside a regex class.
                    let doubled_dash = c == '-'
                        && (class.get(j + 1) == Some(&'-')
                            || (j > 0 && class.get(j - 1) == Some(&'-')));
                    if matches!(c, '\\' | '[' | '&' | '~') || doubled_dash {
                        out.push('\\');
                    }
                    out.push(c);
                }
                out.push(']');
                i = close;
            }
            '\\' => {
                let escaped = chars
                    .get(i + 1)
                    .ok_or_else(|| invalid(pattern, "trailing escape"))?;
                out.push_str(&regex::escape(&escaped.to_string()));
                i += 1;
            }
            c => out.push_str(&regex::escape(&c.to_string())),
        }
        i += 1;
    }

    out.push('$');
    Ok(out)
}

/// Inclusion and exclusion patterns evaluated together.
#[derive(Debug, Clone, Default)]
pub struct GlobFilter {
    include: Vec<PathPattern>,
    exclude: Vec<PathPattern>,
}

impl GlobFilter {
    /// Compile `patterns` (negated entries become exclusions) plus extra
    /// exclusion patterns such as `paths_ignore`.
    pub fn compile(patterns: &[String], ignore: &[String]) -> Result<Self> {
        let mut filter = GlobFilter::default();
        for raw in patterns {
            let pattern = PathPattern::new(raw)?;
            if pattern.is_negated() {
                filter.exclude.push(pattern);
            } else {
                filter.include.push(pattern);
            }
        }
        for raw in ignore {
            let body = raw.strip_prefix('!').unwrap_or(raw);
            filter.exclude.push(PathPattern::new(body)?);
        }
        Ok(filter)
    }

    pub fn is_empty(&self) -> bool {
        self.include.is_empty() && self.exclude.is_empty()
    }

    /// Whether a single name (a branch) passes the filter.
    pub fn allows_name(&self, name: &str) -> bool {
        let included = self.include.is_empty() || self.include.iter().any(|p| p.is_match(name));
        included && !self.exclude.iter().any(|p| p.is_match(name))
    }

    /// Whether a set of changed paths passes the filter: at least one path
    /// matches an inclusion pattern and no path matches an exclusion.
    pub fn allows_changes(&self, changed: &[String]) -> bool {
        if self.is_empty() {
            return true;
        }

        let included = self.include.is_empty()
            || changed
                .iter()
                .any(|path| self.include.iter().any(|p| p.is_match(path)));

        let excluded = changed
            .iter()
            .any(|path| self.exclude.iter().any(|p| p.is_match(path)));

        included && !excluded
    }
}

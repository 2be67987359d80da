//! Back-reference templates for rule replacements.
//!
//! Rule tables are written with positional back-references (`\1`, `\2`, ...),
//! the form used by most published identifier rule sets. `$1` and `${1}` are
//! accepted as well. Templates are translated once into the `${n}` expansion
//! syntax understood by [`regex::Captures::expand`], and every group index is
//! recorded so the owning rule can reject references to groups its pattern
//! does not define.

use regex::Regex;

/// Highest back-reference index a template may spell out (`\99`).
const MAX_GROUP_DIGITS: usize = 2;

/// A parsed replacement template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Template {
    source: String,
    expansion: String,
    max_group: Option<usize>,
}

impl Template {
    /// Parses a template written with `\n`, `$n` or `${n}` back-references.
    ///
    /// `\\` produces a literal backslash and a `$` that does not start a
    /// numeric reference is kept literally.
    pub(crate) fn parse(source: &str) -> Self {
        let mut expansion = String::with_capacity(source.len() + 8);
        let mut max_group: Option<usize> = None;
        let mut chars = source.char_indices().peekable();

        while let Some((idx, ch)) = chars.next() {
            match ch {
                '\\' | '$' => {
                    let rest = &source[idx + 1..];
                    let (group, consumed) = if ch == '$' && rest.starts_with('{') {
                        braced_group(rest)
                    } else {
                        leading_group(rest)
                    };

                    if let Some(group) = group {
                        expansion.push_str(&format!("${{{group}}}"));
                        max_group = Some(max_group.map_or(group, |m| m.max(group)));
                        for _ in 0..consumed {
                            chars.next();
                        }
                    } else if ch == '\\' && rest.starts_with('\\') {
                        expansion.push('\\');
                        chars.next();
                    } else if ch == '$' {
                        expansion.push_str("$$");
                    } else {
                        expansion.push('\\');
                    }
                }
                other => expansion.push(other),
            }
        }

        Self {
            source: source.to_string(),
            expansion,
            max_group,
        }
    }

    /// The template as written in the rule table.
    pub(crate) fn source(&self) -> &str {
        &self.source
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.source.is_empty()
    }

    /// Checks every back-reference against the groups `pattern` defines.
    ///
    /// Returns the first offending group index on failure.
    pub(crate) fn check_groups(&self, pattern: &Regex) -> Result<(), usize> {
        // captures_len() counts the implicit whole-match group 0
        let available = pattern.captures_len() - 1;
        match self.max_group {
            Some(group) if group > available => Err(group),
            _ => Ok(()),
        }
    }

    /// Substitutes the first match of `pattern` in `input`.
    ///
    /// Text outside the match is kept as is. Returns `None` when the pattern
    /// does not match.
    pub(crate) fn apply(&self, pattern: &Regex, input: &str) -> Option<String> {
        let caps = pattern.captures(input)?;
        let whole = caps.get(0)?;

        let mut out = String::with_capacity(input.len() + self.expansion.len());
        out.push_str(&input[..whole.start()]);
        caps.expand(&self.expansion, &mut out);
        out.push_str(&input[whole.end()..]);
        Some(out)
    }
}

/// Reads up to two leading ASCII digits.
fn leading_group(rest: &str) -> (Option<usize>, usize) {
    let digits: String = rest
        .chars()
        .take(MAX_GROUP_DIGITS)
        .take_while(char::is_ascii_digit)
        .collect();
    if digits.is_empty() {
        return (None, 0);
    }
    (digits.parse().ok(), digits.len())
}

/// Reads a `{n}` group reference.
fn braced_group(rest: &str) -> (Option<usize>, usize) {
    let Some(close) = rest.find('}') else {
        return (None, 0);
    };
    let inner = &rest[1..close];
    if inner.is_empty() || !inner.chars().all(|c| c.is_ascii_digit()) {
        return (None, 0);
    }
    (inner.parse().ok(), close + 1)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_template_translates_backslash_references() {
        let template = Template::parse(r"https://www.geonames.org/\2");
        assert_eq!(template.expansion, "https://www.geonames.org/${2}");
        assert_eq!(template.max_group, Some(2));
    }

    #[test]
    fn test_template_translates_dollar_references() {
        let template = Template::parse("a/$1/${12}");
        assert_eq!(template.expansion, "a/${1}/${12}");
        assert_eq!(template.max_group, Some(12));
    }

    #[test]
    fn test_template_keeps_literal_dollar_and_backslash() {
        let template = Template::parse(r"cost $x \\ \q");
        assert_eq!(template.expansion, r"cost $$x \ \q");
        assert_eq!(template.max_group, None);
    }

    #[test]
    fn test_template_two_digit_limit() {
        // \123 is group 12 followed by a literal 3
        let template = Template::parse(r"\123");
        assert_eq!(template.expansion, "${12}3");
    }

    #[test]
    fn test_template_check_groups_rejects_missing_group() {
        let pattern = Regex::new("^a(b)$").unwrap();
        assert!(Template::parse(r"x\1").check_groups(&pattern).is_ok());
        assert_eq!(Template::parse(r"x\2").check_groups(&pattern), Err(2));
    }

    #[test]
    fn test_template_apply_substitutes_first_match_only() {
        let pattern = Regex::new("o").unwrap();
        let template = Template::parse("0");
        assert_eq!(template.apply(&pattern, "foo").unwrap(), "f0o");
    }

    #[test]
    fn test_template_apply_no_match_returns_none() {
        let pattern = Regex::new("^z").unwrap();
        assert!(Template::parse("y").apply(&pattern, "abc").is_none());
    }

    #[test]
    fn test_template_group_zero_is_whole_match() {
        let pattern = Regex::new("[0-9]+").unwrap();
        let template = Template::parse(r"<\0>");
        assert!(template.check_groups(&pattern).is_ok());
        assert_eq!(template.apply(&pattern, "id 42").unwrap(), "id <42>");
    }
}

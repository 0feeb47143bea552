/// Policy text: parse errors and the line-oriented policy file loader
///
/// One rule per non-empty trimmed line. A leading `!` denies the symbol,
/// anything else permits it.
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PolicyParseError {
    #[error("method rule without '#': {0}")]
    MissingMethodName(String),

    #[error("unterminated parameter list: {0}")]
    UnterminatedParameters(String),

    #[error("empty class or method name: {0}")]
    EmptyName(String),

    #[error("line {line}: {source}")]
    Line {
        line: usize,
        #[source]
        source: Box<PolicyParseError>,
    },

    #[error("{path}: {source}")]
    InFile {
        path: String,
        #[source]
        source: Box<PolicyParseError>,
    },
}

impl PolicyParseError {
    pub fn at_line(self, line: usize) -> Self {
        PolicyParseError::Line {
            line,
            source: Box::new(self),
        }
    }

    pub fn in_file(self, path: &Path) -> Self {
        PolicyParseError::InFile {
            path: path.display().to_string(),
            source: Box::new(self),
        }
    }
}

/// One parsed policy rule
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PolicyRule {
    pub symbol: String,
    pub deny: bool,
}

impl PolicyRule {
    /// Parse a single rule. Returns `None` for lines that are empty after trimming.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        let rule = match line.strip_prefix('!') {
            Some(rest) => PolicyRule {
                symbol: rest.trim().to_string(),
                deny: true,
            },
            None => PolicyRule {
                symbol: line.to_string(),
                deny: false,
            },
        };
        Some(rule)
    }
}

/// Rules from a sequence of lines, paired with their 1-based positions.
/// Blank lines are skipped but still counted.
pub fn number_rules<I, S>(lines: I) -> Vec<(usize, PolicyRule)>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    lines
        .into_iter()
        .enumerate()
        .filter_map(|(index, line)| PolicyRule::parse(line.as_ref()).map(|rule| (index + 1, rule)))
        .collect()
}

/// Rules of a policy document, paired with their 1-based line numbers
pub fn parse_rules(text: &str) -> Vec<(usize, PolicyRule)> {
    number_rules(text.lines())
}

/// Read a policy file, keeping each rule's line number in the file
pub fn read_policy_file(path: &Path) -> std::io::Result<Vec<(usize, PolicyRule)>> {
    let text = std::fs::read_to_string(path)?;
    let rules = parse_rules(&text);
    log::debug!("Loaded {} policy rules from {}", rules.len(), path.display());
    Ok(rules)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_parsing() {
        assert_eq!(
            PolicyRule::parse("  !java.lang.System#exit "),
            Some(PolicyRule {
                symbol: "java.lang.System#exit".to_string(),
                deny: true
            })
        );
        assert_eq!(
            PolicyRule::parse("java.lang"),
            Some(PolicyRule {
                symbol: "java.lang".to_string(),
                deny: false
            })
        );
        assert_eq!(PolicyRule::parse("   "), None);
    }

    #[test]
    fn test_line_numbers_skip_blank_lines() {
        let rules = parse_rules("java.lang\n\n  !java.lang.System#exit\n");
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].0, 1);
        assert_eq!(rules[1].0, 3);
        assert!(rules[1].1.deny);
    }

    #[test]
    fn test_line_error_display() {
        let err = PolicyParseError::UnterminatedParameters("a.Foo#run(int".to_string()).at_line(4);
        assert_eq!(
            err.to_string(),
            "line 4: unterminated parameter list: a.Foo#run(int"
        );
        let err = err.in_file(Path::new("policy.txt"));
        assert_eq!(
            err.to_string(),
            "policy.txt: line 4: unterminated parameter list: a.Foo#run(int"
        );
    }

    #[test]
    fn test_numbering_counts_blank_entries() {
        let rules = number_rules(["", "a.b", "   ", "!a.b.C"]);
        let lines: Vec<usize> = rules.iter().map(|(line, _)| *line).collect();
        assert_eq!(lines, vec![2, 4]);
    }
}

// Source pattern counts attached to every report.
// Informational only: nothing here influences verdicts.

use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;

const PATTERNS: &[(&str, &str)] = &[
    ("for_loops", r"\bfor\s*\([^)]+\)"),
    ("while_loops", r"\bwhile\s*\([^)]+\)"),
    ("if_statements", r"\bif\s*\([^)]+\)"),
    ("variable_declarations", r"\b(int|float|double)\s+\w+"),
    ("while_syntax", r"\bwhile\s*\(\s*\w+\s*(==|!=|<|>|<=|>=)\s*\w+\s*\)"),
    ("if_syntax", r"\bif\s*\(\s*\w+\s*(==|!=|<|>|<=|>=)\s*\w+\s*\)"),
];

fn compiled() -> &'static [(&'static str, Regex)] {
    static COMPILED: OnceLock<Vec<(&'static str, Regex)>> = OnceLock::new();
    COMPILED.get_or_init(|| {
        PATTERNS
            .iter()
            .map(|(name, pattern)| {
                // Patterns are constants; a failure here is a programming error
                let regex = Regex::new(pattern).expect("invalid built-in analysis pattern");
                (*name, regex)
            })
            .collect()
    })
}

/// Count non-overlapping matches of each construct pattern in `source`
pub fn analyze(source: &str) -> BTreeMap<String, usize> {
    compiled()
        .iter()
        .map(|(name, regex)| (name.to_string(), regex.find_iter(source).count()))
        .collect()
}

//! Constructs that survive rewriting but have no target equivalent.

use super::RewriteWarning;
use once_cell::sync::Lazy;
use regex::Regex;

static CHECKS: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    [
        ("CONNECT BY", r"(?i)\bCONNECT\s+BY\b"),
        ("START WITH", r"(?i)\bSTART\s+WITH\b"),
        ("ROWID", r"(?i)\bROWID\b"),
        ("ROWNUM", r"(?i)\bROWNUM\b"),
        ("DECODE()", r"(?i)\bDECODE\s*\("),
        ("NVL2()", r"(?i)\bNVL2\s*\("),
        ("(+) outer join", r"\(\s*\+\s*\)"),
    ]
    .into_iter()
    .map(|(name, pattern)| (name, Regex::new(pattern).unwrap()))
    .collect()
});

/// Report unsupported constructs in masked statement text.
pub fn check(masked: &str, warnings: &mut Vec<RewriteWarning>) {
    for (name, re) in CHECKS.iter() {
        if re.is_match(masked) {
            warnings.push(RewriteWarning::new(
                "compatibility",
                format!("{} has no target equivalent", name),
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_hierarchical_query() {
        let mut warnings = Vec::new();
        check(
            "INSERT INTO t SELECT id FROM emp START WITH mgr IS NULL CONNECT BY PRIOR id = mgr;",
            &mut warnings,
        );
        assert_eq!(warnings.len(), 2);
    }

    #[test]
    fn test_clean_statement() {
        let mut warnings = Vec::new();
        check("INSERT INTO t VALUES (1, 2);", &mut warnings);
        assert!(warnings.is_empty());
    }
}

//! Dialect rewriting for data statements.
//!
//! [`DialectRewriter`] runs an ordered list of [`RewriteRule`]s, each on the
//! output of the previous one. Rules only see a literal-masked copy of the
//! statement. Firing counts go into a [`RewriteStats`] owned by the caller,
//! so two runs never share counters.

mod compat;
pub mod dates;
mod literal;
pub mod rules;

pub use literal::MaskedStatement;

use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Something a rule noticed but did not act on. Never blocks execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RewriteWarning {
    pub source: String,
    pub message: String,
}

impl RewriteWarning {
    pub fn new(source: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for RewriteWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.source, self.message)
    }
}

type Transform = dyn Fn(&mut MaskedStatement, &mut Vec<RewriteWarning>) -> bool + Send + Sync;

/// One named transformation. Returns true when it changed the statement.
pub struct RewriteRule {
    description: String,
    transform: Box<Transform>,
}

impl RewriteRule {
    pub fn new<F>(description: impl Into<String>, transform: F) -> Self
    where
        F: Fn(&mut MaskedStatement, &mut Vec<RewriteWarning>) -> bool + Send + Sync + 'static,
    {
        Self {
            description: description.into(),
            transform: Box::new(transform),
        }
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn apply(&self, stmt: &mut MaskedStatement, warnings: &mut Vec<RewriteWarning>) -> bool {
        (self.transform)(stmt, warnings)
    }
}

impl fmt::Debug for RewriteRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RewriteRule")
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub struct RewriteConfig {
    /// Qualifier to replace; `None` moves every qualified target table
    pub source_schema: Option<String>,
    pub target_schema: String,
    pub strip_table_prefix: Option<String>,
}

impl Default for RewriteConfig {
    fn default() -> Self {
        Self {
            source_schema: None,
            target_schema: "public".to_string(),
            strip_table_prefix: None,
        }
    }
}

/// Firing count for one rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleCount {
    pub rule: String,
    pub count: u64,
}

/// Per-run rule firing counters, safe to share across workers.
#[derive(Debug)]
pub struct RewriteStats {
    counters: Vec<(String, AtomicU64)>,
}

impl RewriteStats {
    fn record(&self, index: usize) {
        if let Some((_, counter)) = self.counters.get(index) {
            counter.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn count(&self, description: &str) -> u64 {
        self.counters
            .iter()
            .find(|(d, _)| d == description)
            .map_or(0, |(_, c)| c.load(Ordering::Relaxed))
    }

    pub fn total(&self) -> u64 {
        self.counters
            .iter()
            .map(|(_, c)| c.load(Ordering::Relaxed))
            .sum()
    }

    pub fn snapshot(&self) -> Vec<RuleCount> {
        self.counters
            .iter()
            .map(|(rule, c)| RuleCount {
                rule: rule.clone(),
                count: c.load(Ordering::Relaxed),
            })
            .collect()
    }
}

/// Output of one rewrite
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rewritten {
    pub sql: String,
    pub changed: bool,
    pub warnings: Vec<RewriteWarning>,
}

#[derive(Debug)]
pub struct DialectRewriter {
    rules: Vec<RewriteRule>,
}

impl DialectRewriter {
    /// The canonical ordered rule set for `config`
    pub fn new(config: &RewriteConfig) -> Self {
        Self {
            rules: rules::canonical(config),
        }
    }

    pub fn with_rules(rules: Vec<RewriteRule>) -> Self {
        Self { rules }
    }

    /// Append a rule after the canonical ones.
    pub fn push_rule(&mut self, rule: RewriteRule) {
        self.rules.push(rule);
    }

    pub fn rules(&self) -> &[RewriteRule] {
        &self.rules
    }

    /// Fresh counters, one per rule currently installed
    pub fn new_stats(&self) -> RewriteStats {
        RewriteStats {
            counters: self
                .rules
                .iter()
                .map(|r| (r.description.clone(), AtomicU64::new(0)))
                .collect(),
        }
    }

    /// Rewrite one statement. Never fails: a statement that cannot be masked
    /// (unterminated literal) is returned unchanged with a warning.
    pub fn rewrite(&self, stmt: &str, stats: &RewriteStats) -> Rewritten {
        let mut warnings = Vec::new();

        let Some(mut masked) = MaskedStatement::mask(stmt) else {
            warnings.push(RewriteWarning::new(
                "rewriter",
                "unterminated string literal, statement passed through unchanged",
            ));
            return Rewritten {
                sql: stmt.to_string(),
                changed: false,
                warnings,
            };
        };

        let mut changed = false;
        for (i, rule) in self.rules.iter().enumerate() {
            if rule.apply(&mut masked, &mut warnings) {
                stats.record(i);
                changed = true;
            }
        }

        compat::check(masked.text(), &mut warnings);

        Rewritten {
            sql: if changed {
                masked.unmask()
            } else {
                stmt.to_string()
            },
            changed,
            warnings,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn his_config() -> RewriteConfig {
        RewriteConfig {
            source_schema: Some("EMR_HIS".to_string()),
            target_schema: "public".to_string(),
            strip_table_prefix: Some("V_HIS_".to_string()),
        }
    }

    #[test]
    fn test_full_pipeline() {
        let rewriter = DialectRewriter::new(&his_config());
        let stats = rewriter.new_stats();
        let out = rewriter.rewrite(
            "INSERT INTO EMR_HIS.V_HIS_KSDMDZB (KSDM, KSMC, GXSJ) VALUES ('001', 'SYSDATE dept', '13-07-2022 16:50:00');",
            &stats,
        );
        assert_eq!(
            out.sql,
            r#"INSERT INTO "public"."KSDMDZB" ("KSDM", "KSMC", "GXSJ") VALUES ('001', 'SYSDATE dept', '2022-07-13 16:50:00'::timestamp);"#
        );
        assert!(out.changed);
        assert!(out.warnings.is_empty());
        assert_eq!(stats.count("date literal normalization"), 1);
        assert_eq!(stats.count("SYSDATE -> CURRENT_TIMESTAMP"), 0);
        assert_eq!(stats.total(), 4);
    }

    #[test]
    fn test_unterminated_literal_passes_through() {
        let rewriter = DialectRewriter::new(&RewriteConfig::default());
        let stats = rewriter.new_stats();
        let out = rewriter.rewrite("INSERT INTO t VALUES ('oops);", &stats);
        assert_eq!(out.sql, "INSERT INTO t VALUES ('oops);");
        assert!(!out.changed);
        assert_eq!(out.warnings.len(), 1);
        assert_eq!(stats.total(), 0);
    }

    #[test]
    fn test_stats_are_per_run() {
        let rewriter = DialectRewriter::new(&RewriteConfig::default());
        let a = rewriter.new_stats();
        let b = rewriter.new_stats();
        rewriter.rewrite("INSERT INTO t VALUES (SYSDATE);", &a);
        assert_eq!(a.count("SYSDATE -> CURRENT_TIMESTAMP"), 1);
        assert_eq!(b.total(), 0);
    }

    #[test]
    fn test_custom_rule_runs_last() {
        let mut rewriter = DialectRewriter::new(&RewriteConfig::default());
        rewriter.push_rule(RewriteRule::new("uppercase nulls", |stmt, _| {
            let before = stmt.text().to_string();
            let after = before.replace("null", "NULL");
            let changed = before != after;
            stmt.text = after;
            changed
        }));
        let stats = rewriter.new_stats();
        let out = rewriter.rewrite("INSERT INTO t VALUES (null, 'null');", &stats);
        assert_eq!(out.sql, r#"INSERT INTO "public"."t" VALUES (NULL, 'null');"#);
        assert_eq!(stats.count("uppercase nulls"), 1);
    }
}

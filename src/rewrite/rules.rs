//! The canonical dialect rules, in application order.
//!
//! Every rule sees the masked statement, so patterns only ever match code,
//! never the inside of a string literal.

use super::dates::{self, DateLiteral};
use super::literal::{literal_body, MaskedStatement};
use super::{RewriteConfig, RewriteRule, RewriteWarning};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::borrow::Cow;
use std::ops::Range;

/// Leading DML keyword plus the (optionally qualified) target table
static RE_TABLE_REF: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?i)\b(INSERT\s+INTO|UPDATE|DELETE\s+FROM|DELETE|MERGE\s+INTO)\s+(?:("[^"]+"|[A-Za-z_][\w$#]*)\s*\.\s*)?("[^"]+"|[A-Za-z_][\w$#]*)"#,
    )
    .unwrap()
});

/// Any `schema.` qualifier
static RE_QUALIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?:"([^"]+)"|\b([A-Za-z_][\w$#]*))\s*\."#).unwrap());

static RE_COLUMN_LIST: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?i)\bINSERT\s+INTO\s+(?:(?:"[^"]+"|[A-Za-z_][\w$#]*)\s*\.\s*)?(?:"[^"]+"|[A-Za-z_][\w$#]*)\s*\(([^()]*)\)"#,
    )
    .unwrap()
});

static RE_BARE_IDENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z_][\w$#]*$").unwrap());

static RE_LITERAL_REF: Lazy<Regex> = Lazy::new(|| Regex::new(r"\x01(\d+)\x01(\s*::)?").unwrap());

static RE_TO_DATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bTO_(?:DATE|TIMESTAMP)\s*\(\s*\x01(\d+)\x01\s*(?:,\s*\x01(\d+)\x01\s*)?\)")
        .unwrap()
});

/// Functions whose first argument is read through a format mask
const MASKED_FUNCTIONS: &[&str] = &["TO_DATE", "TO_TIMESTAMP", "TO_CHAR"];

static RE_NEXTVAL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?i)((?:"[^"]+"|\b[A-Za-z_][\w$#]*)(?:\s*\.\s*(?:"[^"]+"|[A-Za-z_][\w$#]*))?)\s*\.\s*NEXTVAL\b"#,
    )
    .unwrap()
});

static RE_CURRVAL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?i)((?:"[^"]+"|\b[A-Za-z_][\w$#]*)(?:\s*\.\s*(?:"[^"]+"|[A-Za-z_][\w$#]*))?)\s*\.\s*CURRVAL\b"#,
    )
    .unwrap()
});

static RE_SYSDATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bSYS(?:DATE|TIMESTAMP)\b(?:\s*\(\s*\))?").unwrap());

static RE_NVL: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bNVL\s*\(").unwrap());

static RE_FROM_DUAL: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\s+FROM\s+DUAL\b").unwrap());

static RE_ROWNUM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bROWNUM\s*(<=|<)\s*(\d+)").unwrap());
static RE_AND_ROWNUM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\s+AND\s+ROWNUM\s*(?:<=|<)\s*\d+").unwrap());
static RE_WHERE_ROWNUM_AND: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bWHERE\s+ROWNUM\s*(?:<=|<)\s*\d+\s+AND\s+").unwrap());
static RE_WHERE_ROWNUM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\s+WHERE\s+ROWNUM\s*(?:<=|<)\s*\d+").unwrap());
static RE_SELECT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bSELECT\b").unwrap());
static RE_LIMIT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bLIMIT\s+\d+").unwrap());

static RE_WHERE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bWHERE\b").unwrap());
static RE_EMPTY_CMP: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s*(<>|!=|=)\s*''").unwrap());

/// Build the canonical rule list for a configuration.
pub fn canonical(config: &RewriteConfig) -> Vec<RewriteRule> {
    let mut rules = vec![schema_qualifier(
        config.source_schema.clone(),
        config.target_schema.clone(),
    )];
    if let Some(prefix) = config.strip_table_prefix.as_ref().filter(|p| !p.is_empty()) {
        rules.push(table_prefix(prefix.clone()));
    }
    rules.extend([
        column_quoting(),
        date_literals(),
        sequence_nextval(),
        sequence_currval(),
        current_timestamp(),
        null_coalesce(),
        to_date(),
        from_dual(),
        rownum_limit(),
        empty_string_is_null(),
    ]);
    rules
}

fn unquote(ident: &str) -> &str {
    ident
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(ident)
}

fn quote_ident(ident: &str) -> String {
    if ident.starts_with('"') {
        ident.to_string()
    } else {
        format!("\"{}\"", ident)
    }
}

/// Apply a regex replacement to the masked text, reporting whether it changed
fn replace_text(stmt: &mut MaskedStatement, re: &Regex, rep: &str) -> bool {
    let new = match re.replace_all(&stmt.text, rep) {
        Cow::Owned(s) => s,
        Cow::Borrowed(_) => return false,
    };
    let changed = new != stmt.text;
    stmt.text = new;
    changed
}

fn splice(stmt: &mut MaskedStatement, edit: Option<(Range<usize>, String)>) -> bool {
    match edit {
        Some((range, replacement)) if stmt.text[range.clone()] != replacement => {
            stmt.text.replace_range(range, &replacement);
            true
        }
        _ => false,
    }
}

/// Rule 1: move the target table (and any other source-schema reference)
/// into the target schema.
pub fn schema_qualifier(source: Option<String>, target: String) -> RewriteRule {
    let description = match &source {
        Some(src) => format!("schema qualifier {} -> {}", src, target),
        None => format!("schema qualifier -> {}", target),
    };
    let target_quoted = quote_ident(&target);

    RewriteRule::new(description, move |stmt, _| {
        let edit = RE_TABLE_REF.captures(&stmt.text).and_then(|caps| {
            let qualifier = caps.get(2).map(|m| unquote(m.as_str()));
            let moves = match (qualifier, source.as_deref()) {
                (None, _) | (Some(_), None) => true,
                (Some(q), Some(src)) => q.eq_ignore_ascii_case(src),
            };
            if !moves {
                return None;
            }
            let whole = caps.get(0)?;
            let replacement = format!("{} {}.{}", &caps[1], target_quoted, quote_ident(&caps[3]));
            Some((whole.range(), replacement))
        });
        let mut changed = splice(stmt, edit);

        if let Some(src) = source.as_deref() {
            let replaced = RE_QUALIFIER.replace_all(&stmt.text, |caps: &Captures| {
                let name = caps.get(1).or_else(|| caps.get(2)).map_or("", |m| m.as_str());
                if name.eq_ignore_ascii_case(src) {
                    format!("{}.", target_quoted)
                } else {
                    caps[0].to_string()
                }
            });
            if replaced != stmt.text {
                stmt.text = replaced.into_owned();
                changed = true;
            }
        }
        changed
    })
}

/// Rule 2: `V_HIS_KSDMDZB` -> `KSDMDZB` for the target table.
pub fn table_prefix(prefix: String) -> RewriteRule {
    RewriteRule::new(format!("strip table prefix {}", prefix), move |stmt, _| {
        let edit = RE_TABLE_REF.captures(&stmt.text).and_then(|caps| {
            let table = caps.get(3)?;
            let name = unquote(table.as_str());
            let head = name.get(..prefix.len())?;
            if name.len() > prefix.len() && head.eq_ignore_ascii_case(&prefix) {
                Some((table.range(), format!("\"{}\"", &name[prefix.len()..])))
            } else {
                None
            }
        });
        splice(stmt, edit)
    })
}

fn quote_column(piece: &str) -> String {
    let trimmed = piece.trim();
    if !RE_BARE_IDENT.is_match(trimmed) {
        return piece.to_string();
    }
    let lead = &piece[..piece.len() - piece.trim_start().len()];
    let trail = &piece[piece.trim_end().len()..];
    format!("{}\"{}\"{}", lead, trimmed, trail)
}

/// Rule 3: quote INSERT column names, case preserved.
pub fn column_quoting() -> RewriteRule {
    RewriteRule::new("quote insert column list", |stmt, _| {
        let edit = RE_COLUMN_LIST.captures(&stmt.text).and_then(|caps| {
            let list = caps.get(1)?;
            let quoted = list
                .as_str()
                .split(',')
                .map(quote_column)
                .collect::<Vec<_>>()
                .join(",");
            Some((list.range(), quoted))
        });
        splice(stmt, edit)
    })
}

/// Whether `prefix` ends with the opening of a mask-taking call,
/// `TO_DATE(` or `to_timestamp (`
fn opens_masked_call(prefix: &str) -> bool {
    let Some(before) = prefix.trim_end().strip_suffix('(') else {
        return false;
    };
    let before = before.trim_end();
    MASKED_FUNCTIONS.iter().any(|name| {
        let Some(split) = before.len().checked_sub(name.len()) else {
            return false;
        };
        match (before.get(..split), before.get(split..)) {
            (Some(head), Some(word)) => {
                word.eq_ignore_ascii_case(name)
                    && !head
                        .chars()
                        .last()
                        .is_some_and(|c| c.is_alphanumeric() || c == '_')
            }
            _ => false,
        }
    })
}

/// Rule 4: canonicalize day-first date literals and pin them with a cast.
///
/// First arguments of `TO_DATE`, `TO_TIMESTAMP` and `TO_CHAR` are read
/// through their format mask, so they are left alone here.
pub fn date_literals() -> RewriteRule {
    const DESCRIPTION: &str = "date literal normalization";

    RewriteRule::new(DESCRIPTION, |stmt, warnings| {
        let MaskedStatement { text, literals } = stmt;
        let haystack = text.as_str();
        let mut changed = false;

        let replaced = RE_LITERAL_REF.replace_all(haystack, |caps: &Captures| {
            let whole = caps[0].to_string();
            let start = caps.get(0).map_or(0, |m| m.start());
            if opens_masked_call(&haystack[..start]) {
                return whole;
            }
            let Some(literal) = caps[1].parse::<usize>().ok().and_then(|i| literals.get_mut(i))
            else {
                return whole;
            };
            let outcome = match literal_body(literal) {
                Some(body) => dates::normalize(body),
                None => return whole,
            };
            match outcome {
                DateLiteral::NotADate => whole,
                DateLiteral::Invalid => {
                    warnings.push(RewriteWarning::new(
                        DESCRIPTION,
                        format!("impossible date {} left unchanged", literal),
                    ));
                    whole
                }
                DateLiteral::Valid { canonical, kind } => {
                    let normalized = format!("'{}'", canonical);
                    if *literal != normalized {
                        *literal = normalized;
                        changed = true;
                    }
                    if caps.get(2).is_some() {
                        whole
                    } else {
                        changed = true;
                        format!("{}{}", whole, kind.cast())
                    }
                }
            }
        });

        if changed {
            let replaced = replaced.into_owned();
            *text = replaced;
        }
        changed
    })
}

/// `seq.NEXTVAL` -> `nextval('seq')`
pub fn sequence_nextval() -> RewriteRule {
    RewriteRule::new("sequence NEXTVAL -> nextval()", |stmt, _| {
        replace_text(stmt, &RE_NEXTVAL, "nextval('${1}')")
    })
}

/// `seq.CURRVAL` -> `currval('seq')`
pub fn sequence_currval() -> RewriteRule {
    RewriteRule::new("sequence CURRVAL -> currval()", |stmt, _| {
        replace_text(stmt, &RE_CURRVAL, "currval('${1}')")
    })
}

pub fn current_timestamp() -> RewriteRule {
    RewriteRule::new("SYSDATE -> CURRENT_TIMESTAMP", |stmt, _| {
        replace_text(stmt, &RE_SYSDATE, "CURRENT_TIMESTAMP")
    })
}

pub fn null_coalesce() -> RewriteRule {
    RewriteRule::new("NVL -> COALESCE", |stmt, _| {
        replace_text(stmt, &RE_NVL, "COALESCE(")
    })
}

/// `TO_DATE('<value>', '<mask>')` and `TO_TIMESTAMP(..)` ->
/// `'<canonical>'::timestamp`
pub fn to_date() -> RewriteRule {
    const DESCRIPTION: &str = "TO_DATE/TO_TIMESTAMP -> timestamp literal";

    RewriteRule::new(DESCRIPTION, |stmt, warnings| {
        let MaskedStatement { text, literals } = stmt;
        let mut changed = false;

        let replaced = RE_TO_DATE.replace_all(text.as_str(), |caps: &Captures| {
            let whole = caps[0].to_string();
            let (Some(value_idx), mask_idx) = (
                caps[1].parse::<usize>().ok(),
                caps.get(2).and_then(|m| m.as_str().parse::<usize>().ok()),
            ) else {
                return whole;
            };
            let Some(value) = literals.get(value_idx).and_then(|l| literal_body(l)) else {
                return whole;
            };
            let mask = mask_idx
                .and_then(|i| literals.get(i))
                .and_then(|l| literal_body(l));

            let canonical = match mask {
                Some(mask) => dates::parse_with_mask(value, mask),
                None => match dates::normalize(value) {
                    DateLiteral::Valid { canonical, .. } => Some(canonical),
                    _ => None,
                },
            };

            match canonical {
                Some(canonical) => {
                    literals[value_idx] = format!("'{}'", canonical);
                    changed = true;
                    format!("\u{1}{}\u{1}::timestamp", value_idx)
                }
                None => {
                    warnings.push(RewriteWarning::new(
                        DESCRIPTION,
                        format!(
                            "could not interpret '{}' with mask '{}'",
                            value,
                            mask.unwrap_or("<session default>")
                        ),
                    ));
                    whole
                }
            }
        });

        if changed {
            let replaced = replaced.into_owned();
            *text = replaced;
        }
        changed
    })
}

pub fn from_dual() -> RewriteRule {
    RewriteRule::new("remove FROM DUAL", |stmt, _| {
        replace_text(stmt, &RE_FROM_DUAL, "")
    })
}

/// `... WHERE ROWNUM <= n` inside a SELECT -> trailing `LIMIT n`.
///
/// UPDATE and DELETE have no LIMIT on the target, so a bare ROWNUM there is
/// left for the compatibility check to report.
pub fn rownum_limit() -> RewriteRule {
    RewriteRule::new("ROWNUM -> LIMIT", |stmt, _| {
        if !RE_SELECT.is_match(&stmt.text) || RE_LIMIT.is_match(&stmt.text) {
            return false;
        }
        let Some(limit) = RE_ROWNUM.captures(&stmt.text).and_then(|caps| {
            let n = caps[2].parse::<u64>().ok()?;
            Some(if &caps[1] == "<" { n.saturating_sub(1) } else { n })
        }) else {
            return false;
        };

        let without = if RE_AND_ROWNUM.is_match(&stmt.text) {
            RE_AND_ROWNUM.replacen(&stmt.text, 1, "")
        } else if RE_WHERE_ROWNUM_AND.is_match(&stmt.text) {
            RE_WHERE_ROWNUM_AND.replacen(&stmt.text, 1, "WHERE ")
        } else if RE_WHERE_ROWNUM.is_match(&stmt.text) {
            RE_WHERE_ROWNUM.replacen(&stmt.text, 1, "")
        } else {
            return false;
        };

        let body = without.trim_end();
        let (body, terminator) = match body.strip_suffix(';') {
            Some(b) => (b.trim_end(), ";"),
            None => (body, ""),
        };
        stmt.text = format!("{} LIMIT {}{}", body, limit, terminator);
        true
    })
}

/// `col = ''` after WHERE -> `col IS NULL`; the source engine stores empty
/// strings as NULL.
pub fn empty_string_is_null() -> RewriteRule {
    RewriteRule::new("= '' -> IS NULL", |stmt, _| {
        let Some(where_end) = RE_WHERE.find(&stmt.text).map(|m| m.end()) else {
            return false;
        };
        let tail = &stmt.text[where_end..];
        let replaced = RE_EMPTY_CMP.replace_all(tail, |caps: &Captures| {
            let start = caps.get(0).map_or(0, |m| m.start());
            let prev = tail[..start].chars().last();
            if matches!(prev, Some('<' | '>' | '!')) {
                return caps[0].to_string();
            }
            if &caps[1] == "=" {
                " IS NULL".to_string()
            } else {
                " IS NOT NULL".to_string()
            }
        });
        if replaced == tail {
            return false;
        }
        let new = format!("{}{}", &stmt.text[..where_end], replaced);
        stmt.text = new;
        true
    })
}

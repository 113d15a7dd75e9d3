//! Date literal shapes and calendar validation.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

/// Day-first shapes: `13-07-2022`, `13/07/2022`, `13.07.2022`, optional time
/// with optional fractional seconds
static RE_DAY_FIRST: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(\d{1,2})([-/.])(\d{1,2})[-/.](\d{4})(?:\s+(\d{1,2}):(\d{2})(?::(\d{2})(?:\.(\d{1,9}))?)?)?$",
    )
    .unwrap()
});

/// Already canonical: `2022-07-13`, `2022-07-13 16:50:00[.123]`
static RE_CANONICAL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d{4})-(\d{2})-(\d{2})(?:[ T](\d{2}):(\d{2})(?::(\d{2})(?:\.(\d{1,9}))?)?)?$")
        .unwrap()
});

/// Canonical timestamp; the fraction is printed only when non-zero
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateKind {
    Date,
    Timestamp,
}

impl DateKind {
    pub fn cast(self) -> &'static str {
        match self {
            DateKind::Date => "::date",
            DateKind::Timestamp => "::timestamp",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DateLiteral {
    /// Not one of the recognized shapes
    NotADate,
    /// Recognized and valid, in canonical `YYYY-MM-DD[ HH:MM:SS]` form
    Valid { canonical: String, kind: DateKind },
    /// Recognized shape, impossible calendar value
    Invalid,
}

/// Classify the body of a string literal (quotes already removed).
pub fn normalize(value: &str) -> DateLiteral {
    if let Some(c) = RE_DAY_FIRST.captures(value) {
        // both separators must be the same character
        let month_end = c.get(3).map_or(0, |m| m.end());
        if !value[month_end..].starts_with(group(&c, 2)) {
            return DateLiteral::NotADate;
        }
        return Parts {
            year: group(&c, 4),
            month: group(&c, 3),
            day: group(&c, 1),
            hour: optional(&c, 5),
            minute: optional(&c, 6),
            second: optional(&c, 7),
            fraction: optional(&c, 8),
        }
        .build();
    }

    if let Some(c) = RE_CANONICAL.captures(value) {
        return Parts {
            year: group(&c, 1),
            month: group(&c, 2),
            day: group(&c, 3),
            hour: optional(&c, 4),
            minute: optional(&c, 5),
            second: optional(&c, 6),
            fraction: optional(&c, 7),
        }
        .build();
    }

    DateLiteral::NotADate
}

fn group<'h>(c: &Captures<'h>, i: usize) -> &'h str {
    c.get(i).map_or("", |m| m.as_str())
}

fn optional(c: &Captures<'_>, i: usize) -> Option<String> {
    c.get(i).map(|m| m.as_str().to_string())
}

struct Parts<'a> {
    year: &'a str,
    month: &'a str,
    day: &'a str,
    hour: Option<String>,
    minute: Option<String>,
    second: Option<String>,
    fraction: Option<String>,
}

impl Parts<'_> {
    /// `.123` -> 123_000_000
    fn nanos(&self) -> Option<u32> {
        match self.fraction.as_deref() {
            None => Some(0),
            Some(digits) => format!("{:0<9}", digits).parse().ok(),
        }
    }

    fn build(&self) -> DateLiteral {
        let num = |s: &str| s.parse::<u32>().ok();
        let (Some(year), Some(month), Some(day)) = (
            self.year.parse::<i32>().ok(),
            num(self.month),
            num(self.day),
        ) else {
            return DateLiteral::Invalid;
        };
        let Some(date) = NaiveDate::from_ymd_opt(year, month, day) else {
            return DateLiteral::Invalid;
        };

        match (self.hour.as_deref(), self.minute.as_deref()) {
            (Some(h), Some(m)) => {
                let s = self.second.as_deref().unwrap_or("0");
                let time = match (num(h), num(m), num(s), self.nanos()) {
                    (Some(h), Some(m), Some(s), Some(nano)) => {
                        NaiveTime::from_hms_nano_opt(h, m, s, nano)
                    }
                    _ => None,
                };
                match time {
                    Some(t) => DateLiteral::Valid {
                        canonical: NaiveDateTime::new(date, t)
                            .format(TIMESTAMP_FORMAT)
                            .to_string(),
                        kind: DateKind::Timestamp,
                    },
                    None => DateLiteral::Invalid,
                }
            }
            _ => DateLiteral::Valid {
                canonical: date.format("%Y-%m-%d").to_string(),
                kind: DateKind::Date,
            },
        }
    }
}

const FRACTION: &str = "%.f";

/// Translate an Oracle format mask (`DD-MM-YYYY HH24:MI:SS`) to a chrono
/// format string. Unsupported elements yield `None`.
pub fn oracle_format_to_chrono(mask: &str) -> Option<String> {
    let upper = mask.to_ascii_uppercase();
    let mut rest = upper.as_str();
    let mut out = String::with_capacity(mask.len() * 2);

    const ELEMENTS: &[(&str, &str)] = &[
        ("FF9", FRACTION),
        ("FF6", FRACTION),
        ("FF3", FRACTION),
        ("FF", FRACTION),
        ("YYYY", "%Y"),
        ("HH24", "%H"),
        ("HH12", "%I"),
        ("MON", "%b"),
        ("AM", "%p"),
        ("PM", "%p"),
        ("YY", "%y"),
        ("MM", "%m"),
        ("DD", "%d"),
        ("HH", "%I"),
        ("MI", "%M"),
        ("SS", "%S"),
    ];

    'outer: while !rest.is_empty() {
        for (element, spec) in ELEMENTS {
            if let Some(r) = rest.strip_prefix(element) {
                if *spec == FRACTION {
                    // chrono's fraction spec consumes the separating dot
                    out.pop().filter(|c| *c == '.')?;
                }
                out.push_str(spec);
                rest = r;
                continue 'outer;
            }
        }
        let c = rest.chars().next()?;
        if c.is_ascii_alphanumeric() {
            return None;
        }
        out.push(c);
        rest = &rest[c.len_utf8()..];
    }
    Some(out)
}

/// Parse `value` with an Oracle format mask into the canonical timestamp form.
pub fn parse_with_mask(value: &str, mask: &str) -> Option<String> {
    let fmt = oracle_format_to_chrono(mask)?;
    if let Ok(ts) = NaiveDateTime::parse_from_str(value, &fmt) {
        return Some(ts.format(TIMESTAMP_FORMAT).to_string());
    }
    NaiveDate::parse_from_str(value, &fmt)
        .ok()
        .map(|d| d.format("%Y-%m-%d 00:00:00").to_string())
}

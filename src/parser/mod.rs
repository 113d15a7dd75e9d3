//! Quote-aware statement splitting and classification.
//!
//! The scanner never builds an AST. It tracks exactly two bits of state while
//! walking the decoded byte stream (inside a single-quoted string, previous
//! byte was a backslash escape) and cuts a statement at every `;` seen outside
//! a string. Comments are not recognized here; a statement that looks like a
//! comment round-trips intact and is filtered later by [`classify`].

use crate::error::{LoadError, Result};
use memchr::memchr3;
use std::io::{BufRead, BufReader, Read};
use std::ops::Range;

pub const SMALL_BUFFER_SIZE: usize = 64 * 1024;
pub const MEDIUM_BUFFER_SIZE: usize = 256 * 1024;

/// The two-bit lexical state shared by the scanner and the rewriter's
/// literal masking.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QuoteTracker {
    in_string: bool,
    escaped: bool,
}

impl QuoteTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one byte. Returns true when the byte is a statement terminator.
    ///
    /// A backslash escapes exactly one following byte whether or not we are
    /// inside a string, so `\'` never toggles the string state.
    #[inline]
    pub fn feed(&mut self, b: u8) -> bool {
        if self.escaped {
            self.escaped = false;
            return false;
        }
        match b {
            b'\\' => {
                self.escaped = true;
                false
            }
            b'\'' => {
                self.in_string = !self.in_string;
                false
            }
            b';' => !self.in_string,
            _ => false,
        }
    }

    #[inline]
    pub fn in_string(&self) -> bool {
        self.in_string
    }

    #[inline]
    pub fn is_escaped(&self) -> bool {
        self.escaped
    }
}

/// One complete statement with its position in the decoded stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedStatement {
    /// Trimmed statement text, terminator included when present
    pub text: String,
    /// Byte range of `text` in the decoded UTF-8 stream
    pub span: Range<u64>,
}

/// Lazy statement splitter over a UTF-8 byte stream.
///
/// End of input with pending text yields that text as a final statement even
/// without a trailing `;`, since legacy dumps often omit the last terminator.
pub struct StatementScanner<R: Read> {
    reader: BufReader<R>,
    stmt_buffer: Vec<u8>,
    tracker: QuoteTracker,
    offset: u64,
    stmt_start: u64,
    exhausted: bool,
}

impl<R: Read> StatementScanner<R> {
    pub fn new(reader: R) -> Self {
        Self::with_capacity(reader, SMALL_BUFFER_SIZE)
    }

    pub fn with_capacity(reader: R, buffer_size: usize) -> Self {
        Self {
            reader: BufReader::with_capacity(buffer_size, reader),
            stmt_buffer: Vec::with_capacity(32 * 1024),
            tracker: QuoteTracker::new(),
            offset: 0,
            stmt_start: 0,
            exhausted: false,
        }
    }

    /// Read the next raw statement, blank ones included.
    fn read_raw(&mut self) -> Result<Option<(Vec<u8>, u64)>> {
        if self.exhausted {
            return Ok(None);
        }

        self.stmt_buffer.clear();
        self.stmt_start = self.offset;

        loop {
            let buf = self.reader.fill_buf()?;
            if buf.is_empty() {
                self.exhausted = true;
                if self.stmt_buffer.is_empty() {
                    return Ok(None);
                }
                let result = std::mem::take(&mut self.stmt_buffer);
                return Ok(Some((result, self.stmt_start)));
            }

            let mut pos = 0;
            let mut terminator = None;

            while pos < buf.len() {
                if self.tracker.is_escaped() {
                    self.tracker.feed(buf[pos]);
                    pos += 1;
                    continue;
                }
                match memchr3(b'\'', b'\\', b';', &buf[pos..]) {
                    Some(i) => {
                        let idx = pos + i;
                        if self.tracker.feed(buf[idx]) {
                            terminator = Some(idx);
                            break;
                        }
                        pos = idx + 1;
                    }
                    None => break,
                }
            }

            if let Some(idx) = terminator {
                self.stmt_buffer.extend_from_slice(&buf[..=idx]);
                self.reader.consume(idx + 1);
                self.offset += (idx + 1) as u64;
                let result = std::mem::take(&mut self.stmt_buffer);
                return Ok(Some((result, self.stmt_start)));
            }

            self.stmt_buffer.extend_from_slice(buf);
            let len = buf.len();
            self.reader.consume(len);
            self.offset += len as u64;
        }
    }

    /// Read the next non-blank statement.
    pub fn read_statement(&mut self) -> Result<Option<ScannedStatement>> {
        while let Some((raw, start)) = self.read_raw()? {
            let text = String::from_utf8(raw).map_err(|e| {
                LoadError::parse(format!(
                    "statement at byte {} is not valid UTF-8: {}",
                    start, e
                ))
            })?;

            let trimmed_start = text.len() - text.trim_start().len();
            let trimmed = text.trim();
            if trimmed.is_empty() || trimmed == ";" {
                continue;
            }

            let span_start = start + trimmed_start as u64;
            let span = span_start..span_start + trimmed.len() as u64;
            let text = if trimmed.len() == text.len() {
                text
            } else {
                trimmed.to_string()
            };
            return Ok(Some(ScannedStatement { text, span }));
        }
        Ok(None)
    }
}

impl<R: Read> Iterator for StatementScanner<R> {
    type Item = Result<ScannedStatement>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.read_statement() {
            Ok(Some(stmt)) => Some(Ok(stmt)),
            Ok(None) => None,
            Err(e) => {
                // A failed read cannot resume at a known boundary
                self.exhausted = true;
                Some(Err(e))
            }
        }
    }
}

/// What a statement is, as far as the loader cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Insert,
    Update,
    Delete,
    Merge,
    Comment,
    TransactionControl,
    SessionCommand,
    Ddl,
    Other,
}

impl StatementKind {
    /// Data statements are rewritten and executed; everything else is skipped
    pub fn is_data(self) -> bool {
        matches!(
            self,
            StatementKind::Insert
                | StatementKind::Update
                | StatementKind::Delete
                | StatementKind::Merge
        )
    }
}

impl std::fmt::Display for StatementKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StatementKind::Insert => write!(f, "insert"),
            StatementKind::Update => write!(f, "update"),
            StatementKind::Delete => write!(f, "delete"),
            StatementKind::Merge => write!(f, "merge"),
            StatementKind::Comment => write!(f, "comment"),
            StatementKind::TransactionControl => write!(f, "transaction-control"),
            StatementKind::SessionCommand => write!(f, "session-command"),
            StatementKind::Ddl => write!(f, "ddl"),
            StatementKind::Other => write!(f, "other"),
        }
    }
}

const SQLPLUS_LINE_COMMANDS: &[&str] = &["REM", "REMARK", "PROMPT", "SPOOL", "SET"];

/// Strip leading comments and unterminated SQL*Plus line commands.
///
/// Line commands such as `PROMPT` or `SET DEFINE OFF` carry no `;`, so the
/// scanner glues them to the front of the next real statement.
pub fn strip_leading_noise(stmt: &str) -> &str {
    let mut rest = stmt.trim_start();
    loop {
        if rest.starts_with("--") {
            match rest.find('\n') {
                Some(pos) => {
                    rest = rest[pos + 1..].trim_start();
                    continue;
                }
                None => return "",
            }
        }
        if rest.starts_with("/*") {
            match rest.find("*/") {
                Some(pos) => {
                    rest = rest[pos + 2..].trim_start();
                    continue;
                }
                None => return "",
            }
        }
        if let Some(pos) = rest.find('\n') {
            let line = rest[..pos].trim();
            if is_sqlplus_line(line) {
                rest = rest[pos + 1..].trim_start();
                continue;
            }
        }
        return rest;
    }
}

fn is_sqlplus_line(line: &str) -> bool {
    if line == "/" {
        return true;
    }
    if line.ends_with(';') {
        return false;
    }
    let word = first_word(line);
    SQLPLUS_LINE_COMMANDS
        .iter()
        .any(|cmd| word.eq_ignore_ascii_case(cmd))
}

#[inline]
fn first_word(s: &str) -> &str {
    let end = s
        .find(|c: char| !c.is_ascii_alphabetic() && c != '_')
        .unwrap_or(s.len());
    &s[..end]
}

/// Classify a statement by its leading keyword, ignoring leading noise.
pub fn classify(stmt: &str) -> StatementKind {
    let body = strip_leading_noise(stmt);

    if body.is_empty() {
        let trimmed = stmt.trim_start();
        if trimmed.starts_with("--")
            || trimmed.starts_with("/*")
            || first_word(trimmed).eq_ignore_ascii_case("REM")
            || first_word(trimmed).eq_ignore_ascii_case("REMARK")
        {
            return StatementKind::Comment;
        }
        return StatementKind::SessionCommand;
    }

    if body == "/" || body == "/;" {
        return StatementKind::SessionCommand;
    }

    let word = first_word(body).to_ascii_uppercase();
    let second = first_word(body[word.len()..].trim_start()).to_ascii_uppercase();

    match word.as_str() {
        "INSERT" => StatementKind::Insert,
        "UPDATE" => StatementKind::Update,
        "DELETE" => StatementKind::Delete,
        "MERGE" => StatementKind::Merge,
        "COMMIT" | "ROLLBACK" | "SAVEPOINT" | "END" => StatementKind::TransactionControl,
        "BEGIN" | "START" if second.is_empty() || second == "TRANSACTION" || second == "WORK" => {
            StatementKind::TransactionControl
        }
        "SET" if second == "TRANSACTION" => StatementKind::TransactionControl,
        "REM" | "REMARK" => StatementKind::Comment,
        "ALTER" if second == "SESSION" || second == "SYSTEM" => StatementKind::SessionCommand,
        "PROMPT" | "SET" | "SPOOL" | "EXIT" | "QUIT" | "CONNECT" | "DISCONNECT" | "WHENEVER"
        | "DEFINE" | "UNDEFINE" | "SHOW" | "COLUMN" | "TTITLE" | "BTITLE" | "EXEC"
        | "EXECUTE" => StatementKind::SessionCommand,
        "CREATE" | "ALTER" | "DROP" | "TRUNCATE" | "GRANT" | "REVOKE" | "RENAME" => {
            StatementKind::Ddl
        }
        "COMMENT" if second == "ON" => StatementKind::Ddl,
        _ => StatementKind::Other,
    }
}

pub fn determine_buffer_size(file_size: u64) -> usize {
    if file_size > 1024 * 1024 * 1024 {
        MEDIUM_BUFFER_SIZE
    } else {
        SMALL_BUFFER_SIZE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan_all(sql: &str) -> Vec<String> {
        StatementScanner::new(sql.as_bytes())
            .map(|s| s.unwrap().text)
            .collect()
    }

    #[test]
    fn test_read_statement_basic() {
        let stmts = scan_all("INSERT INTO t1 VALUES (1); INSERT INTO t1 VALUES (2);");
        assert_eq!(
            stmts,
            vec!["INSERT INTO t1 VALUES (1);", "INSERT INTO t1 VALUES (2);"]
        );
    }

    #[test]
    fn test_read_statement_with_strings() {
        let stmts = scan_all("INSERT INTO t1 VALUES ('hello; world');");
        assert_eq!(stmts, vec!["INSERT INTO t1 VALUES ('hello; world');"]);
    }

    #[test]
    fn test_doubled_quote_keeps_string_state() {
        let stmts = scan_all("INSERT INTO t VALUES ('it''s; fine'); SELECT 1;");
        assert_eq!(stmts.len(), 2);
        assert_eq!(stmts[0], "INSERT INTO t VALUES ('it''s; fine');");
    }

    #[test]
    fn test_backslash_escaped_quote() {
        let stmts = scan_all("INSERT INTO t1 VALUES ('it\\'s; a test');");
        assert_eq!(stmts, vec!["INSERT INTO t1 VALUES ('it\\'s; a test');"]);
    }

    #[test]
    fn test_backslash_outside_string_escapes_terminator() {
        let stmts = scan_all("SELECT 1\\; SELECT 2;");
        assert_eq!(stmts, vec!["SELECT 1\\; SELECT 2;"]);
    }

    #[test]
    fn test_missing_trailing_terminator() {
        let stmts = scan_all("INSERT INTO t VALUES (1);\nINSERT INTO t VALUES (2)\n");
        assert_eq!(
            stmts,
            vec!["INSERT INTO t VALUES (1);", "INSERT INTO t VALUES (2)"]
        );
    }

    #[test]
    fn test_blank_statements_are_skipped() {
        let stmts = scan_all(";;\n  ;\nINSERT INTO t VALUES (1);\n\n");
        assert_eq!(stmts, vec!["INSERT INTO t VALUES (1);"]);
    }

    #[test]
    fn test_comment_round_trips_intact() {
        let stmts = scan_all("-- header; still a comment\nINSERT INTO t VALUES (1);");
        assert_eq!(stmts, vec!["-- header;", "still a comment\nINSERT INTO t VALUES (1);"]);
    }

    #[test]
    fn test_span_tracks_decoded_offsets() {
        let sql = "  INSERT INTO a VALUES (1);\n INSERT INTO b VALUES (2);";
        let stmts: Vec<_> = StatementScanner::new(sql.as_bytes())
            .map(|s| s.unwrap())
            .collect();
        assert_eq!(stmts[0].span, 2..27);
        assert_eq!(&sql[2..27], stmts[0].text);
        let second = &stmts[1];
        assert_eq!(
            &sql[second.span.start as usize..second.span.end as usize],
            second.text
        );
    }

    #[test]
    fn test_tiny_buffer_splits_identically() {
        let sql = "INSERT INTO t VALUES ('a;b', 'c\\'d'); INSERT INTO t VALUES ('x');";
        let big: Vec<_> = scan_all(sql);
        let small: Vec<_> = StatementScanner::with_capacity(sql.as_bytes(), 3)
            .map(|s| s.unwrap().text)
            .collect();
        assert_eq!(big, small);
    }

    #[test]
    fn test_multibyte_text_survives() {
        let stmts = scan_all("INSERT INTO t VALUES ('科室名称;'); INSERT INTO t VALUES ('ü');");
        assert_eq!(stmts[0], "INSERT INTO t VALUES ('科室名称;');");
        assert_eq!(stmts[1], "INSERT INTO t VALUES ('ü');");
    }

    #[test]
    fn test_classify_data_statements() {
        assert_eq!(classify("INSERT INTO t VALUES (1);"), StatementKind::Insert);
        assert_eq!(classify("  update t set a = 1;"), StatementKind::Update);
        assert_eq!(classify("DELETE FROM t;"), StatementKind::Delete);
        assert!(classify("insert into t values (1)").is_data());
    }

    #[test]
    fn test_classify_noise() {
        assert_eq!(classify("-- just a comment"), StatementKind::Comment);
        assert_eq!(classify("/* block */"), StatementKind::Comment);
        assert_eq!(classify("REM generated by exp"), StatementKind::Comment);
        assert_eq!(classify("COMMIT;"), StatementKind::TransactionControl);
        assert_eq!(classify("rollback;"), StatementKind::TransactionControl);
        assert_eq!(classify("SET TRANSACTION READ ONLY;"), StatementKind::TransactionControl);
        assert_eq!(classify("SET DEFINE OFF;"), StatementKind::SessionCommand);
        assert_eq!(
            classify("ALTER SESSION SET NLS_DATE_FORMAT = 'YYYY-MM-DD';"),
            StatementKind::SessionCommand
        );
        assert_eq!(classify("PROMPT loading;"), StatementKind::SessionCommand);
        assert_eq!(classify("CREATE TABLE t (id INT);"), StatementKind::Ddl);
        assert_eq!(classify("ALTER TABLE t ADD c INT;"), StatementKind::Ddl);
    }

    #[test]
    fn test_leading_noise_does_not_hide_data() {
        let stmt = "PROMPT Loading EMP\nSET DEFINE OFF\n-- rows\nINSERT INTO EMP VALUES (1);";
        assert_eq!(classify(stmt), StatementKind::Insert);
        assert_eq!(strip_leading_noise(stmt), "INSERT INTO EMP VALUES (1);");
    }

    #[test]
    fn test_terminated_set_line_is_not_stripped() {
        assert_eq!(classify("SET FEEDBACK OFF;"), StatementKind::SessionCommand);
        assert_eq!(strip_leading_noise("SET FEEDBACK OFF;"), "SET FEEDBACK OFF;");
    }
}

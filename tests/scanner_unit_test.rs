use sql_loader::parser::{classify, StatementKind, StatementScanner};
use sql_loader::reader::DecodeReader;

fn texts(sql: &[u8]) -> Vec<String> {
    StatementScanner::new(sql).map(|s| s.unwrap().text).collect()
}

#[test]
fn test_oracle_spool_output() {
    let sql = b"SET DEFINE OFF\nPROMPT loading KSDMDZB\nINSERT INTO EMR_HIS.V_HIS_KSDMDZB (KSDM, KSMC) VALUES ('001', 'a;b');\nINSERT INTO EMR_HIS.V_HIS_KSDMDZB (KSDM, KSMC) VALUES ('002', 'it''s');\nCOMMIT;\n";
    let stmts = texts(sql);
    assert_eq!(stmts.len(), 3);
    assert!(stmts[0].starts_with("SET DEFINE OFF\nPROMPT"));
    assert!(stmts[0].ends_with("'a;b');"));
    assert!(stmts[1].ends_with("'it''s');"));
    assert_eq!(stmts[2], "COMMIT;");

    let kinds: Vec<_> = stmts.iter().map(|s| classify(s)).collect();
    assert_eq!(
        kinds,
        vec![
            StatementKind::Insert,
            StatementKind::Insert,
            StatementKind::TransactionControl
        ]
    );
}

#[test]
fn test_semicolon_inside_string_never_splits() {
    let stmts = texts(b"INSERT INTO t VALUES ('x;y;z', ';');INSERT INTO t VALUES (2);");
    assert_eq!(
        stmts,
        vec![
            "INSERT INTO t VALUES ('x;y;z', ';');",
            "INSERT INTO t VALUES (2);"
        ]
    );
}

#[test]
fn test_escaped_quote_does_not_close_string() {
    let stmts = texts(br"INSERT INTO t VALUES ('O\'Brien; Jr');SELECT 1;");
    assert_eq!(stmts.len(), 2);
    assert_eq!(stmts[0], r"INSERT INTO t VALUES ('O\'Brien; Jr');");
}

#[test]
fn test_unterminated_tail_is_yielded() {
    let stmts = texts(b"INSERT INTO t VALUES (1);\nINSERT INTO t VALUES (2)\n");
    assert_eq!(stmts.last().unwrap(), "INSERT INTO t VALUES (2)");
}

#[test]
fn test_only_noise_yields_nothing() {
    assert!(texts(b" ;\n ; \n\n").is_empty());
    assert!(texts(b"").is_empty());
}

#[test]
fn test_scanner_over_decoded_gbk() {
    let (bytes, _, _) = encoding_rs::GBK.encode("INSERT INTO t VALUES ('内科;外科');SELECT 1;");
    let reader = DecodeReader::strict(&bytes[..], encoding_rs::GBK);
    let stmts: Vec<_> = StatementScanner::with_capacity(reader, 8)
        .map(|s| s.unwrap().text)
        .collect();
    assert_eq!(stmts, vec!["INSERT INTO t VALUES ('内科;外科');", "SELECT 1;"]);
}

#[test]
fn test_invalid_utf8_is_a_parse_error() {
    let mut scanner = StatementScanner::new(&b"INSERT INTO t VALUES ('\xff');"[..]);
    let err = scanner.next().unwrap().unwrap_err();
    assert!(err.to_string().contains("not valid UTF-8"));
    assert!(scanner.next().is_none());
}

use flate2::write::GzEncoder;
use flate2::Compression as GzLevel;
use sql_loader::parser::StatementScanner;
use sql_loader::reader::{DecodeProbe, EncodingResolver};
use sql_loader::Result;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const GBK_DUMP: &str = "INSERT INTO KSDMDZB (KSDM, KSMC) VALUES ('001', '内科');\nINSERT INTO KSDMDZB (KSDM, KSMC) VALUES ('002', '外科');\n";

fn write_gbk(dir: &TempDir, name: &str) -> PathBuf {
    let (bytes, _, unmappable) = encoding_rs::GBK.encode(GBK_DUMP);
    assert!(!unmappable);
    let path = dir.path().join(name);
    fs::write(&path, &bytes).unwrap();
    path
}

#[test]
fn test_gbk_file_with_utf8_hint_falls_back_cleanly() {
    let dir = TempDir::new().unwrap();
    let path = write_gbk(&dir, "ksdm.sql");

    let opened = EncodingResolver::default().open(&path, "utf-8").unwrap();
    assert_eq!(opened.resolved.encoding, encoding_rs::GBK);
    assert!(opened.resolved.fallback_used);
    assert!(!opened.resolved.degraded);

    let counter = opened.reader.replacement_counter();
    let stmts: Vec<_> = StatementScanner::new(opened.reader)
        .map(|s| s.unwrap().text)
        .collect();
    assert_eq!(stmts.len(), 2);
    assert!(stmts[0].contains("'内科'"));
    assert!(stmts[1].contains("'外科'"));
    assert_eq!(counter.load(std::sync::atomic::Ordering::Relaxed), 0);
}

#[test]
fn test_gzip_compressed_gbk_file() {
    let dir = TempDir::new().unwrap();
    let (bytes, _, _) = encoding_rs::GBK.encode(GBK_DUMP);
    let path = dir.path().join("ksdm.sql.gz");
    let mut encoder = GzEncoder::new(Vec::new(), GzLevel::default());
    encoder.write_all(&bytes).unwrap();
    fs::write(&path, encoder.finish().unwrap()).unwrap();

    let mut opened = EncodingResolver::default().open(&path, "gbk").unwrap();
    assert!(!opened.resolved.fallback_used);
    let mut text = String::new();
    opened.reader.read_to_string(&mut text).unwrap();
    assert_eq!(text, GBK_DUMP);
}

#[test]
fn test_no_clean_candidate_opens_lossily() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("broken.sql");
    fs::write(&path, b"INSERT INTO t VALUES ('\xff\xfe ok');").unwrap();

    let resolver = EncodingResolver::new(vec![encoding_rs::UTF_8]);
    let mut opened = resolver.open(&path, "utf-8").unwrap();
    assert!(opened.resolved.degraded);

    let mut text = String::new();
    opened.reader.read_to_string(&mut text).unwrap();
    assert!(text.contains('\u{FFFD}'));
    assert!(text.ends_with(" ok');"));
    assert!(opened.reader.replacements() > 0);
}

struct RejectAll;

impl DecodeProbe for RejectAll {
    fn decodes_cleanly(&self, _: &Path, _: &'static encoding_rs::Encoding) -> Result<bool> {
        Ok(false)
    }
}

#[test]
fn test_pluggable_probe_is_consulted() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("plain.sql");
    fs::write(&path, "SELECT 1;").unwrap();

    let resolved = EncodingResolver::default()
        .with_probe(RejectAll)
        .resolve(&path, "big5")
        .unwrap();
    assert_eq!(resolved.encoding, encoding_rs::BIG5);
    assert!(resolved.degraded);
}

#[test]
fn test_unknown_hint_uses_utf8() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("plain.sql");
    fs::write(&path, "SELECT 1;").unwrap();

    let resolved = EncodingResolver::default().resolve(&path, "no-such-charset").unwrap();
    assert_eq!(resolved.encoding, encoding_rs::UTF_8);
    assert!(!resolved.fallback_used);
}

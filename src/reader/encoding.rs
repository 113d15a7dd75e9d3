//! Whole-file encoding resolution.
//!
//! One encoding is committed per file before any statement is scanned. The
//! hint is tried first, then a fixed fallback chain, and only when every
//! strict attempt fails is the file opened lossily under the hint.

use super::decode::DecodeReader;
use super::open_raw;
use crate::error::{LoadError, Result};
use encoding_rs::{Encoding, BIG5, GBK, UTF_8, WINDOWS_1252};
use std::io::{self, Read};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

/// Look up an encoding by WHATWG label (`utf-8`, `gbk`, `latin1`, ...).
///
/// Accepts a few Python-style spellings that show up in legacy configs.
pub fn encoding_for_label(label: &str) -> Option<&'static Encoding> {
    let normalized = label.trim().to_ascii_lowercase().replace('_', "-");
    let normalized = match normalized.as_str() {
        "utf8" => "utf-8",
        "latin-1" => "latin1",
        "cp1252" => "windows-1252",
        other => other,
    };
    Encoding::for_label(normalized.as_bytes())
}

/// Decides whether a file decodes cleanly under a candidate encoding.
pub trait DecodeProbe: Send + Sync {
    fn decodes_cleanly(&self, path: &Path, encoding: &'static Encoding) -> Result<bool>;
}

/// Streams the file (or its first `sample_limit` bytes) through a strict
/// decoder. Memory stays bounded by the decoder buffers.
#[derive(Debug, Clone, Copy, Default)]
pub struct StrictDecodeProbe {
    pub sample_limit: Option<u64>,
}

impl StrictDecodeProbe {
    pub fn sampled(limit: u64) -> Self {
        Self {
            sample_limit: Some(limit),
        }
    }
}

impl DecodeProbe for StrictDecodeProbe {
    fn decodes_cleanly(&self, path: &Path, encoding: &'static Encoding) -> Result<bool> {
        let raw = open_raw(path).map_err(|e| LoadError::encoding(path, e.to_string()))?;

        let outcome = match self.sample_limit {
            None => io::copy(&mut DecodeReader::strict(raw, encoding), &mut io::sink()).map(|_| true),
            Some(limit) => probe_prefix(raw, limit, encoding),
        };

        match outcome {
            Ok(clean) => Ok(clean),
            Err(e) if e.kind() == io::ErrorKind::InvalidData => Ok(false),
            Err(e) => Err(LoadError::encoding(path, e.to_string())),
        }
    }
}

/// Decode a prefix without treating a character cut at the sample boundary
/// as malformed.
fn probe_prefix(
    raw: Box<dyn Read + Send>,
    limit: u64,
    encoding: &'static Encoding,
) -> io::Result<bool> {
    let mut sample = Vec::new();
    raw.take(limit).read_to_end(&mut sample)?;
    let last = (sample.len() as u64) < limit;

    let mut decoder = encoding.new_decoder();
    let mut out = vec![0u8; 64 * 1024];
    let mut src = &sample[..];
    loop {
        let (result, read, _) = decoder.decode_to_utf8_without_replacement(src, &mut out, last);
        src = &src[read..];
        match result {
            encoding_rs::DecoderResult::InputEmpty => return Ok(true),
            encoding_rs::DecoderResult::OutputFull => continue,
            encoding_rs::DecoderResult::Malformed(_, _) => return Ok(false),
        }
    }
}

/// The single encoding committed for a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedEncoding {
    pub encoding: &'static Encoding,
    /// Opened lossily because no candidate decoded strictly
    pub degraded: bool,
    /// Decoded cleanly, but not with the hint
    pub fallback_used: bool,
}

impl ResolvedEncoding {
    pub fn name(&self) -> &'static str {
        self.encoding.name()
    }
}

/// A resolved file, ready to scan.
pub struct OpenedSource {
    pub resolved: ResolvedEncoding,
    pub reader: DecodeReader<Box<dyn Read + Send>>,
}

pub struct EncodingResolver {
    fallbacks: Vec<&'static Encoding>,
    probe: Arc<dyn DecodeProbe>,
}

impl Default for EncodingResolver {
    fn default() -> Self {
        Self::new(vec![UTF_8, GBK, BIG5, WINDOWS_1252])
    }
}

impl EncodingResolver {
    pub fn new(fallbacks: Vec<&'static Encoding>) -> Self {
        Self {
            fallbacks,
            probe: Arc::new(StrictDecodeProbe::default()),
        }
    }

    pub fn with_probe(mut self, probe: impl DecodeProbe + 'static) -> Self {
        self.probe = Arc::new(probe);
        self
    }

    pub fn fallbacks(&self) -> &[&'static Encoding] {
        &self.fallbacks
    }

    /// Commit one encoding for the whole file.
    pub fn resolve(&self, path: &Path, hint: &str) -> Result<ResolvedEncoding> {
        let hinted = match encoding_for_label(hint) {
            Some(enc) => enc,
            None => {
                warn!(
                    file = %path.display(),
                    hint,
                    "unknown encoding label, using UTF-8"
                );
                UTF_8
            }
        };

        let mut candidates = vec![hinted];
        for &enc in &self.fallbacks {
            if !candidates.contains(&enc) {
                candidates.push(enc);
            }
        }

        for (i, enc) in candidates.iter().copied().enumerate() {
            if self.probe.decodes_cleanly(path, enc)? {
                if i > 0 {
                    warn!(
                        file = %path.display(),
                        hint = hinted.name(),
                        used = enc.name(),
                        "hint encoding failed, using fallback"
                    );
                }
                return Ok(ResolvedEncoding {
                    encoding: enc,
                    degraded: false,
                    fallback_used: i > 0,
                });
            }
            debug!(file = %path.display(), encoding = enc.name(), "strict decode failed");
        }

        warn!(
            file = %path.display(),
            encoding = hinted.name(),
            "no encoding decodes cleanly, opening with replacement characters"
        );
        Ok(ResolvedEncoding {
            encoding: hinted,
            degraded: true,
            fallback_used: false,
        })
    }

    /// Resolve and open the decoding reader the producer will consume.
    pub fn open(&self, path: &Path, hint: &str) -> Result<OpenedSource> {
        let resolved = self.resolve(path, hint)?;
        let raw = open_raw(path).map_err(|e| LoadError::encoding(path, e.to_string()))?;
        Ok(OpenedSource {
            resolved,
            reader: DecodeReader::lossy(raw, resolved.encoding),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_label_aliases() {
        assert_eq!(encoding_for_label("UTF8"), Some(UTF_8));
        assert_eq!(encoding_for_label("latin_1"), Some(WINDOWS_1252));
        assert_eq!(encoding_for_label("cp1252"), Some(WINDOWS_1252));
        assert_eq!(encoding_for_label("gb2312"), Some(GBK));
        assert_eq!(encoding_for_label("klingon"), None);
    }

    #[test]
    fn test_hint_wins_when_clean() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.sql");
        fs::write(&path, "INSERT INTO t VALUES ('plain');").unwrap();

        let resolved = EncodingResolver::default().resolve(&path, "utf-8").unwrap();
        assert_eq!(resolved.encoding, UTF_8);
        assert!(!resolved.fallback_used);
        assert!(!resolved.degraded);
    }

    #[test]
    fn test_degraded_when_every_candidate_fails() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.sql");
        fs::write(&path, b"INSERT INTO t VALUES ('\xff\xff');").unwrap();

        let resolver = EncodingResolver::new(vec![UTF_8]);
        let opened = resolver.open(&path, "utf-8").unwrap();
        assert!(opened.resolved.degraded);

        let mut reader = opened.reader;
        let mut text = String::new();
        reader.read_to_string(&mut text).unwrap();
        assert!(text.contains('\u{FFFD}'));
        assert_eq!(reader.replacements(), 2);
    }

    #[test]
    fn test_missing_file_is_encoding_error() {
        let err = EncodingResolver::default()
            .resolve(Path::new("/nonexistent/dump.sql"), "utf-8")
            .unwrap_err();
        assert_eq!(err.category(), crate::error::ErrorCategory::Encoding);
    }

    #[test]
    fn test_sampled_probe_tolerates_cut_character() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.sql");
        // 3-byte UTF-8 char straddles the 4-byte sample boundary
        fs::write(&path, "abc科室").unwrap();

        let probe = StrictDecodeProbe::sampled(4);
        assert!(probe.decodes_cleanly(&path, UTF_8).unwrap());
    }
}

use encoding_rs::{CoderResult, Decoder, DecoderResult, Encoding};
use std::io::{self, Read};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

const INPUT_CHUNK: usize = 64 * 1024;
const OUTPUT_CHUNK: usize = 3 * INPUT_CHUNK + 16;

/// How malformed input is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeMode {
    /// Fail the read with `InvalidData`
    Strict,
    /// Substitute U+FFFD and count the substitution
    Lossy,
}

/// `Read` adapter that turns bytes in one committed encoding into UTF-8.
///
/// A leading BOM is sniffed and removed. The encoding never changes once the
/// reader is built, so a multi-byte character split across two underlying
/// reads is reassembled by the decoder instead of being re-probed.
pub struct DecodeReader<R: Read> {
    inner: R,
    encoding: &'static Encoding,
    decoder: Decoder,
    mode: DecodeMode,
    in_buf: Box<[u8]>,
    in_start: usize,
    in_end: usize,
    out_buf: Vec<u8>,
    out_pos: usize,
    consumed: u64,
    eof: bool,
    finished: bool,
    replacements: Arc<AtomicU64>,
}

impl<R: Read> DecodeReader<R> {
    pub fn new(inner: R, encoding: &'static Encoding, mode: DecodeMode) -> Self {
        Self {
            inner,
            encoding,
            decoder: encoding.new_decoder(),
            mode,
            in_buf: vec![0u8; INPUT_CHUNK].into_boxed_slice(),
            in_start: 0,
            in_end: 0,
            out_buf: Vec::with_capacity(OUTPUT_CHUNK),
            out_pos: 0,
            consumed: 0,
            eof: false,
            finished: false,
            replacements: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn strict(inner: R, encoding: &'static Encoding) -> Self {
        Self::new(inner, encoding, DecodeMode::Strict)
    }

    pub fn lossy(inner: R, encoding: &'static Encoding) -> Self {
        Self::new(inner, encoding, DecodeMode::Lossy)
    }

    pub fn encoding(&self) -> &'static Encoding {
        self.encoding
    }

    /// Replacement characters emitted so far
    pub fn replacements(&self) -> u64 {
        self.replacements.load(Ordering::Relaxed)
    }

    /// Shared view of the replacement count that outlives the reader, for
    /// callers that hand the reader off to a scanner.
    pub fn replacement_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.replacements)
    }

    fn refill_input(&mut self) -> io::Result<()> {
        loop {
            match self.inner.read(&mut self.in_buf) {
                Ok(n) => {
                    self.in_start = 0;
                    self.in_end = n;
                    if n == 0 {
                        self.eof = true;
                    }
                    return Ok(());
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    fn fill_output(&mut self) -> io::Result<()> {
        if self.in_start == self.in_end && !self.eof {
            self.refill_input()?;
        }

        self.out_buf.clear();
        self.out_buf.resize(OUTPUT_CHUNK, 0);
        self.out_pos = 0;

        let last = self.eof;
        let src = &self.in_buf[self.in_start..self.in_end];

        match self.mode {
            DecodeMode::Strict => {
                let (result, read, written) =
                    self.decoder
                        .decode_to_utf8_without_replacement(src, &mut self.out_buf, last);
                self.out_buf.truncate(written);
                let malformed_at = self.consumed + self.in_start as u64 + read as u64;
                self.in_start += read;
                match result {
                    DecoderResult::InputEmpty => {
                        self.consumed += self.in_end as u64;
                        self.in_start = 0;
                        self.in_end = 0;
                        if last {
                            self.finished = true;
                        }
                    }
                    DecoderResult::OutputFull => {}
                    DecoderResult::Malformed(_, _) => {
                        return Err(io::Error::new(
                            io::ErrorKind::InvalidData,
                            format!(
                                "malformed {} sequence before byte {}",
                                self.encoding.name(),
                                malformed_at
                            ),
                        ));
                    }
                }
            }
            DecodeMode::Lossy => {
                let (result, read, written, had_replacements) =
                    self.decoder.decode_to_utf8(src, &mut self.out_buf, last);
                self.out_buf.truncate(written);
                self.in_start += read;
                if had_replacements {
                    let count = memchr::memmem::find_iter(&self.out_buf, "\u{FFFD}".as_bytes())
                        .count() as u64;
                    self.replacements.fetch_add(count, Ordering::Relaxed);
                }
                match result {
                    CoderResult::InputEmpty => {
                        self.consumed += self.in_end as u64;
                        self.in_start = 0;
                        self.in_end = 0;
                        if last {
                            self.finished = true;
                        }
                    }
                    CoderResult::OutputFull => {}
                }
            }
        }
        Ok(())
    }
}

impl<R: Read> Read for DecodeReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            if self.out_pos < self.out_buf.len() {
                let n = (self.out_buf.len() - self.out_pos).min(buf.len());
                buf[..n].copy_from_slice(&self.out_buf[self.out_pos..self.out_pos + n]);
                self.out_pos += n;
                return Ok(n);
            }
            if self.finished {
                return Ok(0);
            }
            self.fill_output()?;
        }
    }
}

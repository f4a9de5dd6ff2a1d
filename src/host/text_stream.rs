//! Text-mode pipe handling
//!
//! Child pipes carry bytes; callers see text. Decoding is incremental so a
//! multibyte character or a `\r\n` pair split across two reads still comes
//! out whole, and a sized read never hands back more characters than asked.

use std::io::{self, Read};

use crate::core::Platform;

/// Incremental UTF-8 decoder with universal newline translation
///
/// `\r\n` and a lone `\r` both become `\n`. Invalid sequences are replaced
/// with U+FFFD.
#[derive(Debug, Default)]
pub struct TextDecoder {
    pending: Vec<u8>,
    pending_cr: bool,
}

impl TextDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode the next chunk, holding back anything that may still change
    /// meaning once more bytes arrive
    pub fn decode(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);

        let mut text = String::new();
        let mut start = 0;
        loop {
            match std::str::from_utf8(&self.pending[start..]) {
                Ok(valid) => {
                    text.push_str(valid);
                    start = self.pending.len();
                    break;
                }
                Err(e) => {
                    let valid_end = start + e.valid_up_to();
                    text.push_str(&String::from_utf8_lossy(&self.pending[start..valid_end]));
                    match e.error_len() {
                        Some(len) => {
                            text.push(char::REPLACEMENT_CHARACTER);
                            start = valid_end + len;
                        }
                        // Incomplete sequence at the end, wait for the rest
                        None => {
                            start = valid_end;
                            break;
                        }
                    }
                }
            }
        }
        self.pending.drain(..start);

        self.translate_newlines(&text)
    }

    /// Flush everything still held back
    pub fn finish(&mut self) -> String {
        let mut out = String::new();
        if self.pending_cr {
            self.pending_cr = false;
            out.push('\n');
        }
        if !self.pending.is_empty() {
            out.push_str(&String::from_utf8_lossy(&self.pending));
            self.pending.clear();
        }
        out
    }

    fn translate_newlines(&mut self, text: &str) -> String {
        if text.is_empty() {
            return String::new();
        }

        let mut out = String::with_capacity(text.len() + 1);
        let mut chars = text.chars().peekable();

        if self.pending_cr {
            self.pending_cr = false;
            out.push('\n');
            if chars.peek() == Some(&'\n') {
                chars.next();
            }
        }

        while let Some(c) = chars.next() {
            if c != '\r' {
                out.push(c);
                continue;
            }
            match chars.peek() {
                Some('\n') => {
                    chars.next();
                    out.push('\n');
                }
                Some(_) => out.push('\n'),
                None => self.pending_cr = true,
            }
        }

        out
    }
}

/// Translate `\n` into the platform line ending for writes to the child
pub fn encode_for_child(text: &str, platform: &dyn Platform) -> String {
    match platform.line_ending() {
        "\n" => text.to_string(),
        ending => text.replace('\n', ending),
    }
}

/// Text-mode reader over a child pipe
#[derive(Debug)]
pub struct TextReader<R> {
    inner: R,
    decoder: TextDecoder,
    /// Decoded text beyond the size of the last sized read
    carry: String,
}

impl<R: Read> TextReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            decoder: TextDecoder::new(),
            carry: String::new(),
        }
    }

    /// Block until end of stream and return everything left
    pub fn read_to_end_text(&mut self) -> io::Result<String> {
        let mut bytes = Vec::new();
        self.inner.read_to_end(&mut bytes)?;
        let mut text = std::mem::take(&mut self.carry);
        text.push_str(&self.decoder.decode(&bytes));
        text.push_str(&self.decoder.finish());
        Ok(text)
    }

    /// Return at most `size` characters, blocking until at least one is
    /// available.
    ///
    /// Returns an empty string only at end of stream.
    pub fn read_text(&mut self, size: usize) -> io::Result<String> {
        let size = size.max(1);
        if self.carry.is_empty() {
            self.carry = self.fill(size)?;
        }
        Ok(take_chars(&mut self.carry, size))
    }

    fn fill(&mut self, size: usize) -> io::Result<String> {
        let mut buf = vec![0u8; size];
        loop {
            let n = match self.inner.read(&mut buf) {
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            if n == 0 {
                return Ok(self.decoder.finish());
            }
            let text = self.decoder.decode(&buf[..n]);
            if !text.is_empty() {
                return Ok(text);
            }
        }
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

/// Split off the first `n` characters of `text`, leaving the rest
fn take_chars(text: &mut String, n: usize) -> String {
    match text.char_indices().nth(n) {
        Some((at, _)) => {
            let rest = text.split_off(at);
            std::mem::replace(text, rest)
        }
        None => std::mem::take(text),
    }
}

//! Byte-stream to line converter: partial-line aging, NUL sanitisation,
//! buffer compaction. Grounded on `components/launcher/src/service.rs`'s
//! `pipe_stdout`/`pipe_stderr` (read-until-newline, then hand the line to
//! the next stage), generalised to the spec's partial-line-aging and
//! buffer-growth rules since the teacher relies on `BufRead::read_line`
//! blocking on a dedicated thread, which the wrapper's non-blocking event
//! loop cannot do.

use std::time::{Duration, Instant};

/// `(String, had_errors)`: the narrow contract the spec leaves for a
/// charset-conversion collaborator. A real deployment would substitute a
/// full charset-aware decoder behind this same signature.
pub trait Decoder {
    fn decode(&self, bytes: &[u8]) -> (String, bool);
}

/// UTF-8 passthrough with a Latin-1 fallback on invalid sequences, matching
/// "on conversion failure the line is emitted as the converter's best
/// effort" (spec.md §4.4).
pub struct Utf8OrLatin1;

impl Decoder for Utf8OrLatin1 {
    fn decode(&self, bytes: &[u8]) -> (String, bool) {
        match std::str::from_utf8(bytes) {
            Ok(s) => (s.to_string(), false),
            Err(_) => {
                let s: String = bytes.iter().map(|&b| b as char).collect();
                (s, true)
            }
        }
    }
}

pub struct LineAssembler<D: Decoder> {
    decoder: D,
    buf: Vec<u8>,
    partial_since: Option<Instant>,
    lf_delay: Duration,
    block_size: usize,
}

impl<D: Decoder> LineAssembler<D> {
    pub fn new(decoder: D, block_size: usize, lf_delay: Duration) -> Self {
        LineAssembler {
            decoder,
            buf: Vec::with_capacity(block_size * 2),
            partial_since: None,
            lf_delay,
            block_size,
        }
    }

    /// Feed newly-read bytes in. Returns every complete line produced,
    /// including a trailing partial line flushed because it aged past
    /// `lf_delay`.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        if bytes.is_empty() && self.buf.is_empty() {
            return Vec::new();
        }
        if self.buf.is_empty() && !bytes.is_empty() {
            self.partial_since = Some(Instant::now());
        }
        self.grow_if_needed(bytes.len());
        self.buf.extend_from_slice(bytes);

        let mut lines = Vec::new();
        loop {
            match self.buf.iter().position(|&b| b == b'\n') {
                Some(pos) => {
                    let mut raw: Vec<u8> = self.buf.drain(..=pos).collect();
                    raw.pop(); // drop the LF
                    if raw.last() == Some(&b'\r') {
                        raw.pop();
                    }
                    lines.push(self.sanitize_and_decode(&raw));
                    // A fresh partial-line timer starts for whatever remains.
                    self.partial_since = if self.buf.is_empty() {
                        None
                    } else {
                        Some(Instant::now())
                    };
                }
                None => break,
            }
        }

        if !self.buf.is_empty() {
            if let Some(since) = self.partial_since {
                if since.elapsed() >= self.lf_delay {
                    let raw = std::mem::take(&mut self.buf);
                    self.partial_since = None;
                    lines.push(self.sanitize_and_decode(&raw));
                }
            }
        }

        lines
    }

    fn sanitize_and_decode(&self, raw: &[u8]) -> String {
        let sanitized: Vec<u8> = raw
            .iter()
            .map(|&b| if b == 0 { b'?' } else { b })
            .collect();
        let (s, had_errors) = self.decoder.decode(&sanitized);
        if had_errors {
            log::warn!("child output contained bytes that could not be decoded cleanly");
        }
        s
    }

    /// Double the buffer (with a minimum +10% growth) when the incoming
    /// chunk would otherwise force frequent small reallocations.
    fn grow_if_needed(&mut self, incoming: usize) {
        let needed = self.buf.len() + incoming;
        if needed <= self.buf.capacity() {
            return;
        }
        let doubled = self.buf.capacity().max(self.block_size * 2) * 2;
        let min_growth = self.buf.capacity() + self.buf.capacity() / 10 + 1;
        let target = doubled.max(min_growth).max(needed);
        self.buf.reserve(target.saturating_sub(self.buf.len()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assembler() -> LineAssembler<Utf8OrLatin1> {
        LineAssembler::new(Utf8OrLatin1, 64, Duration::from_millis(50))
    }

    #[test]
    fn splits_on_lf_and_strips_cr() {
        let mut a = assembler();
        let lines = a.feed(b"hello\r\nworld\n");
        assert_eq!(lines, vec!["hello".to_string(), "world".to_string()]);
    }

    #[test]
    fn partial_line_without_lf_is_held() {
        let mut a = assembler();
        let lines = a.feed(b"no newline yet");
        assert!(lines.is_empty());
    }

    #[test]
    fn partial_line_flushes_after_age_threshold() {
        let mut a = LineAssembler::new(Utf8OrLatin1, 64, Duration::from_millis(10));
        let lines = a.feed(b"prompt> ");
        assert!(lines.is_empty());
        std::thread::sleep(Duration::from_millis(20));
        let lines = a.feed(b"");
        assert_eq!(lines, vec!["prompt> ".to_string()]);
    }

    #[test]
    fn embedded_nul_is_replaced_with_question_mark() {
        let mut a = assembler();
        let lines = a.feed(b"a\0b\n");
        assert_eq!(lines, vec!["a?b".to_string()]);
    }

    #[test]
    fn emitted_lines_never_contain_lf_or_nul() {
        let mut a = assembler();
        let lines = a.feed(b"one\ntwo\0\n");
        for line in &lines {
            assert!(!line.contains('\n'));
            assert!(!line.contains('\0'));
        }
    }

    #[test]
    fn multiple_lines_in_one_chunk_all_emitted() {
        let mut a = assembler();
        let lines = a.feed(b"a\nb\nc\n");
        assert_eq!(lines, vec!["a", "b", "c"]);
    }
}

//! Line framing for the envelope stream.
//!
//! Each record on the wire is one JSON object followed by `\n`; `\r\n` is
//! tolerated. The framer does not look inside records, so JSON validity is
//! left to the dispatcher.
//!
//! ```text
//! {"cmd":"onCprAnalysis",...}\n{"cmd":"onCprAn   ← read 1
//! alysis",...}\r\n                             ← read 2
//! ```

use crate::constants::MAX_LINE_BUFFER;

/// Incremental line decoder that handles partial reads.
///
/// Feed bytes via [`LineDecoder::feed`] and collect complete records.
/// Bytes are buffered raw, so a UTF-8 sequence split across two reads is
/// reassembled before it is decoded.
#[derive(Debug)]
pub struct LineDecoder {
    buf: Vec<u8>,
    limit: usize,
    overflowed: Option<usize>,
}

impl LineDecoder {
    /// Create a new decoder with the default 1 MiB cap.
    pub fn new() -> Self {
        Self::with_limit(MAX_LINE_BUFFER)
    }

    /// Create a decoder that discards unterminated data beyond `limit` bytes.
    pub fn with_limit(limit: usize) -> Self {
        Self {
            buf: Vec::new(),
            limit,
            overflowed: None,
        }
    }

    /// Feed bytes into the decoder and extract every complete record.
    ///
    /// Records come back in arrival order, trimmed, with empty lines dropped.
    /// The unterminated tail is kept for the next call.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(bytes);

        let mut records = Vec::new();
        if let Some(last) = self.buf.iter().rposition(|&b| b == b'\n') {
            let tail = self.buf.split_off(last + 1);
            let ready = std::mem::replace(&mut self.buf, tail);
            records.extend(ready.split(|&b| b == b'\n').filter_map(Self::clean_line));
        }

        if self.buf.len() > self.limit {
            let discarded = self.buf.len();
            log::warn!("[Framing] No record separator within {discarded} bytes, discarding buffer");
            self.buf.clear();
            self.buf.shrink_to_fit();
            self.overflowed = Some(self.overflowed.unwrap_or(0) + discarded);
        }

        records
    }

    /// Feed one datagram, treating its end as a record boundary.
    pub fn feed_datagram(&mut self, datagram: &[u8]) -> Vec<String> {
        let mut records = self.feed(datagram);
        if self.has_partial() {
            records.extend(self.feed(b"\n"));
        }
        records
    }

    /// Returns true if the decoder has buffered partial data.
    pub fn has_partial(&self) -> bool {
        !self.buf.is_empty()
    }

    /// Number of bytes discarded by the overflow guard since the last call.
    pub fn take_overflow(&mut self) -> Option<usize> {
        self.overflowed.take()
    }

    fn clean_line(line: &[u8]) -> Option<String> {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        let text = String::from_utf8_lossy(line);
        let trimmed = text.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_owned())
        }
    }
}

impl Default for LineDecoder {
    fn default() -> Self {
        Self::new()
    }
}

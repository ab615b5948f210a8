//! Input buffering and line framing.

use crate::error::Error;

/// Bytes received from the peer that have not yet been consumed as lines.
///
/// Data is appended at the tail by the event loop. [`Self::next_line`] removes
/// a prefix up to and including the first terminator and hands back the bytes
/// before it. Trailing data without a terminator stays buffered.
///
/// Terminator matching is an exact byte-sequence comparison.
#[derive(Debug, Clone)]
pub struct InputBuffer {
    buf: Vec<u8>,
    terminator: Vec<u8>,
    max_size: usize,
    // Offset below which no terminator can start, so repeated scans of a
    // long partial line stay linear.
    scan_from: usize,
}

impl InputBuffer {
    /// Creates an empty buffer. The terminator must be non-empty and the
    /// maximum size non-zero.
    pub fn new(terminator: impl Into<Vec<u8>>, max_size: usize) -> Result<Self, Error> {
        let terminator = terminator.into();
        if terminator.is_empty() {
            return Err(Error::InvalidConfig(
                "line terminator must not be empty".to_string(),
            ));
        }
        if max_size == 0 {
            return Err(Error::InvalidConfig(
                "max_input_size must be greater than zero".to_string(),
            ));
        }
        Ok(Self {
            buf: Vec::new(),
            terminator,
            max_size,
            scan_from: 0,
        })
    }

    pub fn terminator(&self) -> &[u8] {
        &self.terminator
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Unconsumed bytes, oldest first.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    pub fn clear(&mut self) {
        self.buf.clear();
        self.scan_from = 0;
    }

    /// Removes the first `n` bytes. Meant for handlers that do their own
    /// framing instead of line splitting.
    pub fn consume(&mut self, n: usize) {
        let n = n.min(self.buf.len());
        self.buf.drain(..n);
        self.scan_from = 0;
    }

    /// Extracts the next complete line, without its terminator.
    pub fn next_line(&mut self) -> Option<Vec<u8>> {
        let tlen = self.terminator.len();
        if self.buf.len() < tlen {
            return None;
        }

        let found = self.buf[self.scan_from..]
            .windows(tlen)
            .position(|window| window == self.terminator.as_slice())
            .map(|pos| pos + self.scan_from);

        match found {
            Some(pos) => {
                let mut line: Vec<u8> = self.buf.drain(..pos + tlen).collect();
                line.truncate(pos);
                self.scan_from = 0;
                Some(line)
            }
            None => {
                // A terminator split across reads may start in the last
                // tlen - 1 bytes.
                self.scan_from = self.buf.len() + 1 - tlen;
                None
            }
        }
    }

    /// Fails once the buffered data exceeds the configured cap.
    pub fn check_overflow(&self) -> Result<(), Error> {
        if self.buf.len() > self.max_size {
            Err(Error::InputOverflow {
                len: self.buf.len(),
                max: self.max_size,
            })
        } else {
            Ok(())
        }
    }
}

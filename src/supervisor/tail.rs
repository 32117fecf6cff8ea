// src/supervisor/tail.rs

//! Trailing terminal output kept for failure diagnostics

use std::collections::VecDeque;

/// Bounded ring of the most recent bytes dpkg wrote to its terminal
#[derive(Debug)]
pub struct OutputTail {
    buf: VecDeque<u8>,
    capacity: usize,
}

impl OutputTail {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, bytes: &[u8]) {
        if self.capacity == 0 {
            return;
        }
        let bytes = if bytes.len() > self.capacity {
            &bytes[bytes.len() - self.capacity..]
        } else {
            bytes
        };
        let overflow = (self.buf.len() + bytes.len()).saturating_sub(self.capacity);
        self.buf.drain(..overflow);
        self.buf.extend(bytes);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn contents(&self) -> String {
        let (a, b) = self.buf.as_slices();
        let mut bytes = Vec::with_capacity(a.len() + b.len());
        bytes.extend_from_slice(a);
        bytes.extend_from_slice(b);
        String::from_utf8_lossy(&bytes).into_owned()
    }

    /// Every `E:` line, or the last `fallback_len` bytes when there are none
    pub fn diagnostic(&self, fallback_len: usize) -> String {
        let text = self.contents();
        let errors: Vec<&str> = text
            .lines()
            .map(|line| line.trim_end_matches('\r'))
            .filter(|line| line.starts_with("E:"))
            .collect();
        if !errors.is_empty() {
            return errors.join("\n");
        }

        let start = text.len().saturating_sub(fallback_len);
        // Stay on a char boundary after lossy decoding
        let start = (start..=text.len())
            .find(|&i| text.is_char_boundary(i))
            .unwrap_or(text.len());
        text[start..].trim().to_string()
    }
}

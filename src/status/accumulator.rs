// src/status/accumulator.rs

//! Reassembles newline-terminated records from the status pipe
//!
//! dpkg writes status records in pieces, so the pipe is consumed one byte at
//! a time into a growable buffer. A read that returns nothing (EOF, an empty
//! non-blocking pipe, or an error) ends the current pass without touching the
//! partial line; the next pass picks up where this one stopped.

use std::io::{ErrorKind, Read};
use tracing::debug;

/// Growable line buffer that survives across reads
#[derive(Debug, Default)]
pub struct LineAccumulator {
    buf: Vec<u8>,
}

impl LineAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Iterate over the complete lines currently readable from `reader`
    ///
    /// The iterator stops at the first read that yields no byte. Dropping it
    /// early keeps any partially read line for the next call.
    pub fn lines<'a, R: Read>(&'a mut self, reader: &'a mut R) -> Lines<'a, R> {
        Lines { acc: self, reader }
    }

    /// Bytes of an unterminated line still waiting for its newline
    pub fn pending(&self) -> &[u8] {
        &self.buf
    }

    /// Append one byte; returns the finished line on `\n`
    fn push(&mut self, byte: u8) -> Option<String> {
        if byte == b'\n' {
            let line = String::from_utf8_lossy(&self.buf).into_owned();
            self.buf.clear();
            Some(line)
        } else {
            self.buf.push(byte);
            None
        }
    }
}

/// Lazy sequence of complete lines, see [`LineAccumulator::lines`]
pub struct Lines<'a, R> {
    acc: &'a mut LineAccumulator,
    reader: &'a mut R,
}

impl<R: Read> Iterator for Lines<'_, R> {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        let mut byte = [0u8; 1];
        loop {
            match self.reader.read(&mut byte) {
                Ok(0) => return None,
                Ok(_) => {
                    if let Some(line) = self.acc.push(byte[0]) {
                        return Some(line);
                    }
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    if e.kind() != ErrorKind::WouldBlock {
                        debug!("Status pipe read ended: {}", e);
                    }
                    return None;
                }
            }
        }
    }
}

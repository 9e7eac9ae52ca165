//! Newline framing for output that arrives in arbitrary pieces.
//!
//! Redaction patterns only hold on whole lines, so everything the agent
//! emits is held here until its line completes.

/// Pending bytes of an unterminated line.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `chunk` and return everything up to and including the last
    /// newline seen so far, or `None` while no line has completed.
    pub fn push(&mut self, chunk: &[u8]) -> Option<Vec<u8>> {
        self.pending.extend_from_slice(chunk);
        let last_newline = self.pending.iter().rposition(|b| *b == b'\n')?;
        let rest = self.pending.split_off(last_newline + 1);
        Some(std::mem::replace(&mut self.pending, rest))
    }

    /// Take the unterminated remainder, leaving the buffer empty.
    pub fn take(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.pending)
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

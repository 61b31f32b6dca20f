//! Splitting outgoing data messages into frames (RFC 6455 Section 5.4).

use crate::protocol::OpCode;

/// One outgoing fragment, borrowing its slice of the message payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fragment<'a> {
    /// Message opcode on the first fragment, `Continuation` after that.
    pub opcode: OpCode,
    /// Set on the last fragment.
    pub fin: bool,
    /// Payload slice.
    pub payload: &'a [u8],
}

/// Iterator over the fragments of one data message.
///
/// Payloads no longer than `fragment_size` yield a single final fragment;
/// an empty payload still yields one empty fragment.
#[derive(Debug, Clone)]
pub struct MessageFragmenter<'a> {
    payload: &'a [u8],
    opcode: OpCode,
    fragment_size: usize,
    offset: usize,
    started: bool,
}

impl<'a> MessageFragmenter<'a> {
    /// Create a new fragmenter for the given payload.
    #[inline]
    #[must_use]
    pub fn new(payload: &'a [u8], opcode: OpCode, fragment_size: usize) -> Self {
        Self {
            payload,
            opcode,
            fragment_size: fragment_size.max(1),
            offset: 0,
            started: false,
        }
    }

    /// Whether the payload spans more than one fragment.
    #[inline]
    #[must_use]
    pub fn needs_fragmentation(&self) -> bool {
        self.payload.len() > self.fragment_size
    }

    /// Payload bytes not yet yielded.
    #[inline]
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.payload.len() - self.offset
    }
}

impl<'a> Iterator for MessageFragmenter<'a> {
    type Item = Fragment<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.started && self.offset >= self.payload.len() {
            return None;
        }

        let end = self.payload.len().min(self.offset + self.fragment_size);
        let opcode = if self.started {
            OpCode::Continuation
        } else {
            self.opcode
        };
        let fragment = Fragment {
            opcode,
            fin: end == self.payload.len(),
            payload: &self.payload[self.offset..end],
        };

        self.started = true;
        self.offset = end;
        Some(fragment)
    }
}

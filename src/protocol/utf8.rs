//! Incremental UTF-8 validation for fragmented text messages.
//!
//! A text message may be split at any byte, including the middle of a
//! multi-byte sequence, so validity is tracked across fragments and a
//! dangling sequence is only an error once the final fragment arrives.

use crate::error::ProtocolError;

/// Incremental UTF-8 validator.
///
/// Only the trailing incomplete sequence of each fragment (at most three
/// bytes) is carried over; everything before it is validated in place.
#[derive(Debug, Clone, Default)]
pub struct Utf8Validator {
    carry: [u8; 4],
    carry_len: usize,
}

impl Utf8Validator {
    /// Create a validator with no pending bytes.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the next fragment of a text message.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidUtf8`] on an invalid sequence, or on an
    /// incomplete sequence when `is_final` is set.
    pub fn validate(&mut self, data: &[u8], is_final: bool) -> Result<(), ProtocolError> {
        let mut data = data;

        if self.carry_len > 0 {
            // Complete the carried sequence one byte at a time
            while self.carry_len < 4 && !data.is_empty() {
                self.carry[self.carry_len] = data[0];
                self.carry_len += 1;
                data = &data[1..];

                match std::str::from_utf8(&self.carry[..self.carry_len]) {
                    Ok(_) => {
                        self.carry_len = 0;
                        break;
                    }
                    Err(e) if e.error_len().is_some() => return Err(ProtocolError::InvalidUtf8),
                    Err(_) => {}
                }
            }

            if self.carry_len > 0 {
                return if is_final {
                    Err(ProtocolError::InvalidUtf8)
                } else {
                    Ok(())
                };
            }
        }

        match std::str::from_utf8(data) {
            Ok(_) => Ok(()),
            Err(e) if e.error_len().is_none() && !is_final => {
                let tail = &data[e.valid_up_to()..];
                self.carry[..tail.len()].copy_from_slice(tail);
                self.carry_len = tail.len();
                Ok(())
            }
            Err(_) => Err(ProtocolError::InvalidUtf8),
        }
    }

    /// Drop any pending bytes.
    pub fn reset(&mut self) {
        self.carry_len = 0;
    }

    /// Whether a multi-byte sequence is waiting for its continuation bytes.
    #[must_use]
    pub fn has_incomplete(&self) -> bool {
        self.carry_len > 0
    }
}

/// Validate a complete payload.
///
/// # Errors
///
/// Returns [`ProtocolError::InvalidUtf8`] if `data` is not valid UTF-8.
pub fn validate_utf8(data: &[u8]) -> Result<(), ProtocolError> {
    std::str::from_utf8(data)
        .map(|_| ())
        .map_err(|_| ProtocolError::InvalidUtf8)
}

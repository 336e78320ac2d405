//! Message reassembler (C4): turns a stream of decoded frames into
//! application-level events, enforcing the fragmentation rules of
//! SPEC_FULL.md §4.4.
//!
//! Grounded in the teacher's `read.rs` `poll_messages` fragmentation
//! bookkeeping (`FragmentedMessage`), generalized into a standalone state
//! machine that doesn't own a socket, so the orchestrator (C6) can drive it
//! off of whatever the decoder (C2) produces.

use crate::frame::{CloseCode, Frame, OpCode};
use log::warn;

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Text(String),
    Binary(Vec<u8>),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    Closed { code: CloseCode, reason: String },
    Error { code: CloseCode, message: String },
}

/// Tracks how many trailing bytes of `buffer` look like the start of an
/// incomplete UTF-8 sequence, so each append only re-validates the bytes
/// that weren't already known-good (SPEC_FULL.md §9, streaming UTF-8).
#[derive(Debug, Default)]
struct Utf8Cursor {
    valid_up_to: usize,
}

impl Utf8Cursor {
    fn reset(&mut self) {
        self.valid_up_to = 0;
    }

    /// Re-validates `buffer[valid_up_to..]`. Returns `Ok(())` if the tail is
    /// either fully valid or ends in an incomplete (but not invalid)
    /// sequence; advances `valid_up_to` to the longest verified prefix.
    fn extend(&mut self, buffer: &[u8]) -> Result<(), ()> {
        match std::str::from_utf8(&buffer[self.valid_up_to..]) {
            Ok(_) => {
                self.valid_up_to = buffer.len();
                Ok(())
            }
            Err(err) => {
                let good = self.valid_up_to + err.valid_up_to();
                if err.error_len().is_some() {
                    return Err(());
                }
                self.valid_up_to = good;
                Ok(())
            }
        }
    }
}

/// `{buffer, frame_count, is_text}` from SPEC_FULL.md §3, invariants I1-I4.
#[derive(Default)]
pub struct Reassembler {
    buffer: Vec<u8>,
    frame_count: u32,
    is_text: bool,
    utf8: Utf8Cursor,
}

impl Reassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clears message-in-progress state. Called at message boundaries and
    /// on every protocol error (property P5).
    fn reset(&mut self) {
        self.buffer.clear();
        self.frame_count = 0;
        self.is_text = false;
        self.utf8.reset();
    }

    pub fn frame_count(&self) -> u32 {
        self.frame_count
    }

    pub fn consume(&mut self, frame: Frame, max_message_size: Option<usize>) -> Vec<Event> {
        match frame.opcode {
            OpCode::Close => {
                let code = frame.close_code.unwrap_or(CloseCode::NoStatusReceived);
                let event = match String::from_utf8(frame.payload) {
                    Ok(reason) => Event::Closed { code, reason },
                    Err(_) => Event::Closed {
                        code: CloseCode::ProtocolError,
                        reason: "connection closed by server".to_string(),
                    },
                };
                vec![event]
            }
            OpCode::Ping => vec![Event::Ping(frame.payload)],
            OpCode::Pong => vec![Event::Pong(frame.payload)],
            OpCode::Continue => self.consume_continue(frame, max_message_size),
            OpCode::Text | OpCode::Binary => self.consume_data(frame, max_message_size),
        }
    }

    fn consume_continue(&mut self, frame: Frame, max_message_size: Option<usize>) -> Vec<Event> {
        if self.frame_count == 0 {
            let message = "first frame cannot be continuation";
            warn!("reassembler: {}", message);
            self.reset();
            return vec![Event::Error {
                code: CloseCode::ProtocolError,
                message: message.to_string(),
            }];
        }

        self.append(frame.payload, frame.final_fragment, max_message_size)
    }

    fn consume_data(&mut self, frame: Frame, max_message_size: Option<usize>) -> Vec<Event> {
        if self.frame_count > 0 {
            let message = "interleaved data frame";
            warn!("reassembler: {}", message);
            self.reset();
            return vec![Event::Error {
                code: CloseCode::ProtocolError,
                message: message.to_string(),
            }];
        }

        self.is_text = frame.opcode == OpCode::Text;
        self.append(frame.payload, frame.final_fragment, max_message_size)
    }

    fn append(
        &mut self,
        payload: Vec<u8>,
        final_fragment: bool,
        max_message_size: Option<usize>,
    ) -> Vec<Event> {
        self.buffer.extend_from_slice(&payload);
        self.frame_count += 1;

        if let Some(max) = max_message_size {
            if self.buffer.len() > max {
                let message = "message too big";
                warn!("reassembler: {}", message);
                self.reset();
                return vec![Event::Error {
                    code: CloseCode::MessageTooBig,
                    message: message.to_string(),
                }];
            }
        }

        if self.is_text {
            if self.utf8.extend(&self.buffer).is_err() {
                let message = "invalid UTF-8";
                warn!("reassembler: {}", message);
                self.reset();
                return vec![Event::Error {
                    code: CloseCode::InvalidPayload,
                    message: message.to_string(),
                }];
            }
        }

        if !final_fragment {
            return Vec::new();
        }

        let is_text = self.is_text;
        let buffer = std::mem::take(&mut self.buffer);
        self.reset();

        if is_text {
            match String::from_utf8(buffer) {
                Ok(text) => vec![Event::Text(text)],
                Err(_) => vec![Event::Error {
                    code: CloseCode::InvalidPayload,
                    message: "invalid UTF-8".to_string(),
                }],
            }
        } else {
            vec![Event::Binary(buffer)]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(fin: bool, opcode: OpCode, payload: &[u8]) -> Frame {
        Frame::new(fin, opcode, payload.to_vec())
    }

    #[test]
    fn single_frame_text_message() {
        let mut r = Reassembler::new();
        let events = r.consume(frame(true, OpCode::Text, b"Hello"), None);
        assert_eq!(events, vec![Event::Text("Hello".to_string())]);
        assert_eq!(r.frame_count(), 0);
    }

    #[test]
    fn scenario_3_two_fragment_text() {
        let mut r = Reassembler::new();
        assert!(r.consume(frame(false, OpCode::Text, b"Hel"), None).is_empty());
        let events = r.consume(frame(true, OpCode::Continue, b"lo"), None);
        assert_eq!(events, vec![Event::Text("Hello".to_string())]);
    }

    #[test]
    fn scenario_4_ping_interleaved_with_fragments() {
        let mut r = Reassembler::new();
        assert!(r.consume(frame(false, OpCode::Text, b"Hel"), None).is_empty());
        let ping_events = r.consume(frame(true, OpCode::Ping, b""), None);
        assert_eq!(ping_events, vec![Event::Ping(Vec::new())]);
        let events = r.consume(frame(true, OpCode::Continue, b"lo"), None);
        assert_eq!(events, vec![Event::Text("Hello".to_string())]);
    }

    #[test]
    fn scenario_7_leading_continuation_is_error() {
        let mut r = Reassembler::new();
        let events = r.consume(frame(true, OpCode::Continue, b"A"), None);
        assert_eq!(
            events,
            vec![Event::Error {
                code: CloseCode::ProtocolError,
                message: "first frame cannot be continuation".to_string(),
            }]
        );
        assert_eq!(r.frame_count(), 0);
    }

    #[test]
    fn interleaved_data_frame_is_error() {
        let mut r = Reassembler::new();
        assert!(r.consume(frame(false, OpCode::Text, b"Hel"), None).is_empty());
        let events = r.consume(frame(true, OpCode::Binary, b"oops"), None);
        assert_eq!(
            events,
            vec![Event::Error {
                code: CloseCode::ProtocolError,
                message: "interleaved data frame".to_string(),
            }]
        );
        assert_eq!(r.frame_count(), 0);
    }

    #[test]
    fn scenario_6_invalid_utf8_at_fin() {
        let mut r = Reassembler::new();
        // 0xC3 0x28 is not valid UTF-8 (C3 expects a continuation byte, 28 isn't one).
        let events = r.consume(frame(true, OpCode::Text, &[0xC3, 0x28]), None);
        assert_eq!(
            events,
            vec![Event::Error {
                code: CloseCode::InvalidPayload,
                message: "invalid UTF-8".to_string(),
            }]
        );
        assert_eq!(r.frame_count(), 0);
    }

    #[test]
    fn incomplete_utf8_sequence_is_legal_between_fragments() {
        let mut r = Reassembler::new();
        // 0xE2 0x82 is the first two bytes of the 3-byte sequence for '€' (E2 82 AC).
        assert!(r.consume(frame(false, OpCode::Text, &[0xE2, 0x82]), None).is_empty());
        let events = r.consume(frame(true, OpCode::Continue, &[0xAC]), None);
        assert_eq!(events, vec![Event::Text("\u{20AC}".to_string())]);
    }

    #[test]
    fn property_p4_many_fragments_concatenate() {
        let mut r = Reassembler::new();
        let mut expected = Vec::new();
        for i in 0..64u8 {
            expected.push(i);
            let fin = i == 63;
            let opcode = if i == 0 { OpCode::Binary } else { OpCode::Continue };
            let events = r.consume(frame(fin, opcode, &[i]), None);
            if fin {
                assert_eq!(events, vec![Event::Binary(expected.clone())]);
            } else {
                assert!(events.is_empty());
            }
        }
    }

    #[test]
    fn enforces_max_message_size() {
        let mut r = Reassembler::new();
        let events = r.consume(frame(true, OpCode::Binary, &[0u8; 10]), Some(5));
        assert_eq!(
            events,
            vec![Event::Error {
                code: CloseCode::MessageTooBig,
                message: "message too big".to_string(),
            }]
        );
        assert_eq!(r.frame_count(), 0);
    }

    #[test]
    fn close_frame_carries_reason_and_code() {
        let mut r = Reassembler::new();
        let mut f = frame(true, OpCode::Close, b"bye");
        f.close_code = Some(CloseCode::Normal);
        let events = r.consume(f, None);
        assert_eq!(
            events,
            vec![Event::Closed {
                code: CloseCode::Normal,
                reason: "bye".to_string()
            }]
        );
    }
}

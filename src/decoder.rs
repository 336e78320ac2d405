//! Frame decoder (C2): a pure function from bytes to `DecodeOutcome`.
//!
//! Grounded in the teacher's `read.rs`/`connection.rs` `read_frame`, but
//! reshaped from an async socket read into a pure `&[u8] -> DecodeOutcome`
//! function so it can be driven off of arbitrarily-chunked transport reads
//! (SPEC_FULL.md §4.2, property P3).

use crate::buffer::{read_u16_be, read_u64_be, xor_mask};
use crate::config::WebSocketConfig;
use crate::frame::{CloseCode, DecodeOutcome, Frame, OpCode, FIN, LEN7, MASK_BIT, OPCODE_MASK, RSV};
use log::trace;

/// Attempts to decode one frame from the front of `buf`. Never mutates the
/// input; the caller drops `consumed` bytes from its own buffer on success.
pub fn decode(buf: &[u8], config: &WebSocketConfig) -> DecodeOutcome {
    if buf.len() < 2 {
        return DecodeOutcome::NeedsMore;
    }

    let byte0 = buf[0];
    let byte1 = buf[1];

    let fin = byte0 & FIN != 0;
    let rsv = byte0 & RSV;
    let opcode = match OpCode::from(byte0 & OPCODE_MASK) {
        Ok(opcode) => opcode,
        Err(_) => return failed(CloseCode::ProtocolError, "unknown opcode"),
    };

    if rsv != 0 {
        return failed(CloseCode::ProtocolError, "reserved bits set");
    }

    let masked = byte1 & MASK_BIT != 0;
    if masked && !(config.accept_masked_pong_frames && opcode == OpCode::Pong) {
        return failed(CloseCode::ProtocolError, "server must not mask frames");
    }

    let len7 = byte1 & LEN7;

    if opcode.is_control() {
        if !fin {
            return failed(CloseCode::ProtocolError, "fragmented control frame");
        }
        if len7 > 125 {
            return failed(CloseCode::ProtocolError, "control frame payload too long");
        }
    }

    let (payload_len, length_field_len): (u64, usize) = match len7 {
        0..=125 => (len7 as u64, 2),
        126 => {
            if buf.len() < 4 {
                return DecodeOutcome::NeedsMore;
            }
            (read_u16_be(buf, 2) as u64, 4)
        }
        127 => {
            if buf.len() < 10 {
                return DecodeOutcome::NeedsMore;
            }
            let length = read_u64_be(buf, 2);
            if length & (1 << 63) != 0 {
                return failed(CloseCode::MessageTooBig, "invalid extended length");
            }
            (length, 10)
        }
        _ => unreachable!("len7 masked to 7 bits"),
    };

    // RFC 6455 §5.2: whenever MASK=1, a 4-byte masking key immediately
    // follows the (possibly extended) length field and precedes the
    // payload. Only ever true here via the opt-in masked-Pong compat path.
    let header_len = if masked { length_field_len + 4 } else { length_field_len };

    if let Some(max_frame_size) = config.max_frame_size {
        if payload_len > max_frame_size as u64 {
            return failed(CloseCode::MessageTooBig, "frame exceeds max_frame_size");
        }
    }

    let total_len = match (header_len as u64).checked_add(payload_len) {
        Some(total) if total <= usize::MAX as u64 => total as usize,
        _ => return failed(CloseCode::MessageTooBig, "frame length overflow"),
    };

    if buf.len() < total_len {
        return DecodeOutcome::NeedsMore;
    }

    let mut payload = buf[header_len..total_len].to_vec();
    if masked {
        let mask_key: [u8; 4] = buf[length_field_len..header_len]
            .try_into()
            .expect("mask key slice is exactly 4 bytes");
        let masked_payload = std::mem::take(&mut payload);
        payload = vec![0u8; masked_payload.len()];
        xor_mask(&mut payload, &masked_payload, mask_key, 0);
    }
    trace!(
        "decoded frame: opcode={:?} fin={} len={}",
        opcode,
        fin,
        payload.len()
    );

    if opcode == OpCode::Close {
        return match decode_close_body(&payload) {
            Ok((close_code, reason_bytes)) => DecodeOutcome::Frame {
                frame: Frame {
                    final_fragment: fin,
                    opcode,
                    payload: reason_bytes,
                    close_code: Some(close_code),
                },
                consumed: total_len,
            },
            Err(outcome) => outcome,
        };
    }

    DecodeOutcome::Frame {
        frame: Frame::new(fin, opcode, payload),
        consumed: total_len,
    }
}

/// Parses a `Close` frame body per SPEC_FULL.md §4.2 step 9: empty body ->
/// code 1005 (not sent on the wire, just the in-memory sentinel); a single
/// leftover byte is malformed; 2+ bytes are a close code plus a UTF-8 reason.
fn decode_close_body(payload: &[u8]) -> Result<(CloseCode, Vec<u8>), DecodeOutcome> {
    match payload.len() {
        0 => Ok((CloseCode::NoStatusReceived, Vec::new())),
        1 => Err(failed(CloseCode::ProtocolError, "malformed close body")),
        _ => {
            let code = CloseCode::from(read_u16_be(payload, 0));
            let reason = &payload[2..];
            match std::str::from_utf8(reason) {
                Ok(_) => Ok((code, reason.to_vec())),
                Err(_) => Err(failed(CloseCode::InvalidPayload, "invalid UTF-8 in close reason")),
            }
        }
    }
}

fn failed(code: CloseCode, reason: &str) -> DecodeOutcome {
    DecodeOutcome::Failed {
        code,
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::encode;

    fn cfg() -> WebSocketConfig {
        WebSocketConfig::default()
    }

    #[test]
    fn needs_more_on_short_buffer() {
        assert!(matches!(decode(&[], &cfg()), DecodeOutcome::NeedsMore));
        assert!(matches!(decode(&[0x81], &cfg()), DecodeOutcome::NeedsMore));
    }

    #[test]
    fn scenario_1_simple_text() {
        let bytes = [0x81, 0x05, 0x48, 0x65, 0x6c, 0x6c, 0x6f];
        match decode(&bytes, &cfg()) {
            DecodeOutcome::Frame { frame, consumed } => {
                assert_eq!(consumed, bytes.len());
                assert_eq!(frame.opcode, OpCode::Text);
                assert!(frame.final_fragment);
                assert_eq!(frame.payload, b"Hello");
            }
            other => panic!("expected frame, got {other:?}"),
        }
    }

    #[test]
    fn scenario_2_extended_length_16() {
        let mut bytes = vec![0x82, 0x7E, 0x01, 0x00];
        bytes.extend(std::iter::repeat(0xABu8).take(256));
        match decode(&bytes, &cfg()) {
            DecodeOutcome::Frame { frame, consumed } => {
                assert_eq!(consumed, bytes.len());
                assert_eq!(frame.opcode, OpCode::Binary);
                assert_eq!(frame.payload.len(), 256);
                assert!(frame.payload.iter().all(|&b| b == 0xAB));
            }
            other => panic!("expected frame, got {other:?}"),
        }
    }

    #[test]
    fn scenario_5_close_with_code() {
        let bytes = [0x88, 0x02, 0x03, 0xE8];
        match decode(&bytes, &cfg()) {
            DecodeOutcome::Frame { frame, consumed } => {
                assert_eq!(consumed, bytes.len());
                assert_eq!(frame.opcode, OpCode::Close);
                assert_eq!(frame.close_code, Some(CloseCode::Normal));
                assert!(frame.payload.is_empty());
            }
            other => panic!("expected frame, got {other:?}"),
        }
    }

    #[test]
    fn rejects_unknown_opcode() {
        let bytes = [0x83, 0x00];
        match decode(&bytes, &cfg()) {
            DecodeOutcome::Failed { code, .. } => assert_eq!(code, CloseCode::ProtocolError),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn rejects_reserved_bits() {
        let bytes = [0xC1, 0x00];
        match decode(&bytes, &cfg()) {
            DecodeOutcome::Failed { code, .. } => assert_eq!(code, CloseCode::ProtocolError),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn rejects_masked_server_frame() {
        let bytes = [0x81, 0x80, 0, 0, 0, 0];
        match decode(&bytes, &cfg()) {
            DecodeOutcome::Failed { code, .. } => assert_eq!(code, CloseCode::ProtocolError),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn accepts_masked_pong_when_opted_in() {
        let mut config = cfg();
        config.accept_masked_pong_frames = true;
        // Empty-payload masked Pong: header (2) + mask key (4), no payload bytes.
        let bytes = [0x8A, 0x80, 1, 2, 3, 4];
        match decode(&bytes, &config) {
            DecodeOutcome::Frame { frame, consumed } => {
                assert_eq!(consumed, bytes.len());
                assert!(frame.payload.is_empty());
            }
            other => panic!("expected frame, got {other:?}"),
        }
    }

    #[test]
    fn unmasks_masked_pong_payload_and_consumes_mask_key() {
        let mut config = cfg();
        config.accept_masked_pong_frames = true;
        let mask_key = [0xDE, 0xAD, 0xBE, 0xEF];
        let payload = b"pong!";
        let mut bytes = vec![0x8A, 0x80 | payload.len() as u8];
        bytes.extend_from_slice(&mask_key);
        bytes.extend(payload.iter().zip(mask_key.iter().cycle()).map(|(b, m)| b ^ m));
        // One trailing byte belonging to whatever frame follows must survive untouched.
        bytes.push(0x99);

        match decode(&bytes, &config) {
            DecodeOutcome::Frame { frame, consumed } => {
                assert_eq!(consumed, bytes.len() - 1, "must not consume the next frame's byte");
                assert_eq!(frame.opcode, OpCode::Pong);
                assert_eq!(frame.payload, payload);
            }
            other => panic!("expected frame, got {other:?}"),
        }
    }

    #[test]
    fn rejects_fragmented_control_frame() {
        let bytes = [0x09, 0x00];
        match decode(&bytes, &cfg()) {
            DecodeOutcome::Failed { code, .. } => assert_eq!(code, CloseCode::ProtocolError),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn rejects_oversized_control_frame() {
        let mut bytes = vec![0x89, 126u8];
        bytes.extend(std::iter::repeat(0u8).take(126));
        match decode(&bytes, &cfg()) {
            DecodeOutcome::Failed { code, .. } => assert_eq!(code, CloseCode::ProtocolError),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn rejects_malformed_close_body_of_length_one() {
        let bytes = [0x88, 0x01, 0x00];
        match decode(&bytes, &cfg()) {
            DecodeOutcome::Failed { code, .. } => assert_eq!(code, CloseCode::ProtocolError),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn property_p2_decode_encode_round_trip() {
        let payload = b"round trip me".to_vec();
        let encoded = encode(OpCode::Binary, &payload);
        match decode(&encoded, &cfg()) {
            DecodeOutcome::Frame { frame, consumed } => {
                assert_eq!(consumed, encoded.len());
                assert!(frame.final_fragment);
                assert_eq!(frame.opcode, OpCode::Binary);
                assert_eq!(frame.payload, payload);
            }
            other => panic!("expected frame, got {other:?}"),
        }
    }

    #[test]
    fn property_p3_split_anywhere_needs_more() {
        let encoded = encode(OpCode::Text, b"Hello");
        for split in 0..encoded.len() {
            let outcome = decode(&encoded[..split], &cfg());
            assert!(matches!(outcome, DecodeOutcome::NeedsMore));
        }
    }

    #[test]
    fn enforces_max_frame_size() {
        let mut config = cfg();
        config.max_frame_size = Some(10);
        let bytes = [0x82, 20];
        match decode(&bytes, &config) {
            DecodeOutcome::Failed { code, .. } => assert_eq!(code, CloseCode::MessageTooBig),
            other => panic!("expected failure, got {other:?}"),
        }
    }
}

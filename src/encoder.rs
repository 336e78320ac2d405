//! Frame encoder (C3): builds a masked outbound frame for a single,
//! never-fragmented client message (the engine never sends fragmented
//! writes, SPEC_FULL.md §4.3).
//!
//! Grounded in the teacher's `write.rs` `write_frame_client`, rewritten as
//! a pure function returning a `Vec<u8>` instead of writing to a socket
//! directly, so the connection orchestrator (C6) owns all I/O.

use crate::buffer::{write_u16_be, write_u32_be, write_u64_be, xor_mask};
use crate::frame::OpCode;
use rand::Rng;

/// Encodes `payload` as a single FIN=1, RSV=0, MASK=1 frame with the given
/// opcode. The mask key is drawn fresh per call from the thread-local RNG.
pub fn encode(opcode: OpCode, payload: &[u8]) -> Vec<u8> {
    let mask_key: [u8; 4] = rand::rng().random();
    encode_with_mask(opcode, payload, mask_key)
}

/// Same as `encode`, but with a caller-supplied mask key — split out so
/// tests can assert on the exact wire bytes (scenario 8).
pub(crate) fn encode_with_mask(opcode: OpCode, payload: &[u8], mask_key: [u8; 4]) -> Vec<u8> {
    let payload_len = payload.len();
    let mut out = Vec::with_capacity(2 + 8 + 4 + payload_len);

    out.push(0x80 | opcode.as_u8());

    match payload_len {
        0..=125 => out.push(0x80 | payload_len as u8),
        126..=0xFFFF => {
            out.push(0x80 | 126);
            write_u16_be(&mut out, payload_len as u16);
        }
        _ => {
            out.push(0x80 | 127);
            write_u64_be(&mut out, payload_len as u64);
        }
    }

    write_u32_be(&mut out, u32::from_be_bytes(mask_key));

    let start = out.len();
    out.resize(start + payload_len, 0);
    xor_mask(&mut out[start..], payload, mask_key, 0);

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scenario_8_encodes_hi_as_text() {
        let mask_key = [0x11, 0x22, 0x33, 0x44];
        let bytes = encode_with_mask(OpCode::Text, b"Hi", mask_key);
        assert_eq!(bytes.len(), 8);
        assert_eq!(bytes[0], 0x81);
        assert_eq!(bytes[1], 0x82);
        assert_eq!(&bytes[2..6], &mask_key);
        assert_eq!(bytes[6], b'H' ^ mask_key[0]);
        assert_eq!(bytes[7], b'i' ^ mask_key[1]);
    }

    #[test]
    fn sets_fin_and_mask_bits() {
        let bytes = encode(OpCode::Binary, b"payload");
        assert_eq!(bytes[0] & 0x80, 0x80, "FIN must be set");
        assert_eq!(bytes[0] & 0x70, 0, "RSV must be zero");
        assert_eq!(bytes[1] & 0x80, 0x80, "MASK must be set");
    }

    #[test]
    fn extended_length_16_bit() {
        let payload = vec![0u8; 200];
        let bytes = encode(OpCode::Binary, &payload);
        assert_eq!(bytes[1] & 0x7F, 126);
        let len = u16::from_be_bytes([bytes[2], bytes[3]]) as usize;
        assert_eq!(len, 200);
    }

    #[test]
    fn extended_length_64_bit() {
        let payload = vec![0u8; 70_000];
        let bytes = encode(OpCode::Binary, &payload);
        assert_eq!(bytes[1] & 0x7F, 127);
        let len = u64::from_be_bytes(bytes[2..10].try_into().unwrap()) as usize;
        assert_eq!(len, 70_000);
    }

    #[test]
    fn exact_output_size() {
        let bytes = encode(OpCode::Text, b"hello");
        assert_eq!(bytes.len(), 2 + 4 + 5);
    }
}

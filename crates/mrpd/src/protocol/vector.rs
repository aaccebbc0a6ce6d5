// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Vector attribute header and packed event codecs.
//!
//! A VectorAttribute carries one FirstValue plus `NumberOfValues` attribute
//! events, three to a byte in base 6 (`36*e0 + 6*e1 + e2`). Listener
//! declarations additionally carry one 2-bit substate per value, four to a
//! byte in base 4. Non-multiple trailing slots are transmitted as zero and
//! ignored by receivers; they are never an end-mark.

use super::constants::{VECTOR_LEAVE_ALL_FLAG, VECTOR_NUM_VALUES_MASK};
use crate::core::ser::{Cursor, CursorMut, SerError, SerResult};

/// Per-value attribute event of a ThreePackedEvents run.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum AttributeEvent {
    New,
    JoinIn,
    In,
    JoinMt,
    Mt,
    Lv,
}

impl AttributeEvent {
    pub fn code(&self) -> u8 {
        match self {
            AttributeEvent::New => 0,
            AttributeEvent::JoinIn => 1,
            AttributeEvent::In => 2,
            AttributeEvent::JoinMt => 3,
            AttributeEvent::Mt => 4,
            AttributeEvent::Lv => 5,
        }
    }

    /// Decode a per-value event code. Codes above 5 can appear in packed
    /// bytes (a byte holds values up to 255 = 7/6/3 base-6); they mean an
    /// event this protocol version does not know, and the value is skipped.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(AttributeEvent::New),
            1 => Some(AttributeEvent::JoinIn),
            2 => Some(AttributeEvent::In),
            3 => Some(AttributeEvent::JoinMt),
            4 => Some(AttributeEvent::Mt),
            5 => Some(AttributeEvent::Lv),
            _ => None,
        }
    }
}

/// Decoded 2-byte vector header: LeaveAll flag + 13-bit value count.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct VectorHeader {
    pub leave_all: bool,
    pub num_values: u16,
}

impl VectorHeader {
    pub fn new(leave_all: bool, num_values: u16) -> Self {
        Self {
            leave_all,
            num_values: num_values & VECTOR_NUM_VALUES_MASK,
        }
    }

    pub fn decode(raw: u16) -> Self {
        Self {
            // Only the 1-value of the 3-bit LeaveAll event field is defined.
            leave_all: (raw & (7 << 13)) == VECTOR_LEAVE_ALL_FLAG,
            num_values: raw & VECTOR_NUM_VALUES_MASK,
        }
    }

    pub fn encode(&self) -> u16 {
        let mut raw = self.num_values & VECTOR_NUM_VALUES_MASK;
        if self.leave_all {
            raw |= VECTOR_LEAVE_ALL_FLAG;
        }
        raw
    }
}

/// Bytes occupied by `n` three-packed events.
pub fn three_packed_len(n: usize) -> usize {
    n.div_ceil(3)
}

/// Bytes occupied by `n` four-packed substates.
pub fn four_packed_len(n: usize) -> usize {
    n.div_ceil(4)
}

fn pack3(e0: u8, e1: u8, e2: u8) -> u8 {
    ((e0 * 6) + e1) * 6 + e2
}

fn unpack3(byte: u8) -> [u8; 3] {
    let e0 = byte / 36;
    let e1 = (byte - e0 * 36) / 6;
    let e2 = byte - e0 * 36 - e1 * 6;
    [e0, e1, e2]
}

fn pack4(s0: u8, s1: u8, s2: u8, s3: u8) -> u8 {
    (s0 << 6) | (s1 << 4) | (s2 << 2) | s3
}

fn unpack4(byte: u8) -> [u8; 4] {
    [byte >> 6, (byte >> 4) & 3, (byte >> 2) & 3, byte & 3]
}

/// Read `num_values` three-packed event codes.
///
/// Consumes exactly `three_packed_len(num_values)` bytes; fails closed if
/// the cursor cannot supply them. Unknown event codes decode to `None` so
/// the caller can skip that value and keep its key arithmetic in step.
pub fn read_three_packed(
    cursor: &mut Cursor<'_>,
    num_values: u16,
) -> SerResult<Vec<Option<AttributeEvent>>> {
    let n = num_values as usize;
    let bytes = cursor.read_bytes(three_packed_len(n))?;
    let mut events = Vec::with_capacity(n);
    for byte in bytes {
        for code in unpack3(*byte) {
            if events.len() == n {
                break;
            }
            events.push(AttributeEvent::from_code(code));
        }
    }
    Ok(events)
}

/// Write events three to a byte, padding the trailing byte with zeros.
pub fn write_three_packed(cursor: &mut CursorMut<'_>, events: &[AttributeEvent]) -> SerResult<()> {
    for chunk in events.chunks(3) {
        let e = |i: usize| chunk.get(i).map_or(0, AttributeEvent::code);
        cursor.write_u8(pack3(e(0), e(1), e(2)))?;
    }
    Ok(())
}

/// Read `num_values` four-packed 2-bit codes.
pub fn read_four_packed(cursor: &mut Cursor<'_>, num_values: u16) -> SerResult<Vec<u8>> {
    let n = num_values as usize;
    let bytes = cursor.read_bytes(four_packed_len(n))?;
    let mut codes = Vec::with_capacity(n);
    for byte in bytes {
        for code in unpack4(*byte) {
            if codes.len() == n {
                break;
            }
            codes.push(code);
        }
    }
    Ok(codes)
}

/// Write 2-bit codes four to a byte, padding the trailing byte with zeros.
pub fn write_four_packed(cursor: &mut CursorMut<'_>, codes: &[u8]) -> SerResult<()> {
    for chunk in codes.chunks(4) {
        let c = |i: usize| chunk.get(i).copied().unwrap_or(0) & 3;
        cursor.write_u8(pack4(c(0), c(1), c(2), c(3)))?;
    }
    Ok(())
}

/// Reject a vector whose declared packed bytes cannot fit in what remains.
pub fn check_vector_fits(
    cursor: &Cursor<'_>,
    first_value_len: usize,
    num_values: u16,
    four_packed: bool,
) -> SerResult<()> {
    let n = num_values as usize;
    let mut need = first_value_len + three_packed_len(n);
    if four_packed {
        need += four_packed_len(n);
    }
    if need > cursor.remaining() {
        return Err(SerError::InvalidData {
            reason: "vector runs past end of PDU".into(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack3_is_exact_base6() {
        // byte = 36*e0 + 6*e1 + e2
        assert_eq!(pack3(0, 0, 0), 0);
        assert_eq!(pack3(1, 2, 3), 36 + 12 + 3);
        assert_eq!(pack3(5, 5, 5), 215);
        for e0 in 0..6 {
            for e1 in 0..6 {
                for e2 in 0..6 {
                    assert_eq!(unpack3(pack3(e0, e1, e2)), [e0, e1, e2]);
                }
            }
        }
    }

    #[test]
    fn test_pack4_is_exact_base4() {
        assert_eq!(pack4(0, 0, 0, 0), 0);
        assert_eq!(pack4(3, 2, 1, 0), 0b11_10_01_00);
        for s0 in 0..4 {
            for s1 in 0..4 {
                for s2 in 0..4 {
                    for s3 in 0..4 {
                        assert_eq!(unpack4(pack4(s0, s1, s2, s3)), [s0, s1, s2, s3]);
                    }
                }
            }
        }
    }

    #[test]
    fn test_vector_header_bits() {
        let hdr = VectorHeader::new(true, 4);
        assert_eq!(hdr.encode(), (1 << 13) | 4);

        let decoded = VectorHeader::decode((1 << 13) | 4);
        assert!(decoded.leave_all);
        assert_eq!(decoded.num_values, 4);

        // A 3-bit LeaveAll field value other than 1 is not a LeaveAll.
        let decoded = VectorHeader::decode((3 << 13) | 9);
        assert!(!decoded.leave_all);
        assert_eq!(decoded.num_values, 9);
    }

    #[test]
    fn test_packed_lens() {
        assert_eq!(three_packed_len(0), 0);
        assert_eq!(three_packed_len(1), 1);
        assert_eq!(three_packed_len(3), 1);
        assert_eq!(three_packed_len(4), 2);
        assert_eq!(four_packed_len(4), 1);
        assert_eq!(four_packed_len(5), 2);
    }

    #[test]
    fn test_three_packed_roundtrip_with_padding() {
        use AttributeEvent::*;
        let events = [New, JoinIn, In, Mt];

        let mut buf = [0u8; 4];
        let mut writer = CursorMut::new(&mut buf);
        write_three_packed(&mut writer, &events).expect("write should succeed");
        assert_eq!(writer.offset(), 2);

        let mut reader = Cursor::new(&buf[..2]);
        let decoded = read_three_packed(&mut reader, 4).expect("read should succeed");
        assert_eq!(
            decoded,
            vec![Some(New), Some(JoinIn), Some(In), Some(Mt)]
        );
    }

    #[test]
    fn test_three_packed_unknown_codes_are_none() {
        // 252 = 7*36 -> event code 7, unknown to this protocol version.
        let buf = [252u8];
        let mut reader = Cursor::new(&buf);
        let decoded = read_three_packed(&mut reader, 3).expect("read should succeed");
        assert_eq!(decoded[0], None);
        assert_eq!(decoded[1], Some(AttributeEvent::New));
    }

    #[test]
    fn test_four_packed_roundtrip() {
        let codes = [2u8, 1, 3, 0, 2];
        let mut buf = [0u8; 2];
        let mut writer = CursorMut::new(&mut buf);
        write_four_packed(&mut writer, &codes).expect("write should succeed");

        let mut reader = Cursor::new(&buf);
        let decoded = read_four_packed(&mut reader, 5).expect("read should succeed");
        assert_eq!(decoded, vec![2, 1, 3, 0, 2]);
    }

    #[test]
    fn test_read_three_packed_truncated_fails() {
        let buf = [0u8; 1];
        let mut reader = Cursor::new(&buf);
        assert!(read_three_packed(&mut reader, 6).is_err());
    }

    #[test]
    fn test_check_vector_fits() {
        let buf = [0u8; 10];
        let cursor = Cursor::new(&buf);
        assert!(check_vector_fits(&cursor, 6, 4, false).is_ok()); // 6 + 2
        assert!(check_vector_fits(&cursor, 8, 4, true).is_err()); // 8 + 2 + 1
        assert!(check_vector_fits(&cursor, 6, 13, false).is_err()); // 6 + 5
    }
}

//! Instruction decoding for the dispatch loop
//!
//! Uses a static lookup table for O(1) opcode decoding instead of a
//! match over every byte value.

use crate::bytecode::Opcode;

/// Static table mapping byte values to optional opcodes
static OPCODE_TABLE: [Option<Opcode>; 256] = {
    let mut table: [Option<Opcode>; 256] = [None; 256];
    let mut i = 0;
    while i < Opcode::ALL.len() {
        let op = Opcode::ALL[i];
        table[op as usize] = Some(op);
        i += 1;
    }
    table
};

/// Decode an opcode byte; `None` for unassigned bytes
#[inline(always)]
pub(crate) fn decode_opcode(byte: u8) -> Option<Opcode> {
    OPCODE_TABLE[byte as usize]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_matches_try_from() {
        for byte in 0..=u8::MAX {
            assert_eq!(decode_opcode(byte), Opcode::try_from(byte).ok());
        }
    }

    #[test]
    fn test_reserved_bytes() {
        assert_eq!(decode_opcode(0), None);
        assert_eq!(decode_opcode(81), None);
        assert_eq!(decode_opcode(84), None);
    }
}

//! Motorola 68HC11 decoder.
//!
//! The 68HC11 is an 8-bit, big-endian MCU with inherent, immediate, direct
//! (8-bit address), extended (16-bit address), indexed (8-bit offset from X
//! or Y), and relative (8-bit signed, for branches) addressing modes. A 0x18
//! prefix redirects X-indexed opcodes to Y-indexed; this decoder recognizes
//! it but does not reproduce the full page-2 opcode map (out of scope per
//! the representative-subset policy).
//!
//! Opcode values below come from the Motorola MC68HC11 reference manual.

use crate::decoder::{ControlFlowClass, Decoded, Decoder, OperandRef};
use crate::error::Result;
use crate::memory::MemBlocks;

pub struct Hc11Decoder;

impl Hc11Decoder {
    pub fn new() -> Self {
        Hc11Decoder
    }

    fn read_u8(mem: &MemBlocks, addr: u32) -> Result<u8> {
        mem.element(addr)
    }

    fn read_u16_be(mem: &MemBlocks, addr: u32) -> Result<u16> {
        let hi = mem.element(addr)? as u16;
        let lo = mem.element(addr + 1)? as u16;
        Ok((hi << 8) | lo)
    }

    fn illegal(reason: &str) -> Decoded {
        Decoded {
            length: 1,
            control_flow: ControlFlowClass::Illegal,
            mnemonic: "???".to_string(),
            operands_text: reason.to_string(),
            dst: None,
            src: None,
            src2: None,
            target: None,
        }
    }
}

impl Default for Hc11Decoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for Hc11Decoder {
    fn name(&self) -> &'static str {
        "mc68hc11"
    }

    fn address_bits(&self) -> u32 {
        16
    }

    fn decode(&self, mem: &MemBlocks, addr: u32) -> Result<Decoded> {
        let opcode = Self::read_u8(mem, addr)?;

        let inherent = |mnemonic: &str, cf, length| Decoded {
            length,
            control_flow: cf,
            mnemonic: mnemonic.to_string(),
            operands_text: String::new(),
            dst: None,
            src: None,
            src2: None,
            target: None,
        };

        match opcode {
            0x39 => return Ok(inherent("rts", ControlFlowClass::Return, 1)),
            0x3B => return Ok(inherent("rti", ControlFlowClass::Return, 1)),
            0x01 => return Ok(inherent("nop", ControlFlowClass::Sequential, 1)),
            0x3E => return Ok(inherent("wai", ControlFlowClass::Sequential, 1)),
            0x3F => return Ok(inherent("swi", ControlFlowClass::Call, 1)),
            0x10 => return Ok(inherent("sba", ControlFlowClass::Sequential, 1)),
            0x11 => return Ok(inherent("cba", ControlFlowClass::Sequential, 1)),
            0x16 => return Ok(inherent("tab", ControlFlowClass::Sequential, 1)),
            0x17 => return Ok(inherent("tba", ControlFlowClass::Sequential, 1)),
            0x19 => return Ok(inherent("daa", ControlFlowClass::Sequential, 1)),
            0x1B => return Ok(inherent("aba", ControlFlowClass::Sequential, 1)),
            _ => {}
        }

        // Relative branches: opcode + signed 8-bit displacement.
        if (0x20..=0x2F).contains(&opcode) {
            let disp = Self::read_u8(mem, addr + 1)? as i8 as i32;
            let target = (addr as i64 + 2 + disp as i64) as u32;
            let mnemonic = match opcode {
                0x20 => "bra",
                0x21 => "brn",
                0x22 => "bhi",
                0x23 => "bls",
                0x24 => "bcc",
                0x25 => "bcs",
                0x26 => "bne",
                0x27 => "beq",
                0x28 => "bvc",
                0x29 => "bvs",
                0x2A => "bpl",
                0x2B => "bmi",
                0x2C => "bge",
                0x2D => "blt",
                0x2E => "bgt",
                _ => "ble",
            };
            let cf = match opcode {
                0x20 => ControlFlowClass::UnconditionalBranch,
                0x21 => ControlFlowClass::Sequential, // BRN is never taken, but still 2 bytes
                _ => ControlFlowClass::ConditionalBranch,
            };
            let operand = OperandRef::RelativeCode {
                offset: disp,
                addr: target,
                mask: None,
            };
            return Ok(Decoded {
                length: 2,
                control_flow: cf,
                mnemonic: mnemonic.to_string(),
                operands_text: operand.to_text(),
                dst: None,
                src: Some(operand),
                src2: None,
                target: if opcode == 0x21 { None } else { Some(target) },
            });
        }

        // BSR rel8 — branch to subroutine.
        if opcode == 0x8D {
            let disp = Self::read_u8(mem, addr + 1)? as i8 as i32;
            let target = (addr as i64 + 2 + disp as i64) as u32;
            let operand = OperandRef::RelativeCode {
                offset: disp,
                addr: target,
                mask: None,
            };
            return Ok(Decoded {
                length: 2,
                control_flow: ControlFlowClass::Call,
                mnemonic: "bsr".to_string(),
                operands_text: operand.to_text(),
                dst: None,
                src: Some(operand),
                src2: None,
                target: Some(target),
            });
        }

        // JSR / JMP direct, indexed, extended.
        match opcode {
            0x9D | 0xBD => {
                let (length, target) = if opcode == 0x9D {
                    (2, Self::read_u8(mem, addr + 1)? as u32)
                } else {
                    (3, Self::read_u16_be(mem, addr + 1)? as u32)
                };
                let operand = OperandRef::AbsoluteCode { addr: target, mask: None };
                return Ok(Decoded {
                    length,
                    control_flow: ControlFlowClass::Call,
                    mnemonic: "jsr".to_string(),
                    operands_text: operand.to_text(),
                    dst: None,
                    src: Some(operand),
                    src2: None,
                    target: Some(target),
                });
            }
            0xAD => {
                // JSR indexed, X — offset is not statically resolvable without
                // the runtime value of X.
                let offset = Self::read_u8(mem, addr + 1)?;
                let operand = OperandRef::RegisterOffsetCode {
                    offset,
                    register: "x".to_string(),
                    mask: None,
                };
                return Ok(Decoded {
                    length: 2,
                    control_flow: ControlFlowClass::IndirectBranch,
                    mnemonic: "jsr".to_string(),
                    operands_text: operand.to_text(),
                    dst: None,
                    src: Some(operand),
                    src2: None,
                    target: None,
                });
            }
            0x6E => {
                let offset = Self::read_u8(mem, addr + 1)?;
                let operand = OperandRef::RegisterOffsetCode {
                    offset,
                    register: "x".to_string(),
                    mask: None,
                };
                return Ok(Decoded {
                    length: 2,
                    control_flow: ControlFlowClass::IndirectBranch,
                    mnemonic: "jmp".to_string(),
                    operands_text: operand.to_text(),
                    dst: None,
                    src: Some(operand),
                    src2: None,
                    target: None,
                });
            }
            0x7E => {
                let target = Self::read_u16_be(mem, addr + 1)? as u32;
                let operand = OperandRef::AbsoluteCode { addr: target, mask: None };
                return Ok(Decoded {
                    length: 3,
                    control_flow: ControlFlowClass::UnconditionalBranch,
                    mnemonic: "jmp".to_string(),
                    operands_text: operand.to_text(),
                    dst: None,
                    src: Some(operand),
                    src2: None,
                    target: Some(target),
                });
            }
            _ => {}
        }

        // LDAA/LDAB/STAA/STAB direct, extended, and immediate — a
        // representative slice of the data-referencing opcode space.
        match opcode {
            0x96 | 0xD6 => {
                let addr8 = Self::read_u8(mem, addr + 1)?;
                let operand = OperandRef::AbsoluteData {
                    addr: addr8 as u32,
                    mask: None,
                };
                let mnemonic = if opcode == 0x96 { "ldaa" } else { "ldab" };
                return Ok(Decoded {
                    length: 2,
                    control_flow: ControlFlowClass::Sequential,
                    mnemonic: mnemonic.to_string(),
                    operands_text: operand.to_text(),
                    dst: None,
                    src: Some(operand),
                    src2: None,
                    target: None,
                });
            }
            0xB6 | 0xF6 => {
                let addr16 = Self::read_u16_be(mem, addr + 1)? as u32;
                let operand = OperandRef::AbsoluteData {
                    addr: addr16,
                    mask: None,
                };
                let mnemonic = if opcode == 0xB6 { "ldaa" } else { "ldab" };
                return Ok(Decoded {
                    length: 3,
                    control_flow: ControlFlowClass::Sequential,
                    mnemonic: mnemonic.to_string(),
                    operands_text: operand.to_text(),
                    dst: None,
                    src: Some(operand),
                    src2: None,
                    target: None,
                });
            }
            0x97 | 0xD7 => {
                let addr8 = Self::read_u8(mem, addr + 1)?;
                let operand = OperandRef::AbsoluteData {
                    addr: addr8 as u32,
                    mask: None,
                };
                let mnemonic = if opcode == 0x97 { "staa" } else { "stab" };
                return Ok(Decoded {
                    length: 2,
                    control_flow: ControlFlowClass::Sequential,
                    mnemonic: mnemonic.to_string(),
                    operands_text: operand.to_text(),
                    dst: Some(operand),
                    src: None,
                    src2: None,
                    target: None,
                });
            }
            0xB7 | 0xF7 => {
                let addr16 = Self::read_u16_be(mem, addr + 1)? as u32;
                let operand = OperandRef::AbsoluteData {
                    addr: addr16,
                    mask: None,
                };
                let mnemonic = if opcode == 0xB7 { "staa" } else { "stab" };
                return Ok(Decoded {
                    length: 3,
                    control_flow: ControlFlowClass::Sequential,
                    mnemonic: mnemonic.to_string(),
                    operands_text: operand.to_text(),
                    dst: Some(operand),
                    src: None,
                    src2: None,
                    target: None,
                });
            }
            0x86 | 0xC6 => {
                let value = Self::read_u8(mem, addr + 1)? as u32;
                let operand = OperandRef::Immediate { value, mask: None };
                let mnemonic = if opcode == 0x86 { "ldaa" } else { "ldab" };
                return Ok(Decoded {
                    length: 2,
                    control_flow: ControlFlowClass::Sequential,
                    mnemonic: mnemonic.to_string(),
                    operands_text: operand.to_text(),
                    dst: None,
                    src: Some(operand),
                    src2: None,
                    target: None,
                });
            }
            _ => {}
        }

        Ok(Self::illegal("unrecognized opcode"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemRange, RangeList};

    fn mem_with(bytes: &[u8]) -> MemBlocks {
        let mut ranges = RangeList::new();
        ranges.push_range(MemRange::new(0, bytes.len() as u32));
        let mut mem = MemBlocks::init_from_ranges(ranges);
        for (i, b) in bytes.iter().enumerate() {
            mem.set_element(i as u32, *b);
        }
        mem
    }

    #[test]
    fn decodes_rts() {
        let mem = mem_with(&[0x39]);
        let d = Hc11Decoder::new().decode(&mem, 0).unwrap();
        assert_eq!(d.mnemonic, "rts");
        assert_eq!(d.control_flow, ControlFlowClass::Return);
        assert_eq!(d.length, 1);
    }

    #[test]
    fn decodes_jmp_extended() {
        let mem = mem_with(&[0x7E, 0x01, 0x00]);
        let d = Hc11Decoder::new().decode(&mem, 0).unwrap();
        assert_eq!(d.mnemonic, "jmp");
        assert_eq!(d.control_flow, ControlFlowClass::UnconditionalBranch);
        assert_eq!(d.target, Some(0x0100));
        assert_eq!(d.length, 3);
    }

    #[test]
    fn decodes_beq_relative_backward() {
        let mut ranges = RangeList::new();
        ranges.push_range(MemRange::new(0, 0x20));
        let mut mem = MemBlocks::init_from_ranges(ranges);
        mem.set_element(0x10, 0x27);
        mem.set_element(0x11, 0xFE); // -2
        let d = Hc11Decoder::new().decode(&mem, 0x10).unwrap();
        assert_eq!(d.mnemonic, "beq");
        assert_eq!(d.control_flow, ControlFlowClass::ConditionalBranch);
        assert_eq!(d.target, Some(0x10));
    }

    #[test]
    fn decodes_bsr_as_call() {
        let mem = mem_with(&[0x8D, 0x02]);
        let d = Hc11Decoder::new().decode(&mem, 0).unwrap();
        assert_eq!(d.mnemonic, "bsr");
        assert_eq!(d.control_flow, ControlFlowClass::Call);
        assert_eq!(d.target, Some(4));
    }

    #[test]
    fn indexed_jmp_is_indirect() {
        let mem = mem_with(&[0x6E, 0x05]);
        let d = Hc11Decoder::new().decode(&mem, 0).unwrap();
        assert_eq!(d.control_flow, ControlFlowClass::IndirectBranch);
        assert_eq!(d.target, None);
    }
}

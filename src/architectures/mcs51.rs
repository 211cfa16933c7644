//! Intel MCS-51 (8051) decoder.
//!
//! MCS-51 is an 8-bit MCU with byte-addressed code memory and several
//! distinct call/jump forms: 16-bit absolute (`LJMP`/`LCALL`), 11-bit
//! page-relative (`AJMP`/`ACALL`, opcode low 5 bits `00001`/`10001`), 8-bit
//! PC-relative (`SJMP` and the conditional jumps), and indirect
//! (`JMP @A+DPTR`). Addressing-mode grouping follows the same "group" /
//! "control" classification scheme as the 6811 and AVR decoders, adapted
//! to 8051's opcode map.

use crate::decoder::{ControlFlowClass, Decoded, Decoder, OperandRef};
use crate::error::Result;
use crate::memory::MemBlocks;

pub struct Mcs51Decoder;

impl Mcs51Decoder {
    pub fn new() -> Self {
        Mcs51Decoder
    }

    fn read_u8(mem: &MemBlocks, addr: u32) -> Result<u8> {
        mem.element(addr)
    }

    fn read_u16_be(mem: &MemBlocks, addr: u32) -> Result<u16> {
        let hi = Self::read_u8(mem, addr)? as u16;
        let lo = Self::read_u8(mem, addr + 1)? as u16;
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

    fn inherent(mnemonic: &str, cf: ControlFlowClass) -> Decoded {
        Decoded {
            length: 1,
            control_flow: cf,
            mnemonic: mnemonic.to_string(),
            operands_text: String::new(),
            dst: None,
            src: None,
            src2: None,
            target: None,
        }
    }
}

impl Default for Mcs51Decoder {
    fn default() -> Self {
        Self::new()
    }
}

const CONDITIONAL_JUMPS: &[(u8, &str)] = &[
    (0x40, "jc"),
    (0x50, "jnc"),
    (0x60, "jz"),
    (0x70, "jnz"),
    (0x20, "jb"),  // followed by bit address then rel8 — simplified below
    (0x30, "jnb"),
    (0x10, "jbc"),
];

impl Decoder for Mcs51Decoder {
    fn name(&self) -> &'static str {
        "mcs51"
    }

    fn address_bits(&self) -> u32 {
        16
    }

    fn decode(&self, mem: &MemBlocks, addr: u32) -> Result<Decoded> {
        let opcode = Self::read_u8(mem, addr)?;

        match opcode {
            0x00 => return Ok(Self::inherent("nop", ControlFlowClass::Sequential)),
            0x22 => return Ok(Self::inherent("ret", ControlFlowClass::Return)),
            0x32 => return Ok(Self::inherent("reti", ControlFlowClass::Return)),
            0x73 => {
                return Ok(Decoded {
                    length: 1,
                    control_flow: ControlFlowClass::IndirectBranch,
                    mnemonic: "jmp".to_string(),
                    operands_text: "@a+dptr".to_string(),
                    dst: None,
                    src: None,
                    src2: None,
                    target: None,
                })
            }
            _ => {}
        }

        // LJMP / LCALL — 16-bit absolute.
        if opcode == 0x02 || opcode == 0x12 {
            let target = Self::read_u16_be(mem, addr + 1)? as u32;
            let operand = OperandRef::AbsoluteCode { addr: target, mask: None };
            let is_call = opcode == 0x12;
            return Ok(Decoded {
                length: 3,
                control_flow: if is_call {
                    ControlFlowClass::Call
                } else {
                    ControlFlowClass::UnconditionalBranch
                },
                mnemonic: if is_call { "lcall" } else { "ljmp" }.to_string(),
                operands_text: operand.to_text(),
                dst: None,
                src: Some(operand),
                src2: None,
                target: Some(target),
            });
        }

        // AJMP / ACALL — opcode low 5 bits are 00001 (AJMP) or 10001 (ACALL);
        // top 3 bits + the following byte give an 11-bit page-relative target.
        if (opcode & 0x1F) == 0x01 || (opcode & 0x1F) == 0x11 {
            let is_call = (opcode & 0x1F) == 0x11;
            let low = Self::read_u8(mem, addr + 1)? as u32;
            let page = ((opcode as u32) >> 5) & 0x07;
            let next_instr = addr + 2;
            let target = (next_instr & 0xF800) | (page << 8) | low;
            let operand = OperandRef::AbsoluteCode { addr: target, mask: None };
            return Ok(Decoded {
                length: 2,
                control_flow: if is_call {
                    ControlFlowClass::Call
                } else {
                    ControlFlowClass::UnconditionalBranch
                },
                mnemonic: if is_call { "acall" } else { "ajmp" }.to_string(),
                operands_text: operand.to_text(),
                dst: None,
                src: Some(operand),
                src2: None,
                target: Some(target),
            });
        }

        // SJMP — unconditional 8-bit relative.
        if opcode == 0x80 {
            let disp = Self::read_u8(mem, addr + 1)? as i8 as i32;
            let target = (addr as i64 + 2 + disp as i64) as u32;
            let operand = OperandRef::RelativeCode {
                offset: disp,
                addr: target,
                mask: None,
            };
            return Ok(Decoded {
                length: 2,
                control_flow: ControlFlowClass::UnconditionalBranch,
                mnemonic: "sjmp".to_string(),
                operands_text: operand.to_text(),
                dst: None,
                src: Some(operand),
                src2: None,
                target: Some(target),
            });
        }

        // Simple conditional jumps (JC/JNC/JZ/JNZ) — opcode + rel8.
        if opcode == 0x40 || opcode == 0x50 || opcode == 0x60 || opcode == 0x70 {
            let disp = Self::read_u8(mem, addr + 1)? as i8 as i32;
            let target = (addr as i64 + 2 + disp as i64) as u32;
            let mnemonic = CONDITIONAL_JUMPS
                .iter()
                .find(|(op, _)| *op == opcode)
                .map(|(_, m)| *m)
                .unwrap_or("j??");
            let operand = OperandRef::RelativeCode {
                offset: disp,
                addr: target,
                mask: None,
            };
            return Ok(Decoded {
                length: 2,
                control_flow: ControlFlowClass::ConditionalBranch,
                mnemonic: mnemonic.to_string(),
                operands_text: operand.to_text(),
                dst: None,
                src: Some(operand),
                src2: None,
                target: Some(target),
            });
        }

        // DJNZ Rn, rel8 (register form, opcode 0xD8-0xDF).
        if (0xD8..=0xDF).contains(&opcode) {
            let disp = Self::read_u8(mem, addr + 1)? as i8 as i32;
            let target = (addr as i64 + 2 + disp as i64) as u32;
            let operand = OperandRef::RelativeCode {
                offset: disp,
                addr: target,
                mask: None,
            };
            return Ok(Decoded {
                length: 2,
                control_flow: ControlFlowClass::ConditionalBranch,
                mnemonic: "djnz".to_string(),
                operands_text: format!("r{}, {}", opcode - 0xD8, operand.to_text()),
                dst: None,
                src: Some(operand),
                src2: None,
                target: Some(target),
            });
        }

        // MOV direct,#data (0x75) — representative data-referencing opcode.
        if opcode == 0x75 {
            let direct = Self::read_u8(mem, addr + 1)?;
            let value = Self::read_u8(mem, addr + 2)? as u32;
            let dst = OperandRef::AbsoluteData {
                addr: direct as u32,
                mask: None,
            };
            let src = OperandRef::Immediate { value, mask: None };
            return Ok(Decoded {
                length: 3,
                control_flow: ControlFlowClass::Sequential,
                mnemonic: "mov".to_string(),
                operands_text: format!("{}, {}", dst.to_text(), src.to_text()),
                dst: Some(dst),
                src: Some(src),
                src2: None,
                target: None,
            });
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
    fn decodes_ret() {
        let mem = mem_with(&[0x22]);
        let d = Mcs51Decoder::new().decode(&mem, 0).unwrap();
        assert_eq!(d.mnemonic, "ret");
        assert_eq!(d.control_flow, ControlFlowClass::Return);
    }

    #[test]
    fn decodes_ljmp() {
        let mem = mem_with(&[0x02, 0x01, 0x00]);
        let d = Mcs51Decoder::new().decode(&mem, 0).unwrap();
        assert_eq!(d.mnemonic, "ljmp");
        assert_eq!(d.target, Some(0x0100));
    }

    #[test]
    fn decodes_lcall() {
        let mem = mem_with(&[0x12, 0x02, 0x00]);
        let d = Mcs51Decoder::new().decode(&mem, 0).unwrap();
        assert_eq!(d.mnemonic, "lcall");
        assert_eq!(d.control_flow, ControlFlowClass::Call);
    }

    #[test]
    fn decodes_sjmp_forward() {
        let mem = mem_with(&[0x80, 0x05]);
        let d = Mcs51Decoder::new().decode(&mem, 0).unwrap();
        assert_eq!(d.mnemonic, "sjmp");
        assert_eq!(d.target, Some(7));
    }

    #[test]
    fn decodes_ajmp_page_relative() {
        // AJMP with page bits 0, low byte 0x10, from addr 0.
        let mem = mem_with(&[0x01, 0x10]);
        let d = Mcs51Decoder::new().decode(&mem, 0).unwrap();
        assert_eq!(d.mnemonic, "ajmp");
        assert_eq!(d.target, Some(0x0010));
    }

    #[test]
    fn unrecognized_opcode_is_illegal() {
        let mem = mem_with(&[0xA5]); // reserved/undefined on classic 8051
        let d = Mcs51Decoder::new().decode(&mem, 0).unwrap();
        assert_eq!(d.control_flow, ControlFlowClass::Illegal);
    }
}

//! Atmel AVR decoder.
//!
//! AVR is a little-endian, 16-bit-word MCU. Most instructions are a single
//! 16-bit word; `JMP`/`CALL` are two words (22-bit absolute address packed
//! across both). Relative branches (`RJMP`/`RCALL`) carry a signed 12-bit
//! word offset; conditional branches (`BRBS`/`BRBC`, e.g. `BRNE`/`BREQ`)
//! carry a signed 7-bit word offset. Addresses are word addresses; this
//! decoder reports them converted to byte addresses (`* 2`) since the rest
//! of the crate is byte-addressed.
//!
//! Opcode values come from the Atmel AVR instruction set manual.

use crate::decoder::{ControlFlowClass, Decoded, Decoder, OperandRef};
use crate::error::Result;
use crate::memory::MemBlocks;

pub struct AvrDecoder;

impl AvrDecoder {
    pub fn new() -> Self {
        AvrDecoder
    }

    fn read_word(mem: &MemBlocks, addr: u32) -> Result<u16> {
        let lo = mem.element(addr)? as u16;
        let hi = mem.element(addr + 1)? as u16;
        Ok((hi << 8) | lo)
    }

    fn illegal(reason: &str) -> Decoded {
        Decoded {
            length: 2,
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

impl Default for AvrDecoder {
    fn default() -> Self {
        Self::new()
    }
}

const RET: u16 = 0x9508;
const RETI: u16 = 0x9518;
const IJMP: u16 = 0x9409;
const ICALL: u16 = 0x9509;
const JMP_MASK: u16 = 0xFE0E;
const JMP_VAL: u16 = 0x940C;
const CALL_MASK: u16 = 0xFE0E;
const CALL_VAL: u16 = 0x940E;
const RJMP_MASK: u16 = 0xF000;
const RJMP_VAL: u16 = 0xC000;
const RCALL_MASK: u16 = 0xF000;
const RCALL_VAL: u16 = 0xD000;
const BRBS_MASK: u16 = 0xFC00;
const BRBS_VAL: u16 = 0xF000;
const BRBC_MASK: u16 = 0xFC00;
const BRBC_VAL: u16 = 0xF400;

fn sign_extend(value: u16, bits: u32) -> i32 {
    let shift = 32 - bits;
    ((value as i32) << shift) >> shift
}

fn branch_cond_name(instr: u16) -> &'static str {
    let bit = instr & 0x7;
    let set = (instr & BRBC_MASK) == BRBS_VAL;
    match (set, bit) {
        (true, 1) => "breq",
        (false, 1) => "brne",
        (true, 0) => "brcs",
        (false, 0) => "brcc",
        (true, 2) => "brmi",
        (false, 2) => "brpl",
        (true, 3) => "brvs",
        (false, 3) => "brvc",
        (true, _) => "brbs",
        (false, _) => "brbc",
    }
}

impl Decoder for AvrDecoder {
    fn name(&self) -> &'static str {
        "avr"
    }

    fn address_bits(&self) -> u32 {
        16
    }

    fn decode(&self, mem: &MemBlocks, addr: u32) -> Result<Decoded> {
        let word = Self::read_word(mem, addr)?;

        match word {
            RET => {
                return Ok(Decoded {
                    length: 2,
                    control_flow: ControlFlowClass::Return,
                    mnemonic: "ret".to_string(),
                    operands_text: String::new(),
                    dst: None,
                    src: None,
                    src2: None,
                    target: None,
                })
            }
            RETI => {
                return Ok(Decoded {
                    length: 2,
                    control_flow: ControlFlowClass::Return,
                    mnemonic: "reti".to_string(),
                    operands_text: String::new(),
                    dst: None,
                    src: None,
                    src2: None,
                    target: None,
                })
            }
            IJMP => {
                return Ok(Decoded {
                    length: 2,
                    control_flow: ControlFlowClass::IndirectBranch,
                    mnemonic: "ijmp".to_string(),
                    operands_text: String::new(),
                    dst: None,
                    src: None,
                    src2: None,
                    target: None,
                })
            }
            ICALL => {
                return Ok(Decoded {
                    length: 2,
                    control_flow: ControlFlowClass::IndirectBranch,
                    mnemonic: "icall".to_string(),
                    operands_text: String::new(),
                    dst: None,
                    src: None,
                    src2: None,
                    target: None,
                })
            }
            0x0000 => {
                return Ok(Decoded {
                    length: 2,
                    control_flow: ControlFlowClass::Sequential,
                    mnemonic: "nop".to_string(),
                    operands_text: String::new(),
                    dst: None,
                    src: None,
                    src2: None,
                    target: None,
                })
            }
            _ => {}
        }

        if (word & JMP_MASK) == JMP_VAL || (word & CALL_MASK) == CALL_VAL {
            let ext = Self::read_word(mem, addr + 2)?;
            let high_bits = ((word >> 4) & 0x01) as u32;
            let mid_bits = ((word >> 3) & 0x1F) as u32; // upper address bits, unused on small devices
            let word_addr = (high_bits << 21) | (mid_bits << 16) | ext as u32;
            let target = word_addr * 2;
            let is_call = (word & CALL_MASK) == CALL_VAL;
            let operand = OperandRef::AbsoluteCode { addr: target, mask: None };
            return Ok(Decoded {
                length: 4,
                control_flow: if is_call {
                    ControlFlowClass::Call
                } else {
                    ControlFlowClass::UnconditionalBranch
                },
                mnemonic: if is_call { "call" } else { "jmp" }.to_string(),
                operands_text: operand.to_text(),
                dst: None,
                src: Some(operand),
                src2: None,
                target: Some(target),
            });
        }

        if (word & RJMP_MASK) == RJMP_VAL || (word & RCALL_MASK) == RCALL_VAL {
            let k = sign_extend(word & 0x0FFF, 12);
            let target = ((addr as i64 / 2) + 1 + k as i64) as u32 * 2;
            let is_call = (word & RCALL_MASK) == RCALL_VAL;
            let operand = OperandRef::RelativeCode {
                offset: k,
                addr: target,
                mask: None,
            };
            return Ok(Decoded {
                length: 2,
                control_flow: if is_call {
                    ControlFlowClass::Call
                } else {
                    ControlFlowClass::UnconditionalBranch
                },
                mnemonic: if is_call { "rcall" } else { "rjmp" }.to_string(),
                operands_text: operand.to_text(),
                dst: None,
                src: Some(operand),
                src2: None,
                target: Some(target),
            });
        }

        if (word & BRBS_MASK) == BRBS_VAL || (word & BRBC_MASK) == BRBC_VAL {
            let k = sign_extend((word >> 3) & 0x7F, 7);
            let target = ((addr as i64 / 2) + 1 + k as i64) as u32 * 2;
            let operand = OperandRef::RelativeCode {
                offset: k,
                addr: target,
                mask: None,
            };
            return Ok(Decoded {
                length: 2,
                control_flow: ControlFlowClass::ConditionalBranch,
                mnemonic: branch_cond_name(word).to_string(),
                operands_text: operand.to_text(),
                dst: None,
                src: Some(operand),
                src2: None,
                target: Some(target),
            });
        }

        // LDI Rd,K — representative register-immediate opcode.
        if (word & 0xF000) == 0xE000 {
            let k = (((word >> 4) & 0x0F) << 4 | (word & 0x0F)) as u32;
            let d = 16 + ((word >> 4) & 0x0F) as u32;
            let operand = OperandRef::Immediate { value: k, mask: None };
            return Ok(Decoded {
                length: 2,
                control_flow: ControlFlowClass::Sequential,
                mnemonic: "ldi".to_string(),
                operands_text: format!("r{}, {}", d, operand.to_text()),
                dst: None,
                src: Some(operand),
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

    fn mem_with(words: &[u16]) -> MemBlocks {
        let mut bytes = Vec::new();
        for w in words {
            bytes.push((*w & 0xFF) as u8);
            bytes.push((*w >> 8) as u8);
        }
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
        let mem = mem_with(&[RET]);
        let d = AvrDecoder::new().decode(&mem, 0).unwrap();
        assert_eq!(d.mnemonic, "ret");
        assert_eq!(d.control_flow, ControlFlowClass::Return);
    }

    #[test]
    fn decodes_rjmp_forward() {
        // RJMP .+2 (skip one word): k=1
        let mem = mem_with(&[0xC001]);
        let d = AvrDecoder::new().decode(&mem, 0).unwrap();
        assert_eq!(d.mnemonic, "rjmp");
        assert_eq!(d.target, Some(4));
    }

    #[test]
    fn decodes_rcall() {
        let mem = mem_with(&[0xD001]);
        let d = AvrDecoder::new().decode(&mem, 0).unwrap();
        assert_eq!(d.mnemonic, "rcall");
        assert_eq!(d.control_flow, ControlFlowClass::Call);
    }

    #[test]
    fn decodes_brne() {
        // BRBC 1,k (branch if clear, bit=1 -> brne), k = -1
        let word = BRBC_VAL | (0x7F << 3) | 0x1;
        let mem = mem_with(&[word]);
        let d = AvrDecoder::new().decode(&mem, 0).unwrap();
        assert_eq!(d.mnemonic, "brne");
        assert_eq!(d.control_flow, ControlFlowClass::ConditionalBranch);
    }

    #[test]
    fn decodes_ijmp_as_indirect() {
        let mem = mem_with(&[IJMP]);
        let d = AvrDecoder::new().decode(&mem, 0).unwrap();
        assert_eq!(d.control_flow, ControlFlowClass::IndirectBranch);
        assert_eq!(d.target, None);
    }
}

//! The per-CPU decoder contract.
//!
//! One [`Decoder`] implementation exists per supported MCU
//! (`architectures::hc11::Hc11Decoder`, `architectures::avr::AvrDecoder`,
//! `architectures::mcs51::Mcs51Decoder`). A decoder is pure with respect to
//! memory: it reads bytes but never writes descriptor bits. The engine
//! applies classification from what the decoder reports.

use crate::error::Result;
use crate::memory::MemBlocks;

/// Control-flow classification of a decoded instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlFlowClass {
    Sequential,
    ConditionalBranch,
    UnconditionalBranch,
    Call,
    Return,
    /// Target cannot be determined statically (e.g. computed jump).
    IndirectBranch,
    Illegal,
}

/// A tagged operand reference, matching the function-output-file grammar's
/// `#xxxx` / `C@xxxx` / `C^n(xxxx)` / `C&xx(r)` / `D@xxxx` / `D^n(xxxx)` /
/// `D&xx(r)` shapes, with an optional trailing mask.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperandRef {
    /// `#xxxx` — a literal/immediate value.
    Immediate { value: u32, mask: Option<u8> },
    /// `C@xxxx` — absolute code reference.
    AbsoluteCode { addr: u32, mask: Option<u8> },
    /// `C^n(xxxx)` — PC-relative code reference; `offset` is signed, `addr`
    /// is the resolved absolute target.
    RelativeCode {
        offset: i32,
        addr: u32,
        mask: Option<u8>,
    },
    /// `C&xx(r)` — register-offset code reference.
    RegisterOffsetCode {
        offset: u8,
        register: String,
        mask: Option<u8>,
    },
    /// `D@xxxx` — absolute data reference.
    AbsoluteData { addr: u32, mask: Option<u8> },
    /// `D^n(xxxx)` — PC-relative data reference.
    RelativeData {
        offset: i32,
        addr: u32,
        mask: Option<u8>,
    },
    /// `D&xx(r)` — register-offset data reference.
    RegisterOffsetData {
        offset: u8,
        register: String,
        mask: Option<u8>,
    },
}

impl OperandRef {
    /// Render in the function-output-file textual grammar.
    pub fn to_text(&self) -> String {
        fn mask_suffix(mask: Option<u8>) -> String {
            match mask {
                Some(m) => format!(",M{:02X}", m),
                None => String::new(),
            }
        }
        match self {
            OperandRef::Immediate { value, mask } => {
                format!("#{:04X}{}", value, mask_suffix(*mask))
            }
            OperandRef::AbsoluteCode { addr, mask } => {
                format!("C@{:04X}{}", addr, mask_suffix(*mask))
            }
            OperandRef::RelativeCode { offset, addr, mask } => {
                format!("C^{:+x}({:04X}){}", offset, addr, mask_suffix(*mask))
            }
            OperandRef::RegisterOffsetCode {
                offset,
                register,
                mask,
            } => format!("C&{:02X}({}){}", offset, register, mask_suffix(*mask)),
            OperandRef::AbsoluteData { addr, mask } => {
                format!("D@{:04X}{}", addr, mask_suffix(*mask))
            }
            OperandRef::RelativeData { offset, addr, mask } => {
                format!("D^{:+x}({:04X}){}", offset, addr, mask_suffix(*mask))
            }
            OperandRef::RegisterOffsetData {
                offset,
                register,
                mask,
            } => format!("D&{:02X}({}){}", offset, register, mask_suffix(*mask)),
        }
    }
}

/// Outcome of decoding one instruction at a given address.
#[derive(Debug, Clone)]
pub struct Decoded {
    /// Length in bytes, including opcode and operands.
    pub length: u32,
    pub control_flow: ControlFlowClass,
    pub mnemonic: String,
    pub operands_text: String,
    pub dst: Option<OperandRef>,
    pub src: Option<OperandRef>,
    pub src2: Option<OperandRef>,
    /// Resolved absolute target for branch/call classes; `None` for
    /// `IndirectBranch`, `Sequential`, `Return`, and `Illegal`.
    pub target: Option<u32>,
}

/// Per-CPU instruction decoder.
pub trait Decoder {
    /// Human-readable CPU name, used in reports and log messages.
    fn name(&self) -> &'static str;

    /// Native address width in bits (16 for 6811/AVR, up to 32 for
    /// ELF-hosted MCS-51 images).
    fn address_bits(&self) -> u32;

    /// Decode the instruction at `addr`. Reads only; never mutates `mem`.
    fn decode(&self, mem: &MemBlocks, addr: u32) -> Result<Decoded>;
}

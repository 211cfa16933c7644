//! The code-seeking disassembly engine: entry collection, discovery,
//! data reclassification, label synthesis, and emission.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use tracing::{debug, warn};

use crate::decoder::{ControlFlowClass, Decoded, Decoder};
use crate::error::Result;
use crate::memory::{Descriptor, MemBlocks};
use crate::model::{DataRecord, FuncMember, FunctionDescriptor, InstructionRecord};

/// Builder-style configuration for a disassembly run.
#[derive(Debug, Clone)]
pub struct DisassemblyOptions {
    entry_points: Vec<u32>,
    label_prefix: String,
    /// When true, treat every `CODE`-eligible address reachable from any
    /// entry point as worth re-checking even if a prior pass marked it
    /// `ILLEGAL` (useful when entry points are added incrementally).
    exhaustive: bool,
}

impl DisassemblyOptions {
    pub fn new() -> Self {
        DisassemblyOptions {
            entry_points: Vec::new(),
            label_prefix: "L".to_string(),
            exhaustive: false,
        }
    }

    pub fn exhaustive() -> Self {
        DisassemblyOptions {
            exhaustive: true,
            ..Self::new()
        }
    }

    pub fn with_entry_point(mut self, addr: u32) -> Self {
        self.entry_points.push(addr);
        self
    }

    pub fn with_entry_points(mut self, addrs: impl IntoIterator<Item = u32>) -> Self {
        self.entry_points.extend(addrs);
        self
    }

    pub fn with_label_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.label_prefix = prefix.into();
        self
    }
}

impl Default for DisassemblyOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of a full disassembly pass.
#[derive(Debug, Clone, Default)]
pub struct DisassemblyReport {
    pub functions: Vec<FunctionDescriptor>,
    pub labels: BTreeMap<u32, Vec<String>>,
    pub undeterminable_branches: Vec<u32>,
}

/// Run the engine over `mem` using `decoder`, mutating descriptor bits in
/// place and returning the emitted functions.
pub fn disassemble(
    mem: &mut MemBlocks,
    decoder: &dyn Decoder,
    options: &DisassemblyOptions,
) -> Result<DisassemblyReport> {
    let mut labels: BTreeMap<u32, Vec<String>> = BTreeMap::new();
    let mut function_starts: BTreeSet<u32> = BTreeSet::new();
    let mut decoded_cache: BTreeMap<u32, Decoded> = BTreeMap::new();
    let mut undeterminable = Vec::new();

    // Phase 1 — entry collection.
    let mut queue: VecDeque<u32> = VecDeque::new();
    let mut queued: BTreeSet<u32> = BTreeSet::new();
    for &addr in &options.entry_points {
        if queued.insert(addr) {
            queue.push_back(addr);
        }
        function_starts.insert(addr);
    }

    // Phase 2 — discovery.
    while let Some(addr) = queue.pop_front() {
        let existing = mem.descriptor(addr).unwrap_or(Descriptor::empty());
        if existing.contains(Descriptor::CODE) {
            continue;
        }
        if existing.contains(Descriptor::CODE_CONT) {
            warn!(addr, "branch target lands mid-instruction; keeping existing decode");
            continue;
        }
        if !mem.contains(addr) {
            debug!(addr, "entry/target address not loaded, skipping");
            continue;
        }

        let decoded = match decoder.decode(mem, addr) {
            Ok(d) => d,
            Err(_) => {
                // Instruction would cross an unloaded boundary.
                mem.add_descriptor(addr, Descriptor::ILLEGAL);
                continue;
            }
        };

        mem.add_descriptor(addr, Descriptor::CODE);
        for off in 1..decoded.length {
            mem.add_descriptor(addr + off, Descriptor::CODE_CONT);
        }

        if decoded.control_flow == ControlFlowClass::Illegal {
            mem.add_descriptor(addr, Descriptor::ILLEGAL);
        }

        let fall_through = addr + decoded.length;
        match decoded.control_flow {
            ControlFlowClass::Sequential => {
                if queued.insert(fall_through) {
                    queue.push_back(fall_through);
                }
            }
            ControlFlowClass::ConditionalBranch => {
                if queued.insert(fall_through) {
                    queue.push_back(fall_through);
                }
                if let Some(target) = decoded.target {
                    if queued.insert(target) {
                        queue.push_back(target);
                    }
                }
            }
            ControlFlowClass::UnconditionalBranch => {
                if let Some(target) = decoded.target {
                    if queued.insert(target) {
                        queue.push_back(target);
                    }
                }
            }
            ControlFlowClass::Call => {
                if queued.insert(fall_through) {
                    queue.push_back(fall_through);
                }
                if let Some(target) = decoded.target {
                    function_starts.insert(target);
                    if queued.insert(target) {
                        queue.push_back(target);
                    }
                }
            }
            ControlFlowClass::Return => {}
            ControlFlowClass::IndirectBranch => {
                undeterminable.push(addr);
                debug!(addr, "undeterminable branch target");
            }
            ControlFlowClass::Illegal => {}
        }

        decoded_cache.insert(addr, decoded);
    }

    // Phase 3 — data reclassification.
    let ranges: Vec<_> = mem.ranges().iter().copied().collect();
    for range in &ranges {
        for addr in range.start..range.end() {
            let d = mem.descriptor(addr).unwrap_or(Descriptor::empty());
            if d.contains(Descriptor::LOADED)
                && !d.contains(Descriptor::CODE)
                && !d.contains(Descriptor::CODE_CONT)
            {
                mem.add_descriptor(addr, Descriptor::DATA);
            }
        }
    }

    // Phase 4 — label synthesis.
    for decoded in decoded_cache.values() {
        if let Some(target) = decoded.target {
            labels
                .entry(target)
                .or_insert_with(|| vec![format!("{}{:04X}", options.label_prefix, target)]);
        }
    }
    for &start in &function_starts {
        labels
            .entry(start)
            .or_insert_with(|| vec![format!("{}{:04X}", options.label_prefix, start)]);
    }

    // Phase 5 — emission.
    let functions = emit_functions(mem, &decoded_cache, &labels, &function_starts, &ranges);

    Ok(DisassemblyReport {
        functions,
        labels,
        undeterminable_branches: undeterminable,
    })
}

fn emit_functions(
    mem: &MemBlocks,
    decoded_cache: &BTreeMap<u32, Decoded>,
    labels: &BTreeMap<u32, Vec<String>>,
    function_starts: &BTreeSet<u32>,
    ranges: &[crate::memory::MemRange],
) -> Vec<FunctionDescriptor> {
    let mut functions = Vec::new();
    let mut starts: Vec<u32> = function_starts.iter().copied().collect();
    starts.sort_unstable();
    if starts.is_empty() {
        return functions;
    }

    for (i, &start) in starts.iter().enumerate() {
        let next_start = starts.get(i + 1).copied();
        let range_end = ranges
            .iter()
            .find(|r| r.contains(start))
            .map(|r| r.end())
            .unwrap_or(start);
        let stop = match next_start {
            Some(n) => n.min(range_end),
            None => range_end,
        };

        let mut members = Vec::new();
        let mut addr = start;
        let mut pending_data: Vec<u8> = Vec::new();
        let mut pending_data_start = addr;

        let flush_data = |members: &mut Vec<FuncMember>,
                          pending: &mut Vec<u8>,
                          pending_start: u32,
                          labels: &BTreeMap<u32, Vec<String>>| {
            if !pending.is_empty() {
                members.push(FuncMember::Data(DataRecord {
                    rel_addr: pending_start - start,
                    abs_addr: pending_start,
                    labels: labels.get(&pending_start).cloned().unwrap_or_default(),
                    bytes: std::mem::take(pending),
                }));
            }
        };

        while addr < stop {
            let desc = mem.descriptor(addr).unwrap_or(Descriptor::empty());
            if desc.contains(Descriptor::CODE) {
                if let Some(decoded) = decoded_cache.get(&addr) {
                    flush_data(&mut members, &mut pending_data, pending_data_start, labels);
                    let mut raw_bytes = Vec::with_capacity(decoded.length as usize);
                    for i in 0..decoded.length {
                        raw_bytes.push(mem.element(addr + i).unwrap_or(0));
                    }
                    members.push(FuncMember::Instruction(InstructionRecord {
                        rel_addr: addr - start,
                        abs_addr: addr,
                        labels: labels.get(&addr).cloned().unwrap_or_default(),
                        opcode_bytes: raw_bytes.get(..1).map(|s| s.to_vec()).unwrap_or_default(),
                        operand_bytes: raw_bytes.get(1..).map(|s| s.to_vec()).unwrap_or_default(),
                        raw_bytes,
                        dst: decoded.dst.clone(),
                        src: decoded.src.clone(),
                        src2: decoded.src2.clone(),
                        mnemonic: decoded.mnemonic.clone(),
                        operands_text: decoded.operands_text.clone(),
                    }));
                    addr += decoded.length.max(1);
                    pending_data_start = addr;
                    continue;
                }
            }
            if pending_data.is_empty() {
                pending_data_start = addr;
            }
            pending_data.push(mem.element(addr).unwrap_or(0));
            addr += 1;
        }
        flush_data(&mut members, &mut pending_data, pending_data_start, labels);

        functions.push(FunctionDescriptor {
            main_address: start,
            names: labels
                .get(&start)
                .cloned()
                .unwrap_or_else(|| vec![format!("L{:04X}", start)]),
            members,
        });
    }

    functions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::architectures::hc11::Hc11Decoder;
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
    fn discovers_simple_function() {
        // JSR 0x0004 ; RTS ; (at 4) LDAA #1 ; RTS
        let mut mem = mem_with(&[
            0xBD, 0x00, 0x04, // jsr 0x0004
            0x39, // rts
            0x86, 0x01, // ldaa #1
            0x39, // rts
        ]);
        let decoder = Hc11Decoder::new();
        let options = DisassemblyOptions::new().with_entry_point(0);
        let report = disassemble(&mut mem, &decoder, &options).unwrap();
        assert_eq!(report.functions.len(), 2);
        assert_eq!(report.functions[0].main_address, 0);
        assert_eq!(report.functions[1].main_address, 4);
    }

    #[test]
    fn branch_to_unloaded_address_records_label_without_decode() {
        // BRA past the end of loaded memory.
        let mut mem = mem_with(&[0x20, 0x7F]); // BRA +127, target well past end
        let decoder = Hc11Decoder::new();
        let options = DisassemblyOptions::new().with_entry_point(0);
        let report = disassemble(&mut mem, &decoder, &options).unwrap();
        assert!(report.labels.contains_key(&(2 + 127)));
    }

    #[test]
    fn data_after_return_is_classified_as_data() {
        let mut mem = mem_with(&[0x39, 0xAA, 0xBB]);
        let decoder = Hc11Decoder::new();
        let options = DisassemblyOptions::new().with_entry_point(0);
        disassemble(&mut mem, &decoder, &options).unwrap();
        assert!(mem.descriptor(1).unwrap().contains(Descriptor::DATA));
        assert!(mem.descriptor(2).unwrap().contains(Descriptor::DATA));
    }
}

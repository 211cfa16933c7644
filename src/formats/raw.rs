//! Raw binary image codec: no header, the whole file is one contiguous range
//! starting at a caller-supplied base address.

use crate::error::Result;
use crate::formats::{FillPolicy, Xorshift64};
use crate::memory::{MemBlocks, MemRange, RangeList};

/// The single range a raw image covers once loaded at `base`.
pub fn retrieve_file_mapping(data: &[u8], base: u32) -> Result<RangeList> {
    let mut ranges = RangeList::new();
    ranges.push_range(MemRange::new(base, data.len() as u32));
    Ok(ranges)
}

/// Load every byte of `data` into `mem` starting at `base`. Returns whether
/// any address was already loaded (overlap with a prior load).
pub fn read_data_file(data: &[u8], mem: &mut MemBlocks, base: u32) -> Result<bool> {
    let mut overlap = false;
    for (i, &byte) in data.iter().enumerate() {
        let addr = base + i as u32;
        if mem
            .descriptor(addr)
            .map(|d| d.contains(crate::memory::Descriptor::LOADED))
            .unwrap_or(false)
        {
            overlap = true;
        }
        mem.set_element(addr, byte);
    }
    Ok(overlap)
}

/// Serialize the covered ranges of `mem` back into a flat byte buffer,
/// starting at the lowest covered address.
pub fn write_data_file(mem: &MemBlocks, fill: FillPolicy) -> Result<Vec<u8>> {
    let ranges = mem.ranges();
    let Some(low) = ranges.iter().map(|r| r.start).min() else {
        return Ok(Vec::new());
    };
    let high = mem.highest_address().unwrap_or(low);
    let mut out = Vec::with_capacity((high - low + 1) as usize);
    let mut rng = Xorshift64::new(low as u64 + 1);

    for addr in low..=high {
        let covered = ranges.contains(addr);
        let loaded = covered
            && mem
                .descriptor(addr)
                .map(|d| d.contains(crate::memory::Descriptor::LOADED))
                .unwrap_or(false);

        if loaded {
            out.push(mem.element(addr).unwrap_or(0));
            continue;
        }

        match fill {
            FillPolicy::NoFill => {
                if covered {
                    out.push(0);
                }
            }
            FillPolicy::AlwaysFillWith(v) => out.push(v),
            FillPolicy::ConditionalFillWith(v) => {
                if covered {
                    out.push(v);
                }
            }
            FillPolicy::AlwaysFillWithRandom => out.push(rng.next_byte()),
            FillPolicy::ConditionalFillWithRandom => {
                if covered {
                    out.push(rng.next_byte());
                }
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mapping_covers_whole_file_at_base() {
        let mapping = retrieve_file_mapping(&[1, 2, 3], 0x100).unwrap();
        assert_eq!(mapping.highest_address(), Some(0x102));
    }

    #[test]
    fn read_then_write_round_trips_with_no_fill() {
        let data = [0xAA, 0xBB, 0xCC];
        let mapping = retrieve_file_mapping(&data, 0).unwrap();
        let mut mem = MemBlocks::init_from_ranges(mapping);
        let overlap = read_data_file(&data, &mut mem, 0).unwrap();
        assert!(!overlap);
        let written = write_data_file(&mem, FillPolicy::NoFill).unwrap();
        assert_eq!(written, data);
    }

    #[test]
    fn reloading_the_same_range_reports_overlap() {
        let data = [1, 2, 3];
        let mapping = retrieve_file_mapping(&data, 0).unwrap();
        let mut mem = MemBlocks::init_from_ranges(mapping);
        read_data_file(&data, &mut mem, 0).unwrap();
        let overlap = read_data_file(&data, &mut mem, 0).unwrap();
        assert!(overlap);
    }
}

//! Memory model: descriptor bits, range lists, and the sparse byte store.
//!
//! Backing storage is a page table (`BTreeMap<u32, Box<Page>>`)
//! rather than one dense `Vec` per range, since firmware images are
//! typically sparse (a few kilobytes of ROM scattered across a 64K space).

use std::collections::BTreeMap;

use bitflags::bitflags;

use crate::error::{GendasmError, Result};

bitflags! {
    /// Per-byte classification bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Descriptor: u8 {
        /// Byte was populated by a load (vs. merely covered by a range).
        const LOADED    = 0b0000_0001;
        /// First byte of a decoded instruction.
        const CODE      = 0b0000_0010;
        /// Interior byte of a multi-byte instruction.
        const CODE_CONT = 0b0000_0100;
        /// Classified as data.
        const DATA      = 0b0000_1000;
        /// Decode attempted and failed here.
        const ILLEGAL   = 0b0001_0000;
        /// Already emitted by the writer (suppresses re-emission).
        const PRINTED   = 0b0010_0000;
    }
}

/// Page size for the sparse byte store, in bytes.
pub const PAGE_SIZE: usize = 256;

struct Page {
    bytes: [u8; PAGE_SIZE],
    descriptors: [Descriptor; PAGE_SIZE],
}

impl Page {
    fn new() -> Box<Page> {
        Box::new(Page {
            bytes: [0u8; PAGE_SIZE],
            descriptors: [Descriptor::empty(); PAGE_SIZE],
        })
    }
}

/// A half-open `[start, start+size)` interval of addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemRange {
    pub start: u32,
    pub size: u32,
}

impl MemRange {
    pub fn new(start: u32, size: u32) -> Self {
        MemRange { start, size }
    }

    /// First address past the end of this range.
    pub fn end(&self) -> u32 {
        self.start.saturating_add(self.size)
    }

    pub fn contains(&self, addr: u32) -> bool {
        addr >= self.start && addr < self.end()
    }

    fn overlaps(&self, other: &MemRange) -> bool {
        self.start < other.end() && other.start < self.end()
    }

    fn touches(&self, other: &MemRange) -> bool {
        self.overlaps(other) || self.end() == other.start || other.end() == self.start
    }
}

/// An ordered collection of [`MemRange`]s with the compaction operations the
/// engine and the codecs rely on.
#[derive(Debug, Clone, Default)]
pub struct RangeList(pub Vec<MemRange>);

impl RangeList {
    pub fn new() -> Self {
        RangeList(Vec::new())
    }

    pub fn push_range(&mut self, range: MemRange) {
        self.0.push(range);
    }

    pub fn sort(&mut self) {
        self.0.sort_by_key(|r| r.start);
    }

    /// Merge touching or overlapping ranges. Leaves the list sorted.
    pub fn compact(&mut self) {
        self.sort();
        let mut merged: Vec<MemRange> = Vec::with_capacity(self.0.len());
        for range in self.0.drain(..) {
            if let Some(last) = merged.last_mut() {
                if last.touches(&range) {
                    let new_end = last.end().max(range.end());
                    last.size = new_end - last.start;
                    continue;
                }
            }
            merged.push(range);
        }
        self.0 = merged;
    }

    /// Remove duplicate coverage, keeping the first occurrence of any address.
    pub fn remove_overlaps(&mut self) {
        self.sort();
        let mut result: Vec<MemRange> = Vec::with_capacity(self.0.len());
        let mut covered_end: Option<u32> = None;
        for range in &self.0 {
            let start = match covered_end {
                Some(end) if range.start < end => end,
                _ => range.start,
            };
            if start >= range.end() {
                continue;
            }
            result.push(MemRange::new(start, range.end() - start));
            covered_end = Some(range.end().max(covered_end.unwrap_or(0)));
        }
        self.0 = result;
    }

    pub fn highest_address(&self) -> Option<u32> {
        self.0.iter().map(|r| r.end().saturating_sub(1)).max()
    }

    pub fn contains(&self, addr: u32) -> bool {
        self.0.iter().any(|r| r.contains(addr))
    }

    pub fn iter(&self) -> impl Iterator<Item = &MemRange> {
        self.0.iter()
    }
}

/// The live byte/descriptor store. Addresses outside the range list the
/// store was initialized from are rejected with [`GendasmError::OutOfRange`].
pub struct MemBlocks {
    ranges: RangeList,
    pages: BTreeMap<u32, Box<Page>>,
}

fn page_key(addr: u32) -> (u32, usize) {
    let page = addr / PAGE_SIZE as u32;
    let offset = (addr % PAGE_SIZE as u32) as usize;
    (page, offset)
}

impl MemBlocks {
    /// Allocate an (initially empty) store covering `ranges`. The range list
    /// is compacted and sorted so containment checks are a simple scan.
    pub fn init_from_ranges(mut ranges: RangeList) -> Self {
        ranges.compact();
        MemBlocks {
            ranges,
            pages: BTreeMap::new(),
        }
    }

    pub fn contains(&self, addr: u32) -> bool {
        self.ranges.contains(addr)
    }

    pub fn highest_address(&self) -> Option<u32> {
        self.ranges.highest_address()
    }

    pub fn ranges(&self) -> &RangeList {
        &self.ranges
    }

    /// Resolve a logical address to a physical one. Flat architectures (all
    /// three supported decoders) have no bank switching, so this is the
    /// identity function; it exists as a seam for future overlay-mapped CPUs.
    pub fn physical_addr(&self, logical: u32) -> u32 {
        logical
    }

    pub fn element(&self, addr: u32) -> Result<u8> {
        if !self.contains(addr) {
            return Err(GendasmError::OutOfRange { addr });
        }
        let (page, offset) = page_key(addr);
        Ok(self.pages.get(&page).map(|p| p.bytes[offset]).unwrap_or(0))
    }

    /// Write a byte. Returns `false` (rather than erroring) when `addr` is
    /// not covered by any loaded range; callers that need overlap detection
    /// check `descriptor(addr)` before calling this.
    pub fn set_element(&mut self, addr: u32, byte: u8) -> bool {
        if !self.contains(addr) {
            return false;
        }
        let (page, offset) = page_key(addr);
        let p = self.pages.entry(page).or_insert_with(Page::new);
        p.bytes[offset] = byte;
        p.descriptors[offset] |= Descriptor::LOADED;
        true
    }

    pub fn descriptor(&self, addr: u32) -> Result<Descriptor> {
        if !self.contains(addr) {
            return Err(GendasmError::OutOfRange { addr });
        }
        let (page, offset) = page_key(addr);
        Ok(self
            .pages
            .get(&page)
            .map(|p| p.descriptors[offset])
            .unwrap_or(Descriptor::empty()))
    }

    pub fn set_descriptor(&mut self, addr: u32, desc: Descriptor) -> bool {
        if !self.contains(addr) {
            return false;
        }
        let (page, offset) = page_key(addr);
        let p = self.pages.entry(page).or_insert_with(Page::new);
        p.descriptors[offset] = desc;
        true
    }

    pub fn add_descriptor(&mut self, addr: u32, bits: Descriptor) -> bool {
        if !self.contains(addr) {
            return false;
        }
        let (page, offset) = page_key(addr);
        let p = self.pages.entry(page).or_insert_with(Page::new);
        p.descriptors[offset] |= bits;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compact_merges_touching_ranges() {
        let mut list = RangeList::new();
        list.push_range(MemRange::new(0x10, 0x10));
        list.push_range(MemRange::new(0x20, 0x10));
        list.push_range(MemRange::new(0x100, 0x10));
        list.compact();
        assert_eq!(list.0, vec![MemRange::new(0x10, 0x20), MemRange::new(0x100, 0x10)]);
    }

    #[test]
    fn highest_address_matches_max_end() {
        let mut list = RangeList::new();
        list.push_range(MemRange::new(0x0100, 0x10));
        list.push_range(MemRange::new(0x0000, 0x10));
        list.compact();
        assert_eq!(list.highest_address(), Some(0x010F));
    }

    #[test]
    fn remove_overlaps_keeps_first_writer() {
        let mut list = RangeList::new();
        list.push_range(MemRange::new(0x00, 0x10));
        list.push_range(MemRange::new(0x08, 0x10));
        list.remove_overlaps();
        assert_eq!(list.0, vec![MemRange::new(0x00, 0x10), MemRange::new(0x10, 0x08)]);
    }

    #[test]
    fn out_of_range_read_errors() {
        let mut list = RangeList::new();
        list.push_range(MemRange::new(0x00, 0x10));
        let mem = MemBlocks::init_from_ranges(list);
        assert!(matches!(
            mem.element(0x20),
            Err(GendasmError::OutOfRange { addr: 0x20 })
        ));
    }

    #[test]
    fn set_element_outside_range_returns_false() {
        let mut list = RangeList::new();
        list.push_range(MemRange::new(0x00, 0x10));
        let mut mem = MemBlocks::init_from_ranges(list);
        assert!(!mem.set_element(0x20, 0xAB));
        assert!(mem.set_element(0x05, 0xAB));
        assert_eq!(mem.element(0x05).unwrap(), 0xAB);
    }

    #[test]
    fn descriptor_round_trip() {
        let mut list = RangeList::new();
        list.push_range(MemRange::new(0x00, 0x10));
        let mut mem = MemBlocks::init_from_ranges(list);
        mem.set_element(0x04, 0x7E);
        mem.add_descriptor(0x04, Descriptor::CODE);
        let d = mem.descriptor(0x04).unwrap();
        assert!(d.contains(Descriptor::CODE));
        assert!(d.contains(Descriptor::LOADED));
        assert!(!d.contains(Descriptor::DATA));
    }

    #[test]
    fn sparse_pages_do_not_allocate_whole_range() {
        let mut list = RangeList::new();
        list.push_range(MemRange::new(0x0000, 0x1_0000));
        let mut mem = MemBlocks::init_from_ranges(list);
        mem.set_element(0x0000, 1);
        mem.set_element(0xFFFF, 2);
        assert_eq!(mem.pages.len(), 2);
    }
}

//! Minimal ELF reader: entry point and loadable `PT_LOAD` segments only. No
//! relocation, no section headers, no symbol table.

use crate::error::{GendasmError, Result};
use crate::formats::{read_bytes, read_u16, read_u32, read_u64, FillPolicy};
use crate::memory::{Descriptor, MemBlocks, MemRange, RangeList};

const ELFCLASS32: u8 = 1;
const ELFCLASS64: u8 = 2;
const ELFDATA2LSB: u8 = 1;
const ELFDATA2MSB: u8 = 2;
const PT_LOAD: u32 = 1;

struct ElfHeader {
    is_64: bool,
    little_endian: bool,
    entry: u64,
    phoff: u64,
    phentsize: u16,
    phnum: u16,
}

fn parse_header(data: &[u8]) -> Result<ElfHeader> {
    let magic = read_bytes(data, 0, 4)?;
    if magic != [0x7F, b'E', b'L', b'F'] {
        return Err(GendasmError::InvalidRecord {
            line: 0,
            detail: "missing ELF magic".to_string(),
        });
    }
    let ei_class = data[4];
    let ei_data = data[5];
    let is_64 = match ei_class {
        ELFCLASS32 => false,
        ELFCLASS64 => true,
        other => {
            return Err(GendasmError::InvalidRecord {
                line: 0,
                detail: format!("unsupported EI_CLASS {}", other),
            })
        }
    };
    let little_endian = match ei_data {
        ELFDATA2LSB => true,
        ELFDATA2MSB => false,
        other => {
            return Err(GendasmError::InvalidRecord {
                line: 0,
                detail: format!("unsupported EI_DATA {}", other),
            })
        }
    };

    if is_64 {
        let entry = read_u64(data, 24, little_endian)?;
        let phoff = read_u64(data, 32, little_endian)?;
        let phentsize = read_u16(data, 54, little_endian)?;
        let phnum = read_u16(data, 56, little_endian)?;
        Ok(ElfHeader { is_64, little_endian, entry, phoff, phentsize, phnum })
    } else {
        let entry = read_u32(data, 24, little_endian)? as u64;
        let phoff = read_u32(data, 28, little_endian)? as u64;
        let phentsize = read_u16(data, 42, little_endian)?;
        let phnum = read_u16(data, 44, little_endian)?;
        Ok(ElfHeader { is_64, little_endian, entry, phoff, phentsize, phnum })
    }
}

struct LoadSegment {
    vaddr: u32,
    file_off: usize,
    file_size: usize,
    mem_size: usize,
}

fn load_segments(data: &[u8], header: &ElfHeader) -> Result<Vec<LoadSegment>> {
    let mut segments = Vec::new();
    for i in 0..header.phnum as usize {
        let off = header.phoff as usize + i * header.phentsize as usize;
        let p_type = read_u32(data, off, header.little_endian)?;
        if p_type != PT_LOAD {
            continue;
        }
        let seg = if header.is_64 {
            let p_offset = read_u64(data, off + 8, header.little_endian)?;
            let p_vaddr = read_u64(data, off + 16, header.little_endian)?;
            let p_filesz = read_u64(data, off + 32, header.little_endian)?;
            let p_memsz = read_u64(data, off + 40, header.little_endian)?;
            LoadSegment {
                vaddr: p_vaddr as u32,
                file_off: p_offset as usize,
                file_size: p_filesz as usize,
                mem_size: p_memsz as usize,
            }
        } else {
            let p_offset = read_u32(data, off + 4, header.little_endian)?;
            let p_vaddr = read_u32(data, off + 8, header.little_endian)?;
            let p_filesz = read_u32(data, off + 16, header.little_endian)?;
            let p_memsz = read_u32(data, off + 20, header.little_endian)?;
            LoadSegment {
                vaddr: p_vaddr,
                file_off: p_offset as usize,
                file_size: p_filesz as usize,
                mem_size: p_memsz as usize,
            }
        };
        segments.push(seg);
    }
    Ok(segments)
}

/// The set of ranges covered by this ELF's `PT_LOAD` segments.
pub fn retrieve_file_mapping(data: &[u8]) -> Result<RangeList> {
    let header = parse_header(data)?;
    let segments = load_segments(data, &header)?;
    let mut ranges = RangeList::new();
    for seg in &segments {
        if seg.mem_size > 0 {
            ranges.push_range(MemRange::new(seg.vaddr, seg.mem_size as u32));
        }
    }
    ranges.compact();
    Ok(ranges)
}

/// Load every `PT_LOAD` segment's file-backed bytes into `mem`. Bytes in
/// `[file_size, mem_size)` (BSS) are left unloaded but covered. Returns the
/// entry point and whether any address was already loaded.
pub fn read_data_file(data: &[u8], mem: &mut MemBlocks) -> Result<(u32, bool)> {
    let header = parse_header(data)?;
    let segments = load_segments(data, &header)?;
    let mut overlap = false;

    for seg in &segments {
        let copy_len = seg.file_size.min(seg.mem_size);
        let bytes = read_bytes(data, seg.file_off, copy_len)?;
        for (i, &b) in bytes.iter().enumerate() {
            let addr = seg.vaddr + i as u32;
            if mem.descriptor(addr).map(|d| d.contains(Descriptor::LOADED)).unwrap_or(false) {
                overlap = true;
            }
            mem.set_element(addr, b);
        }
    }

    Ok((header.entry as u32, overlap))
}

/// ELF is read-only in this crate; there is no minimal-ELF writer. Kept for
/// interface symmetry with the other two codecs.
pub fn write_data_file(_mem: &MemBlocks, _fill: FillPolicy) -> Result<Vec<u8>> {
    Err(GendasmError::WriteFailed {
        detail: "writing ELF images is not supported".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_minimal_elf32(entry: u32, vaddr: u32, payload: &[u8]) -> Vec<u8> {
        let ehsize = 52usize;
        let phentsize = 32usize;
        let phoff = ehsize as u32;
        let data_off = phoff as usize + phentsize;

        let mut buf = vec![0u8; data_off + payload.len()];
        buf[0..4].copy_from_slice(&[0x7F, b'E', b'L', b'F']);
        buf[4] = ELFCLASS32;
        buf[5] = ELFDATA2LSB;
        buf[6] = 1; // EI_VERSION

        buf[16..18].copy_from_slice(&2u16.to_le_bytes()); // e_type = ET_EXEC
        buf[18..20].copy_from_slice(&0u16.to_le_bytes()); // e_machine
        buf[24..28].copy_from_slice(&entry.to_le_bytes());
        buf[28..32].copy_from_slice(&phoff.to_le_bytes());
        buf[42..44].copy_from_slice(&(phentsize as u16).to_le_bytes());
        buf[44..46].copy_from_slice(&1u16.to_le_bytes()); // e_phnum

        let ph = phoff as usize;
        buf[ph..ph + 4].copy_from_slice(&PT_LOAD.to_le_bytes());
        buf[ph + 4..ph + 8].copy_from_slice(&(data_off as u32).to_le_bytes()); // p_offset
        buf[ph + 8..ph + 12].copy_from_slice(&vaddr.to_le_bytes()); // p_vaddr
        buf[ph + 16..ph + 20].copy_from_slice(&(payload.len() as u32).to_le_bytes()); // p_filesz
        buf[ph + 20..ph + 24].copy_from_slice(&(payload.len() as u32).to_le_bytes()); // p_memsz

        buf[data_off..data_off + payload.len()].copy_from_slice(payload);
        buf
    }

    #[test]
    fn reads_entry_point_and_segment() {
        let payload = [0x39, 0x01, 0x02, 0x03];
        let elf = build_minimal_elf32(0x8004, 0x8000, &payload);
        let mapping = retrieve_file_mapping(&elf).unwrap();
        assert_eq!(mapping.highest_address(), Some(0x8003));

        let mut mem = MemBlocks::init_from_ranges(mapping);
        let (entry, overlap) = read_data_file(&elf, &mut mem).unwrap();
        assert_eq!(entry, 0x8004);
        assert!(!overlap);
        assert_eq!(mem.element(0x8000).unwrap(), 0x39);
    }

    #[test]
    fn rejects_bad_magic() {
        let data = [0u8; 16];
        assert!(retrieve_file_mapping(&data).is_err());
    }
}

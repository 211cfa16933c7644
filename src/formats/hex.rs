//! Intel HEX and Motorola S-record codecs.

use crate::error::{GendasmError, Result};
use crate::formats::FillPolicy;
use crate::memory::{Descriptor, MemBlocks, MemRange, RangeList};

fn hex_byte(s: &str, line: usize) -> Result<u8> {
    u8::from_str_radix(s, 16).map_err(|e| GendasmError::InvalidRecord {
        line,
        detail: e.to_string(),
    })
}

fn decode_hex_bytes(s: &str, line: usize) -> Result<Vec<u8>> {
    if s.len() % 2 != 0 {
        return Err(GendasmError::InvalidRecord {
            line,
            detail: "odd number of hex digits".to_string(),
        });
    }
    (0..s.len())
        .step_by(2)
        .map(|i| hex_byte(&s[i..i + 2], line))
        .collect()
}

/// Intel HEX record type bytes.
mod intel_rt {
    pub const DATA: u8 = 0x00;
    pub const EOF: u8 = 0x01;
    pub const EXT_SEGMENT: u8 = 0x02;
    pub const START_SEGMENT: u8 = 0x03;
    pub const EXT_LINEAR: u8 = 0x04;
    pub const START_LINEAR: u8 = 0x05;
}

pub mod intel_hex {
    use super::*;

    fn for_each_data_record(
        text: &str,
        mut f: impl FnMut(u32, &[u8], usize) -> Result<()>,
    ) -> Result<bool> {
        let mut base: u32 = 0;
        let mut saw_eof = false;

        for (idx, raw_line) in text.lines().enumerate() {
            let line = raw_line.trim();
            if line.is_empty() {
                continue;
            }
            let line_no = idx + 1;
            if !line.starts_with(':') {
                return Err(GendasmError::InvalidRecord {
                    line: line_no,
                    detail: "expected ':' leader".to_string(),
                });
            }
            let bytes = decode_hex_bytes(&line[1..], line_no)?;
            if bytes.len() < 5 {
                return Err(GendasmError::InvalidRecord {
                    line: line_no,
                    detail: "record too short".to_string(),
                });
            }
            let byte_count = bytes[0] as usize;
            if bytes.len() != byte_count + 5 {
                return Err(GendasmError::InvalidRecord {
                    line: line_no,
                    detail: format!("declared {} data bytes, found {}", byte_count, bytes.len() - 5),
                });
            }
            let payload = &bytes[..bytes.len() - 1];
            let actual_checksum = bytes[bytes.len() - 1];
            let expected_checksum = 0u8.wrapping_sub(payload.iter().fold(0u8, |a, &b| a.wrapping_add(b)));
            if expected_checksum != actual_checksum {
                return Err(GendasmError::Checksum {
                    line: line_no,
                    expected: expected_checksum,
                    computed: actual_checksum,
                });
            }

            let rec_addr = u16::from_be_bytes([bytes[1], bytes[2]]) as u32;
            let rec_type = bytes[3];
            let data = &bytes[4..4 + byte_count];

            match rec_type {
                intel_rt::DATA => f(base + rec_addr, data, line_no)?,
                intel_rt::EOF => saw_eof = true,
                intel_rt::EXT_SEGMENT if data.len() == 2 => {
                    base = (u16::from_be_bytes([data[0], data[1]]) as u32) << 4;
                }
                intel_rt::EXT_LINEAR if data.len() == 2 => {
                    base = (u16::from_be_bytes([data[0], data[1]]) as u32) << 16;
                }
                intel_rt::START_SEGMENT | intel_rt::START_LINEAR => {}
                _ => {}
            }
        }

        Ok(saw_eof)
    }

    pub fn retrieve_file_mapping(text: &str) -> Result<RangeList> {
        let mut ranges = RangeList::new();
        for_each_data_record(text, |addr, data, _line| {
            if !data.is_empty() {
                ranges.push_range(MemRange::new(addr, data.len() as u32));
            }
            Ok(())
        })?;
        ranges.compact();
        Ok(ranges)
    }

    /// Load every data record into `mem`. Returns whether any address was
    /// already loaded before this call.
    pub fn read_data_file(text: &str, mem: &mut MemBlocks) -> Result<bool> {
        let mut overlap = false;
        let saw_eof = for_each_data_record(text, |addr, data, _line| {
            for (i, &b) in data.iter().enumerate() {
                let a = addr + i as u32;
                if mem.descriptor(a).map(|d| d.contains(Descriptor::LOADED)).unwrap_or(false) {
                    overlap = true;
                }
                mem.set_element(a, b);
            }
            Ok(())
        })?;
        if !saw_eof {
            return Err(GendasmError::UnexpectedEof {
                what: "Intel HEX EOF record (:00000001FF)".to_string(),
            });
        }
        Ok(overlap)
    }

    /// Serialize `mem`'s covered ranges as 16-byte Intel HEX data records,
    /// emitting an extended linear address record whenever the high 16 bits
    /// change, followed by the EOF record.
    pub fn write_data_file(mem: &MemBlocks, fill: FillPolicy) -> Result<String> {
        let mut out = String::new();
        let mut high_segment: Option<u16> = None;

        let ranges: Vec<_> = mem.ranges().iter().copied().collect();
        for range in &ranges {
            let mut addr = range.start;
            while addr < range.end() {
                let chunk_len = (range.end() - addr).min(16);
                let mut chunk = Vec::with_capacity(chunk_len as usize);
                for off in 0..chunk_len {
                    let a = addr + off;
                    let loaded = mem
                        .descriptor(a)
                        .map(|d| d.contains(Descriptor::LOADED))
                        .unwrap_or(false);
                    let byte = if loaded {
                        mem.element(a).unwrap_or(0)
                    } else {
                        match fill {
                            FillPolicy::AlwaysFillWith(v) | FillPolicy::ConditionalFillWith(v) => v,
                            _ => 0,
                        }
                    };
                    chunk.push(byte);
                }

                let segment = (addr >> 16) as u16;
                if high_segment != Some(segment) {
                    write_record(&mut out, 0, intel_rt::EXT_LINEAR, &segment.to_be_bytes());
                    high_segment = Some(segment);
                }

                let low = (addr & 0xFFFF) as u16;
                write_record(&mut out, low, intel_rt::DATA, &chunk);
                addr += chunk_len;
            }
        }
        write_record(&mut out, 0, intel_rt::EOF, &[]);
        Ok(out)
    }

    fn write_record(out: &mut String, addr: u16, rec_type: u8, data: &[u8]) {
        let mut payload = Vec::with_capacity(4 + data.len());
        payload.push(data.len() as u8);
        payload.extend_from_slice(&addr.to_be_bytes());
        payload.push(rec_type);
        payload.extend_from_slice(data);
        let checksum = 0u8.wrapping_sub(payload.iter().fold(0u8, |a, &b| a.wrapping_add(b)));
        out.push(':');
        for b in &payload {
            out.push_str(&format!("{:02X}", b));
        }
        out.push_str(&format!("{:02X}\n", checksum));
    }
}

/// Motorola S-record type bytes are the ASCII digit following `S`.
pub mod srec {
    use super::*;

    fn addr_width_for(rec_type: u8) -> Option<usize> {
        match rec_type {
            b'0' | b'1' | b'5' | b'9' => Some(2),
            b'2' | b'8' => Some(3),
            b'3' | b'7' => Some(4),
            _ => None,
        }
    }

    fn for_each_data_record(
        text: &str,
        mut f: impl FnMut(u32, &[u8], usize) -> Result<()>,
    ) -> Result<bool> {
        let mut saw_terminator = false;

        for (idx, raw_line) in text.lines().enumerate() {
            let line = raw_line.trim();
            if line.is_empty() {
                continue;
            }
            let line_no = idx + 1;
            if !line.starts_with('S') || line.len() < 4 {
                return Err(GendasmError::InvalidRecord {
                    line: line_no,
                    detail: "expected 'S' leader".to_string(),
                });
            }
            let rec_type = line.as_bytes()[1];
            let bytes = decode_hex_bytes(&line[2..], line_no)?;
            if bytes.is_empty() {
                return Err(GendasmError::InvalidRecord {
                    line: line_no,
                    detail: "record too short".to_string(),
                });
            }
            let byte_count = bytes[0] as usize;
            if bytes.len() != byte_count + 1 {
                return Err(GendasmError::InvalidRecord {
                    line: line_no,
                    detail: format!("declared {} bytes, found {}", byte_count, bytes.len() - 1),
                });
            }
            let payload = &bytes[..bytes.len() - 1];
            let actual_checksum = bytes[bytes.len() - 1];
            let sum_with_checksum = payload
                .iter()
                .chain(std::iter::once(&actual_checksum))
                .fold(0u8, |a, &b| a.wrapping_add(b));
            if sum_with_checksum != 0xFF {
                let expected = 0xFFu8.wrapping_sub(payload.iter().fold(0u8, |a, &b| a.wrapping_add(b)));
                return Err(GendasmError::Checksum {
                    line: line_no,
                    expected,
                    computed: actual_checksum,
                });
            }

            match rec_type {
                b'0' => {}
                b'1' | b'2' | b'3' => {
                    let addr_width = addr_width_for(rec_type).unwrap();
                    if payload.len() < addr_width {
                        return Err(GendasmError::InvalidRecord {
                            line: line_no,
                            detail: "address field truncated".to_string(),
                        });
                    }
                    let mut addr: u32 = 0;
                    for &b in &payload[1..1 + addr_width] {
                        addr = (addr << 8) | b as u32;
                    }
                    let data = &payload[1 + addr_width..];
                    f(addr, data, line_no)?;
                }
                b'5' | b'6' => {}
                b'7' | b'8' | b'9' => saw_terminator = true,
                _ => {}
            }
        }

        Ok(saw_terminator)
    }

    pub fn retrieve_file_mapping(text: &str) -> Result<RangeList> {
        let mut ranges = RangeList::new();
        for_each_data_record(text, |addr, data, _line| {
            ranges.push_range(MemRange::new(addr, data.len() as u32));
            Ok(())
        })?;
        ranges.compact();
        Ok(ranges)
    }

    pub fn read_data_file(text: &str, mem: &mut MemBlocks) -> Result<bool> {
        let mut overlap = false;
        let saw_terminator = for_each_data_record(text, |addr, data, _line| {
            for (i, &b) in data.iter().enumerate() {
                let a = addr + i as u32;
                if mem.descriptor(a).map(|d| d.contains(Descriptor::LOADED)).unwrap_or(false) {
                    overlap = true;
                }
                mem.set_element(a, b);
            }
            Ok(())
        })?;
        if !saw_terminator {
            return Err(GendasmError::UnexpectedEof {
                what: "S-record terminator (S7/S8/S9)".to_string(),
            });
        }
        Ok(overlap)
    }

    pub fn write_data_file(mem: &MemBlocks, fill: FillPolicy) -> Result<String> {
        let highest = mem.highest_address().unwrap_or(0);
        let addr_width = if highest > 0xFF_FFFF {
            4
        } else if highest > 0xFFFF {
            3
        } else {
            2
        };
        let (data_type, term_type) = match addr_width {
            4 => (b'3', b'7'),
            3 => (b'2', b'8'),
            _ => (b'1', b'9'),
        };

        let mut out = String::new();
        write_record(&mut out, b'0', addr_width, 0, &[]);

        let mut count = 0u32;
        let ranges: Vec<_> = mem.ranges().iter().copied().collect();
        for range in &ranges {
            let mut addr = range.start;
            while addr < range.end() {
                let chunk_len = (range.end() - addr).min(16);
                let mut chunk = Vec::with_capacity(chunk_len as usize);
                for off in 0..chunk_len {
                    let a = addr + off;
                    let loaded = mem
                        .descriptor(a)
                        .map(|d| d.contains(Descriptor::LOADED))
                        .unwrap_or(false);
                    let byte = if loaded {
                        mem.element(a).unwrap_or(0)
                    } else {
                        match fill {
                            FillPolicy::AlwaysFillWith(v) | FillPolicy::ConditionalFillWith(v) => v,
                            _ => 0,
                        }
                    };
                    chunk.push(byte);
                }
                write_record(&mut out, data_type, addr_width, addr, &chunk);
                count += 1;
                addr += chunk_len;
            }
        }

        let count_type = if count > 0xFFFF { b'6' } else { b'5' };
        write_record(&mut out, count_type, 2, 0, &count.to_be_bytes()[2..]);
        write_record(&mut out, term_type, addr_width, 0, &[]);
        Ok(out)
    }

    fn write_record(out: &mut String, rec_type: u8, addr_width: usize, addr: u32, data: &[u8]) {
        let addr_bytes = addr.to_be_bytes();
        let addr_slice = &addr_bytes[4 - addr_width..];
        let byte_count = addr_width + data.len() + 1;
        let checksum_input: Vec<u8> = std::iter::once(byte_count as u8)
            .chain(addr_slice.iter().copied())
            .chain(data.iter().copied())
            .collect();
        let checksum = 0xFFu8.wrapping_sub(checksum_input.iter().fold(0u8, |a, &b| a.wrapping_add(b)));

        out.push('S');
        out.push(rec_type as char);
        out.push_str(&format!("{:02X}", byte_count));
        for b in addr_slice {
            out.push_str(&format!("{:02X}", b));
        }
        for b in data {
            out.push_str(&format!("{:02X}", b));
        }
        out.push_str(&format!("{:02X}\n", checksum));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scenario_a_intel_hex() {
        let text = ":10010000214601360121470136007EFE09D2190140\n:00000001FF";
        let mapping = intel_hex::retrieve_file_mapping(text).unwrap();
        let mut mem = MemBlocks::init_from_ranges(mapping);
        intel_hex::read_data_file(text, &mut mem).unwrap();
        assert_eq!(mem.highest_address(), Some(0x010F));
        assert_eq!(mem.element(0x0102).unwrap(), 0x01);
    }

    #[test]
    fn intel_hex_missing_eof_errors() {
        let text = ":10010000214601360121470136007EFE09D2190140";
        let mapping = intel_hex::retrieve_file_mapping(text).unwrap();
        let mut mem = MemBlocks::init_from_ranges(mapping);
        assert!(matches!(
            intel_hex::read_data_file(text, &mut mem),
            Err(GendasmError::UnexpectedEof { .. })
        ));
    }

    #[test]
    fn scenario_e_zero_byte_srec() {
        let text = "S1030000FC\nS9030000FC";
        let mapping = srec::retrieve_file_mapping(text).unwrap();
        assert_eq!(mapping.0.len(), 1);
        assert_eq!(mapping.0[0].size, 0);
        let mut mem = MemBlocks::init_from_ranges(mapping);
        let overlap = srec::read_data_file(text, &mut mem).unwrap();
        assert!(!overlap);
    }

    #[test]
    fn srec_bad_checksum_errors_with_line() {
        let text = "S1030000FD\nS9030000FC";
        let mapping = srec::retrieve_file_mapping(text);
        assert!(matches!(
            mapping,
            Err(GendasmError::Checksum { line: 1, .. })
        ));
    }

    #[test]
    fn intel_hex_round_trips_through_write() {
        let data = [0xDE, 0xAD, 0xBE, 0xEF];
        let mut ranges = RangeList::new();
        ranges.push_range(MemRange::new(0x2000, data.len() as u32));
        let mut mem = MemBlocks::init_from_ranges(ranges);
        for (i, &b) in data.iter().enumerate() {
            mem.set_element(0x2000 + i as u32, b);
        }
        let text = intel_hex::write_data_file(&mem, FillPolicy::NoFill).unwrap();

        let mapping = intel_hex::retrieve_file_mapping(&text).unwrap();
        let mut reloaded = MemBlocks::init_from_ranges(mapping);
        intel_hex::read_data_file(&text, &mut reloaded).unwrap();
        for (i, &b) in data.iter().enumerate() {
            assert_eq!(reloaded.element(0x2000 + i as u32).unwrap(), b);
        }
    }
}

//! Function output file: the text format bridging the disassembly
//! engine (writer) and the fuzzy comparator (reader). Pure text in both
//! directions — no disassembly happens here.

use std::fmt::Write as _;

use crate::decoder::OperandRef;
use crate::engine::DisassemblyReport;
use crate::error::{GendasmError, Result};
use crate::memory::MemRange;
use crate::model::{
    DataRecord, FuncDescFile, FuncMember, FunctionDescriptor, IndirectVector, InstructionRecord,
    RegionKind,
};

/// Render a disassembly report in the function-output-file grammar.
pub fn write_func_desc_file(report: &DisassemblyReport, mappings: &[(RegionKind, MemRange)]) -> String {
    let mut out = String::new();
    for (kind, range) in mappings {
        let _ = writeln!(out, "#{}|{:04X}|{:04X}", kind.as_str(), range.start, range.size);
    }
    for (addr, names) in &report.labels {
        let _ = writeln!(out, "!{:04X}|{}", addr, names.join(","));
    }
    for func in &report.functions {
        let _ = writeln!(out, "@{:04X}|{}", func.main_address, func.names.join(","));
        for member in &func.members {
            write_member(&mut out, member);
        }
    }
    out
}

fn write_member(out: &mut String, member: &FuncMember) {
    match member {
        FuncMember::Instruction(ins) => {
            let all_bytes = hex_bytes(&ins.raw_bytes);
            let opcode = hex_bytes(&ins.opcode_bytes);
            let operand = hex_bytes(&ins.operand_bytes);
            let dst = ins.dst.as_ref().map(|o| o.to_text()).unwrap_or_default();
            let src = ins.src.as_ref().map(|o| o.to_text()).unwrap_or_default();
            match &ins.src2 {
                Some(src2) => {
                    let _ = writeln!(
                        out,
                        "{:04X}|{:04X}|{}|{}|{}|{}|{}|{}|{}|{}|{}",
                        ins.rel_addr,
                        ins.abs_addr,
                        ins.labels.join(","),
                        all_bytes,
                        opcode,
                        operand,
                        dst,
                        src,
                        src2.to_text(),
                        ins.mnemonic,
                        ins.operands_text
                    );
                }
                None => {
                    let _ = writeln!(
                        out,
                        "{:04X}|{:04X}|{}|{}|{}|{}|{}|{}|{}|{}",
                        ins.rel_addr,
                        ins.abs_addr,
                        ins.labels.join(","),
                        all_bytes,
                        opcode,
                        operand,
                        dst,
                        src,
                        ins.mnemonic,
                        ins.operands_text
                    );
                }
            }
        }
        FuncMember::Data(data) => {
            let _ = writeln!(
                out,
                "{:04X}|{:04X}|{}|{}",
                data.rel_addr,
                data.abs_addr,
                data.labels.join(","),
                hex_bytes(&data.bytes)
            );
        }
    }
}

fn hex_bytes(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02X}", b)).collect()
}

fn unhex_bytes(s: &str, line: usize) -> Result<Vec<u8>> {
    if s.len() % 2 != 0 {
        return Err(GendasmError::InvalidRecord {
            line,
            detail: format!("odd-length byte string: {}", s),
        });
    }
    hex::decode(s).map_err(|e| GendasmError::InvalidRecord {
        line,
        detail: e.to_string(),
    })
}

fn parse_u32_hex(s: &str, line: usize) -> Result<u32> {
    u32::from_str_radix(s, 16).map_err(|e| GendasmError::InvalidRecord {
        line,
        detail: format!("bad hex value {:?}: {}", s, e),
    })
}

fn parse_labels(s: &str) -> Vec<String> {
    if s.is_empty() {
        Vec::new()
    } else {
        s.split(',').map(|s| s.to_string()).collect()
    }
}

/// Parse an operand reference in the textual grammar:
/// `#xxxx`, `C@xxxx`/`D@xxxx`, `C^n(xxxx)`/`D^n(xxxx)`, `C&xx(r)`/`D&xx(r)`,
/// each with an optional trailing `,Mxx` mask.
pub fn parse_operand_ref(text: &str) -> Option<OperandRef> {
    if text.is_empty() {
        return None;
    }
    let (body, mask) = match text.split_once(",M") {
        Some((b, m)) => (b, u8::from_str_radix(m, 16).ok()),
        None => (text, None),
    };

    if let Some(rest) = body.strip_prefix('#') {
        let value = u32::from_str_radix(rest, 16).ok()?;
        return Some(OperandRef::Immediate { value, mask });
    }
    if let Some(rest) = body.strip_prefix("C@") {
        let addr = u32::from_str_radix(rest, 16).ok()?;
        return Some(OperandRef::AbsoluteCode { addr, mask });
    }
    if let Some(rest) = body.strip_prefix("D@") {
        let addr = u32::from_str_radix(rest, 16).ok()?;
        return Some(OperandRef::AbsoluteData { addr, mask });
    }
    if let Some(rest) = body.strip_prefix("C^") {
        return parse_relative(rest, mask, true);
    }
    if let Some(rest) = body.strip_prefix("D^") {
        return parse_relative(rest, mask, false);
    }
    if let Some(rest) = body.strip_prefix("C&") {
        return parse_register_offset(rest, mask, true);
    }
    if let Some(rest) = body.strip_prefix("D&") {
        return parse_register_offset(rest, mask, false);
    }
    None
}

fn parse_relative(rest: &str, mask: Option<u8>, is_code: bool) -> Option<OperandRef> {
    let open = rest.find('(')?;
    let close = rest.find(')')?;
    let offset = i32::from_str_radix(&rest[..open], 16).ok()?;
    let addr = u32::from_str_radix(&rest[open + 1..close], 16).ok()?;
    Some(if is_code {
        OperandRef::RelativeCode { offset, addr, mask }
    } else {
        OperandRef::RelativeData { offset, addr, mask }
    })
}

fn parse_register_offset(rest: &str, mask: Option<u8>, is_code: bool) -> Option<OperandRef> {
    let open = rest.find('(')?;
    let close = rest.find(')')?;
    let offset = u8::from_str_radix(&rest[..open], 16).ok()?;
    let register = rest[open + 1..close].to_string();
    Some(if is_code {
        OperandRef::RegisterOffsetCode {
            offset,
            register,
            mask,
        }
    } else {
        OperandRef::RegisterOffsetData {
            offset,
            register,
            mask,
        }
    })
}

/// Parse a full function output file. Unknown record types are a hard
/// parse error; addresses are validated to monotonically increase within
/// each function.
pub fn parse_func_desc_file(text: &str) -> Result<FuncDescFile> {
    let mut file = FuncDescFile::new();
    let mut current: Option<FunctionDescriptor> = None;
    let mut last_abs_addr: Option<u32> = None;

    for (i, raw_line) in text.lines().enumerate() {
        let line_no = i + 1;
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with(';') {
            continue;
        }

        let mut chars = line.chars();
        let leader = chars.next().unwrap();
        let fields: Vec<&str> = line[leader.len_utf8()..].split('|').collect();

        match leader {
            '#' => {
                if fields.len() != 3 {
                    return Err(GendasmError::InvalidRecord {
                        line: line_no,
                        detail: "expected #type|addr|size".to_string(),
                    });
                }
                let kind = RegionKind::from_str(fields[0]).ok_or_else(|| GendasmError::InvalidRecord {
                    line: line_no,
                    detail: format!("unknown region kind {:?}", fields[0]),
                })?;
                let addr = parse_u32_hex(fields[1], line_no)?;
                let size = parse_u32_hex(fields[2], line_no)?;
                file.mappings.push((kind, MemRange::new(addr, size)));
            }
            '!' => {
                if fields.len() == 2 {
                    let addr = parse_u32_hex(fields[0], line_no)?;
                    file.labels_by_address.insert(addr, parse_labels(fields[1]));
                } else if fields.len() == 3 {
                    let addr = parse_u32_hex(fields[1], line_no)?;
                    file.labels_by_address.insert(addr, parse_labels(fields[2]));
                } else {
                    return Err(GendasmError::InvalidRecord {
                        line: line_no,
                        detail: "expected !addr|labels or !type|addr|labels".to_string(),
                    });
                }
            }
            '=' => {
                if fields.len() != 4 {
                    return Err(GendasmError::InvalidRecord {
                        line: line_no,
                        detail: "expected =type|addr|names|value".to_string(),
                    });
                }
                let is_code = match fields[0] {
                    "C" => true,
                    "D" => false,
                    other => {
                        return Err(GendasmError::InvalidRecord {
                            line: line_no,
                            detail: format!("unknown indirect vector type {:?}", other),
                        })
                    }
                };
                let addr = parse_u32_hex(fields[1], line_no)?;
                let names = parse_labels(fields[2]);
                let value = parse_u32_hex(fields[3], line_no)?;
                file.indirects.push(IndirectVector {
                    is_code,
                    addr,
                    names,
                    value,
                });
            }
            '@' | '$' => {
                if let Some(func) = current.take() {
                    file.functions.push(func);
                }
                if fields.len() != 2 {
                    return Err(GendasmError::InvalidRecord {
                        line: line_no,
                        detail: "expected @addr|names or $addr|names".to_string(),
                    });
                }
                let addr = parse_u32_hex(fields[0], line_no)?;
                current = Some(FunctionDescriptor {
                    main_address: addr,
                    names: parse_labels(fields[1]),
                    members: Vec::new(),
                });
                last_abs_addr = None;
            }
            _ => {
                // Instruction or data line — re-include the leader char,
                // it was part of the first hex field, not a record tag.
                let fields: Vec<&str> = line.split('|').collect();
                let func = current.as_mut().ok_or_else(|| GendasmError::InvalidRecord {
                    line: line_no,
                    detail: "instruction/data line outside any function or data block".to_string(),
                })?;
                let rel_addr = parse_u32_hex(fields[0], line_no)?;
                let abs_addr = parse_u32_hex(fields[1], line_no)?;
                if let Some(prev) = last_abs_addr {
                    if abs_addr < prev {
                        return Err(GendasmError::InvalidRecord {
                            line: line_no,
                            detail: format!(
                                "addresses must increase monotonically: {:#X} follows {:#X}",
                                abs_addr, prev
                            ),
                        });
                    }
                }
                last_abs_addr = Some(abs_addr);
                let labels = parse_labels(fields[2]);

                if fields.len() == 4 {
                    // Data line.
                    let bytes = unhex_bytes(fields[3], line_no)?;
                    func.members.push(FuncMember::Data(DataRecord {
                        rel_addr,
                        abs_addr,
                        labels,
                        bytes,
                    }));
                } else if fields.len() == 10 || fields.len() == 11 {
                    let all_bytes = unhex_bytes(fields[3], line_no)?;
                    let opcode_bytes = unhex_bytes(fields[4], line_no)?;
                    let operand_bytes = unhex_bytes(fields[5], line_no)?;
                    let dst = parse_operand_ref(fields[6]);
                    let src = parse_operand_ref(fields[7]);
                    let (src2, mnemonic, operands_text) = if fields.len() == 11 {
                        (parse_operand_ref(fields[8]), fields[9], fields[10])
                    } else {
                        (None, fields[8], fields[9])
                    };
                    func.members.push(FuncMember::Instruction(InstructionRecord {
                        rel_addr,
                        abs_addr,
                        labels,
                        raw_bytes: all_bytes,
                        opcode_bytes,
                        operand_bytes,
                        dst,
                        src,
                        src2,
                        mnemonic: mnemonic.to_string(),
                        operands_text: operands_text.to_string(),
                    }));
                } else {
                    return Err(GendasmError::InvalidRecord {
                        line: line_no,
                        detail: format!("unrecognized field count {}", fields.len()),
                    });
                }
            }
        }
    }

    if let Some(func) = current.take() {
        file.functions.push(func);
    }

    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_mapping_and_function() {
        let text = "\
;comment line
#ROM|0000|0010
!0004|FOO
@0000|MAIN
0000|0000|,|BD0004|BD|0004||C@0004|jsr|0004
0003|0003|,|39|39||||rts|
";
        let file = parse_func_desc_file(text).unwrap();
        assert_eq!(file.mappings.len(), 1);
        assert_eq!(file.functions.len(), 1);
        assert_eq!(file.functions[0].members.len(), 2);
    }

    #[test]
    fn rejects_out_of_order_addresses() {
        let text = "\
@0000|MAIN
0002|0002|,|39|39||||rts|
0000|0000|,|39|39||||rts|
";
        assert!(parse_func_desc_file(text).is_err());
    }

    #[test]
    fn writer_and_parser_round_trip() {
        use crate::engine::DisassemblyReport;

        let mut report = DisassemblyReport::default();
        report.functions.push(FunctionDescriptor {
            main_address: 0,
            names: vec!["MAIN".to_string()],
            members: vec![FuncMember::Instruction(InstructionRecord {
                rel_addr: 0,
                abs_addr: 0,
                labels: Vec::new(),
                raw_bytes: vec![0x39],
                opcode_bytes: vec![0x39],
                operand_bytes: Vec::new(),
                dst: None,
                src: None,
                src2: None,
                mnemonic: "rts".to_string(),
                operands_text: String::new(),
            })],
        });
        let rendered = write_func_desc_file(&report, &[]);
        let parsed = parse_func_desc_file(&rendered).unwrap();
        assert_eq!(parsed.functions.len(), 1);
        assert_eq!(parsed.functions[0].members.len(), 1);
    }

    #[test]
    fn operand_ref_round_trips() {
        let cases = [
            "#0010",
            "C@0100",
            "D@0200",
            "C&10(x)",
        ];
        for case in cases {
            let parsed = parse_operand_ref(case).unwrap();
            assert_eq!(parsed.to_text(), case);
        }
    }

    #[test]
    fn operand_ref_with_mask_round_trips() {
        let parsed = parse_operand_ref("D@0200,M0F").unwrap();
        assert_eq!(parsed.to_text(), "D@0200,M0F");
    }
}

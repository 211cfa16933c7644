//! Error types shared by every subsystem.
//!
//! Every fallible operation in the crate returns `Result<T>`. Parse and I/O
//! failures propagate to the caller; per-instruction decode failures are
//! recorded as descriptor bits instead (see `engine`).

use thiserror::Error;

/// Primary error type for the disassembler and comparator.
#[derive(Debug, Error)]
pub enum GendasmError {
    /// IO error during file operations.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Allocation failure building a comparator table.
    #[error("out of memory allocating a {kind} table of size {size}")]
    OutOfMemory { kind: String, size: usize },

    /// Access to an address not covered by any loaded range.
    #[error("address {addr:#06X} is out of range")]
    OutOfRange { addr: u32 },

    /// Two pushed ranges cover the same address.
    #[error("mapping overlap at {addr:#06X} (line {line})")]
    MappingOverlap { addr: u32, line: usize },

    /// Failed to open a file for reading.
    #[error("failed to open {path} for reading: {detail}")]
    OpenRead { path: String, detail: String },

    /// Failed to open a file for writing.
    #[error("failed to open {path} for writing: {detail}")]
    OpenWrite { path: String, detail: String },

    /// Output file already exists and overwrite was not requested.
    #[error("file already exists: {path}")]
    FileExists { path: String },

    /// A record's checksum did not verify.
    #[error("checksum mismatch at line {line}: expected 0x{expected:02X}, computed 0x{computed:02X}")]
    Checksum {
        line: usize,
        expected: u8,
        computed: u8,
    },

    /// Input ended before a required terminator record was seen.
    #[error("unexpected end of file: missing {what}")]
    UnexpectedEof { what: String },

    /// A numeric field did not fit its declared width.
    #[error("overflow in field {field} at line {line}: value {value:#X}")]
    Overflow {
        field: String,
        line: usize,
        value: u64,
    },

    /// Writing an output file failed partway through.
    #[error("write failed: {detail}")]
    WriteFailed { detail: String },

    /// Reading an input file failed partway through.
    #[error("read failed: {detail}")]
    ReadFailed { detail: String },

    /// A function-output-file record did not match any known leader.
    #[error("invalid record at line {line}: {detail}")]
    InvalidRecord { line: usize, detail: String },
}

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, GendasmError>;

/// Extension trait for attaching file/line context to a lower-level error.
pub trait ResultExt<T> {
    /// Wrap the error (if any) as an [`GendasmError::InvalidRecord`] tagged with `line`.
    fn at_line(self, line: usize) -> Result<T>;
}

impl<T, E: std::fmt::Display> ResultExt<T> for std::result::Result<T, E> {
    fn at_line(self, line: usize) -> Result<T> {
        self.map_err(|e| GendasmError::InvalidRecord {
            line,
            detail: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = GendasmError::OutOfRange { addr: 0x1234 };
        assert!(err.to_string().contains("1234"));
    }

    #[test]
    fn test_checksum_display() {
        let err = GendasmError::Checksum {
            line: 7,
            expected: 0xFF,
            computed: 0xA0,
        };
        let msg = err.to_string();
        assert!(msg.contains("line 7"));
        assert!(msg.contains("FF"));
    }

    #[test]
    fn test_at_line_context() {
        let result: std::result::Result<(), &str> = Err("bad leader");
        let wrapped = result.at_line(42);
        match wrapped {
            Err(GendasmError::InvalidRecord { line, detail }) => {
                assert_eq!(line, 42);
                assert_eq!(detail, "bad leader");
            }
            _ => panic!("expected InvalidRecord"),
        }
    }
}

//! gendasm - a generic code-seeking disassembler and fuzzy function
//! comparator for firmware-class microprocessors.
//!
//! # Pipeline
//!
//! 1. A format codec ([`formats`]) loads an image into a [`memory::MemBlocks`].
//! 2. A [`decoder::Decoder`] for the target MCU ([`architectures`]) decodes
//!    one instruction at a time.
//! 3. The code-seeking engine ([`engine`]) walks outward from a set of entry
//!    points, classifying bytes as code or data and emitting
//!    [`model::FunctionDescriptor`]s.
//! 4. [`funcdesc`] renders those functions to, and parses them back from, the
//!    line-oriented function-output-file text format.
//! 5. [`compare`] fuzzily aligns two functions' token sequences and reports a
//!    similarity score plus an optional edit script.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use gendasm::architectures::Mcu;
//! use gendasm::engine::{disassemble, DisassemblyOptions};
//! use gendasm::formats::raw;
//! use gendasm::memory::MemBlocks;
//!
//! fn main() -> gendasm::error::Result<()> {
//!     let data = std::fs::read("firmware.bin")?;
//!     let mapping = raw::retrieve_file_mapping(&data, 0)?;
//!     let mut mem = MemBlocks::init_from_ranges(mapping);
//!     raw::read_data_file(&data, &mut mem, 0)?;
//!
//!     let decoder = Mcu::Hc11.decoder();
//!     let options = DisassemblyOptions::new().with_entry_point(0);
//!     let report = disassemble(&mut mem, decoder.as_ref(), &options)?;
//!     println!("found {} functions", report.functions.len());
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::similar_names)]
#![allow(clippy::too_many_lines)]

pub mod architectures;
pub mod compare;
pub mod decoder;
pub mod engine;
pub mod error;
pub mod formats;
pub mod funcdesc;
pub mod memory;
pub mod model;

pub use error::{GendasmError, Result};

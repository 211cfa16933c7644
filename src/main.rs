//! gendasm CLI: disassemble firmware images and fuzzily compare functions.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use gendasm::architectures::Mcu;
use gendasm::compare::{self, CompareMethod};
use gendasm::engine::{disassemble, DisassemblyOptions};
use gendasm::formats::{elf, hex, raw};
use gendasm::funcdesc::{parse_func_desc_file, write_func_desc_file};
use gendasm::memory::MemBlocks;
use gendasm::model::RegionKind;

/// Generic code-seeking disassembler and fuzzy function comparator.
#[derive(Parser, Debug)]
#[command(name = "gendasm")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Enable debug logging.
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load an image, disassemble it, and write a function-output-file.
    Disassemble {
        /// Input image path.
        input: PathBuf,

        /// Input image format.
        #[arg(short = 'f', long, value_enum, default_value = "raw")]
        format: ImageFormat,

        /// Target MCU.
        #[arg(short, long)]
        mcu: String,

        /// Base load address (raw images only), hex without a prefix.
        #[arg(long, default_value = "0")]
        base: String,

        /// Entry point addresses, hex without a prefix. May be given
        /// multiple times.
        #[arg(short, long = "entry")]
        entries: Vec<String>,

        /// Output path; stdout if omitted.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Print a JSON summary (function/label/branch counts) to stderr
        /// instead of the plain-text one.
        #[arg(long)]
        json: bool,
    },

    /// Fuzzily compare one function from each of two function-output-files.
    Compare {
        /// First function-output-file.
        left: PathBuf,

        /// Second function-output-file.
        right: PathBuf,

        /// Name of the function to compare (defaults to each file's first
        /// function).
        #[arg(short, long)]
        function: Option<String>,

        /// Alignment algorithm.
        #[arg(short, long, value_enum, default_value = "greedy")]
        method: MethodArg,

        /// Print the edit script and two-column diff.
        #[arg(short = 's', long)]
        script: bool,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ImageFormat {
    Raw,
    Hex,
    Srec,
    Elf,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum MethodArg {
    Xdrop,
    Greedy,
}

impl From<MethodArg> for CompareMethod {
    fn from(value: MethodArg) -> Self {
        match value {
            MethodArg::Xdrop => CompareMethod::XDrop,
            MethodArg::Greedy => CompareMethod::Greedy,
        }
    }
}

fn parse_hex_u32(s: &str) -> anyhow::Result<u32> {
    Ok(u32::from_str_radix(s.trim_start_matches("0x"), 16)?)
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.verbose {
        tracing_subscriber::fmt()
            .with_env_filter("gendasm=debug")
            .init();
    }

    match args.command {
        Command::Disassemble {
            input,
            format,
            mcu,
            base,
            entries,
            output,
            json,
        } => run_disassemble(&input, format, &mcu, &base, &entries, output.as_deref(), json),
        Command::Compare {
            left,
            right,
            function,
            method,
            script,
        } => run_compare(&left, &right, function.as_deref(), method.into(), script),
    }
}

fn run_disassemble(
    input: &std::path::Path,
    format: ImageFormat,
    mcu: &str,
    base: &str,
    entries: &[String],
    output: Option<&std::path::Path>,
    json: bool,
) -> anyhow::Result<()> {
    let data = std::fs::read(input)?;
    let base_addr = parse_hex_u32(base)?;
    let target = Mcu::from_name(mcu).ok_or_else(|| anyhow::anyhow!("unknown MCU: {mcu}"))?;

    let (mut mem, default_entry): (MemBlocks, Option<u32>) = match format {
        ImageFormat::Raw => {
            let mapping = raw::retrieve_file_mapping(&data, base_addr)?;
            let mut mem = MemBlocks::init_from_ranges(mapping);
            raw::read_data_file(&data, &mut mem, base_addr)?;
            (mem, None)
        }
        ImageFormat::Hex => {
            let text = String::from_utf8_lossy(&data).into_owned();
            let mapping = hex::intel_hex::retrieve_file_mapping(&text)?;
            let mut mem = MemBlocks::init_from_ranges(mapping);
            hex::intel_hex::read_data_file(&text, &mut mem)?;
            (mem, None)
        }
        ImageFormat::Srec => {
            let text = String::from_utf8_lossy(&data).into_owned();
            let mapping = hex::srec::retrieve_file_mapping(&text)?;
            let mut mem = MemBlocks::init_from_ranges(mapping);
            hex::srec::read_data_file(&text, &mut mem)?;
            (mem, None)
        }
        ImageFormat::Elf => {
            let mapping = elf::retrieve_file_mapping(&data)?;
            let mut mem = MemBlocks::init_from_ranges(mapping);
            let (entry, _overlap) = elf::read_data_file(&data, &mut mem)?;
            (mem, Some(entry))
        }
    };

    let mut options = DisassemblyOptions::new();
    for e in entries {
        options = options.with_entry_point(parse_hex_u32(e)?);
    }
    if let Some(entry) = default_entry {
        options = options.with_entry_point(entry);
    }

    let decoder = target.decoder();
    let report = disassemble(&mut mem, decoder.as_ref(), &options)?;
    let mappings = vec![(RegionKind::Rom, gendasm::memory::MemRange::new(base_addr, data.len() as u32))];
    let text = write_func_desc_file(&report, &mappings);

    match output {
        Some(path) => std::fs::write(path, text)?,
        None => print!("{text}"),
    }

    if json {
        print_json_summary(mcu, input, &report)?;
    } else {
        eprintln!(
            "{} functions, {} labels, {} undeterminable branches",
            report.functions.len(),
            report.labels.len(),
            report.undeterminable_branches.len()
        );
    }
    Ok(())
}

fn print_json_summary(
    mcu: &str,
    input: &std::path::Path,
    report: &gendasm::engine::DisassemblyReport,
) -> anyhow::Result<()> {
    #[derive(serde::Serialize)]
    struct JsonSummary {
        file: String,
        mcu: String,
        functions: usize,
        labels: usize,
        undeterminable_branches: Vec<String>,
        function_names: Vec<String>,
    }

    let summary = JsonSummary {
        file: input.display().to_string(),
        mcu: mcu.to_string(),
        functions: report.functions.len(),
        labels: report.labels.len(),
        undeterminable_branches: report
            .undeterminable_branches
            .iter()
            .map(|a| format!("0x{:X}", a))
            .collect(),
        function_names: report
            .functions
            .iter()
            .filter_map(|f| f.primary_name().map(|s| s.to_string()))
            .collect(),
    };

    eprintln!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn run_compare(
    left_path: &std::path::Path,
    right_path: &std::path::Path,
    function: Option<&str>,
    method: CompareMethod,
    want_script: bool,
) -> anyhow::Result<()> {
    let left_text = std::fs::read_to_string(left_path)?;
    let right_text = std::fs::read_to_string(right_path)?;
    let left_file = parse_func_desc_file(&left_text)?;
    let right_file = parse_func_desc_file(&right_text)?;

    let pick = |file: &gendasm::model::FuncDescFile| -> anyhow::Result<gendasm::model::FunctionDescriptor> {
        let found = match function {
            Some(name) => file
                .functions
                .iter()
                .find(|f| f.names.iter().any(|n| n == name)),
            None => file.functions.first(),
        };
        found
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("function not found"))
    };

    let f1 = pick(&left_file)?;
    let f2 = pick(&right_file)?;

    let (score, ops) = compare::compare(method, &f1, &f2, want_script);
    println!("similarity: {:.4}", score);

    if want_script {
        if let Some(ops) = &ops {
            println!("edit script: [{}]", ops.iter().map(|o| o.to_text()).collect::<Vec<_>>().join(", "));
            println!("{}", compare::diff_text(&f1, &f2, ops));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_disassemble_args() {
        let args = Args::try_parse_from([
            "gendasm", "disassemble", "fw.bin", "--mcu", "hc11", "--entry", "0",
        ])
        .unwrap();
        match args.command {
            Command::Disassemble { mcu, entries, .. } => {
                assert_eq!(mcu, "hc11");
                assert_eq!(entries, vec!["0".to_string()]);
            }
            _ => panic!("expected Disassemble"),
        }
    }

    #[test]
    fn parses_compare_args() {
        let args = Args::try_parse_from(["gendasm", "compare", "a.fdf", "b.fdf", "--script"]).unwrap();
        match args.command {
            Command::Compare { script, .. } => assert!(script),
            _ => panic!("expected Compare"),
        }
    }
}

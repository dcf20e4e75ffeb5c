use std::path::PathBuf;

use clap::Parser;
use colored::Colorize;
use miette::Result;

use sophia8::{assemble, output, preprocess};

/// Sophia8 two-pass assembler.
///
/// Compiles a `.s8` source file (plus its `.include` tree) into a full
/// 0xFFFF-byte memory image, a preprocessed-source sidecar and a debug map
/// for file:line breakpoints.
#[derive(Parser)]
#[command(version)]
struct Args {
    /// Source file to assemble
    input: PathBuf,

    /// Output image file; `<output>.pre.s8` and `<output>.deb` are written
    /// next to it
    #[arg(short, long, default_value = "sophia8_image.bin")]
    output: PathBuf,
}

fn main() -> Result<()> {
    let args = Args::parse();

    println!(
        "{:>12} target {}",
        "Assembling".green().bold(),
        args.input.display()
    );

    let lines = preprocess(&args.input)?;
    let assembly = assemble(&lines)?;

    // All artifacts or none: nothing is written until assembly succeeded.
    output::write_image(&args.output, assembly.image.bytes())?;
    output::write_preprocessed(&output::preprocessed_path(&args.output), &lines)?;
    output::write_debug_map(
        &output::debug_map_path(&args.output),
        &assembly.records,
        &args.output,
    )?;

    println!(
        "{:>12} binary, entry 0x{:04X}",
        "Finished".green().bold(),
        assembly.entry
    );
    println!(
        "{:>12} {}",
        "Saved to".green().bold(),
        args.output.display()
    );
    Ok(())
}

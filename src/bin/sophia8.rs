use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use clap::Parser;
use colored::Colorize;
use miette::{IntoDiagnostic, Result};

use sophia8::debug::DebugMap;
use sophia8::line::SrcLine;
use sophia8::runtime::Breakpoint;
use sophia8::term::RawModeGuard;
use sophia8::{assemble, snapshot, RunState};

/// Sophia8 virtual machine.
///
/// Runs a raw memory image, a program named by its debug map, or a state
/// snapshot. With a debug map, execution can stop at a `file:line`
/// breakpoint; hitting it dumps the registers and writes a `debug.img`
/// snapshot that can be resumed later.
#[derive(Parser)]
#[command(version)]
struct Args {
    /// Memory image (`.bin`), debug map (`.deb`), or `debug.img` snapshot.
    /// Without it, a built-in self-test program runs.
    program: Option<PathBuf>,

    /// Breakpoint: `<file> <line>` after a debug map, or
    /// `<map.deb> <file> <line>` after a snapshot
    rest: Vec<String>,
}

enum ProgramKind {
    Image,
    Map,
    Snapshot,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let Some(program) = args.program else {
        if !args.rest.is_empty() {
            usage_exit("breakpoint arguments require a program file");
        }
        return self_test();
    };

    let mut state = RunState::new();
    match classify(&program)? {
        ProgramKind::Image => {
            if !args.rest.is_empty() {
                usage_exit("breakpoints need a .deb debug map, not a raw image");
            }
            let image = fs::read(&program).into_diagnostic()?;
            state.load_image(&image)?;
        }
        ProgramKind::Map => {
            let map = DebugMap::load(&program)?;
            let image = fs::read(resolve_binary(&program, &map.binary)).map_err(|e| {
                sophia8::error::vm_load(format!(
                    "cannot read binary {} named by {}: {e}",
                    map.binary.display(),
                    program.display()
                ))
            })?;
            state.load_image(&image)?;
            match args.rest.as_slice() {
                [] => {}
                [file, line] => arm_breakpoint(&mut state, &map, file, line),
                _ => usage_exit("expected: sophia8 <program.deb> [<break_file> <break_line>]"),
            }
        }
        ProgramKind::Snapshot => {
            state = snapshot::load(&program)?;
            match args.rest.as_slice() {
                [] => {}
                [deb, file, line] => {
                    let map = DebugMap::load(Path::new(deb))?;
                    arm_breakpoint(&mut state, &map, file, line);
                }
                _ => usage_exit(
                    "expected: sophia8 debug.img [<program.deb> <break_file> <break_line>]",
                ),
            }
        }
    }

    let _term = RawModeGuard::new();
    state.run()
}

/// `.deb` by extension; anything else is sniffed for the snapshot magic and
/// otherwise treated as a raw image.
fn classify(path: &Path) -> Result<ProgramKind> {
    if path.extension().is_some_and(|e| e == "deb") {
        return Ok(ProgramKind::Map);
    }
    let mut prefix = [0u8; 4];
    let mut file = fs::File::open(path)
        .map_err(|e| sophia8::error::vm_load(format!("cannot open {}: {e}", path.display())))?;
    let n = file.read(&mut prefix).into_diagnostic()?;
    if snapshot::is_snapshot(&prefix[..n]) {
        Ok(ProgramKind::Snapshot)
    } else {
        Ok(ProgramKind::Image)
    }
}

fn resolve_binary(map_path: &Path, binary: &Path) -> PathBuf {
    if binary.exists() || binary.is_absolute() {
        return binary.to_path_buf();
    }
    // A relative name is taken relative to the map's own directory.
    match map_path.parent() {
        Some(dir) => dir.join(binary),
        None => binary.to_path_buf(),
    }
}

fn arm_breakpoint(state: &mut RunState, map: &DebugMap, file: &str, line: &str) {
    let Ok(line_no) = line.parse::<u32>() else {
        usage_exit("breakpoint line must be a number");
    };
    match map.resolve(file, line_no) {
        Ok(addr) => state.set_breakpoint(Breakpoint {
            addr,
            file: file.to_string(),
            line: line_no,
        }),
        Err(err) => {
            eprintln!("{err:?}");
            std::process::exit(1);
        }
    }
}

fn usage_exit(msg: &str) -> ! {
    eprintln!("{}: {msg}", "error".red().bold());
    eprintln!("run with --help for the invocation variants");
    std::process::exit(2);
}

/// A small program assembled at startup: prints a banner through the TTY
/// cell and halts.
const SELF_TEST: &str = "\
; built-in self-test
.org 0x0010
msg:    .string \"Sophia8 self test OK\"

.org
start:  SET #0x00, R1
        SET #0x10, R2
loop:   LOADR R0, R1, R2
        JZ R0, done
        STORE R0, 0xFF03
        INC R2
        JMP loop
done:   SET #0x0A, R0
        STORE R0, 0xFF03
        HALT
";

fn self_test() -> Result<()> {
    println!("{:>12} built-in self-test", "Running".green().bold());
    let lines: Vec<SrcLine> = SELF_TEST
        .lines()
        .enumerate()
        .map(|(i, text)| SrcLine::new(text, "<self-test>", (i + 1) as u32))
        .collect();
    let assembly = assemble(&lines)?;

    let mut state = RunState::new();
    state.load_image(assembly.image.bytes())?;
    {
        let _term = RawModeGuard::new();
        state.run()?;
    }
    state.dump_registers();
    Ok(())
}

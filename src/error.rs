//! Diagnostic constructors. Every assembler error carries the offending
//! file, 1-based line, source text and the include chain from the entry file
//! down to the failure site.

use std::fmt::Display;

use miette::{miette, Report, Severity};

use crate::line::SrcLine;

fn chain_help(sl: &SrcLine) -> String {
    if sl.chain.len() <= 1 {
        return format!("in {}", sl.file);
    }
    let mut out = String::from("include chain:");
    for (i, f) in sl.chain.iter().enumerate() {
        out.push_str(&format!("\n  [{i}] {f}"));
    }
    out
}

/// Core assembler diagnostic: message plus full source location.
pub fn at_line(code: &'static str, msg: impl Display, sl: &SrcLine) -> Report {
    miette!(
        severity = Severity::Error,
        code = code,
        help = chain_help(sl),
        "{msg}\n  at {}:{}\n  >> {}",
        sl.file,
        sl.line_no,
        sl.text.trim_end(),
    )
}

// Preprocessor

pub fn include_not_found(requested: &str, tried: &[String], sl: &SrcLine) -> Report {
    let mut msg = format!("include file not found: {requested}\nsearched:");
    for t in tried {
        msg.push_str(&format!("\n  - {t}"));
    }
    at_line("preproc::not_found", msg, sl)
}

pub fn include_cycle(stack: &[String], offender: &str, sl: &SrcLine) -> Report {
    let mut msg = String::from("include cycle detected:");
    for p in stack {
        msg.push_str(&format!("\n  -> {p}"));
    }
    msg.push_str(&format!("\n  -> {offender}"));
    at_line("preproc::cycle", msg, sl)
}

pub fn duplicate_include(path: &str, sl: &SrcLine) -> Report {
    at_line(
        "preproc::duplicate",
        format!("multiple inclusion is forbidden (already included): {path}"),
        sl,
    )
}

pub fn read_failure(path: &str, err: std::io::Error, sl: &SrcLine) -> Report {
    at_line(
        "preproc::read",
        format!("failed to read source file {path}: {err}"),
        sl,
    )
}

pub fn bad_include_syntax(sl: &SrcLine) -> Report {
    at_line(
        "preproc::syntax",
        r#"invalid .include syntax, expected: .include "file.s8""#,
        sl,
    )
}

// Layout (pass 1)

pub fn duplicate_label(name: &str, sl: &SrcLine) -> Report {
    at_line(
        "layout::duplicate_label",
        format!("duplicate label '{name}'"),
        sl,
    )
}

pub fn unknown_directive(name: &str, sl: &SrcLine) -> Report {
    at_line(
        "parse::directive",
        format!("unknown directive '{name}'"),
        sl,
    )
}

pub fn unknown_instruction(name: &str, sl: &SrcLine) -> Report {
    at_line(
        "parse::instruction",
        format!("unknown instruction '{name}'"),
        sl,
    )
}

pub fn operand_count(mnem: impl Display, expected: usize, found: usize, sl: &SrcLine) -> Report {
    at_line(
        "parse::operand_count",
        format!("{mnem} expects {expected} operand(s), found {found}"),
        sl,
    )
}

pub fn missing_org(sl: &SrcLine) -> Report {
    at_line(
        "layout::missing_org",
        "no .org found (mandatory; use .org <addr> and/or .org)",
        sl,
    )
}

pub fn image_overflow(sl: &SrcLine) -> Report {
    at_line(
        "layout::overflow",
        "assembly exceeds the 0xFFFF-byte memory image",
        sl,
    )
}

// Emission (pass 2)

pub fn undefined_label(name: &str, sl: &SrcLine) -> Report {
    at_line(
        "emit::undefined_label",
        format!("undefined label '{name}'"),
        sl,
    )
}

pub fn overlap(addr: u32, sl: &SrcLine) -> Report {
    at_line(
        "emit::overlap",
        format!("overlap at address 0x{addr:04X}"),
        sl,
    )
}

pub fn emit_out_of_range(addr: u32, sl: &SrcLine) -> Report {
    at_line(
        "emit::out_of_range",
        format!("emit address out of range: 0x{addr:04X}"),
        sl,
    )
}

// VM load / debug map

pub fn vm_load(msg: impl Display) -> Report {
    miette!(severity = Severity::Error, code = "vm::load", "{msg}")
}

pub fn deb_parse(path: &str, line_no: usize, msg: impl Display) -> Report {
    miette!(
        severity = Severity::Error,
        code = "deb::parse",
        "{msg}\n  at {path}:{line_no}",
    )
}

pub fn breakpoint_not_found(file: &str, line: u32, data_only: bool) -> Report {
    if data_only {
        miette!(
            severity = Severity::Error,
            code = "deb::breakpoint",
            help = "the line assembles to data, not instructions",
            "no executable code on this line: {file}:{line}",
        )
    } else {
        miette!(
            severity = Severity::Error,
            code = "deb::breakpoint",
            help = "breakpoints need a line that produced CODE bytes; check the .deb map",
            "breakpoint not found: {file}:{line}",
        )
    }
}

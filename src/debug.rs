//! Debug map model: the per-item records emitted by the assembler, the
//! `.deb` file parser and the `file:line` breakpoint resolver.

use std::path::{Path, PathBuf};

use lazy_static::lazy_static;
use miette::Result;
use regex::Regex;

use crate::error;
use crate::isa::Mnemonic;
use crate::line::SrcLine;

/// File name recorded for emissions with no source line (the entry stub).
pub const IMPLICIT_FILE: &str = "<implicit>";

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub enum RecordKind {
    /// Instruction bytes.
    Code,
    /// `.byte` / `.word` / `.string` payloads.
    Data,
}

impl RecordKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RecordKind::Code => "CODE",
            RecordKind::Data => "DATA",
        }
    }
}

/// One emitted span and the source line that produced it. Every emitted byte
/// of the image is owned by exactly one record.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct DebugRecord {
    pub kind: RecordKind,
    pub addr: u16,
    pub bytes: Vec<u8>,
    pub file: String,
    pub line_no: u32,
    pub text: String,
}

impl DebugRecord {
    pub fn from_line(kind: RecordKind, addr: u16, bytes: Vec<u8>, sl: &SrcLine) -> Self {
        DebugRecord {
            kind,
            addr,
            bytes,
            file: sl.file.clone(),
            line_no: sl.line_no,
            text: sl.text.clone(),
        }
    }

    /// The record for the implicit entry stub at `0x0000`.
    pub fn entry_stub(entry: u16) -> Self {
        DebugRecord {
            kind: RecordKind::Code,
            addr: 0x0000,
            bytes: vec![Mnemonic::Jmp.opcode(), (entry >> 8) as u8, (entry & 0xFF) as u8],
            file: IMPLICIT_FILE.to_string(),
            line_no: 0,
            text: "JMP <entry>".to_string(),
        }
    }
}

lazy_static! {
    static ref RECORD: Regex =
        Regex::new(r"^([0-9A-Fa-f]{4})\s+(\d+)\s+(CODE|DATA)\s+(.*)$").unwrap();
    // Greedy prefix puts the split at the last `:<digits>: ` occurrence.
    static ref LOCATION: Regex = Regex::new(r"^(.*):(\d+): (.*)$").unwrap();
}

/// A parsed `.deb` file: the binary image it describes plus its records.
#[derive(Debug)]
pub struct DebugMap {
    pub binary: PathBuf,
    pub records: Vec<DebugRecord>,
}

impl DebugMap {
    /// Parse a `.deb` file. The `; Binary:` header names the companion
    /// image; every non-comment line must be a well-formed record.
    pub fn load(path: &Path) -> Result<DebugMap> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| error::vm_load(format!("cannot read {}: {e}", path.display())))?;
        let path_s = path.display().to_string();

        let mut binary: Option<PathBuf> = None;
        let mut records = Vec::new();

        for (idx, raw) in text.lines().enumerate() {
            let line = raw.trim_end();
            if line.is_empty() {
                continue;
            }
            if let Some(rest) = line.strip_prefix(';') {
                if let Some(bin) = rest.trim_start().strip_prefix("Binary:") {
                    binary = Some(PathBuf::from(bin.trim()));
                }
                continue;
            }
            records.push(Self::parse_record(line, &path_s, idx + 1)?);
        }

        let binary = binary
            .ok_or_else(|| error::vm_load(format!("{path_s}: missing '; Binary:' header")))?;
        Ok(DebugMap { binary, records })
    }

    fn parse_record(line: &str, path: &str, line_no: usize) -> Result<DebugRecord> {
        let caps = RECORD
            .captures(line)
            .ok_or_else(|| error::deb_parse(path, line_no, "malformed debug record"))?;

        let addr = u16::from_str_radix(&caps[1], 16)
            .map_err(|_| error::deb_parse(path, line_no, "bad record address"))?;
        let len: usize = caps[2]
            .parse()
            .map_err(|_| error::deb_parse(path, line_no, "bad record length"))?;
        let kind = match &caps[3] {
            "CODE" => RecordKind::Code,
            _ => RecordKind::Data,
        };

        // The byte span is `len` two-digit hex tokens; everything after is
        // the `file:line: original` suffix.
        let mut rest = caps.get(4).map(|m| m.as_str()).unwrap_or("");
        let mut bytes = Vec::with_capacity(len);
        for _ in 0..len {
            let tok_rest = rest.trim_start();
            let (tok, tail) = tok_rest.split_once(' ').unwrap_or((tok_rest, ""));
            let byte = u8::from_str_radix(tok, 16)
                .map_err(|_| error::deb_parse(path, line_no, "bad byte in record span"))?;
            bytes.push(byte);
            rest = tail;
        }

        let tail = rest.trim_start();
        let loc = LOCATION
            .captures(tail)
            .ok_or_else(|| error::deb_parse(path, line_no, "missing file:line suffix"))?;
        let src_line: u32 = loc[2]
            .parse()
            .map_err(|_| error::deb_parse(path, line_no, "bad source line number"))?;

        Ok(DebugRecord {
            kind,
            addr,
            bytes,
            file: loc[1].to_string(),
            line_no: src_line,
            text: loc[3].to_string(),
        })
    }

    /// Resolve a `file:line` breakpoint to the smallest CODE address mapped
    /// to that line. Files match exactly or by basename.
    pub fn resolve(&self, file: &str, line: u32) -> Result<u16> {
        let query_base = basename(file);
        let mut best: Option<u16> = None;
        let mut line_matched = false;

        for rec in &self.records {
            if rec.line_no != line {
                continue;
            }
            if rec.file != file && basename(&rec.file) != query_base {
                continue;
            }
            line_matched = true;
            if rec.kind == RecordKind::Code {
                best = Some(match best {
                    Some(a) => a.min(rec.addr),
                    None => rec.addr,
                });
            }
        }

        best.ok_or_else(|| error::breakpoint_not_found(file, line, line_matched))
    }
}

fn basename(path: &str) -> &str {
    Path::new(path)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(path)
}

//! Artifact writers: the raw memory image, the preprocessed-source sidecar
//! and the debug map. Failure to write any artifact is fatal.

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use miette::{IntoDiagnostic, Result, WrapErr};

use crate::debug::DebugRecord;
use crate::line::SrcLine;

/// `prog.bin` -> `prog.pre.s8`
pub fn preprocessed_path(bin_out: &Path) -> PathBuf {
    bin_out.with_extension("pre.s8")
}

/// `prog.bin` -> `prog.deb`
pub fn debug_map_path(bin_out: &Path) -> PathBuf {
    bin_out.with_extension("deb")
}

pub fn write_image(path: &Path, image: &[u8]) -> Result<()> {
    fs::write(path, image)
        .into_diagnostic()
        .wrap_err_with(|| format!("cannot write image {}", path.display()))
}

/// Dump the fully-preprocessed source. Every line gets a `;@ file:line`
/// marker, and a banner is inserted whenever the originating file changes,
/// so the sidecar can be re-assembled and still diffed against its inputs.
pub fn write_preprocessed(path: &Path, lines: &[SrcLine]) -> Result<()> {
    let mut out = String::new();
    out.push_str("; s8asm preprocessed output (all .include expanded)\n");
    out.push_str("; This file is generated to aid debugging.\n\n");

    let mut last_file = "";
    for sl in lines {
        if sl.file != last_file {
            let _ = writeln!(out, "\n; ===== BEGIN FILE: {} =====", sl.file);
            last_file = &sl.file;
        }
        let _ = writeln!(out, ";@ {}:{}", sl.file, sl.line_no);
        out.push_str(&sl.text);
        out.push('\n');
    }

    fs::write(path, out)
        .into_diagnostic()
        .wrap_err_with(|| format!("cannot write preprocessed source {}", path.display()))
}

/// Write the `.deb` map: header comments naming the binary, then one line
/// per record, sorted ascending by address with CODE before DATA on ties.
pub fn write_debug_map(path: &Path, records: &[DebugRecord], bin_out: &Path) -> Result<()> {
    let mut sorted: Vec<&DebugRecord> = records.iter().collect();
    sorted.sort_by_key(|r| (r.addr, r.kind));

    let mut out = String::new();
    out.push_str("; s8asm debug map (.deb)\n");
    out.push_str("; This file is generated automatically and matches the emitted binary image exactly.\n");
    let _ = writeln!(out, "; Binary: {}", bin_out.display());
    out.push_str("; Format: AAAA  LEN  KIND  BYTES...  file:line: original source line\n\n");

    for rec in sorted {
        let _ = write!(out, "{:04X}  {:>3}  {}  ", rec.addr, rec.bytes.len(), rec.kind.as_str());
        for (i, b) in rec.bytes.iter().enumerate() {
            if i > 0 {
                out.push(' ');
            }
            let _ = write!(out, "{b:02X}");
        }
        let _ = writeln!(out, "  {}:{}: {}", rec.file, rec.line_no, rec.text);
    }

    fs::write(path, out)
        .into_diagnostic()
        .wrap_err_with(|| format!("cannot write debug map {}", path.display()))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::debug::{DebugMap, RecordKind};
    use tempfile::TempDir;

    #[test]
    fn sidecar_paths_replace_extension() {
        assert_eq!(
            preprocessed_path(Path::new("out/prog.bin")),
            PathBuf::from("out/prog.pre.s8")
        );
        assert_eq!(
            debug_map_path(Path::new("out/prog.bin")),
            PathBuf::from("out/prog.deb")
        );
    }

    #[test]
    fn preprocessed_dump_round_trips_lines() {
        let lines = vec![
            SrcLine::new(".org 0x0003", "a.s8", 1),
            SrcLine::new("HALT", "a.s8", 2),
            SrcLine::new("NOP", "b.s8", 1),
        ];
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("prog.pre.s8");
        write_preprocessed(&path, &lines).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("; ===== BEGIN FILE: a.s8 ====="));
        assert!(text.contains("; ===== BEGIN FILE: b.s8 ====="));
        assert!(text.contains(";@ a.s8:2\nHALT\n"));
        assert!(text.contains(";@ b.s8:1\nNOP\n"));
    }

    #[test]
    fn debug_map_is_sorted_and_reparsable() {
        let sl = SrcLine::new("x: HALT", "prog.s8", 7);
        let records = vec![
            DebugRecord::from_line(RecordKind::Data, 0x0200, vec![0x41, 0x00], &sl),
            DebugRecord::from_line(RecordKind::Code, 0x0010, vec![0x00], &sl),
            DebugRecord::entry_stub(0x0010),
        ];
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("prog.deb");
        write_debug_map(&path, &records, Path::new("prog.bin")).unwrap();

        let map = DebugMap::load(&path).unwrap();
        assert_eq!(map.binary, PathBuf::from("prog.bin"));
        let addrs: Vec<u16> = map.records.iter().map(|r| r.addr).collect();
        assert_eq!(addrs, vec![0x0000, 0x0010, 0x0200]);
        assert_eq!(map.records[2].bytes, vec![0x41, 0x00]);
        assert_eq!(map.records[2].text, "x: HALT");
    }
}

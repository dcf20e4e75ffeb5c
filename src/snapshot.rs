//! Full machine-state snapshots (`debug.img`).
//!
//! Layout: magic `"S8DI"`, version byte, `R0..R7`, then `IP`/`SP`/`BP`
//! big-endian, the carry flag, 7 reserved zero bytes, and the complete
//! memory.

use std::fs;
use std::path::Path;

use miette::Result;

use crate::error;
use crate::isa::MEM_SIZE;
use crate::runtime::RunState;

pub const MAGIC: &[u8; 4] = b"S8DI";
pub const VERSION: u8 = 0x01;
/// Snapshot written next to the VM when a breakpoint fires.
pub const SNAPSHOT_FILE: &str = "debug.img";

const HEADER_SIZE: usize = 4 + 1 + 8 + 6 + 1 + 7;

/// Whether a file's first bytes look like a snapshot.
pub fn is_snapshot(prefix: &[u8]) -> bool {
    prefix.len() >= 4 && &prefix[..4] == MAGIC
}

pub fn write(path: &Path, st: &RunState) -> Result<()> {
    let mut out = Vec::with_capacity(HEADER_SIZE + MEM_SIZE);
    out.extend_from_slice(MAGIC);
    out.push(VERSION);
    for i in 0..8 {
        out.push(st.reg(i));
    }
    out.extend_from_slice(&st.ip().to_be_bytes());
    out.extend_from_slice(&st.sp().to_be_bytes());
    out.extend_from_slice(&st.bp().to_be_bytes());
    out.push(st.carry() as u8);
    out.extend_from_slice(&[0u8; 7]);
    out.extend_from_slice(st.mem());

    fs::write(path, out)
        .map_err(|e| error::vm_load(format!("cannot write snapshot {}: {e}", path.display())))
}

pub fn load(path: &Path) -> Result<RunState> {
    let bytes = fs::read(path)
        .map_err(|e| error::vm_load(format!("cannot read snapshot {}: {e}", path.display())))?;
    restore(&bytes).map_err(|r| {
        error::vm_load(format!("{}: {r}", path.display()))
    })
}

/// Rebuild a machine from snapshot bytes.
pub fn restore(bytes: &[u8]) -> Result<RunState> {
    if bytes.len() < HEADER_SIZE || !is_snapshot(bytes) {
        return Err(error::vm_load("bad snapshot magic (expected S8DI)"));
    }
    if bytes[4] != VERSION {
        return Err(error::vm_load(format!(
            "unsupported snapshot version {} (expected {VERSION})",
            bytes[4]
        )));
    }
    if bytes.len() != HEADER_SIZE + MEM_SIZE {
        return Err(error::vm_load(format!(
            "truncated snapshot: {} bytes, expected {}",
            bytes.len(),
            HEADER_SIZE + MEM_SIZE
        )));
    }

    let mut st = RunState::new();
    for i in 0..8 {
        st.set_reg(i, bytes[5 + i]);
    }
    let word = |at: usize| ((bytes[at] as u16) << 8) | bytes[at + 1] as u16;
    st.set_ip(word(13));
    st.set_sp(word(15));
    st.set_bp(word(17));
    st.set_carry(bytes[19] != 0);
    st.mem_mut().copy_from_slice(&bytes[HEADER_SIZE..]);
    Ok(st)
}
